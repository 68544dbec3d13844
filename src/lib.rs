pub mod background;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod relay;
pub mod rpc;
pub mod state;
pub mod storage;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;
