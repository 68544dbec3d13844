/// Wallet core owned by the background: the unlock session, the account
/// registry, and the service that ties them to storage and the relay.
pub mod registry;
pub mod service;
pub mod session;
