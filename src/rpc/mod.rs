/// Background-side request handling.
///
/// `methods` names the supported provider methods, `approval` runs the
/// user-confirmation round trip through the popup, and `dispatcher` turns a
/// `WalletRequest` into exactly one `WalletResponse`.
pub mod approval;
pub mod dispatcher;
pub mod methods;
