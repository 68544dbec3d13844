/// Cross-context relay between web pages and the background.
///
/// A request crosses three hops: the page provider mints an id and posts a
/// `PageMessage`, the content forwarder hands it to the background over the
/// extension port, and the background's answer travels back with the same
/// id. Wallet events take the reverse path through `RelayHub`.
pub mod forwarder;
pub mod hub;
pub mod protocol;
pub mod provider;
