//! Relay server in local and server side implementations.

pub mod socks5;
pub mod tcprelay;
