//! Relay for TCP implementation

pub use self::{
    crypto_io::{CryptoStream, CryptoStreamReadHalf, CryptoStreamWriteHalf},
    proxy_stream::ProxyClientStream,
    stream::ProtocolError,
};

pub mod crypto_io;
pub mod proxy_stream;
pub mod stream;
pub mod utils;
