//! Crypto facilities for the shadowsocks stream protocol

pub use self::{
    kdf::bytes_to_key,
    kind::{available_ciphers, CipherKind},
    session::{CipherSession, Decryptor, Encryptor},
};

mod kdf;
mod kind;
mod session;

/// Crypto errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("unsupported cipher method \"{0}\"")]
    UnsupportedCipherMethod(String),
}

impl From<CipherError> for std::io::Error {
    fn from(err: CipherError) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
    }
}
