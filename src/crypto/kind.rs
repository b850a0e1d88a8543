use std::{
    fmt::{self, Display},
    str::FromStr,
};

use super::CipherError;

const CIPHER_AES_128_CFB: &str = "aes-128-cfb";

/// Supported cipher methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CipherKind {
    /// AES-128 in 128-bit CFB mode
    #[default]
    Aes128Cfb,
}

impl CipherKind {
    /// Name of the method, as it appears in configuration
    pub fn name(self) -> &'static str {
        match self {
            CipherKind::Aes128Cfb => CIPHER_AES_128_CFB,
        }
    }

    /// Key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            CipherKind::Aes128Cfb => 16,
        }
    }

    /// IV length in bytes
    pub fn iv_len(self) -> usize {
        match self {
            CipherKind::Aes128Cfb => 16,
        }
    }
}

impl Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherKind {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<CipherKind, CipherError> {
        match s {
            CIPHER_AES_128_CFB => Ok(CipherKind::Aes128Cfb),
            _ => Err(CipherError::UnsupportedCipherMethod(s.to_owned())),
        }
    }
}

/// Names of all the supported ciphers
pub fn available_ciphers() -> Vec<&'static str> {
    vec![CIPHER_AES_128_CFB]
}
