//! Stream cipher session
//!
//! A session holds one encrypting and one decrypting keystream. The encrypting side is ready as
//! soon as the session is created, with a random IV that must be sent to the peer before any
//! payload. The decrypting side stays in `WaitIv` until the peer's IV is bound with
//! [`CipherSession::init_decrypt`].

use aes::Aes128;
use bytes::Bytes;
use cfb_mode::{
    cipher::KeyIvInit,
    BufDecryptor,
    BufEncryptor,
};
use rand::RngCore;

use super::{bytes_to_key, CipherError, CipherKind};

enum EncryptCipher {
    Aes128Cfb(BufEncryptor<Aes128>),
}

enum DecryptCipher {
    Aes128Cfb(BufDecryptor<Aes128>),
}

/// Encrypting half of a session
pub struct Encryptor {
    kind: CipherKind,
    cipher: EncryptCipher,
    iv: Bytes,
}

impl Encryptor {
    /// Create an encryptor with a caller supplied IV
    pub fn new(kind: CipherKind, key: &[u8], iv: &[u8]) -> Encryptor {
        assert_eq!(key.len(), kind.key_len(), "{} key length mismatch", kind);
        assert_eq!(iv.len(), kind.iv_len(), "{} IV length mismatch", kind);

        let cipher = match kind {
            CipherKind::Aes128Cfb => match BufEncryptor::<Aes128>::new_from_slices(key, iv) {
                Ok(c) => EncryptCipher::Aes128Cfb(c),
                Err(..) => unreachable!("key and IV lengths are checked"),
            },
        };

        Encryptor {
            kind,
            cipher,
            iv: Bytes::copy_from_slice(iv),
        }
    }

    /// Create an encryptor with a fresh random IV
    pub fn with_random_iv(kind: CipherKind, key: &[u8]) -> Encryptor {
        let mut iv = vec![0u8; kind.iv_len()];
        rand::thread_rng().fill_bytes(&mut iv);
        Encryptor::new(kind, key, &iv)
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// The IV to be sent to the peer
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Encrypt `data` in place, advancing the keystream
    pub fn encrypt_in_place(&mut self, data: &mut [u8]) {
        match self.cipher {
            EncryptCipher::Aes128Cfb(ref mut c) => c.encrypt(data),
        }
    }
}

enum DecryptState {
    WaitIv { key: Bytes },
    Ready { cipher: DecryptCipher, iv: Bytes },
}

/// Decrypting half of a session
pub struct Decryptor {
    kind: CipherKind,
    state: DecryptState,
}

impl Decryptor {
    /// Create a decryptor waiting for the peer's IV
    pub fn new(kind: CipherKind, key: &[u8]) -> Decryptor {
        assert_eq!(key.len(), kind.key_len(), "{} key length mismatch", kind);

        Decryptor {
            kind,
            state: DecryptState::WaitIv {
                key: Bytes::copy_from_slice(key),
            },
        }
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Bind the peer's IV. Panics if an IV has already been bound.
    pub fn init(&mut self, iv: &[u8]) {
        let key = match self.state {
            DecryptState::WaitIv { ref key } => key,
            DecryptState::Ready { .. } => panic!("{} decrypt IV has already been initialized", self.kind),
        };

        assert_eq!(iv.len(), self.kind.iv_len(), "{} IV length mismatch", self.kind);

        let cipher = match self.kind {
            CipherKind::Aes128Cfb => match BufDecryptor::<Aes128>::new_from_slices(key, iv) {
                Ok(c) => DecryptCipher::Aes128Cfb(c),
                Err(..) => unreachable!("key and IV lengths are checked"),
            },
        };

        self.state = DecryptState::Ready {
            cipher,
            iv: Bytes::copy_from_slice(iv),
        };
    }

    /// Whether the peer's IV has been bound
    pub fn is_ready(&self) -> bool {
        matches!(self.state, DecryptState::Ready { .. })
    }

    /// The IV received from the peer
    pub fn iv(&self) -> Option<&[u8]> {
        match self.state {
            DecryptState::WaitIv { .. } => None,
            DecryptState::Ready { ref iv, .. } => Some(iv),
        }
    }

    /// Decrypt `data` in place. Panics if the peer's IV hasn't been bound.
    pub fn decrypt_in_place(&mut self, data: &mut [u8]) {
        match self.state {
            DecryptState::WaitIv { .. } => panic!("{} decrypt before IV is initialized", self.kind),
            DecryptState::Ready {
                cipher: DecryptCipher::Aes128Cfb(ref mut c),
                ..
            } => c.decrypt(data),
        }
    }
}

/// A pair of keystreams sharing one key
pub struct CipherSession {
    enc: Encryptor,
    dec: Decryptor,
}

impl CipherSession {
    /// Create a session from a method name and a password
    pub fn derive(method: &str, password: &str) -> Result<CipherSession, CipherError> {
        let kind = method.parse::<CipherKind>()?;

        let mut key = vec![0u8; kind.key_len()];
        bytes_to_key(password.as_bytes(), &mut key);

        Ok(CipherSession::new(kind, &key))
    }

    /// Create a session from a derived key, with a random encrypt IV
    pub fn new(kind: CipherKind, key: &[u8]) -> CipherSession {
        CipherSession {
            enc: Encryptor::with_random_iv(kind, key),
            dec: Decryptor::new(kind, key),
        }
    }

    pub fn kind(&self) -> CipherKind {
        self.enc.kind()
    }

    /// IV to send to the peer exactly once, before any encrypted payload
    pub fn encrypt_iv(&self) -> &[u8] {
        self.enc.iv()
    }

    /// Bind the peer's IV to the decrypting side. Panics if called twice.
    pub fn init_decrypt(&mut self, iv: &[u8]) {
        self.dec.init(iv)
    }

    /// Encrypt `src` into `dst`, both must have the same length
    pub fn encrypt(&mut self, dst: &mut [u8], src: &[u8]) {
        assert_eq!(dst.len(), src.len());
        dst.copy_from_slice(src);
        self.enc.encrypt_in_place(dst);
    }

    /// Decrypt `src` into `dst`, both must have the same length. Panics before `init_decrypt`.
    pub fn decrypt(&mut self, dst: &mut [u8], src: &[u8]) {
        assert_eq!(dst.len(), src.len());
        assert!(self.dec.is_ready(), "{} decrypt before IV is initialized", self.kind());
        dst.copy_from_slice(src);
        self.dec.decrypt_in_place(dst);
    }

    pub fn encrypt_in_place(&mut self, data: &mut [u8]) {
        self.enc.encrypt_in_place(data)
    }

    pub fn decrypt_in_place(&mut self, data: &mut [u8]) {
        self.dec.decrypt_in_place(data)
    }

    /// Split into independently owned halves
    pub fn into_split(self) -> (Encryptor, Decryptor) {
        (self.enc, self.dec)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn session_pair() -> (CipherSession, CipherSession) {
        let mut local = CipherSession::derive("aes-128-cfb", "foobar").unwrap();
        let mut remote = CipherSession::derive("aes-128-cfb", "foobar").unwrap();

        let local_iv = local.encrypt_iv().to_owned();
        let remote_iv = remote.encrypt_iv().to_owned();
        local.init_decrypt(&remote_iv);
        remote.init_decrypt(&local_iv);

        (local, remote)
    }

    #[test]
    fn derive_unsupported_method() {
        match CipherSession::derive("chacha20", "foobar") {
            Err(CipherError::UnsupportedCipherMethod(m)) => assert_eq!(m, "chacha20"),
            Ok(..) => panic!("chacha20 should not be supported"),
        }
    }

    #[test]
    fn random_encrypt_iv() {
        let s1 = CipherSession::derive("aes-128-cfb", "foobar").unwrap();
        let s2 = CipherSession::derive("aes-128-cfb", "foobar").unwrap();
        assert_eq!(s1.encrypt_iv().len(), 16);
        assert_ne!(s1.encrypt_iv(), s2.encrypt_iv());
    }

    #[test]
    fn encrypt_decrypt() {
        let (mut local, mut remote) = session_pair();

        for len in [0usize, 1, 15, 16, 17, 1000] {
            let plain: Vec<u8> = (0..len).map(|i| i as u8).collect();

            let mut cipher = vec![0u8; len];
            local.encrypt(&mut cipher, &plain);
            if len > 0 {
                assert_ne!(cipher, plain);
            }

            let mut decrypted = vec![0u8; len];
            remote.decrypt(&mut decrypted, &cipher);
            assert_eq!(decrypted, plain);
        }
    }

    #[test]
    fn keystream_continues_across_calls() {
        let (mut local, mut remote) = session_pair();

        let message = b"HELLO WORLD, this message is split into pieces";
        let mut data = message.to_vec();
        local.encrypt_in_place(&mut data);

        let (first, second) = data.split_at_mut(7);
        remote.decrypt_in_place(first);
        remote.decrypt_in_place(second);
        assert_eq!(&data[..], &message[..]);
    }

    #[test]
    #[should_panic]
    fn decrypt_before_init() {
        let mut session = CipherSession::derive("aes-128-cfb", "foobar").unwrap();
        let mut dst = [0u8; 4];
        session.decrypt(&mut dst, b"abcd");
    }

    #[test]
    #[should_panic]
    fn init_decrypt_twice() {
        let mut session = CipherSession::derive("aes-128-cfb", "foobar").unwrap();
        let iv = [0u8; 16];
        session.init_decrypt(&iv);
        session.init_decrypt(&iv);
    }

    #[test]
    fn split_halves() {
        let (local, remote) = session_pair();
        let (mut enc, _) = local.into_split();
        let (_, mut dec) = remote.into_split();

        assert!(dec.is_ready());
        assert_eq!(dec.iv(), Some(enc.iv()));

        let mut data = b"split".to_vec();
        enc.encrypt_in_place(&mut data);
        dec.decrypt_in_place(&mut data);
        assert_eq!(&data[..], b"split");
    }
}
