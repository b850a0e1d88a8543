//! Password to key derivation

use md5::{Digest, Md5};

/// OpenSSL `EVP_BytesToKey` with MD5, one round and no salt
///
/// ```plain
/// D_0 = MD5(password)
/// D_i = MD5(D_(i-1) || password)
/// key = D_0 || D_1 || ... truncated to key.len()
/// ```
pub fn bytes_to_key(password: &[u8], key: &mut [u8]) {
    let mut prev: Option<[u8; 16]> = None;
    let mut offset = 0;

    while offset < key.len() {
        let mut m = Md5::new();
        if let Some(ref prev) = prev {
            m.update(prev);
        }
        m.update(password);

        let digest: [u8; 16] = m.finalize().into();

        let amt = (key.len() - offset).min(digest.len());
        key[offset..offset + amt].copy_from_slice(&digest[..amt]);
        offset += amt;

        prev = Some(digest);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const FOOBAR_KEY: [u8; 32] = [
        0x38, 0x58, 0xf6, 0x22, 0x30, 0xac, 0x3c, 0x91, 0x5f, 0x30, 0x0c, 0x66, 0x43, 0x12, 0xc6, 0x3f, 0x56, 0x83,
        0x78, 0x52, 0x96, 0x14, 0xd2, 0x2d, 0xdb, 0x49, 0x23, 0x7d, 0x2f, 0x60, 0xbf, 0xdf,
    ];

    #[test]
    fn evp_bytes_to_key() {
        let mut key = [0u8; 32];
        bytes_to_key(b"foobar", &mut key);
        assert_eq!(key, FOOBAR_KEY);
    }

    #[test]
    fn evp_bytes_to_key_truncated() {
        let mut key = [0u8; 16];
        bytes_to_key(b"foobar", &mut key);
        assert_eq!(key[..], FOOBAR_KEY[..16]);
    }

    #[test]
    fn evp_bytes_to_key_deterministic() {
        let mut k1 = [0u8; 16];
        let mut k2 = [0u8; 16];
        bytes_to_key(b"p$p", &mut k1);
        bytes_to_key(b"p$p", &mut k2);
        assert_eq!(k1, k2);

        let mut k3 = [0u8; 16];
        bytes_to_key(b"p$q", &mut k3);
        assert_ne!(k1, k3);
    }
}
