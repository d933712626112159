//! Crypto envelope for the vendor signaling protocol.
//!
//! AES-256-ECB with PKCS#7 padding and chunked RSA PKCS#1 v1.5 are what the
//! device firmware speaks; they are implemented here for wire compatibility,
//! not as a recommendation.

use aes::Aes256;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use uuid::Uuid;

use crate::error::{DriverError, Result};

type Aes256EcbEnc = ecb::Encryptor<Aes256>;
type Aes256EcbDec = ecb::Decryptor<Aes256>;

// RSA/ECB/PKCS1Padding caps each chunk at modulus size minus 11 bytes.
const RSA_PKCS1_OVERHEAD: usize = 11;

/// Encrypt UTF-8 text with a 32-byte key, returning base64 cipher text.
pub fn aes_encrypt(plain: &str, key: &str) -> Result<String> {
    let cipher = Aes256EcbEnc::new_from_slice(key.as_bytes())
        .map_err(|_| DriverError::Config("AES key must be 32 bytes".to_string()))?;
    let encrypted = cipher.encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());
    Ok(BASE64.encode(encrypted))
}

/// Inverse of [`aes_encrypt`]; fails when the padding is not intact.
pub fn aes_decrypt(encoded: &str, key: &str) -> Result<String> {
    let data = BASE64
        .decode(encoded)
        .map_err(|_| DriverError::MalformedCipherText)?;
    let cipher = Aes256EcbDec::new_from_slice(key.as_bytes())
        .map_err(|_| DriverError::Config("AES key must be 32 bytes".to_string()))?;
    let plain = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&data)
        .map_err(|_| DriverError::MalformedCipherText)?;
    String::from_utf8(plain).map_err(|_| DriverError::MalformedCipherText)
}

/// Fresh 32-hex-character AES key (16 random bytes, hexified).
pub fn generate_aes_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Load an RSA public key from the base64 DER blob the servers hand out.
pub fn rsa_load_public_key(encoded: &str) -> Result<RsaPublicKey> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let der = BASE64
        .decode(compact)
        .map_err(|e| DriverError::Crypto(format!("public key is not base64: {e}")))?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| DriverError::Crypto(format!("public key rejected: {e}")))
}

/// Encrypt UTF-8 text under the peer's public key.
///
/// The input is split into chunks of (modulus bytes - 11) and each chunk is
/// encrypted separately; the concatenated blocks are base64 encoded.
pub fn rsa_encrypt(plain: &str, key: &RsaPublicKey) -> Result<String> {
    let mut rng = rand::thread_rng();
    let max_chunk = key.size() - RSA_PKCS1_OVERHEAD;
    let mut encrypted = Vec::new();
    for chunk in plain.as_bytes().chunks(max_chunk) {
        let block = key
            .encrypt(&mut rng, Pkcs1v15Encrypt, chunk)
            .map_err(|e| DriverError::Crypto(format!("rsa encrypt: {e}")))?;
        encrypted.extend_from_slice(&block);
    }
    Ok(BASE64.encode(encrypted))
}

/// 32-character lowercase hex MD5 digest.
pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// [`md5_hex`] over raw bytes.
pub fn md5_hex_bytes(input: &[u8]) -> String {
    hex::encode(Md5::digest(input))
}

/// Raw MD5 digest of a string.
pub fn md5_raw(input: &str) -> [u8; 16] {
    Md5::digest(input.as_bytes()).into()
}

/// Re-encode a hex string as base64 of the underlying bytes.
pub fn hex_to_base64(hex_str: &str) -> Result<String> {
    let bytes =
        hex::decode(hex_str).map_err(|e| DriverError::Crypto(format!("invalid hex: {e}")))?;
    Ok(BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "26a663562a6f4dfbbbbf2b50c1a278cb";

    #[test]
    fn aes_roundtrip() {
        for msg in ["", "Hello, world!", "a", &"x".repeat(4096)] {
            let cipher = aes_encrypt(msg, KEY).unwrap();
            assert_eq!(aes_decrypt(&cipher, KEY).unwrap(), msg);
        }
    }

    #[test]
    fn aes_cipher_text_is_block_aligned() {
        for msg in ["", "15 bytes msg...", "exactly 16 chars", "17 chars message!"] {
            let cipher = aes_encrypt(msg, KEY).unwrap();
            let raw = BASE64.decode(cipher).unwrap();
            assert_eq!(raw.len() % 16, 0);
            // PKCS#7 always pads, so an aligned input grows by one block
            assert!(raw.len() > msg.len());
        }
    }

    #[test]
    fn aes_rejects_bad_key_length() {
        assert!(matches!(
            aes_encrypt("msg", "short key"),
            Err(DriverError::Config(_))
        ));
    }

    #[test]
    fn aes_decrypt_rejects_garbage() {
        assert!(matches!(
            aes_decrypt("not base64 !!!", KEY),
            Err(DriverError::MalformedCipherText)
        ));
        // Valid base64, but not a ciphertext with intact padding
        let bogus = BASE64.encode([0u8; 32]);
        assert!(matches!(
            aes_decrypt(&bogus, KEY),
            Err(DriverError::MalformedCipherText)
        ));
    }

    #[test]
    fn generated_keys_are_32_hex_chars() {
        let key = generate_aes_key();
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_aes_key());
    }

    #[test]
    fn md5_known_vectors() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            md5_hex("UnitreeGo2_abcdef"),
            "5fa285e1bebe0a6623e33afc04a1fbd8"
        );
        assert_eq!(
            md5_raw("UnitreeGo2_abcdef").to_vec(),
            hex::decode("5fa285e1bebe0a6623e33afc04a1fbd8").unwrap()
        );
    }

    #[test]
    fn hex_to_base64_reencodes_bytes() {
        assert_eq!(
            hex_to_base64("5fa285e1bebe0a6623e33afc04a1fbd8").unwrap(),
            "X6KF4b6+CmYj4zr8BKH72A=="
        );
        assert!(hex_to_base64("zz").is_err());
    }

    #[test]
    fn rsa_chunked_encrypt_length() {
        use rsa::RsaPrivateKey;
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);

        // Two chunks: 1024-bit modulus fits 117 bytes per chunk
        let plain = "p".repeat(150);
        let cipher = rsa_encrypt(&plain, &public).unwrap();
        let raw = BASE64.decode(cipher).unwrap();
        assert_eq!(raw.len(), 2 * public.size());

        // And each chunk decrypts back
        let first = private.decrypt(Pkcs1v15Encrypt, &raw[..public.size()]).unwrap();
        let second = private.decrypt(Pkcs1v15Encrypt, &raw[public.size()..]).unwrap();
        assert_eq!([first, second].concat(), plain.as_bytes());
    }

    #[test]
    fn rsa_public_key_from_base64_der() {
        use rsa::RsaPrivateKey;
        use rsa::pkcs8::EncodePublicKey;
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);

        let der = public.to_public_key_der().unwrap();
        // Servers send the DER as base64, sometimes with embedded newlines
        let mut encoded = BASE64.encode(der.as_bytes());
        encoded.insert(20, '\n');
        let loaded = rsa_load_public_key(&encoded).unwrap();
        assert_eq!(loaded, public);
    }
}
