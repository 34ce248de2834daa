//! `marasi.crypto` (spec.md §4.8) — hashing, HMAC, AES, RSA and Ed25519, all
//! hex-encoded at the bridge boundary.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

type Aes256Cbc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

fn from_hex(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap_or_default()
}

pub fn md5(data: &str) -> String {
    to_hex(&Md5::digest(data.as_bytes()))
}

pub fn sha1(data: &str) -> String {
    to_hex(&Sha1::digest(data.as_bytes()))
}

pub fn sha256(data: &str) -> String {
    to_hex(&Sha256::digest(data.as_bytes()))
}

pub fn hmac_sha256(key: &str, data: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(data.as_bytes());
    to_hex(&mac.finalize().into_bytes())
}

pub mod aes_utils {
    use super::*;

    /// Generates a random key of `bits` bits (128, 192 or 256), hex-encoded.
    pub fn generate_key(bits: i64) -> String {
        let len = (bits / 8) as usize;
        let mut key = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut key);
        to_hex(&key)
    }

    pub fn generate_iv(len_bytes: i64) -> String {
        let mut iv = vec![0u8; len_bytes as usize];
        rand::thread_rng().fill_bytes(&mut iv);
        to_hex(&iv)
    }

    pub mod gcm {
        use super::*;

        pub fn encrypt(key_hex: &str, iv_hex: &str, plaintext: &str) -> String {
            let key = from_hex(key_hex);
            let iv = from_hex(iv_hex);
            let nonce = Nonce::from_slice(&iv);
            let ciphertext = if key.len() == 32 {
                let cipher = Aes256Gcm::new_from_slice(&key).expect("valid key length");
                cipher.encrypt(
                    nonce,
                    Payload {
                        msg: plaintext.as_bytes(),
                        aad: &[],
                    },
                )
            } else {
                let cipher = Aes128Gcm::new_from_slice(&key).expect("valid key length");
                cipher.encrypt(
                    nonce,
                    Payload {
                        msg: plaintext.as_bytes(),
                        aad: &[],
                    },
                )
            }
            .unwrap_or_default();
            to_hex(&ciphertext)
        }

        pub fn decrypt(key_hex: &str, iv_hex: &str, ciphertext_hex: &str) -> String {
            let key = from_hex(key_hex);
            let iv = from_hex(iv_hex);
            let ciphertext = from_hex(ciphertext_hex);
            let nonce = Nonce::from_slice(&iv);
            let plaintext = if key.len() == 32 {
                let cipher = Aes256Gcm::new_from_slice(&key).expect("valid key length");
                cipher.decrypt(nonce, ciphertext.as_slice())
            } else {
                let cipher = Aes128Gcm::new_from_slice(&key).expect("valid key length");
                cipher.decrypt(nonce, ciphertext.as_slice())
            }
            .unwrap_or_default();
            String::from_utf8_lossy(&plaintext).into_owned()
        }
    }

    pub mod cbc_mode {
        use super::*;

        pub fn encrypt(key_hex: &str, iv_hex: &str, plaintext: &str) -> String {
            let key = from_hex(key_hex);
            let iv = from_hex(iv_hex);
            let cipher = Aes256Cbc::new_from_slices(&key, &iv).expect("valid key/iv length");
            let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
            to_hex(&ciphertext)
        }

        pub fn decrypt(key_hex: &str, iv_hex: &str, ciphertext_hex: &str) -> String {
            let key = from_hex(key_hex);
            let iv = from_hex(iv_hex);
            let ciphertext = from_hex(ciphertext_hex);
            let cipher = Aes256CbcDec::new_from_slices(&key, &iv).expect("valid key/iv length");
            cipher
                .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        }
    }
}

pub mod rsa_utils {
    use super::*;

    /// Returns `(public_pem, private_pem)` for the requested key size.
    pub fn generate_pair(bits: i64) -> (String, String) {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, bits as usize).expect("rsa keygen");
        let public = RsaPublicKey::from(&private);
        let public_pem = public
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap_or_default();
        let private_pem = private
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map(|s| s.to_string())
            .unwrap_or_default();
        (public_pem, private_pem)
    }

    pub fn encrypt(public_pem: &str, plaintext: &str) -> String {
        let Ok(public) = RsaPublicKey::from_public_key_pem(public_pem) else {
            return String::new();
        };
        let mut rng = rand::thread_rng();
        let ciphertext = public
            .encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext.as_bytes())
            .unwrap_or_default();
        to_hex(&ciphertext)
    }

    pub fn decrypt(private_pem: &str, ciphertext_hex: &str) -> String {
        let Ok(private) = RsaPrivateKey::from_pkcs8_pem(private_pem) else {
            return String::new();
        };
        let ciphertext = from_hex(ciphertext_hex);
        let plaintext = private
            .decrypt(Oaep::new::<Sha256>(), &ciphertext)
            .unwrap_or_default();
        String::from_utf8_lossy(&plaintext).into_owned()
    }
}

pub mod ed25519_utils {
    use super::*;

    /// Returns `(public_key_hex, secret_key_hex)`.
    pub fn generate_pair() -> (String, String) {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        let verifying_key = signing_key.verifying_key();
        (
            to_hex(verifying_key.as_bytes()),
            to_hex(&signing_key.to_bytes()),
        )
    }

    pub fn sign(secret_key_hex: &str, message: &str) -> String {
        let bytes = from_hex(secret_key_hex);
        let Ok(key_bytes): Result<[u8; 32], _> = bytes.try_into() else {
            return String::new();
        };
        let signing_key = SigningKey::from_bytes(&key_bytes);
        to_hex(&signing_key.sign(message.as_bytes()).to_bytes())
    }

    pub fn verify(public_key_hex: &str, message: &str, signature_hex: &str) -> bool {
        let Ok(key_bytes): Result<[u8; 32], _> = from_hex(public_key_hex).try_into() else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let sig_bytes = from_hex(signature_hex);
        let Ok(sig_array): Result<[u8; 64], _> = sig_bytes.try_into() else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(&sig_array);
        verifying_key.verify(message.as_bytes(), &signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hmac_sha256_is_deterministic() {
        let a = hmac_sha256("key", "message");
        let b = hmac_sha256("key", "message");
        assert_eq!(a, b);
    }

    #[test]
    fn aes_gcm_round_trips() {
        let key = aes_utils::generate_key(256);
        let iv = aes_utils::generate_iv(12);
        let ciphertext = aes_utils::gcm::encrypt(&key, &iv, "top secret");
        assert_eq!(aes_utils::gcm::decrypt(&key, &iv, &ciphertext), "top secret");
    }

    #[test]
    fn aes_cbc_round_trips() {
        let key = aes_utils::generate_key(256);
        let iv = aes_utils::generate_iv(16);
        let ciphertext = aes_utils::cbc_mode::encrypt(&key, &iv, "top secret");
        assert_eq!(aes_utils::cbc_mode::decrypt(&key, &iv, &ciphertext), "top secret");
    }

    #[test]
    fn ed25519_sign_and_verify_round_trips() {
        let (public, secret) = ed25519_utils::generate_pair();
        let signature = ed25519_utils::sign(&secret, "hello");
        assert!(ed25519_utils::verify(&public, "hello", &signature));
        assert!(!ed25519_utils::verify(&public, "tampered", &signature));
    }

    #[test]
    fn rsa_oaep_round_trips() {
        let (public, private) = rsa_utils::generate_pair(2048);
        let ciphertext = rsa_utils::encrypt(&public, "secret payload");
        assert_eq!(rsa_utils::decrypt(&private, &ciphertext), "secret payload");
    }
}
