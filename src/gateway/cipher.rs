//! Symmetric cipher for the gateway's encrypted payload envelope.
//!
//! Two wire formats exist at the gateway. `legacy-cbc-hex` is the original
//! scheme: AES-128-CBC with a fixed iv from configuration, hex output.
//! `aead-cbc-b64` is the current scheme: AES-256-CBC with a random iv per
//! message, an HMAC-SHA256 tag over iv and ciphertext, base64 output.
//!
//! A deployment speaks exactly one of them, chosen by `GATEWAY_CIPHER_MODE`.
//! Key and iv lengths are validated when the cipher is built, so a
//! misconfigured service refuses to boot instead of failing per-request.

use aes::{Aes128, Aes256};
use base64::{engine::general_purpose, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::gateway::error::{GatewayError, GatewayResult};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const AES_BLOCK_SIZE: usize = 16;
const LEGACY_KEY_LEN: usize = 16;
const AEAD_KEY_LEN: usize = 32;
const TAG_LEN: usize = 32;

/// Which envelope format this deployment speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    /// AES-128-CBC, raw UTF-8 key, fixed iv from configuration, hex output.
    LegacyCbcHex,
    /// AES-256-CBC, base64 key, random iv, HMAC-SHA256 tag, base64 output.
    AeadCbcBase64,
}

impl CipherMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "legacy-cbc-hex" => Some(CipherMode::LegacyCbcHex),
            "aead-cbc-b64" => Some(CipherMode::AeadCbcBase64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CipherMode::LegacyCbcHex => "legacy-cbc-hex",
            CipherMode::AeadCbcBase64 => "aead-cbc-b64",
        }
    }
}

impl std::fmt::Display for CipherMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Encrypts and decrypts gateway payloads in the configured mode.
///
/// Decryption fails closed: any parse, padding or tag failure comes back as
/// `GatewayError::Decryption` and the caller must treat the payload as
/// untrusted.
pub struct PayloadCipher {
    mode: CipherMode,
    key: Vec<u8>,
    // fixed iv, legacy mode only
    iv: [u8; AES_BLOCK_SIZE],
}

impl PayloadCipher {
    /// Build a cipher for `mode`, validating key and iv lengths.
    ///
    /// Legacy keys and ivs are raw UTF-8 strings (the gateway portal hands
    /// them out as 16-character text). Modern keys are base64 and must decode
    /// to exactly 32 bytes; the mode derives its iv per message, so passing
    /// one is a configuration error.
    pub fn new(mode: CipherMode, key: &str, iv: Option<&str>) -> GatewayResult<Self> {
        match mode {
            CipherMode::LegacyCbcHex => {
                let key_bytes = key.as_bytes().to_vec();
                if key_bytes.len() != LEGACY_KEY_LEN {
                    return Err(GatewayError::crypto_config(format!(
                        "legacy-cbc-hex requires a {}-byte key, got {} bytes",
                        LEGACY_KEY_LEN,
                        key_bytes.len()
                    )));
                }
                let iv_str = iv.ok_or_else(|| {
                    GatewayError::crypto_config("legacy-cbc-hex requires GATEWAY_AUTH_IV")
                })?;
                let iv_bytes = iv_str.as_bytes();
                if iv_bytes.len() != AES_BLOCK_SIZE {
                    return Err(GatewayError::crypto_config(format!(
                        "legacy-cbc-hex requires a {}-byte iv, got {} bytes",
                        AES_BLOCK_SIZE,
                        iv_bytes.len()
                    )));
                }
                let mut fixed_iv = [0u8; AES_BLOCK_SIZE];
                fixed_iv.copy_from_slice(iv_bytes);
                Ok(PayloadCipher {
                    mode,
                    key: key_bytes,
                    iv: fixed_iv,
                })
            }
            CipherMode::AeadCbcBase64 => {
                let key_bytes = general_purpose::STANDARD.decode(key).map_err(|_| {
                    GatewayError::crypto_config("aead-cbc-b64 key is not valid base64")
                })?;
                if key_bytes.len() != AEAD_KEY_LEN {
                    return Err(GatewayError::crypto_config(format!(
                        "aead-cbc-b64 requires a {}-byte key, got {} bytes",
                        AEAD_KEY_LEN,
                        key_bytes.len()
                    )));
                }
                if iv.is_some_and(|v| !v.is_empty()) {
                    return Err(GatewayError::crypto_config(
                        "aead-cbc-b64 derives its iv per message; unset GATEWAY_AUTH_IV",
                    ));
                }
                Ok(PayloadCipher {
                    mode,
                    key: key_bytes,
                    iv: [0u8; AES_BLOCK_SIZE],
                })
            }
        }
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    pub fn encrypt(&self, plaintext: &str) -> GatewayResult<String> {
        match self.mode {
            CipherMode::LegacyCbcHex => {
                let ciphertext = self.cbc_encrypt(plaintext.as_bytes(), self.iv)?;
                Ok(hex::encode(ciphertext))
            }
            CipherMode::AeadCbcBase64 => {
                let mut iv = [0u8; AES_BLOCK_SIZE];
                rand::thread_rng().fill_bytes(&mut iv);
                let ciphertext = self.cbc_encrypt(plaintext.as_bytes(), iv)?;
                let tag = self.compute_tag(&iv, &ciphertext)?;
                let mut envelope = Vec::with_capacity(AES_BLOCK_SIZE + ciphertext.len() + TAG_LEN);
                envelope.extend_from_slice(&iv);
                envelope.extend_from_slice(&ciphertext);
                envelope.extend_from_slice(&tag);
                Ok(general_purpose::STANDARD.encode(envelope))
            }
        }
    }

    pub fn decrypt(&self, encoded: &str) -> GatewayResult<String> {
        let plaintext = match self.mode {
            CipherMode::LegacyCbcHex => {
                let ciphertext = hex::decode(encoded.trim())
                    .map_err(|_| GatewayError::decryption("payload is not valid hex"))?;
                if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
                    return Err(GatewayError::decryption(
                        "ciphertext length is not a whole number of blocks",
                    ));
                }
                self.cbc_decrypt(ciphertext, self.iv)?
            }
            CipherMode::AeadCbcBase64 => {
                // form decoding turns '+' into spaces; undo it before base64
                let cleaned = encoded.trim().replace(' ', "+");
                let envelope = general_purpose::STANDARD
                    .decode(cleaned)
                    .map_err(|_| GatewayError::decryption("payload is not valid base64"))?;
                if envelope.len() < AES_BLOCK_SIZE * 2 + TAG_LEN {
                    return Err(GatewayError::decryption("envelope too short"));
                }
                let (signed, tag) = envelope.split_at(envelope.len() - TAG_LEN);
                let (iv_bytes, ciphertext) = signed.split_at(AES_BLOCK_SIZE);
                let expected = self.compute_tag(iv_bytes, ciphertext)?;
                if !secure_eq(&expected, tag) {
                    return Err(GatewayError::decryption("authentication tag mismatch"));
                }
                if ciphertext.len() % AES_BLOCK_SIZE != 0 {
                    return Err(GatewayError::decryption(
                        "ciphertext length is not a whole number of blocks",
                    ));
                }
                let mut iv = [0u8; AES_BLOCK_SIZE];
                iv.copy_from_slice(iv_bytes);
                self.cbc_decrypt(ciphertext.to_vec(), iv)?
            }
        };
        String::from_utf8(plaintext)
            .map_err(|_| GatewayError::decryption("plaintext is not valid UTF-8"))
    }

    fn cbc_encrypt(&self, data: &[u8], iv: [u8; AES_BLOCK_SIZE]) -> GatewayResult<Vec<u8>> {
        let mut buffer = Vec::with_capacity(data.len() + AES_BLOCK_SIZE);
        buffer.extend_from_slice(data);
        buffer.resize(buffer.len() + AES_BLOCK_SIZE, 0);

        let encrypted_len = match self.mode {
            CipherMode::LegacyCbcHex => {
                let mut key = [0u8; LEGACY_KEY_LEN];
                key.copy_from_slice(&self.key);
                Aes128CbcEnc::new(&key.into(), &iv.into())
                    .encrypt_padded_mut::<Pkcs7>(&mut buffer, data.len())
                    .map_err(|_| GatewayError::crypto_config("encryption buffer exhausted"))?
                    .len()
            }
            CipherMode::AeadCbcBase64 => {
                let mut key = [0u8; AEAD_KEY_LEN];
                key.copy_from_slice(&self.key);
                Aes256CbcEnc::new(&key.into(), &iv.into())
                    .encrypt_padded_mut::<Pkcs7>(&mut buffer, data.len())
                    .map_err(|_| GatewayError::crypto_config("encryption buffer exhausted"))?
                    .len()
            }
        };
        buffer.truncate(encrypted_len);
        Ok(buffer)
    }

    fn cbc_decrypt(
        &self,
        mut ciphertext: Vec<u8>,
        iv: [u8; AES_BLOCK_SIZE],
    ) -> GatewayResult<Vec<u8>> {
        let plaintext = match self.mode {
            CipherMode::LegacyCbcHex => {
                let mut key = [0u8; LEGACY_KEY_LEN];
                key.copy_from_slice(&self.key);
                Aes128CbcDec::new(&key.into(), &iv.into())
                    .decrypt_padded_mut::<Pkcs7>(&mut ciphertext)
                    .map_err(|_| GatewayError::decryption("invalid block padding"))?
            }
            CipherMode::AeadCbcBase64 => {
                let mut key = [0u8; AEAD_KEY_LEN];
                key.copy_from_slice(&self.key);
                Aes256CbcDec::new(&key.into(), &iv.into())
                    .decrypt_padded_mut::<Pkcs7>(&mut ciphertext)
                    .map_err(|_| GatewayError::decryption("invalid block padding"))?
            }
        };
        Ok(plaintext.to_vec())
    }

    fn compute_tag(&self, iv: &[u8], ciphertext: &[u8]) -> GatewayResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|_| GatewayError::crypto_config("hmac key rejected"))?;
        mac.update(iv);
        mac.update(ciphertext);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Constant-time byte comparison for authentication tags.
fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
