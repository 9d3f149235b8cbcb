use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use aes_gcm::aead::rand_core::RngCore;
use base64::{engine::general_purpose::STANDARD, Engine};
use zeroize::{Zeroize, ZeroizeOnDrop};
use crate::error::{AppError, Result};

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// A secure key wrapper that ensures the key is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureKey([u8; KEY_SIZE]);

impl SecureKey {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Builds a key from a slice, rejecting anything but 32 bytes.
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] = key.try_into().map_err(|_| {
            AppError::Encryption(format!("Key must be {} bytes, got {}", KEY_SIZE, key.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Generates a new random AES-GCM nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts a plaintext using AES-256-GCM.
///
/// # Returns
///
/// A tuple containing the ciphertext (tag appended) and the nonce used.
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_SIZE])> {
    let cipher = Aes256Gcm::new(key.into());

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| AppError::Encryption(format!("Encryption failed: {}", e)))?;

    Ok((ciphertext, nonce_bytes))
}

/// Decrypts a ciphertext using AES-256-GCM.
pub fn decrypt(key: &[u8; KEY_SIZE], ciphertext: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from(*nonce);

    cipher
        .decrypt(&nonce, ciphertext)
        .map_err(|e| AppError::Encryption(format!("Decryption failed: {}", e)))
}

/// Seals short secrets as `base64(nonce || ciphertext)` strings.
#[derive(Clone)]
pub struct Encryptor {
    key: SecureKey,
}

impl Encryptor {
    pub fn new(key: SecureKey) -> Self {
        Self { key }
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    pub fn encrypt_to_string(&self, plaintext: &str) -> Result<String> {
        let (ciphertext, nonce) = encrypt(self.key.as_bytes(), plaintext.as_bytes())?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(sealed))
    }

    /// Reverses [`Encryptor::encrypt_to_string`].
    pub fn decrypt_from_string(&self, sealed: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(sealed)
            .map_err(|e| AppError::Encryption(format!("Invalid sealed value: {}", e)))?;

        if bytes.len() <= NONCE_SIZE {
            return Err(AppError::Encryption("Sealed value too short".into()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let nonce: [u8; NONCE_SIZE] = nonce
            .try_into()
            .map_err(|_| AppError::Encryption("Invalid nonce".into()))?;

        let mut plaintext = decrypt(self.key.as_bytes(), ciphertext, &nonce)?;
        let text = String::from_utf8(plaintext.clone())
            .map_err(|_| AppError::Encryption("Decrypted value is not UTF-8".into()));
        plaintext.zeroize();
        text
    }
}
