//! Decoding of the platform's encrypted app context.
//!
//! Wire layout after base64url (no padding) decoding:
//!
//! ```text
//! [iv_len: u8][iv][aad_len: u16 LE][aad][ct_len: u32 LE][ciphertext][tag]
//! ```
//!
//! The key is SHA-256 of the shared app secret and the cipher is AES-256-GCM.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::crypto::aes::{generate_nonce, NONCE_SIZE};
use crate::error::{AppError, Result};
use crate::models::context::AuthenticatedContext;

const TAG_SIZE: usize = 16;

/// The framed pieces of a decoded context token.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub iv: &'a [u8],
    pub aad: &'a [u8],
    pub ciphertext: &'a [u8],
    pub tag: &'a [u8],
}

fn take<'a>(buffer: &mut &'a [u8], len: usize, part: &str) -> Result<&'a [u8]> {
    if buffer.len() < len {
        return Err(AppError::Decode(format!("could not extract {}", part)));
    }
    let (head, rest) = buffer.split_at(len);
    *buffer = rest;
    Ok(head)
}

/// Splits a decoded buffer into its length-prefixed parts.
pub fn parse_frame(bytes: &[u8]) -> Result<Frame<'_>> {
    if bytes.len() < 2 {
        return Err(AppError::Decode("could not extract iv".into()));
    }

    let mut buffer = bytes;
    let iv_len = take(&mut buffer, 1, "iv length")?[0] as usize;
    if buffer.len() <= iv_len {
        return Err(AppError::Decode("could not extract iv".into()));
    }
    let iv = take(&mut buffer, iv_len, "iv")?;

    let aad_len = take(&mut buffer, 2, "aad length")?;
    let aad_len = u16::from_le_bytes([aad_len[0], aad_len[1]]) as usize;
    let aad = take(&mut buffer, aad_len, "aad")?;

    let ct_len = take(&mut buffer, 4, "cipher text length")?;
    let ct_len = u32::from_le_bytes([ct_len[0], ct_len[1], ct_len[2], ct_len[3]]) as usize;
    let ciphertext = take(&mut buffer, ct_len, "cipher text")?;

    Ok(Frame {
        iv,
        aad,
        ciphertext,
        tag: buffer,
    })
}

/// Verifies and decrypts context tokens issued with one shared secret.
#[derive(Clone)]
pub struct ContextDecoder {
    key: Zeroizing<[u8; 32]>,
}

impl ContextDecoder {
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&digest);
        Self { key }
    }

    fn cipher(&self) -> Aes256Gcm {
        let key: &[u8; 32] = &self.key;
        Aes256Gcm::new(key.into())
    }

    /// Decodes and authenticates `token`. Expiry is left to the caller.
    pub fn decode(&self, token: &str) -> Result<AuthenticatedContext> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| AppError::Decode(format!("invalid base64: {}", e)))?;

        let frame = parse_frame(&bytes)?;
        if frame.iv.len() != NONCE_SIZE {
            return Err(AppError::Decode(format!(
                "unsupported iv length {}",
                frame.iv.len()
            )));
        }
        if frame.tag.len() != TAG_SIZE {
            return Err(AppError::Decode("could not extract tag".into()));
        }

        let mut sealed = Vec::with_capacity(frame.ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(frame.ciphertext);
        sealed.extend_from_slice(frame.tag);

        let cipher = self.cipher();
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(frame.iv),
                    Payload {
                        msg: &sealed,
                        aad: frame.aad,
                    },
                )
                .map_err(|_| AppError::Decode("authentication failed".into()))?,
        );

        sonic_rs::from_slice(&plaintext)
            .map_err(|e| AppError::Decode(format!("invalid claims: {}", e)))
    }

    /// Produces a token in the same framing, with an empty AAD.
    ///
    /// Used by local tooling and test harnesses that stand in for the platform.
    pub fn encode(&self, context: &AuthenticatedContext) -> Result<String> {
        let plaintext = Zeroizing::new(
            sonic_rs::to_vec(context).map_err(|e| AppError::Internal(e.to_string()))?,
        );

        let iv = generate_nonce();
        let cipher = self.cipher();
        let sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
            .map_err(|e| AppError::Encryption(format!("Encryption failed: {}", e)))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        let mut out = Vec::with_capacity(1 + NONCE_SIZE + 2 + 4 + sealed.len());
        out.push(NONCE_SIZE as u8);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
        out.extend_from_slice(ciphertext);
        out.extend_from_slice(tag);

        Ok(URL_SAFE_NO_PAD.encode(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "bllTHHZB1GHnBt5tevD76YyYphHBI4kK";
    const TOKEN: &str = "DO6MJD0Iw0TZVTR2LgAA5QAAAG2Pz7Ok-BIokLdFx3rE6rFN4U9HiZoM5gBuF5rIqiDQGtyy985lf4wOdy8aPrKUscsjJOqOT-_X6ekGMOy3r2CTe0pFYZ9zXoN30yAfQXr1UrbzgjNJYrY-HTW1FzW3TOiI5GbUr-4zhakph1tGV8Bdpo0jfYtzIjKsB6ko2I8vHUwy0Guz04golMTOnQnSLcF-jhrZPrr1rNHMSsJbhXH-5cMw3ui_RNYRHX7O6SU1_lApDWB2fgKBv53xg_jOHNwrX-JB3ad2u1zXTcTvc_yYO2fC-trHhadxMRD-VuLzxJxSnodQEl0TsqF4nfHDjLunHkO6";

    fn raw() -> Vec<u8> {
        URL_SAFE_NO_PAD.decode(TOKEN).unwrap()
    }

    #[test]
    fn decodes_known_vector() {
        let ctx = ContextDecoder::new(SECRET).decode(TOKEN).unwrap();

        assert_eq!(ctx.context_type, "panel");
        assert_eq!(ctx.user_id, "c930rdcVRqCwd_L4hOukHw");
        assert_eq!(ctx.audience, "s6ZgfwPZTVS3rQQQMrEBIw");
        assert_eq!(ctx.issuer, "marketplace.zoom.us");
        assert_eq!(ctx.issued_at, 1663752581969);
        assert_eq!(ctx.expires_at, 1663752701969);
        assert_eq!(ctx.meeting(), None);
    }

    #[test]
    fn known_vector_frame_layout() {
        let bytes = raw();
        let frame = parse_frame(&bytes).unwrap();
        assert_eq!(hex::encode(frame.iv), "ee8c243d08c344d95534762e");
        assert!(frame.aad.is_empty());
        assert_eq!(frame.ciphertext.len(), 229);
        assert_eq!(frame.tag.len(), TAG_SIZE);
    }

    #[test]
    fn known_vector_is_expired_now() {
        let ctx = ContextDecoder::new(SECRET).decode(TOKEN).unwrap();
        assert!(!ctx.is_fresh_at(crate::clock::now_ms(), std::time::Duration::from_secs(30)));
    }

    #[test]
    fn truncated_tokens_fail_closed() {
        let bytes = raw();
        let decoder = ContextDecoder::new(SECRET);
        for len in [0, 1, 2, 12, 13, 14, 17, 100, bytes.len() - 16, bytes.len() - 1] {
            let token = URL_SAFE_NO_PAD.encode(&bytes[..len]);
            assert!(
                matches!(decoder.decode(&token), Err(AppError::Decode(_))),
                "length {} should not decode",
                len
            );
        }
    }

    #[test]
    fn bit_flips_fail_authentication() {
        let decoder = ContextDecoder::new(SECRET);
        let bytes = raw();
        // iv, ciphertext and tag positions
        for index in [3, 40, bytes.len() - 1] {
            let mut tampered = bytes.clone();
            tampered[index] ^= 0x01;
            let token = URL_SAFE_NO_PAD.encode(&tampered);
            assert!(matches!(decoder.decode(&token), Err(AppError::Decode(_))));
        }
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let decoder = ContextDecoder::new("another-secret");
        assert!(matches!(decoder.decode(TOKEN), Err(AppError::Decode(_))));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut bytes = raw();
        // ciphertext length claims more than the buffer holds
        bytes[15..19].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(parse_frame(&bytes).is_err());
    }

    #[test]
    fn encode_produces_decodable_token() {
        let decoder = ContextDecoder::new(SECRET);
        let ctx = AuthenticatedContext {
            context_type: "meeting".into(),
            user_id: "user-1".into(),
            meeting_id: Some("85412345678".into()),
            issuer: "marketplace.zoom.us".into(),
            audience: "app".into(),
            issued_at: 1,
            expires_at: 2,
        };
        let token = decoder.encode(&ctx).unwrap();
        assert_eq!(decoder.decode(&token).unwrap(), ctx);
    }
}
