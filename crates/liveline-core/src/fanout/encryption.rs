// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Web Push message encryption.
//!
//! RFC 8291 key agreement over the subscription's P-256 key and auth
//! secret, framed as a single RFC 8188 `aes128gcm` record:
//!
//! ```text
//! salt (16) | record size (4, BE) | key id length (1) | sender public key (65) | ciphertext
//! ```

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hkdf::Hkdf;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use sha2::Sha256;

use super::push::PushError;
use crate::model::PushKeys;

/// `Content-Encoding` value of an encrypted push body.
pub const CONTENT_ENCODING: &str = "aes128gcm";

/// Record size written into the header.
pub const RECORD_SIZE: u32 = 4096;

const SALT_LEN: usize = 16;
const PUBLIC_KEY_LEN: usize = 65;
const HEADER_LEN: usize = SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN;
const TAG_LEN: usize = 16;
const LAST_RECORD_DELIMITER: u8 = 0x02;

/// Largest plaintext that keeps the whole body within the 4096 bytes every
/// push service must accept.
pub const MAX_PLAINTEXT_LEN: usize = RECORD_SIZE as usize - HEADER_LEN - TAG_LEN - 1;

/// Encrypt `plaintext` for one subscription with a fresh sender key and salt.
pub fn encrypt(keys: &PushKeys, plaintext: &[u8]) -> Result<Vec<u8>, PushError> {
    let receiver = PublicKey::from_sec1_bytes(&decode_key(&keys.p256dh, "p256dh")?)
        .map_err(|_| PushError::Encryption("p256dh is not a P-256 public key".to_string()))?;
    let auth_secret = decode_key(&keys.auth, "auth")?;
    let sender = SecretKey::from_slice(&rand::random::<[u8; 32]>())
        .map_err(|_| PushError::Encryption("could not generate sender key".to_string()))?;

    encrypt_with(&receiver, &auth_secret, &sender, rand::random(), plaintext)
}

fn encrypt_with(
    receiver: &PublicKey,
    auth_secret: &[u8],
    sender: &SecretKey,
    salt: [u8; SALT_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, PushError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(PushError::Encryption(format!(
            "payload of {} bytes exceeds {MAX_PLAINTEXT_LEN}",
            plaintext.len()
        )));
    }

    let receiver_point = receiver.to_encoded_point(false);
    let sender_point = sender.public_key().to_encoded_point(false);
    let shared = p256::ecdh::diffie_hellman(sender.to_nonzero_scalar(), receiver.as_affine());

    let mut key_info = Vec::with_capacity(14 + 2 * PUBLIC_KEY_LEN);
    key_info.extend_from_slice(b"WebPush: info\0");
    key_info.extend_from_slice(receiver_point.as_bytes());
    key_info.extend_from_slice(sender_point.as_bytes());
    let ikm: [u8; 32] = hkdf_sha256(auth_secret, shared.raw_secret_bytes(), &key_info)?;

    let cek: [u8; 16] = hkdf_sha256(&salt, &ikm, b"Content-Encoding: aes128gcm\0")?;
    let nonce: [u8; 12] = hkdf_sha256(&salt, &ikm, b"Content-Encoding: nonce\0")?;

    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(LAST_RECORD_DELIMITER);

    let cipher = Aes128Gcm::new_from_slice(&cek)
        .map_err(|_| PushError::Encryption("invalid content encryption key".to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), record.as_slice())
        .map_err(|_| PushError::Encryption("AES-GCM encryption failed".to_string()))?;

    let mut body = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(PUBLIC_KEY_LEN as u8);
    body.extend_from_slice(sender_point.as_bytes());
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

fn hkdf_sha256<const N: usize>(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<[u8; N], PushError> {
    let mut okm = [0u8; N];
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, &mut okm)
        .map_err(|e| PushError::Encryption(e.to_string()))?;
    Ok(okm)
}

fn decode_key(value: &str, field: &str) -> Result<Vec<u8>, PushError> {
    URL_SAFE_NO_PAD
        .decode(value.trim().trim_end_matches('='))
        .map_err(|e| PushError::Encryption(format!("{field} is not base64url: {e}")))
}
