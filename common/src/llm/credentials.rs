use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::AppError;

// Cloud API keys are sealed at rest with a keystream derived from the
// process-wide encryption key and a per-row random nonce:
//   block_i = SHA-256(encryption_key || nonce || i)
// The plaintext only exists in memory while a request is in flight.

const NONCE_LEN: usize = 16;

fn keystream_block(encryption_key: &str, nonce: &[u8], counter: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(encryption_key.as_bytes());
    hasher.update(nonce);
    hasher.update(counter.to_le_bytes());
    hasher.finalize().into()
}

fn apply_keystream(encryption_key: &str, nonce: &[u8], data: &mut [u8]) {
    for (index, chunk) in data.chunks_mut(32).enumerate() {
        let block = keystream_block(encryption_key, nonce, index as u64);
        for (byte, key_byte) in chunk.iter_mut().zip(block.iter()) {
            *byte ^= key_byte;
        }
    }
}

/// Seal a plaintext credential. Returns `(sealed_b64, nonce_b64)`.
pub fn seal(plaintext: &str, encryption_key: &str) -> Result<(String, String), AppError> {
    if encryption_key.is_empty() {
        return Err(AppError::Validation(
            "Credential encryption key is not configured".into(),
        ));
    }

    let mut nonce = [0_u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut data = plaintext.as_bytes().to_vec();
    apply_keystream(encryption_key, &nonce, &mut data);

    Ok((BASE64.encode(data), BASE64.encode(nonce)))
}

/// Recover the plaintext credential for one request.
pub fn unseal(sealed_b64: &str, nonce_b64: &str, encryption_key: &str) -> Result<String, AppError> {
    let mut data = BASE64
        .decode(sealed_b64)
        .map_err(|e| AppError::Validation(format!("Sealed credential is not valid base64: {e}")))?;
    let nonce = BASE64
        .decode(nonce_b64)
        .map_err(|e| AppError::Validation(format!("Credential nonce is not valid base64: {e}")))?;

    apply_keystream(encryption_key, &nonce, &mut data);

    String::from_utf8(data)
        .map_err(|_| AppError::Validation("Credential decryption produced invalid UTF-8".into()))
}
