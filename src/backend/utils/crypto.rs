// src/backend/utils/crypto.rs

use crate::models::common::{Timestamp, UploadId, VaultId};
use crate::utils::rng::fill_random;
use sha2::{Digest, Sha256};

const KEY_TOKEN_HEX_LEN: usize = 24;

/// Calculates the SHA256 hash of byte data and returns it as a hex string.
pub fn calculate_sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Opaque prefix for an upload's storage key, mixed from the ids, the time and RNG entropy.
pub fn storage_key_token(vault_id: VaultId, upload_id: UploadId, now: Timestamp) -> String {
    let mut entropy = [0u8; 16];
    fill_random(&mut entropy);

    let mut hasher = Sha256::new();
    hasher.update(vault_id.to_be_bytes());
    hasher.update(upload_id.to_be_bytes());
    hasher.update(now.to_be_bytes());
    hasher.update(entropy);
    let mut token = hex::encode(hasher.finalize());
    token.truncate(KEY_TOKEN_HEX_LEN);
    token
}
