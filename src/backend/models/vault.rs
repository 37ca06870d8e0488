// src/backend/models/vault.rs
use crate::models::common::{CoverImageId, StorageBytes, Timestamp, UserId, VaultId, VaultStatus};
use candid::CandidType;
use serde::{Deserialize, Serialize};

/// A user-owned album with its own lifecycle and optional scheduled release.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Vault {
    pub id: VaultId,
    pub owner: UserId,
    pub title: String,
    pub description: String,
    pub status: VaultStatus,
    /// When a buried vault becomes eligible for release.
    pub unlock_at: Option<Timestamp>,
    pub total_storage_used: StorageBytes,
    pub cover_image_id: Option<CoverImageId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Vault {
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.unlock_at.map_or(false, |unlock_at| unlock_at <= now)
    }
}

#[derive(Clone, Debug)]
pub struct NewVault {
    pub owner: UserId,
    pub title: String,
    pub description: String,
    pub created_at: Timestamp,
}
