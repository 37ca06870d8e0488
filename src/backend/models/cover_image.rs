use crate::models::common::{CoverImageId, Timestamp, VaultId};
use candid::CandidType;
use serde::{Deserialize, Serialize};

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CoverImage {
    pub id: CoverImageId,
    pub vault_id: VaultId,
    pub storage_key: String,
    pub filename: String,
    pub uploaded_at: Timestamp,
}

#[derive(Clone, Debug)]
pub struct NewCoverImage {
    pub vault_id: VaultId,
    pub storage_key: String,
    pub filename: String,
    pub uploaded_at: Timestamp,
}
