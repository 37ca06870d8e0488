// src/backend/models/upload.rs
use crate::models::common::{StorageBytes, Timestamp, UploadId, VaultId, TRASHED_ORDER_INDEX};
use candid::CandidType;
use serde::{Deserialize, Serialize};

/// Metadata row for an uploaded asset. The bytes live in the object store under `storage_key`.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Upload {
    pub id: UploadId,
    pub vault_id: VaultId,
    pub storage_key: String,
    pub filename: String,
    pub size: StorageBytes,
    /// Display position among active uploads; `-1` while trashed.
    pub order_index: i64,
    pub deleted_at: Option<Timestamp>,
    pub uploaded_at: Timestamp,
    /// Set when a commit claimed the row and reserved its quota, cleared once committed.
    /// While set, no other commit may write the blob.
    pub transfer_started_at: Option<Timestamp>,
    /// Set once the blob transfer succeeded. Uncommitted rows are never listed.
    pub committed_at: Option<Timestamp>,
    pub sha256: Option<String>,
}

impl Upload {
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_committed(&self) -> bool {
        self.committed_at.is_some()
    }

    pub fn is_transferring(&self) -> bool {
        self.transfer_started_at.is_some()
    }

    /// Rows whose size is on the ledger: committed ones and those mid-transfer.
    pub fn holds_quota(&self) -> bool {
        self.is_committed() || self.is_transferring()
    }

    pub fn is_active(&self) -> bool {
        self.is_committed() && !self.is_trashed()
    }

    pub fn trash(&mut self, now: Timestamp) {
        self.deleted_at = Some(now);
        self.order_index = TRASHED_ORDER_INDEX;
    }

    pub fn view(&self) -> UploadView {
        UploadView {
            id: self.id,
            filename: self.filename.clone(),
            url: format!("/image/{}", self.id),
        }
    }
}

/// Insert payload. The store assigns `order_index` inside the same critical section as the insert.
#[derive(Clone, Debug)]
pub struct NewUpload {
    pub id: UploadId,
    pub vault_id: VaultId,
    pub storage_key: String,
    pub filename: String,
    pub size: StorageBytes,
    pub uploaded_at: Timestamp,
}

/// Projection handed to the presentation layer; the storage key stays internal.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadView {
    pub id: UploadId,
    pub filename: String,
    pub url: String,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Copy)]
pub enum UploadFilter {
    Active,
    Trashed,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Copy)]
pub struct OrderUpdate {
    pub id: UploadId,
    pub order_index: i64,
}
