//! Collaborator seams of the vault engine.
//!
//! Services take these as generic parameters so the canister wires in stable
//! memory while tests substitute fakes.

use crate::models::{
    CoverImage, NewCoverImage, NewUpload, NewUser, NewVault, PlanType, StorageBytes, Timestamp,
    Upload, UploadId, User, UserId, Vault, VaultId, VaultStatus,
};
use candid::Principal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// A conditional counter increment refused to cross its limit.
    #[error("limit exceeded: {used} used, {requested} requested, limit {limit}")]
    LimitExceeded {
        used: StorageBytes,
        requested: StorageBytes,
        limit: StorageBytes,
    },

    #[error("backend failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("object {0} not found")]
    NotFound(String),

    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

/// Result of an atomic counter adjustment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerUpdate {
    pub previous: StorageBytes,
    pub current: StorageBytes,
    /// A decrement hit zero before consuming the full amount.
    pub clamped: bool,
}

/// Metadata persistence for users, vaults, uploads and cover images.
///
/// Each method is one critical section: implementations must make the whole
/// call atomic with respect to every other call on the same store.
pub trait RelationalStore {
    fn insert_user(&self, new_user: NewUser) -> Result<User, StoreError>;
    fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;
    fn find_user_by_principal(&self, principal: &Principal) -> Result<Option<User>, StoreError>;
    fn update_user_plan(&self, id: UserId, plan: PlanType) -> Result<User, StoreError>;
    fn list_user_ids(&self) -> Result<Vec<UserId>, StoreError>;

    /// Fails with `Conflict` when the owner already has a vault with that title.
    fn insert_vault(&self, new_vault: NewVault) -> Result<Vault, StoreError>;
    fn get_vault(&self, id: VaultId) -> Result<Option<Vault>, StoreError>;
    /// Replaces the stored row, keeping the per-owner title index unique.
    fn update_vault(&self, vault: &Vault) -> Result<(), StoreError>;
    fn remove_vault(&self, id: VaultId) -> Result<Option<Vault>, StoreError>;
    fn vaults_by_owner(&self, owner: UserId) -> Result<Vec<Vault>, StoreError>;
    fn vaults_with_status(&self, status: VaultStatus) -> Result<Vec<Vault>, StoreError>;
    /// Moves `id` from `expected` to `next`. Returns false if the status was no longer `expected`.
    fn compare_and_set_status(
        &self,
        id: VaultId,
        expected: VaultStatus,
        next: VaultStatus,
        now: Timestamp,
    ) -> Result<bool, StoreError>;

    fn next_upload_id(&self) -> Result<UploadId, StoreError>;
    /// Inserts the row with `order_index = max(active order index in vault) + 1`.
    fn insert_upload(&self, new_upload: NewUpload) -> Result<Upload, StoreError>;
    fn get_upload(&self, id: UploadId) -> Result<Option<Upload>, StoreError>;
    fn update_upload(&self, upload: &Upload) -> Result<(), StoreError>;
    /// Marks an uncommitted row as mid-transfer. `Conflict` if it is committed or already claimed.
    fn claim_transfer(&self, id: UploadId, now: Timestamp) -> Result<Upload, StoreError>;
    /// Clears the soft-delete mark and appends the upload after every active sibling.
    fn restore_upload(&self, id: UploadId) -> Result<Upload, StoreError>;
    fn remove_upload(&self, id: UploadId) -> Result<Option<Upload>, StoreError>;
    /// Puts a previously removed row back verbatim.
    fn reinsert_upload(&self, upload: Upload) -> Result<(), StoreError>;
    fn uploads_by_vault(&self, vault_id: VaultId) -> Result<Vec<Upload>, StoreError>;

    /// Creates or replaces the single cover image row of a vault.
    fn upsert_cover(&self, cover: NewCoverImage) -> Result<CoverImage, StoreError>;
    fn get_cover(&self, vault_id: VaultId) -> Result<Option<CoverImage>, StoreError>;
    fn remove_cover(&self, vault_id: VaultId) -> Result<Option<CoverImage>, StoreError>;

    /// Adds `bytes` to the user total unless the result would exceed `limit`.
    fn increment_user_storage(
        &self,
        id: UserId,
        bytes: StorageBytes,
        limit: StorageBytes,
    ) -> Result<LedgerUpdate, StoreError>;
    fn decrement_user_storage(&self, id: UserId, bytes: StorageBytes) -> Result<LedgerUpdate, StoreError>;
    fn increment_vault_storage(&self, id: VaultId, bytes: StorageBytes) -> Result<LedgerUpdate, StoreError>;
    fn decrement_vault_storage(&self, id: VaultId, bytes: StorageBytes) -> Result<LedgerUpdate, StoreError>;
    fn set_user_storage(&self, id: UserId, total: StorageBytes) -> Result<(), StoreError>;
    fn set_vault_storage(&self, id: VaultId, total: StorageBytes) -> Result<(), StoreError>;
}

/// Binary blobs addressed by opaque key.
#[allow(async_fn_in_trait)]
pub trait ObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}
