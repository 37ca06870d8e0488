// src/backend/services/vault_service.rs
use crate::error::VaultError;
use crate::metrics;
use crate::models::{
    CoverImage, NewCoverImage, NewVault, StatusActor, Timestamp, UploadId, UserId, Vault,
    VaultId, VaultStatus,
};
use crate::services::quota_service::QuotaLedger;
use crate::services::upload_service::{ChunkBuffer, UploadRegistry};
use crate::storage::{BlobError, ObjectStore, RelationalStore};
use crate::utils::guards::load_owned_vault;
use candid::CandidType;
use serde::Deserialize;

const MAX_TITLE_CHARS: usize = 120;

pub fn cover_storage_key(vault_id: VaultId) -> String {
    format!("vaults/{}/cover/{}_cover.jpg", vault_id, vault_id)
}

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeletionFailure {
    /// `None` for the cover image.
    pub upload_id: Option<UploadId>,
    pub reason: String,
}

/// Outcome of a cascading vault delete. The vault row survives any failure so the call can be retried.
#[derive(CandidType, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeletionReport {
    pub vault_id: VaultId,
    pub uploads_removed: u64,
    pub cover_removed: bool,
    pub vault_removed: bool,
    pub failures: Vec<DeletionFailure>,
}

#[derive(Clone)]
pub struct VaultLifecycle<S, O> {
    store: S,
    objects: O,
    uploads: UploadRegistry<S, O>,
    ledger: QuotaLedger<S>,
}

impl<S, O> VaultLifecycle<S, O>
where
    S: RelationalStore + Clone,
    O: ObjectStore + Clone,
{
    pub fn new(store: S, objects: O) -> Self {
        Self {
            uploads: UploadRegistry::new(store.clone(), objects.clone()),
            ledger: QuotaLedger::new(store.clone()),
            store,
            objects,
        }
    }

    /// Lets the delete cascade drop buffered chunks of the uploads it removes.
    pub fn with_chunk_buffer(mut self, chunks: ChunkBuffer) -> Self {
        self.uploads = self.uploads.with_chunk_buffer(chunks);
        self
    }

    fn validate_title(title: &str) -> Result<String, VaultError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(VaultError::ValidationFailed(
                "vault title must not be empty".to_string(),
            ));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(VaultError::ValidationFailed(format!(
                "vault title exceeds {} characters",
                MAX_TITLE_CHARS
            )));
        }
        Ok(title.to_string())
    }

    /// Creates an `Open` vault. Titles are unique per owner; the plan caps the vault count.
    pub fn create(
        &self,
        user_id: UserId,
        title: &str,
        description: &str,
        now: Timestamp,
    ) -> Result<Vault, VaultError> {
        let title = Self::validate_title(title)?;
        let user = self
            .store
            .get_user(user_id)?
            .ok_or_else(|| VaultError::NotFound(format!("user {}", user_id)))?;

        let owned = self.store.vaults_by_owner(user_id)?.len() as u64;
        let max_vaults = u64::from(user.plan.limits().max_vaults);
        if owned >= max_vaults {
            return Err(VaultError::QuotaExceeded {
                used: owned,
                requested: 1,
                limit: max_vaults,
            });
        }

        let vault = self.store.insert_vault(NewVault {
            owner: user_id,
            title,
            description: description.trim().to_string(),
            created_at: now,
        })?;
        metrics::record_vault_created();
        crate::log_info!("Vault {} created for user {}", vault.id, user_id);
        Ok(vault)
    }

    pub fn get(&self, user_id: UserId, vault_id: VaultId) -> Result<Vault, VaultError> {
        load_owned_vault(&self.store, user_id, vault_id)
    }

    pub fn list_owned(&self, user_id: UserId) -> Result<Vec<Vault>, VaultError> {
        let mut vaults = self.store.vaults_by_owner(user_id)?;
        vaults.sort_by_key(|v| (v.created_at, v.id));
        Ok(vaults)
    }

    pub fn update_details(
        &self,
        user_id: UserId,
        vault_id: VaultId,
        title: Option<String>,
        description: Option<String>,
        now: Timestamp,
    ) -> Result<Vault, VaultError> {
        let mut vault = load_owned_vault(&self.store, user_id, vault_id)?;
        if let Some(title) = title {
            vault.title = Self::validate_title(&title)?;
        }
        if let Some(description) = description {
            vault.description = description.trim().to_string();
        }
        vault.updated_at = now;
        self.store.update_vault(&vault)?;
        Ok(vault)
    }

    /// Stores the unlock time verbatim. A vault that is being released keeps its date.
    pub fn set_unlock_date(
        &self,
        user_id: UserId,
        vault_id: VaultId,
        unlock_at: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<Vault, VaultError> {
        let mut vault = load_owned_vault(&self.store, user_id, vault_id)?;
        match (vault.status, unlock_at) {
            (VaultStatus::PendingRelease, _) => {
                return Err(VaultError::ValidationFailed(
                    "vault is being released; its unlock date can no longer change".to_string(),
                ));
            }
            (VaultStatus::Buried, None) => {
                return Err(VaultError::ValidationFailed(
                    "a buried vault needs an unlock date".to_string(),
                ));
            }
            _ => {}
        }
        vault.unlock_at = unlock_at;
        vault.updated_at = now;
        self.store.update_vault(&vault)?;
        crate::log_info!("Vault {} unlock date set to {:?}", vault_id, unlock_at);
        Ok(vault)
    }

    pub fn get_unlock_date(&self, user_id: UserId, vault_id: VaultId) -> Result<Option<Timestamp>, VaultError> {
        Ok(load_owned_vault(&self.store, user_id, vault_id)?.unlock_at)
    }

    /// Owner-initiated status change, checked against the transition table.
    pub fn change_status(
        &self,
        user_id: UserId,
        vault_id: VaultId,
        next: VaultStatus,
        now: Timestamp,
    ) -> Result<Vault, VaultError> {
        let mut vault = load_owned_vault(&self.store, user_id, vault_id)?;
        if vault.status == next {
            return Ok(vault);
        }
        if !vault.status.allows(next, StatusActor::Owner) {
            return Err(VaultError::ValidationFailed(format!(
                "cannot change vault status from {:?} to {:?}",
                vault.status, next
            )));
        }
        if next == VaultStatus::Buried && vault.unlock_at.is_none() {
            return Err(VaultError::ValidationFailed(
                "set an unlock date before burying the vault".to_string(),
            ));
        }

        if !self
            .store
            .compare_and_set_status(vault_id, vault.status, next, now)?
        {
            return Err(VaultError::Conflict(format!(
                "vault {} changed status concurrently",
                vault_id
            )));
        }
        crate::log_info!(
            "Vault {} status changed from {:?} to {:?}",
            vault_id,
            vault.status,
            next
        );
        vault.status = next;
        vault.updated_at = now;
        Ok(vault)
    }

    /// Writes the cover blob (last write wins) and links the cover row to the vault.
    ///
    /// If linking fails after the transfer, a cover that did not exist before is removed
    /// again, blob and row. A replaced blob cannot be restored and is left in place.
    pub async fn set_cover_image(
        &self,
        user_id: UserId,
        vault_id: VaultId,
        filename: &str,
        bytes: Vec<u8>,
        now: Timestamp,
    ) -> Result<CoverImage, VaultError> {
        load_owned_vault(&self.store, user_id, vault_id)?;
        if bytes.is_empty() {
            return Err(VaultError::ValidationFailed(
                "cover image must not be empty".to_string(),
            ));
        }
        self.ledger.check(user_id, bytes.len() as u64)?;
        let replacing = self.store.get_cover(vault_id)?.is_some();

        let storage_key = cover_storage_key(vault_id);
        if let Err(e) = self.objects.put(&storage_key, bytes).await {
            crate::log_error!("Cover upload for vault {} failed: {}", vault_id, e);
            return Err(VaultError::StorageTransferFailed(
                "could not store the cover image".to_string(),
            ));
        }

        match self.link_cover(user_id, vault_id, &storage_key, filename, now) {
            Ok(cover) => {
                crate::log_info!("Cover image {} linked to vault {}", cover.id, vault_id);
                Ok(cover)
            }
            Err(e) => {
                let vault_gone = matches!(self.store.get_vault(vault_id), Ok(None));
                if !replacing || vault_gone {
                    crate::log_warn!(
                        "Linking cover of vault {} failed, removing the stored image: {}",
                        vault_id,
                        e
                    );
                    if let Err(err) = self.store.remove_cover(vault_id) {
                        crate::log_error!("Could not drop cover row of vault {}: {}", vault_id, err);
                    }
                    match self.objects.delete(&storage_key).await {
                        Ok(()) | Err(BlobError::NotFound(_)) => {}
                        Err(err) => crate::log_error!(
                            "Could not remove orphaned cover {}: {}",
                            storage_key,
                            err
                        ),
                    }
                }
                Err(e)
            }
        }
    }

    fn link_cover(
        &self,
        user_id: UserId,
        vault_id: VaultId,
        storage_key: &str,
        filename: &str,
        now: Timestamp,
    ) -> Result<CoverImage, VaultError> {
        // Re-read: the vault row may have changed during the transfer.
        let mut vault = load_owned_vault(&self.store, user_id, vault_id)?;
        let cover = self.store.upsert_cover(NewCoverImage {
            vault_id,
            storage_key: storage_key.to_string(),
            filename: filename.trim().to_string(),
            uploaded_at: now,
        })?;
        vault.cover_image_id = Some(cover.id);
        vault.updated_at = now;
        self.store.update_vault(&vault)?;
        Ok(cover)
    }

    pub async fn get_cover_image(
        &self,
        user_id: UserId,
        vault_id: VaultId,
    ) -> Result<(CoverImage, Vec<u8>), VaultError> {
        load_owned_vault(&self.store, user_id, vault_id)?;
        let cover = self
            .store
            .get_cover(vault_id)?
            .ok_or_else(|| VaultError::NotFound(format!("cover image of vault {}", vault_id)))?;
        let bytes = self.objects.get(&cover.storage_key).await?;
        Ok((cover, bytes))
    }

    /// Cascading delete: cover, then every upload through the registry delete path, then the vault.
    pub async fn delete(&self, user_id: UserId, vault_id: VaultId) -> Result<DeletionReport, VaultError> {
        load_owned_vault(&self.store, user_id, vault_id)?;
        let mut report = DeletionReport {
            vault_id,
            uploads_removed: 0,
            cover_removed: false,
            vault_removed: false,
            failures: Vec::new(),
        };

        if let Some(cover) = self.store.get_cover(vault_id)? {
            match self.objects.delete(&cover.storage_key).await {
                Ok(()) | Err(BlobError::NotFound(_)) => {
                    self.store.remove_cover(vault_id)?;
                    report.cover_removed = true;
                }
                Err(e) => {
                    crate::log_error!("Failed removing cover of vault {}: {}", vault_id, e);
                    report.failures.push(DeletionFailure {
                        upload_id: None,
                        reason: "object store unavailable".to_string(),
                    });
                }
            }
        }

        for upload in self.store.uploads_by_vault(vault_id)? {
            let upload_id = upload.id;
            match self.uploads.remove_owned(user_id, upload).await {
                Ok(()) => report.uploads_removed += 1,
                Err(e) => {
                    crate::log_error!(
                        "Failed removing upload {} of vault {}: {}",
                        upload_id,
                        vault_id,
                        e
                    );
                    report.failures.push(DeletionFailure {
                        upload_id: Some(upload_id),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !report.failures.is_empty() {
            crate::log_warn!(
                "Vault {} kept: {} item(s) could not be removed",
                vault_id,
                report.failures.len()
            );
            return Ok(report);
        }

        if let Some(removed) = self.store.remove_vault(vault_id)? {
            if removed.total_storage_used != 0 {
                crate::log_warn!(
                    "Ledger drift: vault {} still counted {} bytes after every upload was removed",
                    vault_id,
                    removed.total_storage_used
                );
            }
            metrics::record_vault_deleted();
        }
        report.vault_removed = true;
        crate::log_info!(
            "Vault {} deleted with {} upload(s)",
            vault_id,
            report.uploads_removed
        );
        Ok(report)
    }
}
