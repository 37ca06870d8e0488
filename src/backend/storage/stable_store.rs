// src/backend/storage/stable_store.rs
// Stable-memory implementation of the relational store.

use crate::models::{
    CoverImage, NewCoverImage, NewUpload, NewUser, NewVault, PlanType, StorageBytes, Timestamp,
    Upload, UploadId, User, UserId, Vault, VaultId, VaultStatus,
};
use crate::storage::memory::{
    Memory, COUNTERS_MEM_ID, COVERS_MEM_ID, UPLOADS_MEM_ID, USERS_MEM_ID, USER_EMAIL_IDX_MEM_ID,
    USER_PRINCIPAL_IDX_MEM_ID, VAULTS_MEM_ID, VAULT_TITLE_IDX_MEM_ID, VAULT_UPLOADS_IDX_MEM_ID,
};
use crate::storage::storable::{Cbor, OwnerTitleKey, StorableString};
use crate::storage::traits::{LedgerUpdate, RelationalStore, StoreError};
use candid::Principal;
use ic_stable_structures::memory_manager::MemoryManager;
use ic_stable_structures::{DefaultMemoryImpl, StableBTreeMap};
use std::cell::RefCell;
use std::rc::Rc;

type PrincipalBytes = Vec<u8>;

#[derive(Clone, Copy)]
#[repr(u8)]
enum Counter {
    User = 0,
    Vault = 1,
    Upload = 2,
    Cover = 3,
}

struct Tables {
    users: StableBTreeMap<UserId, Cbor<User>, Memory>,
    user_by_principal: StableBTreeMap<PrincipalBytes, UserId, Memory>,
    user_by_email: StableBTreeMap<StorableString, UserId, Memory>,
    vaults: StableBTreeMap<VaultId, Cbor<Vault>, Memory>,
    vault_by_title: StableBTreeMap<OwnerTitleKey, VaultId, Memory>,
    uploads: StableBTreeMap<UploadId, Cbor<Upload>, Memory>,
    // Secondary index: (vault, upload) -> ()
    vault_uploads: StableBTreeMap<(VaultId, UploadId), (), Memory>,
    // Keyed by vault: a vault has at most one cover
    covers: StableBTreeMap<VaultId, Cbor<CoverImage>, Memory>,
    counters: StableBTreeMap<u8, u64, Memory>,
}

/// Cheap-to-clone handle over the stable B-tree tables.
///
/// Every trait method borrows the tables once for its whole body, which on a
/// single-threaded canister makes each call one atomic critical section.
#[derive(Clone)]
pub struct StableStore {
    tables: Rc<RefCell<Tables>>,
}

impl StableStore {
    pub fn init(manager: &MemoryManager<DefaultMemoryImpl>) -> Self {
        let tables = Tables {
            users: StableBTreeMap::init(manager.get(USERS_MEM_ID)),
            user_by_principal: StableBTreeMap::init(manager.get(USER_PRINCIPAL_IDX_MEM_ID)),
            user_by_email: StableBTreeMap::init(manager.get(USER_EMAIL_IDX_MEM_ID)),
            vaults: StableBTreeMap::init(manager.get(VAULTS_MEM_ID)),
            vault_by_title: StableBTreeMap::init(manager.get(VAULT_TITLE_IDX_MEM_ID)),
            uploads: StableBTreeMap::init(manager.get(UPLOADS_MEM_ID)),
            vault_uploads: StableBTreeMap::init(manager.get(VAULT_UPLOADS_IDX_MEM_ID)),
            covers: StableBTreeMap::init(manager.get(COVERS_MEM_ID)),
            counters: StableBTreeMap::init(manager.get(COUNTERS_MEM_ID)),
        };
        Self {
            tables: Rc::new(RefCell::new(tables)),
        }
    }
}

fn email_key(email: &str) -> StorableString {
    Cbor(email.trim().to_lowercase())
}

fn title_key(owner: UserId, title: &str) -> OwnerTitleKey {
    Cbor((owner, title.to_string()))
}

impl Tables {
    /// Gets the next id for `counter` and increments it. Ids start at 1.
    fn next_id(&mut self, counter: Counter) -> Result<u64, StoreError> {
        let current = self.counters.get(&(counter as u8)).unwrap_or(0);
        let next = current
            .checked_add(1)
            .ok_or_else(|| StoreError::Backend("id counter overflow".to_string()))?;
        self.counters.insert(counter as u8, next);
        Ok(next)
    }

    fn upload_ids_of(&self, vault_id: VaultId) -> Vec<UploadId> {
        self.vault_uploads
            .range((vault_id, 0)..=(vault_id, u64::MAX))
            .map(|((_, upload_id), _)| upload_id)
            .collect()
    }

    /// Next free display position: one past the highest non-trashed index, 0 for an empty vault.
    fn next_order_index(&self, vault_id: VaultId) -> i64 {
        self.upload_ids_of(vault_id)
            .into_iter()
            .filter_map(|id| self.uploads.get(&id).map(|c| c.0))
            .filter(|upload| !upload.is_trashed())
            .map(|upload| upload.order_index)
            .max()
            .map_or(0, |max| max + 1)
    }

    fn load_user(&self, id: UserId) -> Result<User, StoreError> {
        self.users
            .get(&id)
            .map(|c| c.0)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
    }

    fn load_vault(&self, id: VaultId) -> Result<Vault, StoreError> {
        self.vaults
            .get(&id)
            .map(|c| c.0)
            .ok_or_else(|| StoreError::NotFound(format!("vault {}", id)))
    }

    fn load_upload(&self, id: UploadId) -> Result<Upload, StoreError> {
        self.uploads
            .get(&id)
            .map(|c| c.0)
            .ok_or_else(|| StoreError::NotFound(format!("upload {}", id)))
    }
}

fn decrement(previous: StorageBytes, bytes: StorageBytes) -> LedgerUpdate {
    LedgerUpdate {
        previous,
        current: previous.saturating_sub(bytes),
        clamped: bytes > previous,
    }
}

impl RelationalStore for StableStore {
    fn insert_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut t = self.tables.borrow_mut();
        let principal_bytes = new_user.principal.as_slice().to_vec();
        if t.user_by_principal.contains_key(&principal_bytes) {
            return Err(StoreError::Conflict(
                "caller is already registered".to_string(),
            ));
        }
        let email = email_key(&new_user.email);
        if t.user_by_email.contains_key(&email) {
            return Err(StoreError::Conflict("email already registered".to_string()));
        }

        let id = t.next_id(Counter::User)?;
        let user = User {
            id,
            principal: new_user.principal,
            email: new_user.email.trim().to_string(),
            display_name: new_user.display_name,
            plan: new_user.plan,
            total_storage_used: 0,
            is_verified: true,
            created_at: new_user.created_at,
        };
        t.users.insert(id, Cbor(user.clone()));
        t.user_by_principal.insert(principal_bytes, id);
        t.user_by_email.insert(email, id);
        Ok(user)
    }

    fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables.borrow().users.get(&id).map(|c| c.0))
    }

    fn find_user_by_principal(&self, principal: &Principal) -> Result<Option<User>, StoreError> {
        let t = self.tables.borrow();
        Ok(t.user_by_principal
            .get(&principal.as_slice().to_vec())
            .and_then(|id| t.users.get(&id))
            .map(|c| c.0))
    }

    fn update_user_plan(&self, id: UserId, plan: PlanType) -> Result<User, StoreError> {
        let mut t = self.tables.borrow_mut();
        let mut user = t.load_user(id)?;
        user.plan = plan;
        t.users.insert(id, Cbor(user.clone()));
        Ok(user)
    }

    fn list_user_ids(&self) -> Result<Vec<UserId>, StoreError> {
        Ok(self.tables.borrow().users.iter().map(|(id, _)| id).collect())
    }

    fn insert_vault(&self, new_vault: NewVault) -> Result<Vault, StoreError> {
        let mut t = self.tables.borrow_mut();
        let key = title_key(new_vault.owner, &new_vault.title);
        if t.vault_by_title.contains_key(&key) {
            return Err(StoreError::Conflict("vault name already used".to_string()));
        }

        let id = t.next_id(Counter::Vault)?;
        let vault = Vault {
            id,
            owner: new_vault.owner,
            title: new_vault.title,
            description: new_vault.description,
            status: VaultStatus::Open,
            unlock_at: None,
            total_storage_used: 0,
            cover_image_id: None,
            created_at: new_vault.created_at,
            updated_at: new_vault.created_at,
        };
        t.vaults.insert(id, Cbor(vault.clone()));
        t.vault_by_title.insert(key, id);
        Ok(vault)
    }

    fn get_vault(&self, id: VaultId) -> Result<Option<Vault>, StoreError> {
        Ok(self.tables.borrow().vaults.get(&id).map(|c| c.0))
    }

    fn update_vault(&self, vault: &Vault) -> Result<(), StoreError> {
        let mut t = self.tables.borrow_mut();
        let existing = t.load_vault(vault.id)?;
        if existing.title != vault.title || existing.owner != vault.owner {
            let new_key = title_key(vault.owner, &vault.title);
            if t.vault_by_title.contains_key(&new_key) {
                return Err(StoreError::Conflict("vault name already used".to_string()));
            }
            t.vault_by_title
                .remove(&title_key(existing.owner, &existing.title));
            t.vault_by_title.insert(new_key, vault.id);
        }
        t.vaults.insert(vault.id, Cbor(vault.clone()));
        Ok(())
    }

    fn remove_vault(&self, id: VaultId) -> Result<Option<Vault>, StoreError> {
        let mut t = self.tables.borrow_mut();
        let removed = t.vaults.remove(&id).map(|c| c.0);
        if let Some(vault) = &removed {
            t.vault_by_title.remove(&title_key(vault.owner, &vault.title));
        }
        Ok(removed)
    }

    fn vaults_by_owner(&self, owner: UserId) -> Result<Vec<Vault>, StoreError> {
        let t = self.tables.borrow();
        let ids: Vec<VaultId> = t
            .vault_by_title
            .range(title_key(owner, "")..)
            .take_while(|(key, _)| key.0 .0 == owner)
            .map(|(_, id)| id)
            .collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| t.vaults.get(&id).map(|c| c.0))
            .collect())
    }

    fn vaults_with_status(&self, status: VaultStatus) -> Result<Vec<Vault>, StoreError> {
        // Full scan of the vault table.
        Ok(self
            .tables
            .borrow()
            .vaults
            .iter()
            .map(|(_, c)| c.0)
            .filter(|vault| vault.status == status)
            .collect())
    }

    fn compare_and_set_status(
        &self,
        id: VaultId,
        expected: VaultStatus,
        next: VaultStatus,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.borrow_mut();
        let mut vault = t.load_vault(id)?;
        if vault.status != expected {
            return Ok(false);
        }
        vault.status = next;
        vault.updated_at = now;
        t.vaults.insert(id, Cbor(vault));
        Ok(true)
    }

    fn next_upload_id(&self) -> Result<UploadId, StoreError> {
        self.tables.borrow_mut().next_id(Counter::Upload)
    }

    fn insert_upload(&self, new_upload: NewUpload) -> Result<Upload, StoreError> {
        let mut t = self.tables.borrow_mut();
        if t.uploads.contains_key(&new_upload.id) {
            return Err(StoreError::Conflict(format!(
                "upload {} already exists",
                new_upload.id
            )));
        }
        let key_taken = t
            .upload_ids_of(new_upload.vault_id)
            .into_iter()
            .filter_map(|id| t.uploads.get(&id))
            .any(|c| c.0.storage_key == new_upload.storage_key);
        if key_taken {
            return Err(StoreError::Conflict("storage key already in use".to_string()));
        }

        let upload = Upload {
            id: new_upload.id,
            vault_id: new_upload.vault_id,
            storage_key: new_upload.storage_key,
            filename: new_upload.filename,
            size: new_upload.size,
            order_index: t.next_order_index(new_upload.vault_id),
            deleted_at: None,
            uploaded_at: new_upload.uploaded_at,
            transfer_started_at: None,
            committed_at: None,
            sha256: None,
        };
        t.uploads.insert(upload.id, Cbor(upload.clone()));
        t.vault_uploads.insert((upload.vault_id, upload.id), ());
        Ok(upload)
    }

    fn get_upload(&self, id: UploadId) -> Result<Option<Upload>, StoreError> {
        Ok(self.tables.borrow().uploads.get(&id).map(|c| c.0))
    }

    fn update_upload(&self, upload: &Upload) -> Result<(), StoreError> {
        let mut t = self.tables.borrow_mut();
        if !t.uploads.contains_key(&upload.id) {
            return Err(StoreError::NotFound(format!("upload {}", upload.id)));
        }
        t.uploads.insert(upload.id, Cbor(upload.clone()));
        Ok(())
    }

    fn claim_transfer(&self, id: UploadId, now: Timestamp) -> Result<Upload, StoreError> {
        let mut t = self.tables.borrow_mut();
        let mut upload = t.load_upload(id)?;
        if upload.is_committed() {
            return Err(StoreError::Conflict(format!("upload {} is already committed", id)));
        }
        if upload.is_transferring() {
            return Err(StoreError::Conflict(format!(
                "upload {} is already being transferred",
                id
            )));
        }
        upload.transfer_started_at = Some(now);
        t.uploads.insert(id, Cbor(upload.clone()));
        Ok(upload)
    }

    fn restore_upload(&self, id: UploadId) -> Result<Upload, StoreError> {
        let mut t = self.tables.borrow_mut();
        let mut upload = t.load_upload(id)?;
        if !upload.is_trashed() {
            return Ok(upload);
        }
        upload.order_index = t.next_order_index(upload.vault_id);
        upload.deleted_at = None;
        t.uploads.insert(id, Cbor(upload.clone()));
        Ok(upload)
    }

    fn remove_upload(&self, id: UploadId) -> Result<Option<Upload>, StoreError> {
        let mut t = self.tables.borrow_mut();
        let removed = t.uploads.remove(&id).map(|c| c.0);
        if let Some(upload) = &removed {
            t.vault_uploads.remove(&(upload.vault_id, upload.id));
        }
        Ok(removed)
    }

    fn reinsert_upload(&self, upload: Upload) -> Result<(), StoreError> {
        let mut t = self.tables.borrow_mut();
        if t.uploads.contains_key(&upload.id) {
            return Err(StoreError::Conflict(format!(
                "upload {} already exists",
                upload.id
            )));
        }
        t.vault_uploads.insert((upload.vault_id, upload.id), ());
        t.uploads.insert(upload.id, Cbor(upload));
        Ok(())
    }

    fn uploads_by_vault(&self, vault_id: VaultId) -> Result<Vec<Upload>, StoreError> {
        let t = self.tables.borrow();
        Ok(t.upload_ids_of(vault_id)
            .into_iter()
            .filter_map(|id| t.uploads.get(&id).map(|c| c.0))
            .collect())
    }

    fn upsert_cover(&self, cover: NewCoverImage) -> Result<CoverImage, StoreError> {
        let mut t = self.tables.borrow_mut();
        let id = match t.covers.get(&cover.vault_id) {
            Some(existing) => existing.0.id,
            None => t.next_id(Counter::Cover)?,
        };
        let row = CoverImage {
            id,
            vault_id: cover.vault_id,
            storage_key: cover.storage_key,
            filename: cover.filename,
            uploaded_at: cover.uploaded_at,
        };
        t.covers.insert(row.vault_id, Cbor(row.clone()));
        Ok(row)
    }

    fn get_cover(&self, vault_id: VaultId) -> Result<Option<CoverImage>, StoreError> {
        Ok(self.tables.borrow().covers.get(&vault_id).map(|c| c.0))
    }

    fn remove_cover(&self, vault_id: VaultId) -> Result<Option<CoverImage>, StoreError> {
        Ok(self.tables.borrow_mut().covers.remove(&vault_id).map(|c| c.0))
    }

    fn increment_user_storage(
        &self,
        id: UserId,
        bytes: StorageBytes,
        limit: StorageBytes,
    ) -> Result<LedgerUpdate, StoreError> {
        let mut t = self.tables.borrow_mut();
        let mut user = t.load_user(id)?;
        let previous = user.total_storage_used;
        let current = previous
            .checked_add(bytes)
            .filter(|total| *total <= limit)
            .ok_or(StoreError::LimitExceeded {
                used: previous,
                requested: bytes,
                limit,
            })?;
        user.total_storage_used = current;
        t.users.insert(id, Cbor(user));
        Ok(LedgerUpdate {
            previous,
            current,
            clamped: false,
        })
    }

    fn decrement_user_storage(&self, id: UserId, bytes: StorageBytes) -> Result<LedgerUpdate, StoreError> {
        let mut t = self.tables.borrow_mut();
        let mut user = t.load_user(id)?;
        let update = decrement(user.total_storage_used, bytes);
        user.total_storage_used = update.current;
        t.users.insert(id, Cbor(user));
        Ok(update)
    }

    fn increment_vault_storage(&self, id: VaultId, bytes: StorageBytes) -> Result<LedgerUpdate, StoreError> {
        let mut t = self.tables.borrow_mut();
        let mut vault = t.load_vault(id)?;
        let previous = vault.total_storage_used;
        let current = previous
            .checked_add(bytes)
            .ok_or_else(|| StoreError::Backend(format!("vault {} storage counter overflow", id)))?;
        vault.total_storage_used = current;
        t.vaults.insert(id, Cbor(vault));
        Ok(LedgerUpdate {
            previous,
            current,
            clamped: false,
        })
    }

    fn decrement_vault_storage(&self, id: VaultId, bytes: StorageBytes) -> Result<LedgerUpdate, StoreError> {
        let mut t = self.tables.borrow_mut();
        let mut vault = t.load_vault(id)?;
        let update = decrement(vault.total_storage_used, bytes);
        vault.total_storage_used = update.current;
        t.vaults.insert(id, Cbor(vault));
        Ok(update)
    }

    fn set_user_storage(&self, id: UserId, total: StorageBytes) -> Result<(), StoreError> {
        let mut t = self.tables.borrow_mut();
        let mut user = t.load_user(id)?;
        user.total_storage_used = total;
        t.users.insert(id, Cbor(user));
        Ok(())
    }

    fn set_vault_storage(&self, id: VaultId, total: StorageBytes) -> Result<(), StoreError> {
        let mut t = self.tables.borrow_mut();
        let mut vault = t.load_vault(id)?;
        vault.total_storage_used = total;
        t.vaults.insert(id, Cbor(vault));
        Ok(())
    }
}
