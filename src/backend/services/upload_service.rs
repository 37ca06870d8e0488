// src/backend/services/upload_service.rs
// Upload metadata, ordering and trash state, with the blob transfer wrapped
// in compensating steps so the ledger never counts a failed upload.

use crate::error::VaultError;
use crate::metrics;
use crate::models::{
    NewUpload, OrderUpdate, Timestamp, Upload, UploadFilter, UploadId, UploadView, UserId, Vault,
    VaultId,
};
use crate::services::quota_service::{QuotaLedger, Reservation};
use crate::storage::{BlobError, ObjectStore, RelationalStore};
use crate::utils::crypto::{calculate_sha256_hex, storage_key_token};
use crate::utils::guards::{load_owned_upload, load_owned_vault};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Largest chunk accepted per call; keeps each call well under the ingress message limit.
pub const MAX_CHUNK_BYTES: usize = 512 * 1024; // 512 KiB
/// Per-file ceiling. Chunks are assembled in heap memory before the transfer.
pub const MAX_UPLOAD_BYTES: u64 = 64 * 1024 * 1024; // 64 MiB

fn chunk_count(size: u64) -> usize {
    (size as usize).div_ceil(MAX_CHUNK_BYTES)
}

fn chunk_len(size: u64, index: usize) -> usize {
    let offset = index * MAX_CHUNK_BYTES;
    (size as usize - offset).min(MAX_CHUNK_BYTES)
}

struct ChunkState {
    expected_chunks: usize,
    chunks: Vec<Vec<u8>>,
}

/// Chunks of uploads that are still arriving. Heap only: an upgrade drops unfinished uploads,
/// whose pending rows can then be deleted or committed again from scratch.
#[derive(Clone, Default)]
pub struct ChunkBuffer {
    sessions: Rc<RefCell<HashMap<UploadId, ChunkState>>>,
}

impl ChunkBuffer {
    fn append(
        &self,
        upload_id: UploadId,
        expected_chunks: usize,
        index: usize,
        data: Vec<u8>,
    ) -> Result<usize, VaultError> {
        let mut sessions = self.sessions.borrow_mut();
        let state = sessions.entry(upload_id).or_insert_with(|| ChunkState {
            expected_chunks,
            chunks: Vec::with_capacity(expected_chunks),
        });
        let received = state.chunks.len();
        if index < received {
            if state.chunks[index] == data {
                return Ok(received);
            }
            return Err(VaultError::ValidationFailed(format!(
                "chunk {} was already received with different bytes",
                index
            )));
        }
        if index > received {
            return Err(VaultError::ValidationFailed(format!(
                "chunk {} is out of order, expected chunk {}",
                index, received
            )));
        }
        state.chunks.push(data);
        Ok(state.chunks.len())
    }

    /// Removes and concatenates the chunks once every one has arrived.
    fn take_complete(&self, upload_id: UploadId) -> Result<Vec<u8>, VaultError> {
        let mut sessions = self.sessions.borrow_mut();
        let state = sessions.get(&upload_id).ok_or_else(|| {
            VaultError::ValidationFailed(format!("no chunks received for upload {}", upload_id))
        })?;
        if state.chunks.len() != state.expected_chunks {
            return Err(VaultError::ValidationFailed(format!(
                "upload {} incomplete: {} of {} chunks received",
                upload_id,
                state.chunks.len(),
                state.expected_chunks
            )));
        }
        Ok(sessions
            .remove(&upload_id)
            .map(|state| state.chunks.concat())
            .unwrap_or_default())
    }

    fn discard(&self, upload_id: UploadId) {
        self.sessions.borrow_mut().remove(&upload_id);
    }
}

/// Replaces path separators and spaces so the filename is safe inside a storage key.
fn sanitize_filename(filename: &str) -> String {
    filename
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

pub fn upload_storage_key(vault_id: VaultId, token: &str, filename: &str) -> String {
    format!(
        "vaults/{}/uploads/{}_{}",
        vault_id,
        token,
        sanitize_filename(filename)
    )
}

#[derive(Clone)]
pub struct UploadRegistry<S, O> {
    store: S,
    objects: O,
    ledger: QuotaLedger<S>,
    chunks: ChunkBuffer,
}

impl<S, O> UploadRegistry<S, O>
where
    S: RelationalStore + Clone,
    O: ObjectStore,
{
    pub fn new(store: S, objects: O) -> Self {
        Self {
            ledger: QuotaLedger::new(store.clone()),
            store,
            objects,
            chunks: ChunkBuffer::default(),
        }
    }

    /// Shares the chunk buffer of uploads that outlive a single call.
    pub fn with_chunk_buffer(mut self, chunks: ChunkBuffer) -> Self {
        self.chunks = chunks;
        self
    }

    /// Creates the metadata row ahead of the blob transfer.
    ///
    /// Id allocation, order index and insert happen in store calls without an
    /// intervening await, so concurrent enqueues into one vault never share an index.
    pub fn enqueue(
        &self,
        user_id: UserId,
        vault_id: VaultId,
        filename: &str,
        size: u64,
        now: Timestamp,
    ) -> Result<Upload, VaultError> {
        load_owned_vault(&self.store, user_id, vault_id)?;
        if filename.trim().is_empty() {
            return Err(VaultError::ValidationFailed(
                "filename must not be empty".to_string(),
            ));
        }
        if size == 0 {
            return Err(VaultError::ValidationFailed(
                "upload size must be greater than zero".to_string(),
            ));
        }
        if size > MAX_UPLOAD_BYTES {
            return Err(VaultError::ValidationFailed(format!(
                "upload size {} exceeds the per-file limit of {} bytes",
                size, MAX_UPLOAD_BYTES
            )));
        }
        self.ledger.check(user_id, size)?;

        let id = self.store.next_upload_id()?;
        let token = storage_key_token(vault_id, id, now);
        let upload = self.store.insert_upload(NewUpload {
            id,
            vault_id,
            storage_key: upload_storage_key(vault_id, &token, filename),
            filename: filename.trim().to_string(),
            size,
            uploaded_at: now,
        })?;

        crate::log_info!(
            "Enqueued upload {} ({} bytes) in vault {} at position {}",
            upload.id,
            size,
            vault_id,
            upload.order_index
        );
        Ok(upload)
    }

    /// Claims the row, reserves quota, transfers the bytes and marks the row committed.
    ///
    /// The claim is a single store call taken before the transfer, so a second commit of the
    /// same upload fails with `Conflict` instead of overwriting the blob. Any later failure
    /// undoes the earlier steps: the reservation is released, a written blob is removed and
    /// the pending row is dropped.
    pub async fn commit(
        &self,
        user_id: UserId,
        upload_id: UploadId,
        bytes: Vec<u8>,
        now: Timestamp,
    ) -> Result<Upload, VaultError> {
        let (_, vault) = load_owned_upload(&self.store, user_id, upload_id)?;
        let upload = self.store.claim_transfer(upload_id, now)?;
        if bytes.len() as u64 != upload.size {
            self.discard_row(upload_id);
            return Err(VaultError::ValidationFailed(format!(
                "received {} bytes, declared {}",
                bytes.len(),
                upload.size
            )));
        }

        let reservation = match self.ledger.check_and_reserve(user_id, vault.id, upload.size) {
            Ok(reservation) => reservation,
            Err(e) => {
                self.discard_row(upload_id);
                return Err(e);
            }
        };

        let digest = calculate_sha256_hex(&bytes);
        if let Err(e) = self.objects.put(&upload.storage_key, bytes).await {
            crate::log_error!(
                "Blob transfer for upload {} failed, rolling back: {}",
                upload_id,
                e
            );
            self.release_quietly(&reservation);
            self.discard_row(upload_id);
            return Err(VaultError::StorageTransferFailed(
                "could not store the uploaded file".to_string(),
            ));
        }

        // The transfer was an await point. The claim is ours alone, so the row is either
        // unchanged or was deleted, and the delete already gave back the reservation.
        let mut current = match self.store.get_upload(upload_id) {
            Ok(Some(row)) => row,
            Ok(None) => {
                crate::log_warn!(
                    "Upload {} was deleted during its transfer, removing the blob",
                    upload_id
                );
                self.delete_blob_quietly(&upload.storage_key).await;
                return Err(VaultError::NotFound(format!("upload {}", upload_id)));
            }
            Err(e) => {
                self.rollback_transfer(&upload, &reservation).await;
                return Err(e.into());
            }
        };

        current.transfer_started_at = None;
        current.committed_at = Some(now);
        current.sha256 = Some(digest);
        if let Err(e) = self.store.update_upload(&current) {
            self.rollback_transfer(&upload, &reservation).await;
            return Err(e.into());
        }

        self.chunks.discard(upload_id);
        metrics::record_upload_committed(current.size);
        crate::log_info!(
            "Committed upload {} ({} bytes) in vault {}",
            upload_id,
            current.size,
            vault.id
        );
        Ok(current)
    }

    /// Buffers one chunk of a pending upload. Chunks arrive in order and every chunk but
    /// the last is exactly `MAX_CHUNK_BYTES` long. Re-sending an accepted chunk with the
    /// same bytes is a no-op. Returns the number of chunks received so far.
    pub fn put_chunk(
        &self,
        user_id: UserId,
        upload_id: UploadId,
        chunk_index: u32,
        data: Vec<u8>,
    ) -> Result<u32, VaultError> {
        let (upload, _) = load_owned_upload(&self.store, user_id, upload_id)?;
        if upload.holds_quota() {
            return Err(VaultError::Conflict(format!(
                "upload {} is already committed or being committed",
                upload_id
            )));
        }

        let expected_chunks = chunk_count(upload.size);
        let index = chunk_index as usize;
        if index >= expected_chunks {
            return Err(VaultError::ValidationFailed(format!(
                "chunk {} is past the last chunk {}",
                chunk_index,
                expected_chunks - 1
            )));
        }
        let expected_len = chunk_len(upload.size, index);
        if data.len() != expected_len {
            return Err(VaultError::ValidationFailed(format!(
                "chunk {} has {} bytes, expected {}",
                chunk_index,
                data.len(),
                expected_len
            )));
        }

        let received = self.chunks.append(upload_id, expected_chunks, index, data)?;
        crate::log_info!(
            "Received chunk {}/{} for upload {}",
            received,
            expected_chunks,
            upload_id
        );
        Ok(received as u32)
    }

    /// Assembles the buffered chunks and commits them. An incomplete upload keeps its chunks.
    pub async fn finish_chunked(
        &self,
        user_id: UserId,
        upload_id: UploadId,
        now: Timestamp,
    ) -> Result<Upload, VaultError> {
        load_owned_upload(&self.store, user_id, upload_id)?;
        let bytes = self.chunks.take_complete(upload_id)?;
        self.commit(user_id, upload_id, bytes, now).await
    }

    /// Committed uploads of a vault. Active ones sorted by position, trashed ones by deletion time.
    pub fn list(
        &self,
        user_id: UserId,
        vault_id: VaultId,
        filter: UploadFilter,
    ) -> Result<Vec<UploadView>, VaultError> {
        load_owned_vault(&self.store, user_id, vault_id)?;
        let mut uploads: Vec<Upload> = self
            .store
            .uploads_by_vault(vault_id)?
            .into_iter()
            .filter(Upload::is_committed)
            .filter(|upload| match filter {
                UploadFilter::Active => !upload.is_trashed(),
                UploadFilter::Trashed => upload.is_trashed(),
            })
            .collect();

        match filter {
            UploadFilter::Active => uploads.sort_by_key(|u| (u.order_index, u.id)),
            UploadFilter::Trashed => uploads.sort_by_key(|u| (u.deleted_at, u.id)),
        }
        Ok(uploads.iter().map(Upload::view).collect())
    }

    pub fn trash(&self, user_id: UserId, upload_id: UploadId, now: Timestamp) -> Result<Upload, VaultError> {
        let (mut upload, _) = self.load_committed(user_id, upload_id)?;
        if upload.is_trashed() {
            return Ok(upload);
        }
        upload.trash(now);
        self.store.update_upload(&upload)?;
        crate::log_info!("Moved upload {} to trash", upload_id);
        Ok(upload)
    }

    /// Restores a trashed upload after every active sibling.
    pub fn recover(&self, user_id: UserId, upload_id: UploadId) -> Result<Upload, VaultError> {
        let (upload, _) = self.load_committed(user_id, upload_id)?;
        if !upload.is_trashed() {
            return Ok(upload);
        }
        let restored = self.store.restore_upload(upload_id)?;
        crate::log_info!(
            "Recovered upload {} at position {}",
            upload_id,
            restored.order_index
        );
        Ok(restored)
    }

    /// Permanently deletes an upload, its blob and its share of the ledger.
    pub async fn delete(&self, user_id: UserId, upload_id: UploadId) -> Result<(), VaultError> {
        let (upload, _) = load_owned_upload(&self.store, user_id, upload_id)?;
        self.remove_owned(user_id, upload).await
    }

    /// Delete path shared with the vault cascade; ownership has already been checked.
    ///
    /// The row is detached first and put back if the blob cannot be removed.
    pub(crate) async fn remove_owned(&self, owner: UserId, upload: Upload) -> Result<(), VaultError> {
        let detached = self
            .store
            .remove_upload(upload.id)?
            .ok_or_else(|| VaultError::NotFound(format!("upload {}", upload.id)))?;

        match self.objects.delete(&detached.storage_key).await {
            Ok(()) => {}
            Err(BlobError::NotFound(key)) => {
                crate::log_warn!("Blob {} was already gone, treating as deleted", key);
            }
            Err(BlobError::Unavailable(detail)) => {
                crate::log_error!(
                    "Blob delete for upload {} failed, restoring row: {}",
                    detached.id,
                    detail
                );
                if let Err(e) = self.store.reinsert_upload(detached.clone()) {
                    crate::log_error!(
                        "Could not restore row for upload {} after failed blob delete: {}",
                        detached.id,
                        e
                    );
                }
                return Err(VaultError::StorageTransferFailed(
                    "could not delete the stored file".to_string(),
                ));
            }
        }

        self.chunks.discard(detached.id);
        // A row claimed by an in-flight commit holds its reservation; that commit sees the row
        // gone and only removes its blob.
        if detached.holds_quota() {
            self.ledger.release(&Reservation {
                user_id: owner,
                vault_id: detached.vault_id,
                bytes: detached.size,
            })?;
        }
        if detached.is_committed() {
            metrics::record_upload_deleted(detached.size);
        }
        crate::log_info!(
            "Deleted upload {} from vault {}",
            detached.id,
            detached.vault_id
        );
        Ok(())
    }

    /// Validates every entry before writing any, then applies each position as given.
    pub fn reorder(&self, user_id: UserId, updates: &[OrderUpdate]) -> Result<(), VaultError> {
        let mut staged = Vec::with_capacity(updates.len());
        for update in updates {
            let (mut upload, _) = self.load_committed(user_id, update.id)?;
            if upload.is_trashed() {
                return Err(VaultError::ValidationFailed(format!(
                    "upload {} is in the trash",
                    update.id
                )));
            }
            if update.order_index < 0 {
                return Err(VaultError::ValidationFailed(format!(
                    "order index {} for upload {} is negative",
                    update.order_index, update.id
                )));
            }
            upload.order_index = update.order_index;
            staged.push(upload);
        }

        for upload in &staged {
            self.store.update_upload(upload)?;
        }
        Ok(())
    }

    /// Bytes of a committed upload, for the `/image/{id}` reference.
    pub async fn fetch(&self, user_id: UserId, upload_id: UploadId) -> Result<(Upload, Vec<u8>), VaultError> {
        let (upload, _) = self.load_committed(user_id, upload_id)?;
        let bytes = self.objects.get(&upload.storage_key).await?;
        Ok((upload, bytes))
    }

    /// Uncommitted rows are invisible outside the commit path.
    fn load_committed(&self, user_id: UserId, upload_id: UploadId) -> Result<(Upload, Vault), VaultError> {
        let (upload, vault) = load_owned_upload(&self.store, user_id, upload_id)?;
        if !upload.is_committed() {
            return Err(VaultError::NotFound(format!("upload {}", upload_id)));
        }
        Ok((upload, vault))
    }

    fn discard_row(&self, upload_id: UploadId) {
        self.chunks.discard(upload_id);
        if let Err(e) = self.store.remove_upload(upload_id) {
            crate::log_error!("Could not drop pending row for upload {}: {}", upload_id, e);
        }
    }

    fn release_quietly(&self, reservation: &Reservation) {
        if let Err(e) = self.ledger.release(reservation) {
            crate::log_error!(
                "Could not release {} reserved bytes for user {}: {}",
                reservation.bytes,
                reservation.user_id,
                e
            );
        }
    }

    async fn delete_blob_quietly(&self, key: &str) {
        match self.objects.delete(key).await {
            Ok(()) | Err(BlobError::NotFound(_)) => {}
            Err(e) => crate::log_error!("Could not remove orphaned blob {}: {}", key, e),
        }
    }

    async fn rollback_transfer(&self, upload: &Upload, reservation: &Reservation) {
        self.delete_blob_quietly(&upload.storage_key).await;
        self.release_quietly(reservation);
        self.discard_row(upload.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanType;
    use crate::storage::StableStore;
    use crate::testing::{
        fresh_store, new_vault, register_user, user_total, vault_total, MemoryBlobs,
    };
    use futures::executor::block_on;

    struct Fixture {
        store: StableStore,
        blobs: MemoryBlobs,
        registry: UploadRegistry<StableStore, MemoryBlobs>,
        user: UserId,
        vault: VaultId,
    }

    fn fixture() -> Fixture {
        let store = fresh_store();
        let blobs = MemoryBlobs::default();
        let user = register_user(&store, "owner@example.com", PlanType::Free);
        let vault = new_vault(&store, user.id, "Trip");
        Fixture {
            registry: UploadRegistry::new(store.clone(), blobs.clone()),
            store,
            blobs,
            user: user.id,
            vault: vault.id,
        }
    }

    fn upload(f: &Fixture, name: &str, bytes: &[u8]) -> Upload {
        let pending = f
            .registry
            .enqueue(f.user, f.vault, name, bytes.len() as u64, 100)
            .unwrap();
        block_on(f.registry.commit(f.user, pending.id, bytes.to_vec(), 101)).unwrap()
    }

    #[test]
    fn trip_scenario_end_to_end() {
        let f = fixture();
        let committed = upload(&f, "a.jpg", &[7u8; 10]);

        let listed = f.registry.list(f.user, f.vault, UploadFilter::Active).unwrap();
        assert_eq!(
            listed,
            vec![UploadView {
                id: committed.id,
                filename: "a.jpg".to_string(),
                url: format!("/image/{}", committed.id),
            }]
        );
        assert_eq!(vault_total(&f.store, f.vault), 10);
        assert_eq!(user_total(&f.store, f.user), 10);

        f.registry.trash(f.user, committed.id, 200).unwrap();
        assert!(f.registry.list(f.user, f.vault, UploadFilter::Active).unwrap().is_empty());
        assert_eq!(
            f.registry.list(f.user, f.vault, UploadFilter::Trashed).unwrap().len(),
            1
        );

        let recovered = f.registry.recover(f.user, committed.id).unwrap();
        assert!(recovered.order_index >= 0);

        block_on(f.registry.delete(f.user, committed.id)).unwrap();
        assert_eq!(vault_total(&f.store, f.vault), 0);
        assert_eq!(user_total(&f.store, f.user), 0);
        assert!(!f.blobs.contains(&committed.storage_key));
    }

    #[test]
    fn storage_key_is_namespaced_and_sanitized() {
        let f = fixture();
        let pending = f
            .registry
            .enqueue(f.user, f.vault, "my beach/day.jpg", 3, 0)
            .unwrap();
        let prefix = format!("vaults/{}/uploads/", f.vault);
        assert!(pending.storage_key.starts_with(&prefix));
        assert!(pending.storage_key.ends_with("_my_beach_day.jpg"));
        assert!(!pending.storage_key[prefix.len()..].contains('/'));
    }

    #[test]
    fn failed_transfer_leaves_no_row_and_no_ledger_change() {
        let f = fixture();
        f.blobs.fail_puts.set(true);
        let pending = f.registry.enqueue(f.user, f.vault, "a.jpg", 4, 0).unwrap();

        let result = block_on(f.registry.commit(f.user, pending.id, vec![1, 2, 3, 4], 1));
        assert!(matches!(result, Err(VaultError::StorageTransferFailed(_))));
        assert_eq!(f.store.get_upload(pending.id).unwrap(), None);
        assert_eq!(user_total(&f.store, f.user), 0);
        assert_eq!(vault_total(&f.store, f.vault), 0);
        assert_eq!(f.blobs.len(), 0);
    }

    #[test]
    fn size_mismatch_is_rejected_before_any_transfer() {
        let f = fixture();
        let pending = f.registry.enqueue(f.user, f.vault, "a.jpg", 4, 0).unwrap();

        let result = block_on(f.registry.commit(f.user, pending.id, vec![1, 2], 1));
        assert!(matches!(result, Err(VaultError::ValidationFailed(_))));
        assert_eq!(f.store.get_upload(pending.id).unwrap(), None);
        assert_eq!(f.blobs.len(), 0);
        assert_eq!(user_total(&f.store, f.user), 0);
    }

    #[test]
    fn second_commit_is_a_conflict() {
        let f = fixture();
        let committed = upload(&f, "a.jpg", b"abcd");
        let again = block_on(f.registry.commit(f.user, committed.id, b"abcd".to_vec(), 2));
        assert!(matches!(again, Err(VaultError::Conflict(_))));
        assert_eq!(user_total(&f.store, f.user), 4);
        assert_eq!(
            committed.sha256.as_deref(),
            Some("88d4266fd4e6338d13b845fcf289579d209c897823b9217da3e161936f031589")
        );
    }

    #[test]
    fn quota_denial_at_commit_drops_the_pending_row() {
        let f = fixture();
        let mib = 1024 * 1024;
        f.store.set_user_storage(f.user, 49 * mib).unwrap();
        let pending = f.registry.enqueue(f.user, f.vault, "big.jpg", mib / 2, 0).unwrap();
        f.store.set_user_storage(f.user, 50 * mib).unwrap();

        let result = block_on(f.registry.commit(f.user, pending.id, vec![0; (mib / 2) as usize], 1));
        assert!(matches!(result, Err(VaultError::QuotaExceeded { .. })));
        assert_eq!(f.store.get_upload(pending.id).unwrap(), None);
        assert_eq!(user_total(&f.store, f.user), 50 * mib);
    }

    #[test]
    fn enqueue_preflight_denies_oversized_uploads() {
        let f = fixture();
        let result = f
            .registry
            .enqueue(f.user, f.vault, "huge.raw", 51 * 1024 * 1024, 0);
        assert!(matches!(result, Err(VaultError::QuotaExceeded { .. })));
        assert!(f.store.uploads_by_vault(f.vault).unwrap().is_empty());
    }

    #[test]
    fn empty_names_and_zero_sizes_are_rejected() {
        let f = fixture();
        assert!(matches!(
            f.registry.enqueue(f.user, f.vault, "  ", 3, 0),
            Err(VaultError::ValidationFailed(_))
        ));
        assert!(matches!(
            f.registry.enqueue(f.user, f.vault, "a.jpg", 0, 0),
            Err(VaultError::ValidationFailed(_))
        ));
    }

    #[test]
    fn recovered_upload_lands_after_every_active_one() {
        let f = fixture();
        let a = upload(&f, "a.jpg", b"a");
        let b = upload(&f, "b.jpg", b"b");
        let c = upload(&f, "c.jpg", b"c");

        f.registry.trash(f.user, a.id, 10).unwrap();
        let trashed = f.store.get_upload(a.id).unwrap().unwrap();
        assert_eq!(trashed.order_index, -1);

        let recovered = f.registry.recover(f.user, a.id).unwrap();
        assert!(recovered.order_index > b.order_index);
        assert!(recovered.order_index > c.order_index);

        let ids: Vec<UploadId> = f
            .registry
            .list(f.user, f.vault, UploadFilter::Active)
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec![b.id, c.id, a.id]);
    }

    #[test]
    fn trash_and_recover_are_idempotent() {
        let f = fixture();
        let a = upload(&f, "a.jpg", b"a");
        let first = f.registry.trash(f.user, a.id, 10).unwrap();
        let second = f.registry.trash(f.user, a.id, 20).unwrap();
        assert_eq!(first.deleted_at, second.deleted_at);

        let active = upload(&f, "b.jpg", b"b");
        let untouched = f.registry.recover(f.user, active.id).unwrap();
        assert_eq!(untouched.order_index, active.order_index);
    }

    #[test]
    fn failed_blob_delete_restores_the_row() {
        let f = fixture();
        let a = upload(&f, "a.jpg", b"abc");
        f.blobs.fail_deletes.set(true);

        let result = block_on(f.registry.delete(f.user, a.id));
        assert!(matches!(result, Err(VaultError::StorageTransferFailed(_))));
        assert_eq!(f.store.get_upload(a.id).unwrap(), Some(a));
        assert_eq!(user_total(&f.store, f.user), 3);
    }

    #[test]
    fn missing_blob_counts_as_deleted() {
        let f = fixture();
        let a = upload(&f, "a.jpg", b"abc");
        f.blobs.objects.borrow_mut().clear();

        block_on(f.registry.delete(f.user, a.id)).unwrap();
        assert_eq!(f.store.get_upload(a.id).unwrap(), None);
        assert_eq!(vault_total(&f.store, f.vault), 0);
    }

    #[test]
    fn reorder_writes_nothing_when_any_entry_is_invalid() {
        let f = fixture();
        let a = upload(&f, "a.jpg", b"a");
        let b = upload(&f, "b.jpg", b"b");
        f.registry.trash(f.user, b.id, 5).unwrap();

        let result = f.registry.reorder(
            f.user,
            &[
                OrderUpdate { id: a.id, order_index: 9 },
                OrderUpdate { id: b.id, order_index: 0 },
            ],
        );
        assert!(matches!(result, Err(VaultError::ValidationFailed(_))));
        assert_eq!(f.store.get_upload(a.id).unwrap().unwrap().order_index, a.order_index);

        let negative = f
            .registry
            .reorder(f.user, &[OrderUpdate { id: a.id, order_index: -3 }]);
        assert!(matches!(negative, Err(VaultError::ValidationFailed(_))));

        f.registry
            .reorder(f.user, &[OrderUpdate { id: a.id, order_index: 9 }])
            .unwrap();
        assert_eq!(f.store.get_upload(a.id).unwrap().unwrap().order_index, 9);
    }

    #[test]
    fn strangers_cannot_touch_uploads() {
        let f = fixture();
        let a = upload(&f, "a.jpg", b"a");
        let stranger = register_user(&f.store, "x@example.com", PlanType::Pro);

        assert!(matches!(
            f.registry.trash(stranger.id, a.id, 1),
            Err(VaultError::Forbidden(_))
        ));
        assert!(matches!(
            block_on(f.registry.fetch(stranger.id, a.id)),
            Err(VaultError::Forbidden(_))
        ));
        assert!(matches!(
            f.registry.enqueue(stranger.id, f.vault, "b.jpg", 1, 0),
            Err(VaultError::Forbidden(_))
        ));
    }

    #[test]
    fn fetch_returns_committed_bytes_only() {
        let f = fixture();
        let a = upload(&f, "a.jpg", b"pixels");
        let (_, bytes) = block_on(f.registry.fetch(f.user, a.id)).unwrap();
        assert_eq!(bytes, b"pixels".to_vec());

        let pending = f.registry.enqueue(f.user, f.vault, "b.jpg", 1, 0).unwrap();
        assert!(matches!(
            block_on(f.registry.fetch(f.user, pending.id)),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn concurrent_uploads_get_distinct_positions() {
        let f = fixture();
        f.blobs.yield_on_put.set(true);

        let first = async {
            let pending = f.registry.enqueue(f.user, f.vault, "a.jpg", 2, 0).unwrap();
            f.registry.commit(f.user, pending.id, vec![1, 1], 1).await
        };
        let second = async {
            let pending = f.registry.enqueue(f.user, f.vault, "b.jpg", 3, 0).unwrap();
            f.registry.commit(f.user, pending.id, vec![2, 2, 2], 1).await
        };
        let (a, b) = block_on(async { futures::join!(first, second) });
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.order_index, b.order_index);
        assert_eq!(vault_total(&f.store, f.vault), 5);
        assert_eq!(user_total(&f.store, f.user), 5);
    }

    #[test]
    fn reconcile_during_a_transfer_keeps_the_reservation() {
        let f = fixture();
        f.blobs.yield_on_put.set(true);
        let ledger = QuotaLedger::new(f.store.clone());
        let pending = f.registry.enqueue(f.user, f.vault, "a.jpg", 3, 0).unwrap();

        let (committed, corrected) = block_on(async {
            futures::join!(
                f.registry.commit(f.user, pending.id, vec![5, 5, 5], 1),
                async { ledger.reconcile_all() }
            )
        });
        committed.unwrap();
        assert!(corrected.unwrap().is_empty());
        assert_eq!(vault_total(&f.store, f.vault), 3);
        assert_eq!(user_total(&f.store, f.user), 3);
        assert!(ledger.reconcile_all().unwrap().is_empty());
    }

    #[test]
    fn overlapping_commits_keep_the_first_blob() {
        let f = fixture();
        f.blobs.yield_on_put.set(true);
        let pending = f.registry.enqueue(f.user, f.vault, "a.jpg", 3, 0).unwrap();

        let (first, second) = block_on(async {
            futures::join!(
                f.registry.commit(f.user, pending.id, vec![1, 1, 1], 1),
                f.registry.commit(f.user, pending.id, vec![2, 2, 2], 1)
            )
        });
        let first = first.unwrap();
        assert!(matches!(second, Err(VaultError::Conflict(_))));

        let (_, stored) = block_on(f.registry.fetch(f.user, pending.id)).unwrap();
        assert_eq!(stored, vec![1, 1, 1]);
        assert_eq!(first.sha256, Some(calculate_sha256_hex(&[1, 1, 1])));
        assert_eq!(user_total(&f.store, f.user), 3);
        assert_eq!(vault_total(&f.store, f.vault), 3);
    }

    #[test]
    fn chunked_upload_is_assembled_and_committed() {
        let f = fixture();
        let size = (MAX_CHUNK_BYTES + 10) as u64;
        let pending = f.registry.enqueue(f.user, f.vault, "big.jpg", size, 0).unwrap();

        assert_eq!(
            f.registry
                .put_chunk(f.user, pending.id, 0, vec![1; MAX_CHUNK_BYTES])
                .unwrap(),
            1
        );
        // A retried chunk with the same bytes is accepted again.
        assert_eq!(
            f.registry
                .put_chunk(f.user, pending.id, 0, vec![1; MAX_CHUNK_BYTES])
                .unwrap(),
            1
        );
        assert_eq!(f.registry.put_chunk(f.user, pending.id, 1, vec![2; 10]).unwrap(), 2);

        let committed = block_on(f.registry.finish_chunked(f.user, pending.id, 5)).unwrap();
        assert_eq!(committed.size, size);
        let (_, bytes) = block_on(f.registry.fetch(f.user, pending.id)).unwrap();
        assert_eq!(bytes.len(), MAX_CHUNK_BYTES + 10);
        assert_eq!(&bytes[MAX_CHUNK_BYTES..], &[2; 10]);
        assert_eq!(user_total(&f.store, f.user), size);

        assert!(matches!(
            f.registry.put_chunk(f.user, pending.id, 0, vec![1; MAX_CHUNK_BYTES]),
            Err(VaultError::Conflict(_))
        ));
    }

    #[test]
    fn out_of_order_or_missized_chunks_are_rejected() {
        let f = fixture();
        let size = (2 * MAX_CHUNK_BYTES + 1) as u64;
        let pending = f.registry.enqueue(f.user, f.vault, "big.jpg", size, 0).unwrap();

        let rejected = [
            f.registry.put_chunk(f.user, pending.id, 1, vec![0; MAX_CHUNK_BYTES]),
            f.registry.put_chunk(f.user, pending.id, 0, vec![0; MAX_CHUNK_BYTES + 1]),
            f.registry.put_chunk(f.user, pending.id, 0, vec![0; 7]),
            f.registry.put_chunk(f.user, pending.id, 2, vec![0; 2]),
            f.registry.put_chunk(f.user, pending.id, 3, vec![0; 1]),
        ];
        for result in rejected {
            assert!(matches!(result, Err(VaultError::ValidationFailed(_))));
        }

        f.registry
            .put_chunk(f.user, pending.id, 0, vec![0; MAX_CHUNK_BYTES])
            .unwrap();
        assert!(matches!(
            f.registry.put_chunk(f.user, pending.id, 0, vec![9; MAX_CHUNK_BYTES]),
            Err(VaultError::ValidationFailed(_))
        ));

        // Finishing early keeps the chunks and the pending row.
        assert!(matches!(
            block_on(f.registry.finish_chunked(f.user, pending.id, 1)),
            Err(VaultError::ValidationFailed(_))
        ));
        assert!(f.store.get_upload(pending.id).unwrap().is_some());
        assert_eq!(
            f.registry
                .put_chunk(f.user, pending.id, 1, vec![0; MAX_CHUNK_BYTES])
                .unwrap(),
            2
        );
        assert_eq!(f.registry.put_chunk(f.user, pending.id, 2, vec![0; 1]).unwrap(), 3);
        block_on(f.registry.finish_chunked(f.user, pending.id, 2)).unwrap();
        assert_eq!(vault_total(&f.store, f.vault), size);
    }

    #[test]
    fn files_over_the_per_file_limit_are_rejected() {
        let f = fixture();
        f.store.update_user_plan(f.user, PlanType::Pro).unwrap();
        assert!(matches!(
            f.registry.enqueue(f.user, f.vault, "movie.mov", MAX_UPLOAD_BYTES + 1, 0),
            Err(VaultError::ValidationFailed(_))
        ));
    }
}
