// src/backend/runtime.rs
// Canister-wide handles to the stable stores, shared by every endpoint.

use crate::services::{
    ChunkBuffer, HttpsMailer, QuotaLedger, ReleaseScheduler, UploadRegistry, UserDirectory,
    VaultLifecycle,
};
use crate::storage::memory::with_memory_manager;
use crate::storage::{StableBlobStore, StableStore};

/// Cheap to clone: every field is a shared handle.
#[derive(Clone)]
pub struct Runtime {
    pub store: StableStore,
    pub blobs: StableBlobStore,
    pub mailer: HttpsMailer,
    /// Heap-only; unfinished chunked uploads do not survive an upgrade.
    pub chunks: ChunkBuffer,
}

thread_local! {
    static RUNTIME: Runtime = with_memory_manager(|manager| Runtime {
        store: StableStore::init(manager),
        blobs: StableBlobStore::init(manager),
        mailer: HttpsMailer,
        chunks: ChunkBuffer::default(),
    });
}

/// Clones the handles out so async endpoints never hold the thread-local across an await.
pub fn runtime() -> Runtime {
    RUNTIME.with(Runtime::clone)
}

impl Runtime {
    pub fn users(&self) -> UserDirectory<StableStore> {
        UserDirectory::new(self.store.clone())
    }

    pub fn vaults(&self) -> VaultLifecycle<StableStore, StableBlobStore> {
        VaultLifecycle::new(self.store.clone(), self.blobs.clone())
            .with_chunk_buffer(self.chunks.clone())
    }

    pub fn uploads(&self) -> UploadRegistry<StableStore, StableBlobStore> {
        UploadRegistry::new(self.store.clone(), self.blobs.clone())
            .with_chunk_buffer(self.chunks.clone())
    }

    pub fn scheduler(&self) -> ReleaseScheduler<StableStore, HttpsMailer> {
        ReleaseScheduler::new(self.store.clone(), self.mailer.clone())
    }

    pub fn ledger(&self) -> QuotaLedger<StableStore> {
        QuotaLedger::new(self.store.clone())
    }
}
