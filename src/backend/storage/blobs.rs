// src/backend/storage/blobs.rs
use crate::storage::memory::{Memory, BLOBS_MEM_ID};
use crate::storage::storable::StorableString;
use crate::storage::traits::{BlobError, ObjectStore};
use crate::storage::Cbor;
use ic_stable_structures::memory_manager::MemoryManager;
use ic_stable_structures::{DefaultMemoryImpl, StableBTreeMap};
use std::cell::RefCell;
use std::rc::Rc;

/// Object store backed by a stable B-tree keyed by storage key.
#[derive(Clone)]
pub struct StableBlobStore {
    blobs: Rc<RefCell<StableBTreeMap<StorableString, Vec<u8>, Memory>>>,
}

impl StableBlobStore {
    pub fn init(manager: &MemoryManager<DefaultMemoryImpl>) -> Self {
        Self {
            blobs: Rc::new(RefCell::new(StableBTreeMap::init(
                manager.get(BLOBS_MEM_ID),
            ))),
        }
    }

    pub fn len(&self) -> u64 {
        self.blobs.borrow().len()
    }
}

impl ObjectStore for StableBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        if key.is_empty() {
            return Err(BlobError::Unavailable("empty storage key".to_string()));
        }
        self.blobs.borrow_mut().insert(Cbor(key.to_string()), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .borrow()
            .get(&Cbor(key.to_string()))
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.blobs
            .borrow_mut()
            .remove(&Cbor(key.to_string()))
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }
}
