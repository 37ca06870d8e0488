// src/backend/storage/mod.rs
// Stable memory persistence built on ic-stable-structures

pub mod blobs;
pub mod config;
pub mod memory;
pub mod stable_store;
pub mod storable;
pub mod traits;

// Re-export key storage types for easier access
pub use blobs::StableBlobStore;
pub use memory::Memory;
pub use stable_store::StableStore;
pub use storable::{Cbor, StorableString};
pub use traits::{BlobError, LedgerUpdate, ObjectStore, RelationalStore, StoreError};
