// src/backend/error.rs
use crate::storage::traits::{BlobError, StoreError};
use candid::CandidType;
use serde::Deserialize;
use thiserror::Error;

/// Every failure the vault engine reports to callers.
///
/// Messages are written by the services themselves; raw adapter errors are
/// logged where they happen and never forwarded verbatim.
#[derive(CandidType, Deserialize, Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage limit exceeded for plan: {used} bytes used, {requested} requested, limit {limit}")]
    QuotaExceeded { used: u64, requested: u64, limit: u64 },

    #[error("Storage transfer failed: {0}")]
    StorageTransferFailed(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl VaultError {
    /// Transfer and persistence failures may succeed on a bounded retry;
    /// every other kind is final for the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::StorageTransferFailed(_) | VaultError::PersistenceFailed(_)
        )
    }
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => VaultError::NotFound(what),
            StoreError::Conflict(what) => VaultError::Conflict(what),
            StoreError::LimitExceeded {
                used,
                requested,
                limit,
            } => VaultError::QuotaExceeded {
                used,
                requested,
                limit,
            },
            StoreError::Backend(detail) => {
                crate::log_error!("relational store failure: {}", detail);
                VaultError::PersistenceFailed("metadata store unavailable".to_string())
            }
        }
    }
}

impl From<BlobError> for VaultError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound(key) => {
                crate::log_warn!("object {} missing from blob store", key);
                VaultError::NotFound("stored object is missing".to_string())
            }
            BlobError::Unavailable(detail) => {
                crate::log_error!("blob store failure: {}", detail);
                VaultError::StorageTransferFailed("object store unavailable".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transfer_and_persistence_failures_are_retryable() {
        assert!(VaultError::StorageTransferFailed("x".into()).is_retryable());
        assert!(VaultError::PersistenceFailed("x".into()).is_retryable());
        assert!(!VaultError::Conflict("x".into()).is_retryable());
        assert!(!VaultError::QuotaExceeded {
            used: 1,
            requested: 1,
            limit: 1
        }
        .is_retryable());
    }

    #[test]
    fn backend_details_are_not_surfaced() {
        let err: VaultError = StoreError::Backend("btree page 7 corrupt".into()).into();
        assert_eq!(
            err,
            VaultError::PersistenceFailed("metadata store unavailable".to_string())
        );
    }
}
