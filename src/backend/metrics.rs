// src/backend/metrics.rs
use crate::models::common::{StorageBytes, Timestamp};
use crate::storage::memory::{get_metrics_memory, Memory};
use crate::storage::Cbor;
use candid::CandidType;
use ic_stable_structures::StableCell;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

/// Canister-wide counters, kept in their own stable cell so they survive upgrades.
#[derive(CandidType, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct VaultMetrics {
    pub total_vaults: u64,
    pub uploads_committed_total: u64,
    pub uploads_deleted_total: u64,
    pub releases_total: u64,
    pub release_notice_failures_total: u64,
    pub storage_used_bytes: StorageBytes,
    pub scheduler_last_run: Option<Timestamp>,
    pub last_reconcile_at: Option<Timestamp>,
}

type StorableVaultMetrics = Cbor<VaultMetrics>;

thread_local! {
    static METRICS_CELL: RefCell<StableCell<StorableVaultMetrics, Memory>> = RefCell::new(
        StableCell::init(get_metrics_memory(), Cbor(VaultMetrics::default()))
            .expect("Failed to initialize metrics stable cell")
    );
}

pub fn get_metrics() -> VaultMetrics {
    METRICS_CELL.with(|cell| cell.borrow().get().0.clone())
}

/// Applies `update_fn` to the stored metrics. Metrics never fail the calling operation.
fn update_metrics<F>(update_fn: F)
where
    F: FnOnce(&mut VaultMetrics),
{
    METRICS_CELL.with(|cell| {
        let mut metrics = cell.borrow().get().0.clone();
        update_fn(&mut metrics);
        if let Err(e) = cell.borrow_mut().set(Cbor(metrics)) {
            crate::log_warn!("Failed to update metrics: {:?}", e);
        }
    })
}

// --- Metrics Update Helpers ---

pub fn record_vault_created() {
    update_metrics(|m| m.total_vaults = m.total_vaults.saturating_add(1));
}

pub fn record_vault_deleted() {
    update_metrics(|m| m.total_vaults = m.total_vaults.saturating_sub(1));
}

pub fn record_upload_committed(bytes: StorageBytes) {
    update_metrics(|m| {
        m.uploads_committed_total = m.uploads_committed_total.saturating_add(1);
        m.storage_used_bytes = m.storage_used_bytes.saturating_add(bytes);
    });
}

pub fn record_upload_deleted(bytes: StorageBytes) {
    update_metrics(|m| {
        m.uploads_deleted_total = m.uploads_deleted_total.saturating_add(1);
        m.storage_used_bytes = m.storage_used_bytes.saturating_sub(bytes);
    });
}

pub fn record_release_sweep(now: Timestamp, released: u64, notify_failures: u64) {
    update_metrics(|m| {
        m.releases_total = m.releases_total.saturating_add(released);
        m.release_notice_failures_total =
            m.release_notice_failures_total.saturating_add(notify_failures);
        m.scheduler_last_run = Some(now);
    });
}

pub fn record_reconcile(now: Timestamp) {
    update_metrics(|m| m.last_reconcile_at = Some(now));
}

pub fn last_reconcile_at() -> Option<Timestamp> {
    get_metrics().last_reconcile_at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_counter_saturates_at_zero() {
        record_upload_committed(10);
        record_upload_deleted(25);
        let metrics = get_metrics();
        assert_eq!(metrics.storage_used_bytes, 0);
        assert_eq!(metrics.uploads_committed_total, 1);
        assert_eq!(metrics.uploads_deleted_total, 1);
    }
}
