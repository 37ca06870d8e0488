// src/backend/services/scheduler.rs
// Periodic release sweep for buried vaults, plus the daily ledger reconcile.

use crate::error::VaultError;
use crate::metrics;
use crate::models::{Timestamp, Vault, VaultId, VaultStatus, NANOS_PER_DAY, NANOS_PER_MINUTE};
use crate::services::notifier::Notifier;
use crate::services::quota_service::QuotaLedger;
use crate::storage::RelationalStore;
use crate::utils::time::truncate_to_minute;
use candid::CandidType;
use serde::Deserialize;

/// A claim older than this is treated as left behind by an interrupted sweep.
const STALE_CLAIM_NANOS: u64 = 10 * NANOS_PER_MINUTE;

#[derive(CandidType, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub released: Vec<VaultId>,
    pub skipped: Vec<VaultId>,
    pub notify_failures: Vec<VaultId>,
    /// Stale claims opened without a notice.
    pub finalized: Vec<VaultId>,
    pub ledger_corrections: u64,
}

#[derive(Clone)]
pub struct ReleaseScheduler<S, N> {
    store: S,
    notifier: N,
    ledger: QuotaLedger<S>,
}

impl<S, N> ReleaseScheduler<S, N>
where
    S: RelationalStore + Clone,
    N: Notifier,
{
    pub fn new(store: S, notifier: N) -> Self {
        Self {
            ledger: QuotaLedger::new(store.clone()),
            store,
            notifier,
        }
    }

    /// One sweep. Each due vault is claimed (`Buried -> PendingRelease`) before its notice is
    /// sent, so overlapping sweeps notify at most once; the vault opens even if the send fails.
    pub async fn tick(&self, now: Timestamp) -> Result<ReleaseReport, VaultError> {
        let now = truncate_to_minute(now);
        crate::log_scheduler!("Starting release sweep at {}", now);
        let mut report = ReleaseReport {
            finalized: self.finalize_stale_claims(now)?,
            ..ReleaseReport::default()
        };

        let due: Vec<Vault> = self
            .store
            .vaults_with_status(VaultStatus::Buried)?
            .into_iter()
            .filter(|vault| vault.is_due(now))
            .collect();

        for vault in due {
            self.release_one(&vault, now, &mut report).await;
        }

        report.ledger_corrections = self.reconcile_if_due(now);
        metrics::record_release_sweep(
            now,
            report.released.len() as u64,
            report.notify_failures.len() as u64,
        );
        crate::log_scheduler!(
            "Release sweep done: {} released, {} skipped, {} notice failure(s)",
            report.released.len(),
            report.skipped.len(),
            report.notify_failures.len()
        );
        Ok(report)
    }

    async fn release_one(&self, vault: &Vault, now: Timestamp, report: &mut ReleaseReport) {
        let owner = match self.store.get_user(vault.owner) {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                crate::log_warn!("Vault {} owner {} not found, skipping", vault.id, vault.owner);
                report.skipped.push(vault.id);
                return;
            }
            Err(e) => {
                crate::log_error!("Could not load owner of vault {}: {}", vault.id, e);
                report.skipped.push(vault.id);
                return;
            }
        };

        match self.store.compare_and_set_status(
            vault.id,
            VaultStatus::Buried,
            VaultStatus::PendingRelease,
            now,
        ) {
            Ok(true) => {}
            Ok(false) => {
                crate::log_scheduler!("Vault {} already claimed, skipping", vault.id);
                report.skipped.push(vault.id);
                return;
            }
            Err(e) => {
                crate::log_error!("Could not claim vault {}: {}", vault.id, e);
                report.skipped.push(vault.id);
                return;
            }
        }

        if let Err(e) = self
            .notifier
            .send_release_notice(&owner.email, vault.id)
            .await
        {
            crate::log_error!("Release notice for vault {} failed: {}", vault.id, e);
            report.notify_failures.push(vault.id);
        }

        match self.store.compare_and_set_status(
            vault.id,
            VaultStatus::PendingRelease,
            VaultStatus::Open,
            now,
        ) {
            Ok(true) => {
                crate::log_scheduler!("Vault {} released", vault.id);
                report.released.push(vault.id);
            }
            Ok(false) => {
                crate::log_warn!("Vault {} left PendingRelease during its sweep", vault.id);
                report.released.push(vault.id);
            }
            Err(e) => {
                // Stays PendingRelease; a later sweep finalizes it without a second notice.
                crate::log_error!("Could not open vault {}: {}", vault.id, e);
            }
        }
    }

    fn finalize_stale_claims(&self, now: Timestamp) -> Result<Vec<VaultId>, VaultError> {
        let mut finalized = Vec::new();
        for vault in self.store.vaults_with_status(VaultStatus::PendingRelease)? {
            if vault.updated_at.saturating_add(STALE_CLAIM_NANOS) > now {
                continue;
            }
            if self.store.compare_and_set_status(
                vault.id,
                VaultStatus::PendingRelease,
                VaultStatus::Open,
                now,
            )? {
                crate::log_warn!("Vault {} had a stale release claim, opened without notice", vault.id);
                finalized.push(vault.id);
            }
        }
        Ok(finalized)
    }

    /// Runs the ledger reconcile when a day has passed since the last one.
    fn reconcile_if_due(&self, now: Timestamp) -> u64 {
        let due = metrics::last_reconcile_at()
            .map_or(true, |last| now.saturating_sub(last) >= NANOS_PER_DAY);
        if !due {
            return 0;
        }
        match self.ledger.reconcile_all() {
            Ok(corrected) => {
                metrics::record_reconcile(now);
                crate::log_scheduler!("Ledger reconcile corrected {} user(s)", corrected.len());
                corrected.len() as u64
            }
            Err(e) => {
                crate::log_error!("Ledger reconcile failed: {}", e);
                0
            }
        }
    }
}
