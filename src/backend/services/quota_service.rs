// src/backend/services/quota_service.rs
use crate::error::VaultError;
use crate::models::{StorageBytes, User, UserId, VaultId};
use crate::storage::RelationalStore;
use candid::CandidType;
use serde::Deserialize;

/// Bytes a successful `check_and_reserve` added to both counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub user_id: UserId,
    pub vault_id: VaultId,
    pub bytes: StorageBytes,
}

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VaultDrift {
    pub vault_id: VaultId,
    pub recorded: StorageBytes,
    pub actual: StorageBytes,
}

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ReconcileReport {
    pub user_id: UserId,
    pub recorded_total: StorageBytes,
    pub actual_total: StorageBytes,
    pub vault_drifts: Vec<VaultDrift>,
}

impl ReconcileReport {
    pub fn has_drift(&self) -> bool {
        self.recorded_total != self.actual_total || !self.vault_drifts.is_empty()
    }
}

/// Per-user and per-vault storage accounting against the plan table.
#[derive(Clone)]
pub struct QuotaLedger<S> {
    store: S,
}

impl<S: RelationalStore> QuotaLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn load_user(&self, user_id: UserId) -> Result<User, VaultError> {
        self.store
            .get_user(user_id)?
            .ok_or_else(|| VaultError::NotFound(format!("user {}", user_id)))
    }

    /// Read-only preflight. Run before any side effect; the authoritative check is `check_and_reserve`.
    pub fn check(&self, user_id: UserId, incoming: StorageBytes) -> Result<(), VaultError> {
        let user = self.load_user(user_id)?;
        let limit = user.plan.limits().max_storage_bytes;
        match user.total_storage_used.checked_add(incoming) {
            Some(total) if total <= limit => Ok(()),
            _ => Err(VaultError::QuotaExceeded {
                used: user.total_storage_used,
                requested: incoming,
                limit,
            }),
        }
    }

    /// Atomically adds `incoming` to the user counter (refusing to cross the plan limit), then to
    /// the vault counter. A failed vault increment undoes the user increment.
    pub fn check_and_reserve(
        &self,
        user_id: UserId,
        vault_id: VaultId,
        incoming: StorageBytes,
    ) -> Result<Reservation, VaultError> {
        let limit = self.load_user(user_id)?.plan.limits().max_storage_bytes;
        let user_update = self
            .store
            .increment_user_storage(user_id, incoming, limit)?;

        if let Err(e) = self.store.increment_vault_storage(vault_id, incoming) {
            crate::log_error!(
                "Vault {} counter increment failed, undoing user {} reservation of {} bytes: {}",
                vault_id,
                user_id,
                incoming,
                e
            );
            self.store.decrement_user_storage(user_id, incoming)?;
            return Err(e.into());
        }

        crate::log_info!(
            "Reserved {} bytes for user {} in vault {} ({} -> {})",
            incoming,
            user_id,
            vault_id,
            user_update.previous,
            user_update.current
        );
        Ok(Reservation {
            user_id,
            vault_id,
            bytes: incoming,
        })
    }

    /// Gives back a reservation. Counters clamp at zero; a clamp means the ledger had drifted.
    pub fn release(&self, reservation: &Reservation) -> Result<(), VaultError> {
        let user_update = self
            .store
            .decrement_user_storage(reservation.user_id, reservation.bytes)?;
        if user_update.clamped {
            crate::log_warn!(
                "Ledger drift: user {} had {} bytes, releasing {} clamped to zero",
                reservation.user_id,
                user_update.previous,
                reservation.bytes
            );
        }
        let vault_update = self
            .store
            .decrement_vault_storage(reservation.vault_id, reservation.bytes)?;
        if vault_update.clamped {
            crate::log_warn!(
                "Ledger drift: vault {} had {} bytes, releasing {} clamped to zero",
                reservation.vault_id,
                vault_update.previous,
                reservation.bytes
            );
        }
        Ok(())
    }

    /// Recomputes a user's counters from the uploads that hold quota: committed ones that were
    /// not permanently deleted, and ones whose commit is still transferring. Trashed uploads
    /// still occupy storage and are counted.
    pub fn reconcile_user(&self, user_id: UserId) -> Result<ReconcileReport, VaultError> {
        let user = self.load_user(user_id)?;
        let mut vault_drifts = Vec::new();
        let mut actual_total: StorageBytes = 0;

        for vault in self.store.vaults_by_owner(user_id)? {
            let actual: StorageBytes = self
                .store
                .uploads_by_vault(vault.id)?
                .iter()
                .filter(|upload| upload.holds_quota())
                .map(|upload| upload.size)
                .sum();
            if actual != vault.total_storage_used {
                self.store.set_vault_storage(vault.id, actual)?;
                vault_drifts.push(VaultDrift {
                    vault_id: vault.id,
                    recorded: vault.total_storage_used,
                    actual,
                });
            }
            actual_total = actual_total.saturating_add(actual);
        }

        if actual_total != user.total_storage_used {
            self.store.set_user_storage(user_id, actual_total)?;
        }

        let report = ReconcileReport {
            user_id,
            recorded_total: user.total_storage_used,
            actual_total,
            vault_drifts,
        };
        if report.has_drift() {
            crate::log_warn!(
                "Reconciled user {}: recorded {} bytes, actual {} bytes, {} vault(s) corrected",
                user_id,
                report.recorded_total,
                report.actual_total,
                report.vault_drifts.len()
            );
        }
        Ok(report)
    }

    /// Reconciles every user and returns only the reports that corrected something.
    pub fn reconcile_all(&self) -> Result<Vec<ReconcileReport>, VaultError> {
        let mut corrected = Vec::new();
        for user_id in self.store.list_user_ids()? {
            let report = self.reconcile_user(user_id)?;
            if report.has_drift() {
                corrected.push(report);
            }
        }
        Ok(corrected)
    }
}
