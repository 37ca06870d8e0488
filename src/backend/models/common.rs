// src/backend/models/common.rs
use candid::CandidType;
use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type VaultId = u64;
pub type UploadId = u64;
pub type CoverImageId = u64;

pub type Timestamp = u64; // Nanoseconds since epoch
pub type StorageBytes = u64;

pub const NANOS_PER_SECOND: u64 = 1_000_000_000;
pub const NANOS_PER_MINUTE: u64 = 60 * NANOS_PER_SECOND;
pub const NANOS_PER_DAY: u64 = 24 * 60 * NANOS_PER_MINUTE;

/// Order index carried by trashed uploads.
pub const TRASHED_ORDER_INDEX: i64 = -1;

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Copy)]
pub enum VaultStatus {
    Open,           // Contents visible to the owner
    Buried,         // Sealed until the unlock date passes
    PendingRelease, // Claimed by a release sweep, notification in flight
}

/// Who is asking for a status change. The release path is reserved for the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusActor {
    Owner,
    Scheduler,
}

impl VaultStatus {
    /// Transition table for vault status.
    pub fn allows(self, next: VaultStatus, actor: StatusActor) -> bool {
        use VaultStatus::*;
        match (self, next, actor) {
            (from, to, _) if from == to => true,
            (Open, Buried, StatusActor::Owner) => true,
            (Buried, Open, StatusActor::Owner) => true,
            (Buried, PendingRelease, StatusActor::Scheduler) => true,
            (PendingRelease, Open, StatusActor::Scheduler) => true,
            _ => false,
        }
    }
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Copy, Default)]
pub enum PlanType {
    #[default]
    Free,
    Pro,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Copy)]
pub struct PlanLimits {
    pub max_storage_bytes: StorageBytes,
    pub max_vaults: u32,
}

impl PlanType {
    pub const fn limits(self) -> PlanLimits {
        match self {
            PlanType::Free => PlanLimits {
                max_storage_bytes: 50 * 1024 * 1024, // 50 MiB
                max_vaults: 3,
            },
            PlanType::Pro => PlanLimits {
                max_storage_bytes: 10 * 1024 * 1024 * 1024, // 10 GiB
                max_vaults: 50,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_can_bury_and_dig_up() {
        assert!(VaultStatus::Open.allows(VaultStatus::Buried, StatusActor::Owner));
        assert!(VaultStatus::Buried.allows(VaultStatus::Open, StatusActor::Owner));
    }

    #[test]
    fn release_path_is_scheduler_only() {
        assert!(!VaultStatus::Buried.allows(VaultStatus::PendingRelease, StatusActor::Owner));
        assert!(!VaultStatus::PendingRelease.allows(VaultStatus::Open, StatusActor::Owner));
        assert!(VaultStatus::Buried.allows(VaultStatus::PendingRelease, StatusActor::Scheduler));
        assert!(VaultStatus::PendingRelease.allows(VaultStatus::Open, StatusActor::Scheduler));
        assert!(!VaultStatus::Open.allows(VaultStatus::PendingRelease, StatusActor::Scheduler));
    }

    #[test]
    fn plan_table_matches_published_limits() {
        assert_eq!(PlanType::Free.limits().max_storage_bytes, 52_428_800);
        assert_eq!(PlanType::Pro.limits().max_storage_bytes, 10_737_418_240);
        assert_eq!(PlanType::Free.limits().max_vaults, 3);
    }
}
