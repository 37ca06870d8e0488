// src/backend/models/user.rs
use crate::models::common::{PlanType, StorageBytes, Timestamp, UserId};
use candid::{CandidType, Principal};
use serde::{Deserialize, Serialize};

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Caller identity bound at registration.
    pub principal: Principal,
    pub email: String,
    pub display_name: String,
    pub plan: PlanType,
    /// Running ledger total across every owned vault.
    pub total_storage_used: StorageBytes,
    pub is_verified: bool,
    pub created_at: Timestamp,
}

/// Insert payload; the store assigns the id.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub principal: Principal,
    pub email: String,
    pub display_name: String,
    pub plan: PlanType,
    pub created_at: Timestamp,
}
