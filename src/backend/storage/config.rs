// src/backend/storage/config.rs
use crate::models::InitArgs;
use crate::storage::memory::{get_config_memory, Memory};
use crate::storage::storable::Cbor;
use candid::{CandidType, Principal};
use ic_stable_structures::StableCell;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

// Default values (used if init args omit them or the cell is uninitialized)
const DEFAULT_ADMIN_PRINCIPAL: Principal = Principal::management_canister();
const DEFAULT_MAILER_SENDER: &str = "no-reply@capsule.local";
pub const DEFAULT_RELEASE_INTERVAL_SECS: u64 = 60;
const DEFAULT_OUTCALL_CYCLES: u128 = 100_000_000;

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CanisterConfig {
    pub admin: Principal,
    /// Release notices are skipped (and logged) while no endpoint is configured.
    pub mailer_endpoint: Option<String>,
    pub mailer_sender: String,
    pub release_interval_secs: u64,
    pub outcall_cycles: u128,
}

impl Default for CanisterConfig {
    fn default() -> Self {
        Self {
            admin: DEFAULT_ADMIN_PRINCIPAL,
            mailer_endpoint: None,
            mailer_sender: DEFAULT_MAILER_SENDER.to_string(),
            release_interval_secs: DEFAULT_RELEASE_INTERVAL_SECS,
            outcall_cycles: DEFAULT_OUTCALL_CYCLES,
        }
    }
}

impl From<InitArgs> for CanisterConfig {
    fn from(args: InitArgs) -> Self {
        let defaults = CanisterConfig::default();
        Self {
            admin: args.admin_principal,
            mailer_endpoint: args.mailer_endpoint.filter(|url| !url.trim().is_empty()),
            mailer_sender: args.mailer_sender.unwrap_or(defaults.mailer_sender),
            release_interval_secs: args
                .release_interval_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.release_interval_secs),
            outcall_cycles: args.outcall_cycles.unwrap_or(defaults.outcall_cycles),
        }
    }
}

thread_local! {
    static CONFIG: RefCell<StableCell<Cbor<CanisterConfig>, Memory>> = RefCell::new(
        StableCell::init(get_config_memory(), Cbor(CanisterConfig::default()))
            .expect("Failed to initialize config stable cell")
    );
}

/// Stores the configuration derived from install or upgrade arguments.
pub fn init_config(args: InitArgs) -> CanisterConfig {
    let config = CanisterConfig::from(args);
    CONFIG.with(|cell| {
        cell.borrow_mut()
            .set(Cbor(config.clone()))
            .expect("Failed to set canister config");
    });
    crate::log_info!(
        "Configuration initialized: admin={}, interval={}s, mailer={}",
        config.admin,
        config.release_interval_secs,
        config.mailer_endpoint.as_deref().unwrap_or("<disabled>")
    );
    config
}

pub fn get_config() -> CanisterConfig {
    CONFIG.with(|cell| cell.borrow().get().0.clone())
}

pub fn get_admin_principal() -> Principal {
    CONFIG.with(|cell| cell.borrow().get().0.admin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_init_fields_fall_back_to_defaults() {
        let admin = Principal::from_slice(&[7; 29]);
        let stored = init_config(InitArgs {
            admin_principal: admin,
            mailer_endpoint: Some("  ".to_string()),
            mailer_sender: None,
            release_interval_secs: Some(0),
            outcall_cycles: None,
        });

        assert_eq!(stored.mailer_endpoint, None);
        assert_eq!(stored.release_interval_secs, DEFAULT_RELEASE_INTERVAL_SECS);
        assert_eq!(get_admin_principal(), admin);
        assert_eq!(get_config(), stored);
    }
}
