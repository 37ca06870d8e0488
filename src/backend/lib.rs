// src/backend/lib.rs

pub mod api;
pub mod error;
pub mod metrics;
pub mod models;
pub mod runtime;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod testing;

use crate::storage::config::init_config;
use std::time::Duration;

/// Seeds the RNG once the install/upgrade call has finished; `raw_rand` cannot be awaited in `init`.
fn schedule_rng_seed() {
    ic_cdk_timers::set_timer(Duration::ZERO, || {
        ic_cdk::spawn(async {
            if let Err(e) = utils::rng::initialize_internal_rng().await {
                log_error!("RNG seeding failed: {}", e);
            }
        })
    });
}

fn start_release_timer(interval_secs: u64) {
    ic_cdk_timers::set_timer_interval(Duration::from_secs(interval_secs), || {
        ic_cdk::spawn(async {
            let now = utils::time::get_current_time_ns();
            if let Err(e) = runtime::runtime().scheduler().tick(now).await {
                log_error!("Release sweep failed: {}", e);
            }
        })
    });
    log_scheduler!("Release sweep scheduled every {}s", interval_secs);
}

#[ic_cdk::init]
fn init(args: InitArgs) {
    let config = init_config(args);
    schedule_rng_seed();
    start_release_timer(config.release_interval_secs);
    log_info!("Capsule backend canister initialized.");
}

// Timers do not survive upgrades; re-arm them.
#[ic_cdk::post_upgrade]
fn post_upgrade(args: InitArgs) {
    let config = init_config(args);
    schedule_rng_seed();
    start_release_timer(config.release_interval_secs);
    log_info!("Capsule backend canister upgraded.");
}

// Endpoint argument and result types, referenced by name in the generated interface.
#[allow(unused_imports)]
use crate::{api::*, error::VaultError, metrics::VaultMetrics, models::*, services::*};

// Export Candid interface
ic_cdk::export_candid!();
