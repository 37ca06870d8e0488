use candid::{CandidType, Principal};
use serde::Deserialize;

/// Install and upgrade arguments. Optional fields fall back to the values in `storage::config`.
#[derive(CandidType, Deserialize, Debug, Clone)]
pub struct InitArgs {
    pub admin_principal: Principal,
    /// HTTPS endpoint of the transactional mail API used for release notices.
    pub mailer_endpoint: Option<String>,
    pub mailer_sender: Option<String>,
    pub release_interval_secs: Option<u64>,
    pub outcall_cycles: Option<u128>,
}
