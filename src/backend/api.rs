// src/backend/api.rs
// Candid endpoints. Each one resolves the caller, validates its request and
// hands off to a service; no domain logic lives here.

use crate::{
    error::VaultError,
    metrics::{get_metrics as get_stored_metrics, VaultMetrics},
    models::{
        CoverImage, OrderUpdate, PlanType, Upload, UploadFilter, UploadId, UploadView, User,
        UserId, Vault, VaultId, VaultStatus,
    },
    runtime::runtime,
    services::{DeletionReport, ReconcileReport, ReleaseReport},
    storage::config::get_admin_principal,
    utils::guards::check_admin,
    utils::time::{format_rfc3339, get_current_time_ns, parse_rfc3339},
};
use crate::services::notifier::strip_mailer_response;
use candid::{CandidType, Deserialize};
use ic_cdk::api::management_canister::http_request::{HttpResponse, TransformArgs};
use ic_cdk::caller;
use ic_cdk_macros::{query, update};
use validator::Validate;

// --- Guard Functions ---

fn admin_guard() -> Result<(), VaultError> {
    check_admin(caller(), get_admin_principal())
}

/// Resolves the caller principal to a registered user id.
fn current_user() -> Result<UserId, VaultError> {
    Ok(runtime().users().resolve(&caller())?.id)
}

// --- Validation Helper ---
fn validate_request<T: Validate>(req: &T) -> Result<(), VaultError> {
    req.validate()
        .map_err(|e| VaultError::ValidationFailed(e.to_string()))
}

// --- Request/Response Structs ---

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct RegisterUserRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 100))]
    pub display_name: String,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct ChangePlanRequest {
    pub user_id: UserId,
    pub plan: PlanType,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct CreateVaultRequest {
    #[validate(length(min = 1, max = 120))]
    pub title: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct UpdateVaultRequest {
    pub vault_id: VaultId,
    #[validate(length(min = 1, max = 120))]
    pub title: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct SetUnlockDateRequest {
    pub vault_id: VaultId,
    /// RFC3339, e.g. `2030-01-01T00:00:00Z`. `None` clears the date.
    pub unlock_at: Option<String>,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct UnlockDateResponse {
    pub unlock_at: Option<u64>,
    pub unlock_at_rfc3339: Option<String>,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct ChangeStatusRequest {
    pub vault_id: VaultId,
    pub status: VaultStatus,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct CoverImageRequest {
    pub vault_id: VaultId,
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct CoverImageResponse {
    pub cover: CoverImage,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct EnqueueUploadRequest {
    pub vault_id: VaultId,
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
    #[validate(range(min = 1))]
    pub size: u64,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct CommitUploadRequest {
    pub upload_id: UploadId,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// One piece of a pending upload; see `upload_service::MAX_CHUNK_BYTES`.
#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct UploadChunkRequest {
    pub upload_id: UploadId,
    pub chunk_index: u32,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Enqueue and commit in one call, for files that fit in a single message.
#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct UploadImageRequest {
    pub vault_id: VaultId,
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct ImageResponse {
    pub id: UploadId,
    pub filename: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

// --- User Endpoints ---

#[update]
fn register_user(req: RegisterUserRequest) -> Result<User, VaultError> {
    validate_request(&req)?;
    runtime().users().register(
        caller(),
        &req.email,
        &req.display_name,
        PlanType::Free,
        get_current_time_ns(),
    )
}

#[query]
fn get_profile() -> Result<User, VaultError> {
    runtime().users().resolve(&caller())
}

#[update]
fn change_plan(req: ChangePlanRequest) -> Result<User, VaultError> {
    admin_guard()?;
    runtime().users().change_plan(req.user_id, req.plan)
}

// --- Vault Endpoints ---

#[update]
fn create_vault(req: CreateVaultRequest) -> Result<Vault, VaultError> {
    validate_request(&req)?;
    let user = current_user()?;
    runtime().vaults().create(
        user,
        &req.title,
        req.description.as_deref().unwrap_or_default(),
        get_current_time_ns(),
    )
}

#[query]
fn list_vaults() -> Result<Vec<Vault>, VaultError> {
    let user = current_user()?;
    runtime().vaults().list_owned(user)
}

#[query]
fn get_vault(vault_id: VaultId) -> Result<Vault, VaultError> {
    let user = current_user()?;
    runtime().vaults().get(user, vault_id)
}

#[update]
fn update_vault_details(req: UpdateVaultRequest) -> Result<Vault, VaultError> {
    validate_request(&req)?;
    let user = current_user()?;
    runtime().vaults().update_details(
        user,
        req.vault_id,
        req.title,
        req.description,
        get_current_time_ns(),
    )
}

#[update]
fn set_unlock_date(req: SetUnlockDateRequest) -> Result<Vault, VaultError> {
    let user = current_user()?;
    let unlock_at = req.unlock_at.as_deref().map(parse_rfc3339).transpose()?;
    runtime()
        .vaults()
        .set_unlock_date(user, req.vault_id, unlock_at, get_current_time_ns())
}

#[query]
fn get_unlock_date(vault_id: VaultId) -> Result<UnlockDateResponse, VaultError> {
    let user = current_user()?;
    let unlock_at = runtime().vaults().get_unlock_date(user, vault_id)?;
    Ok(UnlockDateResponse {
        unlock_at,
        unlock_at_rfc3339: unlock_at.and_then(format_rfc3339),
    })
}

#[update]
fn change_vault_status(req: ChangeStatusRequest) -> Result<Vault, VaultError> {
    let user = current_user()?;
    runtime()
        .vaults()
        .change_status(user, req.vault_id, req.status, get_current_time_ns())
}

#[update]
async fn set_cover_image(req: CoverImageRequest) -> Result<CoverImage, VaultError> {
    validate_request(&req)?;
    let user = current_user()?;
    runtime()
        .vaults()
        .set_cover_image(user, req.vault_id, &req.filename, req.data, get_current_time_ns())
        .await
}

#[query]
async fn get_cover_image(vault_id: VaultId) -> Result<CoverImageResponse, VaultError> {
    let user = current_user()?;
    let (cover, data) = runtime().vaults().get_cover_image(user, vault_id).await?;
    Ok(CoverImageResponse { cover, data })
}

#[update]
async fn delete_vault(vault_id: VaultId) -> Result<DeletionReport, VaultError> {
    let user = current_user()?;
    runtime().vaults().delete(user, vault_id).await
}

// --- Upload Endpoints ---

#[update]
fn enqueue_upload(req: EnqueueUploadRequest) -> Result<Upload, VaultError> {
    validate_request(&req)?;
    let user = current_user()?;
    runtime()
        .uploads()
        .enqueue(user, req.vault_id, &req.filename, req.size, get_current_time_ns())
}

#[update]
async fn commit_upload(req: CommitUploadRequest) -> Result<UploadView, VaultError> {
    let user = current_user()?;
    let upload = runtime()
        .uploads()
        .commit(user, req.upload_id, req.data, get_current_time_ns())
        .await?;
    Ok(upload.view())
}

#[update]
fn upload_chunk(req: UploadChunkRequest) -> Result<u32, VaultError> {
    let user = current_user()?;
    runtime()
        .uploads()
        .put_chunk(user, req.upload_id, req.chunk_index, req.data)
}

#[update]
async fn finish_upload(upload_id: UploadId) -> Result<UploadView, VaultError> {
    let user = current_user()?;
    let upload = runtime()
        .uploads()
        .finish_chunked(user, upload_id, get_current_time_ns())
        .await?;
    Ok(upload.view())
}

#[update]
async fn upload_image(req: UploadImageRequest) -> Result<UploadView, VaultError> {
    validate_request(&req)?;
    let user = current_user()?;
    let uploads = runtime().uploads();
    let pending = uploads.enqueue(
        user,
        req.vault_id,
        &req.filename,
        req.data.len() as u64,
        get_current_time_ns(),
    )?;
    let upload = uploads
        .commit(user, pending.id, req.data, get_current_time_ns())
        .await?;
    Ok(upload.view())
}

#[query]
fn list_images(vault_id: VaultId) -> Result<Vec<UploadView>, VaultError> {
    let user = current_user()?;
    runtime().uploads().list(user, vault_id, UploadFilter::Active)
}

#[query]
fn list_trash(vault_id: VaultId) -> Result<Vec<UploadView>, VaultError> {
    let user = current_user()?;
    runtime().uploads().list(user, vault_id, UploadFilter::Trashed)
}

#[query]
async fn get_image(upload_id: UploadId) -> Result<ImageResponse, VaultError> {
    let user = current_user()?;
    let (upload, data) = runtime().uploads().fetch(user, upload_id).await?;
    Ok(ImageResponse {
        id: upload.id,
        filename: upload.filename,
        data,
    })
}

#[update]
fn trash_upload(upload_id: UploadId) -> Result<UploadView, VaultError> {
    let user = current_user()?;
    let upload = runtime()
        .uploads()
        .trash(user, upload_id, get_current_time_ns())?;
    Ok(upload.view())
}

#[update]
fn recover_upload(upload_id: UploadId) -> Result<UploadView, VaultError> {
    let user = current_user()?;
    Ok(runtime().uploads().recover(user, upload_id)?.view())
}

#[update]
async fn delete_upload(upload_id: UploadId) -> Result<(), VaultError> {
    let user = current_user()?;
    runtime().uploads().delete(user, upload_id).await
}

#[update]
fn update_order(updates: Vec<OrderUpdate>) -> Result<(), VaultError> {
    let user = current_user()?;
    runtime().uploads().reorder(user, &updates)
}

// --- Admin Endpoints ---

#[update]
async fn run_release_sweep() -> Result<ReleaseReport, VaultError> {
    admin_guard()?;
    runtime()
        .scheduler()
        .tick(get_current_time_ns())
        .await
}

#[update]
fn reconcile_storage() -> Result<Vec<ReconcileReport>, VaultError> {
    admin_guard()?;
    let corrected = runtime().ledger().reconcile_all()?;
    crate::metrics::record_reconcile(get_current_time_ns());
    Ok(corrected)
}

#[query]
fn get_metrics() -> Result<VaultMetrics, VaultError> {
    admin_guard()?;
    Ok(get_stored_metrics())
}

// --- HTTPS Outcall Transform ---

#[query(hidden = true)]
fn transform_release_notice(args: TransformArgs) -> HttpResponse {
    strip_mailer_response(args.response)
}
