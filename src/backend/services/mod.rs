pub mod notifier;
pub mod quota_service;
pub mod scheduler;
pub mod upload_service;
pub mod user_service;
pub mod vault_service;

pub use notifier::{HttpsMailer, Notifier, NotifyError};
pub use quota_service::{QuotaLedger, ReconcileReport, Reservation};
pub use scheduler::{ReleaseReport, ReleaseScheduler};
pub use upload_service::{ChunkBuffer, UploadRegistry};
pub use user_service::UserDirectory;
pub use vault_service::{DeletionReport, VaultLifecycle};
