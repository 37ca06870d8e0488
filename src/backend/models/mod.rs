pub mod common;
pub mod cover_image;
pub mod init;
pub mod upload;
pub mod user;
pub mod vault;

// Re-export common types/enums for easier access
pub use common::*;
pub use cover_image::{CoverImage, NewCoverImage};
pub use init::InitArgs;
pub use upload::{NewUpload, OrderUpdate, Upload, UploadFilter, UploadView};
pub use user::{NewUser, User};
pub use vault::{NewVault, Vault};
