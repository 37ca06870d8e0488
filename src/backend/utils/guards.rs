// src/backend/utils/guards.rs
use crate::error::VaultError;
use crate::models::{Upload, UploadId, UserId, Vault, VaultId};
use crate::storage::RelationalStore;
use candid::Principal;

/// Loads a vault and checks that `user` owns it.
///
/// # Errors
///
/// `NotFound` if the vault does not exist, `Forbidden` if someone else owns it.
pub fn load_owned_vault<S: RelationalStore>(
    store: &S,
    user: UserId,
    vault_id: VaultId,
) -> Result<Vault, VaultError> {
    let vault = store
        .get_vault(vault_id)?
        .ok_or_else(|| VaultError::NotFound(format!("vault {}", vault_id)))?;
    if vault.owner != user {
        return Err(VaultError::Forbidden(format!(
            "vault {} belongs to another user",
            vault_id
        )));
    }
    Ok(vault)
}

/// Loads an upload together with its vault, checking ownership through the vault.
pub fn load_owned_upload<S: RelationalStore>(
    store: &S,
    user: UserId,
    upload_id: UploadId,
) -> Result<(Upload, Vault), VaultError> {
    let upload = store
        .get_upload(upload_id)?
        .ok_or_else(|| VaultError::NotFound(format!("upload {}", upload_id)))?;
    let vault = load_owned_vault(store, user, upload.vault_id)?;
    Ok((upload, vault))
}

/// Checks if the caller is the designated admin principal.
pub fn check_admin(caller: Principal, admin_principal: Principal) -> Result<(), VaultError> {
    if caller == admin_principal {
        Ok(())
    } else {
        Err(VaultError::Forbidden("caller is not the admin".to_string()))
    }
}
