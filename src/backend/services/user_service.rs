// src/backend/services/user_service.rs
use crate::error::VaultError;
use crate::models::{NewUser, PlanType, Timestamp, User, UserId};
use crate::storage::RelationalStore;
use candid::Principal;
use validator::ValidateEmail;

/// Maps caller principals to registered users and manages their plan.
#[derive(Clone)]
pub struct UserDirectory<S> {
    store: S,
}

impl<S: RelationalStore> UserDirectory<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn register(
        &self,
        principal: Principal,
        email: &str,
        display_name: &str,
        plan: PlanType,
        now: Timestamp,
    ) -> Result<User, VaultError> {
        if principal == Principal::anonymous() {
            return Err(VaultError::Unauthorized(
                "anonymous callers cannot register".to_string(),
            ));
        }
        let email = email.trim().to_lowercase();
        if !email.validate_email() {
            return Err(VaultError::ValidationFailed(format!(
                "'{}' is not a valid email address",
                email
            )));
        }

        let user = self.store.insert_user(NewUser {
            principal,
            email,
            display_name: display_name.trim().to_string(),
            plan,
            created_at: now,
        })?;
        crate::log_info!("Registered user {} for principal {}", user.id, principal);
        Ok(user)
    }

    /// Resolves the caller to a registered user.
    pub fn resolve(&self, principal: &Principal) -> Result<User, VaultError> {
        if *principal == Principal::anonymous() {
            return Err(VaultError::Unauthorized(
                "anonymous caller".to_string(),
            ));
        }
        self.store
            .find_user_by_principal(principal)?
            .ok_or_else(|| VaultError::Unauthorized("caller is not registered".to_string()))
    }

    pub fn get(&self, user_id: UserId) -> Result<User, VaultError> {
        self.store
            .get_user(user_id)?
            .ok_or_else(|| VaultError::NotFound(format!("user {}", user_id)))
    }

    /// Switches plan. A downgrade below current usage or vault count is refused.
    pub fn change_plan(&self, user_id: UserId, plan: PlanType) -> Result<User, VaultError> {
        let user = self.get(user_id)?;
        let limits = plan.limits();
        if user.total_storage_used > limits.max_storage_bytes {
            return Err(VaultError::QuotaExceeded {
                used: user.total_storage_used,
                requested: 0,
                limit: limits.max_storage_bytes,
            });
        }
        let vault_count = self.store.vaults_by_owner(user_id)?.len() as u64;
        if vault_count > u64::from(limits.max_vaults) {
            return Err(VaultError::QuotaExceeded {
                used: vault_count,
                requested: 0,
                limit: u64::from(limits.max_vaults),
            });
        }

        let updated = self.store.update_user_plan(user_id, plan)?;
        crate::log_info!("User {} moved from {:?} to {:?}", user_id, user.plan, plan);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fresh_store, new_vault};

    fn principal(n: u8) -> Principal {
        Principal::from_slice(&[n; 10])
    }

    #[test]
    fn register_then_resolve() {
        let directory = UserDirectory::new(fresh_store());
        let user = directory
            .register(principal(1), " Ann@Example.COM ", "Ann", PlanType::Free, 5)
            .unwrap();
        assert_eq!(user.email, "ann@example.com");
        assert_eq!(user.total_storage_used, 0);
        assert_eq!(directory.resolve(&principal(1)).unwrap(), user);
    }

    #[test]
    fn duplicates_and_bad_input_are_rejected() {
        let directory = UserDirectory::new(fresh_store());
        directory
            .register(principal(1), "ann@example.com", "Ann", PlanType::Free, 0)
            .unwrap();

        assert!(matches!(
            directory.register(principal(2), "ANN@example.com", "Other", PlanType::Free, 0),
            Err(VaultError::Conflict(_))
        ));
        assert!(matches!(
            directory.register(principal(1), "bob@example.com", "Bob", PlanType::Free, 0),
            Err(VaultError::Conflict(_))
        ));
        assert!(matches!(
            directory.register(principal(3), "not-an-email", "Eve", PlanType::Free, 0),
            Err(VaultError::ValidationFailed(_))
        ));
        assert!(matches!(
            directory.register(Principal::anonymous(), "anon@example.com", "Anon", PlanType::Free, 0),
            Err(VaultError::Unauthorized(_))
        ));
    }

    #[test]
    fn unregistered_and_anonymous_callers_are_unauthorized() {
        let directory = UserDirectory::new(fresh_store());
        assert!(matches!(
            directory.resolve(&principal(9)),
            Err(VaultError::Unauthorized(_))
        ));
        assert!(matches!(
            directory.resolve(&Principal::anonymous()),
            Err(VaultError::Unauthorized(_))
        ));
    }

    #[test]
    fn downgrade_below_usage_is_refused() {
        let store = fresh_store();
        let directory = UserDirectory::new(store.clone());
        let user = directory
            .register(principal(1), "ann@example.com", "Ann", PlanType::Pro, 0)
            .unwrap();
        for title in ["a", "b", "c", "d"] {
            new_vault(&store, user.id, title);
        }

        assert!(matches!(
            directory.change_plan(user.id, PlanType::Free),
            Err(VaultError::QuotaExceeded { used: 4, limit: 3, .. })
        ));
        store.set_user_storage(user.id, 60 * 1024 * 1024).unwrap();
        assert!(matches!(
            directory.change_plan(user.id, PlanType::Free),
            Err(VaultError::QuotaExceeded { .. })
        ));
        assert_eq!(directory.change_plan(user.id, PlanType::Pro).unwrap().plan, PlanType::Pro);
    }
}
