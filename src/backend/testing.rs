// src/backend/testing.rs
// Fakes and fixtures shared by the unit tests.

use crate::models::{NewUser, NewVault, PlanType, User, UserId, Vault, VaultId};
use crate::services::notifier::{Notifier, NotifyError};
use crate::storage::{BlobError, ObjectStore, RelationalStore, StableStore};
use candid::Principal;
use ic_stable_structures::memory_manager::MemoryManager;
use ic_stable_structures::DefaultMemoryImpl;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

pub fn fresh_store() -> StableStore {
    StableStore::init(&MemoryManager::init(DefaultMemoryImpl::default()))
}

pub fn register_user(store: &StableStore, email: &str, plan: PlanType) -> User {
    let next = store.list_user_ids().unwrap().len() as u8 + 1;
    store
        .insert_user(NewUser {
            principal: Principal::from_slice(&[next; 10]),
            email: email.to_string(),
            display_name: email.split('@').next().unwrap_or(email).to_string(),
            plan,
            created_at: 0,
        })
        .unwrap()
}

pub fn new_vault(store: &StableStore, owner: UserId, title: &str) -> Vault {
    store
        .insert_vault(NewVault {
            owner,
            title: title.to_string(),
            description: String::new(),
            created_at: 0,
        })
        .unwrap()
}

pub fn vault_total(store: &StableStore, vault_id: VaultId) -> u64 {
    store.get_vault(vault_id).unwrap().unwrap().total_storage_used
}

pub fn user_total(store: &StableStore, user_id: UserId) -> u64 {
    store.get_user(user_id).unwrap().unwrap().total_storage_used
}

/// Returns `Pending` once so two joined futures interleave at this point.
struct YieldNow(bool);

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// In-memory object store with failure injection.
#[derive(Clone, Default)]
pub struct MemoryBlobs {
    pub objects: Rc<RefCell<HashMap<String, Vec<u8>>>>,
    pub fail_puts: Rc<Cell<bool>>,
    pub fail_gets: Rc<Cell<bool>>,
    pub fail_deletes: Rc<Cell<bool>>,
    pub yield_on_put: Rc<Cell<bool>>,
}

impl MemoryBlobs {
    pub fn contains(&self, key: &str) -> bool {
        self.objects.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.borrow().len()
    }
}

impl ObjectStore for MemoryBlobs {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        if self.yield_on_put.get() {
            YieldNow(false).await;
        }
        if self.fail_puts.get() {
            return Err(BlobError::Unavailable("injected put failure".to_string()));
        }
        self.objects.borrow_mut().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        if self.fail_gets.get() {
            return Err(BlobError::Unavailable("injected get failure".to_string()));
        }
        self.objects
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        if self.fail_deletes.get() {
            return Err(BlobError::Unavailable("injected delete failure".to_string()));
        }
        self.objects
            .borrow_mut()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }
}

/// Records every release notice; optionally fails them all.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub sent: Rc<RefCell<Vec<(String, VaultId)>>>,
    pub fail: Rc<Cell<bool>>,
    pub yield_on_send: Rc<Cell<bool>>,
}

impl RecordingNotifier {
    pub fn sent_count(&self) -> usize {
        self.sent.borrow().len()
    }
}

impl Notifier for RecordingNotifier {
    async fn send_release_notice(&self, email: &str, vault_id: VaultId) -> Result<(), NotifyError> {
        if self.yield_on_send.get() {
            YieldNow(false).await;
        }
        if self.fail.get() {
            return Err(NotifyError::Transport("injected mailer failure".to_string()));
        }
        self.sent.borrow_mut().push((email.to_string(), vault_id));
        Ok(())
    }
}
