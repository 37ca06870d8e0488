use ic_stable_structures::memory_manager::{MemoryId, MemoryManager, VirtualMemory};
use ic_stable_structures::DefaultMemoryImpl;
use std::cell::RefCell;

// Define Memory IDs for stable structures
// Choose non-overlapping IDs
pub(crate) const USERS_MEM_ID: MemoryId = MemoryId::new(0);
pub(crate) const USER_PRINCIPAL_IDX_MEM_ID: MemoryId = MemoryId::new(1);
pub(crate) const USER_EMAIL_IDX_MEM_ID: MemoryId = MemoryId::new(2);
pub(crate) const VAULTS_MEM_ID: MemoryId = MemoryId::new(3);
pub(crate) const VAULT_TITLE_IDX_MEM_ID: MemoryId = MemoryId::new(4);
pub(crate) const UPLOADS_MEM_ID: MemoryId = MemoryId::new(5);
pub(crate) const VAULT_UPLOADS_IDX_MEM_ID: MemoryId = MemoryId::new(6);
pub(crate) const COVERS_MEM_ID: MemoryId = MemoryId::new(7);
pub(crate) const COUNTERS_MEM_ID: MemoryId = MemoryId::new(8);
pub(crate) const BLOBS_MEM_ID: MemoryId = MemoryId::new(9);
// Reserve IDs 10-19 for future tables
const CONFIG_MEM_ID: MemoryId = MemoryId::new(20);
const METRICS_MEM_ID: MemoryId = MemoryId::new(21);

pub type Memory = VirtualMemory<DefaultMemoryImpl>;

thread_local! {
    static MEMORY_MANAGER: RefCell<MemoryManager<DefaultMemoryImpl>> = RefCell::new(
        MemoryManager::init(DefaultMemoryImpl::default())
    );
}

/// Get memory instance for a specific MemoryId.
pub fn get_memory(id: MemoryId) -> Memory {
    MEMORY_MANAGER.with(|m| m.borrow().get(id))
}

/// Runs `f` against the canister-wide memory manager.
pub fn with_memory_manager<R>(f: impl FnOnce(&MemoryManager<DefaultMemoryImpl>) -> R) -> R {
    MEMORY_MANAGER.with(|m| f(&m.borrow()))
}

pub fn get_config_memory() -> Memory {
    get_memory(CONFIG_MEM_ID)
}

pub fn get_metrics_memory() -> Memory {
    get_memory(METRICS_MEM_ID)
}
