//! Buffer-manager contract (component F): the thin interface the engine
//! consumes to allocate pages and to credit/debit the process-wide
//! `data_size` counter. A real page/buffer manager (persistence,
//! eviction, checkpointing) is out of scope here; `InMemoryBufferManager`
//! below is a reference implementation sufficient to make the engine
//! independently testable.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// An opaque handle to an allocated block. Cloning is cheap (it is a
/// reference to shared storage); the block itself lives until its last
/// handle is dropped.
#[derive(Clone)]
pub struct BlockHandle {
    id: u64,
    data: Arc<Mutex<Vec<u8>>>,
}

impl BlockHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockHandle").field("id", &self.id).finish()
    }
}

/// The operations a core component may perform against the buffer
/// manager. `pin_read`/`pin_write` replace the source's "pin returns a
/// guarded raw pointer" idiom with a safe scoped-access closure.
pub trait BufferManager: Send + Sync {
    fn allocate(&self, size: usize) -> BlockHandle;
    fn register_small(&self, size: usize) -> BlockHandle;
    fn pin_read(&self, block: &BlockHandle) -> Vec<u8>;
    fn pin_write(&self, block: &BlockHandle, f: &mut dyn FnMut(&mut [u8]));
    fn add_to_data_size(&self, delta: i64);
    fn used_data_size(&self) -> i64;
}

/// A reference in-memory implementation: allocations are plain heap
/// buffers, `pin_read` copies out a snapshot, `pin_write` runs the
/// closure directly against the backing `Vec<u8>`.
pub struct InMemoryBufferManager {
    next_id: AtomicU64,
    used_data_size: AtomicI64,
}

impl InMemoryBufferManager {
    pub fn new() -> Self {
        InMemoryBufferManager {
            next_id: AtomicU64::new(1),
            used_data_size: AtomicI64::new(0),
        }
    }

    fn allocate_inner(&self, size: usize) -> BlockHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        BlockHandle {
            id,
            data: Arc::new(Mutex::new(vec![0_u8; size])),
        }
    }
}

impl Default for InMemoryBufferManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferManager for InMemoryBufferManager {
    fn allocate(&self, size: usize) -> BlockHandle {
        self.allocate_inner(size)
    }

    fn register_small(&self, size: usize) -> BlockHandle {
        self.allocate_inner(size)
    }

    fn pin_read(&self, block: &BlockHandle) -> Vec<u8> {
        block.data.lock().expect("block mutex poisoned").clone()
    }

    fn pin_write(&self, block: &BlockHandle, f: &mut dyn FnMut(&mut [u8])) {
        let mut guard = block.data.lock().expect("block mutex poisoned");
        f(&mut guard);
    }

    fn add_to_data_size(&self, delta: i64) {
        self.used_data_size.fetch_add(delta, Ordering::Relaxed);
    }

    fn used_data_size(&self) -> i64 {
        self.used_data_size.load(Ordering::Relaxed)
    }
}
