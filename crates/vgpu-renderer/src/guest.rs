//! Guest-side collaborators: guest memory (including sync objects that live in it) and the guest
//! thread table.
//!
//! The emulator provides the real implementations. [`VecGuestMemory`] and [`ThreadRegistry`] are
//! complete enough to drive the renderer from tests and tools.

use std::ops::Range;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use tracing::trace;
use vgpu_sync::SyncObject;

use crate::error::GuestMemoryError;

/// Guest memory as seen by the renderer.
///
/// Shared between guest threads (building command lists) and the processor thread.
pub trait GuestMemory: Send + Sync {
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<(), GuestMemoryError>;
    fn write(&self, addr: u64, src: &[u8]) -> Result<(), GuestMemoryError>;

    /// Resolves the sync object the guest created at `addr`.
    fn sync_object(&self, addr: u64) -> Option<Arc<SyncObject>>;

    fn read_u32(&self, addr: u64) -> Result<u32, GuestMemoryError> {
        let mut bytes = [0u8; 4];
        self.read(addr, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn write_u32(&self, addr: u64, value: u32) -> Result<(), GuestMemoryError> {
        self.write(addr, &value.to_le_bytes())
    }
}

/// Contiguous in-memory guest RAM with a sync object table.
#[derive(Debug)]
pub struct VecGuestMemory {
    mem: Mutex<Vec<u8>>,
    sync_objects: Mutex<HashMap<u64, Arc<SyncObject>>>,
}

impl VecGuestMemory {
    pub fn new(size_bytes: usize) -> Self {
        Self {
            mem: Mutex::new(vec![0u8; size_bytes]),
            sync_objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.mem.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `len` bytes starting at `addr`.
    pub fn to_vec(&self, addr: u64, len: usize) -> Result<Vec<u8>, GuestMemoryError> {
        let mut out = vec![0u8; len];
        self.read(addr, &mut out)?;
        Ok(out)
    }

    /// Creates (or re-creates) a sync object at `addr` with both counters zeroed.
    pub fn create_sync_object(&self, addr: u64) -> Arc<SyncObject> {
        let object = Arc::new(SyncObject::new());
        self.sync_objects
            .lock()
            .unwrap()
            .insert(addr, Arc::clone(&object));
        trace!(addr, "sync object created");
        object
    }

    pub fn destroy_sync_object(&self, addr: u64) -> bool {
        self.sync_objects.lock().unwrap().remove(&addr).is_some()
    }

    fn range(addr: u64, len: usize, mem_len: usize) -> Result<Range<usize>, GuestMemoryError> {
        let err = GuestMemoryError { addr, len };
        let start = usize::try_from(addr).map_err(|_| err)?;
        let end = start.checked_add(len).ok_or(err)?;
        if end > mem_len {
            return Err(err);
        }
        Ok(start..end)
    }
}

impl GuestMemory for VecGuestMemory {
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<(), GuestMemoryError> {
        let mem = self.mem.lock().unwrap();
        let range = Self::range(addr, dst.len(), mem.len())?;
        dst.copy_from_slice(&mem[range]);
        Ok(())
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<(), GuestMemoryError> {
        let mut mem = self.mem.lock().unwrap();
        let range = Self::range(addr, src.len(), mem.len())?;
        mem[range].copy_from_slice(src);
        Ok(())
    }

    fn sync_object(&self, addr: u64) -> Option<Arc<SyncObject>> {
        self.sync_objects.lock().unwrap().get(&addr).cloned()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    Runnable,
    Waiting,
}

/// Scheduler view of a guest thread: a status guarded by the thread's own mutex.
#[derive(Debug)]
pub struct GuestThread {
    id: ThreadId,
    status: Mutex<ThreadStatus>,
    cond: Condvar,
}

impl GuestThread {
    pub fn new(id: ThreadId) -> Self {
        Self {
            id,
            status: Mutex::new(ThreadStatus::Runnable),
            cond: Condvar::new(),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn status(&self) -> ThreadStatus {
        *self.status.lock().unwrap()
    }

    /// Marks the thread as waiting; it stays blocked in [`Self::wait_until_runnable`] until woken.
    pub fn suspend(&self) {
        *self.status.lock().unwrap() = ThreadStatus::Waiting;
    }

    /// Flips waiting to runnable. Returns `false` if the thread was not waiting.
    pub fn wake(&self) -> bool {
        let mut status = self.status.lock().unwrap();
        if *status != ThreadStatus::Waiting {
            return false;
        }
        *status = ThreadStatus::Runnable;
        self.cond.notify_all();
        trace!(thread = self.id.0, "guest thread woken");
        true
    }

    /// Blocks until the thread is runnable. `None` waits forever. Returns `false` on timeout.
    pub fn wait_until_runnable(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut status = self.status.lock().unwrap();
        while *status == ThreadStatus::Waiting {
            match deadline {
                None => status = self.cond.wait(status).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    status = self.cond.wait_timeout(status, deadline - now).unwrap().0;
                }
            }
        }
        true
    }
}

/// Resolves guest thread ids to their scheduler entries.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: Mutex<HashMap<ThreadId, Arc<GuestThread>>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ThreadId) -> Arc<GuestThread> {
        let thread = Arc::new(GuestThread::new(id));
        self.threads.lock().unwrap().insert(id, Arc::clone(&thread));
        thread
    }

    pub fn get(&self, id: ThreadId) -> Option<Arc<GuestThread>> {
        self.threads.lock().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: ThreadId) -> Option<Arc<GuestThread>> {
        self.threads.lock().unwrap().remove(&id)
    }
}
