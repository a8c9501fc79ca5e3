use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One mutex per build id, created on demand and dropped once unused.
///
/// Work on different builds never contends; work on the same build is
/// serialised for the duration of the closure passed to [`BuildLocks::with`].
#[derive(Debug, Default)]
pub struct BuildLocks {
    slots: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BuildLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the critical section for `build_id`.
    pub fn with<T>(&self, build_id: u64, f: impl FnOnce() -> T) -> T {
        let slot = lock(&self.slots).entry(build_id).or_default().clone();
        let out = {
            let _guard = lock(&slot);
            f()
        };
        let mut slots = lock(&self.slots);
        // The map and this call are the only holders: nobody is waiting.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(&build_id);
        }
        out
    }

    /// Number of builds with a live critical section.
    pub fn active(&self) -> usize {
        lock(&self.slots).len()
    }
}
