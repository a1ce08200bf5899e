use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared/exclusive lock over "the object graph plus everything derived from it".
///
/// One `ObjectLock` is created by whoever owns the source graph and handed,
/// by clone, to the projection engine. The producer takes it exclusively while
/// it mutates the graph; the engine takes it exclusively while it checks
/// liveness and applies an event, and shared while it answers queries.
#[derive(Clone, Default)]
pub struct ObjectLock {
    inner: Arc<RwLock<()>>,
}

impl ObjectLock {
    /// Create a fresh, unheld lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire shared access, blocking while a writer holds the lock.
    #[must_use]
    pub fn read(&self) -> ObjectReadGuard<'_> {
        ObjectReadGuard {
            _guard: self.inner.read(),
        }
    }

    /// Acquire exclusive access, blocking until readers and writers drain.
    #[must_use]
    pub fn write(&self) -> ObjectWriteGuard<'_> {
        ObjectWriteGuard {
            _guard: self.inner.write(),
        }
    }

    /// Acquire shared access only if no writer holds or awaits the lock.
    #[must_use]
    pub fn try_read(&self) -> Option<ObjectReadGuard<'_>> {
        self.inner
            .try_read()
            .map(|guard| ObjectReadGuard { _guard: guard })
    }

    /// Acquire exclusive access only if the lock is completely free.
    #[must_use]
    pub fn try_write(&self) -> Option<ObjectWriteGuard<'_>> {
        self.inner
            .try_write()
            .map(|guard| ObjectWriteGuard { _guard: guard })
    }

    /// Whether some thread currently holds the lock exclusively.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.inner.is_locked_exclusive()
    }

    /// Whether two handles refer to the same underlying lock.
    #[must_use]
    pub fn same_lock(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ObjectLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectLock")
            .field("locked", &self.inner.is_locked())
            .field("exclusive", &self.inner.is_locked_exclusive())
            .finish()
    }
}

/// RAII guard for shared access.
pub struct ObjectReadGuard<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

impl ObjectReadGuard<'_> {
    /// Explicitly release the lock. Release also happens automatically on drop.
    pub fn release(self) {}
}

/// RAII guard for exclusive access.
pub struct ObjectWriteGuard<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

impl ObjectWriteGuard<'_> {
    /// Explicitly release the lock. Release also happens automatically on drop.
    pub fn release(self) {}
}
