use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use tracing::debug;

/// Default stripe count; matches the initial capacity of a std `HashMap`.
pub const DEFAULT_STRIPES: usize = 16;

/// Fixed array of reader/writer locks, each owning one shard of `T`.
///
/// Keys map to a stripe through a blake3 hash, so the mapping is stable
/// across processes. Unrelated keys that share a stripe contend with each
/// other. Poisoned stripes are recovered: every critical section leaves its
/// shard consistent at statement boundaries.
pub struct StripedLocks<T> {
    stripes: Box<[RwLock<T>]>,
}

impl<T: Default> StripedLocks<T> {
    pub fn new(count: usize) -> Self {
        let count = count.max(1);
        Self {
            stripes: (0..count).map(|_| RwLock::new(T::default())).collect(),
        }
    }
}

impl<T> StripedLocks<T> {
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    pub fn stripe_index(&self, key: &str) -> usize {
        let hash = blake3::hash(key.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_le_bytes(prefix) % self.stripes.len() as u64) as usize
    }

    pub fn acquire_read(&self, key: &str) -> RwLockReadGuard<'_, T> {
        self.stripes[self.stripe_index(key)]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access to the stripe `key` hashes to.
    pub fn acquire_write(&self, key: &str) -> RwLockWriteGuard<'_, T> {
        self.stripes[self.stripe_index(key)]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_acquire_write(&self, key: &str) -> Option<RwLockWriteGuard<'_, T>> {
        match self.stripes[self.stripe_index(key)].try_write() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Visit every shard under its read lock, one stripe at a time.
    pub fn for_each_stripe(&self, mut f: impl FnMut(&T)) {
        for stripe in &*self.stripes {
            let shard = stripe.read().unwrap_or_else(PoisonError::into_inner);
            f(&*shard);
        }
    }

    /// Write-lock every stripe in ascending index order.
    ///
    /// This is the only multi-stripe acquisition, so the fixed order is
    /// enough to rule out lock-order deadlocks.
    pub fn acquire_write_all(&self) -> WriteAllGuard<'_, T> {
        let guards = self
            .stripes
            .iter()
            .map(|stripe| stripe.write().unwrap_or_else(PoisonError::into_inner))
            .collect();
        debug!("acquired all {} stripes", self.stripes.len());
        WriteAllGuard { guards }
    }
}

/// Holds the writer side of every stripe; all are released on drop.
pub struct WriteAllGuard<'a, T> {
    guards: Vec<RwLockWriteGuard<'a, T>>,
}

impl<'a, T> WriteAllGuard<'a, T> {
    /// Stripe guards in ascending index order.
    pub fn shards(&self) -> &[RwLockWriteGuard<'a, T>] {
        &self.guards
    }

    pub fn shards_mut(&mut self) -> &mut [RwLockWriteGuard<'a, T>] {
        &mut self.guards
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, stopping workspace runtimes...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
