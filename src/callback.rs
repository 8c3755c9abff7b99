//! Host closures addressable from managed code by integer identity.
//!
//! Managed code cannot hold references to Rust closures. Instead, each closure is stored in an
//! append-only [`crate::callback::CallbackRegistry`] and identified by the index it was stored
//! at. That identity is handed across the boundary (for example through
//! [`crate::ManagedDelegate::call_with`]) and handed back to
//! [`crate::callback::clrhost_invoke_callback`] when managed code wants the closure to run.
//!
//! Entries are never removed, so an identity stays valid for the life of the registry and
//! lookups need no lock. Registration is serialized, which keeps identities contiguous:
//! the n-th registration receives `n - 1`.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use clrhost::callback::CallbackRegistry;
//!
//! static HITS: AtomicUsize = AtomicUsize::new(0);
//!
//! let registry = CallbackRegistry::new();
//! let id = registry.register(|| {
//!     HITS.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! registry.invoke(id)?;
//! assert_eq!(HITS.load(Ordering::SeqCst), 1);
//! # Ok::<(), clrhost::Error>(())
//! ```

use std::{
    ffi::c_int,
    fmt,
    panic,
    sync::{Mutex, OnceLock},
};

use crate::{native::STATUS_FAILURE, Error, Result};

/// Identity of a registered callback.
pub type CallbackId = usize;

type Callback = Box<dyn Fn() + Send + Sync>;

/// Append-only table of host closures.
pub struct CallbackRegistry {
    entries: boxcar::Vec<Callback>,
    writer: Mutex<()>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        CallbackRegistry {
            entries: boxcar::Vec::new(),
            writer: Mutex::new(()),
        }
    }

    /// Stores `callback` and returns its identity, the registry size before insertion.
    pub fn register<F>(&self, callback: F) -> CallbackId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let _writer = lock!(self.writer);
        let id = self.entries.push(Box::new(callback));
        log::debug!("Registered callback {}, {} in total", id, id + 1);
        id
    }

    /// Runs the callback registered under `id` on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownCallback`] if nothing is registered under `id`.
    pub fn invoke(&self, id: CallbackId) -> Result<()> {
        let callback = self.entries.get(id).ok_or(Error::UnknownCallback(id))?;
        callback();
        Ok(())
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.entries.count()
    }

    /// Returns `true` if nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("len", &self.len())
            .finish()
    }
}

static CALLBACKS: OnceLock<CallbackRegistry> = OnceLock::new();

/// The process-wide registry, created on first use.
pub fn callbacks() -> &'static CallbackRegistry {
    CALLBACKS.get_or_init(CallbackRegistry::new)
}

/// Registers `callback` in the process-wide registry.
pub fn register_callback<F>(callback: F) -> CallbackId
where
    F: Fn() + Send + Sync + 'static,
{
    callbacks().register(callback)
}

/// Runs a callback from the process-wide registry.
///
/// # Errors
///
/// Returns [`crate::Error::UnknownCallback`] if nothing is registered under `id`.
pub fn invoke_callback(id: CallbackId) -> Result<()> {
    callbacks().invoke(id)
}

/// Entry point for managed code to run a host callback by identity.
///
/// Returns `0` once the callback has run, or `-1` if the identity is unknown or the callback
/// panicked. Panics are caught here and never unwind into the runtime.
#[no_mangle]
pub extern "C" fn clrhost_invoke_callback(id: c_int) -> c_int {
    let Ok(id) = CallbackId::try_from(id) else {
        log::warn!("Managed code requested negative callback id {}", id);
        return STATUS_FAILURE;
    };

    match panic::catch_unwind(|| invoke_callback(id)) {
        Ok(Ok(())) => 0,
        Ok(Err(error)) => {
            log::warn!("{}", error);
            STATUS_FAILURE
        }
        Err(_) => {
            log::error!("Callback {} panicked", id);
            STATUS_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    use super::*;

    #[test]
    fn identities_follow_registration_order() {
        let registry = CallbackRegistry::new();
        assert!(registry.is_empty());

        assert_eq!(registry.register(|| {}), 0);
        assert_eq!(registry.register(|| {}), 1);
        assert_eq!(registry.register(|| {}), 2);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn invoke_runs_the_right_closure() {
        let registry = CallbackRegistry::new();
        let hits = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);

        for slot in 0..2 {
            let hits = hits.clone();
            registry.register(move || {
                hits[slot].fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.invoke(1).unwrap();
        registry.invoke(1).unwrap();
        registry.invoke(0).unwrap();
        assert_eq!(hits[0].load(Ordering::SeqCst), 1);
        assert_eq!(hits[1].load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_identity() {
        let registry = CallbackRegistry::new();
        registry.register(|| {});

        assert!(matches!(registry.invoke(1), Err(Error::UnknownCallback(1))));
    }

    #[test]
    fn concurrent_registration_is_contiguous() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 250;

        let registry = CallbackRegistry::new();
        let ids: Vec<CallbackId> = thread::scope(|scope| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        (0..PER_THREAD)
                            .map(|_| registry.register(|| {}))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            workers
                .into_iter()
                .flat_map(|worker| worker.join().unwrap())
                .collect()
        });

        let unique: HashSet<CallbackId> = ids.iter().copied().collect();
        let expected: HashSet<CallbackId> = (0..THREADS * PER_THREAD).collect();
        assert_eq!(ids.len(), THREADS * PER_THREAD);
        assert_eq!(unique, expected);
        assert_eq!(registry.len(), THREADS * PER_THREAD);
    }

    #[test]
    fn concurrent_invocation_while_registering() {
        let registry = CallbackRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let first = registry.register(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..500 {
                    registry.register(|| {});
                }
            });
            scope.spawn(|| {
                for _ in 0..500 {
                    registry.invoke(first).unwrap();
                }
            });
        });

        assert_eq!(hits.load(Ordering::SeqCst), 500);
        assert_eq!(registry.len(), 501);
    }

    #[test]
    fn trampoline_dispatches_global_callbacks() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = register_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(clrhost_invoke_callback(id as c_int), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(invoke_callback(id).is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert_eq!(clrhost_invoke_callback(-1), STATUS_FAILURE);
        assert_eq!(clrhost_invoke_callback(c_int::MAX), STATUS_FAILURE);
    }

    #[test]
    fn trampoline_contains_panics() {
        let id = register_callback(|| panic!("callback failure"));
        assert_eq!(clrhost_invoke_callback(id as c_int), STATUS_FAILURE);
    }
}
