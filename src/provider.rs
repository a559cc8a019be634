//==============================================================================
// Lazy Singleton Provider
//==============================================================================
//
// One shared instance per provider, built on first demand with
// double-checked locking:
//
//   1. lock-free read of the slot (fast path)
//   2. take the construction lock
//   3. re-read the slot under the lock
//   4. construct and publish
//   5. release the lock
//
// The slot is a `OnceLock`, which publishes with release ordering and reads
// with acquire ordering, so a reader that sees the value also sees every write
// the factory made while building it. The `Mutex<()>` only serialises
// construction attempts; it never guards the value itself.

use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::{debug, info, warn};

use crate::error::ConstructionFailure;

/// Factory: the zero-argument constructor a provider owns.
pub type Factory<T> = fn() -> Result<T, ConstructionFailure>;

const EMPTY: u8 = 0;
const CONSTRUCTING: u8 = 1;
const POPULATED: u8 = 2;

/// SlotState: where a provider is in its lifecycle.
///
/// `Empty -> Constructing -> Populated`, with `Constructing -> Empty` when the
/// factory fails. `Populated` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Constructing,
    Populated,
}

/// Counters for construction attempts. Both only ever grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProviderStats {
    pub attempts: u32,
    pub failures: u32,
}

/// LazyProvider: owns at most one `T`, created by `factory` on first use.
///
/// The provider is an ordinary value. Share it by reference, through an `Arc`,
/// or put it in a `static` (`new` is `const`).
///
/// ```
/// use lazy_singleton::LazyProvider;
///
/// let provider: LazyProvider<Vec<u8>> = LazyProvider::of_default();
/// let first = provider.get_instance().unwrap();
/// let second = provider.get_instance().unwrap();
/// assert!(std::ptr::eq(first, second));
/// ```
pub struct LazyProvider<T, F = Factory<T>> {
    slot: OnceLock<T>,
    lock: Mutex<()>,
    state: AtomicU8,
    attempts: AtomicU32,
    failures: AtomicU32,
    factory: F,
}

impl<T, F> LazyProvider<T, F> {
    /// Returns the instance if it already exists. Never blocks, never
    /// constructs.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.slot.get()
    }

    #[inline]
    pub fn is_populated(&self) -> bool {
        self.slot.get().is_some()
    }

    pub fn state(&self) -> SlotState {
        if self.slot.get().is_some() {
            return SlotState::Populated;
        }
        match self.state.load(Ordering::Acquire) {
            CONSTRUCTING => SlotState::Constructing,
            // POPULATED is only stored after the slot is set, which the check
            // above already covers.
            _ => SlotState::Empty,
        }
    }

    pub fn stats(&self) -> ProviderStats {
        ProviderStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Tears the provider down, handing back the instance if one was built.
    pub fn into_inner(self) -> Option<T> {
        self.slot.into_inner()
    }
}

impl<T, F> LazyProvider<T, F>
where
    F: Fn() -> Result<T, ConstructionFailure>,
{
    /// Creates an empty provider. Nothing is constructed until the first
    /// `get_instance`.
    pub const fn new(factory: F) -> Self {
        LazyProvider {
            slot: OnceLock::new(),
            lock: Mutex::new(()),
            state: AtomicU8::new(EMPTY),
            attempts: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            factory,
        }
    }

    /// Returns the shared instance, constructing it if this is the first
    /// successful call.
    ///
    /// Every caller gets the same reference. Concurrent callers that arrive
    /// while the slot is empty wait for the construction lock; once the slot is
    /// populated the call is a single acquire load.
    ///
    /// # Errors
    ///
    /// Returns the factory's [`ConstructionFailure`] to the caller that ran it.
    /// The slot stays empty and the next call tries again.
    ///
    /// # Panics
    ///
    /// The factory must not call back into its own provider. Doing so relocks
    /// the construction mutex from the same thread, which deadlocks or panics.
    #[inline]
    pub fn get_instance(&self) -> Result<&T, ConstructionFailure> {
        if let Some(value) = self.slot.get() {
            return Ok(value);
        }
        self.initialize()
    }

    #[cold]
    fn initialize(&self) -> Result<&T, ConstructionFailure> {
        // A factory that panicked poisons the mutex; the guarded data is `()`
        // so there is nothing to repair.
        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(value) = self.slot.get() {
            debug!(
                resource = type_name::<T>(),
                "slot populated while waiting for construction lock"
            );
            return Ok(value);
        }

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        self.state.store(CONSTRUCTING, Ordering::Release);
        debug!(resource = type_name::<T>(), attempt, "constructing instance");

        let guard = ConstructionGuard {
            state: &self.state,
            failures: &self.failures,
            committed: false,
        };

        match (self.factory)() {
            Ok(value) => {
                // We hold the lock and saw an empty slot, so this stores `value`.
                let stored = self.slot.get_or_init(|| value);
                self.state.store(POPULATED, Ordering::Release);
                guard.commit();
                info!(resource = type_name::<T>(), attempt, "instance constructed");
                Ok(stored)
            }
            Err(err) => {
                warn!(
                    resource = type_name::<T>(),
                    attempt,
                    error = %err,
                    "construction failed, slot left empty"
                );
                Err(err)
            }
        }
    }
}

impl<T: Default> LazyProvider<T> {
    /// A provider whose factory is `T::default()`.
    pub const fn of_default() -> Self {
        LazyProvider::new(default_factory::<T> as Factory<T>)
    }
}

impl<T> LazyProvider<T> {
    /// A provider that starts out populated; its factory never runs.
    pub fn populated(value: T) -> Self {
        let provider = LazyProvider::new(prepopulated_factory::<T> as Factory<T>);
        provider.state.store(POPULATED, Ordering::Relaxed);
        // Fresh OnceLock, so this always stores `value`.
        provider.slot.get_or_init(|| value);
        provider
    }
}

impl<T: Default> Default for LazyProvider<T> {
    fn default() -> Self {
        LazyProvider::of_default()
    }
}

impl<T: fmt::Debug, F> fmt::Debug for LazyProvider<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyProvider")
            .field("state", &self.state())
            .field("value", &self.slot.get())
            .field("stats", &self.stats())
            .finish()
    }
}

fn default_factory<T: Default>() -> Result<T, ConstructionFailure> {
    Ok(T::default())
}

fn prepopulated_factory<T>() -> Result<T, ConstructionFailure> {
    Err(ConstructionFailure::new::<T>(
        "provider was created populated and has no factory",
    ))
}

/// Puts the slot back to `Empty` unless construction committed. Runs on the
/// error return and while unwinding out of a panicking factory.
struct ConstructionGuard<'a> {
    state: &'a AtomicU8,
    failures: &'a AtomicU32,
    committed: bool,
}

impl ConstructionGuard<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ConstructionGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.failures.fetch_add(1, Ordering::Relaxed);
            self.state.store(EMPTY, Ordering::Release);
        }
    }
}

//==============================================================================
// Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    struct Connection {
        id: usize,
        handshake: Vec<u32>,
    }

    fn address<T>(value: &T) -> usize {
        value as *const T as usize
    }

    #[test]
    fn test_first_call_constructs_once() {
        let built = AtomicUsize::new(0);
        let provider = LazyProvider::new(|| {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(Connection {
                id: 7,
                handshake: vec![1, 2, 3],
            })
        });

        assert_eq!(provider.state(), SlotState::Empty);
        assert!(provider.get().is_none());

        let conn = provider.get_instance().unwrap();
        assert_eq!(conn.id, 7);
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(provider.state(), SlotState::Populated);
    }

    #[test]
    fn test_repeated_calls_return_same_reference() {
        let provider = LazyProvider::new(|| {
            Ok(Connection {
                id: 1,
                handshake: vec![],
            })
        });

        let first = provider.get_instance().unwrap();
        for _ in 0..1_000 {
            let again = provider.get_instance().unwrap();
            assert!(std::ptr::eq(first, again));
        }
        assert_eq!(provider.stats(), ProviderStats { attempts: 1, failures: 0 });
    }

    #[test]
    fn test_hundred_parallel_callers_construct_once() {
        let built = AtomicUsize::new(0);
        let provider = LazyProvider::new(|| {
            built.fetch_add(1, Ordering::SeqCst);
            // Keep the slot empty long enough for every caller to pile up.
            thread::sleep(Duration::from_millis(20));
            Ok(Connection {
                id: 42,
                handshake: vec![0; 64],
            })
        });
        let barrier = Barrier::new(100);

        let addresses: Vec<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..100)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        address(provider.get_instance().unwrap())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(addresses.len(), 100);
        assert!(addresses.iter().all(|&a| a == addresses[0]));
        assert_eq!(address(provider.get().unwrap()), addresses[0]);
    }

    #[test]
    fn test_reference_equal_from_another_thread() {
        let provider = Arc::new(LazyProvider::new(|| {
            Ok(Connection {
                id: 3,
                handshake: vec![],
            })
        }));

        let here = address(provider.get_instance().unwrap());
        let there = {
            let provider = Arc::clone(&provider);
            thread::spawn(move || address(provider.get_instance().unwrap()))
                .join()
                .unwrap()
        };

        assert_eq!(here, there);
    }

    #[test]
    fn test_callers_never_see_partial_construction() {
        let side_effects = AtomicUsize::new(0);
        let provider = LazyProvider::new(|| {
            let mut handshake = Vec::new();
            for step in 0..1_000 {
                handshake.push(step);
                side_effects.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Connection { id: 9, handshake })
        });

        thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    let conn = provider.get_instance().unwrap();
                    assert_eq!(conn.handshake.len(), 1_000);
                    assert_eq!(conn.handshake[999], 999);
                    assert_eq!(side_effects.load(Ordering::SeqCst), 1_000);
                });
            }
        });
    }

    #[test]
    fn test_failure_leaves_slot_empty_and_retry_succeeds() {
        let calls = AtomicUsize::new(0);
        let provider = LazyProvider::new(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                Err(ConstructionFailure::new::<Connection>("server not ready"))
            } else {
                Ok(Connection {
                    id: n,
                    handshake: vec![],
                })
            }
        });

        let err = provider.get_instance().unwrap_err();
        assert_eq!(err.message(), "server not ready");
        assert_eq!(provider.state(), SlotState::Empty);
        assert!(provider.get().is_none());

        let conn = provider.get_instance().unwrap();
        assert_eq!(conn.id, 2);
        assert_eq!(provider.state(), SlotState::Populated);
        assert_eq!(provider.stats(), ProviderStats { attempts: 2, failures: 1 });
    }

    #[test]
    fn test_failure_is_not_seen_after_population() {
        let calls = AtomicUsize::new(0);
        let provider = LazyProvider::new(|| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(5u64)
            } else {
                Err(ConstructionFailure::new::<u64>("should never run twice"))
            }
        });

        assert_eq!(*provider.get_instance().unwrap(), 5);
        for _ in 0..10 {
            assert_eq!(*provider.get_instance().unwrap(), 5);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_factory_leaves_slot_empty() {
        let calls = AtomicUsize::new(0);
        let provider = LazyProvider::new(|| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("factory blew up");
            }
            Ok(String::from("recovered"))
        });

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| provider.get_instance().map(|_| ())));
        assert!(outcome.is_err());
        assert_eq!(provider.state(), SlotState::Empty);

        assert_eq!(provider.get_instance().unwrap(), "recovered");
        assert_eq!(provider.stats(), ProviderStats { attempts: 2, failures: 1 });
    }

    #[test]
    fn test_state_is_constructing_while_factory_runs() {
        let entered = Barrier::new(2);
        let release = Barrier::new(2);
        let provider = LazyProvider::new(|| {
            entered.wait();
            release.wait();
            Ok(11u32)
        });

        thread::scope(|s| {
            let worker = s.spawn(|| *provider.get_instance().unwrap());

            entered.wait();
            assert_eq!(provider.state(), SlotState::Constructing);
            assert!(provider.get().is_none());
            release.wait();

            assert_eq!(worker.join().unwrap(), 11);
        });
        assert_eq!(provider.state(), SlotState::Populated);
    }

    #[test]
    fn test_get_never_constructs() {
        let built = AtomicUsize::new(0);
        let provider = LazyProvider::new(|| {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(1u8)
        });

        assert!(provider.get().is_none());
        assert!(!provider.is_populated());
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert_eq!(provider.stats(), ProviderStats::default());
    }

    #[test]
    fn test_types_inferred_from_factory_alone() {
        let provider = LazyProvider::new(|| Ok(String::from("unused")));

        assert_eq!(provider.state(), SlotState::Empty);
        assert_eq!(provider.stats().attempts, 0);
        assert_eq!(provider.into_inner(), None);
    }

    #[test]
    fn test_populated_provider_skips_factory() {
        let provider = LazyProvider::populated(vec![1, 2, 3]);
        assert_eq!(provider.state(), SlotState::Populated);
        assert_eq!(provider.get_instance().unwrap(), &vec![1, 2, 3]);
        assert_eq!(provider.stats().attempts, 0);
        assert_eq!(provider.into_inner(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_default_provider() {
        let provider: LazyProvider<Vec<String>> = LazyProvider::default();
        assert!(provider.get_instance().unwrap().is_empty());
        assert_eq!(provider.into_inner(), Some(Vec::new()));

        let empty: LazyProvider<u32> = LazyProvider::of_default();
        assert_eq!(empty.into_inner(), None);
    }

    #[test]
    fn test_provider_in_static() {
        static REGISTRY: LazyProvider<Vec<u32>> = LazyProvider::of_default();

        let from_thread = thread::spawn(|| address(REGISTRY.get_instance().unwrap()))
            .join()
            .unwrap();
        assert_eq!(address(REGISTRY.get_instance().unwrap()), from_thread);
    }

    #[test]
    fn test_debug_output_shows_state() {
        let provider = LazyProvider::new(|| Ok(3i32));
        assert!(format!("{:?}", provider).contains("Empty"));
        provider.get_instance().unwrap();
        let shown = format!("{:?}", provider);
        assert!(shown.contains("Populated"));
        assert!(shown.contains("Some(3)"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_retries_until_populated(fail_first in 0u32..4, callers in 1usize..12) {
            let calls = AtomicU32::new(0);
            let provider = LazyProvider::new(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < fail_first {
                    Err(ConstructionFailure::new::<u32>(format!("attempt {} refused", n + 1)))
                } else {
                    Ok(n)
                }
            });

            let addresses: Vec<usize> = thread::scope(|s| {
                let handles: Vec<_> = (0..callers)
                    .map(|_| {
                        s.spawn(|| loop {
                            if let Ok(value) = provider.get_instance() {
                                break address(value);
                            }
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            prop_assert!(addresses.iter().all(|&a| a == addresses[0]));
            prop_assert_eq!(*provider.get().unwrap(), fail_first);
            prop_assert_eq!(
                provider.stats(),
                ProviderStats { attempts: fail_first + 1, failures: fail_first }
            );
        }
    }
}
