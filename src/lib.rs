//! # Lazy Singleton Provider
//!
//! The Singleton pattern as an owned value instead of a global: a
//! [`LazyProvider`] holds at most one instance of `T`, builds it on the first
//! [`LazyProvider::get_instance`] call with double-checked locking, and hands
//! the same reference to every caller on every thread.
//!
//! - Construction runs once, however many threads race for it.
//! - Once populated, `get_instance` is a single lock-free acquire load.
//! - A failed (or panicking) construction leaves the slot empty so the next
//!   call retries.
//!
//! ```
//! use lazy_singleton::{ConstructionFailure, LazyProvider, SlotState};
//!
//! let provider = LazyProvider::new(|| Ok(String::from("db-pool")));
//! assert_eq!(provider.state(), SlotState::Empty);
//!
//! let pool = provider.get_instance()?;
//! assert_eq!(pool, "db-pool");
//! assert_eq!(provider.state(), SlotState::Populated);
//! # Ok::<(), ConstructionFailure>(())
//! ```
//!
//! The [`demo`] module and the `singleton_demo` binary run the classic
//! contention scenario: many callers released at once against one fresh
//! provider.

pub mod config;
pub mod demo;
pub mod error;
pub mod logging;
pub mod provider;
pub mod resource;

pub use config::DemoConfig;
pub use error::{ConfigError, ConstructionFailure, DemoError};
pub use provider::{Factory, LazyProvider, ProviderStats, SlotState};
pub use resource::{ResourceFactory, SharedResource};
