//! Exactly-once, blocking, failure-poisoning lazy initialization of named units.
//!
//! A *unit* is anything with a one-shot initializer that many threads may race to
//! use first: a class, a module, a subsystem. This crate guarantees, per unit:
//!
//! - The initializer runs at most once, no matter how many threads ask.
//! - Every thread other than the initializer blocks until it finishes or fails.
//! - The initializing thread, and anything it calls, re-enters the unit freely.
//! - A failed unit is poisoned for good. The initializing call sees the original
//!   error; everybody else sees an [`InitError::Unavailable`] naming the unit.
//! - Once initialized, repeat access through the same directory is a single atomic
//!   load on the unit's barrier; the directory's map is not consulted.
//!
//! Units may name a parent, which is brought to a terminal state before the
//! child's initializer starts. A failed parent fails the child without running it.
//!
//! Blocking uses atomic operations with `parking_lot`'s futex-based parking.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use init_barrier::{Directory, Unit};
//!
//! static RUNS: AtomicUsize = AtomicUsize::new(0);
//!
//! let directory = Directory::new();
//! let config = Unit::new("Config", |ctx| {
//!    RUNS.fetch_add(1, Ordering::SeqCst);
//!    // Re-entering the unit from its own initializer does not deadlock.
//!    ctx.ensure_initialized(ctx.unit())?;
//!    Ok(())
//! });
//!
//! directory.ensure_initialized(&config).unwrap();
//! directory.ensure_initialized(&config).unwrap();
//! assert_eq!(RUNS.load(Ordering::SeqCst), 1);
//! ```
//!
//! ## Poisoning
//!
//! ```rust
//! use init_barrier::{Directory, InitError, Unit};
//!
//! let directory = Directory::new();
//! let broken = Unit::new("Broken", |_| Err("disk on fire".into()));
//!
//! let first = directory.ensure_initialized(&broken).unwrap_err();
//! assert!(first.is_original_cause());
//!
//! let second = directory.ensure_initialized(&broken).unwrap_err();
//! assert!(matches!(second, InitError::Unavailable { .. }));
//! assert_eq!(second.to_string(), "could not initialize unit `Broken`: disk on fire");
//! ```

/// Per-unit barrier built on the state word.
mod barrier;

/// Unit identity to barrier registry and the public entry points.
mod directory;

mod error;

/// Logical initializer identity used for reentrancy.
mod initiator;

/// Internal synchronization state management.
mod state;

mod unit;

pub use barrier::BarrierState;
pub use directory::Directory;
pub use error::{BoxError, InitError};
pub use initiator::Initiator;
pub use unit::{InitContext, Initializer, Unit, UnitId};
