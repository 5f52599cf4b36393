//! Per-unit initialization barrier.
//!
//! A [`Barrier`] pairs the packed state word from [`state`](crate::state) with the
//! failure reason recorded when the initializer fails. It runs the one-shot
//! initializer for whichever initiator wins the barrier and turns every other
//! observation into success, reentrant pass-through, or a poisoned-unit error.

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::{BoxError, InitError};
use crate::initiator::Initiator;
use crate::state::{Acquired, BarrierLock};
use crate::unit::UnitId;

/// Reason reported to non-owners when the initializer unwound instead of returning.
const PANICKED: &str = "initializer panicked";

/// Observable state of a unit's barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierState {
   /// No initiator has claimed the unit.
   Uninitialized,
   /// An owner is running the initializer.
   InProgress,
   /// Terminal success.
   Initialized,
   /// Terminal failure; the unit is poisoned.
   Failed,
}

impl BarrierState {
   #[inline]
   pub fn is_terminal(self) -> bool {
      matches!(self, Self::Initialized | Self::Failed)
   }
}

pub(crate) struct Barrier {
   lock: BarrierLock,
   /// Written once by the owner before FAILED is published, read-only afterwards.
   failure: UnsafeCell<Option<Arc<str>>>,
}

impl Barrier {
   pub(crate) const fn new() -> Self {
      Self {
         lock: BarrierLock::new(),
         failure: UnsafeCell::new(None),
      }
   }

   /// Fast-path check; never blocks.
   #[inline]
   pub(crate) fn is_initialized(&self) -> bool {
      self.lock.is_done()
   }

   pub(crate) fn state(&self) -> BarrierState {
      let state = self.lock.load(Ordering::Acquire);
      if state & BarrierLock::DONE != 0 {
         BarrierState::Initialized
      } else if state & BarrierLock::FAILED != 0 {
         BarrierState::Failed
      } else if state & BarrierLock::LOCKED != 0 {
         BarrierState::InProgress
      } else {
         BarrierState::Uninitialized
      }
   }

   /// Runs `f` if the caller wins the barrier, blocking while another initiator owns it.
   pub(crate) fn initialize<F>(&self, unit: &UnitId, initiator: Initiator, f: F) -> Result<(), InitError>
   where
      F: FnOnce() -> Result<(), BoxError>,
   {
      if self.is_initialized() {
         return Ok(());
      }
      let acquired = self.lock.acquire(initiator);
      self.resolve(unit, initiator, acquired, f)
   }

   /// Async flavor of [`initialize`](Self::initialize). `f` still runs synchronously.
   #[cfg(feature = "async-tokio-mt")]
   pub(crate) async fn initialize_async<F>(
      self: &Arc<Self>,
      unit: &UnitId,
      initiator: Initiator,
      f: F,
   ) -> Result<(), InitError>
   where
      F: FnOnce() -> Result<(), BoxError>,
   {
      if self.is_initialized() {
         return Ok(());
      }
      let acquired = self.acquire_async(initiator).await;
      self.resolve(unit, initiator, acquired, f)
   }

   /// Acquires the barrier without parking a runtime worker.
   ///
   /// Short waits are absorbed by yielding. Longer ones park in `block_in_place` on a
   /// multi-threaded runtime, and on a blocking-pool thread everywhere else, so a
   /// current-thread runtime keeps driving its other tasks meanwhile.
   #[cfg(feature = "async-tokio-mt")]
   async fn acquire_async(self: &Arc<Self>, initiator: Initiator) -> Acquired<'_> {
      const YIELDS: usize = 16;
      const SPINS: usize = 32;

      let mut yields = 0;
      loop {
         let state = match self.lock.step(initiator) {
            Ok(acquired) => return acquired,
            Err(state) => state,
         };
         if yields < YIELDS {
            yields += 1;
            for _ in 0..SPINS {
               core::hint::spin_loop();
            }
            tokio::task::yield_now().await;
            continue;
         }
         self.park_async(state).await;
      }
   }

   /// Waits until the state word moves away from `state`.
   #[cfg(feature = "async-tokio-mt")]
   async fn park_async(self: &Arc<Self>, state: u8) {
      use tokio::runtime::{Handle, RuntimeFlavor};

      match Handle::try_current().map(|handle| handle.runtime_flavor()) {
         Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(|| self.lock.wait(state)),
         Ok(_) => {
            let barrier = Arc::clone(self);
            if tokio::task::spawn_blocking(move || barrier.lock.wait(state)).await.is_err() {
               // The blocking pool is shutting down; nothing else will run here anyway.
               self.lock.wait(state);
            }
         }
         // Polled outside tokio; there is no runtime to starve.
         Err(_) => self.lock.wait(state),
      }
   }

   fn resolve<F>(&self, unit: &UnitId, initiator: Initiator, acquired: Acquired<'_>, f: F) -> Result<(), InitError>
   where
      F: FnOnce() -> Result<(), BoxError>,
   {
      let guard = match acquired {
         Acquired::Initialized | Acquired::Reentrant => return Ok(()),
         Acquired::Failed => return Err(self.unavailable(unit)),
         Acquired::Owner(guard) => guard,
      };

      tracing::debug!(unit = %unit, owner = %initiator, "running initializer");
      // A panic inside `f` drops the guard, which poisons the barrier.
      match f() {
         Ok(()) => {
            guard.commit();
            tracing::debug!(unit = %unit, owner = %initiator, "unit initialized");
            Ok(())
         }
         Err(source) => {
            tracing::warn!(unit = %unit, owner = %initiator, error = %source, "initializer failed, unit poisoned");
            // SAFETY: We own the barrier and FAILED is not yet published, so no other
            // thread reads `failure` until after the Release swap in `poison`.
            unsafe { *self.failure.get() = Some(Arc::from(source.to_string())) };
            guard.poison();
            Err(InitError::Initializer {
               unit: unit.clone(),
               source,
            })
         }
      }
   }

   /// Builds the wrapper error handed to everyone but the owner's original call.
   fn unavailable(&self, unit: &UnitId) -> InitError {
      debug_assert_eq!(self.state(), BarrierState::Failed);
      // SAFETY: Callers observed FAILED with Acquire ordering, which synchronizes with
      // the owner's write of `failure`; nothing writes it afterwards.
      let reason = unsafe { (*self.failure.get()).clone() };
      InitError::Unavailable {
         unit: unit.clone(),
         reason: reason.unwrap_or_else(|| Arc::from(PANICKED)),
      }
   }
}

// SAFETY: `failure` is written at most once, by the owner, before the terminal state
// is published with Release ordering; all reads happen after an Acquire observation
// of that state.
unsafe impl Sync for Barrier {}

impl fmt::Debug for Barrier {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Barrier")
         .field("state", &self.state())
         .field("owner", &self.lock.owner())
         .finish()
   }
}
