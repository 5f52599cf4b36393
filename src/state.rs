//! Internal synchronization state for initialization barriers.
//!
//! The state is packed into a single `AtomicU8`:
//! - Bit 0: DONE - Unit finished initializing successfully
//! - Bit 1: LOCKED - An owner is running the initializer
//! - Bit 2: WAITING - At least one thread is parked on the barrier
//! - Bit 3: FAILED - Initializer failed, unit is poisoned
//!
//! DONE and FAILED are terminal: once either is stored the word never changes
//! again, so a parked thread can validate against the exact word it observed
//! without an epoch counter.
//!
//! Blocking uses `parking_lot_core`'s address-keyed parking, the same futex-style
//! scheme `parking_lot` itself is built on.

use core::mem;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use parking_lot_core::{DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

use crate::initiator::Initiator;

/// Outcome of a single acquisition attempt.
pub(crate) enum Acquired<'a> {
   /// The caller won the race and must run the initializer.
   Owner(InitGuard<'a>),
   /// The caller is the logical owner re-entering its own barrier.
   Reentrant,
   /// Terminal success.
   Initialized,
   /// Terminal failure.
   Failed,
}

/// Atomic state word plus the identity of the owning initiator.
pub(crate) struct BarrierLock {
   state: AtomicU8,
   /// Raw [`Initiator`] of the owner, `0` until the first CAS winner records itself.
   owner: AtomicU64,
}

impl BarrierLock {
   /// Bit flag: initialization completed.
   pub(crate) const DONE: u8 = 1;
   /// Bit flag: initialization in progress.
   pub(crate) const LOCKED: u8 = 2;
   /// Bit flag: at least one thread is parked.
   const WAITING: u8 = 4;
   /// Bit flag: initialization failed.
   pub(crate) const FAILED: u8 = 8;

   #[inline]
   pub(crate) const fn new() -> Self {
      Self {
         state: AtomicU8::new(0),
         owner: AtomicU64::new(0),
      }
   }

   /// Loads the raw state word.
   #[inline]
   pub(crate) fn load(&self, ordering: Ordering) -> u8 {
      self.state.load(ordering)
   }

   #[inline]
   pub(crate) fn is_done(&self) -> bool {
      self.state.load(Ordering::Acquire) & Self::DONE != 0
   }

   /// Returns the recorded owner, if any thread ever won the barrier.
   #[inline]
   pub(crate) fn owner(&self) -> Option<Initiator> {
      Initiator::from_raw(self.owner.load(Ordering::Relaxed))
   }

   fn notify_all(&self) {
      // SAFETY: The key is the address of `self.state`, the same key used by `wait`.
      unsafe {
         parking_lot_core::unpark_all(self.state.as_ptr() as usize, DEFAULT_UNPARK_TOKEN);
      }
   }

   /// Parks the calling thread until the state word differs from `expected_state`.
   pub(crate) fn wait(&self, expected_state: u8) {
      tracing::trace!(state = expected_state, "parking until barrier settles");
      // SAFETY: See `notify_all`.
      unsafe {
         // park() runs the validation closure under the bucket lock and only sleeps
         // if it returns true, so a terminal store racing with us is never missed.
         let _ = parking_lot_core::park(
            self.state.as_ptr() as usize,
            || self.state.load(Ordering::Acquire) == expected_state,
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            None,
         );
      }
   }

   /// Publishes a terminal state and wakes every parked thread.
   ///
   /// Only called through [`InitGuard`], i.e. by the owner.
   fn finish(&self, terminal: u8) {
      debug_assert!(terminal == Self::DONE || terminal == Self::FAILED);
      // Release pairs with the Acquire loads in `step`, so everything the initializer
      // wrote (and the failure reason) is visible to whoever observes the terminal word.
      let prev_state = self.state.swap(terminal, Ordering::Release);
      debug_assert!(prev_state & Self::LOCKED != 0, "finish without ownership");
      if prev_state & Self::WAITING != 0 {
         self.notify_all();
      }
   }

   /// One non-blocking evaluation of the state machine.
   ///
   /// Returns `Err(state)` when the caller must wait; `state` is the word to park on
   /// and already carries the WAITING flag.
   pub(crate) fn step(&self, initiator: Initiator) -> Result<Acquired<'_>, u8> {
      loop {
         let current_state = self.state.load(Ordering::Acquire);
         if current_state & Self::DONE != 0 {
            return Ok(Acquired::Initialized);
         }
         if current_state & Self::FAILED != 0 {
            return Ok(Acquired::Failed);
         }

         if current_state & Self::LOCKED == 0 {
            match self.state.compare_exchange_weak(
               current_state,
               Self::LOCKED,
               Ordering::Acquire,
               Ordering::Relaxed,
            ) {
               Ok(_) => {
                  self.owner.store(initiator.get(), Ordering::Relaxed);
                  return Ok(Acquired::Owner(InitGuard::new(self)));
               }
               Err(_) => {
                  core::hint::spin_loop();
                  continue;
               }
            }
         }

         // Someone holds the barrier. The owner field is written by that thread
         // right after its CAS; a stale zero can never match a live initiator, and
         // the owner always observes its own store.
         if self.owner.load(Ordering::Relaxed) == initiator.get() {
            return Ok(Acquired::Reentrant);
         }

         if current_state & Self::WAITING == 0 {
            let new_state = current_state | Self::WAITING;
            match self.state.compare_exchange_weak(
               current_state,
               new_state,
               Ordering::Relaxed,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Err(new_state),
               Err(_) => {
                  core::hint::spin_loop();
                  continue;
               }
            }
         }
         return Err(current_state);
      }
   }

   /// Acquires the barrier, parking while another initiator owns it.
   pub(crate) fn acquire(&self, initiator: Initiator) -> Acquired<'_> {
      loop {
         match self.step(initiator) {
            Ok(acquired) => return acquired,
            Err(state) => self.wait(state),
         }
      }
   }
}

/// RAII guard held by the owner while the initializer runs.
///
/// Must be resolved with [`commit`](Self::commit) or [`poison`](Self::poison).
/// Dropping it unresolved (the initializer panicked) poisons the barrier.
pub(crate) struct InitGuard<'a> {
   lock: &'a BarrierLock,
}

impl<'a> InitGuard<'a> {
   #[inline(always)]
   const fn new(lock: &'a BarrierLock) -> Self {
      Self { lock }
   }

   /// Marks the unit initialized and wakes waiters.
   #[inline]
   pub(crate) fn commit(self) {
      self.lock.finish(BarrierLock::DONE);
      mem::forget(self);
   }

   /// Marks the unit failed and wakes waiters.
   #[inline]
   pub(crate) fn poison(self) {
      self.lock.finish(BarrierLock::FAILED);
      mem::forget(self);
   }
}

impl Drop for InitGuard<'_> {
   fn drop(&mut self) {
      self.lock.finish(BarrierLock::FAILED);
   }
}
