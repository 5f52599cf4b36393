//! Logical initializer identity.
//!
//! Reentrancy is decided by comparing the caller's [`Initiator`] with the one
//! recorded by the barrier's owner. OS threads get a stable token through
//! [`Initiator::current`]; task-based callers, for which "current thread" means
//! nothing, mint their own with [`Initiator::fresh`] and pass it explicitly.

use core::fmt;
use core::num::NonZeroU64;
use core::sync::atomic::{AtomicU64, Ordering};

static NEXT_INITIATOR: AtomicU64 = AtomicU64::new(1);

thread_local! {
   static CURRENT: Initiator = Initiator::fresh();
}

/// Identity of a logical initializer (a thread, or a task chain carrying a token).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Initiator(NonZeroU64);

impl Initiator {
   /// Returns the initiator bound to the calling OS thread.
   ///
   /// The same thread always gets the same token.
   #[inline]
   pub fn current() -> Self {
      CURRENT.with(|initiator| *initiator)
   }

   /// Allocates a new, never-before-seen initiator.
   pub fn fresh() -> Self {
      let raw = NEXT_INITIATOR.fetch_add(1, Ordering::Relaxed);
      // Wrapping a u64 counter is not a practical concern.
      Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
   }

   #[inline]
   pub(crate) fn get(self) -> u64 {
      self.0.get()
   }

   #[inline]
   pub(crate) fn from_raw(raw: u64) -> Option<Self> {
      NonZeroU64::new(raw).map(Self)
   }
}

impl fmt::Debug for Initiator {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "Initiator({})", self.0)
   }
}

impl fmt::Display for Initiator {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "#{}", self.0)
   }
}
