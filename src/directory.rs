//! The unit directory and the `ensure_initialized` entry points.
//!
//! A [`Directory`] maps unit identities to their barriers. Entries are created on
//! first reference and live as long as the directory, so every caller naming the
//! same unit synchronizes on the same barrier.
//!
//! A [`Unit`] also remembers the barrier of the first directory that resolved it.
//! Repeat accesses through that directory skip the map entirely, so the initialized
//! fast path is an atomic load on the unit's barrier and nothing else.

use core::fmt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::barrier::{Barrier, BarrierState};
use crate::error::InitError;
use crate::initiator::Initiator;
use crate::unit::{InitContext, Unit, UnitId};

/// A unit's not-yet-initialized ancestry, nearest first, with the barriers resolved.
type Chain<'a> = Vec<(&'a Arc<Unit>, Arc<Barrier>)>;

/// Source of [`Directory`] ids; ids are never reused, so a stale unit cache never matches.
static NEXT_DIRECTORY: AtomicU64 = AtomicU64::new(1);

/// Registry of initialization barriers keyed by unit identity.
///
/// # Examples
///
/// ```rust
/// use init_barrier::{Directory, Unit};
///
/// let directory = Directory::new();
/// let base = Unit::new("Base", |_| Ok(()));
/// let derived = Unit::with_parent("Derived", &base, |_| Ok(()));
///
/// directory.ensure_initialized(&derived).unwrap();
/// assert!(directory.is_initialized("Base"));
/// assert!(directory.is_initialized("Derived"));
/// ```
pub struct Directory {
   id: u64,
   barriers: RwLock<HashMap<UnitId, Arc<Barrier>>>,
}

impl Directory {
   /// Creates an empty directory.
   #[must_use]
   pub fn new() -> Self {
      Self {
         id: NEXT_DIRECTORY.fetch_add(1, Ordering::Relaxed),
         barriers: RwLock::new(HashMap::new()),
      }
   }

   /// Creates an empty directory with room for `capacity` units.
   #[must_use]
   pub fn with_capacity(capacity: usize) -> Self {
      Self {
         id: NEXT_DIRECTORY.fetch_add(1, Ordering::Relaxed),
         barriers: RwLock::new(HashMap::with_capacity(capacity)),
      }
   }

   /// Number of units referenced so far.
   pub fn len(&self) -> usize {
      self.barriers.read().len()
   }

   pub fn is_empty(&self) -> bool {
      self.barriers.read().is_empty()
   }

   /// Returns the state of the unit named `id` without registering it or blocking.
   pub fn state(&self, id: &str) -> BarrierState {
      self
         .barriers
         .read()
         .get(id)
         .map_or(BarrierState::Uninitialized, |barrier| barrier.state())
   }

   /// Returns `true` if the unit named `id` finished initializing successfully.
   pub fn is_initialized(&self, id: &str) -> bool {
      self.state(id) == BarrierState::Initialized
   }

   /// Returns the barrier for `id`, creating it on first reference.
   pub(crate) fn barrier(&self, id: &UnitId) -> Result<Arc<Barrier>, InitError> {
      if let Some(barrier) = self.barriers.read().get(id) {
         return Ok(Arc::clone(barrier));
      }

      let mut barriers = self.barriers.write();
      // Another thread may have registered it between the two locks.
      if let Some(barrier) = barriers.get(id) {
         return Ok(Arc::clone(barrier));
      }
      barriers
         .try_reserve(1)
         .map_err(|source| InitError::ResourceExhausted {
            unit: id.clone(),
            source,
         })?;
      let barrier = Arc::new(Barrier::new());
      barriers.insert(id.clone(), Arc::clone(&barrier));
      tracing::trace!(unit = %id, "registered unit");
      Ok(barrier)
   }

   /// Returns the barrier for `unit`, preferring the one cached on the unit itself.
   fn unit_barrier(&self, unit: &Unit) -> Result<Arc<Barrier>, InitError> {
      if let Some(barrier) = unit.cached_barrier(self.id) {
         return Ok(Arc::clone(barrier));
      }
      let barrier = self.barrier(unit.id())?;
      unit.cache_barrier(self.id, &barrier);
      Ok(barrier)
   }

   /// Returns `true` if `unit` is known initialized without touching the map.
   #[inline]
   fn is_cached_initialized(&self, unit: &Unit) -> bool {
      unit.cached_barrier(self.id).is_some_and(|barrier| barrier.is_initialized())
   }

   /// Ensures `unit` is initialized on behalf of the calling thread.
   ///
   /// See [`ensure_initialized_as`](Self::ensure_initialized_as).
   pub fn ensure_initialized(&self, unit: &Arc<Unit>) -> Result<(), InitError> {
      self.ensure_initialized_as(unit, Initiator::current())
   }

   /// Ensures `unit` is initialized on behalf of `initiator`.
   ///
   /// - An initialized unit returns immediately, without consulting its parent.
   /// - Otherwise the parent chain is ensured first, root-most ancestor first.
   ///   A failed ancestor fails the unit with [`InitError::Dependency`] and the
   ///   unit's own initializer never runs.
   /// - If `initiator` already owns the unit's barrier, returns immediately.
   /// - If another initiator owns it, blocks until it reaches a terminal state.
   /// - If nobody owns it, `initiator` claims it and runs the initializer. A failure
   ///   is returned as [`InitError::Initializer`] to this call only; every later or
   ///   concurrent observer gets [`InitError::Unavailable`].
   pub fn ensure_initialized_as(&self, unit: &Arc<Unit>, initiator: Initiator) -> Result<(), InitError> {
      if self.is_cached_initialized(unit) {
         return Ok(());
      }
      let chain = self.pending_chain(unit)?;
      for (depth, (current, barrier)) in chain.iter().enumerate().rev() {
         let ctx = InitContext::new(self, current, initiator);
         barrier
            .initialize(current.id(), initiator, || current.run(&ctx))
            .map_err(|err| derive_failure(current, chain[..depth].iter().rev(), err))?;
      }
      Ok(())
   }

   /// Async flavor of [`ensure_initialized_as`](Self::ensure_initialized_as).
   ///
   /// Tasks have no stable "current thread", so the logical initiator is explicit.
   /// Initializers still run synchronously on the task that wins the barrier.
   /// Waiting yields to the runtime first. A long wait parks in `block_in_place` on a
   /// multi-threaded tokio runtime and on the blocking pool on a current-thread one.
   #[cfg(feature = "async-tokio-mt")]
   pub async fn ensure_initialized_async(
      &self,
      unit: &Arc<Unit>,
      initiator: Initiator,
   ) -> Result<(), InitError> {
      if self.is_cached_initialized(unit) {
         return Ok(());
      }
      let chain = self.pending_chain(unit)?;
      for (depth, (current, barrier)) in chain.iter().enumerate().rev() {
         let ctx = InitContext::new(self, current, initiator);
         barrier
            .initialize_async(current.id(), initiator, || current.run(&ctx))
            .await
            .map_err(|err| derive_failure(current, chain[..depth].iter().rev(), err))?;
      }
      Ok(())
   }

   /// Collects `unit` and its ancestors up to (excluding) the first initialized one.
   fn pending_chain<'a>(&self, unit: &'a Arc<Unit>) -> Result<Chain<'a>, InitError> {
      let mut chain: Chain<'a> = Vec::new();
      let mut next = Some(unit);
      while let Some(current) = next {
         let barrier = self
            .unit_barrier(current)
            .map_err(|err| derive_failure(current, chain.iter().rev(), err))?;
         if barrier.is_initialized() {
            break;
         }
         next = current.parent();
         chain.push((current, barrier));
      }
      Ok(chain)
   }
}

/// Wraps `err`, raised for `failed`, once per descendant down to the requested unit.
///
/// `descendants` yields the chain below `failed`, nearest child first.
fn derive_failure<'c, 'a: 'c>(
   failed: &Arc<Unit>,
   descendants: impl Iterator<Item = &'c (&'a Arc<Unit>, Arc<Barrier>)>,
   mut err: InitError,
) -> InitError {
   let mut parent = failed.id().clone();
   for (child, _) in descendants {
      tracing::debug!(unit = %child.id(), parent = %parent, "dependency failed, skipping initializer");
      err = InitError::Dependency {
         unit: child.id().clone(),
         parent,
         source: Box::new(err),
      };
      parent = child.id().clone();
   }
   err
}

impl Default for Directory {
   fn default() -> Self {
      Self::new()
   }
}

impl fmt::Debug for Directory {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Directory")
         .field("units", &self.len())
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use std::sync::mpsc;
   use std::sync::Barrier as StartLine;
   use std::thread;
   use std::time::Duration;

   use super::*;

   #[test]
   fn racing_lookups_share_one_barrier() {
      let directory = Arc::new(Directory::new());
      let start = Arc::new(StartLine::new(8));
      let id = UnitId::from("Racy");

      let handles: Vec<_> = (0..8)
         .map(|_| {
            let directory = Arc::clone(&directory);
            let start = Arc::clone(&start);
            let id = id.clone();
            thread::spawn(move || {
               start.wait();
               directory.barrier(&id).unwrap()
            })
         })
         .collect();

      let barriers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
      for barrier in &barriers[1..] {
         assert!(Arc::ptr_eq(&barriers[0], barrier));
      }
      assert_eq!(directory.len(), 1);
   }

   #[test]
   fn state_lookup_does_not_register() {
      let directory = Directory::new();
      assert_eq!(directory.state("Nobody"), BarrierState::Uninitialized);
      assert!(directory.is_empty());

      directory.barrier(&UnitId::from("Somebody")).unwrap();
      assert_eq!(directory.len(), 1);
      assert_eq!(directory.state("Somebody"), BarrierState::Uninitialized);
   }

   #[test]
   fn pending_chain_stops_at_initialized_ancestor() {
      let directory = Directory::new();
      let root = Unit::new("Root", |_| Ok(()));
      let middle = Unit::with_parent("Middle", &root, |_| Ok(()));
      let leaf = Unit::with_parent("Leaf", &middle, |_| Ok(()));

      directory.ensure_initialized(&root).unwrap();
      let chain = directory.pending_chain(&leaf).unwrap();
      let ids: Vec<_> = chain.iter().map(|(unit, _)| unit.id().as_str()).collect();
      assert_eq!(ids, ["Leaf", "Middle"]);
   }

   #[test]
   fn initialized_unit_skips_the_map() {
      let directory = Arc::new(Directory::new());
      let hot = Unit::new("Hot", |_| Ok(()));
      directory.ensure_initialized(&hot).unwrap();

      // A writer parked on the map must not stall readers of an initialized unit.
      let registering = directory.barriers.write();
      let (tx, rx) = mpsc::channel();
      {
         let directory = Arc::clone(&directory);
         let hot = Arc::clone(&hot);
         thread::spawn(move || {
            let _ = tx.send(directory.ensure_initialized(&hot).is_ok());
         });
      }
      assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
      drop(registering);
   }

   #[test]
   fn unit_cache_is_per_directory() {
      let first = Directory::new();
      let second = Directory::new();
      let unit = Unit::new("Shared", |_| Ok(()));

      first.ensure_initialized(&unit).unwrap();
      assert!(unit.cached_barrier(first.id).is_some());
      assert!(unit.cached_barrier(second.id).is_none());

      // The second directory still goes through its own map and barrier.
      assert_eq!(second.state("Shared"), BarrierState::Uninitialized);
      second.ensure_initialized(&unit).unwrap();
      assert!(second.is_initialized("Shared"));
   }

   #[test]
   fn exhausted_registration_wraps_per_descendant() {
      let root = Unit::new("Root", |_| Ok(()));
      let middle = Unit::with_parent("Middle", &root, |_| Ok(()));
      let leaf = Unit::with_parent("Leaf", &middle, |_| Ok(()));
      let chain: Chain<'_> = vec![(&leaf, Arc::new(Barrier::new())), (&middle, Arc::new(Barrier::new()))];

      let source = Vec::<u8>::new().try_reserve(usize::MAX).unwrap_err();
      let err = InitError::ResourceExhausted {
         unit: root.id().clone(),
         source,
      };
      let err = derive_failure(&root, chain.iter().rev(), err);

      assert_eq!(err.unit().as_str(), "Leaf");
      assert!(!err.is_poisoned());
      assert_eq!(err.to_string(), "unit `Leaf` depends on `Middle`, which failed to initialize");
      let InitError::Dependency { parent, source, .. } = err else {
         panic!("expected Dependency");
      };
      assert_eq!(parent.as_str(), "Middle");
      let InitError::Dependency { unit, parent, source } = *source else {
         panic!("expected nested Dependency");
      };
      assert_eq!((unit.as_str(), parent.as_str()), ("Middle", "Root"));
      assert!(matches!(*source, InitError::ResourceExhausted { .. }));
      assert_eq!(source.to_string(), "out of memory registering unit `Root`");
   }
}
