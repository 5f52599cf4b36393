//! Units: named, lazily-initializable definitions.

use core::fmt;
use std::borrow::Borrow;
use std::sync::{Arc, OnceLock};

use crate::barrier::Barrier;
use crate::directory::Directory;
use crate::error::{BoxError, InitError};
use crate::initiator::Initiator;

/// Stable identity of a unit, used as the directory key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(Arc<str>);

impl UnitId {
   #[inline]
   pub fn as_str(&self) -> &str {
      &self.0
   }
}

impl Borrow<str> for UnitId {
   fn borrow(&self) -> &str {
      &self.0
   }
}

impl From<&str> for UnitId {
   fn from(value: &str) -> Self {
      Self(Arc::from(value))
   }
}

impl From<String> for UnitId {
   fn from(value: String) -> Self {
      Self(Arc::from(value))
   }
}

impl fmt::Debug for UnitId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      fmt::Debug::fmt(self.as_str(), f)
   }
}

impl fmt::Display for UnitId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Initializer action of a unit.
pub type Initializer = dyn Fn(&InitContext<'_>) -> Result<(), BoxError> + Send + Sync;

/// A lazily-initializable definition: identity, optional parent, and initializer.
///
/// Parents are fixed at construction, so the dependency graph is always acyclic.
pub struct Unit {
   id: UnitId,
   parent: Option<Arc<Unit>>,
   init: Box<Initializer>,
   /// Barrier of the first directory that resolved this unit, keyed by directory id.
   barrier: OnceLock<(u64, Arc<Barrier>)>,
}

impl Unit {
   /// Creates a root unit.
   pub fn new<F>(id: impl Into<UnitId>, init: F) -> Arc<Self>
   where
      F: Fn(&InitContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
   {
      Arc::new(Self {
         id: id.into(),
         parent: None,
         init: Box::new(init),
         barrier: OnceLock::new(),
      })
   }

   /// Creates a unit whose `parent` must reach a terminal state before `init` may run.
   pub fn with_parent<F>(id: impl Into<UnitId>, parent: &Arc<Unit>, init: F) -> Arc<Self>
   where
      F: Fn(&InitContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
   {
      Arc::new(Self {
         id: id.into(),
         parent: Some(Arc::clone(parent)),
         init: Box::new(init),
         barrier: OnceLock::new(),
      })
   }

   #[inline]
   pub fn id(&self) -> &UnitId {
      &self.id
   }

   #[inline]
   pub fn parent(&self) -> Option<&Arc<Unit>> {
      self.parent.as_ref()
   }

   /// Iterates over the parent chain, nearest first.
   pub fn ancestors(&self) -> impl Iterator<Item = &Arc<Unit>> {
      core::iter::successors(self.parent.as_ref(), |unit| unit.parent.as_ref())
   }

   /// Barrier cached for the directory with id `directory`, if any. Lock-free.
   #[inline]
   pub(crate) fn cached_barrier(&self, directory: u64) -> Option<&Arc<Barrier>> {
      match self.barrier.get() {
         Some((owner, barrier)) if *owner == directory => Some(barrier),
         _ => None,
      }
   }

   /// Caches `barrier` for `directory` unless another directory got there first.
   pub(crate) fn cache_barrier(&self, directory: u64, barrier: &Arc<Barrier>) {
      let _ = self.barrier.set((directory, Arc::clone(barrier)));
   }

   pub(crate) fn run(&self, ctx: &InitContext<'_>) -> Result<(), BoxError> {
      (self.init)(ctx)
   }
}

impl fmt::Debug for Unit {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Unit")
         .field("id", &self.id)
         .field("parent", &self.parent.as_ref().map(|p| &p.id))
         .finish_non_exhaustive()
   }
}

/// Context handed to a running initializer.
///
/// Trigger points reached from inside the initializer should go through
/// [`InitContext::ensure_initialized`], which carries the owner's [`Initiator`]
/// so re-entering the unit being initialized never blocks.
pub struct InitContext<'a> {
   directory: &'a Directory,
   unit: &'a Arc<Unit>,
   initiator: Initiator,
}

impl<'a> InitContext<'a> {
   pub(crate) fn new(directory: &'a Directory, unit: &'a Arc<Unit>, initiator: Initiator) -> Self {
      Self {
         directory,
         unit,
         initiator,
      }
   }

   #[inline]
   pub fn directory(&self) -> &'a Directory {
      self.directory
   }

   /// The unit whose initializer is running.
   #[inline]
   pub fn unit(&self) -> &'a Arc<Unit> {
      self.unit
   }

   #[inline]
   pub fn initiator(&self) -> Initiator {
      self.initiator
   }

   /// Ensures `unit` is initialized on behalf of the running initializer.
   pub fn ensure_initialized(&self, unit: &Arc<Unit>) -> Result<(), InitError> {
      self.directory.ensure_initialized_as(unit, self.initiator)
   }
}
