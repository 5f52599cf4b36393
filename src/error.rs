//! Error types surfaced by initialization barriers.

use std::collections::TryReserveError;
use std::sync::Arc;

use thiserror::Error;

use crate::unit::UnitId;

/// Error type initializers return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure observed by a caller of `ensure_initialized`.
///
/// Only the owner of a unit's barrier ever sees [`InitError::Initializer`], carrying
/// the cause its initializer returned. Every other observer, whether it was parked
/// during the failure or arrives later, gets a fresh [`InitError::Unavailable`].
#[derive(Error, Debug)]
pub enum InitError {
   /// The initializer returned an error. Delivered to the owning initiator only.
   #[error("initializer for unit `{unit}` failed")]
   Initializer {
      unit: UnitId,
      #[source]
      source: BoxError,
   },

   /// The unit is poisoned by an earlier failed initialization.
   #[error("could not initialize unit `{unit}`: {reason}")]
   Unavailable { unit: UnitId, reason: Arc<str> },

   /// A parent unit failed, so this unit's own initializer never ran.
   #[error("unit `{unit}` depends on `{parent}`, which failed to initialize")]
   Dependency {
      unit: UnitId,
      parent: UnitId,
      #[source]
      source: Box<InitError>,
   },

   /// The directory could not allocate an entry for the unit.
   #[error("out of memory registering unit `{unit}`")]
   ResourceExhausted {
      unit: UnitId,
      #[source]
      source: TryReserveError,
   },
}

impl InitError {
   /// The unit this error is about.
   pub fn unit(&self) -> &UnitId {
      match self {
         Self::Initializer { unit, .. }
         | Self::Unavailable { unit, .. }
         | Self::Dependency { unit, .. }
         | Self::ResourceExhausted { unit, .. } => unit,
      }
   }

   /// Returns `true` if this is the initializer's own error, as seen by the owner.
   pub fn is_original_cause(&self) -> bool {
      matches!(self, Self::Initializer { .. })
   }

   /// Returns `true` if the unit (or one of its ancestors) is permanently poisoned.
   pub fn is_poisoned(&self) -> bool {
      match self {
         Self::Initializer { .. } | Self::Unavailable { .. } => true,
         Self::Dependency { source, .. } => source.is_poisoned(),
         Self::ResourceExhausted { .. } => false,
      }
   }

   /// Unwraps the initializer's original error, if this is one.
   pub fn into_cause(self) -> Option<BoxError> {
      match self {
         Self::Initializer { source, .. } => Some(source),
         _ => None,
      }
   }
}
