//! Explicit lazy/eager relationship holder.
//!
//! # Responsibility
//! - Carry a many-to-one relationship as an explicit tagged state.
//! - Resolve unresolved references on first access and cache the result on
//!   the instance.
//!
//! # Invariants
//! - `Unresolved` resolves only inside the live scope it was loaded in;
//!   otherwise access fails with `DetachedAccess`.
//! - Once `Resolved`, access never touches the store again.

use crate::db::{ScopeToken, TxHandle};
use crate::error::{RepoError, RepoResult};
use crate::model::entity::{Entity, Tracking};
use crate::repo::entity_repo::load_by_key;
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum Reference<T: Entity> {
    /// Null foreign key.
    Empty,
    /// Foreign key known, target not loaded yet.
    Unresolved { key: T::Key, scope: ScopeToken },
    /// Target loaded (eager join, first access, or assigned in-process).
    Resolved(Box<T>),
}

impl<T: Entity> Default for Reference<T> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<T: Entity> Reference<T> {
    /// Points at an in-process entity.
    pub fn to(entity: &T) -> Self {
        Self::Resolved(Box::new(entity.clone()))
    }

    /// Foreign key value, if the target has one.
    pub fn key(&self) -> Option<T::Key> {
        match self {
            Self::Empty => None,
            Self::Unresolved { key, .. } => Some(*key),
            Self::Resolved(entity) => entity.key(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// The loaded target without touching the store.
    pub fn loaded(&self) -> Option<&T> {
        match self {
            Self::Resolved(entity) => Some(entity),
            Self::Empty | Self::Unresolved { .. } => None,
        }
    }

    /// Returns the target, loading it by foreign key on first access.
    pub fn get(&mut self, tx: &TxHandle<'_>) -> RepoResult<Option<&T>> {
        if let Self::Unresolved { key, scope } = self {
            let entity = T::schema().name;
            if !scope.is_live_in(tx) {
                return Err(RepoError::DetachedAccess { entity });
            }

            let key = *key;
            let loaded = load_by_key::<T>(tx, key, Tracking::Managed)?.ok_or_else(|| {
                RepoError::RelatedEntityNotFound {
                    entity,
                    key: key.to_string(),
                }
            })?;
            debug!("event=lazy_load module=model status=ok entity={entity}");
            *self = Self::Resolved(Box::new(loaded));
        }
        Ok(self.loaded())
    }
}
