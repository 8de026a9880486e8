//! Fixed-size table of open sessions.
//!
//! [`SessionRegistry`] hands out [`SessionHandle`]s for a bounded number of
//! slots. Handles carry a generation, so closing a stale handle never touches
//! a session that later reused its slot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fusebridge_config::{Config, SessionLimits};
use thiserror::Error;
use tracing::debug;

use crate::session::Session;
use crate::wire::ErrorConvention;

/// Log target for registry operations.
const REGISTRY_TARGET: &str = "fusebridge_ipc::registry";

/// Opaque reference to a session in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    slot: usize,
    generation: u64,
}

impl SessionHandle {
    /// Index of the slot the session occupies.
    #[must_use]
    pub const fn slot(self) -> usize {
        self.slot
    }
}

/// Errors raised by registry operations.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Every slot holds an open session.
    #[error("all {capacity} session slots are in use")]
    Full {
        /// Number of slots in the registry.
        capacity: usize,
    },
    /// The handle does not name an open session.
    #[error("session handle for slot {slot} is not open")]
    UnknownHandle {
        /// Slot named by the handle.
        slot: usize,
    },
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    session: Arc<Session>,
}

#[derive(Debug)]
struct Slots {
    entries: Vec<Option<Slot>>,
    next_generation: u64,
}

/// Bounded set of sessions addressed by handle.
#[derive(Debug)]
pub struct SessionRegistry {
    limits: SessionLimits,
    convention: ErrorConvention,
    slots: Mutex<Slots>,
}

impl SessionRegistry {
    /// Creates a registry with `capacity` slots; sessions use `limits`.
    #[must_use]
    pub fn new(capacity: usize, limits: SessionLimits) -> Self {
        Self::with_convention(capacity, limits, ErrorConvention::default())
    }

    /// Creates a registry whose sessions use an explicit error convention.
    #[must_use]
    pub fn with_convention(
        capacity: usize,
        limits: SessionLimits,
        convention: ErrorConvention,
    ) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        Self {
            limits,
            convention,
            slots: Mutex::new(Slots {
                entries,
                next_generation: 0,
            }),
        }
    }

    /// Creates a registry sized and tuned by `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_sessions, config.session_limits())
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().entries.len()
    }

    /// Number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns `true` when no session is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens a session in the first free slot.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Full`] when every slot is in use.
    pub fn open(&self) -> Result<SessionHandle, RegistryError> {
        let mut slots = self.lock();
        let capacity = slots.entries.len();
        let generation = slots.next_generation;
        let Some((index, entry)) = slots
            .entries
            .iter_mut()
            .enumerate()
            .find(|(_, entry)| entry.is_none())
        else {
            return Err(RegistryError::Full { capacity });
        };
        *entry = Some(Slot {
            generation,
            session: Session::open_with_convention(self.limits, self.convention),
        });
        slots.next_generation = generation.wrapping_add(1);
        debug!(target: REGISTRY_TARGET, slot = index, generation, "session opened");
        Ok(SessionHandle {
            slot: index,
            generation,
        })
    }

    /// Returns the session behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownHandle`] for a closed or stale handle.
    pub fn get(&self, handle: SessionHandle) -> Result<Arc<Session>, RegistryError> {
        self.lock()
            .entries
            .get(handle.slot)
            .and_then(Option::as_ref)
            .filter(|slot| slot.generation == handle.generation)
            .map(|slot| Arc::clone(&slot.session))
            .ok_or(RegistryError::UnknownHandle { slot: handle.slot })
    }

    /// Kills the session behind `handle` and frees its slot.
    ///
    /// Closing a handle that is already closed does nothing.
    pub fn close(&self, handle: SessionHandle) {
        let removed = {
            let mut slots = self.lock();
            slots.entries.get_mut(handle.slot).and_then(|entry| {
                if entry
                    .as_ref()
                    .is_some_and(|slot| slot.generation == handle.generation)
                {
                    entry.take()
                } else {
                    None
                }
            })
        };
        match removed {
            Some(slot) => {
                debug!(target: REGISTRY_TARGET, slot = handle.slot, "closing session");
                slot.session.close();
            }
            None => {
                debug!(target: REGISTRY_TARGET, slot = handle.slot, "session already closed");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        let slots = self.slots.get_mut().unwrap_or_else(PoisonError::into_inner);
        for slot in slots.entries.iter_mut().filter_map(Option::take) {
            slot.session.close();
        }
    }
}
