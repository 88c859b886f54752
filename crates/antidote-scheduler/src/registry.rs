//! In-memory registry of live labs and the GC whitelist.
//!
//! Locks are held for the map access only, never across cluster or
//! network calls.

use std::collections::{HashMap, HashSet};

use antidote_core::{LabId, SessionId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::kubelab::KubeLab;

/// Live labs keyed by lab ID.
#[derive(Debug, Default)]
pub struct LabRegistry {
    labs: RwLock<HashMap<LabId, KubeLab>>,
}

impl LabRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of a lab, if registered.
    #[must_use]
    pub fn get(&self, lab_id: &LabId) -> Option<KubeLab> {
        self.labs.read().get(lab_id).cloned()
    }

    /// Check if a lab is registered.
    #[must_use]
    pub fn contains(&self, lab_id: &LabId) -> bool {
        self.labs.read().contains_key(lab_id)
    }

    /// Register a lab unless its ID is already taken.
    ///
    /// # Errors
    ///
    /// Gives the lab back if another lab holds the same ID.
    pub fn insert_new(&self, lab: KubeLab) -> std::result::Result<(), KubeLab> {
        let mut labs = self.labs.write();
        let id = lab.create_request.uuid;
        if labs.contains_key(&id) {
            return Err(lab);
        }
        labs.insert(id, lab);
        Ok(())
    }

    /// Remove a lab from the registry.
    pub fn remove(&self, lab_id: &LabId) -> Option<KubeLab> {
        self.labs.write().remove(lab_id)
    }

    /// Mutate a registered lab in place, returning the closure's result.
    pub fn update<T>(&self, lab_id: &LabId, f: impl FnOnce(&mut KubeLab) -> T) -> Option<T> {
        self.labs.write().get_mut(lab_id).map(f)
    }

    /// Remove and return every lab older than `ttl` at `now`, skipping
    /// labs owned by an exempt session.
    pub fn take_expired(
        &self,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
        exempt: &HashSet<SessionId>,
    ) -> Vec<KubeLab> {
        let mut labs = self.labs.write();
        let expired: Vec<LabId> = labs
            .iter()
            .filter(|(_, lab)| lab.age(now) > ttl && !exempt.contains(lab.session_id()))
            .map(|(id, _)| *id)
            .collect();
        expired.iter().filter_map(|id| labs.remove(id)).collect()
    }

    /// Copies of every registered lab.
    #[must_use]
    pub fn snapshot(&self) -> Vec<KubeLab> {
        self.labs.read().values().cloned().collect()
    }

    /// Number of registered labs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labs.read().len()
    }

    /// Check if no lab is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labs.read().is_empty()
    }
}

/// Sessions exempt from time-based reclamation.
#[derive(Debug, Default)]
pub struct GcWhitelist {
    sessions: Mutex<HashSet<SessionId>>,
}

impl GcWhitelist {
    /// Create an empty whitelist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exempt a session. Returns `false` if it was already exempt.
    pub fn add(&self, session: SessionId) -> bool {
        self.sessions.lock().insert(session)
    }

    /// Lift a session's exemption. Returns `false` if it was not exempt.
    pub fn remove(&self, session: &SessionId) -> bool {
        self.sessions.lock().remove(session)
    }

    /// Exempt sessions, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<SessionId> {
        let mut sessions: Vec<_> = self.sessions.lock().iter().cloned().collect();
        sessions.sort();
        sessions
    }

    /// Copy of the set, for use outside the lock.
    #[must_use]
    pub fn snapshot(&self) -> HashSet<SessionId> {
        self.sessions.lock().clone()
    }
}
