//! Purpose: Concurrent membership set of all live namespaces.
//! Exports: `NamespaceRegistry`, `Snapshot`.
//! Role: The only way cross-namespace resolution discovers candidates.
//! Invariants: Snapshots are immutable; mutation swaps in a fresh list (copy-on-write).
//! Invariants: At most one live member per descriptor name.
use std::sync::{Arc, PoisonError, RwLock};

use crate::core::error::{Error, ErrorKind};
use crate::core::namespace::NamespaceCore;
use crate::core::symbol::NamespaceId;

/// Point-in-time view of the registry; unaffected by later add/remove.
pub type Snapshot = Arc<Vec<Arc<NamespaceCore>>>;

#[derive(Default)]
pub struct NamespaceRegistry {
    members: RwLock<Snapshot>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, ns: Arc<NamespaceCore>) -> Result<(), Error> {
        let mut guard = self.members.write().unwrap_or_else(PoisonError::into_inner);
        let name = &ns.descriptor().name;
        if guard.iter().any(|member| &member.descriptor().name == name) {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message("a namespace with this name is already loaded")
                .with_unit(name)
                .with_hint("Close the loaded namespace before loading the unit again."));
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(ns);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Returns true when a member was removed.
    pub(crate) fn remove(&self, id: NamespaceId) -> bool {
        let mut guard = self.members.write().unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|member| member.id() == id) {
            return false;
        }
        let next: Vec<_> = guard
            .iter()
            .filter(|member| member.id() != id)
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.members.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn contains(&self, id: NamespaceId) -> bool {
        self.snapshot().iter().any(|member| member.id() == id)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.snapshot()
            .iter()
            .any(|member| member.descriptor().name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|member| member.descriptor().name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
