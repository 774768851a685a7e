//! Listener-to-source routing policy.

use crate::id::ParticipantId;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Mapping from each listener to the set of participants they hear.
///
/// The default policy is a full mesh: on join, everyone hears everyone,
/// including themselves. Selective policies replace individual entries
/// through [`set`] without involving any other component.
///
/// The table is pure bookkeeping. Applying an entry to a live mixer is
/// reconciliation, and belongs to the hub's serialized control path.
///
/// [`set`]: RoutingTable::set
#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    routes: HashMap<ParticipantId, HashSet<ParticipantId>>,
}

impl RoutingTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a joining participant under the full-mesh default: every
    /// existing listener gains `id`, and `id` hears every current
    /// participant, itself included.
    pub fn on_join(&mut self, id: &ParticipantId) {
        for sources in self.routes.values_mut() {
            sources.insert(id.clone());
        }

        let mut sources: HashSet<_> = self.routes.keys().cloned().collect();
        sources.insert(id.clone());
        self.routes.insert(id.clone(), sources);

        debug!("routing table after join of {}: {:?}", id, self.snapshot());
    }

    /// Removes a leaving participant from its own entry and from every
    /// other listener's set.
    pub fn on_leave(&mut self, id: &ParticipantId) {
        self.routes.remove(id);
        for sources in self.routes.values_mut() {
            sources.remove(id);
        }
    }

    /// Replaces `listener`'s source set atomically.
    ///
    /// Returns `false`, changing nothing, if `listener` has no entry.
    pub fn set(&mut self, listener: &ParticipantId, sources: HashSet<ParticipantId>) -> bool {
        match self.routes.get_mut(listener) {
            Some(entry) => {
                debug!("routing update: {} hears {:?}", listener, sources);
                *entry = sources;
                true
            },
            None => false,
        }
    }

    /// The set of sources `listener` currently hears, if registered.
    #[must_use]
    pub fn sources_for(&self, listener: &ParticipantId) -> Option<&HashSet<ParticipantId>> {
        self.routes.get(listener)
    }

    /// Every listener whose set contains `source`.
    #[must_use]
    pub fn listeners_hearing(&self, source: &ParticipantId) -> Vec<ParticipantId> {
        self.routes
            .iter()
            .filter(|(_, sources)| sources.contains(source))
            .map(|(listener, _)| listener.clone())
            .collect()
    }

    /// Whether `listener` has an entry.
    #[must_use]
    pub fn contains(&self, listener: &ParticipantId) -> bool {
        self.routes.contains_key(listener)
    }

    /// Registered listeners.
    #[must_use]
    pub fn listeners(&self) -> Vec<ParticipantId> {
        self.routes.keys().cloned().collect()
    }

    /// Ordered copy of the table, for snapshots and logs.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<ParticipantId, Vec<ParticipantId>> {
        self.routes
            .iter()
            .map(|(listener, sources)| {
                let mut sources: Vec<_> = sources.iter().cloned().collect();
                sources.sort();
                (listener.clone(), sources)
            })
            .collect()
    }
}
