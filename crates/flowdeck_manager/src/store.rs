use std::collections::BTreeMap;

use bevy::prelude::*;

use flowdeck_common::{Position, PositionSnapshot};

/// One tracked position plus engine-side bookkeeping that never goes on
/// the wire.
#[derive(Debug, Clone)]
pub struct PositionRecord {
    pub position: Position,
    /// Last reported physical presence. Cleared when removable hardware is
    /// unplugged, re-armed on detection; the reset orchestrator consults it
    /// to pick the terminal transition.
    pub hardware_present: bool,
}

impl PositionRecord {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            hardware_present: true,
        }
    }
}

/// A store mutation, journalled for the watch broker.
#[derive(Debug, Clone)]
pub enum StoreUpdate {
    /// The named position was created or its record rewritten.
    Changed(String),
    /// The named position was deleted.
    Removed(String),
}

impl StoreUpdate {
    pub fn position_name(&self) -> &str {
        match self {
            StoreUpdate::Changed(name) | StoreUpdate::Removed(name) => name,
        }
    }
}

/// Authoritative map of every known flow cell position.
///
/// All mutation goes through [`upsert`](Self::upsert) and
/// [`remove`](Self::remove), which journal the touched name in the same
/// call. The watch broker drains the journal strictly after the mutation
/// systems within the same frame, so every delivered diff corresponds to a
/// state that [`snapshot`](Self::snapshot) could have observed, and vice
/// versa.
#[derive(Resource, Default)]
pub struct PositionStore {
    entries: BTreeMap<String, PositionRecord>,
    journal: Vec<StoreUpdate>,
}

impl PositionStore {
    pub fn get(&self, name: &str) -> Option<&PositionRecord> {
        self.entries.get(name)
    }

    /// Wire-level view of one position.
    pub fn position(&self, name: &str) -> Option<&Position> {
        self.entries.get(name).map(|record| &record.position)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of all known positions, in snapshot order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Insert or replace a record and journal the mutation.
    pub fn upsert(&mut self, record: PositionRecord) {
        let name = record.position.name.clone();
        self.entries.insert(name.clone(), record);
        self.journal.push(StoreUpdate::Changed(name));
    }

    /// Delete a record and journal the removal.
    ///
    /// Only legal for removable positions; calling this for an integrated
    /// position is a contract violation that panics in debug builds and is
    /// ignored (with a log entry) in release builds. Unknown names are a
    /// quiet no-op so reset completion can race a concurrent removal.
    pub fn remove(&mut self, name: &str) {
        let Some(record) = self.entries.get(name) else {
            return;
        };
        debug_assert!(
            record.position.removable,
            "remove() called for integrated position {name}"
        );
        if !record.position.removable {
            warn!("refusing to remove integrated position {name}");
            return;
        }
        self.entries.remove(name);
        self.journal.push(StoreUpdate::Removed(name.to_string()));
    }

    /// Fully independent copy of the current state, ordered by name.
    ///
    /// Later mutations are never visible through a returned snapshot.
    pub fn snapshot(&self) -> PositionSnapshot {
        let positions: Vec<Position> = self
            .entries
            .values()
            .map(|record| record.position.clone())
            .collect();
        PositionSnapshot {
            total_count: positions.len() as u32,
            positions,
        }
    }

    /// Take all journalled mutations since the last drain.
    pub(crate) fn drain_journal(&mut self) -> Vec<StoreUpdate> {
        std::mem::take(&mut self.journal)
    }
}
