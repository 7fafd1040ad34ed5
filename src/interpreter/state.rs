use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::action::Action;
use super::snapshot::{Entity, Snapshot};

/// Low-confidence outcome recorded during interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    /// A call chained onto a filter that matched nothing; no actions emitted.
    EmptyFilter {
        /// Collection that was filtered.
        collection: String,
        /// Call that became a no-op.
        call: String,
    },
    /// A streamed program stopped being valid after some actions went out;
    /// the emitted prefix stands as the result.
    Truncated {
        /// Actions kept.
        emitted: usize,
        /// What ended the stream early.
        reason: String,
    },
}

/// Iteration variable bound to one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// Variable name derived from the collection.
    pub variable: String,
    /// Entity currently visited.
    pub entity: Entity,
}

/// Result of the most recent `filter` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Filtered {
    /// Source collection name.
    pub collection: String,
    /// Matches in the collection's original order.
    pub entities: Vec<Entity>,
}

/// Mutable state for one interpreter invocation.
///
/// Actions only ever grow; the remaining slots are reset at every
/// statement boundary.
#[derive(Debug, Clone)]
pub struct InterpreterState {
    current_entity: Option<usize>,
    entity_counter: usize,
    created: BTreeSet<usize>,
    collections: BTreeMap<String, Vec<Entity>>,
    filtered: Option<Filtered>,
    iteration: Option<Binding>,
    actions: Vec<Action>,
    notices: Vec<Notice>,
}

impl InterpreterState {
    /// Fresh state seeded from a snapshot: `tracks` and `clips` collections,
    /// and an entity counter past the snapshot's last track.
    pub fn new(snapshot: &Snapshot) -> Self {
        let mut collections = BTreeMap::new();
        collections.insert("tracks".to_string(), snapshot.track_entities());
        collections.insert("clips".to_string(), snapshot.clip_entities());
        Self {
            current_entity: None,
            entity_counter: snapshot.next_track_index(),
            created: BTreeSet::new(),
            collections,
            filtered: None,
            iteration: None,
            actions: Vec::new(),
            notices: Vec::new(),
        }
    }

    /// Currently bound entity, if any.
    pub fn current_entity(&self) -> Option<usize> {
        self.current_entity
    }

    /// Bind an entity.
    pub fn bind(&mut self, index: usize) {
        self.current_entity = Some(index);
    }

    /// Drop the bound entity.
    pub fn unbind(&mut self) {
        self.current_entity = None;
    }

    /// Next index that an auto-indexed creation would receive.
    pub fn entity_counter(&self) -> usize {
        self.entity_counter
    }

    /// Allocate an index for a new entity. An explicit index advances the
    /// counter past it.
    pub fn allocate(&mut self, explicit: Option<usize>) -> usize {
        let index = explicit.unwrap_or(self.entity_counter);
        self.entity_counter = self.entity_counter.max(index.saturating_add(1));
        self.created.insert(index);
        index
    }

    /// Whether the index was created earlier in this invocation.
    pub fn was_created(&self, index: usize) -> bool {
        self.created.contains(&index)
    }

    /// Named collection lookup.
    pub fn collection(&self, name: &str) -> Option<&[Entity]> {
        self.collections.get(name).map(Vec::as_slice)
    }

    /// Store or replace a named collection.
    pub fn store_collection(&mut self, name: impl Into<String>, entities: Vec<Entity>) {
        self.collections.insert(name.into(), entities);
    }

    /// Names of all collections.
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// Current filtered set.
    pub fn filtered(&self) -> Option<&Filtered> {
        self.filtered.as_ref()
    }

    /// Install a filtered set.
    pub fn set_filtered(&mut self, filtered: Filtered) {
        self.filtered = Some(filtered);
    }

    /// Consume the filtered set.
    pub fn take_filtered(&mut self) -> Option<Filtered> {
        self.filtered.take()
    }

    /// Active iteration binding.
    pub fn iteration(&self) -> Option<&Binding> {
        self.iteration.as_ref()
    }

    /// Activate an iteration binding. Nested iteration is rejected before
    /// this is reached, so at most one binding is ever active.
    pub fn begin_iteration(&mut self, binding: Binding) {
        self.iteration = Some(binding);
    }

    /// Clear the iteration binding.
    pub fn end_iteration(&mut self) {
        self.iteration = None;
    }

    /// Append an action.
    pub fn push_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Actions emitted so far.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Record a notice.
    pub fn push_notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    /// Notices recorded so far.
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Return to idle between statements.
    pub fn end_statement(&mut self) {
        self.current_entity = None;
        self.filtered = None;
        self.iteration = None;
    }

    /// Consume the state, yielding actions and notices.
    pub fn into_parts(self) -> (Vec<Action>, Vec<Notice>) {
        (self.actions, self.notices)
    }
}
