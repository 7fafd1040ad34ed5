//! Dependency buffer for streaming runs.
//!
//! Structural actions reach the caller as soon as they are interpreted.
//! Content payloads wait until the structural task has finished and the
//! content task has its full payload; then they are attached to their target
//! and released together with the content's descriptive actions. Empty
//! `add_midi` actions from the structural task are withheld while content is
//! pending so the payload can be injected into them.
//!
//! All state, including the caller's callback, sits behind one
//! `parking_lot::Mutex`; the callback runs under the lock so it observes
//! actions in their final order.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::merge::{note_values, resolve_target, tag};
use crate::generator::{Capability, GeneratorResult};
use crate::interpreter::{Action, Snapshot, kinds};

/// Caller callback invoked once per emitted action.
pub type ActionSink = Box<dyn FnMut(&Action) + Send>;

struct BufferState {
    snapshot: Snapshot,
    sink: ActionSink,
    /// Actions handed to the caller, in order.
    emitted: Vec<Action>,
    /// Every structural action seen, emitted or not.
    structural: Vec<Action>,
    /// Empty attach actions held back for injection.
    withheld: Vec<Action>,
    structural_done: bool,
    /// Content capabilities still running.
    pending: BTreeSet<Capability>,
    /// Finished content waiting for the structural task.
    ready: Vec<GeneratorResult>,
    unattached: Vec<Capability>,
}

impl BufferState {
    /// Content that has not been released yet, finished or not.
    fn content_outstanding(&self) -> bool {
        !self.pending.is_empty() || !self.ready.is_empty()
    }

    fn emit(&mut self, action: Action) {
        (self.sink)(&action);
        self.emitted.push(action);
    }

    fn resolve(&mut self) {
        if !self.structural_done {
            return;
        }
        let mut ready = std::mem::take(&mut self.ready);
        ready.sort_by_key(|result| result.capability);
        for result in ready {
            self.release(result);
        }
        if self.pending.is_empty() {
            for action in std::mem::take(&mut self.withheld) {
                self.emit(action);
            }
        }
    }

    fn release(&mut self, result: GeneratorResult) {
        let target = resolve_target(&self.structural, &self.snapshot);
        match target {
            Some(target) if !result.payload.is_empty() => {
                let attach = match self
                    .withheld
                    .iter()
                    .position(|action| action.target_track() == Some(target))
                {
                    Some(position) => {
                        let mut attach = self.withheld.remove(position);
                        attach.append_notes(note_values(&result.payload));
                        attach
                    }
                    None => {
                        let mut attach = Action::new(kinds::ADD_MIDI).with("track", target as u64);
                        attach.append_notes(note_values(&result.payload));
                        attach
                    }
                };
                debug!(
                    capability = %result.capability,
                    track = target,
                    notes = result.payload.len(),
                    "released content"
                );
                self.emit(attach);
            }
            Some(_) => {}
            None => {
                warn!(capability = %result.capability, "no container to attach content to");
                self.unattached.push(result.capability);
            }
        }
        for action in result.actions {
            self.emit(tag(action, target));
        }
    }
}

/// Shared streaming merge buffer. Clones share state.
#[derive(Clone)]
pub struct StreamBuffer {
    inner: Arc<Mutex<BufferState>>,
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("StreamBuffer")
            .field("emitted", &state.emitted.len())
            .field("withheld", &state.withheld.len())
            .field("structural_done", &state.structural_done)
            .field("pending", &state.pending)
            .finish()
    }
}

impl StreamBuffer {
    /// Buffer for one request. `structural` says whether a structural task
    /// runs; when it does not, its completion is already satisfied.
    pub fn new(
        snapshot: Snapshot,
        structural: bool,
        content: impl IntoIterator<Item = Capability>,
        sink: ActionSink,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferState {
                snapshot,
                sink,
                emitted: Vec::new(),
                structural: Vec::new(),
                withheld: Vec::new(),
                structural_done: !structural,
                pending: content.into_iter().collect(),
                ready: Vec::new(),
                unattached: Vec::new(),
            })),
        }
    }

    /// A structural action became available.
    pub fn push_structural(&self, action: Action) {
        let mut state = self.inner.lock();
        state.structural.push(action.clone());
        let hold = action.is_attach() && action.note_count() == 0 && state.content_outstanding();
        if hold {
            debug!(track = ?action.target_track(), "withholding empty add_midi");
            state.withheld.push(action);
        } else {
            state.emit(action);
        }
    }

    /// The structural task finished, successfully or not.
    pub fn finish_structural(&self) {
        let mut state = self.inner.lock();
        state.structural_done = true;
        state.resolve();
    }

    /// A content task finished. `result` is `None` when it failed.
    pub fn finish_content(&self, capability: Capability, result: Option<GeneratorResult>) {
        let mut state = self.inner.lock();
        state.pending.remove(&capability);
        if let Some(result) = result {
            state.ready.push(result);
        }
        state.resolve();
    }

    /// Actions emitted so far.
    pub fn emitted(&self) -> Vec<Action> {
        self.inner.lock().emitted.clone()
    }

    /// Content capabilities that found no container.
    pub fn unattached(&self) -> Vec<Capability> {
        self.inner.lock().unattached.clone()
    }

    /// Release anything still held back. Used once every task is accounted for.
    pub fn flush(&self) {
        let mut state = self.inner.lock();
        state.structural_done = true;
        state.pending.clear();
        state.resolve();
    }
}
