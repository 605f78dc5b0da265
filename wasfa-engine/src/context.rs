//! Per-request resolution state.
//!
//! One [`ResolutionContext`] exists per top-level resolution. It tracks:
//! - the ordered set of bindings currently under construction, to detect
//!   cycles and report them in encounter order
//! - actions deferred until the whole recipe tree is built, run in FIFO
//!   order exactly once
//! - the recursion depth, bounded by the engine settings
//! - the recipe-cache entries inserted and the binding recipes created so
//!   far, rolled back if the request fails

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::binding::{Binding, BindingId, BindingInfo};
use crate::error::{CircularDependencyError, ErrorKind, ResolutionError, Result};
use crate::injector::Injector;
use crate::key::DependencyKey;

/// Work to run once the top-level recipe tree has been built.
pub type DeferredAction = Box<dyn FnOnce(&Injector) -> Result<()> + Send>;

/// Cycle tracker and deferred-action queue for one top-level resolution.
pub struct ResolutionContext {
    in_progress: Vec<BindingInfo>,
    actions: VecDeque<DeferredAction>,
    depth: usize,
    max_depth: usize,
    inserted: Vec<DependencyKey>,
    created: Vec<Arc<Binding>>,
}

impl ResolutionContext {
    pub fn new(max_depth: usize) -> Self {
        Self {
            in_progress: Vec::new(),
            actions: VecDeque::new(),
            depth: 0,
            max_depth,
            inserted: Vec::new(),
            created: Vec::new(),
        }
    }

    /// Runs `thunk` with `binding` marked as under construction.
    ///
    /// # Errors
    /// [`ErrorKind::CircularDependency`] if `binding` is already under
    /// construction. The chain runs from its first occurrence to the
    /// repeat.
    pub fn enter<R>(&mut self, binding: &BindingInfo, thunk: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        if let Some(start) = self.position(binding.id()) {
            let mut chain: Vec<String> = self.in_progress[start..]
                .iter()
                .map(|b| b.label().to_string())
                .collect();
            chain.push(binding.label().to_string());

            warn!(cycle = ?chain, "Circular dependency detected");
            return Err(ResolutionError::new(ErrorKind::CircularDependency(
                CircularDependencyError { chain },
            )));
        }

        self.in_progress.push(binding.clone());
        let result = thunk(self);
        // Removed on success and failure alike: the set mirrors the live
        // construction stack, not history.
        self.in_progress.pop();
        result
    }

    /// Queues `action` to run after the whole top-level tree is built.
    pub fn queue_action(&mut self, action: DeferredAction) {
        self.actions.push_back(action);
    }

    /// Takes the oldest queued action.
    pub(crate) fn next_action(&mut self) -> Option<DeferredAction> {
        self.actions.pop_front()
    }

    pub fn pending_actions(&self) -> usize {
        self.actions.len()
    }

    /// Bindings under construction, outermost first.
    pub fn in_progress(&self) -> impl Iterator<Item = &BindingInfo> {
        self.in_progress.iter()
    }

    pub fn is_in_progress(&self, id: BindingId) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: BindingId) -> Option<usize> {
        self.in_progress.iter().position(|b| b.id() == id)
    }

    /// Descends one recursion level for `key`.
    pub(crate) fn descend(&mut self, key: &DependencyKey) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(ResolutionError::new(ErrorKind::DepthExceeded {
                key: key.clone(),
                limit: self.max_depth,
            }));
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn record_insert(&mut self, key: DependencyKey) {
        self.inserted.push(key);
    }

    pub(crate) fn take_inserted(&mut self) -> Vec<DependencyKey> {
        std::mem::take(&mut self.inserted)
    }

    /// Records a binding whose recipe was first created by this request.
    pub(crate) fn record_created(&mut self, binding: Arc<Binding>) {
        self.created.push(binding);
    }

    pub(crate) fn take_created(&mut self) -> Vec<Arc<Binding>> {
        std::mem::take(&mut self.created)
    }
}

impl fmt::Debug for ResolutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.in_progress.iter().map(BindingInfo::label).collect();
        f.debug_struct("ResolutionContext")
            .field("in_progress", &labels)
            .field("pending_actions", &self.actions.len())
            .field("depth", &self.depth)
            .finish()
    }
}
