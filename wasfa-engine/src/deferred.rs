//! Deferred handles: wiring for legitimately circular graphs.
//!
//! A consumer that needs "a way to get `A` later" instead of `A` itself
//! asks for [`DependencyKey::deferred`]. The [`DeferredRule`] creation rule
//! answers with a placeholder recipe immediately, without recursing into
//! `A`, and queues an action that compiles `A` once the whole graph is
//! built and wires the producer into the handle.
//!
//! ```text
//! A ──needs──▶ B ──needs──▶ DeferredHandle<A>
//!                              ╰── wired after A's tree is built
//! ```

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::compiler::CompiledProducer;
use crate::error::{ErrorKind, ResolutionError, Result};
use crate::injector::{Injector, Resolution};
use crate::key::DependencyKey;
use crate::recipe::{Instance, Recipe, downcast};
use crate::rules::CreationRule;

/// A handle to a dependency that is produced on demand.
pub struct DeferredHandle {
    key: DependencyKey,
    producer: OnceCell<CompiledProducer>,
}

impl DeferredHandle {
    pub fn new(key: DependencyKey) -> Self {
        Self {
            key,
            producer: OnceCell::new(),
        }
    }

    /// The key this handle produces.
    pub fn key(&self) -> &DependencyKey {
        &self.key
    }

    pub fn is_wired(&self) -> bool {
        self.producer.get().is_some()
    }

    /// Installs the producer. Later calls are ignored.
    pub fn wire(&self, producer: CompiledProducer) {
        if self.producer.set(producer).is_ok() {
            debug!(key = %self.key, "Wired deferred handle");
        }
    }

    /// Produces an instance of the target.
    ///
    /// # Errors
    /// [`ErrorKind::NotWired`] if called before wiring, which happens when
    /// a constructor invokes the handle during the graph build itself.
    pub fn get_instance(&self) -> Result<Instance> {
        let producer = self.producer.get().ok_or_else(|| {
            ResolutionError::new(ErrorKind::NotWired {
                key: self.key.clone(),
            })
        })?;
        producer.produce().map_err(|e| e.resolving(&self.key))
    }

    /// Produces an instance of the target, downcast to `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        downcast::<T>(self.get_instance()?).map_err(|_| {
            ResolutionError::new(ErrorKind::TypeMismatch {
                key: self.key.clone(),
                expected: std::any::type_name::<T>(),
            })
        })
    }
}

impl fmt::Debug for DeferredHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredHandle")
            .field("key", &self.key)
            .field("wired", &self.is_wired())
            .finish()
    }
}

/// Creation rule answering [`DependencyKey::deferred`] keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredRule;

impl CreationRule for DeferredRule {
    fn create(&self, key: &DependencyKey, resolution: &mut Resolution<'_>) -> Result<Option<Recipe>> {
        if key.type_id() != std::any::TypeId::of::<DeferredHandle>() {
            return Ok(None);
        }
        let Some(target) = key.target() else {
            return Ok(None);
        };

        let handle = Arc::new(DeferredHandle::new(target.clone()));
        let pending = handle.clone();
        resolution.queue_action(Box::new(move |injector: &Injector| -> Result<()> {
            let producer = injector.get_compiled_producer(pending.key())?;
            pending.wire(producer);
            Ok(())
        }));

        Ok(Some(Recipe::deferred(handle)))
    }

    fn name(&self) -> &str {
        "deferred handles"
    }
}
