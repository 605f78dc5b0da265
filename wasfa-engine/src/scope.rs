//! Scopes: instance reuse policies applied as producer wrappers.
//!
//! A [`Scope`] receives the compiled "fresh instance" producer of a binding
//! and returns the producer that is invoked on every access. It decides at
//! invocation time whether to build fresh or hand out something built
//! before.
//!
//! Built-in scopes:
//! - [`Unscoped`]: the identity transformation, always builds fresh
//! - [`Singleton`]: one instance per binding for the lifetime of the scope
//!
//! Bindings refer to scopes by tag ([`UNSCOPED`], [`SINGLETON`] or any
//! custom tag registered on the builder); the tag is resolved lazily the
//! first time the binding's recipe is built.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::binding::{BindingId, BindingInfo};
use crate::compiler::CompiledProducer;
use crate::error::BoxError;
use crate::lock::InstantiationLock;
use crate::recipe::Instance;

/// Tag of the identity scope.
pub const UNSCOPED: &str = "unscoped";

/// Tag of the singleton scope.
pub const SINGLETON: &str = "singleton";

/// Instance reuse policy.
///
/// Implementations must:
/// - return the same instance for the same binding within one activation
/// - never call back into resolution while holding their own store lock
/// - construct at most once when several threads race on first access
/// - take their store lock only while holding `instantiation`, so a
///   constructor reading the store cannot wait on a thread that waits on it
pub trait Scope: Send + Sync + fmt::Debug {
    /// Human-readable scope name.
    fn name(&self) -> &str;

    /// Wraps the unscoped producer of `binding`.
    fn wrap(
        &self,
        binding: &BindingInfo,
        unscoped: CompiledProducer,
        instantiation: &Arc<InstantiationLock>,
    ) -> Result<CompiledProducer, BoxError>;
}

/// Always builds a fresh instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unscoped;

impl Scope for Unscoped {
    fn name(&self) -> &str {
        UNSCOPED
    }

    fn wrap(
        &self,
        _binding: &BindingInfo,
        unscoped: CompiledProducer,
        _instantiation: &Arc<InstantiationLock>,
    ) -> Result<CompiledProducer, BoxError> {
        Ok(unscoped)
    }
}

/// One instance per binding.
///
/// Cells are keyed by binding identity, not by producer, so every producer
/// compiled for the same binding shares one instance.
#[derive(Default)]
pub struct Singleton {
    cells: DashMap<BindingId, Arc<OnceCell<Instance>>>,
}

impl Singleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bindings that have a cell (built or pending).
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn cell(&self, binding: BindingId) -> Arc<OnceCell<Instance>> {
        self.cells.entry(binding).or_default().clone()
    }
}

impl fmt::Debug for Singleton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Singleton").field("bindings", &self.cells.len()).finish()
    }
}

impl Scope for Singleton {
    fn name(&self) -> &str {
        SINGLETON
    }

    fn wrap(
        &self,
        binding: &BindingInfo,
        unscoped: CompiledProducer,
        instantiation: &Arc<InstantiationLock>,
    ) -> Result<CompiledProducer, BoxError> {
        // The shard lock is released here; the cell blocks racing threads
        // on its own while the first one constructs.
        let cell = self.cell(binding.id());
        let lock = instantiation.clone();
        let label = format!("{SINGLETON}[{}]", binding.label());
        Ok(CompiledProducer::new(label, move || {
            if let Some(instance) = cell.get() {
                return Ok(instance.clone());
            }
            // Cell init always nests inside the instantiation lock.
            let _instantiating = lock.enter();
            cell.get_or_try_init(|| unscoped.produce()).cloned()
        }))
    }
}

/// Scope tag → scope mapping, fixed once the injector is built.
#[derive(Debug, Clone)]
pub struct ScopeRegistry {
    scopes: HashMap<&'static str, Arc<dyn Scope>>,
}

impl ScopeRegistry {
    /// A registry holding the built-in [`UNSCOPED`] and [`SINGLETON`] scopes.
    pub fn with_builtins() -> Self {
        let mut scopes: HashMap<&'static str, Arc<dyn Scope>> = HashMap::new();
        scopes.insert(UNSCOPED, Arc::new(Unscoped));
        scopes.insert(SINGLETON, Arc::new(Singleton::new()));
        Self { scopes }
    }

    pub fn insert(&mut self, tag: &'static str, scope: Arc<dyn Scope>) {
        self.scopes.insert(tag, scope);
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Scope>> {
        self.scopes.get(tag).cloned()
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.scopes.keys().copied()
    }
}

impl Default for ScopeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn lock() -> Arc<InstantiationLock> {
        Arc::new(InstantiationLock::new())
    }

    fn counting_producer(counter: Arc<AtomicUsize>) -> CompiledProducer {
        CompiledProducer::new("counter", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(n) as Instance)
        })
    }

    #[test]
    fn unscoped_is_identity() {
        let counter = Arc::new(AtomicUsize::new(0));
        let binding = BindingInfo::new("fresh");
        let producer = Unscoped.wrap(&binding, counting_producer(counter.clone()), &lock()).unwrap();

        let a = producer.produce().unwrap();
        let b = producer.produce().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn singleton_reuses_instance() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scope = Singleton::new();
        let binding = BindingInfo::new("shared");
        let producer = scope.wrap(&binding, counting_producer(counter.clone()), &lock()).unwrap();

        let a = producer.produce().unwrap();
        let b = producer.produce().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn singleton_keys_by_binding_not_producer() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scope = Singleton::new();
        let binding = BindingInfo::new("shared");
        let first = scope.wrap(&binding, counting_producer(counter.clone()), &lock()).unwrap();
        let second = scope.wrap(&binding, counting_producer(counter.clone()), &lock()).unwrap();

        assert!(Arc::ptr_eq(&first.produce().unwrap(), &second.produce().unwrap()));
        assert_eq!(scope.len(), 1);

        let other = scope.wrap(&BindingInfo::new("other"), counting_producer(counter), &lock()).unwrap();
        assert!(!Arc::ptr_eq(&first.produce().unwrap(), &other.produce().unwrap()));
    }

    #[test]
    fn singleton_constructs_once_under_race() {
        const THREADS: usize = 16;
        let counter = Arc::new(AtomicUsize::new(0));
        let scope = Singleton::new();
        let binding = BindingInfo::new("raced");
        let slow = {
            let counter = counter.clone();
            CompiledProducer::new("slow", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(Arc::new(()) as Instance)
            })
        };
        let producer = scope.wrap(&binding, slow, &lock()).unwrap();
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let producer = producer.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    producer.produce().unwrap()
                })
            })
            .collect();
        let instances: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn failed_singleton_build_can_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let scope = Singleton::new();
        let flaky = {
            let attempts = attempts.clone();
            CompiledProducer::new("flaky", move || {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(crate::error::ResolutionError::provision("flaky", "first try fails".into()));
                }
                Ok(Arc::new(7u8) as Instance)
            })
        };
        let producer = scope.wrap(&BindingInfo::new("flaky"), flaky, &lock()).unwrap();

        assert!(producer.produce().is_err());
        assert!(producer.produce().is_ok());
    }

    #[test]
    fn builtin_registry() {
        let registry = ScopeRegistry::with_builtins();
        assert_eq!(registry.get(UNSCOPED).unwrap().name(), UNSCOPED);
        assert_eq!(registry.get(SINGLETON).unwrap().name(), SINGLETON);
        assert!(registry.get("request").is_none());
    }
}
