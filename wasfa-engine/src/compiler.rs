//! The recipe compiler.
//!
//! Compilation turns a [`Recipe`] tree into a tree of composed closures,
//! built once and invoked directly afterwards. Invoking a
//! [`CompiledProducer`] never re-walks the recipe: every dispatch decision
//! (which node kind, which scope, which arguments) is made at compile time.
//!
//! The compiler memoizes by recipe identity, so a recipe shared by several
//! keys or several parents is compiled at most once. The memo does not keep
//! recipes alive: once a recipe is dropped its producer is pruned, so
//! recipes built per call do not accumulate. Compilation needs no
//! engine lock and never requests the resolution lock; independent threads
//! may compile concurrently.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::error::{BoxError, CompilationError, ErrorKind, ResolutionError, Result};
use crate::lock::InstantiationLock;
use crate::recipe::{Args, Instance, Recipe, RecipeId, RecipeNode, TransformerRecipe};

/// Memo size below which dead entries are left alone.
const PRUNE_FLOOR: usize = 64;

type ProduceFn = dyn Fn() -> Result<Instance> + Send + Sync;
type TransformFn = dyn Fn(Instance) -> Result<Instance> + Send + Sync;

/// A compiled `() -> value` producer.
#[derive(Clone)]
pub struct CompiledProducer {
    label: Arc<str>,
    run: Arc<ProduceFn>,
}

impl CompiledProducer {
    pub fn new<F>(label: impl Into<Arc<str>>, run: F) -> Self
    where
        F: Fn() -> Result<Instance> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            run: Arc::new(run),
        }
    }

    /// Produces one value.
    #[inline]
    pub fn produce(&self) -> Result<Instance> {
        (self.run)()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns `true` if both handles share one compiled unit.
    pub fn ptr_eq(a: &CompiledProducer, b: &CompiledProducer) -> bool {
        Arc::ptr_eq(&a.run, &b.run)
    }
}

impl fmt::Debug for CompiledProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompiledProducer({})", self.label)
    }
}

/// A compiled `(instance) -> instance` transformer.
#[derive(Clone)]
pub struct CompiledTransformer {
    label: Arc<str>,
    run: Arc<TransformFn>,
}

impl CompiledTransformer {
    pub fn new<F>(label: impl Into<Arc<str>>, run: F) -> Self
    where
        F: Fn(Instance) -> Result<Instance> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            run: Arc::new(run),
        }
    }

    #[inline]
    pub fn apply(&self, instance: Instance) -> Result<Instance> {
        (self.run)(instance)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for CompiledTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompiledTransformer({})", self.label)
    }
}

/// Compiles recipes into producers and transformers.
pub struct RecipeCompiler {
    instantiation: Arc<InstantiationLock>,
    // The weak reference keeps the recipe's address, and so its id, from
    // being reused while the entry exists.
    compiled: DashMap<RecipeId, (Weak<RecipeNode>, CompiledProducer)>,
    prune_at: AtomicUsize,
}

impl RecipeCompiler {
    /// A compiler with its own instantiation lock.
    pub fn new() -> Self {
        Self::with_lock(Arc::new(InstantiationLock::new()))
    }

    /// A compiler whose constructors run under `instantiation`.
    pub fn with_lock(instantiation: Arc<InstantiationLock>) -> Self {
        Self {
            instantiation,
            compiled: DashMap::new(),
            prune_at: AtomicUsize::new(PRUNE_FLOOR),
        }
    }

    pub fn instantiation_lock(&self) -> &Arc<InstantiationLock> {
        &self.instantiation
    }

    /// Number of memoized producers, including those of recently dropped
    /// recipes not pruned yet.
    pub fn compiled_count(&self) -> usize {
        self.compiled.len()
    }

    /// Compiles `recipe` into a zero-argument producer.
    ///
    /// # Errors
    /// [`ErrorKind::Compilation`] carrying the offending recipe.
    pub fn compile(&self, recipe: &Recipe) -> Result<CompiledProducer> {
        if let Some(hit) = self.compiled.get(&recipe.id()).map(|entry| entry.1.clone()) {
            trace!(recipe = %recipe.describe(), "Compiled producer cache hit");
            return Ok(hit);
        }

        let producer = self.compile_node(recipe)?;
        if self.compiled.len() >= self.prune_at.load(Ordering::Relaxed) {
            self.prune();
        }
        // A racing thread may have published first; keep the winner.
        let producer = self
            .compiled
            .entry(recipe.id())
            .or_insert_with(|| (recipe.downgrade(), producer))
            .1
            .clone();
        Ok(producer)
    }

    /// Drops the producers of recipes nobody holds anymore. Runs each time
    /// the memo doubles, so its cost is amortized over the insertions.
    fn prune(&self) {
        let before = self.compiled.len();
        self.compiled.retain(|_, (node, _)| node.strong_count() > 0);
        let live = self.compiled.len();
        self.prune_at.store((live * 2).max(PRUNE_FLOOR), Ordering::Relaxed);
        if live < before {
            trace!(dropped = before - live, live, "Pruned producers of dropped recipes");
        }
    }

    /// Compiles `transformer` into a single-argument transformer.
    pub fn compile_transformer(&self, transformer: &TransformerRecipe) -> Result<CompiledTransformer> {
        let label = transformer.describe();
        match transformer {
            TransformerRecipe::Identity => Ok(CompiledTransformer::new(label, Ok)),
            TransformerRecipe::Member { name, value, inject } => {
                let value = self.compile(value)?;
                let inject = inject.clone();
                let name = *name;
                Ok(CompiledTransformer::new(label, move |instance| {
                    let value = value.produce()?;
                    inject(instance, value).map_err(|source| ResolutionError::provision(format!("member {name}"), source))
                }))
            }
            TransformerRecipe::Enhance { label: step, enhancer } => {
                let enhancer = enhancer.clone();
                let step = *step;
                Ok(CompiledTransformer::new(label, move |instance| {
                    enhancer(instance).map_err(|source| ResolutionError::provision(format!("enhancer {step}"), source))
                }))
            }
            TransformerRecipe::Chain(steps) => {
                let steps = steps
                    .iter()
                    .map(|step| self.compile_transformer(step))
                    .collect::<Result<Vec<_>>>()?;
                Ok(CompiledTransformer::new(label, move |instance| {
                    steps.iter().try_fold(instance, |instance, step| step.apply(instance))
                }))
            }
        }
    }

    fn compile_node(&self, recipe: &Recipe) -> Result<CompiledProducer> {
        let label = recipe.describe();
        debug!(recipe = %label, "Compiling recipe");

        let producer = match recipe.node() {
            RecipeNode::Instance(value) => {
                let value = value.clone();
                CompiledProducer::new(label, move || Ok(value.clone()))
            }
            RecipeNode::Construct { ty, args, constructor } => {
                let args = args.iter().map(|arg| self.compile(arg)).collect::<Result<Vec<_>>>()?;
                let constructor = constructor.clone();
                let lock = self.instantiation.clone();
                let ty = *ty;
                match args.len() {
                    0 => CompiledProducer::new(label, move || {
                        let values = Args::new(Vec::new());
                        let _instantiating = lock.enter();
                        constructor(&values).map_err(|source| ResolutionError::provision(ty, source))
                    }),
                    _ => CompiledProducer::new(label, move || {
                        let values = args.iter().map(CompiledProducer::produce).collect::<Result<Vec<_>>>()?;
                        let values = Args::new(values);
                        let _instantiating = lock.enter();
                        constructor(&values).map_err(|source| ResolutionError::provision(ty, source))
                    }),
                }
            }
            RecipeNode::Transform { target, transformer } => {
                let target = self.compile(target)?;
                let transformer = self.compile_transformer(transformer)?;
                CompiledProducer::new(label, move || transformer.apply(target.produce()?))
            }
            RecipeNode::Scoped { binding, scope, inner } => {
                let inner = self.compile(inner)?;
                scope
                    .wrap(binding, inner, &self.instantiation)
                    .map_err(|source| compilation_error(recipe, source))?
            }
            RecipeNode::Deferred(handle) => {
                let handle = handle.clone();
                CompiledProducer::new(label, move || Ok(handle.clone() as Instance))
            }
            RecipeNode::Custom(step) => step
                .compile(self)
                .map_err(|source| compilation_error(recipe, source))?,
        };

        Ok(producer)
    }
}

impl Default for RecipeCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecipeCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecipeCompiler")
            .field("compiled", &self.compiled.len())
            .finish()
    }
}

fn compilation_error(recipe: &Recipe, source: BoxError) -> ResolutionError {
    ResolutionError::from_boxed(source, |source| {
        ErrorKind::Compilation(CompilationError {
            recipe: recipe.clone(),
            source,
        })
    })
}
