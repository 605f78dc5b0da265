//! The resolution engine.
//!
//! The [`Injector`] turns a [`DependencyKey`] into a recipe, a compiled
//! producer and finally an instance:
//!
//! ```text
//! key ─▶ creation rules ─▶ static bindings ─▶ JIT bindings ─▶ recipe
//!                                                               │
//!                                  instance ◀─ producer ◀─ compile
//! ```
//!
//! Recipes and compiled producers are cached per key for the lifetime of
//! the injector; there is no eviction. All graph building runs under one
//! reentrant resolution lock; cache reads are lock-free.
//!
//! # Examples
//! ```
//! use std::sync::Arc;
//! use wasfa_engine::prelude::*;
//!
//! struct Logger;
//! struct Service { logger: Arc<Logger> }
//!
//! let injector = Injector::builder()
//!     .bind_type::<Logger>(Binding::to_recipe("logger", Recipe::construct::<Logger, _>(vec![], |_| Ok(Logger))).in_scope(SINGLETON))
//!     .bind_type::<Service>(Binding::new("service", |_, resolution| {
//!         let logger = resolution.recipe_for(&DependencyKey::of::<Logger>())?;
//!         Ok(Recipe::construct::<Service, _>(vec![logger], |args| Ok(Service { logger: args.get::<Logger>(0)? })))
//!     }))
//!     .build();
//!
//! let a = injector.get::<Service>().unwrap();
//! let b = injector.get::<Service>().unwrap();
//! assert!(!Arc::ptr_eq(&a, &b));
//! assert!(Arc::ptr_eq(&a.logger, &b.logger));
//! ```

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, instrument, trace, warn};
use wasfa_support::rendering::suggest_similar;

use crate::binding::{Binding, StaticBinding};
use crate::compiler::{CompiledProducer, CompiledTransformer, RecipeCompiler};
use crate::context::{DeferredAction, ResolutionContext};
use crate::deferred::DeferredRule;
use crate::error::{AmbiguousBindingError, ErrorKind, ResolutionError, Result, UnresolvedError};
use crate::key::{DependencyKey, JitKey, JitKeyRule, TypeDescriptor, default_jit_key_rules, derive_jit_key};
use crate::lock::ResolutionLock;
use crate::matcher::{ExactKey, TypeIs};
use crate::module::{Binder, Module};
use crate::recipe::{Instance, Recipe, TransformerRecipe, downcast};
use crate::rules::{CreationRule, FnCreationRule, FnJitRule, JitBindingRule};
use crate::scope::{Scope, ScopeRegistry};
use crate::settings::EngineSettings;

// ═══════════════════════════════════════════
// InjectorBuilder
// ═══════════════════════════════════════════

/// Consuming builder for [`Injector`].
///
/// Everything registered here is fixed once [`build`](Self::build) runs.
pub struct InjectorBuilder {
    settings: EngineSettings,
    static_bindings: Vec<StaticBinding>,
    creation_rules: Vec<Arc<dyn CreationRule>>,
    jit_key_rules: Vec<Arc<dyn JitKeyRule>>,
    jit_rules: Vec<Arc<dyn JitBindingRule>>,
    scopes: ScopeRegistry,
}

impl InjectorBuilder {
    fn new() -> Self {
        Self {
            settings: EngineSettings::default(),
            static_bindings: Vec::new(),
            creation_rules: Vec::new(),
            jit_key_rules: default_jit_key_rules(),
            jit_rules: Vec::new(),
            scopes: ScopeRegistry::with_builtins(),
        }
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    // ── Static bindings ──

    /// Registers a static binding with its own matcher.
    pub fn bind(mut self, binding: StaticBinding) -> Self {
        self.static_bindings.push(binding);
        self
    }

    /// Binds exactly `key`.
    pub fn bind_key(self, key: DependencyKey, binding: Binding) -> Self {
        self.bind(StaticBinding::new(ExactKey(key), binding))
    }

    /// Binds every key of type `T`, whatever its qualifiers.
    pub fn bind_type<T: ?Sized + 'static>(self, binding: Binding) -> Self {
        self.bind(StaticBinding::new(TypeIs::of::<T>(), binding))
    }

    // ── Rules ──

    /// Appends a creation rule. Rules run in registration order.
    pub fn creation_rule(mut self, rule: impl CreationRule + 'static) -> Self {
        self.creation_rules.push(Arc::new(rule));
        self
    }

    /// Appends a creation rule backed by a closure.
    pub fn creation_rule_fn<F>(self, name: &'static str, rule: F) -> Self
    where
        F: Fn(&DependencyKey, &mut Resolution<'_>) -> Result<Option<Recipe>> + Send + Sync + 'static,
    {
        self.creation_rule(FnCreationRule::new(name, rule))
    }

    /// Replaces the JIT key derivation sequence.
    pub fn jit_key_rules(mut self, rules: Vec<Arc<dyn JitKeyRule>>) -> Self {
        self.jit_key_rules = rules;
        self
    }

    /// Appends a JIT binding rule. Rules run in registration order.
    pub fn jit_rule(mut self, rule: impl JitBindingRule + 'static) -> Self {
        self.jit_rules.push(Arc::new(rule));
        self
    }

    /// Appends a JIT binding rule backed by a closure.
    pub fn jit_rule_fn<F>(self, name: &'static str, rule: F) -> Self
    where
        F: Fn(&DependencyKey, &JitKey) -> Result<Option<Binding>> + Send + Sync + 'static,
    {
        self.jit_rule(FnJitRule::new(name, rule))
    }

    // ── Scopes and modules ──

    /// Maps a scope tag to a scope, replacing any earlier mapping.
    pub fn scope(mut self, tag: &'static str, scope: impl Scope + 'static) -> Self {
        self.scopes.insert(tag, Arc::new(scope));
        self
    }

    /// Lets `module` register into this builder.
    pub fn install(mut self, module: &dyn Module) -> Self {
        debug!(module = module.name(), "Installing module");
        module.configure(&mut self);
        self
    }

    // ── Build ──

    #[instrument(skip_all, name = "injector_build")]
    pub fn build(self) -> Injector {
        let mut creation_rules: Vec<Arc<dyn CreationRule>> = Vec::with_capacity(self.creation_rules.len() + 1);
        if self.settings.deferred_handles {
            creation_rules.push(Arc::new(DeferredRule));
        }
        creation_rules.extend(self.creation_rules);

        let mut by_type: HashMap<TypeId, Vec<usize>> = HashMap::new();
        let mut unhinted = Vec::new();
        for (index, binding) in self.static_bindings.iter().enumerate() {
            match binding.possible_types() {
                Some(types) => {
                    for ty in types {
                        let indices = by_type.entry(ty.id()).or_default();
                        if indices.last() != Some(&index) {
                            indices.push(index);
                        }
                    }
                }
                None => unhinted.push(index),
            }
        }

        info!(
            static_bindings = self.static_bindings.len(),
            creation_rules = creation_rules.len(),
            jit_rules = self.jit_rules.len(),
            "Injector built ✓"
        );

        Injector {
            settings: self.settings,
            creation_rules,
            static_bindings: self.static_bindings,
            by_type,
            unhinted,
            jit_key_rules: self.jit_key_rules,
            jit_rules: self.jit_rules,
            scopes: self.scopes,
            jit_bindings: DashMap::new(),
            recipes: DashMap::new(),
            producers: DashMap::new(),
            resolution_lock: ResolutionLock::default(),
            compiler: RecipeCompiler::new(),
        }
    }
}

impl Binder for InjectorBuilder {
    fn bind_static(&mut self, binding: StaticBinding) {
        self.static_bindings.push(binding);
    }

    fn add_creation_rule(&mut self, rule: Arc<dyn CreationRule>) {
        self.creation_rules.push(rule);
    }

    fn add_jit_rule(&mut self, rule: Arc<dyn JitBindingRule>) {
        self.jit_rules.push(rule);
    }

    fn bind_scope(&mut self, tag: &'static str, scope: Arc<dyn Scope>) {
        self.scopes.insert(tag, scope);
    }
}

impl fmt::Debug for InjectorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectorBuilder")
            .field("static_bindings", &self.static_bindings.len())
            .field("creation_rules", &self.creation_rules.len())
            .field("jit_rules", &self.jit_rules.len())
            .field("settings", &self.settings)
            .finish()
    }
}

// ═══════════════════════════════════════════
// Injector
// ═══════════════════════════════════════════

/// Thread-safe resolution engine.
///
/// Created by [`InjectorBuilder::build`]. Owns the recipe cache, the JIT
/// binding cache and the compiled-producer cache for its whole lifetime.
pub struct Injector {
    settings: EngineSettings,
    creation_rules: Vec<Arc<dyn CreationRule>>,
    static_bindings: Vec<StaticBinding>,
    /// Indices into `static_bindings`, by hinted type, ascending.
    by_type: HashMap<TypeId, Vec<usize>>,
    /// Indices of bindings that may match any type, ascending.
    unhinted: Vec<usize>,
    jit_key_rules: Vec<Arc<dyn JitKeyRule>>,
    jit_rules: Vec<Arc<dyn JitBindingRule>>,
    scopes: ScopeRegistry,
    jit_bindings: DashMap<JitKey, Arc<Binding>>,
    recipes: DashMap<DependencyKey, Recipe>,
    producers: DashMap<DependencyKey, CompiledProducer>,
    resolution_lock: ResolutionLock,
    compiler: RecipeCompiler,
}

impl Injector {
    pub fn builder() -> InjectorBuilder {
        InjectorBuilder::new()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    pub fn compiler(&self) -> &RecipeCompiler {
        &self.compiler
    }

    // ── Instances ──

    /// Resolves, compiles if needed, and produces one instance for `key`.
    pub fn get_instance(&self, key: &DependencyKey) -> Result<Instance> {
        self.get_compiled_producer(key)?
            .produce()
            .map_err(|e| e.resolving(key))
    }

    /// Produces an instance of `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.get_as::<T>(&DependencyKey::of::<T>())
    }

    /// Produces the instance of `T` qualified by `name`.
    pub fn get_named<T: Send + Sync + 'static>(&self, name: &'static str) -> Result<Arc<T>> {
        self.get_as::<T>(&DependencyKey::named::<T>(name))
    }

    /// Produces an instance for `key` and downcasts it to `T`.
    pub fn get_as<T: Send + Sync + 'static>(&self, key: &DependencyKey) -> Result<Arc<T>> {
        downcast::<T>(self.get_instance(key)?).map_err(|_| {
            ResolutionError::new(ErrorKind::TypeMismatch {
                key: key.clone(),
                expected: type_name::<T>(),
            })
        })
    }

    // ── Producers ──

    /// Returns the compiled producer for `key`, building it the first time.
    ///
    /// Double-checked: a lock-free cache read, then the resolution lock,
    /// a recheck, the build and the publish.
    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn get_compiled_producer(&self, key: &DependencyKey) -> Result<CompiledProducer> {
        if let Some(hit) = self.cached_producer(key) {
            trace!("Compiled producer cache hit");
            return Ok(hit);
        }

        let _resolving = self.resolution_lock.acquire(key)?;
        if let Some(hit) = self.cached_producer(key) {
            return Ok(hit);
        }

        let recipe = self.get_recipe_locked(key)?;
        let producer = self.compiler.compile(&recipe).map_err(|e| e.resolving(key))?;
        debug!(producer = producer.label(), "Compiled producer");

        Ok(self.producers.entry(key.clone()).or_insert(producer).value().clone())
    }

    fn cached_producer(&self, key: &DependencyKey) -> Option<CompiledProducer> {
        self.producers.get(key).map(|entry| entry.value().clone())
    }

    // ── Recipes ──

    /// Returns the recipe for `key`, creating it under the resolution lock
    /// the first time and running any actions queued while it was built.
    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn get_recipe(&self, key: &DependencyKey) -> Result<Recipe> {
        let _resolving = self.resolution_lock.acquire(key)?;
        self.get_recipe_locked(key)
    }

    fn cached_recipe(&self, key: &DependencyKey) -> Option<Recipe> {
        self.recipes.get(key).map(|entry| entry.value().clone())
    }

    fn get_recipe_locked(&self, key: &DependencyKey) -> Result<Recipe> {
        if let Some(hit) = self.cached_recipe(key) {
            trace!(key = %key, "Recipe cache hit");
            return Ok(hit);
        }

        let mut ctx = ResolutionContext::new(self.settings.max_depth);
        let result = self.build_recipe_tree(key, &mut ctx);
        if result.is_err() {
            let inserted = ctx.take_inserted();
            let created = ctx.take_created();
            if !inserted.is_empty() || !created.is_empty() {
                debug!(key = %key, entries = inserted.len(), bindings = created.len(), "Rolling back recipe cache");
            }
            for stale in &inserted {
                self.recipes.remove(stale);
            }
            // Their queued actions were dropped, so any deferred handle they
            // hold would never be wired.
            for binding in &created {
                binding.discard_recipe();
            }
        }
        result
    }

    fn build_recipe_tree(&self, key: &DependencyKey, ctx: &mut ResolutionContext) -> Result<Recipe> {
        let recipe = Resolution { injector: self, ctx: &mut *ctx }.recipe_for(key)?;
        while let Some(action) = ctx.next_action() {
            action(self)?;
        }
        Ok(recipe)
    }

    /// Creation rules, then static bindings, then JIT bindings.
    fn create_recipe(&self, key: &DependencyKey, resolution: &mut Resolution<'_>) -> Result<Recipe> {
        for rule in &self.creation_rules {
            if let Some(recipe) = rule.create(key, resolution)? {
                trace!(key = %key, rule = rule.name(), "Creation rule matched");
                return Ok(recipe);
            }
        }

        if let Some(binding) = self.static_binding_for(key)? {
            return enter_binding(binding, key, resolution);
        }

        if self.settings.jit_bindings {
            if let Some(binding) = self.jit_binding_for(key)? {
                return enter_binding(&binding, key, resolution);
            }
        }

        Err(self.unresolved(key))
    }

    fn static_binding_for(&self, key: &DependencyKey) -> Result<Option<&Arc<Binding>>> {
        let mut candidates = self.by_type.get(&key.type_id()).cloned().unwrap_or_default();
        candidates.extend(&self.unhinted);
        candidates.sort_unstable();

        let matched: Vec<&StaticBinding> = candidates
            .into_iter()
            .map(|index| &self.static_bindings[index])
            .filter(|binding| binding.matches(key))
            .collect();

        match matched.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only.binding())),
            many => {
                let bindings: Vec<String> = many.iter().map(|binding| binding.describe()).collect();
                warn!(key = %key, matches = ?bindings, "Ambiguous static bindings");
                Err(ResolutionError::new(ErrorKind::AmbiguousBinding(AmbiguousBindingError {
                    key: key.clone(),
                    bindings,
                })))
            }
        }
    }

    fn jit_binding_for(&self, key: &DependencyKey) -> Result<Option<Arc<Binding>>> {
        let jit_key = derive_jit_key(&self.jit_key_rules, key);
        if let Some(hit) = self.jit_bindings.get(&jit_key).map(|entry| entry.value().clone()) {
            trace!(key = %key, jit_key = %jit_key, "JIT binding cache hit");
            return Ok(Some(hit));
        }

        for rule in &self.jit_rules {
            if let Some(binding) = rule.binding_for(key, &jit_key)? {
                debug!(key = %key, jit_key = %jit_key, binding = binding.label(), rule = rule.name(), "Created JIT binding");
                let binding = self
                    .jit_bindings
                    .entry(jit_key)
                    .or_insert_with(|| Arc::new(binding))
                    .value()
                    .clone();
                return Ok(Some(binding));
            }
        }
        Ok(None)
    }

    fn unresolved(&self, key: &DependencyKey) -> ResolutionError {
        let mut known: Vec<&'static str> = self
            .static_bindings
            .iter()
            .filter_map(StaticBinding::possible_types)
            .flatten()
            .map(TypeDescriptor::name)
            .collect();
        known.extend(self.recipes.iter().map(|entry| entry.key().type_name()));
        known.sort_unstable();
        known.dedup();

        debug!(key = %key, "No recipe source matched");
        ResolutionError::new(ErrorKind::Unresolved(UnresolvedError {
            requested: key.clone(),
            suggestions: suggest_similar(key.type_name(), &known, self.settings.max_suggestions),
        }))
    }

    // ── Direct compilation ──

    /// Compiles an arbitrary recipe with this injector's compiler.
    ///
    /// The producer is memoized for as long as `recipe` is alive, so
    /// compiling the same recipe again returns the same producer.
    pub fn compile(&self, recipe: &Recipe) -> Result<CompiledProducer> {
        self.compiler.compile(recipe)
    }

    /// Compiles an arbitrary transformer recipe.
    pub fn compile_transformer(&self, transformer: &TransformerRecipe) -> Result<CompiledTransformer> {
        self.compiler.compile_transformer(transformer)
    }

    // ── Introspection ──

    /// Returns `true` if a recipe is cached for `key`.
    pub fn has_recipe(&self, key: &DependencyKey) -> bool {
        self.recipes.contains_key(key)
    }

    pub fn cached_recipes(&self) -> usize {
        self.recipes.len()
    }

    pub fn jit_binding_count(&self) -> usize {
        self.jit_bindings.len()
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("static_bindings", &self.static_bindings.len())
            .field("jit_bindings", &self.jit_bindings.len())
            .field("recipes", &self.recipes.len())
            .field("producers", &self.producers.len())
            .finish()
    }
}

fn enter_binding(binding: &Arc<Binding>, key: &DependencyKey, resolution: &mut Resolution<'_>) -> Result<Recipe> {
    let injector = resolution.injector;
    let was_resolved = binding.is_resolved();
    let recipe = resolution
        .ctx
        .enter(binding.info(), |ctx| binding.scoped_recipe(key, &mut Resolution { injector, ctx }))
        .map_err(|e| e.within_binding(binding.label()))?;
    if !was_resolved {
        resolution.ctx.record_created(binding.clone());
    }
    Ok(recipe)
}

// ═══════════════════════════════════════════
// Resolution
// ═══════════════════════════════════════════

/// The view of one in-flight resolution handed to bindings and rules.
///
/// Nested keys must be resolved through [`recipe_for`](Self::recipe_for)
/// so that cycle tracking and the depth bound see them.
pub struct Resolution<'a> {
    injector: &'a Injector,
    ctx: &'a mut ResolutionContext,
}

impl<'a> Resolution<'a> {
    pub fn injector(&self) -> &'a Injector {
        self.injector
    }

    pub fn context(&self) -> &ResolutionContext {
        self.ctx
    }

    /// Returns the recipe for a nested key, creating and caching it if
    /// needed.
    pub fn recipe_for(&mut self, key: &DependencyKey) -> Result<Recipe> {
        let injector = self.injector;
        if let Some(hit) = injector.cached_recipe(key) {
            trace!(key = %key, "Recipe cache hit");
            return Ok(hit);
        }

        self.ctx.descend(key)?;
        let created = injector.create_recipe(key, self);
        self.ctx.ascend();
        let recipe = created.map_err(|e| e.resolving(key))?;

        let recipe = match injector.recipes.entry(key.clone()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                self.ctx.record_insert(key.clone());
                debug!(key = %key, recipe = %recipe.describe(), "Cached recipe");
                slot.insert(recipe).value().clone()
            }
        };
        Ok(recipe)
    }

    /// Queues `action` to run once the whole top-level tree is built.
    pub fn queue_action(&mut self, action: DeferredAction) {
        self.ctx.queue_action(action);
    }
}

impl fmt::Debug for Resolution<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution").field("context", &self.ctx).finish()
    }
}
