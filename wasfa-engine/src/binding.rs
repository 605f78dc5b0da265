//! Bindings: owners of lazily created recipes.
//!
//! A [`Binding`] owns exactly one recipe, created the first time it is
//! needed, plus a scope resolved from its scope tag at the same moment. A
//! recipe first created by a resolution that later fails is discarded with
//! the rest of that resolution's state. Two kinds exist:
//! - static bindings, registered up front and matched by a
//!   [`KeyMatcher`](crate::matcher::KeyMatcher) ([`StaticBinding`])
//! - JIT bindings, synthesized by rules during resolution and cached by
//!   their derived [`JitKey`](crate::key::JitKey)

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{ErrorKind, ResolutionError, Result};
use crate::injector::Resolution;
use crate::introspect::InjectionPlan;
use crate::key::{DependencyKey, TypeDescriptor};
use crate::matcher::{ExactKey, KeyMatcher};
use crate::recipe::{Instance, Recipe};
use crate::scope::{Scope, ScopeRegistry, UNSCOPED};

/// Process-unique binding identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

impl BindingId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding-{}", self.0)
    }
}

/// Identity and label of a binding, as seen by scopes and diagnostics.
#[derive(Debug, Clone)]
pub struct BindingInfo {
    id: BindingId,
    label: Arc<str>,
}

impl BindingInfo {
    /// Allocates a fresh identity.
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            id: BindingId::next(),
            label: label.into(),
        }
    }

    pub fn id(&self) -> BindingId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl PartialEq for BindingInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BindingInfo {}

/// Builds the unscoped recipe of a binding for the key being resolved.
pub type RecipeFactory = Arc<dyn Fn(&DependencyKey, &mut Resolution<'_>) -> Result<Recipe> + Send + Sync>;

/// Owner of one lazily created recipe and its scope.
pub struct Binding {
    info: BindingInfo,
    scope_tag: &'static str,
    factory: RecipeFactory,
    recipe: RwLock<Option<Recipe>>,
    scope: OnceCell<Arc<dyn Scope>>,
    creating: AtomicBool,
}

impl Binding {
    /// A binding whose recipe is built by `factory`.
    pub fn new<F>(label: impl Into<Arc<str>>, factory: F) -> Self
    where
        F: Fn(&DependencyKey, &mut Resolution<'_>) -> Result<Recipe> + Send + Sync + 'static,
    {
        Self::from_factory(label, Arc::new(factory))
    }

    pub fn from_factory(label: impl Into<Arc<str>>, factory: RecipeFactory) -> Self {
        Self {
            info: BindingInfo::new(label),
            scope_tag: UNSCOPED,
            factory,
            recipe: RwLock::new(None),
            scope: OnceCell::new(),
            creating: AtomicBool::new(false),
        }
    }

    /// A binding to a fixed recipe.
    pub fn to_recipe(label: impl Into<Arc<str>>, recipe: Recipe) -> Self {
        Self::new(label, move |_, _| Ok(recipe.clone()))
    }

    /// A binding to a pre-built value.
    pub fn to_instance<T: Send + Sync + 'static>(label: impl Into<Arc<str>>, value: T) -> Self {
        Self::to_recipe(label, Recipe::instance(value))
    }

    /// A binding to a pre-built shared instance.
    pub fn to_shared(label: impl Into<Arc<str>>, instance: Instance) -> Self {
        Self::to_recipe(label, Recipe::from_instance(instance))
    }

    /// A binding whose recipe follows an injection plan. The plan's scope
    /// tag, if any, becomes the binding's scope.
    pub fn from_plan(label: impl Into<Arc<str>>, plan: InjectionPlan) -> Self {
        let scope_tag = plan.scope_tag();
        let binding = Self::new(label, move |_, resolution| plan.build_recipe(resolution));
        match scope_tag {
            Some(tag) => binding.in_scope(tag),
            None => binding,
        }
    }

    /// Sets the scope tag resolved when the recipe is first built.
    #[must_use]
    pub fn in_scope(mut self, tag: &'static str) -> Self {
        self.scope_tag = tag;
        self
    }

    pub fn info(&self) -> &BindingInfo {
        &self.info
    }

    pub fn id(&self) -> BindingId {
        self.info.id
    }

    pub fn label(&self) -> &str {
        self.info.label()
    }

    pub fn scope_tag(&self) -> &'static str {
        self.scope_tag
    }

    /// Returns `true` once the recipe has been created.
    pub fn is_resolved(&self) -> bool {
        self.recipe.read().is_some()
    }

    /// Returns the scoped recipe, creating it on first use.
    ///
    /// Runs under the resolution lock, so the only way to observe a
    /// creation in progress is the factory re-entering itself on the same
    /// thread.
    pub(crate) fn scoped_recipe(&self, key: &DependencyKey, resolution: &mut Resolution<'_>) -> Result<Recipe> {
        if let Some(recipe) = self.recipe.read().as_ref() {
            return Ok(recipe.clone());
        }
        if self.creating.swap(true, Ordering::AcqRel) {
            return Err(ResolutionError::new(ErrorKind::RecursiveRecipeCreation {
                binding: self.label().to_string(),
            }));
        }
        let _creating = CreatingGuard(&self.creating);

        let scope = self.scope(resolution.injector().scopes())?;
        let unscoped = (self.factory)(key, resolution)?;
        let recipe = unscoped.scoped(self.info.clone(), scope);
        debug!(binding = %self.label(), scope = self.scope_tag, "Created binding recipe");

        Ok(self.recipe.write().get_or_insert(recipe).clone())
    }

    /// Drops the recipe so the next resolution builds it again.
    pub(crate) fn discard_recipe(&self) {
        if self.recipe.write().take().is_some() {
            debug!(binding = %self.label(), "Discarded binding recipe");
        }
    }

    fn scope(&self, scopes: &ScopeRegistry) -> Result<Arc<dyn Scope>> {
        self.scope
            .get_or_try_init(|| {
                scopes.get(self.scope_tag).ok_or_else(|| {
                    ResolutionError::new(ErrorKind::ScopeNotFound {
                        binding: self.label().to_string(),
                        tag: self.scope_tag,
                    })
                })
            })
            .cloned()
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.info.id)
            .field("label", &self.info.label)
            .field("scope", &self.scope_tag)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

struct CreatingGuard<'a>(&'a AtomicBool);

impl Drop for CreatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A pre-registered binding with its match predicate.
pub struct StaticBinding {
    matcher: Arc<dyn KeyMatcher>,
    possible_types: Option<Vec<TypeDescriptor>>,
    binding: Arc<Binding>,
}

impl StaticBinding {
    /// Binds keys accepted by `matcher`. The matcher's own type hint, if
    /// any, limits which keys it is evaluated against.
    pub fn new(matcher: impl KeyMatcher + 'static, binding: Binding) -> Self {
        Self::from_parts(Arc::new(matcher), binding)
    }

    pub fn from_parts(matcher: Arc<dyn KeyMatcher>, binding: Binding) -> Self {
        let possible_types = matcher.possible_types();
        Self {
            matcher,
            possible_types,
            binding: Arc::new(binding),
        }
    }

    /// Binds exactly `key`.
    pub fn exact(key: DependencyKey, binding: Binding) -> Self {
        Self::new(ExactKey(key), binding)
    }

    /// Replaces the type hint.
    #[must_use]
    pub fn with_possible_types(mut self, types: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        self.possible_types = Some(types.into_iter().collect());
        self
    }

    pub fn matches(&self, key: &DependencyKey) -> bool {
        self.matcher.matches(key)
    }

    /// `None` when the binding may match keys of any type.
    pub fn possible_types(&self) -> Option<&[TypeDescriptor]> {
        self.possible_types.as_deref()
    }

    pub fn binding(&self) -> &Arc<Binding> {
        &self.binding
    }

    pub fn describe(&self) -> String {
        format!("{} ({})", self.binding.label(), self.matcher.describe())
    }
}

impl fmt::Debug for StaticBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticBinding")
            .field("binding", &self.binding)
            .field("matcher", &self.matcher.describe())
            .field("hinted", &self.possible_types.is_some())
            .finish()
    }
}
