//! Pluggable rules consulted during recipe creation.
//!
//! Two extension points exist:
//! - [`CreationRule`]: consulted first, before any binding lookup. A match
//!   yields a recipe directly. The engine applies no scope and no cycle
//!   tracking to it; the rule owns the recipe's shape.
//! - [`JitBindingRule`]: consulted last, when no static binding matched.
//!   A match yields a [`Binding`] that is cached by its derived
//!   [`JitKey`] for the lifetime of the injector.
//!
//! Rules report their own foreign failures, such as parse errors or failed
//! lookups in external registries, through
//! [`ResolutionError::failed`](crate::error::ResolutionError::failed), which
//! ties the cause to the key being resolved.

use std::fmt;

use crate::binding::Binding;
use crate::error::Result;
use crate::injector::Resolution;
use crate::key::{DependencyKey, JitKey};
use crate::recipe::Recipe;

/// A shortcut from key to recipe, evaluated before any binding lookup.
pub trait CreationRule: Send + Sync {
    /// Returns a recipe for `key`, or `None` to let the next stage try.
    ///
    /// Nested keys are resolved through `resolution`; deferred work is
    /// queued on it as well. Foreign errors are wrapped with
    /// [`ResolutionError::failed`](crate::error::ResolutionError::failed).
    fn create(&self, key: &DependencyKey, resolution: &mut Resolution<'_>) -> Result<Option<Recipe>>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A creation rule backed by a closure.
pub struct FnCreationRule<F> {
    name: &'static str,
    rule: F,
}

impl<F> FnCreationRule<F>
where
    F: Fn(&DependencyKey, &mut Resolution<'_>) -> Result<Option<Recipe>> + Send + Sync,
{
    pub fn new(name: &'static str, rule: F) -> Self {
        Self { name, rule }
    }
}

impl<F> CreationRule for FnCreationRule<F>
where
    F: Fn(&DependencyKey, &mut Resolution<'_>) -> Result<Option<Recipe>> + Send + Sync,
{
    fn create(&self, key: &DependencyKey, resolution: &mut Resolution<'_>) -> Result<Option<Recipe>> {
        (self.rule)(key, resolution)
    }

    fn name(&self) -> &str {
        self.name
    }
}

impl<F> fmt::Debug for FnCreationRule<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnCreationRule({})", self.name)
    }
}

/// Synthesizes a binding for keys no static binding matched.
pub trait JitBindingRule: Send + Sync {
    /// Returns a binding for `key`, or `None` to let the next rule try.
    ///
    /// The returned binding is shared by every key projecting to `jit_key`.
    /// Foreign errors are wrapped with [`ResolutionError::failed`](crate::error::ResolutionError::failed).
    fn binding_for(&self, key: &DependencyKey, jit_key: &JitKey) -> Result<Option<Binding>>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A JIT binding rule backed by a closure.
pub struct FnJitRule<F> {
    name: &'static str,
    rule: F,
}

impl<F> FnJitRule<F>
where
    F: Fn(&DependencyKey, &JitKey) -> Result<Option<Binding>> + Send + Sync,
{
    pub fn new(name: &'static str, rule: F) -> Self {
        Self { name, rule }
    }
}

impl<F> JitBindingRule for FnJitRule<F>
where
    F: Fn(&DependencyKey, &JitKey) -> Result<Option<Binding>> + Send + Sync,
{
    fn binding_for(&self, key: &DependencyKey, jit_key: &JitKey) -> Result<Option<Binding>> {
        (self.rule)(key, jit_key)
    }

    fn name(&self) -> &str {
        self.name
    }
}

impl<F> fmt::Debug for FnJitRule<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnJitRule({})", self.name)
    }
}
