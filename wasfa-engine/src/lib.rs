//! Resolution and recipe compilation engine for Wasfa.
//!
//! Keys go in, recipes are built and cached, recipes are compiled into
//! closure trees, and compiled producers hand out instances.

pub mod binding;
pub mod compiler;
pub mod context;
pub mod deferred;
pub mod error;
pub mod injector;
pub mod introspect;
pub mod key;
pub mod lock;
pub mod matcher;
pub mod module;
pub mod recipe;
pub mod rules;
pub mod scope;
pub mod settings;

pub use error::{ErrorKind, ResolutionError, Result};
pub use injector::{Injector, InjectorBuilder, Resolution};
pub use key::DependencyKey;

/// Commonly used types.
pub mod prelude {
    pub use crate::binding::{Binding, StaticBinding};
    pub use crate::compiler::{CompiledProducer, CompiledTransformer};
    pub use crate::deferred::DeferredHandle;
    pub use crate::error::{BoxError, ErrorKind, ResolutionError, Result};
    pub use crate::injector::{Injector, InjectorBuilder, Resolution};
    pub use crate::introspect::{InjectionPlan, Introspector, PlanJitRule, PlanTable};
    pub use crate::key::{DependencyKey, JitKey, KeepAnnotation, KeepName, KeepTarget, KeepType};
    pub use crate::lock::InstantiationLock;
    pub use crate::matcher::{AnnotatedWith, ExactKey, KeyMatcher, TypeIs};
    pub use crate::module::{Binder, Module};
    pub use crate::recipe::{Args, CustomRecipe, Instance, Recipe, TransformerRecipe};
    pub use crate::rules::{CreationRule, JitBindingRule};
    pub use crate::scope::{SINGLETON, Scope, Singleton, UNSCOPED, Unscoped};
    pub use crate::settings::EngineSettings;
}
