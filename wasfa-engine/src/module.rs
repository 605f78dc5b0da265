//! Modules: grouped registration units.
//!
//! A [`Module`] bundles related bindings, rules and scopes so configuration
//! can be split by concern instead of living in one builder chain:
//!
//! ```rust,ignore
//! Injector::builder()
//!     .install(&StorageModule)
//!     .install(&HttpModule)
//!     .build();
//! ```

use std::sync::Arc;

use crate::binding::StaticBinding;
use crate::rules::{CreationRule, JitBindingRule};
use crate::scope::Scope;

/// A unit of related registrations.
pub trait Module: Send + Sync {
    /// Registers everything this module contributes. Called once, while
    /// the injector is being configured.
    fn configure(&self, binder: &mut dyn Binder);

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// The registration surface a [`Module`] sees.
///
/// A subset of the injector builder, kept separate so modules can be
/// exercised against a mock.
pub trait Binder {
    fn bind_static(&mut self, binding: StaticBinding);

    fn add_creation_rule(&mut self, rule: Arc<dyn CreationRule>);

    fn add_jit_rule(&mut self, rule: Arc<dyn JitBindingRule>);

    fn bind_scope(&mut self, tag: &'static str, scope: Arc<dyn Scope>);
}
