//! Engine settings.

use serde::{Deserialize, Serialize};

/// Tunables fixed at build time.
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// use wasfa_engine::settings::EngineSettings;
///
/// let settings: EngineSettings = serde_json::from_str(r#"{ "max_depth": 64 }"#).unwrap();
/// assert_eq!(settings.max_depth, 64);
/// assert!(settings.jit_bindings);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Maximum nesting of recipe creation within one top-level request.
    pub max_depth: usize,
    /// Whether JIT binding rules are consulted at all.
    pub jit_bindings: bool,
    /// Maximum "did you mean" suggestions on unresolved keys.
    pub max_suggestions: usize,
    /// Whether the deferred-handle creation rule is installed first.
    pub deferred_handles: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_depth: 256,
            jit_bindings: true,
            max_suggestions: 3,
            deferred_handles: true,
        }
    }
}
