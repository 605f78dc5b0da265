//! Error types for resolution, compilation and provisioning.
//!
//! Every failure surfaces as a [`ResolutionError`]: an [`ErrorKind`] plus
//! a resolution trace recording which keys and bindings were being built
//! when the failure happened. The rendered message concatenates both, so
//! a failure deep inside a graph still reads as one line of causes:
//!
//! ```text
//! Failed to provision Database: connection refused
//!   Resolution trace: Service → binding Service → Database → binding Database
//! ```

use std::error::Error as StdError;
use std::fmt;

use wasfa_support::rendering::{render_chain, render_list};

use crate::key::DependencyKey;
use crate::recipe::Recipe;

/// Boxed foreign error, as returned by constructors, enhancers and rules.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The kind of failure, following the engine's error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// No creation rule, static binding or JIT binding rule matched a key.
    #[error("{}", .0)]
    Unresolved(UnresolvedError),

    /// More than one static binding matched the same key.
    #[error("{}", .0)]
    AmbiguousBinding(AmbiguousBindingError),

    /// A binding was entered while already under construction.
    #[error("{}", .0)]
    CircularDependency(CircularDependencyError),

    /// A binding's own recipe factory re-entered itself.
    #[error(
        "Recursive recipe creation for binding {binding}\n  Hint: a recipe factory must not request its own binding's recipe"
    )]
    RecursiveRecipeCreation { binding: String },

    /// The resolution lock was requested while holding the instantiation lock.
    #[error("{}", .0)]
    LockOrderViolation(LockOrderViolationError),

    /// The recipe compiler failed to specialize a recipe.
    #[error("{}", .0)]
    Compilation(CompilationError),

    /// A compiled producer failed while constructing a value.
    #[error("Failed to provision {target}: {source}")]
    Provision {
        target: String,
        #[source]
        source: BoxError,
    },

    /// A binding names a scope tag that was never registered.
    #[error("No scope registered for tag {tag:?} (used by binding {binding})")]
    ScopeNotFound { binding: String, tag: &'static str },

    /// Recipe recursion went deeper than the configured limit.
    #[error(
        "Resolution depth limit of {limit} exceeded at {key}\n  Hint: a creation rule may be producing a self-referential recipe"
    )]
    DepthExceeded { key: DependencyKey, limit: usize },

    /// A typed getter received a value of another type.
    #[error("Type mismatch for {key}: expected {expected}")]
    TypeMismatch {
        key: DependencyKey,
        expected: &'static str,
    },

    /// A deferred handle was invoked before its wiring action ran.
    #[error("Deferred dependency {key} is not wired yet\n  Hint: deferred handles become usable once the resolution that created them completes")]
    NotWired { key: DependencyKey },

    /// A foreign failure that occurred while resolving a key.
    #[error("Resolution of {key} failed: {source}")]
    Failed {
        key: DependencyKey,
        #[source]
        source: BoxError,
    },
}

/// Error when nothing knows how to build a key.
#[derive(Debug)]
pub struct UnresolvedError {
    pub requested: DependencyKey,
    /// Similar registered types, for "did you mean?" hints.
    pub suggestions: Vec<String>,
}

impl fmt::Display for UnresolvedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unresolved dependency: {}", self.requested)?;
        write!(f, "{}", render_list("Did you mean one of:", &self.suggestions))?;
        write!(
            f,
            "\n  Hint: register a static binding, a creation rule or a JIT binding rule for {}",
            self.requested.type_name()
        )
    }
}

/// Error when more than one static binding matched.
#[derive(Debug)]
pub struct AmbiguousBindingError {
    pub key: DependencyKey,
    /// Labels of every matching binding, in registration order.
    pub bindings: Vec<String>,
}

impl fmt::Display for AmbiguousBindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ambiguous binding for {}", self.key)?;
        write!(f, "{}", render_list("Matching bindings:", &self.bindings))?;
        write!(f, "\n  Hint: narrow the matchers so at most one binding matches each key")
    }
}

/// Error when a binding cycle is detected.
///
/// The chain runs from the first occurrence of the repeated binding to the
/// repeat, in encounter order: `[A, B, A]`.
#[derive(Debug)]
pub struct CircularDependencyError {
    pub chain: Vec<String>,
}

impl fmt::Display for CircularDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Circular dependency detected:\n  {}", render_chain(&self.chain))?;
        write!(
            f,
            "\n  Hint: break the cycle with a deferred handle (DependencyKey::deferred)"
        )
    }
}

/// Error when the lock ordering rule is broken.
#[derive(Debug)]
pub struct LockOrderViolationError {
    pub key: DependencyKey,
}

impl fmt::Display for LockOrderViolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lock-ordering violation: {} needs resolution while the instantiation lock is held",
            self.key
        )?;
        write!(
            f,
            "\n  Hint: do not use the injector from within constructors of injected objects; inject the dependency or a deferred handle instead"
        )
    }
}

/// Error when a recipe cannot be compiled.
#[derive(Debug)]
pub struct CompilationError {
    pub recipe: Recipe,
    pub source: BoxError,
}

impl fmt::Display for CompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to compile recipe {:?}: {}", self.recipe, self.source)
    }
}

/// One entry of a resolution trace.
#[derive(Debug, Clone)]
pub enum TraceFrame {
    Key(DependencyKey),
    Binding(String),
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceFrame::Key(key) => write!(f, "{key}"),
            TraceFrame::Binding(label) => write!(f, "binding {label}"),
        }
    }
}

/// Main error type for all engine operations.
#[derive(Debug)]
pub struct ResolutionError {
    kind: Box<ErrorKind>,
    /// Innermost frame first; frames are pushed while unwinding.
    trace: Vec<TraceFrame>,
}

impl ResolutionError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            trace: Vec::new(),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.kind
    }

    /// Trace frames, outermost first.
    pub fn trace(&self) -> impl Iterator<Item = &TraceFrame> {
        self.trace.iter().rev()
    }

    /// Wraps a foreign error, or unwraps it if it already is a
    /// [`ResolutionError`] so domain errors are never nested twice.
    pub fn from_boxed(source: BoxError, wrap: impl FnOnce(BoxError) -> ErrorKind) -> Self {
        match source.downcast::<ResolutionError>() {
            Ok(domain) => *domain,
            Err(foreign) => Self::new(wrap(foreign)),
        }
    }

    /// Wraps a failure raised while resolving `key`.
    pub fn failed(key: &DependencyKey, source: impl Into<BoxError>) -> Self {
        Self::from_boxed(source.into(), |source| ErrorKind::Failed {
            key: key.clone(),
            source,
        })
    }

    /// Wraps a failure raised while constructing `target`.
    pub fn provision(target: impl fmt::Display, source: BoxError) -> Self {
        Self::from_boxed(source, |source| ErrorKind::Provision {
            target: target.to_string(),
            source,
        })
    }

    /// Records that this error unwound through the resolution of `key`.
    #[must_use]
    pub fn resolving(self, key: &DependencyKey) -> Self {
        self.push_frame(TraceFrame::Key(key.clone()))
    }

    /// Records that this error unwound through a binding.
    #[must_use]
    pub fn within_binding(self, label: &str) -> Self {
        self.push_frame(TraceFrame::Binding(label.to_string()))
    }

    fn push_frame(mut self, frame: TraceFrame) -> Self {
        let duplicate = match (self.trace.last(), &frame) {
            (Some(TraceFrame::Key(last)), TraceFrame::Key(key)) => last == key,
            (Some(TraceFrame::Binding(last)), TraceFrame::Binding(label)) => last == label,
            _ => false,
        };
        if !duplicate {
            self.trace.push(frame);
        }
        self
    }

    pub fn is_circular(&self) -> bool {
        matches!(*self.kind, ErrorKind::CircularDependency(_))
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(*self.kind, ErrorKind::Unresolved(_))
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.trace.is_empty() {
            let frames: Vec<String> = self.trace().map(ToString::to_string).collect();
            write!(f, "\n  Resolution trace: {}", render_chain(&frames))?;
        }
        Ok(())
    }
}

impl StdError for ResolutionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.kind.source()
    }
}

impl From<ErrorKind> for ResolutionError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Convenient Result type for engine operations.
pub type Result<T> = std::result::Result<T, ResolutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Database;
    struct Service;

    #[test]
    fn unresolved_error_display() {
        let err = ResolutionError::new(ErrorKind::Unresolved(UnresolvedError {
            requested: DependencyKey::of::<Database>(),
            suggestions: vec!["app::DataBase".into()],
        }));

        let msg = err.to_string();
        assert!(msg.contains("Unresolved dependency: Database"));
        assert!(msg.contains("Did you mean"));
        assert!(msg.contains("app::DataBase"));
    }

    #[test]
    fn circular_dependency_error_display() {
        let err = ResolutionError::new(ErrorKind::CircularDependency(CircularDependencyError {
            chain: vec!["A".into(), "B".into(), "A".into()],
        }));
        let msg = err.to_string();
        assert!(msg.contains("Circular"));
        assert!(msg.contains("A → B → A"));
        assert!(err.is_circular());
    }

    #[test]
    fn ambiguous_lists_all_bindings() {
        let err = ResolutionError::new(ErrorKind::AmbiguousBinding(AmbiguousBindingError {
            key: DependencyKey::of::<Service>(),
            bindings: vec!["first".into(), "second".into()],
        }));
        let msg = err.to_string();
        assert!(msg.contains("- first"));
        assert!(msg.contains("- second"));
    }

    #[test]
    fn trace_renders_outermost_first() {
        let err = ResolutionError::new(ErrorKind::NotWired {
            key: DependencyKey::of::<Database>(),
        })
        .resolving(&DependencyKey::of::<Database>())
        .within_binding("Service")
        .resolving(&DependencyKey::of::<Service>());

        let msg = err.to_string();
        assert!(msg.contains("Resolution trace: Service → binding Service → Database"));
    }

    #[test]
    fn repeated_frames_collapse() {
        let key = DependencyKey::of::<Service>();
        let err = ResolutionError::new(ErrorKind::NotWired { key: key.clone() })
            .resolving(&key)
            .resolving(&key);
        assert_eq!(err.trace().count(), 1);
    }

    #[test]
    fn domain_errors_are_not_double_wrapped() {
        let inner = ResolutionError::new(ErrorKind::RecursiveRecipeCreation {
            binding: "A".into(),
        });
        let boxed: BoxError = Box::new(inner);
        let err = ResolutionError::provision("Service", boxed);
        assert!(matches!(err.kind(), ErrorKind::RecursiveRecipeCreation { .. }));
    }

    #[test]
    fn foreign_errors_are_wrapped_with_key() {
        let err = ResolutionError::failed(&DependencyKey::of::<Database>(), "disk on fire");
        match err.kind() {
            ErrorKind::Failed { key, source } => {
                assert_eq!(key, &DependencyKey::of::<Database>());
                assert_eq!(source.to_string(), "disk on fire");
            }
            other => panic!("Expected Failed, got: {other:?}"),
        }
        assert!(err.source().is_some());
    }
}
