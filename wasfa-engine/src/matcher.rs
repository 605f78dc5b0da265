//! Match predicates over dependency keys.
//!
//! Static bindings are selected by a [`KeyMatcher`]. A matcher may also
//! report the set of types it can possibly accept, which lets the injector
//! skip it for keys of unrelated types without evaluating the predicate.

use std::fmt;

use crate::key::{DependencyKey, TypeDescriptor};

/// A predicate over dependency keys.
pub trait KeyMatcher: Send + Sync {
    fn matches(&self, key: &DependencyKey) -> bool;

    /// Types this matcher can accept, or `None` if any type may match.
    fn possible_types(&self) -> Option<Vec<TypeDescriptor>> {
        None
    }

    /// Short description used in diagnostics.
    fn describe(&self) -> String;
}

/// Matches one key exactly (type and all qualifiers).
#[derive(Debug, Clone)]
pub struct ExactKey(pub DependencyKey);

impl KeyMatcher for ExactKey {
    fn matches(&self, key: &DependencyKey) -> bool {
        &self.0 == key
    }

    fn possible_types(&self) -> Option<Vec<TypeDescriptor>> {
        Some(vec![self.0.type_descriptor()])
    }

    fn describe(&self) -> String {
        format!("key {}", self.0)
    }
}

/// Matches every key of one type, whatever its qualifiers.
#[derive(Debug, Clone, Copy)]
pub struct TypeIs(pub TypeDescriptor);

impl TypeIs {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(TypeDescriptor::of::<T>())
    }
}

impl KeyMatcher for TypeIs {
    fn matches(&self, key: &DependencyKey) -> bool {
        key.type_descriptor() == self.0
    }

    fn possible_types(&self) -> Option<Vec<TypeDescriptor>> {
        Some(vec![self.0])
    }

    fn describe(&self) -> String {
        format!("type {}", self.0)
    }
}

/// Matches keys carrying an annotation.
#[derive(Debug, Clone, Copy)]
pub struct AnnotatedWith(pub &'static str);

impl KeyMatcher for AnnotatedWith {
    fn matches(&self, key: &DependencyKey) -> bool {
        key.has_annotation(self.0)
    }

    fn describe(&self) -> String {
        format!("annotated {}", self.0)
    }
}

/// Matches when every inner matcher does.
pub struct AllOf(pub Vec<Box<dyn KeyMatcher>>);

impl KeyMatcher for AllOf {
    fn matches(&self, key: &DependencyKey) -> bool {
        self.0.iter().all(|m| m.matches(key))
    }

    /// The intersection of the hinted inner matchers.
    fn possible_types(&self) -> Option<Vec<TypeDescriptor>> {
        self.0
            .iter()
            .filter_map(|m| m.possible_types())
            .reduce(|acc, types| acc.into_iter().filter(|ty| types.contains(ty)).collect())
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|m| m.describe()).collect();
        format!("all({})", parts.join(", "))
    }
}

/// Matches when any inner matcher does.
pub struct AnyOf(pub Vec<Box<dyn KeyMatcher>>);

impl KeyMatcher for AnyOf {
    fn matches(&self, key: &DependencyKey) -> bool {
        self.0.iter().any(|m| m.matches(key))
    }

    /// The union of the inner hints; unhinted if any inner matcher is.
    fn possible_types(&self) -> Option<Vec<TypeDescriptor>> {
        let mut union = Vec::new();
        for matcher in &self.0 {
            for ty in matcher.possible_types()? {
                if !union.contains(&ty) {
                    union.push(ty);
                }
            }
        }
        Some(union)
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|m| m.describe()).collect();
        format!("any({})", parts.join(", "))
    }
}

/// A matcher backed by a closure.
pub struct FnMatcher<F> {
    description: &'static str,
    predicate: F,
}

impl<F> FnMatcher<F>
where
    F: Fn(&DependencyKey) -> bool + Send + Sync,
{
    pub fn new(description: &'static str, predicate: F) -> Self {
        Self { description, predicate }
    }
}

impl<F> KeyMatcher for FnMatcher<F>
where
    F: Fn(&DependencyKey) -> bool + Send + Sync,
{
    fn matches(&self, key: &DependencyKey) -> bool {
        (self.predicate)(key)
    }

    fn describe(&self) -> String {
        self.description.to_string()
    }
}

impl<F> fmt::Debug for FnMatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnMatcher({})", self.description)
    }
}
