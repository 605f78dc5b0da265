//! Dependency identification keys.
//!
//! [`DependencyKey`] is the structural descriptor of "what is wanted": a
//! type plus qualifying metadata (a required name, injection-site
//! annotations, and for wrapper types such as deferred handles, the
//! wrapped target key). Equality and hashing are structural, so two keys
//! built independently at different injection sites share one cached
//! recipe when they describe the same thing.
//!
//! [`JitKey`] is the projection of a dependency key used to cache
//! just-in-time bindings. It is derived by an ordered list of
//! [`JitKeyRule`]s.

use std::any::{TypeId, type_name};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use wasfa_support::rendering::shorten_type_name;

use crate::deferred::DeferredHandle;

/// A Rust type, identified by [`TypeId`] and carrying its name for
/// diagnostics.
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
    id: TypeId,
    name: &'static str,
}

impl TypeDescriptor {
    /// Describes type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Builds a descriptor from raw parts.
    #[inline]
    pub fn from_raw(id: TypeId, name: &'static str) -> Self {
        Self { id, name }
    }

    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name with module paths stripped.
    pub fn short_name(&self) -> String {
        shorten_type_name(self.name)
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeDescriptor {}

impl Hash for TypeDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeDescriptor({})", self.name)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

/// Uniquely identifies a dependency request.
///
/// Keys are immutable. Decorating a key (adding a name or an annotation)
/// returns a new key.
///
/// # Examples
/// ```
/// use wasfa_engine::key::DependencyKey;
///
/// let plain = DependencyKey::of::<String>();
/// let named = DependencyKey::named::<String>("database_url");
/// assert_ne!(plain, named);
///
/// let annotated = plain.with_annotation("optional");
/// assert!(annotated.has_annotation("optional"));
/// assert!(!plain.has_annotation("optional"));
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DependencyKey {
    ty: TypeDescriptor,
    name: Option<&'static str>,
    annotations: BTreeSet<&'static str>,
    target: Option<Arc<DependencyKey>>,
}

impl DependencyKey {
    /// Creates a key for type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::from_type(TypeDescriptor::of::<T>())
    }

    /// Creates a key for type `T` qualified by a required name.
    #[inline]
    pub fn named<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self::of::<T>().with_name(name)
    }

    /// Creates an unqualified key from a type descriptor.
    #[inline]
    pub fn from_type(ty: TypeDescriptor) -> Self {
        Self {
            ty,
            name: None,
            annotations: BTreeSet::new(),
            target: None,
        }
    }

    /// Creates the key of a [`DeferredHandle`] to `target`.
    ///
    /// The deferred-handle creation rule resolves such keys to a
    /// placeholder that is wired once the surrounding graph is built.
    pub fn deferred(target: DependencyKey) -> Self {
        Self {
            target: Some(Arc::new(target)),
            ..Self::of::<DeferredHandle>()
        }
    }

    /// Returns a copy of this key with the required name replaced.
    #[must_use]
    pub fn with_name(&self, name: &'static str) -> Self {
        Self {
            name: Some(name),
            ..self.clone()
        }
    }

    /// Returns a copy of this key with one more annotation.
    #[must_use]
    pub fn with_annotation(&self, annotation: &'static str) -> Self {
        let mut key = self.clone();
        key.annotations.insert(annotation);
        key
    }

    #[inline]
    pub fn type_descriptor(&self) -> TypeDescriptor {
        self.ty
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.ty.id
    }

    /// Fully qualified type name, used in error messages.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.ty.name
    }

    /// The required qualifier name, if any.
    #[inline]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    /// Injection-site annotations, in sorted order.
    pub fn annotations(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.annotations.iter().copied()
    }

    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations.contains(annotation)
    }

    /// The wrapped key for wrapper types such as deferred handles.
    pub fn target(&self) -> Option<&DependencyKey> {
        self.target.as_deref()
    }
}

impl fmt::Debug for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DependencyKey({self})")
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}<{target}>", self.ty)?,
            None => write!(f, "{}", self.ty)?,
        }
        if let Some(name) = self.name {
            write!(f, " @{name}")?;
        }
        if !self.annotations.is_empty() {
            let annotations: Vec<_> = self.annotations.iter().copied().collect();
            write!(f, " [{}]", annotations.join(", "))?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════
// JIT keys
// ═══════════════════════════════════════════

/// The cache key of a just-in-time binding.
///
/// Every field starts empty. [`JitKeyRule`]s copy the parts of a
/// [`DependencyKey`] that should distinguish JIT bindings. Two dependency
/// keys with the same projection share one binding, one recipe and one
/// scope decision.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct JitKey {
    ty: Option<TypeDescriptor>,
    name: Option<&'static str>,
    annotations: BTreeSet<&'static str>,
    target: Option<Arc<DependencyKey>>,
}

impl JitKey {
    pub fn type_descriptor(&self) -> Option<TypeDescriptor> {
        self.ty
    }

    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    pub fn annotations(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.annotations.iter().copied()
    }

    pub fn target(&self) -> Option<&DependencyKey> {
        self.target.as_deref()
    }

    pub fn set_type(&mut self, ty: TypeDescriptor) {
        self.ty = Some(ty);
    }

    pub fn set_name(&mut self, name: Option<&'static str>) {
        self.name = name;
    }

    pub fn insert_annotation(&mut self, annotation: &'static str) {
        self.annotations.insert(annotation);
    }

    pub fn set_target(&mut self, target: Option<DependencyKey>) {
        self.target = target.map(Arc::new);
    }
}

impl fmt::Debug for JitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JitKey({self})")
    }
}

impl fmt::Display for JitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.ty, &self.target) {
            (Some(ty), Some(target)) => write!(f, "{ty}<{target}>")?,
            (Some(ty), None) => write!(f, "{ty}")?,
            (None, _) => f.write_str("*")?,
        }
        if let Some(name) = self.name {
            write!(f, " @{name}")?;
        }
        for annotation in &self.annotations {
            write!(f, " +{annotation}")?;
        }
        Ok(())
    }
}

/// One step of JIT key derivation.
pub trait JitKeyRule: Send + Sync {
    /// Copies whatever this rule keeps from `key` into `jit`.
    fn extract(&self, key: &DependencyKey, jit: &mut JitKey);
}

/// Keeps the key's type.
#[derive(Debug, Clone, Copy)]
pub struct KeepType;

impl JitKeyRule for KeepType {
    fn extract(&self, key: &DependencyKey, jit: &mut JitKey) {
        jit.set_type(key.type_descriptor());
    }
}

/// Keeps the required qualifier name.
#[derive(Debug, Clone, Copy)]
pub struct KeepName;

impl JitKeyRule for KeepName {
    fn extract(&self, key: &DependencyKey, jit: &mut JitKey) {
        jit.set_name(key.name());
    }
}

/// Keeps one annotation when the key carries it.
#[derive(Debug, Clone, Copy)]
pub struct KeepAnnotation(pub &'static str);

impl JitKeyRule for KeepAnnotation {
    fn extract(&self, key: &DependencyKey, jit: &mut JitKey) {
        if key.has_annotation(self.0) {
            jit.insert_annotation(self.0);
        }
    }
}

/// Keeps the wrapped target of wrapper keys.
#[derive(Debug, Clone, Copy)]
pub struct KeepTarget;

impl JitKeyRule for KeepTarget {
    fn extract(&self, key: &DependencyKey, jit: &mut JitKey) {
        jit.set_target(key.target().cloned());
    }
}

/// A key rule backed by a closure.
pub struct FnJitKeyRule<F>(pub F);

impl<F> JitKeyRule for FnJitKeyRule<F>
where
    F: Fn(&DependencyKey, &mut JitKey) + Send + Sync,
{
    fn extract(&self, key: &DependencyKey, jit: &mut JitKey) {
        (self.0)(key, jit)
    }
}

/// The rule sequence used when none is configured.
pub fn default_jit_key_rules() -> Vec<Arc<dyn JitKeyRule>> {
    vec![Arc::new(KeepType), Arc::new(KeepName), Arc::new(KeepTarget)]
}

/// Projects `key` through `rules`, in order.
pub fn derive_jit_key(rules: &[Arc<dyn JitKeyRule>], key: &DependencyKey) -> JitKey {
    let mut jit = JitKey::default();
    for rule in rules {
        rule.extract(key, &mut jit);
    }
    jit
}
