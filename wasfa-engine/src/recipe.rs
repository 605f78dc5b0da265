//! Recipes: composable descriptions of how to produce a value.
//!
//! A [`Recipe`] is an immutable tree of producer steps. Nested recipes are
//! the dependencies of the value being built, so the tree rooted at one key
//! mirrors that key's dependency graph. Recipes are reference-counted and
//! their identity matters: caches hand out the same `Recipe` for the same
//! key, and the compiler memoizes by identity.
//!
//! Two shapes recur throughout the vocabulary:
//! - producers (`() -> value`), described by [`Recipe`]
//! - transformers (`(instance) -> instance`), described by
//!   [`TransformerRecipe`] and used for post-construction member injection

use std::any::{Any, type_name};
use std::fmt;
use std::sync::{Arc, Weak};

use crate::binding::BindingInfo;
use crate::compiler::{CompiledProducer, RecipeCompiler};
use crate::deferred::DeferredHandle;
use crate::error::BoxError;
use crate::key::TypeDescriptor;
use crate::scope::Scope;

/// A type-erased, shareable instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Instantiates a value from its resolved constructor arguments.
pub type ConstructorFn = Arc<dyn Fn(&Args) -> Result<Instance, BoxError> + Send + Sync>;

/// Injects one resolved value into an instance: `(instance, value) -> instance`.
pub type MemberFn = Arc<dyn Fn(Instance, Instance) -> Result<Instance, BoxError> + Send + Sync>;

/// Rewrites an instance after construction: `(instance) -> instance`.
pub type EnhancerFn = Arc<dyn Fn(Instance) -> Result<Instance, BoxError> + Send + Sync>;

/// Identity of a recipe node, stable for as long as the recipe lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecipeId(usize);

/// Resolved constructor arguments, in declaration order.
pub struct Args {
    values: Vec<Instance>,
}

impl Args {
    pub(crate) fn new(values: Vec<Instance>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The untyped argument at `index`.
    pub fn instance(&self, index: usize) -> Result<&Instance, BoxError> {
        self.values
            .get(index)
            .ok_or_else(|| format!("missing constructor argument {index} of {}", self.values.len()).into())
    }

    /// The argument at `index`, downcast to `T`.
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, BoxError> {
        downcast::<T>(self.instance(index)?.clone())
            .map_err(|_| format!("constructor argument {index} is not a {}", type_name::<T>()).into())
    }
}

pub(crate) fn downcast<T: Send + Sync + 'static>(instance: Instance) -> Result<Arc<T>, Instance> {
    instance.downcast::<T>()
}

/// Extends the recipe vocabulary with a collaborator-defined step.
pub trait CustomRecipe: Send + Sync {
    /// Short description used in diagnostics.
    fn describe(&self) -> String;

    /// Compiles this step. The compiler is available for nested recipes.
    fn compile(&self, compiler: &RecipeCompiler) -> Result<CompiledProducer, BoxError>;
}

/// One step of a recipe tree.
pub enum RecipeNode {
    /// A pre-built value returned as-is.
    Instance(Instance),
    /// Instantiate `ty` from the values of `args`.
    Construct {
        ty: TypeDescriptor,
        args: Vec<Recipe>,
        constructor: ConstructorFn,
    },
    /// Build `target`, then pass it through `transformer`.
    Transform {
        target: Recipe,
        transformer: TransformerRecipe,
    },
    /// Let `scope` decide when `inner` is built for `binding`.
    Scoped {
        binding: BindingInfo,
        scope: Arc<dyn Scope>,
        inner: Recipe,
    },
    /// A placeholder whose handle is wired after the graph is built.
    Deferred(Arc<DeferredHandle>),
    Custom(Arc<dyn CustomRecipe>),
}

/// A shareable, immutable recipe.
#[derive(Clone)]
pub struct Recipe(Arc<RecipeNode>);

impl Recipe {
    pub fn from_node(node: RecipeNode) -> Self {
        Self(Arc::new(node))
    }

    /// A recipe that always yields `value`.
    pub fn instance<T: Send + Sync + 'static>(value: T) -> Self {
        Self::from_instance(Arc::new(value))
    }

    /// A recipe that always yields the given shared instance.
    pub fn from_instance(instance: Instance) -> Self {
        Self::from_node(RecipeNode::Instance(instance))
    }

    /// A recipe that instantiates `T` from the values of `args`.
    ///
    /// ```
    /// use wasfa_engine::recipe::Recipe;
    ///
    /// struct Port(u16);
    /// struct Server { port: std::sync::Arc<Port> }
    ///
    /// let recipe = Recipe::construct::<Server, _>(vec![Recipe::instance(Port(80))], |args| {
    ///     Ok(Server { port: args.get::<Port>(0)? })
    /// });
    /// assert!(recipe.describe().contains("Server"));
    /// ```
    pub fn construct<T, F>(args: Vec<Recipe>, constructor: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Args) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let constructor: ConstructorFn = Arc::new(move |args: &Args| {
            constructor(args).map(|value| Arc::new(value) as Instance)
        });
        Self::from_node(RecipeNode::Construct {
            ty: TypeDescriptor::of::<T>(),
            args,
            constructor,
        })
    }

    /// A construct step from an untyped constructor.
    pub fn construct_raw(ty: TypeDescriptor, args: Vec<Recipe>, constructor: ConstructorFn) -> Self {
        Self::from_node(RecipeNode::Construct { ty, args, constructor })
    }

    /// Passes the value of this recipe through `transformer`.
    #[must_use]
    pub fn transform(self, transformer: TransformerRecipe) -> Self {
        Self::from_node(RecipeNode::Transform {
            target: self,
            transformer,
        })
    }

    /// Wraps this recipe in `scope` on behalf of `binding`.
    #[must_use]
    pub fn scoped(self, binding: BindingInfo, scope: Arc<dyn Scope>) -> Self {
        Self::from_node(RecipeNode::Scoped {
            binding,
            scope,
            inner: self,
        })
    }

    pub fn deferred(handle: Arc<DeferredHandle>) -> Self {
        Self::from_node(RecipeNode::Deferred(handle))
    }

    pub fn custom(step: impl CustomRecipe + 'static) -> Self {
        Self::from_node(RecipeNode::Custom(Arc::new(step)))
    }

    pub fn node(&self) -> &RecipeNode {
        &self.0
    }

    pub fn id(&self) -> RecipeId {
        RecipeId(Arc::as_ptr(&self.0) as *const () as usize)
    }

    /// A reference that keeps this recipe's identity reserved without
    /// keeping the recipe alive.
    pub(crate) fn downgrade(&self) -> Weak<RecipeNode> {
        Arc::downgrade(&self.0)
    }

    /// Returns `true` if both handles point at the same recipe.
    pub fn ptr_eq(a: &Recipe, b: &Recipe) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// One-line rendering of the recipe tree.
    pub fn describe(&self) -> String {
        match self.node() {
            RecipeNode::Instance(_) => "instance".to_string(),
            RecipeNode::Construct { ty, args, .. } if args.is_empty() => format!("construct {ty}"),
            RecipeNode::Construct { ty, args, .. } => {
                let args: Vec<String> = args.iter().map(Recipe::describe).collect();
                format!("construct {ty}({})", args.join(", "))
            }
            RecipeNode::Transform { target, transformer } => {
                format!("{} |> {}", target.describe(), transformer.describe())
            }
            RecipeNode::Scoped { binding, scope, inner } => {
                format!("{}[{}]{{{}}}", scope.name(), binding.label(), inner.describe())
            }
            RecipeNode::Deferred(handle) => format!("deferred {}", handle.key()),
            RecipeNode::Custom(step) => step.describe(),
        }
    }
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Recipe({})", self.describe())
    }
}

/// A composable description of an `(instance) -> instance` step.
#[derive(Clone)]
pub enum TransformerRecipe {
    Identity,
    /// Resolve `value` and inject it through `inject`.
    Member {
        name: &'static str,
        value: Recipe,
        inject: MemberFn,
    },
    Enhance {
        label: &'static str,
        enhancer: EnhancerFn,
    },
    /// Apply each step in order.
    Chain(Vec<TransformerRecipe>),
}

impl TransformerRecipe {
    /// Injects the value of `value` into field or setter `name` of a `T`.
    ///
    /// The instance must not be shared yet: members are injected right
    /// after construction, before any scope publishes the instance.
    pub fn member<T, V, F>(name: &'static str, value: Recipe, apply: F) -> Self
    where
        T: Send + Sync + 'static,
        V: Send + Sync + 'static,
        F: Fn(&mut T, Arc<V>) + Send + Sync + 'static,
    {
        TransformerRecipe::Member {
            name,
            value,
            inject: member_fn(name, apply),
        }
    }

    /// Rewrites the instance with `enhancer`.
    pub fn enhance<F>(label: &'static str, enhancer: F) -> Self
    where
        F: Fn(Instance) -> Result<Instance, BoxError> + Send + Sync + 'static,
    {
        TransformerRecipe::Enhance {
            label,
            enhancer: Arc::new(enhancer),
        }
    }

    /// Applies `self`, then `next`.
    #[must_use]
    pub fn then(self, next: TransformerRecipe) -> Self {
        match (self, next) {
            (TransformerRecipe::Identity, next) => next,
            (this, TransformerRecipe::Identity) => this,
            (TransformerRecipe::Chain(mut steps), next) => {
                steps.push(next);
                TransformerRecipe::Chain(steps)
            }
            (this, next) => TransformerRecipe::Chain(vec![this, next]),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TransformerRecipe::Identity => "identity".to_string(),
            TransformerRecipe::Member { name, value, .. } => format!(".{name} = {}", value.describe()),
            TransformerRecipe::Enhance { label, .. } => format!("enhance {label}"),
            TransformerRecipe::Chain(steps) => {
                let steps: Vec<String> = steps.iter().map(TransformerRecipe::describe).collect();
                steps.join(" |> ")
            }
        }
    }
}

/// Types an `apply` step into a [`MemberFn`] for field or setter `name`.
pub(crate) fn member_fn<T, V, F>(name: &'static str, apply: F) -> MemberFn
where
    T: Send + Sync + 'static,
    V: Send + Sync + 'static,
    F: Fn(&mut T, Arc<V>) + Send + Sync + 'static,
{
    Arc::new(move |instance: Instance, value: Instance| -> Result<Instance, BoxError> {
        let mut target =
            downcast::<T>(instance).map_err(|_| format!("member {name} expects a {}", type_name::<T>()))?;
        let value = downcast::<V>(value).map_err(|_| format!("member {name} expects a {} value", type_name::<V>()))?;
        let slot = Arc::get_mut(&mut target).ok_or_else(|| format!("member {name}: instance is already shared"))?;
        apply(slot, value);
        Ok(target as Instance)
    })
}

impl fmt::Debug for TransformerRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransformerRecipe({})", self.describe())
    }
}
