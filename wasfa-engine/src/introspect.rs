//! Injection plans: constructor and member injection points as data.
//!
//! The engine never discovers injection points by itself. An
//! [`Introspector`] hands it an [`InjectionPlan`] per type: an ordered list
//! of constructor parameter keys, an ordered list of member injection
//! points, and an optional scope tag. A binding built from a plan resolves
//! each key into a nested recipe and assembles a construct step followed
//! by member transformers.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::binding::Binding;
use crate::error::{BoxError, Result};
use crate::injector::Resolution;
use crate::key::{DependencyKey, JitKey, TypeDescriptor};
use crate::recipe::{Args, ConstructorFn, Instance, MemberFn, Recipe, TransformerRecipe, member_fn};
use crate::rules::JitBindingRule;

#[derive(Clone)]
struct MemberPoint {
    name: &'static str,
    key: DependencyKey,
    inject: MemberFn,
}

/// How to build one type: constructor parameters, then members.
#[derive(Clone)]
pub struct InjectionPlan {
    ty: TypeDescriptor,
    params: Vec<DependencyKey>,
    constructor: ConstructorFn,
    members: Vec<MemberPoint>,
    scope: Option<&'static str>,
}

impl InjectionPlan {
    /// A plan constructing `T` from the values of `params`, in order.
    ///
    /// ```
    /// use wasfa_engine::introspect::InjectionPlan;
    /// use wasfa_engine::key::DependencyKey;
    ///
    /// struct Port(u16);
    /// struct Server { port: std::sync::Arc<Port> }
    ///
    /// let plan = InjectionPlan::constructor::<Server, _>(vec![DependencyKey::of::<Port>()], |args| {
    ///     Ok(Server { port: args.get::<Port>(0)? })
    /// });
    /// assert_eq!(plan.params().len(), 1);
    /// ```
    pub fn constructor<T, F>(params: Vec<DependencyKey>, constructor: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Args) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        let constructor: ConstructorFn = Arc::new(move |args: &Args| {
            constructor(args).map(|value| Arc::new(value) as Instance)
        });
        Self {
            ty: TypeDescriptor::of::<T>(),
            params,
            constructor,
            members: Vec::new(),
            scope: None,
        }
    }

    /// Adds a member injection point, applied after construction in the
    /// order added.
    #[must_use]
    pub fn member<T, V, F>(mut self, name: &'static str, key: DependencyKey, apply: F) -> Self
    where
        T: Send + Sync + 'static,
        V: Send + Sync + 'static,
        F: Fn(&mut T, Arc<V>) + Send + Sync + 'static,
    {
        self.members.push(MemberPoint {
            name,
            key,
            inject: member_fn(name, apply),
        });
        self
    }

    /// Sets the scope tag of bindings built from this plan.
    #[must_use]
    pub fn in_scope(mut self, tag: &'static str) -> Self {
        self.scope = Some(tag);
        self
    }

    pub fn type_descriptor(&self) -> TypeDescriptor {
        self.ty
    }

    pub fn params(&self) -> &[DependencyKey] {
        &self.params
    }

    /// Member injection points as `(name, key)`, in application order.
    pub fn members(&self) -> impl Iterator<Item = (&'static str, &DependencyKey)> {
        self.members.iter().map(|point| (point.name, &point.key))
    }

    pub fn scope_tag(&self) -> Option<&'static str> {
        self.scope
    }

    /// Resolves every injection point and assembles the unscoped recipe.
    pub fn build_recipe(&self, resolution: &mut Resolution<'_>) -> Result<Recipe> {
        let mut args = Vec::with_capacity(self.params.len());
        for key in &self.params {
            args.push(resolution.recipe_for(key)?);
        }
        let recipe = Recipe::construct_raw(self.ty, args, self.constructor.clone());

        let mut members = TransformerRecipe::Identity;
        for point in &self.members {
            let value = resolution.recipe_for(&point.key)?;
            members = members.then(TransformerRecipe::Member {
                name: point.name,
                value,
                inject: point.inject.clone(),
            });
        }

        Ok(match members {
            TransformerRecipe::Identity => recipe,
            members => recipe.transform(members),
        })
    }
}

impl fmt::Debug for InjectionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<&str> = self.members.iter().map(|point| point.name).collect();
        f.debug_struct("InjectionPlan")
            .field("type", &self.ty)
            .field("params", &self.params)
            .field("members", &members)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Supplies injection plans for keys.
pub trait Introspector: Send + Sync {
    fn plan_for(&self, key: &DependencyKey) -> Option<InjectionPlan>;
}

/// An [`Introspector`] over a fixed table of plans, one per type.
#[derive(Debug, Default, Clone)]
pub struct PlanTable {
    plans: HashMap<TypeId, InjectionPlan>,
}

impl PlanTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `plan` for its type, replacing any earlier plan.
    pub fn insert(&mut self, plan: InjectionPlan) {
        self.plans.insert(plan.ty.id(), plan);
    }

    #[must_use]
    pub fn with_plan(mut self, plan: InjectionPlan) -> Self {
        self.insert(plan);
        self
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

impl Introspector for PlanTable {
    fn plan_for(&self, key: &DependencyKey) -> Option<InjectionPlan> {
        self.plans.get(&key.type_id()).cloned()
    }
}

/// JIT binding rule synthesizing a binding for any key with a plan.
#[derive(Clone)]
pub struct PlanJitRule {
    introspector: Arc<dyn Introspector>,
}

impl PlanJitRule {
    pub fn new(introspector: impl Introspector + 'static) -> Self {
        Self {
            introspector: Arc::new(introspector),
        }
    }

    pub fn from_shared(introspector: Arc<dyn Introspector>) -> Self {
        Self { introspector }
    }
}

impl JitBindingRule for PlanJitRule {
    fn binding_for(&self, key: &DependencyKey, jit_key: &JitKey) -> Result<Option<Binding>> {
        Ok(self.introspector.plan_for(key).map(|plan| {
            debug!(key = %key, jit_key = %jit_key, "Synthesized binding from injection plan");
            Binding::from_plan(jit_key.to_string(), plan)
        }))
    }

    fn name(&self) -> &str {
        "injection plans"
    }
}

impl fmt::Debug for PlanJitRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlanJitRule")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::SINGLETON;

    struct Clock;
    struct Scheduler {
        clock: Arc<Clock>,
        label: Option<Arc<String>>,
    }

    fn scheduler_plan() -> InjectionPlan {
        InjectionPlan::constructor::<Scheduler, _>(vec![DependencyKey::of::<Clock>()], |args| {
            Ok(Scheduler {
                clock: args.get::<Clock>(0)?,
                label: None,
            })
        })
        .member::<Scheduler, String, _>("label", DependencyKey::named::<String>("label"), |s, label| {
            s.label = Some(label);
        })
    }

    #[test]
    fn plan_exposes_injection_points() {
        let plan = scheduler_plan().in_scope(SINGLETON);
        assert_eq!(plan.params(), &[DependencyKey::of::<Clock>()]);
        let members: Vec<_> = plan.members().map(|(name, _)| name).collect();
        assert_eq!(members, vec!["label"]);
        assert_eq!(plan.scope_tag(), Some(SINGLETON));
        assert_eq!(plan.type_descriptor(), TypeDescriptor::of::<Scheduler>());
    }

    #[test]
    fn table_looks_up_by_type() {
        let table = PlanTable::new().with_plan(scheduler_plan());
        assert_eq!(table.len(), 1);
        assert!(table.plan_for(&DependencyKey::named::<Scheduler>("any")).is_some());
        assert!(table.plan_for(&DependencyKey::of::<Clock>()).is_none());
    }

    #[test]
    fn jit_rule_binds_planned_types_only() {
        let rule = PlanJitRule::new(PlanTable::new().with_plan(scheduler_plan().in_scope(SINGLETON)));
        let key = DependencyKey::of::<Scheduler>();
        let mut jit = JitKey::default();
        jit.set_type(key.type_descriptor());

        let binding = rule.binding_for(&key, &jit).unwrap().unwrap();
        assert_eq!(binding.scope_tag(), SINGLETON);
        assert!(binding.label().contains("Scheduler"));
        assert!(rule.binding_for(&DependencyKey::of::<Clock>(), &jit).unwrap().is_none());
    }

    #[test]
    fn plan_builds_construct_then_members() {
        use crate::injector::Injector;

        let injector = Injector::builder()
            .bind_type::<Clock>(Binding::to_instance("clock", Clock))
            .bind_key(
                DependencyKey::named::<String>("label"),
                Binding::to_instance("label", String::from("nightly")),
            )
            .jit_rule(PlanJitRule::new(PlanTable::new().with_plan(scheduler_plan())))
            .build();

        let recipe = injector.get_recipe(&DependencyKey::of::<Scheduler>()).unwrap();
        assert!(recipe.describe().contains(".label ="));

        let scheduler = injector.get::<Scheduler>().unwrap();
        assert_eq!(scheduler.label.as_deref().map(String::as_str), Some("nightly"));
        let _ = &scheduler.clock;
    }
}
