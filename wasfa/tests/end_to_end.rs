//! End-to-end resolution scenarios.

use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use wasfa::compiler::RecipeCompiler;
use wasfa::prelude::*;
use wasfa::recipe::CustomRecipe;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn counted<T, F>(counter: &Arc<AtomicUsize>, make: F) -> Recipe
where
    T: Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    let counter = counter.clone();
    Recipe::construct::<T, _>(vec![], move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(make())
    })
}

/// A binding whose recipe constructs `T` from the single nested key `dep`.
fn needs<T, D, F>(label: &'static str, dep: DependencyKey, make: F) -> Binding
where
    T: Send + Sync + 'static,
    D: Send + Sync + 'static,
    F: Fn(Arc<D>) -> T + Send + Sync + Clone + 'static,
{
    Binding::new(label, move |_, resolution| {
        let dep = resolution.recipe_for(&dep)?;
        let make = make.clone();
        Ok(Recipe::construct::<T, _>(vec![dep], move |args| Ok(make(args.get::<D>(0)?))))
    })
}

// ── Scenario: singleton logger, unscoped service ──

struct ConsoleLogger;
struct Service {
    logger: Arc<ConsoleLogger>,
}

#[test]
fn service_instances_share_singleton_logger() {
    init_tracing();
    let constructed = Arc::new(AtomicUsize::new(0));
    let injector = Injector::builder()
        .bind_key(
            DependencyKey::of::<ConsoleLogger>(),
            Binding::to_recipe("console logger", counted(&constructed, || ConsoleLogger)).in_scope(SINGLETON),
        )
        .bind_key(
            DependencyKey::of::<Service>(),
            needs::<Service, ConsoleLogger, _>("service", DependencyKey::of::<ConsoleLogger>(), |logger| Service {
                logger,
            }),
        )
        .build();

    let key = DependencyKey::of::<Service>();
    let first = injector.get_instance(&key).unwrap().downcast::<Service>().unwrap();
    let second = injector.get_instance(&key).unwrap().downcast::<Service>().unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first.logger, &second.logger));
    assert_eq!(constructed.load(Ordering::SeqCst), 1);
}

#[test]
fn recipes_and_producers_are_idempotent() {
    init_tracing();
    let injector = Injector::builder()
        .bind_type::<ConsoleLogger>(Binding::to_instance("logger", ConsoleLogger))
        .bind_type::<Service>(needs::<Service, ConsoleLogger, _>(
            "service",
            DependencyKey::of::<ConsoleLogger>(),
            |logger| Service { logger },
        ))
        .build();
    let key = DependencyKey::of::<Service>();

    let a = injector.get_recipe(&key).unwrap();
    let b = injector.get_recipe(&key).unwrap();
    assert!(Recipe::ptr_eq(&a, &b));
    assert!(injector.has_recipe(&DependencyKey::of::<ConsoleLogger>()));

    let p = injector.get_compiled_producer(&key).unwrap();
    let q = injector.get_compiled_producer(&key).unwrap();
    assert!(CompiledProducer::ptr_eq(&p, &q));
}

// ── Binding selection ──

struct Cache;

#[test]
fn ambiguous_bindings_are_never_silently_picked() {
    init_tracing();
    let injector = Injector::builder()
        .bind(StaticBinding::new(TypeIs::of::<Cache>(), Binding::to_instance("memory cache", Cache)))
        .bind(StaticBinding::new(AnnotatedWith("hot"), Binding::to_instance("hot cache", Cache)))
        .build();

    // Only the type matcher applies to the plain key.
    assert!(injector.get::<Cache>().is_ok());

    let hot = DependencyKey::of::<Cache>().with_annotation("hot");
    let err = injector.get_instance(&hot).unwrap_err();
    match err.kind() {
        ErrorKind::AmbiguousBinding(e) => {
            assert_eq!(e.key, hot);
            assert_eq!(e.bindings.len(), 2);
        }
        other => panic!("Expected AmbiguousBinding, got: {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("memory cache"));
    assert!(message.contains("hot cache"));
}

struct Widget;

#[test]
fn keys_with_same_jit_projection_share_one_binding() {
    init_tracing();
    let synthesized = Arc::new(AtomicUsize::new(0));
    let rule_calls = synthesized.clone();
    let injector = Injector::builder()
        .jit_key_rules(vec![Arc::new(KeepType)])
        .jit_rule_fn("widgets", move |key, _jit| {
            if key.type_id() != TypeId::of::<Widget>() {
                return Ok(None);
            }
            rule_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Binding::to_recipe(
                "widget",
                Recipe::construct::<Widget, _>(vec![], |_| Ok(Widget)),
            )))
        })
        .build();

    let plain = DependencyKey::of::<Widget>();
    let blue = DependencyKey::named::<Widget>("blue");
    let a = injector.get_recipe(&plain).unwrap();
    let b = injector.get_recipe(&blue).unwrap();

    assert!(Recipe::ptr_eq(&a, &b));
    assert_eq!(synthesized.load(Ordering::SeqCst), 1);
    assert_eq!(injector.jit_binding_count(), 1);

    let p = injector.get_compiled_producer(&plain).unwrap();
    let q = injector.get_compiled_producer(&blue).unwrap();
    assert!(CompiledProducer::ptr_eq(&p, &q));
}

#[test]
fn default_jit_keys_keep_names_apart() {
    init_tracing();
    let injector = Injector::builder()
        .jit_rule_fn("widgets", |key, _| {
            Ok((key.type_id() == TypeId::of::<Widget>())
                .then(|| Binding::to_recipe("widget", Recipe::construct::<Widget, _>(vec![], |_| Ok(Widget)))))
        })
        .build();

    let a = injector.get_recipe(&DependencyKey::of::<Widget>()).unwrap();
    let b = injector.get_recipe(&DependencyKey::named::<Widget>("blue")).unwrap();
    assert!(!Recipe::ptr_eq(&a, &b));
    assert_eq!(injector.jit_binding_count(), 2);
}

// ── Cycles ──

struct A {
    _b: Arc<B>,
}
struct B {
    _next: Arc<dyn std::any::Any + Send + Sync>,
}
struct C;

#[test]
fn cycle_reports_chain_in_encounter_order() {
    init_tracing();
    let injector = Injector::builder()
        .bind_type::<A>(needs::<A, B, _>("A", DependencyKey::of::<B>(), |b| A { _b: b }))
        .bind_type::<B>(needs::<B, A, _>("B", DependencyKey::of::<A>(), |a| B { _next: a }))
        .build();

    let err = injector.get_instance(&DependencyKey::of::<A>()).unwrap_err();
    assert!(err.is_circular());
    match err.kind() {
        ErrorKind::CircularDependency(e) => assert_eq!(e.chain, vec!["A", "B", "A"]),
        other => panic!("Expected CircularDependency, got: {other:?}"),
    }
    assert!(err.to_string().contains("A → B → A"));

    // Nothing half-built is left behind.
    assert_eq!(injector.cached_recipes(), 0);
}

#[test]
fn acyclic_chain_resolves() {
    init_tracing();
    let injector = Injector::builder()
        .bind_type::<A>(needs::<A, B, _>("A", DependencyKey::of::<B>(), |b| A { _b: b }))
        .bind_type::<B>(needs::<B, C, _>("B", DependencyKey::of::<C>(), |c| B { _next: c }))
        .bind_type::<C>(Binding::to_recipe("C", Recipe::construct::<C, _>(vec![], |_| Ok(C))))
        .build();

    assert!(injector.get::<A>().is_ok());
    assert_eq!(injector.cached_recipes(), 3);
}

// ── Deferred handles ──

struct Parent {
    child: Arc<Child>,
}
struct Child {
    parent: Arc<DeferredHandle>,
}

#[test]
fn deferred_handle_breaks_legitimate_cycle() {
    init_tracing();
    let injector = Injector::builder()
        .bind_type::<Parent>(
            needs::<Parent, Child, _>("parent", DependencyKey::of::<Child>(), |child| Parent { child })
                .in_scope(SINGLETON),
        )
        .bind_type::<Child>(needs::<Child, DeferredHandle, _>(
            "child",
            DependencyKey::deferred(DependencyKey::of::<Parent>()),
            |parent| Child { parent },
        ))
        .build();

    let parent = injector.get::<Parent>().unwrap();
    assert!(parent.child.parent.is_wired());

    let through_handle = parent.child.parent.get::<Parent>().unwrap();
    assert!(Arc::ptr_eq(&parent, &through_handle));
}

#[test]
fn deferred_handles_can_be_disabled() {
    init_tracing();
    let injector = Injector::builder()
        .settings(EngineSettings {
            deferred_handles: false,
            ..EngineSettings::default()
        })
        .build();
    let err = injector
        .get_recipe(&DependencyKey::deferred(DependencyKey::of::<Parent>()))
        .unwrap_err();
    assert!(err.is_unresolved());
}

#[derive(Debug)]
struct Holder {
    target: Arc<DeferredHandle>,
}
struct Target;
#[derive(Debug)]
struct Outer {
    _holder: Arc<Holder>,
}

#[test]
fn failed_resolution_discards_unwired_binding_recipes() {
    init_tracing();
    let injector = Injector::builder()
        .bind_type::<Target>(Binding::to_instance("target", Target))
        .bind_type::<Holder>(needs::<Holder, DeferredHandle, _>(
            "holder",
            DependencyKey::deferred(DependencyKey::of::<Target>()),
            |target| Holder { target },
        ))
        .bind_type::<Outer>(Binding::new("outer", |_, resolution| {
            let holder = resolution.recipe_for(&DependencyKey::of::<Holder>())?;
            let missing = resolution.recipe_for(&DependencyKey::of::<Missing>())?;
            Ok(Recipe::construct::<Outer, _>(vec![holder, missing], |args| {
                Ok(Outer {
                    _holder: args.get::<Holder>(0)?,
                })
            }))
        }))
        .build();

    assert!(injector.get::<Outer>().unwrap_err().is_unresolved());

    // The holder's first recipe lost its wiring action with the failed
    // request; asking again must rebuild it and wire the new handle.
    let holder = injector.get::<Holder>().unwrap();
    assert!(holder.target.is_wired());
    assert!(holder.target.get::<Target>().is_ok());
}

// ── Boundaries of rules and bindings ──

struct Knot;

#[test]
fn self_referential_creation_rule_hits_depth_limit_not_cycle_detection() {
    init_tracing();
    let injector = Injector::builder()
        .settings(EngineSettings {
            max_depth: 16,
            ..EngineSettings::default()
        })
        .creation_rule_fn("knot", |key, resolution| {
            if key.type_id() != TypeId::of::<Knot>() {
                return Ok(None);
            }
            resolution.recipe_for(key).map(Some)
        })
        .build();

    let err = injector.get_recipe(&DependencyKey::of::<Knot>()).unwrap_err();
    assert!(!err.is_circular());
    assert!(matches!(err.kind(), ErrorKind::DepthExceeded { limit: 16, .. }));
}

struct Node;

#[test]
fn binding_reentering_its_own_factory_is_recursive_creation() {
    init_tracing();
    let injector = Injector::builder()
        .bind_type::<Node>(Binding::new("node", |key, resolution| {
            if key.name().is_none() {
                // Bypasses the resolution context, so only the binding's own
                // guard can notice.
                resolution.injector().get_recipe(&DependencyKey::named::<Node>("inner"))?;
            }
            Ok(Recipe::construct::<Node, _>(vec![], |_| Ok(Node)))
        }))
        .build();

    let err = injector.get_recipe(&DependencyKey::of::<Node>()).unwrap_err();
    match err.kind() {
        ErrorKind::RecursiveRecipeCreation { binding } => assert_eq!(binding, "node"),
        other => panic!("Expected RecursiveRecipeCreation, got: {other:?}"),
    }

    // The guard is released: a fresh request for a named key succeeds.
    assert!(injector.get_recipe(&DependencyKey::named::<Node>("other")).is_ok());
}

// ── Error reporting ──

#[derive(Debug)]
struct Database;
#[derive(Debug)]
struct Repository {
    _db: Arc<Database>,
}
struct Missing;

#[test]
fn unresolved_nested_key_carries_trace() {
    init_tracing();
    let injector = Injector::builder()
        .bind_type::<Repository>(needs::<Repository, Missing, _>("repository", DependencyKey::of::<Missing>(), |_| {
            Repository {
                _db: Arc::new(Database),
            }
        }))
        .build();

    let err = injector.get_instance(&DependencyKey::of::<Repository>()).unwrap_err();
    assert!(err.is_unresolved());
    let message = err.to_string();
    assert!(message.contains("Unresolved dependency: Missing"));
    assert!(message.contains("Repository → binding repository → Missing"));
}

#[test]
fn constructor_failure_is_provision_error() {
    init_tracing();
    let injector = Injector::builder()
        .bind_type::<Database>(Binding::to_recipe(
            "database",
            Recipe::construct::<Database, _>(vec![], |_| Err("connection refused".into())),
        ))
        .bind_type::<Repository>(needs::<Repository, Database, _>(
            "repository",
            DependencyKey::of::<Database>(),
            |db| Repository { _db: db },
        ))
        .build();

    let err = injector.get::<Repository>().unwrap_err();
    match err.kind() {
        ErrorKind::Provision { target, .. } => assert_eq!(target, "Database"),
        other => panic!("Expected Provision, got: {other:?}"),
    }
    assert!(err.to_string().contains("Failed to provision Database: connection refused"));
}

struct Unsupported;

impl CustomRecipe for Unsupported {
    fn describe(&self) -> String {
        "native handle".into()
    }

    fn compile(&self, _compiler: &RecipeCompiler) -> std::result::Result<CompiledProducer, BoxError> {
        Err("no compiled form for native handles".into())
    }
}

#[test]
fn custom_step_failure_is_compilation_error() {
    init_tracing();
    let injector = Injector::builder()
        .bind_key(
            DependencyKey::named::<u64>("handle"),
            Binding::to_recipe("native", Recipe::custom(Unsupported)),
        )
        .build();

    let key = DependencyKey::named::<u64>("handle");
    // The recipe itself resolves; only compilation fails.
    assert!(injector.get_recipe(&key).is_ok());

    let err = injector.get_compiled_producer(&key).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Compilation(_)));
    let message = err.to_string();
    assert!(message.contains("native handle"));
    assert!(message.contains("Resolution trace: u64 @handle"));
}

// ── Injection plans ──

struct Mailer {
    transport: Arc<String>,
    signature: Option<Arc<String>>,
}

#[test]
fn plan_rule_builds_scoped_binding_with_members() {
    init_tracing();
    let built = Arc::new(AtomicUsize::new(0));
    let counter = built.clone();
    let plan = InjectionPlan::constructor::<Mailer, _>(vec![DependencyKey::named::<String>("transport")], move |args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Mailer {
            transport: args.get::<String>(0)?,
            signature: None,
        })
    })
    .member::<Mailer, String, _>("signature", DependencyKey::named::<String>("signature"), |mailer, sig| {
        mailer.signature = Some(sig);
    })
    .in_scope(SINGLETON);

    let injector = Injector::builder()
        .bind_key(DependencyKey::named::<String>("transport"), Binding::to_instance("smtp", String::from("smtp")))
        .bind_key(DependencyKey::named::<String>("signature"), Binding::to_instance("sig", String::from("-- ops")))
        .jit_rule(PlanJitRule::new(PlanTable::new().with_plan(plan)))
        .build();

    let a = injector.get::<Mailer>().unwrap();
    let b = injector.get::<Mailer>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert_eq!(a.transport.as_str(), "smtp");
    assert_eq!(a.signature.as_deref().map(String::as_str), Some("-- ops"));
}

// ── Modules ──

struct Greeting;

struct GreetingModule;

impl Module for GreetingModule {
    fn configure(&self, binder: &mut dyn Binder) {
        binder.bind_static(StaticBinding::exact(
            DependencyKey::of::<Greeting>(),
            Binding::to_recipe("greeting", Recipe::construct::<Greeting, _>(vec![], |_| Ok(Greeting))).in_scope("app"),
        ));
        binder.bind_scope("app", Arc::new(Singleton::new()));
    }
}

#[test]
fn installed_module_contributes_bindings_and_scopes() {
    init_tracing();
    let injector = Injector::builder().install(&GreetingModule).build();
    assert!(injector.scopes().get("app").is_some());

    let a = injector.get::<Greeting>().unwrap();
    let b = injector.get::<Greeting>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}
