//! Wiring a small application graph with Wasfa.
//!
//! Run with `RUST_LOG=wasfa_engine=debug cargo run --example wiring` to see
//! recipes being created, cached and compiled.

use std::sync::Arc;

use wasfa::prelude::*;

// === Application types ===

struct Config {
    database_url: String,
}

struct ConsoleLogger;

impl ConsoleLogger {
    fn log(&self, msg: &str) {
        println!("[LOG] {msg}");
    }
}

struct Database {
    url: String,
    logger: Arc<ConsoleLogger>,
}

impl Database {
    fn query(&self, sql: &str) -> String {
        self.logger.log(&format!("Executing: {sql}"));
        format!("Results from {}", self.url)
    }
}

struct UserRepository {
    db: Arc<Database>,
}

struct UserService {
    repo: Arc<UserRepository>,
    logger: Option<Arc<ConsoleLogger>>,
    /// Audit needs the service back; it gets a handle instead.
    audit: Arc<Audit>,
}

impl UserService {
    fn get_user(&self, id: u64) -> String {
        if let Some(logger) = &self.logger {
            logger.log(&format!("Getting user {id}"));
        }
        self.repo.db.query(&format!("SELECT * FROM users WHERE id = {id}"))
    }
}

struct Audit {
    service: Arc<DeferredHandle>,
}

fn plans() -> PlanTable {
    PlanTable::new()
        .with_plan(
            InjectionPlan::constructor::<Database, _>(
                vec![DependencyKey::of::<Config>(), DependencyKey::of::<ConsoleLogger>()],
                |args| {
                    Ok(Database {
                        url: args.get::<Config>(0)?.database_url.clone(),
                        logger: args.get::<ConsoleLogger>(1)?,
                    })
                },
            )
            .in_scope(SINGLETON),
        )
        .with_plan(InjectionPlan::constructor::<UserRepository, _>(
            vec![DependencyKey::of::<Database>()],
            |args| Ok(UserRepository { db: args.get::<Database>(0)? }),
        ))
        .with_plan(InjectionPlan::constructor::<Audit, _>(
            vec![DependencyKey::deferred(DependencyKey::of::<UserService>())],
            |args| Ok(Audit { service: args.get::<DeferredHandle>(0)? }),
        ))
        .with_plan(
            InjectionPlan::constructor::<UserService, _>(
                vec![DependencyKey::of::<UserRepository>(), DependencyKey::of::<Audit>()],
                |args| {
                    Ok(UserService {
                        repo: args.get::<UserRepository>(0)?,
                        logger: None,
                        audit: args.get::<Audit>(1)?,
                    })
                },
            )
            .member::<UserService, ConsoleLogger, _>("logger", DependencyKey::of::<ConsoleLogger>(), |service, logger| {
                service.logger = Some(logger);
            }),
        )
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let injector = Injector::builder()
        .bind_type::<Config>(Binding::to_instance(
            "config",
            Config {
                database_url: "postgres://localhost/myapp".to_string(),
            },
        ))
        .bind_type::<ConsoleLogger>(
            Binding::to_recipe("console logger", Recipe::construct::<ConsoleLogger, _>(vec![], |_| Ok(ConsoleLogger)))
                .in_scope(SINGLETON),
        )
        .jit_rule(PlanJitRule::new(plans()))
        .build();

    let service = injector.get::<UserService>()?;
    println!("{}", service.get_user(42));

    // The audit trail reaches the service through its deferred handle.
    let via_audit = service.audit.service.get::<UserService>()?;
    println!("{}", via_audit.get_user(7));

    let recipe = injector.get_recipe(&DependencyKey::of::<UserService>())?;
    println!("Recipe: {}", recipe.describe());
    println!("{injector:?}");

    match injector.get::<String>() {
        Ok(_) => println!("unexpected"),
        Err(e) => println!("\nExpected failure:\n{e}"),
    }

    Ok(())
}
