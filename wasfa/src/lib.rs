//! # Wasfa: a recipe-compiling dependency resolution runtime
//!
//! Dependencies are described by [`DependencyKey`]s. The [`Injector`]
//! turns each key into a recipe (a tree mirroring the key's dependency
//! graph), compiles the recipe once into a tree of closures, and invokes
//! that compiled producer on every request.
//!
//! ```
//! use std::sync::Arc;
//! use wasfa::prelude::*;
//!
//! struct Clock;
//!
//! let injector = Injector::builder()
//!     .bind_type::<Clock>(Binding::to_recipe("clock", Recipe::construct::<Clock, _>(vec![], |_| Ok(Clock))).in_scope(SINGLETON))
//!     .build();
//!
//! let a = injector.get::<Clock>().unwrap();
//! let b = injector.get::<Clock>().unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! ```

pub use wasfa_engine::*;
pub use wasfa_support as support;
