//! frankenrepo - build orchestration for polyglot monorepos
//!
//! This crate provides both a CLI tool and a library. A repository describes
//! its packages in a `frankenfest.toml` manifest; every package declares the
//! commands for each operation (build, test, format, lint) and the internal
//! packages it depends on.
//!
//! # Features
//!
//! - **Target graph** - One node per package and operation, with transitive
//!   dependency edges resolved up front
//! - **Deterministic ordering** - Dependencies first, ties broken by name
//! - **Parallel execution** - A bounded worker pool runs independent targets
//!   concurrently
//! - **Failure policies** - Fail fast or keep going, with dependents of a
//!   failed target skipped
//!
//! # Example
//!
//! ```toml
//! # frankenfest.toml
//! version = 1
//!
//! [[packages]]
//! name = "core"
//! path = "core"
//! build = ["make"]
//! test = ["make test"]
//!
//! [[packages]]
//! name = "api"
//! path = "api"
//! internal_deps = ["core"]
//! build = ["cargo build"]
//! test = ["cargo test"]
//! ```
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use frankenrepo::{order, Executor, ExecutorConfig, Manifest, OperationKind, Selection, TargetGraph};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manifest = Manifest::load(std::path::Path::new("."))?;
//!     let graph = TargetGraph::from_manifest(&manifest)?;
//!     let order = order::topological_order(&graph)?;
//!
//!     let executor = Executor::new(ExecutorConfig::default());
//!     let report = executor
//!         .run(&graph, &order, OperationKind::Test, &Selection::All)
//!         .await?;
//!     assert!(report.is_success());
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod manifest;
pub mod order;
pub mod registry;
pub mod report;

// Re-export main types
pub use config::Config;
pub use error::{FrankenError, Result};
pub use executor::{Executor, ExecutorConfig, FailurePolicy, OutputMode};
pub use graph::{DependencyPolicy, Selection, Target, TargetGraph, TargetId, TargetKey};
pub use manifest::{Manifest, OperationKind, Package};
pub use registry::ExternalDeps;
pub use report::{Report, TargetReport, TargetState};
