//! Error types for frankenrepo
//!
//! Uses `miette` for pretty error reporting with source spans and help text.
//! Every variant except `CommandFailed`/`CommandNotFound` is raised before a
//! single command runs.

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::path::PathBuf;
use thiserror::Error;

use crate::manifest::OperationKind;

/// Main error type for frankenrepo operations
#[derive(Error, Diagnostic, Debug)]
pub enum FrankenError {
    #[error("Manifest not found at {}", .path.display())]
    #[diagnostic(
        code(frankenrepo::manifest::not_found),
        help("Create a frankenfest.toml in the repository root, or point -C at it")
    )]
    ManifestNotFound { path: PathBuf },

    #[error("Failed to read manifest {}", .path.display())]
    #[diagnostic(code(frankenrepo::manifest::read))]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest {}: {message}", .path.display())]
    #[diagnostic(code(frankenrepo::manifest::parse))]
    ManifestParse {
        path: PathBuf,
        message: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: Option<SourceSpan>,
    },

    #[error("Invalid manifest {}: {reason}", .path.display())]
    #[diagnostic(code(frankenrepo::manifest::invalid))]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(frankenrepo::config::not_found),
        help("Drop the --config flag to fall back to ~/.config/frankenrepo/frankenrepo.toml")
    )]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Failed to parse configuration {}", .path.display())]
    #[diagnostic(code(frankenrepo::config::parse))]
    ConfigParse {
        #[source]
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Package '{name}' not found")]
    #[diagnostic(
        code(frankenrepo::package::not_found),
        help("Run `frankenrepo graph` to see available targets")
    )]
    UnknownPackage { name: String, available: Vec<String> },

    #[error("Package '{package}' depends on unknown package '{missing}'")]
    #[diagnostic(
        code(frankenrepo::graph::dangling),
        help("Check the 'internal_deps' field of the referencing package")
    )]
    DanglingDependency { package: String, missing: String },

    #[error("Package '{package}' depends on '{dependency}', which has no {kind} commands")]
    #[diagnostic(
        code(frankenrepo::graph::missing_target),
        help("Every internal dependency needs a build command list")
    )]
    MissingDependencyTarget {
        package: String,
        dependency: String,
        kind: OperationKind,
    },

    #[error("Package '{package}' has no {kind} commands")]
    #[diagnostic(code(frankenrepo::graph::no_target))]
    NoTarget { package: String, kind: OperationKind },

    #[error("Circular dependency detected: {}", format_cycle(.cycle))]
    #[diagnostic(
        code(frankenrepo::graph::cycle),
        help("Check the 'internal_deps' field in your package definitions")
    )]
    /// Packages (or targets) along the cycle, first entry repeated at the end
    CyclicDependency { cycle: Vec<String> },

    #[error("Command '{command}' failed with exit code {code}")]
    #[diagnostic(code(frankenrepo::exec::failed))]
    CommandFailed {
        command: String,
        code: i32,
        #[help]
        stderr: Option<String>,
    },

    #[error("Command not found: {command}")]
    #[diagnostic(
        code(frankenrepo::exec::command_not_found),
        help("Ensure the command is installed and in your PATH")
    )]
    CommandNotFound { command: String },

    #[error("Invalid command '{command}'")]
    #[diagnostic(code(frankenrepo::exec::invalid_command))]
    InvalidCommand { command: String },

    #[error("{failed} target(s) failed, {skipped} skipped")]
    #[diagnostic(code(frankenrepo::exec::run_failed))]
    RunFailed { failed: usize, skipped: usize },

    #[error("I/O error")]
    #[diagnostic(code(frankenrepo::io))]
    Io(#[from] std::io::Error),
}

fn format_cycle(cycle: &[String]) -> String {
    cycle.join(" -> ")
}

/// Result type alias for frankenrepo operations
pub type Result<T> = std::result::Result<T, FrankenError>;
