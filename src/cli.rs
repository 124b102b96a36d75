//! CLI command definitions and handling
//!
//! Uses `clap` derive API for argument parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::executor::{ExecutorConfig, FailurePolicy, OutputMode};
use crate::manifest::OperationKind;

/// frankenrepo - language-agnostic build orchestration for monorepos
#[derive(Parser, Debug)]
#[command(name = "frankenrepo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a frankenrepo.toml config file
    #[arg(long, global = true, env = "FRANKENREPO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run as if started in this directory
    #[arg(
        short = 'C',
        long = "working-directory",
        global = true,
        default_value = ".",
        env = "FRANKENREPO_WORKING_DIRECTORY"
    )]
    pub working_directory: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress progress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run build on package(s)
    Build(RunArgs),

    /// Run test on package(s)
    Test(RunArgs),

    /// Run format on package(s)
    Format(RunArgs),

    /// Run lint on package(s)
    Lint(RunArgs),

    /// Show the target dependency graph
    Graph {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: GraphFormat,
    },

    /// List external dependencies declared in the manifest
    Deps {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: ReportFormat,
    },

    /// Validate frankenfest.toml
    Check,
}

/// Flags shared by every operation command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Packages to run (all if none given)
    pub packages: Vec<String>,

    /// Number of parallel targets (0 = auto)
    #[arg(short, long, env = "FRANKENREPO_JOBS")]
    pub jobs: Option<usize>,

    /// Keep running independent targets after a failure
    #[arg(short, long, conflicts_with = "fail_fast")]
    pub keep_going: bool,

    /// Stop starting new targets after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Cancel the run after this many seconds
    #[arg(long, env = "FRANKENREPO_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Run commands through `sh -c`
    #[arg(long)]
    pub shell: bool,

    /// Stream command output instead of capturing it
    #[arg(long)]
    pub stream: bool,

    /// Targets also wait for their dependencies' targets of the same operation
    #[arg(long)]
    pub same_kind_deps: bool,

    /// Show execution plan without running
    #[arg(long)]
    pub dry_run: bool,

    /// Report format
    #[arg(short, long, default_value = "text")]
    pub format: ReportFormat,
}

impl RunArgs {
    /// Apply these flags on top of the configured defaults
    pub fn apply(&self, mut config: ExecutorConfig) -> ExecutorConfig {
        if let Some(jobs) = self.jobs {
            config.parallelism = jobs;
        }
        if self.keep_going {
            config.failure_policy = FailurePolicy::Continue;
        }
        if self.fail_fast {
            config.failure_policy = FailurePolicy::FailFast;
        }
        if let Some(secs) = self.timeout {
            config.timeout = Some(std::time::Duration::from_secs(secs));
        }
        if self.shell {
            config.shell = true;
        }
        if self.stream {
            config.output = OutputMode::Stream;
        }
        config
    }
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum GraphFormat {
    #[default]
    Text,
    Dot,
    Json,
}

impl Commands {
    /// The operation and its flags, for the commands that run targets
    pub fn operation(&self) -> Option<(OperationKind, &RunArgs)> {
        match self {
            Commands::Build(args) => Some((OperationKind::Build, args)),
            Commands::Test(args) => Some((OperationKind::Test, args)),
            Commands::Format(args) => Some((OperationKind::Format, args)),
            Commands::Lint(args) => Some((OperationKind::Lint, args)),
            Commands::Graph { .. } | Commands::Deps { .. } | Commands::Check => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_test_command() {
        let cli = Cli::try_parse_from(["frankenrepo", "-C", "repo", "test", "api", "core", "-j", "2"])
            .unwrap();

        assert_eq!(cli.working_directory, PathBuf::from("repo"));
        let (kind, args) = cli.command.operation().unwrap();
        assert_eq!(kind, OperationKind::Test);
        assert_eq!(args.packages, vec!["api", "core"]);
        assert_eq!(args.jobs, Some(2));
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "frankenrepo",
            "build",
            "--keep-going",
            "--timeout",
            "30",
            "--stream",
        ])
        .unwrap();
        let (_, args) = cli.command.operation().unwrap();

        let config = args.apply(ExecutorConfig {
            parallelism: 8,
            ..Default::default()
        });
        assert_eq!(config.parallelism, 8);
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.output, OutputMode::Stream);
    }

    #[test]
    fn test_keep_going_conflicts_with_fail_fast() {
        let result = Cli::try_parse_from(["frankenrepo", "build", "--keep-going", "--fail-fast"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_deps_format() {
        let cli = Cli::try_parse_from(["frankenrepo", "deps", "--format", "json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Deps {
                format: ReportFormat::Json
            }
        ));
    }

    #[test]
    fn test_graph_is_not_an_operation() {
        let cli = Cli::try_parse_from(["frankenrepo", "graph", "--format", "dot"]).unwrap();
        assert!(cli.command.operation().is_none());
    }
}
