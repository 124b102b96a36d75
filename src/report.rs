//! Run reports and their terminal rendering

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;

use crate::graph::{TargetGraph, TargetId, TargetKey};
use crate::manifest::OperationKind;
use crate::order;

/// Lifecycle of a target during one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TargetState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TargetState::Succeeded | TargetState::Failed | TargetState::Skipped
        )
    }
}

/// Why a target never ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum SkipReason {
    /// A target it depends on failed (directly or further upstream)
    DependencyFailed { dependency: TargetKey },
    /// The run was cancelled by fail-fast or the timeout before it started
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DependencyFailed { dependency } => {
                write!(f, "dependency {} failed", dependency)
            }
            SkipReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Result of a single target
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: TargetKey,
    pub state: TargetState,
    pub duration: Duration,
    /// Exit status of the last command that ran
    pub exit_code: Option<i32>,
    /// Captured stdout/stderr of every command that ran
    pub output: Option<String>,
    pub error: Option<String>,
    pub skip_reason: Option<SkipReason>,
}

impl TargetReport {
    pub fn skipped(target: TargetKey, reason: SkipReason) -> Self {
        Self {
            target,
            state: TargetState::Skipped,
            duration: Duration::ZERO,
            exit_code: None,
            output: None,
            error: None,
            skip_reason: Some(reason),
        }
    }
}

/// Everything the scheduler attempted during one run, in execution order
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub operation: OperationKind,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub targets: Vec<TargetReport>,
}

impl Report {
    /// True when every attempted target succeeded
    pub fn is_success(&self) -> bool {
        self.targets
            .iter()
            .all(|t| t.state == TargetState::Succeeded)
    }

    pub fn get(&self, key: &TargetKey) -> Option<&TargetReport> {
        self.targets.iter().find(|t| &t.target == key)
    }

    pub fn state_of(&self, key: &TargetKey) -> Option<TargetState> {
        self.get(key).map(|t| t.state)
    }

    pub fn count(&self, state: TargetState) -> usize {
        self.targets.iter().filter(|t| t.state == state).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Print one line per target followed by a summary
    pub fn print(&self, verbose: bool) {
        for target in &self.targets {
            print_target(target, verbose);
        }
        self.print_summary();
    }

    fn print_summary(&self) {
        println!();

        let succeeded = self.count(TargetState::Succeeded);
        let failed = self.count(TargetState::Failed);
        let skipped = self.count(TargetState::Skipped);

        if self.is_success() {
            println!(
                "{} {} {} targets completed in {:.2}s",
                style("✓").green().bold(),
                succeeded,
                self.operation,
                self.duration.as_secs_f64()
            );
        } else {
            println!(
                "{} {} succeeded, {} failed, {} skipped in {:.2}s",
                style("✗").red().bold(),
                succeeded,
                failed,
                skipped,
                self.duration.as_secs_f64()
            );
        }
    }
}

fn print_target(result: &TargetReport, verbose: bool) {
    let status = match result.state {
        TargetState::Succeeded => style("✓").green(),
        TargetState::Failed => style("✗").red(),
        TargetState::Skipped => style("-").yellow(),
        TargetState::Pending | TargetState::Running => style("?").dim(),
    };

    let detail = match &result.skip_reason {
        Some(reason) => format!("skipped: {}", reason),
        None => format!("{:.2}s", result.duration.as_secs_f64()),
    };

    println!(
        "{} {} {}",
        status,
        style(result.target.to_string()).bold(),
        style(detail).dim()
    );

    if let Some(error) = &result.error {
        eprintln!("  {}", style(error).red());
    }

    let show_output = verbose || result.state == TargetState::Failed;
    if let Some(output) = result.output.as_deref().filter(|o| show_output && !o.is_empty()) {
        for line in output.lines() {
            eprintln!("  {} {}", style("│").dim(), line);
        }
    }
}

/// Print the staged plan for `--dry-run`
pub fn print_plan(graph: &TargetGraph, order: &[TargetId], selected: &HashSet<TargetId>) {
    println!("{}", style("Execution plan (dry run):").bold().cyan());
    println!();

    let stages = order::stages(graph, order, selected);
    let mut number = 0;
    for stage in &stages {
        let targets: Vec<_> = stage
            .iter()
            .map(|id| &graph[*id])
            .filter(|t| !t.key.is_aggregate())
            .collect();
        if targets.is_empty() {
            continue;
        }
        number += 1;

        let parallel_note = if targets.len() > 1 { " (parallel)" } else { "" };
        println!(
            "{} {}{}",
            style(format!("Stage {}:", number)).bold(),
            targets
                .iter()
                .map(|t| t.key.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            style(parallel_note).dim()
        );

        for target in targets {
            for cmd in &target.commands {
                println!("    {} {}", style("→").dim(), cmd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, state: TargetState) -> TargetReport {
        TargetReport {
            target: TargetKey::package(name, OperationKind::Build),
            state,
            duration: Duration::from_millis(5),
            exit_code: Some(0),
            output: None,
            error: None,
            skip_reason: None,
        }
    }

    fn report(targets: Vec<TargetReport>) -> Report {
        Report {
            operation: OperationKind::Build,
            started_at: Utc::now(),
            duration: Duration::from_millis(10),
            targets,
        }
    }

    #[test]
    fn test_success_requires_every_target_to_succeed() {
        assert!(report(vec![entry("a", TargetState::Succeeded)]).is_success());
        assert!(!report(vec![
            entry("a", TargetState::Succeeded),
            TargetReport::skipped(
                TargetKey::package("b", OperationKind::Build),
                SkipReason::Cancelled
            ),
        ])
        .is_success());
        assert!(report(Vec::new()).is_success());
    }

    #[test]
    fn test_lookup_and_counts() {
        let report = report(vec![
            entry("a", TargetState::Failed),
            TargetReport::skipped(
                TargetKey::package("b", OperationKind::Build),
                SkipReason::DependencyFailed {
                    dependency: TargetKey::package("a", OperationKind::Build),
                },
            ),
        ]);

        assert_eq!(
            report.state_of(&TargetKey::package("b", OperationKind::Build)),
            Some(TargetState::Skipped)
        );
        assert_eq!(report.count(TargetState::Failed), 1);
        assert_eq!(report.count(TargetState::Succeeded), 0);
        assert!(report
            .state_of(&TargetKey::package("c", OperationKind::Build))
            .is_none());
    }

    #[test]
    fn test_json_rendering() {
        let report = report(vec![TargetReport::skipped(
            TargetKey::package("b", OperationKind::Build),
            SkipReason::DependencyFailed {
                dependency: TargetKey::package("a", OperationKind::Build),
            },
        )]);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["operation"], "build");
        assert_eq!(json["targets"][0]["state"], "skipped");
        assert_eq!(json["targets"][0]["skip_reason"]["reason"], "dependency-failed");
        assert_eq!(
            json["targets"][0]["skip_reason"]["dependency"]["package"],
            "a"
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TargetState::Pending.is_terminal());
        assert!(!TargetState::Running.is_terminal());
        assert!(TargetState::Succeeded.is_terminal());
        assert!(TargetState::Failed.is_terminal());
        assert!(TargetState::Skipped.is_terminal());
    }

    #[test]
    fn test_skip_reason_display() {
        let reason = SkipReason::DependencyFailed {
            dependency: TargetKey::package("core", OperationKind::Build),
        };
        assert_eq!(reason.to_string(), "dependency core:build failed");
        assert_eq!(SkipReason::Cancelled.to_string(), "cancelled");
    }
}
