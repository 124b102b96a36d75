//! frankenrepo - build orchestration for polyglot monorepos

use std::collections::HashSet;
use std::process::ExitCode;

use clap::Parser;
use console::style;

use frankenrepo::cli::{Cli, Commands, GraphFormat, ReportFormat, RunArgs};
use frankenrepo::graph::{DependencyPolicy, EdgeKind};
use frankenrepo::manifest::MANIFEST_FILE;
use frankenrepo::{
    order, report, Config, Executor, ExternalDeps, FrankenError, Manifest, OperationKind, Result,
    Selection, TargetGraph, TargetId, TargetState,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Set up panic handler for nice error messages
    miette::set_panic_hook();

    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        // The report already explains what went wrong
        Err(FrankenError::RunFailed { .. }) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let (config, config_path) = Config::load(cli.config.as_deref())?;
    if let Some(path) = &config_path {
        tracing::debug!(path = %path.display(), "loaded config");
    }

    let manifest = Manifest::load(&cli.working_directory)?;

    if let Some((kind, args)) = cli.command.operation() {
        return run_operation(cli, &config, &manifest, kind, args).await;
    }

    let graph = TargetGraph::build(&manifest, config.settings.dependency_policy)?;
    let order = order::topological_order(&graph)?;

    match &cli.command {
        Commands::Graph { format } => print_graph(&graph, &order, format),
        Commands::Deps { format } => print_deps(&ExternalDeps::collect(&manifest), format),
        Commands::Check => {
            println!(
                "{} {} is valid ({} packages, {} targets)",
                style("✓").green(),
                manifest.root.join(MANIFEST_FILE).display(),
                graph.package_names().count(),
                order.iter().filter(|id| !graph[**id].key.is_aggregate()).count()
            );
            Ok(())
        }
        Commands::Build(_) | Commands::Test(_) | Commands::Format(_) | Commands::Lint(_) => Ok(()),
    }
}

async fn run_operation(
    cli: &Cli,
    config: &Config,
    manifest: &Manifest,
    kind: OperationKind,
    args: &RunArgs,
) -> Result<()> {
    let policy = if args.same_kind_deps {
        DependencyPolicy::SameKind
    } else {
        config.settings.dependency_policy
    };

    let graph = TargetGraph::build(manifest, policy)?;
    let order = order::topological_order(&graph)?;
    let selection = Selection::from_args(&args.packages);

    if args.dry_run {
        let roots = graph.select(kind, &selection)?;
        let selected: HashSet<_> = graph.with_dependencies(&roots);
        report::print_plan(&graph, &order, &selected);
        return Ok(());
    }

    let mut exec_config = args.apply(config.executor_config());
    exec_config.progress = !cli.quiet && matches!(args.format, ReportFormat::Text);

    let executor = Executor::new(exec_config);
    let report = executor.run(&graph, &order, kind, &selection).await?;

    match args.format {
        ReportFormat::Text => report.print(cli.verbose),
        ReportFormat::Json => {
            let json = report
                .to_json()
                .map_err(|e| FrankenError::Io(std::io::Error::other(e)))?;
            println!("{}", json);
        }
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(FrankenError::RunFailed {
            failed: report.count(TargetState::Failed),
            skipped: report.count(TargetState::Skipped),
        })
    }
}

fn print_graph(graph: &TargetGraph, order: &[TargetId], format: &GraphFormat) -> Result<()> {
    match format {
        GraphFormat::Text => {
            println!("{}", style("Target dependency graph:").bold());
            println!();

            for &id in order {
                let mut deps: Vec<String> = graph
                    .direct_dependencies(id)
                    .map(|dep| graph[dep].key.to_string())
                    .collect();
                deps.sort();

                let name = graph[id].key.to_string();
                if deps.is_empty() {
                    println!("  {}", style(name).cyan().bold());
                } else {
                    println!(
                        "  {} {} {}",
                        style(name).cyan().bold(),
                        style("←").dim(),
                        deps.join(", ")
                    );
                }
            }
        }

        GraphFormat::Dot => {
            println!("digraph frankenrepo {{");
            println!("  rankdir=LR;");
            println!("  node [shape=box];");

            for &id in order {
                println!("  \"{}\";", graph[id].key);
            }
            for (from, to, kind) in graph.edges() {
                let attrs = match kind {
                    EdgeKind::Direct => "",
                    EdgeKind::Transitive => " [style=dashed]",
                };
                println!("  \"{}\" -> \"{}\"{};", graph[from].key, graph[to].key, attrs);
            }

            println!("}}");
        }

        GraphFormat::Json => {
            let nodes: Vec<_> = order
                .iter()
                .map(|&id| {
                    let target = &graph[id];
                    serde_json::json!({
                        "id": target.key.to_string(),
                        "package": target.key.package,
                        "kind": target.key.kind,
                        "commands": target.commands,
                    })
                })
                .collect();

            let edges: Vec<_> = graph
                .edges()
                .map(|(from, to, kind)| {
                    serde_json::json!({
                        "from": graph[from].key.to_string(),
                        "to": graph[to].key.to_string(),
                        "transitive": kind == EdgeKind::Transitive,
                    })
                })
                .collect();

            let output = serde_json::json!({
                "nodes": nodes,
                "edges": edges,
            });

            let json = serde_json::to_string_pretty(&output)
                .map_err(|e| FrankenError::Io(std::io::Error::other(e)))?;
            println!("{}", json);
        }
    }

    Ok(())
}

fn print_deps(deps: &ExternalDeps, format: &ReportFormat) -> Result<()> {
    if let ReportFormat::Json = format {
        let json = serde_json::to_string_pretty(deps)
            .map_err(|e| FrankenError::Io(std::io::Error::other(e)))?;
        println!("{}", json);
        return Ok(());
    }

    if deps.is_empty() {
        println!("{}", style("No external dependencies declared").dim());
        return Ok(());
    }

    println!("{}", style("External dependencies:").bold());
    println!();

    let width = deps.iter().map(str::len).max().unwrap_or(0);
    for dep in deps.iter() {
        let declarers: Vec<String> = deps.declared_by(dep).map(|d| d.to_string()).collect();
        println!(
            "  {}{}  {}",
            style(dep).cyan().bold(),
            " ".repeat(width - dep.len()),
            style(declarers.join(", ")).dim()
        );
    }

    Ok(())
}
