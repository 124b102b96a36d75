//! Target graph construction and dependency resolution
//!
//! Uses petgraph as a flat arena of targets: edges are node indices and go
//! from a dependency TO its dependent, so "depended by" is just the outgoing
//! neighbour set and never separately owned.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef, Reversed};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::ops::Index;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{FrankenError, Result};
use crate::manifest::{Manifest, OperationKind, Package};
use crate::order;

/// Index of a target inside a [`TargetGraph`]
pub type TargetId = NodeIndex;

/// Identity of a target: a package (or the aggregate) plus an operation.
///
/// `package == None` marks the synthetic "all-<operation>" aggregate.
/// Keys order by package name then operation, with aggregates after every
/// package target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TargetKey {
    pub package: Option<String>,
    pub kind: OperationKind,
}

impl TargetKey {
    pub fn package(name: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            package: Some(name.into()),
            kind,
        }
    }

    pub fn aggregate(kind: OperationKind) -> Self {
        Self {
            package: None,
            kind,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.package.is_none()
    }
}

impl Ord for TargetKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.is_aggregate()
            .cmp(&other.is_aggregate())
            .then_with(|| self.package.cmp(&other.package))
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

impl PartialOrd for TargetKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.package {
            Some(name) => write!(f, "{}:{}", name, self.kind),
            None => write!(f, "all-{}", self.kind),
        }
    }
}

/// A node in the target graph
#[derive(Debug, Clone)]
pub struct Target {
    pub key: TargetKey,
    /// Resolved working directory (`<root>/<package.path>`)
    pub workdir: PathBuf,
    /// Commands in execution order; empty for aggregates
    pub commands: Vec<String>,
}

/// How an edge came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Declared in `internal_deps`, a package's own build, or an aggregate member
    Direct,
    /// Reached by following internal dependencies of dependencies
    Transitive,
}

/// Which targets of a dependency a package's targets wait for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyPolicy {
    /// Every target waits for the build targets of its dependencies
    #[default]
    BuildOnly,
    /// Additionally wait for the dependencies' targets of the same operation
    SameKind,
}

/// Which packages the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Packages(Vec<String>),
}

impl Selection {
    /// No package names (or the literal `all`) means everything
    pub fn from_args(args: &[String]) -> Self {
        if args.is_empty() || (args.len() == 1 && args[0] == "all") {
            Selection::All
        } else {
            Selection::Packages(args.to_vec())
        }
    }
}

/// The target dependency graph
#[derive(Debug)]
pub struct TargetGraph {
    graph: DiGraph<Target, EdgeKind>,
    key_to_index: HashMap<TargetKey, NodeIndex>,
    packages: BTreeSet<String>,
}

impl TargetGraph {
    /// Build a target graph using the default dependency policy
    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        Self::build(manifest, DependencyPolicy::default())
    }

    /// Build a target graph from a manifest
    pub fn build(manifest: &Manifest, policy: DependencyPolicy) -> Result<Self> {
        let by_name: HashMap<&str, &Package> = manifest
            .packages
            .iter()
            .map(|pkg| (pkg.name.as_str(), pkg))
            .collect();

        for pkg in &manifest.packages {
            if let Some(missing) = pkg
                .internal_deps
                .iter()
                .find(|dep| !by_name.contains_key(dep.as_str()))
            {
                return Err(FrankenError::DanglingDependency {
                    package: pkg.name.clone(),
                    missing: missing.clone(),
                });
            }
        }

        // Package-level check first, so the reported cycle names every package
        // even when some of them have no build commands.
        let mut names: Vec<&str> = by_name.keys().copied().collect();
        names.sort_unstable();
        if let Some(cycle) = order::find_cycle(&names, |name| {
            let mut deps: Vec<&str> = by_name[name]
                .internal_deps
                .iter()
                .map(String::as_str)
                .collect();
            deps.sort_unstable();
            deps
        }) {
            return Err(FrankenError::CyclicDependency {
                cycle: cycle.into_iter().map(str::to_string).collect(),
            });
        }

        let mut graph = DiGraph::new();
        let mut key_to_index = HashMap::new();

        // Add one node per package and non-empty operation
        for pkg in &manifest.packages {
            for kind in OperationKind::ALL {
                if !pkg.has_commands(kind) {
                    continue;
                }
                let key = TargetKey::package(&pkg.name, kind);
                let idx = graph.add_node(Target {
                    key: key.clone(),
                    workdir: manifest.root.join(&pkg.path),
                    commands: pkg.commands(kind).to_vec(),
                });
                key_to_index.insert(key, idx);
            }
        }

        // Add dependency edges
        let mut closures = HashMap::new();
        for pkg in &manifest.packages {
            let closure = resolve_closure(&pkg.name, &by_name, &mut closures);

            for kind in OperationKind::ALL {
                let Some(&target_idx) = key_to_index.get(&TargetKey::package(&pkg.name, kind))
                else {
                    continue;
                };

                if kind != OperationKind::Build {
                    let own_build = TargetKey::package(&pkg.name, OperationKind::Build);
                    if let Some(&build_idx) = key_to_index.get(&own_build) {
                        graph.update_edge(build_idx, target_idx, EdgeKind::Direct);
                    }
                }

                for &dep in &closure {
                    let edge = if pkg.internal_deps.iter().any(|d| d == dep) {
                        EdgeKind::Direct
                    } else {
                        EdgeKind::Transitive
                    };

                    let dep_build = key_to_index
                        .get(&TargetKey::package(dep, OperationKind::Build))
                        .ok_or_else(|| FrankenError::MissingDependencyTarget {
                            package: pkg.name.clone(),
                            dependency: dep.to_string(),
                            kind: OperationKind::Build,
                        })?;
                    graph.update_edge(*dep_build, target_idx, edge);

                    if policy == DependencyPolicy::SameKind && kind != OperationKind::Build {
                        if let Some(&dep_same) = key_to_index.get(&TargetKey::package(dep, kind)) {
                            graph.update_edge(dep_same, target_idx, edge);
                        }
                    }
                }
            }
        }

        // One aggregate per operation present in the manifest
        for kind in OperationKind::ALL {
            let members: Vec<NodeIndex> = graph
                .node_indices()
                .filter(|&idx| graph[idx].key.kind == kind && !graph[idx].key.is_aggregate())
                .collect();
            if members.is_empty() {
                continue;
            }

            let key = TargetKey::aggregate(kind);
            let agg_idx = graph.add_node(Target {
                key: key.clone(),
                workdir: manifest.root.clone(),
                commands: Vec::new(),
            });
            for member in members {
                graph.add_edge(member, agg_idx, EdgeKind::Direct);
            }
            key_to_index.insert(key, agg_idx);
        }

        debug!(
            targets = graph.node_count(),
            edges = graph.edge_count(),
            ?policy,
            "built target graph"
        );

        Ok(Self {
            graph,
            key_to_index,
            packages: by_name.keys().map(|name| name.to_string()).collect(),
        })
    }

    /// Resolve a selection into the targets that were explicitly asked for
    pub fn select(&self, kind: OperationKind, selection: &Selection) -> Result<Vec<TargetId>> {
        match selection {
            Selection::All => Ok(self.find(&TargetKey::aggregate(kind)).into_iter().collect()),
            Selection::Packages(names) => names
                .iter()
                .map(|name| {
                    if !self.packages.contains(name) {
                        return Err(FrankenError::UnknownPackage {
                            name: name.clone(),
                            available: self.packages.iter().cloned().collect(),
                        });
                    }
                    self.find(&TargetKey::package(name, kind))
                        .ok_or_else(|| FrankenError::NoTarget {
                            package: name.clone(),
                            kind,
                        })
                })
                .collect(),
        }
    }

    /// The given targets plus everything they transitively depend on
    pub fn with_dependencies(&self, roots: &[TargetId]) -> HashSet<TargetId> {
        let reversed = Reversed(&self.graph);
        let mut required = HashSet::new();

        for &root in roots {
            if required.contains(&root) {
                continue;
            }
            let mut bfs = Bfs::new(&reversed, root);
            while let Some(node) = bfs.next(&reversed) {
                required.insert(node);
            }
        }

        required
    }

    /// Look up a target by identity
    pub fn find(&self, key: &TargetKey) -> Option<TargetId> {
        self.key_to_index.get(key).copied()
    }

    /// Get a target by index
    pub fn target(&self, id: TargetId) -> &Target {
        &self.graph[id]
    }

    /// All target indices, in insertion order
    pub fn target_ids(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.graph.node_indices()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Names of every package in the manifest, sorted
    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }

    /// Everything this target waits for (direct and transitive)
    pub fn dependencies(&self, id: TargetId) -> impl Iterator<Item = TargetId> + '_ {
        self.graph.neighbors_directed(id, Direction::Incoming)
    }

    /// Targets that wait for this one
    pub fn dependents(&self, id: TargetId) -> impl Iterator<Item = TargetId> + '_ {
        self.graph.neighbors_directed(id, Direction::Outgoing)
    }

    /// Dependencies reached through a direct edge only
    pub fn direct_dependencies(&self, id: TargetId) -> impl Iterator<Item = TargetId> + '_ {
        self.graph
            .edges_directed(id, Direction::Incoming)
            .filter(|edge| *edge.weight() == EdgeKind::Direct)
            .map(|edge| edge.source())
    }

    /// Every edge as `(dependency, dependent, kind)`
    pub fn edges(&self) -> impl Iterator<Item = (TargetId, TargetId, EdgeKind)> + '_ {
        self.graph
            .edge_references()
            .map(|edge| (edge.source(), edge.target(), *edge.weight()))
    }
}

impl Index<TargetId> for TargetGraph {
    type Output = Target;

    fn index(&self, id: TargetId) -> &Target {
        &self.graph[id]
    }
}

/// Every package reachable through `internal_deps`, excluding the package
/// itself. Results are memoized so shared dependencies resolve once.
fn resolve_closure<'m>(
    name: &'m str,
    by_name: &HashMap<&'m str, &'m Package>,
    memo: &mut HashMap<&'m str, BTreeSet<&'m str>>,
) -> BTreeSet<&'m str> {
    if let Some(done) = memo.get(name) {
        return done.clone();
    }

    let mut closure = BTreeSet::new();
    let mut visited = HashSet::from([name]);
    let mut stack: Vec<&'m str> = by_name
        .get(name)
        .map(|pkg| pkg.internal_deps.iter().map(String::as_str).collect())
        .unwrap_or_default();

    while let Some(dep) = stack.pop() {
        if !visited.insert(dep) {
            continue;
        }
        closure.insert(dep);

        if let Some(known) = memo.get(dep) {
            closure.extend(known.iter().copied());
        } else if let Some(pkg) = by_name.get(dep) {
            stack.extend(pkg.internal_deps.iter().map(String::as_str));
        }
    }

    closure.remove(name);
    memo.insert(name, closure.clone());
    closure
}
