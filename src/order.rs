//! Cycle detection and deterministic topological ordering

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;

use tracing::debug;

use crate::error::{FrankenError, Result};
use crate::graph::{TargetGraph, TargetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Three-colour depth-first search over `nodes`.
///
/// Returns the first cycle found as a closed path (`[a, b, a]`), or `None`
/// when the graph is acyclic. Nodes are visited in the order given and
/// successors in the order `successors` yields them.
pub fn find_cycle<N, F, I>(nodes: &[N], mut successors: F) -> Option<Vec<N>>
where
    N: Copy + Eq + Hash,
    F: FnMut(N) -> I,
    I: IntoIterator<Item = N>,
{
    let mut marks = HashMap::new();
    let mut path = Vec::new();

    for &node in nodes {
        if marks.contains_key(&node) {
            continue;
        }
        if let Some(cycle) = visit(node, &mut successors, &mut marks, &mut path) {
            return Some(cycle);
        }
    }

    None
}

fn visit<N, F, I>(
    node: N,
    successors: &mut F,
    marks: &mut HashMap<N, Mark>,
    path: &mut Vec<N>,
) -> Option<Vec<N>>
where
    N: Copy + Eq + Hash,
    F: FnMut(N) -> I,
    I: IntoIterator<Item = N>,
{
    marks.insert(node, Mark::InProgress);
    path.push(node);

    let next_nodes: Vec<N> = successors(node).into_iter().collect();
    for next in next_nodes {
        match marks.get(&next) {
            Some(Mark::InProgress) => {
                // In-progress nodes are exactly the current path
                let start = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            Some(Mark::Done) => {}
            None => {
                if let Some(cycle) = visit(next, successors, marks, path) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    marks.insert(node, Mark::Done);
    None
}

/// Validate the whole graph and compute a deterministic execution order.
///
/// Every target appears after everything it depends on. Among targets that
/// are ready at the same time, the smallest key (package name, then
/// operation) goes first.
pub fn topological_order(graph: &TargetGraph) -> Result<Vec<TargetId>> {
    let mut roots: Vec<TargetId> = graph.target_ids().collect();
    roots.sort_by(|a, b| graph[*a].key.cmp(&graph[*b].key));

    if let Some(cycle) = find_cycle(&roots, |id| {
        let mut deps: Vec<TargetId> = graph.direct_dependencies(id).collect();
        deps.sort_by(|a, b| graph[*a].key.cmp(&graph[*b].key));
        deps
    }) {
        return Err(FrankenError::CyclicDependency {
            cycle: cycle.into_iter().map(|id| graph[id].key.to_string()).collect(),
        });
    }

    let mut waiting: HashMap<TargetId, usize> = graph
        .target_ids()
        .map(|id| (id, graph.dependencies(id).count()))
        .collect();

    let mut ready = BTreeMap::new();
    for (&id, &count) in &waiting {
        if count == 0 {
            ready.insert(&graph[id].key, id);
        }
    }

    let mut order = Vec::with_capacity(graph.len());
    while let Some((_, id)) = ready.pop_first() {
        order.push(id);
        for dependent in graph.dependents(id) {
            if let Some(count) = waiting.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(&graph[dependent].key, dependent);
                }
            }
        }
    }

    if order.len() != graph.len() {
        // Only reachable if transitive edges disagree with direct ones
        let placed: HashSet<TargetId> = order.iter().copied().collect();
        let mut unplaced: Vec<_> = graph
            .target_ids()
            .filter(|id| !placed.contains(id))
            .map(|id| &graph[id].key)
            .collect();
        unplaced.sort();
        let cycle = unplaced.into_iter().map(ToString::to_string).collect();
        return Err(FrankenError::CyclicDependency { cycle });
    }

    debug!(targets = order.len(), "computed execution order");
    Ok(order)
}

/// Group the selected targets into stages: each stage only depends on
/// earlier ones, so the targets inside a stage may run concurrently.
pub fn stages(
    graph: &TargetGraph,
    order: &[TargetId],
    selected: &HashSet<TargetId>,
) -> Vec<Vec<TargetId>> {
    let mut depth: HashMap<TargetId, usize> = HashMap::new();
    let mut stages: Vec<Vec<TargetId>> = Vec::new();

    for &id in order.iter().filter(|id| selected.contains(id)) {
        let stage = graph
            .dependencies(id)
            .filter_map(|dep| depth.get(&dep))
            .map(|d| d + 1)
            .max()
            .unwrap_or(0);
        depth.insert(id, stage);

        while stages.len() <= stage {
            stages.push(Vec::new());
        }
        stages[stage].push(id);
    }

    stages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TargetKey;
    use crate::manifest::{Manifest, OperationKind};
    use std::path::Path;

    fn graph(toml: &str) -> TargetGraph {
        let manifest = Manifest::parse(toml, Path::new("frankenfest.toml")).unwrap();
        TargetGraph::from_manifest(&manifest).unwrap()
    }

    fn diamond() -> TargetGraph {
        graph(
            r#"
            version = 1

            [[packages]]
            name = "a"
            path = "a"
            internal_deps = ["b", "c"]
            build = ["make a"]
            test = ["test a"]

            [[packages]]
            name = "b"
            path = "b"
            internal_deps = ["d"]
            build = ["make b"]

            [[packages]]
            name = "c"
            path = "c"
            internal_deps = ["d"]
            build = ["make c"]

            [[packages]]
            name = "d"
            path = "d"
            build = ["make d"]
            lint = ["lint d"]
        "#,
        )
    }

    fn names(graph: &TargetGraph, order: &[TargetId]) -> Vec<String> {
        order.iter().map(|id| graph[*id].key.to_string()).collect()
    }

    #[test]
    fn test_order_respects_dependencies() {
        let graph = diamond();
        let order = topological_order(&graph).unwrap();
        assert_eq!(order.len(), graph.len());

        let position: HashMap<TargetId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        for id in graph.target_ids() {
            for dep in graph.dependencies(id) {
                assert!(
                    position[&dep] < position[&id],
                    "{} must come after {}",
                    graph[id].key,
                    graph[dep].key
                );
            }
        }
    }

    #[test]
    fn test_order_is_deterministic() {
        let graph = diamond();
        let order = topological_order(&graph).unwrap();

        assert_eq!(
            names(&graph, &order),
            vec![
                "d:build", "b:build", "c:build", "a:build", "a:test", "d:lint", "all-build",
                "all-lint", "all-test",
            ]
        );
        assert_eq!(order, topological_order(&graph).unwrap());
    }

    #[test]
    fn test_find_cycle_on_acyclic_graph() {
        let edges: HashMap<u32, Vec<u32>> =
            HashMap::from([(1, vec![2, 3]), (2, vec![4]), (3, vec![4]), (4, vec![])]);
        let nodes = [1, 2, 3, 4];

        assert_eq!(find_cycle(&nodes, |n| edges[&n].clone()), None);
    }

    #[test]
    fn test_find_cycle_reports_closed_path() {
        let edges: HashMap<u32, Vec<u32>> =
            HashMap::from([(1, vec![2]), (2, vec![3]), (3, vec![4, 1]), (4, vec![])]);
        let nodes = [1, 2, 3, 4];

        assert_eq!(find_cycle(&nodes, |n| edges[&n].clone()), Some(vec![1, 2, 3, 1]));
    }

    #[test]
    fn test_find_cycle_self_loop() {
        let nodes = [7];
        assert_eq!(find_cycle(&nodes, |n| vec![n]), Some(vec![7, 7]));
    }

    #[test]
    fn test_find_cycle_only_in_later_component() {
        let edges: HashMap<u32, Vec<u32>> =
            HashMap::from([(1, vec![]), (2, vec![3]), (3, vec![2])]);
        let nodes = [1, 2, 3];

        assert_eq!(find_cycle(&nodes, |n| edges[&n].clone()), Some(vec![2, 3, 2]));
    }

    #[test]
    fn test_stages_group_independent_targets() {
        let graph = diamond();
        let order = topological_order(&graph).unwrap();
        let all_build = graph.find(&TargetKey::aggregate(OperationKind::Build)).unwrap();
        let selected = graph.with_dependencies(&[all_build]);

        let stages: Vec<Vec<String>> = stages(&graph, &order, &selected)
            .iter()
            .map(|stage| names(&graph, stage))
            .collect();

        assert_eq!(
            stages,
            vec![
                vec!["d:build".to_string()],
                vec!["b:build".to_string(), "c:build".to_string()],
                vec!["a:build".to_string()],
                vec!["all-build".to_string()],
            ]
        );
    }
}
