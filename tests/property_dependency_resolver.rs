use std::collections::{HashMap, HashSet};

use hivemind::services::{DependencyGraph, GraphError};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use uuid::Uuid;

/// Build a random acyclic graph: node i may depend on any subset of the
/// nodes before it, selected by the edge mask.
fn build_acyclic(size: usize, edge_mask: u64) -> (DependencyGraph, Vec<Uuid>, Vec<HashSet<Uuid>>) {
    let ids: Vec<Uuid> = (0..size).map(|_| Uuid::new_v4()).collect();
    let mut graph = DependencyGraph::new();
    let mut deps_per_node = Vec::with_capacity(size);

    let mut bit = 0u32;
    for (i, &id) in ids.iter().enumerate() {
        let mut deps = HashSet::new();
        for &candidate in ids.iter().take(i) {
            if (edge_mask >> (bit % 64)) & 1 == 1 {
                deps.insert(candidate);
            }
            bit += 1;
        }
        graph.add_task(id, deps.clone()).expect("fresh id");
        deps_per_node.push(deps);
    }

    (graph, ids, deps_per_node)
}

proptest! {
    /// Property: topological sort puts every dependency before its
    /// dependent, for any acyclic graph.
    #[test]
    fn prop_topological_sort_respects_dependencies(
        size in 1usize..20,
        edge_mask in any::<u64>(),
    ) {
        let (graph, ids, deps_per_node) = build_acyclic(size, edge_mask);

        let order = graph.topological_sort()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(order.len(), size);

        let position: HashMap<Uuid, usize> =
            order.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        for (i, deps) in deps_per_node.iter().enumerate() {
            for dep in deps {
                prop_assert!(
                    position[dep] < position[&ids[i]],
                    "dependency {} sorted after dependent {}",
                    dep,
                    ids[i]
                );
            }
        }
    }

    /// Property: every task lands in exactly one level, and each
    /// dependency sits in a strictly earlier level.
    #[test]
    fn prop_execution_plan_layers_are_sound(
        size in 1usize..20,
        edge_mask in any::<u64>(),
    ) {
        let (graph, ids, deps_per_node) = build_acyclic(size, edge_mask);

        let plan = graph.execution_plan()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(plan.total_tasks(), size);

        let mut level_of: HashMap<Uuid, usize> = HashMap::new();
        for level in &plan.levels {
            for &id in &level.task_ids {
                prop_assert!(
                    level_of.insert(id, level.level).is_none(),
                    "task {} appears in more than one level",
                    id
                );
            }
        }
        prop_assert_eq!(level_of.len(), size);

        for (i, deps) in deps_per_node.iter().enumerate() {
            for dep in deps {
                prop_assert!(
                    level_of[dep] < level_of[&ids[i]],
                    "dependency {} not in an earlier level than {}",
                    dep,
                    ids[i]
                );
            }
        }
    }

    /// Property: readiness propagation drains any acyclic graph
    /// completely when tasks complete in topological order.
    #[test]
    fn prop_mark_completed_drains_graph(
        size in 1usize..15,
        edge_mask in any::<u64>(),
    ) {
        let (mut graph, _, _) = build_acyclic(size, edge_mask);

        let order = graph.topological_sort()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        for id in order {
            graph.mark_completed(id)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
        }

        let stats = graph.stats();
        prop_assert_eq!(stats.completed_tasks, size);
        prop_assert!(graph.get_ready().is_empty());
    }

    /// Property: a directed ring of any length is always rejected as
    /// cyclic.
    #[test]
    fn prop_cycles_are_detected(size in 2usize..15) {
        let ids: Vec<Uuid> = (0..size).map(|_| Uuid::new_v4()).collect();
        let mut graph = DependencyGraph::new();

        for (i, &id) in ids.iter().enumerate() {
            let dep = ids[(i + size - 1) % size];
            graph.add_task(id, HashSet::from([dep])).expect("fresh id");
        }

        prop_assert!(matches!(
            graph.validate(),
            Err(GraphError::CyclicDependency(_))
        ));
        prop_assert!(matches!(
            graph.topological_sort(),
            Err(GraphError::CyclicDependency(_))
        ));
    }
}
