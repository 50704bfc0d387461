//! Task dependency graph with validation and readiness propagation.
//!
//! The graph is an arena of [`TaskNode`]s keyed by task id; tasks
//! themselves live in the queue and are referenced by id only. Cycle
//! detection and ordering use Kahn's algorithm with an id tie-break so
//! results are deterministic.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::execution_plan::ExecutionPlan;

/// Errors raised by graph operations.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Task already in graph: {0}")]
    DuplicateTask(Uuid),

    #[error("Task not found in graph: {0}")]
    TaskNotFound(Uuid),

    #[error("Task {task} depends on unknown task {dependency}")]
    InvalidDependency { task: Uuid, dependency: Uuid },

    #[error("Circular dependency involving {} task(s)", .0.len())]
    CyclicDependency(Vec<Uuid>),

    #[error("Task {task} has incomplete dependency {dependency}")]
    DependencyNotSatisfied { task: Uuid, dependency: Uuid },
}

/// Resolver-side view of one task.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub task_id: Uuid,
    /// Tasks this node waits on.
    pub dependencies: HashSet<Uuid>,
    /// Tasks waiting on this node.
    pub dependents: HashSet<Uuid>,
    /// Count of dependencies not yet completed.
    pub in_degree: usize,
    pub completed: bool,
}

impl TaskNode {
    fn new(task_id: Uuid, dependencies: HashSet<Uuid>) -> Self {
        let in_degree = dependencies.len();
        Self {
            task_id,
            dependencies,
            dependents: HashSet::new(),
            in_degree,
            completed: false,
        }
    }

    /// A node is ready when every dependency has completed and it has
    /// not itself completed.
    pub fn is_ready(&self) -> bool {
        self.in_degree == 0 && !self.completed
    }
}

/// Aggregate counters for the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStats {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub ready_tasks: usize,
    /// Uncompleted tasks still blocked by dependencies.
    pub pending_tasks: usize,
}

/// DAG of task dependencies with completion tracking.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<Uuid, TaskNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. Dependencies may reference tasks that have not
    /// been added yet; existence is checked at [`validate`](Self::validate)
    /// time.
    pub fn add_task(
        &mut self,
        task_id: Uuid,
        dependencies: HashSet<Uuid>,
    ) -> Result<(), GraphError> {
        if self.nodes.contains_key(&task_id) {
            return Err(GraphError::DuplicateTask(task_id));
        }

        // Wire this node into the dependents sets of deps already present,
        // and adopt dependents of nodes added before us that wait on us.
        for dep in &dependencies {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.dependents.insert(task_id);
            }
        }

        let mut node = TaskNode::new(task_id, dependencies);
        for other in self.nodes.values() {
            if other.dependencies.contains(&task_id) {
                node.dependents.insert(other.task_id);
            }
        }
        // Deps completed before this node was added are already satisfied.
        node.in_degree = node
            .dependencies
            .iter()
            .filter(|d| !self.nodes.get(d).is_some_and(|n| n.completed))
            .count();

        debug!(task_id = %task_id, in_degree = node.in_degree, "task added to graph");
        self.nodes.insert(task_id, node);
        Ok(())
    }

    /// Delete a node, detaching it from its dependents' dependency sets.
    pub fn remove_task(&mut self, task_id: Uuid) -> Result<(), GraphError> {
        let node = self
            .nodes
            .remove(&task_id)
            .ok_or(GraphError::TaskNotFound(task_id))?;

        let was_completed = node.completed;
        for dependent_id in &node.dependents {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                if dependent.dependencies.remove(&task_id) && !was_completed {
                    dependent.in_degree = dependent.in_degree.saturating_sub(1);
                }
            }
        }
        for dep_id in &node.dependencies {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.dependents.remove(&task_id);
            }
        }
        Ok(())
    }

    /// Check well-formedness: every dependency references an existing
    /// node, and the graph is acyclic (Kahn drain).
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    return Err(GraphError::InvalidDependency {
                        task: node.task_id,
                        dependency: *dep,
                    });
                }
            }
        }

        let drained = self.kahn_order()?;
        debug_assert_eq!(drained.len(), self.nodes.len());
        Ok(())
    }

    /// Structural Kahn's algorithm over all nodes, ignoring completion.
    /// Ties broken by ascending task id for determinism.
    fn kahn_order(&self) -> Result<Vec<Uuid>, GraphError> {
        let mut degree: HashMap<Uuid, usize> = self
            .nodes
            .values()
            .map(|n| {
                let existing = n
                    .dependencies
                    .iter()
                    .filter(|d| self.nodes.contains_key(d))
                    .count();
                (n.task_id, existing)
            })
            .collect();

        let mut heap: BinaryHeap<Reverse<Uuid>> = degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| Reverse(*id))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(id)) = heap.pop() {
            order.push(id);
            if let Some(node) = self.nodes.get(&id) {
                let mut dependents: Vec<Uuid> = node.dependents.iter().copied().collect();
                dependents.sort_unstable();
                for dependent in dependents {
                    if let Some(d) = degree.get_mut(&dependent) {
                        *d -= 1;
                        if *d == 0 {
                            heap.push(Reverse(dependent));
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let mut stuck: Vec<Uuid> = degree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(id, _)| id)
                .collect();
            stuck.sort_unstable();
            return Err(GraphError::CyclicDependency(stuck));
        }
        Ok(order)
    }

    /// Deterministic topological order of all tasks.
    pub fn topological_sort(&self) -> Result<Vec<Uuid>, GraphError> {
        self.validate()?;
        self.kahn_order()
    }

    /// Level-based plan over uncompleted tasks: level 0 holds every
    /// currently ready task, level k+1 holds tasks whose remaining
    /// dependencies all sit in levels <= k.
    pub fn execution_plan(&self) -> Result<ExecutionPlan, GraphError> {
        self.validate()?;

        let mut degree: HashMap<Uuid, usize> = self
            .nodes
            .values()
            .filter(|n| !n.completed)
            .map(|n| (n.task_id, n.in_degree))
            .collect();

        let mut levels: Vec<Vec<Uuid>> = Vec::new();
        let mut assigned: HashSet<Uuid> = HashSet::new();

        while assigned.len() < degree.len() {
            let mut level: Vec<Uuid> = degree
                .iter()
                .filter(|(id, d)| **d == 0 && !assigned.contains(*id))
                .map(|(id, _)| *id)
                .collect();
            if level.is_empty() {
                // validate() passed, so a stuck level can only mean a
                // dependency on a missing or cyclic remainder.
                let mut stuck: Vec<Uuid> = degree
                    .iter()
                    .filter(|(id, _)| !assigned.contains(*id))
                    .map(|(id, _)| *id)
                    .collect();
                stuck.sort_unstable();
                return Err(GraphError::CyclicDependency(stuck));
            }
            level.sort_unstable();

            for id in &level {
                assigned.insert(*id);
                if let Some(node) = self.nodes.get(id) {
                    for dependent in &node.dependents {
                        if let Some(d) = degree.get_mut(dependent) {
                            *d = d.saturating_sub(1);
                        }
                    }
                }
            }
            levels.push(level);
        }

        Ok(ExecutionPlan::new(levels))
    }

    /// Mark a task complete and propagate readiness.
    ///
    /// Requires every dependency to be completed already. Returns the set
    /// of dependents that became ready as a result. Re-completion is a
    /// no-op yielding the empty set.
    pub fn mark_completed(&mut self, task_id: Uuid) -> Result<HashSet<Uuid>, GraphError> {
        let node = self
            .nodes
            .get(&task_id)
            .ok_or(GraphError::TaskNotFound(task_id))?;

        if node.completed {
            return Ok(HashSet::new());
        }

        for dep in &node.dependencies {
            let satisfied = self.nodes.get(dep).is_some_and(|n| n.completed);
            if !satisfied {
                return Err(GraphError::DependencyNotSatisfied {
                    task: task_id,
                    dependency: *dep,
                });
            }
        }

        let dependents: Vec<Uuid> = node.dependents.iter().copied().collect();
        if let Some(node) = self.nodes.get_mut(&task_id) {
            node.completed = true;
        }

        let mut newly_ready = HashSet::new();
        for dependent_id in dependents {
            if let Some(dependent) = self.nodes.get_mut(&dependent_id) {
                dependent.in_degree = dependent.in_degree.saturating_sub(1);
                if dependent.is_ready() {
                    newly_ready.insert(dependent_id);
                }
            }
        }

        debug!(task_id = %task_id, newly_ready = newly_ready.len(), "task completed in graph");
        Ok(newly_ready)
    }

    /// Ids of all currently ready tasks.
    pub fn get_ready(&self) -> HashSet<Uuid> {
        self.nodes
            .values()
            .filter(|n| n.is_ready())
            .map(|n| n.task_id)
            .collect()
    }

    pub fn get_node(&self, task_id: Uuid) -> Option<&TaskNode> {
        self.nodes.get(&task_id)
    }

    pub fn dependencies_of(&self, task_id: Uuid) -> Result<HashSet<Uuid>, GraphError> {
        self.nodes
            .get(&task_id)
            .map(|n| n.dependencies.clone())
            .ok_or(GraphError::TaskNotFound(task_id))
    }

    pub fn dependents_of(&self, task_id: Uuid) -> Result<HashSet<Uuid>, GraphError> {
        self.nodes
            .get(&task_id)
            .map(|n| n.dependents.clone())
            .ok_or(GraphError::TaskNotFound(task_id))
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.nodes.contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> GraphStats {
        let completed = self.nodes.values().filter(|n| n.completed).count();
        let ready = self.nodes.values().filter(|n| n.is_ready()).count();
        GraphStats {
            total_tasks: self.nodes.len(),
            completed_tasks: completed,
            ready_tasks: ready,
            pending_tasks: self.nodes.len() - completed - ready,
        }
    }

    /// Clear completion flags, restoring every node's in-degree to its
    /// full dependency count.
    pub fn reset(&mut self) {
        for node in self.nodes.values_mut() {
            node.completed = false;
            node.in_degree = node.dependencies.len();
        }
    }

    /// Empty the graph.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
