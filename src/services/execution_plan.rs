//! Execution plan for DAG-based task execution.
//!
//! Provides a topologically-sorted execution plan where tasks are organized
//! into levels that can be executed in parallel within each level.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A level in the execution plan containing tasks that can run in parallel.
///
/// All tasks within a level have no dependencies on each other, making them
/// safe to execute concurrently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionLevel {
    /// Level number (0-indexed, 0 = no dependencies)
    pub level: usize,

    /// Task IDs that can be executed concurrently at this level,
    /// sorted for determinism.
    pub task_ids: Vec<Uuid>,
}

impl ExecutionLevel {
    pub fn new(level: usize, mut task_ids: Vec<Uuid>) -> Self {
        task_ids.sort_unstable();
        Self { level, task_ids }
    }

    pub fn task_count(&self) -> usize {
        self.task_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.task_ids.binary_search(&task_id).is_ok()
    }
}

/// Execution plan representing a DAG of tasks organized into levels.
///
/// Level 0 contains tasks with no dependencies, level k contains tasks
/// whose dependencies all lie in levels 0..k. This is the minimum-height
/// topological layering: each task sits at the smallest level strictly
/// above all of its dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Levels of execution in topological order.
    pub levels: Vec<ExecutionLevel>,
    /// Flattened level-by-level order, tie-broken by task id.
    pub execution_order: Vec<Uuid>,
}

impl ExecutionPlan {
    /// Build a plan from raw level sets.
    pub fn new(level_sets: Vec<Vec<Uuid>>) -> Self {
        let levels: Vec<ExecutionLevel> = level_sets
            .into_iter()
            .enumerate()
            .map(|(idx, ids)| ExecutionLevel::new(idx, ids))
            .collect();
        let execution_order = levels
            .iter()
            .flat_map(|l| l.task_ids.iter().copied())
            .collect();
        Self {
            levels,
            execution_order,
        }
    }

    pub fn empty() -> Self {
        Self {
            levels: Vec::new(),
            execution_order: Vec::new(),
        }
    }

    pub fn total_levels(&self) -> usize {
        self.levels.len()
    }

    /// Total number of tasks across all levels.
    pub fn total_tasks(&self) -> usize {
        self.levels.iter().map(ExecutionLevel::task_count).sum()
    }

    /// Width of the widest level: the maximum parallelism the plan allows.
    pub fn max_parallel_tasks(&self) -> usize {
        self.levels
            .iter()
            .map(ExecutionLevel::task_count)
            .max()
            .unwrap_or(0)
    }

    pub fn get_level(&self, level: usize) -> Option<&ExecutionLevel> {
        self.levels.get(level)
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn all_task_ids(&self) -> Vec<Uuid> {
        self.execution_order.clone()
    }

    /// The next set of tasks that may run given what has completed:
    /// the unfinished members of the earliest level that is not fully
    /// complete. Empty once every level is done.
    pub fn next_batch(&self, completed: &HashSet<Uuid>) -> HashSet<Uuid> {
        for level in &self.levels {
            let remaining: HashSet<Uuid> = level
                .task_ids
                .iter()
                .copied()
                .filter(|id| !completed.contains(id))
                .collect();
            if !remaining.is_empty() {
                return remaining;
            }
        }
        HashSet::new()
    }

    /// Validate the plan structure: sequential level numbering, no empty
    /// levels, no duplicate task ids.
    pub fn validate(&self) -> Result<(), String> {
        for (idx, level) in self.levels.iter().enumerate() {
            if level.level != idx {
                return Err(format!(
                    "Level {} has incorrect level number {}",
                    idx, level.level
                ));
            }
            if level.is_empty() {
                return Err(format!("Level {idx} is empty"));
            }
        }

        let mut seen = HashSet::new();
        for id in &self.execution_order {
            if !seen.insert(*id) {
                return Err(format!("Duplicate task ID found: {id}"));
            }
        }

        Ok(())
    }
}
