//! End-to-end tests for the orchestration half of the core:
//! queue ordering, DAG planning, worker execution, retries, sagas, and
//! lifecycle events.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use hivemind::domain::models::{SagaState, TaskPriority, TaskState};
use hivemind::domain::ports::HandlerRegistry;
use hivemind::services::{
    DependencyGraph, EnqueueOptions, EventBus, EventPayload, EventTaskAdapter, EventToTaskMapping,
    RetryConfig, RetryPolicy, SagaBuilder, TaskQueue, TriggerEvent, WorkerPool, WorkerPoolConfig,
};

async fn wait_terminal(queue: &TaskQueue, task_id: Uuid) -> TaskState {
    for _ in 0..100 {
        let task = queue.get(task_id).await.unwrap();
        if task.metadata.is_terminal() {
            return task.metadata.state;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {task_id} never reached a terminal state");
}

fn sorted_ids(n: usize) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
    ids.sort_unstable();
    ids
}

// S1: diamond DAG produces the expected three-level plan.
#[tokio::test]
async fn diamond_dag_plan() {
    let ids = sorted_ids(4);
    let (a, b, c, d) = (ids[0], ids[1], ids[2], ids[3]);

    let mut graph = DependencyGraph::new();
    graph.add_task(a, HashSet::new()).unwrap();
    graph.add_task(b, HashSet::from([a])).unwrap();
    graph.add_task(c, HashSet::from([a])).unwrap();
    graph.add_task(d, HashSet::from([b, c])).unwrap();

    let plan = graph.execution_plan().unwrap();
    assert_eq!(plan.total_levels(), 3);
    assert_eq!(plan.levels[0].task_ids, vec![a]);
    assert_eq!(
        plan.levels[1].task_ids.iter().copied().collect::<HashSet<_>>(),
        HashSet::from([b, c])
    );
    assert_eq!(plan.levels[2].task_ids, vec![d]);
    assert_eq!(plan.max_parallel_tasks(), 2);
    assert_eq!(plan.total_tasks(), 4);
}

// S2: dequeue follows priority order regardless of submission order.
#[tokio::test]
async fn priority_ordering() {
    let queue = TaskQueue::with_defaults("s2");
    for (name, priority) in [
        ("low", TaskPriority::Low),
        ("high", TaskPriority::High),
        ("critical", TaskPriority::Critical),
        ("normal", TaskPriority::Normal),
    ] {
        queue
            .enqueue_with(name, json!(null), EnqueueOptions::with_priority(priority))
            .await
            .unwrap();
    }

    let mut names = Vec::new();
    for _ in 0..4 {
        names.push(queue.dequeue(None).await.unwrap().metadata.name);
    }
    assert_eq!(names, vec!["critical", "high", "normal", "low"]);
}

// S3: failing step triggers reverse-order compensation.
#[tokio::test]
async fn saga_compensation() {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));

    let l1 = Arc::clone(&log);
    let l2 = Arc::clone(&log);
    let saga = SagaBuilder::new("s3")
        .step_with_compensation(
            "s1",
            || async { Ok(json!("r1")) },
            move |result| {
                let log = Arc::clone(&l1);
                async move {
                    log.lock().unwrap().push(result.as_str().unwrap().to_string());
                    Ok(())
                }
            },
        )
        .step_with_compensation(
            "s2",
            || async { Ok(json!("r2")) },
            move |result| {
                let log = Arc::clone(&l2);
                async move {
                    log.lock().unwrap().push(result.as_str().unwrap().to_string());
                    Ok(())
                }
            },
        )
        .step("s3", || async { anyhow::bail!("s3 exploded") })
        .build();

    let execution = saga.execute().await.unwrap();

    assert_eq!(execution.state, SagaState::Compensated);
    assert_eq!(execution.completed_steps, 2);
    assert_eq!(execution.compensated_steps, 2);
    assert_eq!(*log.lock().unwrap(), vec!["r2", "r1"]);
}

// Workers drain a workflow in dependency order driven by the resolver.
#[tokio::test]
async fn dag_driven_execution_through_pool() {
    let bus = Arc::new(EventBus::with_defaults());
    let queue = Arc::new(TaskQueue::with_defaults("dag-e2e").with_event_bus(Arc::clone(&bus)));
    let handlers = Arc::new(HandlerRegistry::new());

    let completed_order = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let order_ref = Arc::clone(&completed_order);
    handlers
        .register_fn("stage", move |payload| {
            let order = Arc::clone(&order_ref);
            Box::pin(async move {
                let stage = payload["stage"].as_str().unwrap_or("?").to_string();
                order.lock().unwrap().push(stage);
                Ok(json!({"ok": true}))
            })
        })
        .await;

    let pool = WorkerPool::new(
        Arc::clone(&queue),
        handlers,
        WorkerPoolConfig {
            min_workers: 2,
            max_workers: 4,
            ..WorkerPoolConfig::default()
        },
    )
    .unwrap();
    pool.start().await;

    // extract -> transform -> load, expressed in the resolver.
    let mut graph = DependencyGraph::new();
    let mut queue_ids = HashMap::new();
    let stages = ["extract", "transform", "load"];
    let graph_ids = sorted_ids(3);

    for (idx, stage) in stages.iter().enumerate() {
        let deps = if idx == 0 {
            HashSet::new()
        } else {
            HashSet::from([graph_ids[idx - 1]])
        };
        graph.add_task(graph_ids[idx], deps).unwrap();
        queue_ids.insert(graph_ids[idx], *stage);
    }
    graph.validate().unwrap();

    // Submit level by level as readiness propagates.
    let mut ready: Vec<Uuid> = graph.get_ready().into_iter().collect();
    while !ready.is_empty() {
        let mut submitted = Vec::new();
        for graph_id in ready.drain(..) {
            let stage = queue_ids[&graph_id];
            let task_id = queue
                .enqueue("stage", json!({ "stage": stage }))
                .await
                .unwrap();
            submitted.push((graph_id, task_id));
        }
        let mut next = Vec::new();
        for (graph_id, task_id) in submitted {
            assert_eq!(wait_terminal(&queue, task_id).await, TaskState::Completed);
            next.extend(graph.mark_completed(graph_id).unwrap());
        }
        ready = next;
    }

    assert_eq!(
        *completed_order.lock().unwrap(),
        vec!["extract", "transform", "load"]
    );
    assert_eq!(graph.stats().completed_tasks, 3);
    pool.stop().await;
}

// A flaky handler wrapped in a retry policy recovers within budget.
#[tokio::test]
async fn retry_policy_drives_flaky_operation() {
    let policy = RetryPolicy::new(RetryConfig {
        max_retries: 3,
        base_delay: Duration::from_millis(10),
        jitter: 0.0,
        ..RetryConfig::default()
    })
    .unwrap();

    let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let attempts_ref = Arc::clone(&attempts);

    let (value, context) = policy
        .execute_with_context(move || {
            let attempts = Arc::clone(&attempts_ref);
            async move {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n < 2 {
                    anyhow::bail!("transient failure {n}");
                }
                Ok(json!({"attempt": n}))
            }
        })
        .await
        .unwrap();

    assert_eq!(value["attempt"], 2);
    assert_eq!(context.attempt, 2);
    assert_eq!(context.errors.len(), 2);
}

// Task lifecycle events flow through the bus in order, and the adapter
// correlates external triggers.
#[tokio::test]
async fn lifecycle_events_and_adapter() {
    let bus = Arc::new(EventBus::with_defaults());
    let queue = Arc::new(TaskQueue::with_defaults("events").with_event_bus(Arc::clone(&bus)));
    let handlers = Arc::new(HandlerRegistry::new());
    handlers
        .register_fn("notify", |_| Box::pin(async { Ok(json!("sent")) }))
        .await;

    let adapter = EventTaskAdapter::new(
        Arc::clone(&queue),
        Arc::clone(&bus),
        EventToTaskMapping::default(),
    );

    let pool = WorkerPool::new(
        Arc::clone(&queue),
        handlers,
        WorkerPoolConfig::default(),
    )
    .unwrap();

    let mut rx = bus.subscribe();
    let trigger = TriggerEvent::new(
        "orchestration.task.trigger",
        json!({"task_name": "notify", "priority": "critical"}),
    );
    let task_id = adapter.handle_event(&trigger).await.unwrap();

    pool.start().await;
    assert_eq!(wait_terminal(&queue, task_id).await, TaskState::Completed);
    pool.stop().await;

    let created = rx.recv().await.unwrap();
    match created.payload {
        EventPayload::TaskCreated {
            task_id: id,
            priority,
            trigger_event_id,
            ..
        } => {
            assert_eq!(id, task_id);
            assert_eq!(priority, TaskPriority::Critical);
            assert_eq!(trigger_event_id, Some(trigger.event_id));
        }
        other => panic!("expected task.created, got {}", other.kind()),
    }

    let started = rx.recv().await.unwrap();
    assert_eq!(started.payload.kind(), "task.started");
    match started.payload {
        EventPayload::TaskStarted { worker_id, .. } => assert!(worker_id.is_some()),
        _ => unreachable!(),
    }

    let completed = rx.recv().await.unwrap();
    match completed.payload {
        EventPayload::TaskCompleted { result, duration_ms, .. } => {
            assert_eq!(result, Some(json!("sent")));
            assert!(duration_ms.is_some());
        }
        other => panic!("expected task.completed, got {}", other.kind()),
    }

    // Snapshot after the run reports the completed task.
    adapter.publish_metrics_snapshot(None).await;
    let snapshot = rx.recv().await.unwrap();
    match snapshot.payload {
        EventPayload::MetricsSnapshot { queue: stats, .. } => {
            assert_eq!(stats.completed_tasks, 1);
        }
        other => panic!("expected metrics.snapshot, got {}", other.kind()),
    }
}

// max_running throttles concurrency even with many workers available.
#[tokio::test]
async fn max_running_limits_parallelism() {
    let queue = Arc::new(TaskQueue::new(
        "throttled",
        hivemind::services::QueueConfig {
            max_capacity: None,
            max_running: 1,
        },
    ));
    let handlers = Arc::new(HandlerRegistry::new());

    let concurrent = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let peak = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let (c, p) = (Arc::clone(&concurrent), Arc::clone(&peak));
    handlers
        .register_fn("probe", move |_| {
            let (c, p) = (Arc::clone(&c), Arc::clone(&p));
            Box::pin(async move {
                let now = c.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                p.fetch_max(now, std::sync::atomic::Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                c.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                Ok(json!(null))
            })
        })
        .await;

    let pool = WorkerPool::new(
        Arc::clone(&queue),
        handlers,
        WorkerPoolConfig {
            min_workers: 4,
            max_workers: 4,
            ..WorkerPoolConfig::default()
        },
    )
    .unwrap();
    pool.start().await;

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(queue.enqueue("probe", json!(null)).await.unwrap());
    }
    for id in ids {
        assert_eq!(wait_terminal(&queue, id).await, TaskState::Completed);
    }
    pool.stop().await;

    assert_eq!(peak.load(std::sync::atomic::Ordering::SeqCst), 1);
}

// Cancellation mid-flight leaves the task cancelled, not completed.
#[tokio::test]
async fn cancel_running_task_wins_over_completion() {
    let queue = Arc::new(TaskQueue::with_defaults("cancel"));
    let handlers = Arc::new(HandlerRegistry::new());
    handlers
        .register_fn("slow", |_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(json!("late result"))
            })
        })
        .await;

    let pool = WorkerPool::new(Arc::clone(&queue), handlers, WorkerPoolConfig::default()).unwrap();
    pool.start().await;

    let task_id = queue.enqueue("slow", json!(null)).await.unwrap();

    // Let the worker claim it, then cancel.
    for _ in 0..50 {
        if queue.get(task_id).await.unwrap().metadata.state == TaskState::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(queue.cancel(task_id).await.unwrap());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let task = queue.get(task_id).await.unwrap();
    assert_eq!(task.metadata.state, TaskState::Cancelled);
    assert!(task.result.is_none());
    pool.stop().await;
}
