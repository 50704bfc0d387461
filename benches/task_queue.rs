use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use serde_json::json;
use tokio::runtime::Runtime;

use hivemind::domain::models::TaskPriority;
use hivemind::services::{EnqueueOptions, QueueConfig, TaskQueue};

fn bench_enqueue(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    c.bench_function("enqueue_1000_mixed_priorities", |b| {
        b.iter_batched(
            || TaskQueue::with_defaults("bench"),
            |queue| {
                rt.block_on(async {
                    for i in 0..1000u32 {
                        let priority = match i % 4 {
                            0 => TaskPriority::Low,
                            1 => TaskPriority::Normal,
                            2 => TaskPriority::High,
                            _ => TaskPriority::Critical,
                        };
                        queue
                            .enqueue_with(
                                "bench-task",
                                json!({ "i": i }),
                                EnqueueOptions::with_priority(priority),
                            )
                            .await
                            .expect("enqueue");
                    }
                });
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_enqueue_dequeue_cycle(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    c.bench_function("enqueue_dequeue_complete_500", |b| {
        b.iter_batched(
            || {
                TaskQueue::new(
                    "bench",
                    QueueConfig {
                        max_capacity: None,
                        max_running: 1000,
                    },
                )
            },
            |queue| {
                rt.block_on(async {
                    for i in 0..500u32 {
                        queue
                            .enqueue("bench-task", json!({ "i": i }))
                            .await
                            .expect("enqueue");
                    }
                    while let Some(task) = queue.dequeue(None).await {
                        queue.complete(task.id(), None).await.expect("complete");
                        if queue.pending_count().await == 0 {
                            break;
                        }
                    }
                });
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_enqueue, bench_enqueue_dequeue_cycle);
criterion_main!(benches);
