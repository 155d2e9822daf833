//! Benchmarks for queue and search operations using criterion.
//!
//! These benchmarks measure:
//! - Single job round trip (enqueue, run, resolve)
//! - Batch throughput with 1, 2, 5 and 10 workers
//! - Fuzzy queries against a populated index

#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::future::join_all;
use quarry::events::InProcEventBus;
use quarry::job::JobOptions;
use quarry::queue::JobQueue;
use quarry::{AppContext, QueueConfig, SearchQuery, ServiceConfig};
use quarry_testkit::{text_upload_with, RecordingHandler, TestJob};
use tokio::runtime::Runtime;

/// Creates a tokio runtime for async benchmarks.
fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

fn start_queue(rt: &Runtime, name: &str, workers: usize) -> Arc<JobQueue<TestJob, RecordingHandler>> {
    let _enter = rt.enter();
    JobQueue::start(
        QueueConfig::new(name).with_concurrency(workers),
        Arc::new(RecordingHandler::new()),
        Arc::new(InProcEventBus::new(16)),
    )
    .expect("start queue")
}

/// Benchmark: one job through the whole lifecycle.
fn bench_round_trip(c: &mut Criterion) {
    let rt = create_runtime();
    let queue = start_queue(&rt, "bench-single", 1);
    let job = TestJob::simple("bench-job");

    let mut group = c.benchmark_group("round_trip");
    group.sample_size(100);

    group.bench_function("single_worker", |b| {
        b.to_async(&rt).iter(|| async {
            queue
                .enqueue(job.clone(), JobOptions::new())
                .expect("enqueue should succeed")
                .await
                .expect("job should succeed");
        });
    });

    group.finish();
}

/// Benchmark: drain a batch of 200 jobs with varying worker counts.
fn bench_worker_throughput(c: &mut Criterion) {
    let rt = create_runtime();
    let batch = 200;

    let mut group = c.benchmark_group("worker_throughput");
    group.sample_size(30);
    group.throughput(Throughput::Elements(batch as u64));

    for workers in [1usize, 2, 5, 10] {
        let queue = start_queue(&rt, &format!("bench-{workers}"), workers);
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, _| {
            b.to_async(&rt).iter(|| async {
                let handles: Vec<_> = (0..batch)
                    .map(|i| {
                        queue
                            .enqueue(TestJob::simple(format!("job-{i}")), JobOptions::new())
                            .expect("enqueue should succeed")
                    })
                    .collect();
                for result in join_all(handles).await {
                    result.expect("job should succeed");
                }
            });
        });
    }

    group.finish();
}

/// Benchmark: fuzzy search over 1000 indexed documents.
fn bench_search(c: &mut Criterion) {
    let rt = create_runtime();
    let ctx = rt.block_on(async {
        let ctx = AppContext::builder(ServiceConfig::default())
            .start()
            .await
            .expect("start context");
        let mut last = None;
        for i in 0..1000 {
            let text = format!("invoice {i} for shipment, harbor fees and storage");
            last = ctx
                .store()
                .save(text_upload_with(&format!("doc-{i}.txt"), &text))
                .await
                .expect("save should succeed")
                .index_job;
        }
        if let Some(job) = last {
            job.await.expect("index job should succeed");
        }
        ctx
    });

    let mut group = c.benchmark_group("search");
    for term in ["invoice", "harbr", "shipment storage"] {
        let query = SearchQuery::new(term);
        group.bench_with_input(BenchmarkId::new("query", term), &query, |b, query| {
            b.iter(|| ctx.search(query).expect("query should succeed"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_round_trip, bench_worker_throughput, bench_search);
criterion_main!(benches);
