use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use xrt_task_scheduler::{ExecutionMode, Origin, TaskScheduler, TaskTraits, WorkerPoolParams};

const BATCH: usize = 1_000;

fn scheduler(max_threads: usize) -> TaskScheduler {
    TaskScheduler::create(
        vec![WorkerPoolParams::new("bench", max_threads)],
        |_: &TaskTraits| 0,
    )
}

fn teardown(scheduler: TaskScheduler) {
    scheduler.shutdown();
    scheduler.join_for_testing();
}

fn bench_parallel_posts(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_posts");
    group.throughput(Throughput::Elements(BATCH as u64));

    for threads in [1, 2, 4, 8] {
        let scheduler = scheduler(threads);
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, _| {
            b.iter(|| {
                for i in 0..BATCH {
                    scheduler.post_task_with_traits(Origin::here(), TaskTraits::new(), move || {
                        black_box(i);
                    });
                }
                scheduler.flush_for_testing();
            });
        });
        teardown(scheduler);
    }

    group.finish();
}

fn bench_runner_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("runner_modes");
    group.throughput(Throughput::Elements(BATCH as u64));

    let scheduler = scheduler(4);
    for mode in [
        ExecutionMode::Parallel,
        ExecutionMode::Sequenced,
        ExecutionMode::SingleThread,
    ] {
        let runner = scheduler.create_task_runner_with_traits(TaskTraits::new(), mode);
        group.bench_with_input(
            BenchmarkId::new("mode", format!("{:?}", mode)),
            &runner,
            |b, runner| {
                b.iter(|| {
                    for i in 0..BATCH {
                        runner.post_task(Origin::here(), move || {
                            black_box(i);
                        });
                    }
                    scheduler.flush_for_testing();
                });
            },
        );
    }
    teardown(scheduler);

    group.finish();
}

fn bench_post_only(c: &mut Criterion) {
    let scheduler = scheduler(2);

    c.bench_function("post_single_task", |b| {
        b.iter(|| {
            scheduler.post_task_with_traits(Origin::here(), TaskTraits::new(), || {
                black_box(());
            })
        });
    });

    scheduler.flush_for_testing();
    teardown(scheduler);
}

criterion_group!(
    benches,
    bench_parallel_posts,
    bench_runner_modes,
    bench_post_only
);
criterion_main!(benches);
