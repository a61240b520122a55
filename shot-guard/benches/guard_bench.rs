use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;

use shot_guard::ArrayMetric;
use shot_guard::DegradeGrade;
use shot_guard::DegradeRule;
use shot_guard::FlowRule;
use shot_guard::MetricEvent;
use shot_guard::Sentinel;
use shot_guard::TimeSource;

fn bench_parallel<F>(group_name: &str, c: &mut Criterion, op: Arc<F>)
where
    F: Fn() + Send + Sync + 'static,
{
    let mut group = c.benchmark_group(group_name);

    for threads in [2, 4, 8].iter() {
        let num_threads = *threads;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}-threads", num_threads)),
            &num_threads,
            |b, &n| {
                b.iter_custom(|iters| {
                    let barrier = Arc::new(Barrier::new(n + 1));
                    let mut handles = Vec::with_capacity(n);

                    for _ in 0..n {
                        let op = Arc::clone(&op);
                        let bar = Arc::clone(&barrier);
                        let iters_per_thread = iters / n as u64;

                        handles.push(thread::spawn(move || {
                            bar.wait(); // Wait for the start signal
                            for _ in 0..iters_per_thread {
                                op();
                            }
                        }));
                    }

                    barrier.wait();
                    let start = Instant::now();

                    for handle in handles {
                        let _ = handle.join();
                    }

                    start.elapsed()
                });
            },
        );
    }
    group.finish();
}

fn bench_window(c: &mut Criterion) {
    let time = TimeSource::new();
    let metric = Arc::new(ArrayMetric::new(2, 1000));

    let mut group = c.benchmark_group("ArrayMetric");
    group.bench_function("add", |b| {
        b.iter(|| metric.add(MetricEvent::Pass, 1, black_box(time.now_ms())))
    });
    group.bench_function("sum", |b| {
        b.iter(|| black_box(metric.sum(MetricEvent::Pass, time.now_ms())))
    });
    group.finish();

    let op = {
        let metric = Arc::clone(&metric);
        let time = time.clone();
        Arc::new(move || metric.add(MetricEvent::Pass, 1, time.now_ms()))
    };
    bench_parallel("ArrayMetric-add", c, op);
}

fn bench_entry(c: &mut Criterion) {
    let sentinel = Arc::new(Sentinel::new());
    sentinel.install_flow_rules(vec![FlowRule::new("guarded", 1_000_000_000.0)]);
    sentinel.install_degrade_rules(vec![DegradeRule::new(
        "guarded",
        DegradeGrade::ExceptionRatio,
        0.5,
        10,
    )]);

    let mut group = c.benchmark_group("Entry");
    group.bench_function("no-rules", |b| {
        b.iter(|| drop(black_box(sentinel.entry("plain"))))
    });
    group.bench_function("flow-and-degrade", |b| {
        b.iter(|| drop(black_box(sentinel.entry("guarded"))))
    });
    group.bench_function("nested", |b| {
        b.iter(|| {
            let outer = sentinel.entry("plain");
            let inner = sentinel.entry("guarded");
            drop(black_box(inner));
            drop(black_box(outer));
        })
    });
    group.finish();

    let op = {
        let sentinel = Arc::clone(&sentinel);
        Arc::new(move || drop(black_box(sentinel.entry("guarded"))))
    };
    bench_parallel("Entry-flow-and-degrade", c, op);
}

criterion_group!(benches, bench_window, bench_entry);
criterion_main!(benches);
