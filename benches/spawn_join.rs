use criterion::{criterion_group, criterion_main, Criterion};
use supervisy::combinators;
use supervisy::deps::Deps;
use supervisy::executor::block_on;
use supervisy::fiber::{self, Task};
use supervisy::runner::Runner;

fn spawn_and_join_one(c: &mut Criterion) {
    c.bench_function("spawn_join/single_fiber", |b| {
        b.iter(|| {
            let runner = Runner::new(Deps::production());
            block_on(async move {
                let fiber = fiber::run(&runner, Task::<i32, String>::new(|_r| async { Ok(1) }));
                fiber.await.unwrap()
            })
        })
    });
}

fn all_of_ten(c: &mut Criterion) {
    c.bench_function("spawn_join/all_ten_fibers", |b| {
        b.iter(|| {
            let runner = Runner::new(Deps::production());
            block_on(async move {
                let tasks = (0..10)
                    .map(|n| Task::<i32, String>::new(move |_r| async move { Ok(n) }))
                    .collect();
                fiber::run(&runner, combinators::all(tasks)).await.unwrap()
            })
        })
    });
}

fn nested_abort(c: &mut Criterion) {
    c.bench_function("spawn_join/abort_before_settle", |b| {
        b.iter(|| {
            let runner = Runner::new(Deps::production());
            block_on(async move {
                let fiber = fiber::run(
                    &runner,
                    Task::<(), String>::new(|runner| async move {
                        loop {
                            fiber::run(&runner, combinators::yield_now()).await.unwrap();
                        }
                    }),
                );
                fiber.dispose().await;
            })
        })
    });
}

criterion_group!(benches, spawn_and_join_one, all_of_ten, nested_abort);
criterion_main!(benches);
