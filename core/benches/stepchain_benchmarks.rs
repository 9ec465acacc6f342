use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use stepchain::{Args, AsyncSteps, Frame, ScopedChain, StateBag, StepResult};

// --- Helper: a chain of `count` root steps, each doing `work` state updates ---
fn build_sequential(count: usize, work: u64) -> ScopedChain {
  let scoped = ScopedChain::new();
  scoped.state().set("counter", 0u64);
  for _ in 0..count {
    scoped
      .add(move |f, _| {
        for _ in 0..work {
          f.state().update::<u64, _>("counter", |c| *c = c.wrapping_add(1));
        }
        f.success()
      })
      .unwrap();
  }
  scoped
}

// --- Helper: each frame adds one child until the remaining depth is used up ---
fn nested_step(f: &Frame, _args: Args) -> StepResult {
  let depth = f.state().get::<usize>("depth").unwrap_or(0);
  if depth == 0 {
    return f.success();
  }
  f.state().set("depth", depth - 1);
  f.add(nested_step)?;
  Ok(())
}

// --- Benchmark Functions ---

fn bench_sequential_dispatch(c: &mut Criterion) {
  let mut group = c.benchmark_group("SequentialDispatch");

  for num_steps in [1usize, 10, 100].iter() {
    for work in [1u64, 10].iter() {
      group.throughput(Throughput::Elements(*num_steps as u64));
      group.bench_with_input(
        BenchmarkId::new(format!("{}steps_{}work", num_steps, work), num_steps),
        &(*num_steps, *work),
        |b, &(num_steps, work)| {
          b.iter_batched(
            || build_sequential(num_steps, work),
            |scoped| criterion::black_box(scoped.run()),
            criterion::BatchSize::SmallInput,
          );
        },
      );
    }
  }
  group.finish();
}

fn bench_nested_sub_steps(c: &mut Criterion) {
  let mut group = c.benchmark_group("NestedSubSteps");

  for depth in [4usize, 16, 64].iter() {
    group.throughput(Throughput::Elements(*depth as u64));
    group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, &depth| {
      b.iter_batched(
        || {
          let scoped = ScopedChain::new();
          scoped.state().set("depth", depth);
          scoped.add(nested_step).unwrap();
          scoped
        },
        |scoped| criterion::black_box(scoped.run()),
        criterion::BatchSize::SmallInput,
      );
    });
  }
  group.finish();
}

fn bench_parallel_fan_out(c: &mut Criterion) {
  let mut group = c.benchmark_group("ParallelFanOut");

  for branches in [2usize, 8, 32].iter() {
    group.throughput(Throughput::Elements(*branches as u64));
    group.bench_with_input(BenchmarkId::from_parameter(branches), branches, |b, &branches| {
      b.iter_batched(
        || {
          let scoped = ScopedChain::new();
          let join = scoped.parallel().unwrap();
          for _ in 0..branches {
            join
              .add(|f, _| {
                f.add(|f, _| f.success())?;
                Ok(())
              })
              .unwrap();
          }
          scoped
        },
        |scoped| criterion::black_box(scoped.run()),
        criterion::BatchSize::SmallInput,
      );
    });
  }
  group.finish();
}

fn bench_loop_throughput(c: &mut Criterion) {
  let mut group = c.benchmark_group("LoopThroughput");

  for iterations in [10usize, 100, 1000].iter() {
    group.throughput(Throughput::Elements(*iterations as u64));
    group.bench_with_input(BenchmarkId::from_parameter(iterations), iterations, |b, &iterations| {
      b.iter_batched(
        || {
          let scoped = ScopedChain::new();
          scoped
            .repeat(
              iterations,
              |f, i| {
                f.state().set("last", i);
                Ok(())
              },
              None,
            )
            .unwrap();
          scoped
        },
        |scoped| criterion::black_box(scoped.run()),
        criterion::BatchSize::SmallInput,
      );
    });
  }
  group.finish();
}

fn bench_timeouts_on_virtual_clock(c: &mut Criterion) {
  let mut group = c.benchmark_group("TimeoutsVirtualClock");

  group.bench_function("timeout_then_recover", |b| {
    b.iter_batched(
      || {
        let scoped = ScopedChain::new();
        scoped
          .add_with_handler(|f, _| f.set_timeout(Duration::from_secs(30)), |f, _| f.success())
          .unwrap();
        scoped
      },
      |scoped| criterion::black_box(scoped.run()),
      criterion::BatchSize::SmallInput,
    );
  });
  group.finish();
}

fn bench_state_bag_access(c: &mut Criterion) {
  let mut group = c.benchmark_group("StateBagAccess");
  let bag = StateBag::new();
  bag.set("counter", 0u64);

  group.bench_function("get", |b| {
    b.iter(|| criterion::black_box(bag.get::<u64>("counter")))
  });

  group.bench_function("update", |b| {
    b.iter(|| {
      bag.update::<u64, _>("counter", |c| {
        *c += 1;
        criterion::black_box(*c)
      })
    })
  });
  group.finish();
}

criterion_group!(
  benches,
  bench_sequential_dispatch,
  bench_nested_sub_steps,
  bench_parallel_fan_out,
  bench_loop_throughput,
  bench_timeouts_on_virtual_clock,
  bench_state_bag_access
);
criterion_main!(benches);
