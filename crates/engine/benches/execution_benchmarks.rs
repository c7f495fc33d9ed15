//! Command Execution Benchmarks
//!
//! Measures single-writer command throughput and snapshot reconstruction.
//! Targets:
//! - Value changes on one object: >20K commands/sec
//! - Model snapshot at a cached point: <50us

use arbor_core::{ActorId, Address, AtomicCommand, Command, CommandKind, Value};
use arbor_engine::{Engine, EngineConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn forced(address: &str, kind: CommandKind) -> Command {
    AtomicCommand::forced(address.parse().unwrap(), kind)
        .unwrap()
        .into()
}

/// Engine with /bench/m holding `objects` objects, each with one field
fn populated(objects: usize) -> Engine {
    let engine = Engine::in_memory(EngineConfig::default()).unwrap();
    let actor = ActorId::from("bench");
    engine
        .execute_command(&forced("/bench/m", CommandKind::AddModel), &actor)
        .unwrap();
    for i in 0..objects {
        let object = format!("/bench/m/o{}", i);
        engine
            .execute_command(&forced(&object, CommandKind::AddObject), &actor)
            .unwrap();
        engine
            .execute_command(&forced(&format!("{}/f", object), CommandKind::AddField), &actor)
            .unwrap();
    }
    engine
}

/// Benchmark: repeated value changes on one field
fn bench_change_value(c: &mut Criterion) {
    let engine = populated(1);
    let actor = ActorId::from("bench");

    let mut group = c.benchmark_group("execute");
    group.throughput(Throughput::Elements(1));
    group.bench_function("change_value", |b| {
        let mut i = 0i64;
        b.iter(|| {
            let command = forced("/bench/m/o0/f", CommandKind::ChangeValue(Value::Int(i)));
            black_box(engine.execute_command(&command, &actor).unwrap());
            i += 1;
        });
    });
    group.bench_function("forced_no_change", |b| {
        let command = forced("/bench/m/o0", CommandKind::AddObject);
        b.iter(|| black_box(engine.execute_command(&command, &actor).unwrap()));
    });
    group.finish();
}

/// Benchmark: model snapshot reconstruction by size
fn bench_model_snapshot(c: &mut Criterion) {
    let model: Address = "/bench/m".parse().unwrap();
    let mut group = c.benchmark_group("snapshot");
    for objects in [10, 100] {
        let engine = populated(objects);
        group.bench_with_input(BenchmarkId::new("current", objects), &objects, |b, _| {
            b.iter(|| black_box(engine.get_model_snapshot(&model, None).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_change_value, bench_model_snapshot);
criterion_main!(benches);
