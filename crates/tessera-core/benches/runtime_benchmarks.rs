use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tessera_core::{EventService, StripedLocks, WorkspaceRuntimes};
use tessera_runtime::{EngineRegistry, EnvironmentEngine, MockEngine};
use tessera_schema::{parse_workspace_str, Workspace};

fn bench_workspace(id: &str) -> Workspace {
    parse_workspace_str(&format!(
        r#"
id = "{id}"
[config]
name = "bench"
default_env = "dev"
[config.environments.dev.recipe]
type = "mock"
[[config.environments.dev.machines]]
name = "ws"
dev = true
[config.environments.dev.machines.source]
type = "image"
location = "alpine"
[[config.environments.dev.machines]]
name = "db"
[config.environments.dev.machines.source]
type = "image"
location = "postgres"
"#
    ))
    .unwrap()
}

fn runtimes() -> Arc<WorkspaceRuntimes> {
    let engine: Arc<dyn EnvironmentEngine> = Arc::new(MockEngine::new());
    WorkspaceRuntimes::new(EventService::new(), EngineRegistry::new().with(engine))
}

fn bench_start_stop_cycle(c: &mut Criterion) {
    let runtimes = runtimes();
    let ws = bench_workspace("bench-cycle");
    c.bench_function("runtimes_start_stop_cycle", |b| {
        b.iter(|| {
            runtimes.start_new(&ws, "dev").unwrap();
            runtimes.stop(&ws.id).unwrap();
        });
    });
}

fn bench_get_running(c: &mut Criterion) {
    let runtimes = runtimes();
    let ws = bench_workspace("bench-get");
    runtimes.start_new(&ws, "dev").unwrap();
    c.bench_function("runtimes_get_running", |b| {
        b.iter(|| runtimes.get(&ws.id).unwrap());
    });
}

fn bench_contended_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("runtimes_get_contended");
    for threads in [1usize, 4, 8] {
        let runtimes = runtimes();
        let workspaces: Vec<Workspace> = (0..threads)
            .map(|i| bench_workspace(&format!("bench-{i}")))
            .collect();
        for ws in &workspaces {
            runtimes.start_new(ws, "dev").unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, _| {
            b.iter(|| {
                thread::scope(|scope| {
                    for ws in &workspaces {
                        let runtimes = &runtimes;
                        scope.spawn(move || {
                            for _ in 0..100 {
                                runtimes.get(&ws.id).unwrap();
                            }
                        });
                    }
                });
            });
        });
        runtimes.shutdown();
    }
    group.finish();
}

fn bench_stripe_index(c: &mut Criterion) {
    let locks = StripedLocks::<HashMap<String, u32>>::new(16);
    let keys: Vec<String> = (0..1000).map(|i| format!("workspace-{i}")).collect();
    c.bench_function("stripe_index_1000_keys", |b| {
        b.iter(|| keys.iter().map(|k| locks.stripe_index(k)).sum::<usize>());
    });
}

criterion_group!(
    benches,
    bench_start_stop_cycle,
    bench_get_running,
    bench_contended_get,
    bench_stripe_index,
);
criterion_main!(benches);
