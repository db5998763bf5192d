use criterion::{Criterion, criterion_group, criterion_main};
use openworkers_snapshot_harness::scenarios;
use openworkers_snapshot_harness::{
    ContextRecipe, ExternalReferenceTable, HarnessConfig, RestoredIsolate, SnapshotCreator,
};

const SCRIPT: &str = r#"
    const routes = { '/': 'home', '/hello': 'Hello, World!' };
    function greet(path) { return routes[path] ?? 'not found'; }
"#;

fn snapshot_benchmarks(c: &mut Criterion) {
    let config = HarnessConfig::default();
    let refs = ExternalReferenceTable::new();

    c.bench_function("create_blob", |b| {
        b.iter(|| {
            let mut creator = SnapshotCreator::new(&config, &refs);
            creator
                .add_context(ContextRecipe::new().script(SCRIPT))
                .unwrap();
            creator.create_blob(config.function_code).unwrap()
        })
    });

    let (context, blob) = scenarios::blob_for_script(&config, Some(SCRIPT)).unwrap();

    c.bench_function("restore_and_call", |b| {
        b.iter(|| {
            let mut isolate = RestoredIsolate::new(&config, blob.clone(), None).unwrap();
            let ctx = isolate.restore_context(context).unwrap();
            isolate.eval(&ctx, "greet('/hello')").unwrap()
        })
    });
}

criterion_group!(benches, snapshot_benchmarks);
criterion_main!(benches);
