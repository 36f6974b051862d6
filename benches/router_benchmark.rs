use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use mvcframe::controller::ControllerRegistry;
use mvcframe::router::{RerouteTable, Router};

fn chained_table(length: usize) -> RerouteTable {
    let mut routes = BTreeMap::new();
    for i in 0..length {
        routes.insert(format!("hop{}", i), format!("hop{}/step", i + 1));
    }
    routes.insert(format!("hop{}", length), "auth/login".to_string());
    RerouteTable::new(routes).unwrap()
}

fn route_split_benchmark(c: &mut Criterion) {
    let router = Router::new("/", RerouteTable::default());
    let paths = [
        "/",
        "/users",
        "/users/5",
        "/users/edit/7?tab=profile",
        "/users/5/a/b/c/d",
    ];

    c.bench_function("route_split", |b| {
        b.iter(|| {
            for path in paths.iter() {
                let _ = router.route(black_box(path));
            }
        });
    });
}

fn reroute_chain_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("reroute_chain");

    for length in [1, 8, 32].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(length), length, |b, &length| {
            let router = Router::new("/", chained_table(length));
            b.iter(|| {
                let route = router.route(black_box("/hop0")).unwrap();
                black_box(route);
            });
        });
    }

    group.finish();
}

fn route_validate_benchmark(c: &mut Criterion) {
    let router = Router::new("/", RerouteTable::default());
    let registry = ControllerRegistry::with_defaults().unwrap();

    c.bench_function("route_validate", |b| {
        b.iter(|| {
            let mut route = router.route(black_box("/auth/login")).unwrap();
            black_box(registry.validate(&mut route));
        });
    });
}

criterion_group!(
    benches,
    route_split_benchmark,
    reroute_chain_benchmark,
    route_validate_benchmark
);
criterion_main!(benches);
