//! Benchmarks for the lookup path.
//!
//! Run with: `cargo bench -p httpse-core`

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use httpse_core::store::{build_snapshot, Snapshot};
use httpse_core::{HostRules, HttpsUpgradeService, MemoryRuleSource, RuleDef, ServiceConfig};

fn build_rules(host_count: usize) -> Vec<HostRules> {
    (0..host_count)
        .map(|i| {
            HostRules::new(
                format!("*.domain{i}.com"),
                vec![
                    RuleDef::new("^http://www\\.", "https://www.").with_exclusion("/insecure/"),
                    RuleDef::new("^http:", "https:"),
                ],
            )
        })
        .collect()
}

fn bench_snapshot_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_find_ruleset");
    for count in [100, 10_000] {
        let snapshot = Snapshot::load(build_snapshot(&build_rules(count))).expect("valid snapshot");
        group.bench_with_input(BenchmarkId::from_parameter(count), &snapshot, |b, snapshot| {
            b.iter(|| black_box(snapshot.find_ruleset(black_box("*.domain42.com"))))
        });
    }
    group.finish();
}

fn bench_service(c: &mut Criterion) {
    let config = ServiceConfig {
        cache_capacity: 0,
        ..ServiceConfig::default()
    };
    let uncached = HttpsUpgradeService::with_source(config, MemoryRuleSource::new(build_rules(1000)))
        .expect("valid config");
    let cached = HttpsUpgradeService::with_source(
        ServiceConfig::default(),
        MemoryRuleSource::new(build_rules(1000)),
    )
    .expect("valid config");

    let mut group = c.benchmark_group("get_https_url");
    group.bench_function("uncached_match", |b| {
        b.iter(|| {
            let out = uncached.get_https_url(black_box("http://www.domain42.com/path?q=1"), 1);
            uncached.request_completed(1);
            black_box(out)
        })
    });
    group.bench_function("uncached_miss", |b| {
        b.iter(|| black_box(uncached.get_https_url(black_box("http://a.b.unknown.net/"), 0)))
    });
    group.bench_function("cache_hit", |b| {
        b.iter(|| {
            let out = cached.get_https_url(black_box("http://www.domain42.com/path?q=1"), 2);
            cached.request_completed(2);
            black_box(out)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_snapshot_lookup, bench_service);
criterion_main!(benches);
