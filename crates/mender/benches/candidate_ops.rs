//! Candidate Operations Benchmarks
//!
//! Benchmarks for candidate generation, fingerprint scoring and literal rewriting.
//!
//! Run with: `cargo bench --bench candidate_ops`

#![allow(clippy::unwrap_used)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mender::element::NodeDescriptor;
use mender::updater::replace_literals;
use mender::{CandidateGenerator, ElementInfo, FingerprintStore, Locator};
use std::collections::BTreeMap;

fn sample_element(i: usize) -> ElementInfo {
    ElementInfo::new("button")
        .with_attr("id", format!("submit-{i}"))
        .with_attr("data-testid", format!("checkout-submit-{i}"))
        .with_attr("class", "btn btn-primary")
        .with_attr("aria-label", "Place order")
        .with_text("Place order")
        .with_ancestors(vec![
            NodeDescriptor::new("form").with_id("checkout"),
            NodeDescriptor::new("main"),
            NodeDescriptor::new("body"),
        ])
        .with_path(format!("html > body > main > form > button:nth-of-type({})", i % 4 + 1))
}

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("candidate_generation");
    let store = FingerprintStore::new();
    let element = sample_element(1);
    let fingerprint = store.create(&element).unwrap();
    let original = Locator::id("submit-0");

    for max in [3, 10, 25] {
        let generator = CandidateGenerator::new(max);
        group.bench_with_input(BenchmarkId::from_parameter(max), &generator, |bench, g| {
            bench.iter(|| {
                let candidates = g.generate(
                    black_box(Some(&fingerprint)),
                    black_box(&element),
                    Some(&original),
                );
                black_box(candidates);
            });
        });
    }

    group.finish();
}

fn bench_match_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint_best_match");
    let store = FingerprintStore::new();
    let fingerprint = store.create(&sample_element(7)).unwrap();

    for count in [10, 100, 1000] {
        let nodes: Vec<ElementInfo> = (0..count).map(sample_element).collect();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{count}_nodes")),
            &nodes,
            |bench, nodes| {
                bench.iter(|| {
                    let best = FingerprintStore::best_match(black_box(nodes), &fingerprint, 0.45);
                    black_box(best.map(|(_, score)| score));
                });
            },
        );
    }

    group.finish();
}

fn bench_replace_literals(c: &mut Criterion) {
    let mut group = c.benchmark_group("replace_literals");
    let replacements = BTreeMap::from([("id=submit-3".to_string(), "id=submit-4".to_string())]);

    for steps in [10, 100, 1000] {
        let script: String = (0..steps)
            .map(|i| format!("  await page.locator(\"id=submit-{}\").click();\n", i % 8))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(steps), &script, |bench, s| {
            bench.iter(|| black_box(replace_literals(black_box(s), &replacements)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_generate, bench_match_score, bench_replace_literals);
criterion_main!(benches);
