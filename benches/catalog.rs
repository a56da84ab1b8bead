// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for the catalog hot paths: argument validation, cache keys,
//! the result cache and filtering.
//!
//! Run with: `cargo bench --bench catalog`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};
use std::hint::black_box;
use std::time::Duration;

use chrono::Utc;
use toolhost::catalog::{
    cache_key, infer_category, CatalogEntry, CatalogFilter, InvocationMetadata,
    InvocationResult, ResultCache,
};
use toolhost::connection::Tool;
use toolhost::rpc::ToolDescriptor;
use toolhost::schema::Schema;
use toolhost::telemetry::CorrelationId;

fn search_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "minLength": 1},
            "limit": {"type": "integer", "minimum": 1, "maximum": 100},
            "filters": {
                "type": "object",
                "properties": {
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "kind": {"type": "string", "enum": ["doc", "code", "issue"]}
                }
            }
        },
        "required": ["query"]
    })
}

fn tool(name: &str, namespace: &str) -> Tool {
    Tool::from_descriptor(
        ToolDescriptor {
            name: name.to_string(),
            description: Some(format!("The {} tool", name)),
            input_schema: search_schema(),
            metadata: Some(json!({"tags": ["bench"]})),
        },
        namespace,
        namespace,
    )
}

fn entries(count: usize) -> Vec<CatalogEntry> {
    const NAMES: &[&str] = &["search_docs", "create_issue", "get_user", "echo", "summarize", "misc"];
    (0..count)
        .map(|i| {
            let t = tool(
                &format!("{}_{}", NAMES[i % NAMES.len()], i),
                &format!("server{}", i % 8),
            );
            let category = infer_category(&t, None);
            CatalogEntry::from_tool(&t, category)
        })
        .collect()
}

/// Benchmark schema compilation and validation.
fn bench_validation(c: &mut Criterion) {
    let raw = search_schema();
    let schema = Schema::from_json_schema(&raw);
    let valid = json!({"query": "rust", "limit": 10, "filters": {"tags": ["a", "b"], "kind": "doc"}});
    let invalid = json!({"limit": 0, "filters": {"kind": "video", "extra": true}});

    let mut group = c.benchmark_group("schema");
    group.bench_function("compile", |b| {
        b.iter(|| Schema::from_json_schema(black_box(&raw)));
    });
    group.bench_function("validate_ok", |b| {
        b.iter(|| schema.validate(black_box(&valid)));
    });
    group.bench_function("validate_errors", |b| {
        b.iter(|| schema.validate(black_box(&invalid)));
    });
    group.finish();
}

/// Benchmark cache key derivation and cache lookups.
fn bench_cache(c: &mut Criterion) {
    let small = json!({"query": "rust"});
    let large = json!({
        "query": "rust async runtime",
        "limit": 50,
        "filters": {"tags": ["a", "b", "c", "d"], "kind": "code"},
        "options": {"highlight": true, "fuzzy": false, "boost": {"title": 2.0, "body": 1.0}}
    });

    let mut group = c.benchmark_group("cache");
    group.bench_function("key_small", |b| {
        b.iter(|| cache_key(black_box("docs:search"), black_box(&small)));
    });
    group.bench_function("key_large", |b| {
        b.iter(|| cache_key(black_box("docs:search"), black_box(&large)));
    });

    let mut cache = ResultCache::new(Duration::from_secs(300), 1000);
    for i in 0..1000 {
        let key = cache_key("docs:search", &json!({"query": i}));
        cache.insert(
            key,
            InvocationResult {
                id: CorrelationId::new(),
                tool_id: "docs:search".to_string(),
                success: true,
                result: Some(json!([{"type": "text", "text": format!("result {}", i)}])),
                error: None,
                execution_time: Duration::from_millis(5),
                timestamp: Utc::now(),
                metadata: InvocationMetadata::default(),
            },
        );
    }
    let hit = cache_key("docs:search", &json!({"query": 500}));
    let miss = cache_key("docs:search", &json!({"query": "absent"}));
    group.bench_function("get_hit", |b| {
        b.iter(|| cache.get(black_box(&hit)));
    });
    group.bench_function("get_miss", |b| {
        b.iter(|| cache.get(black_box(&miss)));
    });
    group.finish();
}

/// Benchmark catalog filtering over growing catalogs.
fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");
    let filters = [
        ("all", CatalogFilter::new()),
        ("namespace", CatalogFilter::new().namespace("server3")),
        ("category", CatalogFilter::new().category("search").available(true)),
        ("search", CatalogFilter::new().search("issue").tag("bench")),
    ];

    for size in [100, 1000] {
        let catalog = entries(size);
        group.throughput(Throughput::Elements(size as u64));
        for (name, filter) in &filters {
            group.bench_with_input(BenchmarkId::new(*name, size), &catalog, |b, catalog| {
                b.iter(|| catalog.iter().filter(|e| filter.matches(e)).count());
            });
        }
    }
    group.finish();
}

/// Benchmark category inference.
fn bench_infer_category(c: &mut Criterion) {
    let tools: Vec<Tool> = ["search_documents", "createIssue", "fetch-user", "format_json", "frobnicate"]
        .iter()
        .map(|n| tool(n, "bench"))
        .collect();

    c.bench_function("infer_category", |b| {
        b.iter(|| {
            for t in &tools {
                black_box(infer_category(black_box(t), None));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_validation,
    bench_cache,
    bench_filter,
    bench_infer_category
);
criterion_main!(benches);
