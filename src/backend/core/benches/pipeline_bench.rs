//! Pipeline benchmarks. Run with: cargo bench --bench pipeline_bench
use axum::http::Method;
use bastion_core::pipeline::{CsrfMode, PipelineConfig, RawRequest, RequestPipeline, RoutePolicy};
use bastion_core::security::events::Redaction;
use bastion_core::security::{CsrfConfig, CsrfManager, PatternDetector, RateLimiter, Sanitizer, SecurityEventLogger};
use bastion_core::validation::schemas;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const BENIGN: &str = "Hello, world! Price: $5.00. Looking forward to the design review on Friday.";
const HOSTILE: &str = "<script>alert(document.cookie)</script><img src=x onerror=alert(1)>'; DROP TABLE users; --";

fn pipeline() -> RequestPipeline {
    let events = Arc::new(SecurityEventLogger::new(Redaction::Omit));
    let csrf = Arc::new(CsrfManager::new(CsrfConfig::with_secret("0123456789abcdef0123456789abcdef"), events.clone()).unwrap());
    RequestPipeline::new(Arc::new(RateLimiter::new()), csrf, events, PipelineConfig::default())
}

fn bench_detector(c: &mut Criterion) {
    let mut g = c.benchmark_group("detector");
    let detector = PatternDetector::new();
    g.bench_function("scan_benign", |b| b.iter(|| black_box(detector.scan(black_box(BENIGN)))));
    g.bench_function("scan_hostile", |b| b.iter(|| black_box(detector.scan(black_box(HOSTILE)))));
    g.bench_function("first_threat_hostile", |b| b.iter(|| black_box(detector.first_threat(black_box(HOSTILE)))));
    for &len in &[64usize, 1_024, 10_000] {
        let input = "a".repeat(len);
        g.throughput(Throughput::Bytes(len as u64));
        g.bench_with_input(BenchmarkId::new("is_threat_len", len), &input, |b, s| b.iter(|| black_box(detector.is_threat(s))));
    }
    g.finish();
}

fn bench_sanitizer(c: &mut Criterion) {
    let mut g = c.benchmark_group("sanitizer");
    let sanitizer = Sanitizer::new();
    g.bench_function("filter_benign", |b| b.iter(|| black_box(sanitizer.filter(black_box(BENIGN)))));
    g.bench_function("filter_hostile", |b| b.iter(|| black_box(sanitizer.filter(black_box(HOSTILE)))));
    let tree = json!({"name": HOSTILE, "document": {"children": (0..50).map(|i| json!({"name": format!("Frame {} <b>x</b>", i)})).collect::<Vec<Value>>()}});
    g.bench_function("sanitize_json_50_nodes", |b| b.iter(|| black_box(sanitizer.sanitize_json(tree.clone()))));
    g.finish();
}

fn bench_validation(c: &mut Criterion) {
    let mut g = c.benchmark_group("validation");
    let valid = json!({"email": "user@example.com", "password": "Sup3rSecret!", "confirmPassword": "Sup3rSecret!", "displayName": "Ada"});
    let invalid = json!({"email": "nope", "password": "short", "confirmPassword": "other"});
    g.bench_function("signup_valid", |b| b.iter(|| black_box(schemas::signup().validate(black_box(&valid)))));
    g.bench_function("signup_invalid", |b| b.iter(|| black_box(schemas::signup().validate(black_box(&invalid)))));
    g.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut g = c.benchmark_group("pipeline");
    g.measurement_time(Duration::from_secs(8));
    let pipeline = pipeline();
    let policy = RoutePolicy::unlimited().csrf(CsrfMode::Never);
    let clean = json!({"name": "Ada Lovelace", "email": "ada@example.com", "message": BENIGN});
    let hostile = json!({"name": "Ada", "email": "ada@example.com", "message": HOSTILE});
    g.bench_function("contact_clean", |b| {
        b.iter(|| black_box(pipeline.process(RawRequest::new(Method::POST, "/api/contact", clean.clone()), Some(schemas::contact()), &policy)))
    });
    g.bench_function("contact_hostile", |b| {
        b.iter(|| black_box(pipeline.process(RawRequest::new(Method::POST, "/api/contact", hostile.clone()), Some(schemas::contact()), &policy)))
    });
    let limited = RoutePolicy::new("general").csrf(CsrfMode::Never);
    g.bench_function("rate_limited_clean", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let raw = RawRequest::new(Method::POST, "/api/contact", clean.clone()).with_client_ip(format!("10.0.{}.{}", (i >> 8) & 0xff, i & 0xff));
            black_box(pipeline.process(raw, Some(schemas::contact()), &limited))
        })
    });
    g.finish();
}

criterion_group!(benches, bench_detector, bench_sanitizer, bench_validation, bench_pipeline);
criterion_main!(benches);
