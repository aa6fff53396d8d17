//! 정제 벤치마크
//!
//! 패턴 적용과 재검사를 포함한 레코드당 정제 비용을 측정합니다.

use std::collections::BTreeMap;
use std::time::SystemTime;

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use mockbridge_collector::config::CollectorConfig;
use mockbridge_collector::sanitize::{PatternCatalog, Sanitizer};
use mockbridge_core::types::{CaptureRecord, Direction, RequestRecord, ResponseRecord};

fn sanitizer() -> Sanitizer {
    Sanitizer::new(PatternCatalog::from_config(&CollectorConfig::default()).unwrap())
}

fn capture_with_body(body: &[u8]) -> CaptureRecord {
    let mut headers = BTreeMap::new();
    headers.insert(
        "authorization".to_owned(),
        vec!["Bearer eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiJqb2huIn0.sig".to_owned()],
    );
    headers.insert(
        "content-type".to_owned(),
        vec!["application/json".to_owned()],
    );

    CaptureRecord {
        direction: Direction::Inbound,
        request: RequestRecord {
            method: "POST".to_owned(),
            path: "/v1/payments".to_owned(),
            query: BTreeMap::new(),
            headers,
            body: Bytes::copy_from_slice(body),
            body_truncated: false,
        },
        response: ResponseRecord {
            status: 200,
            headers: BTreeMap::new(),
            body: Bytes::from_static(br#"{"status":"approved"}"#),
            body_truncated: false,
        },
        observed_at: SystemTime::now(),
        source_labels: BTreeMap::new(),
    }
}

fn bench_clean_json_body(c: &mut Criterion) {
    let s = sanitizer();
    let record = capture_with_body(br#"{"order_id":"A-1001","amount":10,"currency":"BRL"}"#);

    c.bench_function("sanitize_clean_json_body", |b| {
        b.iter(|| black_box(s.sanitize(black_box(&record))))
    });
}

fn bench_sensitive_json_body(c: &mut Criterion) {
    let s = sanitizer();
    let record = capture_with_body(
        br#"{"card":"4111111111111111","email":"john.doe@example.com","password":"hunter2","amount":10}"#,
    );

    c.bench_function("sanitize_sensitive_json_body", |b| {
        b.iter(|| black_box(s.sanitize(black_box(&record))))
    });
}

fn bench_body_size_scaling(c: &mut Criterion) {
    let s = sanitizer();
    let mut group = c.benchmark_group("sanitize_body_size");

    for size in [256usize, 1024, 4096, 8192] {
        let filler = "x".repeat(size);
        let body = format!(r#"{{"data":"{filler}","contact":"a@b.com"}}"#);
        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &body, |b, body| {
            let record = capture_with_body(body.as_bytes());
            b.iter(|| black_box(s.sanitize(black_box(&record))))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_clean_json_body,
    bench_sensitive_json_body,
    bench_body_size_scaling
);
criterion_main!(benches);
