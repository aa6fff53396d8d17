//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 모듈 접두어: `collector_`, `rule_loader_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 처리 결과 레이블 키 (accepted, duplicate, dropped_*)
pub const LABEL_STATUS: &str = "status";

/// 정제 패턴 레이블 키
pub const LABEL_PATTERN: &str = "pattern";

/// 중복 제거 결과 레이블 키 (fresh, duplicate)
pub const LABEL_RESULT: &str = "result";

/// 에러 분류 레이블 키 (transient, permanent, queue, backup)
pub const LABEL_KIND: &str = "kind";

// ─── 레이블 값 상수 ────────────────────────────────────────────────

/// 처리 결과: 수락됨
pub const STATUS_ACCEPTED: &str = "accepted";
/// 처리 결과: 중복으로 억제됨
pub const STATUS_DUPLICATE: &str = "duplicate";
/// 처리 결과: 유효성 검사 실패
pub const STATUS_DROPPED_INVALID: &str = "dropped_invalid";
/// 처리 결과: 재검사에서 잔존 패턴 검출
pub const STATUS_DROPPED_LEAK: &str = "dropped_leak";
/// 처리 결과: 역압으로 드롭됨
pub const STATUS_DROPPED_BACKPRESSURE: &str = "dropped_backpressure";
/// 처리 결과: 경로 필터로 건너뜀
pub const STATUS_FILTERED: &str = "filtered";
/// 처리 결과: 큐 적재 실패로 드롭됨
pub const STATUS_DROPPED_QUEUE: &str = "dropped_queue";
/// 처리 결과: 메시지 데드라인 초과
pub const STATUS_DROPPED_TIMEOUT: &str = "dropped_timeout";
/// 처리 결과: 디코드 불가 프레임
pub const STATUS_DROPPED_MALFORMED: &str = "dropped_malformed";

/// 설치 결과: 성공
pub const STATUS_SUCCESS: &str = "success";
/// 설치 결과: 데드레터로 이동
pub const STATUS_DEAD_LETTER: &str = "dead_letter";

// ─── Collector 메트릭 ──────────────────────────────────────────────

/// Collector: 수신한 캡처 레코드 수 (counter, label: status)
pub const COLLECTOR_REQUESTS_TOTAL: &str = "collector_requests_total";

/// Collector: 레코드 처리 지연 시간 (histogram, 초)
pub const COLLECTOR_REQUEST_DURATION_SECONDS: &str = "collector_request_duration_seconds";

/// Collector: 패턴별 치환 횟수 (counter, label: pattern)
pub const COLLECTOR_SANITIZATION_OPERATIONS_TOTAL: &str =
    "collector_sanitization_operations_total";

/// Collector: 중복 제거 관측 수 (counter, label: result)
pub const COLLECTOR_DEDUPLICATION_OPERATIONS_TOTAL: &str =
    "collector_deduplication_operations_total";

/// Collector: 스테이징 채널 점유량 (gauge)
pub const COLLECTOR_QUEUE_DEPTH: &str = "collector_queue_depth";

/// Collector: 재검사에서 잔존 패턴이 검출된 레코드 수 (counter)
pub const COLLECTOR_SANITIZER_LEAKS_TOTAL: &str = "collector_sanitizer_leaks_total";

/// Collector: 크기 제한으로 잘린 본문 수 (counter)
pub const COLLECTOR_BODIES_TRUNCATED_TOTAL: &str = "collector_bodies_truncated_total";

// ─── Rule Loader 메트릭 ────────────────────────────────────────────

/// Rule Loader: 처리한 descriptor 수 (counter, label: status)
pub const RULE_LOADER_MAPPINGS_PROCESSED_TOTAL: &str = "rule_loader_mappings_processed_total";

/// Rule Loader: 설치 소요 시간 (histogram, 초)
pub const RULE_LOADER_INSTALL_DURATION_SECONDS: &str = "rule_loader_install_duration_seconds";

/// Rule Loader: 에러 수 (counter, label: kind)
pub const RULE_LOADER_ERRORS_TOTAL: &str = "rule_loader_errors_total";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 레코드 처리 지연 시간 히스토그램 버킷 (초)
///
/// 100us ~ 10s 범위, 로그 단위 분포
pub const PROCESSING_DURATION_BUCKETS: [f64; 10] = [
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 10.0,
];

/// 설치 소요 시간 히스토그램 버킷 (초)
///
/// 10ms ~ 30s 범위 (원격 HTTP 호출 + 재시도 포함)
pub const INSTALL_DURATION_BUCKETS: [f64; 9] =
    [0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// `metrics::describe_counter!()`, `describe_gauge!()`, `describe_histogram!()`을
/// 호출하여 Prometheus HELP 텍스트를 설정합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `mockbridge-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Collector
    describe_counter!(
        COLLECTOR_REQUESTS_TOTAL,
        "Total number of capture records received, by processing status"
    );
    describe_histogram!(
        COLLECTOR_REQUEST_DURATION_SECONDS,
        "Time to process a single capture record in seconds"
    );
    describe_counter!(
        COLLECTOR_SANITIZATION_OPERATIONS_TOTAL,
        "Total number of substitutions performed per sanitize pattern"
    );
    describe_counter!(
        COLLECTOR_DEDUPLICATION_OPERATIONS_TOTAL,
        "Total number of fingerprint observations, by result"
    );
    describe_gauge!(
        COLLECTOR_QUEUE_DEPTH,
        "Current number of descriptors waiting in the staging channel"
    );
    describe_counter!(
        COLLECTOR_SANITIZER_LEAKS_TOTAL,
        "Total number of records dropped because the post-sanitization re-scan still matched"
    );
    describe_counter!(
        COLLECTOR_BODIES_TRUNCATED_TOTAL,
        "Total number of bodies truncated at the ingress size limit"
    );

    // Rule Loader
    describe_counter!(
        RULE_LOADER_MAPPINGS_PROCESSED_TOTAL,
        "Total number of descriptors drained from the queue, by outcome"
    );
    describe_histogram!(
        RULE_LOADER_INSTALL_DURATION_SECONDS,
        "Time to install a single rule on the mock server in seconds"
    );
    describe_counter!(
        RULE_LOADER_ERRORS_TOTAL,
        "Total number of rule loader errors, by kind"
    );
}
