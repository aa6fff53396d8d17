//! 파이프라인 오케스트레이션 -- 수신/정제/중복 제거/적재의 전체 흐름
//!
//! [`CollectorPipeline`]은 core의 [`Pipeline`] trait을 구현하여
//! `mockbridge-daemon`에서 다른 모듈과 동일한 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! IngestServer -> Processor(sanitize -> fingerprint -> dedup) -> staging mpsc -> enqueue workers -> Queue
//! ```
//!
//! 수락(ack)은 스테이징 적재 성공 시점에 낙관적으로 반환됩니다.
//! 사이드카에서 큐까지는 의도된 at-most-once입니다: 캡처는 샘플링된
//! 관측이지 트랜잭션이 아니므로 유실을 허용합니다.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mockbridge_core::error::{MockBridgeError, PipelineError};
use mockbridge_core::metrics::{
    COLLECTOR_BODIES_TRUNCATED_TOTAL, COLLECTOR_DEDUPLICATION_OPERATIONS_TOTAL,
    COLLECTOR_QUEUE_DEPTH, COLLECTOR_REQUEST_DURATION_SECONDS, COLLECTOR_REQUESTS_TOTAL,
    COLLECTOR_SANITIZATION_OPERATIONS_TOTAL, COLLECTOR_SANITIZER_LEAKS_TOTAL, LABEL_PATTERN,
    LABEL_RESULT, LABEL_STATUS, STATUS_ACCEPTED, STATUS_DROPPED_BACKPRESSURE,
    STATUS_DROPPED_INVALID, STATUS_DROPPED_LEAK, STATUS_DROPPED_QUEUE, STATUS_DUPLICATE,
    STATUS_FILTERED,
};
use mockbridge_core::pipeline::{HealthStatus, Pipeline};
use mockbridge_core::types::{
    BodyContent, BodyPredicate, Fingerprint, MockRuleDescriptor, RuleMatch, RuleMetadata,
    RuleResponse, SanitizedCapture,
};
use mockbridge_queue::{QueueError, RuleQueue};

use crate::config::CollectorConfig;
use crate::dedup::{Deduplicator, Observation};
use crate::error::CollectorError;
use crate::fingerprint;
use crate::ingest::proto::{TapAck, TapCapture};
use crate::ingest::server::IngestServer;
use crate::sanitize::{PatternCatalog, SanitizeOutcome, Sanitizer};

/// descriptor를 받아주는 싱크
///
/// 운영 환경에서는 [`RuleQueue`]가 유일한 구현이며, 테스트에서는
/// 인메모리 구현으로 대체합니다. 재시도는 싱크 내부의 책임입니다.
pub trait DescriptorSink: Clone + Send + Sync + 'static {
    /// descriptor 하나를 적재합니다.
    fn push(
        &self,
        descriptor: &MockRuleDescriptor,
    ) -> impl Future<Output = Result<(), QueueError>> + Send;
}

impl DescriptorSink for RuleQueue {
    async fn push(&self, descriptor: &MockRuleDescriptor) -> Result<(), QueueError> {
        RuleQueue::push(self, descriptor).await
    }
}

/// 레코드 한 건에 대한 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestAck {
    /// 수용 여부
    pub accepted: bool,
    /// 중복으로 억제되었는지 여부
    pub duplicate: bool,
    /// 드롭 사유 (수용/중복이면 None)
    pub dropped_reason: Option<String>,
}

impl IngestAck {
    /// 수용 ack를 만듭니다.
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            duplicate: false,
            dropped_reason: None,
        }
    }

    /// 중복 ack를 만듭니다.
    pub fn duplicate() -> Self {
        Self {
            accepted: false,
            duplicate: true,
            dropped_reason: None,
        }
    }

    /// 드롭 ack를 만듭니다.
    pub fn dropped(reason: &str) -> Self {
        Self {
            accepted: false,
            duplicate: false,
            dropped_reason: Some(reason.to_owned()),
        }
    }

    /// 와이어 표현으로 변환합니다.
    pub fn to_wire(&self) -> TapAck {
        TapAck {
            accepted: self.accepted,
            duplicate: self.duplicate,
            dropped_reason: self.dropped_reason.clone().unwrap_or_default(),
        }
    }

    fn status_label(&self) -> &'static str {
        if self.accepted {
            return STATUS_ACCEPTED;
        }
        if self.duplicate {
            return STATUS_DUPLICATE;
        }
        match self.dropped_reason.as_deref() {
            Some("leak") => STATUS_DROPPED_LEAK,
            Some("backpressure") => STATUS_DROPPED_BACKPRESSURE,
            Some("filtered") => STATUS_FILTERED,
            _ => STATUS_DROPPED_INVALID,
        }
    }
}

/// 레코드 단위 처리기
///
/// 수신 핸들러의 워커에서 호출됩니다. 정제와 중복 제거는 여기서
/// 동기적으로 수행되며, 유일한 대기 지점은 스테이징 채널 전송입니다.
pub struct Processor {
    sanitizer: Arc<Sanitizer>,
    dedup: Arc<Deduplicator>,
    staging_tx: mpsc::Sender<MockRuleDescriptor>,
    staging_depth: Arc<AtomicUsize>,
    config: CollectorConfig,
}

impl Processor {
    pub(crate) fn new(
        sanitizer: Arc<Sanitizer>,
        dedup: Arc<Deduplicator>,
        staging_tx: mpsc::Sender<MockRuleDescriptor>,
        staging_depth: Arc<AtomicUsize>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            sanitizer,
            dedup,
            staging_tx,
            staging_depth,
            config,
        }
    }

    /// 캡처 메시지 하나를 처리하고 ack를 반환합니다.
    pub async fn process(&self, message: TapCapture) -> IngestAck {
        let start = Instant::now();
        let ack = self.process_inner(message).await;

        metrics::histogram!(COLLECTOR_REQUEST_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        metrics::counter!(COLLECTOR_REQUESTS_TOTAL, LABEL_STATUS => ack.status_label())
            .increment(1);
        ack
    }

    async fn process_inner(&self, message: TapCapture) -> IngestAck {
        // 1. 형태 검증 + 본문 크기 제한
        let record = match crate::ingest::proto::decode_capture(message, self.config.max_body_bytes)
        {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "capture record rejected");
                return IngestAck::dropped("invalid");
            }
        };

        if record.request.body_truncated || record.response.body_truncated {
            metrics::counter!(COLLECTOR_BODIES_TRUNCATED_TOTAL).increment(1);
            warn!(path = %record.request.path, "body truncated at ingress limit");
        }

        // 경로 필터: 헬스체크류 트래픽은 정제 이전에 건너뜀
        if self
            .config
            .ignored_path_prefixes
            .iter()
            .any(|prefix| record.request.path.starts_with(prefix.as_str()))
        {
            return IngestAck::dropped("filtered");
        }

        // 2. 정제 -- 재검사 실패 시 레코드 폐기
        let sanitized = match self.sanitizer.sanitize(&record) {
            SanitizeOutcome::Clean(sanitized) => *sanitized,
            SanitizeOutcome::Leak { pattern } => {
                metrics::counter!(COLLECTOR_SANITIZER_LEAKS_TOTAL).increment(1);
                warn!(pattern = %pattern, "post-sanitization re-scan matched, record dropped");
                return IngestAck::dropped("leak");
            }
        };
        for (pattern, count) in &sanitized.sanitization_report {
            metrics::counter!(
                COLLECTOR_SANITIZATION_OPERATIONS_TOTAL,
                LABEL_PATTERN => pattern.clone()
            )
            .increment(*count);
        }

        // 3. 핑거프린트 + 중복 제거
        let fingerprint = fingerprint::compute(&sanitized, self.config.dedup_body_limit);
        let observation = self.dedup.observe(&fingerprint);
        metrics::counter!(
            COLLECTOR_DEDUPLICATION_OPERATIONS_TOTAL,
            LABEL_RESULT => observation.as_label()
        )
        .increment(1);

        if observation == Observation::Duplicate {
            debug!(fingerprint = %fingerprint.short(), "duplicate capture suppressed");
            return IngestAck::duplicate();
        }

        // 4. descriptor 구성 후 스테이징 적재 (유계 대기)
        // 깊이는 send 전에 올립니다: 워커가 send 직후 바로 꺼내 내리는
        // 경우에도 카운터가 음수로 감기지 않게 하기 위함입니다.
        let descriptor = build_descriptor(sanitized, fingerprint);
        self.staging_depth.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!(COLLECTOR_QUEUE_DEPTH).increment(1.0);
        match self
            .staging_tx
            .send_timeout(descriptor, self.config.enqueue_timeout)
            .await
        {
            Ok(()) => {
                debug!(fingerprint = %fingerprint.short(), "descriptor staged");
                IngestAck::accepted()
            }
            Err(_) => {
                self.staging_depth.fetch_sub(1, Ordering::Relaxed);
                metrics::gauge!(COLLECTOR_QUEUE_DEPTH).decrement(1.0);
                warn!(
                    fingerprint = %fingerprint.short(),
                    "staging full past deadline, record dropped"
                );
                IngestAck::dropped("backpressure")
            }
        }
    }
}

/// 정제된 캡처를 큐 페이로드로 변환합니다.
///
/// 쿼리 값은 정렬되어 매칭 블록이 핑거프린트와 같은 정규형을 공유합니다.
fn build_descriptor(capture: SanitizedCapture, fingerprint: Fingerprint) -> MockRuleDescriptor {
    let mut query = capture.query;
    for values in query.values_mut() {
        values.sort();
    }

    let body_predicate = if capture.request_body.truncated {
        BodyPredicate::Any
    } else {
        match capture.request_body.content {
            BodyContent::Empty => BodyPredicate::Any,
            BodyContent::Json(value) => BodyPredicate::EqualToJson { value },
            BodyContent::Text(value) => BodyPredicate::EqualTo { value },
        }
    };

    MockRuleDescriptor {
        fingerprint,
        rule_match: RuleMatch {
            method: capture.method,
            path: capture.path,
            query,
            body_predicate,
        },
        response: RuleResponse {
            status: capture.status,
            headers: capture.response_headers,
            body: capture.response_body.content,
        },
        metadata: RuleMetadata {
            observed_at: capture.observed_at,
            source_labels: capture.source_labels,
            sanitization_report: capture.sanitization_report,
        },
    }
}

/// 파이프라인 실행 상태
#[derive(Debug, Clone, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// Collector 파이프라인
///
/// core의 `Pipeline` trait을 구현하여 `mockbridge-daemon`에서
/// 다른 모듈과 동일한 생명주기(start/stop/health_check)로 관리됩니다.
pub struct CollectorPipeline<S: DescriptorSink> {
    config: CollectorConfig,
    state: PipelineState,
    sanitizer: Arc<Sanitizer>,
    dedup: Arc<Deduplicator>,
    sink: S,
    /// 수신 서버/연결 핸들러용 취소 토큰
    ingest_cancel: CancellationToken,
    /// 적재 워커용 취소 토큰 (플러시 데드라인 이후에만 발화)
    worker_cancel: CancellationToken,
    processor: Option<Arc<Processor>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    staging_depth: Arc<AtomicUsize>,
    push_failures: Arc<AtomicU64>,
    local_addr: Option<SocketAddr>,
}

impl<S: DescriptorSink> CollectorPipeline<S> {
    /// 실제 바인드된 수신 주소를 반환합니다 (시작 이후).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// 현재 상태 이름을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    /// 스테이징 채널에 대기 중인 descriptor 수를 반환합니다.
    pub fn staging_depth(&self) -> usize {
        self.staging_depth.load(Ordering::Relaxed)
    }
}

impl<S: DescriptorSink> Pipeline for CollectorPipeline<S> {
    async fn start(&mut self) -> Result<(), MockBridgeError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!("starting collector pipeline");

        let listener = TcpListener::bind(&self.config.ingest_listen_addr)
            .await
            .map_err(|e| {
                PipelineError::InitFailed(format!(
                    "failed to bind {}: {e}",
                    self.config.ingest_listen_addr
                ))
            })?;
        self.local_addr = listener.local_addr().ok();

        self.ingest_cancel = CancellationToken::new();
        self.worker_cancel = CancellationToken::new();
        self.staging_depth.store(0, Ordering::Relaxed);
        self.push_failures.store(0, Ordering::Relaxed);

        let (staging_tx, staging_rx) = mpsc::channel(self.config.staging_channel_depth);
        let processor = Arc::new(Processor::new(
            Arc::clone(&self.sanitizer),
            Arc::clone(&self.dedup),
            staging_tx,
            Arc::clone(&self.staging_depth),
            self.config.clone(),
        ));
        self.processor = Some(Arc::clone(&processor));

        // 수신 서버 태스크
        let server = IngestServer::new(
            processor,
            self.config.max_connections,
            self.config.message_deadline,
            self.ingest_cancel.clone(),
        );
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = server.run(listener).await {
                error!(error = %e, "tap ingest server exited with error");
            }
        }));

        // 적재 워커 태스크
        let staging_rx = Arc::new(Mutex::new(staging_rx));
        for worker_id in 0..self.config.enqueue_workers {
            let staging_rx = Arc::clone(&staging_rx);
            let sink = self.sink.clone();
            let staging_depth = Arc::clone(&self.staging_depth);
            let push_failures = Arc::clone(&self.push_failures);
            let cancel = self.worker_cancel.clone();
            self.tasks.push(tokio::spawn(enqueue_worker(
                worker_id,
                staging_rx,
                sink,
                staging_depth,
                push_failures,
                cancel,
            )));
        }

        self.state = PipelineState::Running;
        info!(
            listen_addr = ?self.local_addr,
            workers = self.config.enqueue_workers,
            "collector pipeline started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), MockBridgeError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping collector pipeline");

        // 1. 새 레코드 수신 중단
        self.ingest_cancel.cancel();

        // 2. 스테이징 채널 닫기 (processor를 내려놓아 송신측을 드롭)
        self.processor = None;

        // 3. 유계 데드라인 안에서 스테이징 플러시
        let deadline = Instant::now() + self.config.flush_deadline;
        while self.staging_depth.load(Ordering::Relaxed) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let remaining = self.staging_depth.load(Ordering::Relaxed);
        if remaining > 0 {
            warn!(remaining, "flush deadline reached with records still staged");
        }

        // 4. 진행 중인 큐 적재 취소, 워커 종료
        self.worker_cancel.cancel();
        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                abort.abort();
            }
        }

        self.staging_depth.store(0, Ordering::Relaxed);
        metrics::gauge!(COLLECTOR_QUEUE_DEPTH).set(0.0);
        self.local_addr = None;
        self.state = PipelineState::Stopped;
        info!("collector pipeline stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                if self.push_failures.load(Ordering::Relaxed) > 0 {
                    return HealthStatus::Degraded("queue push retries exhausted".to_owned());
                }
                let depth = self.staging_depth.load(Ordering::Relaxed);
                if depth * 10 >= self.config.staging_channel_depth * 9 {
                    return HealthStatus::Degraded(format!(
                        "staging nearly full: {depth}/{}",
                        self.config.staging_channel_depth
                    ));
                }
                HealthStatus::Healthy
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 스테이징 채널을 큐로 비우는 워커
async fn enqueue_worker<S: DescriptorSink>(
    worker_id: usize,
    staging_rx: Arc<Mutex<mpsc::Receiver<MockRuleDescriptor>>>,
    sink: S,
    staging_depth: Arc<AtomicUsize>,
    push_failures: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    debug!(worker_id, "enqueue worker started");
    loop {
        let descriptor = {
            let mut rx = staging_rx.lock().await;
            tokio::select! {
                d = rx.recv() => d,
                _ = cancel.cancelled() => rx.try_recv().ok(),
            }
        };
        let Some(descriptor) = descriptor else {
            break;
        };

        // 깊이는 push 시도가 끝난 뒤에 내립니다. stop()의 플러시 대기가
        // 진행 중인 push까지 포함해서 보게 하기 위함입니다.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                staging_depth.fetch_sub(1, Ordering::Relaxed);
                metrics::gauge!(COLLECTOR_QUEUE_DEPTH).decrement(1.0);
                metrics::counter!(COLLECTOR_REQUESTS_TOTAL, LABEL_STATUS => STATUS_DROPPED_QUEUE)
                    .increment(1);
                warn!(
                    worker_id,
                    fingerprint = %descriptor.fingerprint.short(),
                    "queue push abandoned at shutdown"
                );
                break;
            }
            result = sink.push(&descriptor) => {
                staging_depth.fetch_sub(1, Ordering::Relaxed);
                metrics::gauge!(COLLECTOR_QUEUE_DEPTH).decrement(1.0);
                match result {
                    Ok(()) => {
                        push_failures.store(0, Ordering::Relaxed);
                        debug!(
                            worker_id,
                            fingerprint = %descriptor.fingerprint.short(),
                            "descriptor enqueued"
                        );
                    }
                    Err(e) => {
                        push_failures.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!(
                            COLLECTOR_REQUESTS_TOTAL,
                            LABEL_STATUS => STATUS_DROPPED_QUEUE
                        )
                        .increment(1);
                        warn!(
                            worker_id,
                            fingerprint = %descriptor.fingerprint.short(),
                            error = %e,
                            "queue push failed after retries, record dropped"
                        );
                    }
                }
            },
        }
    }
    debug!(worker_id, "enqueue worker exited");
}

/// Collector 파이프라인 빌더
///
/// 패턴 카탈로그 컴파일과 설정 검증은 빌드 시점에 수행됩니다.
/// 여기서의 실패(잘못된 정규식, 마커 겹침, 캐시 크기 0)는 치명적이며
/// 데몬 시작을 막습니다.
pub struct CollectorPipelineBuilder<S: DescriptorSink> {
    config: CollectorConfig,
    sink: Option<S>,
}

impl<S: DescriptorSink> CollectorPipelineBuilder<S> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: CollectorConfig::default(),
            sink: None,
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: CollectorConfig) -> Self {
        self.config = config;
        self
    }

    /// descriptor 싱크를 지정합니다 (필수).
    pub fn sink(mut self, sink: S) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 파이프라인을 빌드합니다.
    pub fn build(self) -> Result<CollectorPipeline<S>, CollectorError> {
        self.config.validate()?;
        let sink = self.sink.ok_or_else(|| CollectorError::Config {
            field: "sink".to_owned(),
            reason: "descriptor sink is required".to_owned(),
        })?;

        let catalog = PatternCatalog::from_config(&self.config)?;
        info!(patterns = catalog.pattern_count(), "pattern catalog compiled");

        Ok(CollectorPipeline {
            sanitizer: Arc::new(Sanitizer::new(catalog)),
            dedup: Arc::new(Deduplicator::new(self.config.dedup_cache_size)),
            sink,
            ingest_cancel: CancellationToken::new(),
            worker_cancel: CancellationToken::new(),
            processor: None,
            tasks: Vec::new(),
            staging_depth: Arc::new(AtomicUsize::new(0)),
            push_failures: Arc::new(AtomicU64::new(0)),
            local_addr: None,
            state: PipelineState::Initialized,
            config: self.config,
        })
    }
}

impl<S: DescriptorSink> Default for CollectorPipelineBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}
