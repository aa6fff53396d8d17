//! 큐 소비 워커 -- 배치 pop, 재시도 설치, 데드레터 라우팅
//!
//! 워커는 대칭적이고 서로 조율하지 않습니다. 진행 속도는 목 서버
//! admin API의 처리량이 결정합니다.
//!
//! # descriptor 상태 기계
//! ```text
//! Pending -> Installing -> { Installed | Retrying -> Installing | DeadLettered }
//! ```
//! `Installed`와 `DeadLettered`는 종결 상태입니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mockbridge_core::metrics::{
    LABEL_KIND, LABEL_STATUS, RULE_LOADER_ERRORS_TOTAL, RULE_LOADER_INSTALL_DURATION_SECONDS,
    RULE_LOADER_MAPPINGS_PROCESSED_TOTAL, STATUS_DEAD_LETTER, STATUS_SUCCESS,
};
use mockbridge_core::types::MockRuleDescriptor;
use mockbridge_queue::RuleQueue;

use crate::backup::BackupSink;
use crate::client::{InstallOutcome, MappingStore};
use crate::config::LoaderConfig;
use crate::error::InstallError;

/// 설치 재시도 백오프 시작값
const INSTALL_BACKOFF_BASE: Duration = Duration::from_millis(100);
/// 설치 재시도 백오프 상한
const INSTALL_BACKOFF_MAX: Duration = Duration::from_secs(10);
/// pop 실패 후 재진입 대기
const POP_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// descriptor 하나의 최종 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallResult {
    /// 규칙이 설치됨 (생성/교체/이미 존재)
    Installed(InstallOutcome),
    /// 데드레터로 보낼 것
    DeadLetter {
        /// 실패 분류 ("transient" 또는 "permanent")
        reason: &'static str,
        /// 마지막 에러 메시지
        last_error: String,
        /// 시도 횟수
        attempts: u32,
    },
}

/// n번째 재시도 전 대기 시간: 100ms에서 시작해 두 배씩, 10s 상한
fn install_backoff(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.min(16);
    (INSTALL_BACKOFF_BASE * factor).min(INSTALL_BACKOFF_MAX)
}

/// descriptor 하나를 유계 재시도와 함께 설치합니다.
///
/// 일시 오류는 `retry_attempts`번까지 지수 백오프로 재시도합니다.
/// 영구 오류(409 이외의 4xx)는 즉시 데드레터 대상입니다.
/// 종료 신호가 오면 남은 재시도를 포기하고 데드레터로 보냅니다.
pub async fn install_with_retry<M: MappingStore>(
    store: &M,
    descriptor: &MockRuleDescriptor,
    retry_attempts: u32,
    cancel: &CancellationToken,
) -> InstallResult {
    let fingerprint = descriptor.fingerprint.short();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        debug!(fingerprint = %fingerprint, attempts, "installing rule");

        match store.install(descriptor).await {
            Ok(outcome) => {
                debug!(fingerprint = %fingerprint, ?outcome, "rule installed");
                return InstallResult::Installed(outcome);
            }
            Err(InstallError::Permanent { status, message }) => {
                metrics::counter!(RULE_LOADER_ERRORS_TOTAL, LABEL_KIND => "permanent")
                    .increment(1);
                warn!(
                    fingerprint = %fingerprint,
                    status,
                    "rule rejected by mock server, dead-lettering"
                );
                return InstallResult::DeadLetter {
                    reason: "permanent",
                    last_error: format!("http {status}: {message}"),
                    attempts,
                };
            }
            Err(InstallError::Transient { status, message }) => {
                metrics::counter!(RULE_LOADER_ERRORS_TOTAL, LABEL_KIND => "transient")
                    .increment(1);
                let last_error = match status {
                    Some(status) => format!("http {status}: {message}"),
                    None => message,
                };
                if attempts > retry_attempts {
                    warn!(
                        fingerprint = %fingerprint,
                        attempts,
                        "install retries exhausted, dead-lettering"
                    );
                    return InstallResult::DeadLetter {
                        reason: "transient",
                        last_error,
                        attempts,
                    };
                }

                debug!(fingerprint = %fingerprint, attempts, "transient install error, retrying");
                tokio::select! {
                    () = tokio::time::sleep(install_backoff(attempts)) => {}
                    () = cancel.cancelled() => {
                        warn!(fingerprint = %fingerprint, "retry abandoned at shutdown");
                        return InstallResult::DeadLetter {
                            reason: "transient",
                            last_error,
                            attempts,
                        };
                    }
                }
            }
        }
    }
}

/// 소비 루프 -- 배치 pop 후 descriptor별 설치
pub(crate) async fn consume_loop<M: MappingStore>(
    worker_id: usize,
    queue: RuleQueue,
    store: Arc<M>,
    backup: Option<Arc<BackupSink>>,
    config: LoaderConfig,
    cancel: CancellationToken,
    queue_errors: Arc<AtomicU64>,
) {
    debug!(worker_id, "rule loader worker started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let batch = tokio::select! {
            result = queue.pop_batch(config.batch_size, config.pop_timeout) => result,
            () = cancel.cancelled() => break,
        };

        let batch = match batch {
            Ok(batch) => {
                queue_errors.store(0, Ordering::Relaxed);
                batch
            }
            Err(e) => {
                queue_errors.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(RULE_LOADER_ERRORS_TOTAL, LABEL_KIND => "queue").increment(1);
                warn!(worker_id, error = %e, "queue pop failed");
                tokio::select! {
                    () = tokio::time::sleep(POP_ERROR_BACKOFF) => {}
                    () = cancel.cancelled() => break,
                }
                continue;
            }
        };

        // 이미 pop한 배치는 종료 신호가 와도 끝까지 처리합니다.
        // 진행 중인 설치는 중단하지 않으며, 데드라인을 넘긴 재시도만
        // 포기하고 데드레터로 보냅니다.
        for descriptor in batch {
            let start = Instant::now();
            let result =
                install_with_retry(store.as_ref(), &descriptor, config.retry_attempts, &cancel)
                    .await;
            metrics::histogram!(RULE_LOADER_INSTALL_DURATION_SECONDS)
                .record(start.elapsed().as_secs_f64());

            match result {
                InstallResult::Installed(outcome) => {
                    metrics::counter!(
                        RULE_LOADER_MAPPINGS_PROCESSED_TOTAL,
                        LABEL_STATUS => STATUS_SUCCESS
                    )
                    .increment(1);
                    info!(
                        worker_id,
                        fingerprint = %descriptor.fingerprint.short(),
                        ?outcome,
                        "rule installed"
                    );

                    if let Some(backup) = &backup {
                        if let Err(e) = backup.append(&descriptor).await {
                            metrics::counter!(RULE_LOADER_ERRORS_TOTAL, LABEL_KIND => "backup")
                                .increment(1);
                            warn!(
                                fingerprint = %descriptor.fingerprint.short(),
                                error = %e,
                                "backup append failed"
                            );
                        }
                    }
                }
                InstallResult::DeadLetter {
                    reason,
                    last_error,
                    attempts,
                } => {
                    metrics::counter!(
                        RULE_LOADER_MAPPINGS_PROCESSED_TOTAL,
                        LABEL_STATUS => STATUS_DEAD_LETTER
                    )
                    .increment(1);
                    if let Err(e) = queue
                        .dead_letter(&descriptor, reason, &last_error, attempts)
                        .await
                    {
                        metrics::counter!(RULE_LOADER_ERRORS_TOTAL, LABEL_KIND => "queue")
                            .increment(1);
                        warn!(
                            fingerprint = %descriptor.fingerprint.short(),
                            error = %e,
                            "dead-letter write failed, descriptor lost"
                        );
                    }
                }
            }
        }
    }

    debug!(worker_id, "rule loader worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::AtomicU32;
    use std::time::SystemTime;

    use mockbridge_core::types::{
        BodyContent, BodyPredicate, Fingerprint, RuleMatch, RuleMetadata, RuleResponse,
    };

    fn sample_descriptor() -> MockRuleDescriptor {
        MockRuleDescriptor {
            fingerprint: Fingerprint::from_bytes([9; 32]),
            rule_match: RuleMatch {
                method: "GET".to_owned(),
                path: "/x".to_owned(),
                query: BTreeMap::new(),
                body_predicate: BodyPredicate::Any,
            },
            response: RuleResponse {
                status: 200,
                headers: BTreeMap::new(),
                body: BodyContent::Empty,
            },
            metadata: RuleMetadata {
                observed_at: SystemTime::UNIX_EPOCH,
                source_labels: BTreeMap::new(),
                sanitization_report: BTreeMap::new(),
            },
        }
    }

    struct ScriptedStore {
        script: tokio::sync::Mutex<VecDeque<Result<InstallOutcome, InstallError>>>,
        calls: AtomicU32,
    }

    impl ScriptedStore {
        fn new(script: Vec<Result<InstallOutcome, InstallError>>) -> Self {
            Self {
                script: tokio::sync::Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl MappingStore for ScriptedStore {
        async fn install(
            &self,
            _descriptor: &MockRuleDescriptor,
        ) -> Result<InstallOutcome, InstallError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.script
                .lock()
                .await
                .pop_front()
                .unwrap_or(Ok(InstallOutcome::Created))
        }
    }

    fn transient(status: u16) -> Result<InstallOutcome, InstallError> {
        Err(InstallError::Transient {
            status: Some(status),
            message: "unavailable".to_owned(),
        })
    }

    fn permanent(status: u16) -> Result<InstallOutcome, InstallError> {
        Err(InstallError::Permanent {
            status,
            message: "rejected".to_owned(),
        })
    }

    #[tokio::test]
    async fn first_try_success() {
        let store = ScriptedStore::new(vec![Ok(InstallOutcome::Created)]);
        let result = install_with_retry(
            &store,
            &sample_descriptor(),
            3,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(result, InstallResult::Installed(InstallOutcome::Created));
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        // 503 두 번 후 201: 성공 한 번, transient 에러 두 번
        let store =
            ScriptedStore::new(vec![transient(503), transient(503), Ok(InstallOutcome::Created)]);
        let result = install_with_retry(
            &store,
            &sample_descriptor(),
            3,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(result, InstallResult::Installed(InstallOutcome::Created));
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_error_dead_letters_immediately() {
        let store = ScriptedStore::new(vec![permanent(400)]);
        let result = install_with_retry(
            &store,
            &sample_descriptor(),
            3,
            &CancellationToken::new(),
        )
        .await;
        match result {
            InstallResult::DeadLetter {
                reason, attempts, ..
            } => {
                assert_eq!(reason, "permanent");
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // 재시도 없음
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_exhaustion_dead_letters() {
        let store = ScriptedStore::new(vec![
            transient(503),
            transient(503),
            transient(503),
            transient(503),
        ]);
        let result = install_with_retry(
            &store,
            &sample_descriptor(),
            2,
            &CancellationToken::new(),
        )
        .await;
        match result {
            InstallResult::DeadLetter {
                reason,
                attempts,
                last_error,
            } => {
                assert_eq!(reason, "transient");
                // 최초 시도 + 재시도 2회
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn conflict_counts_as_success() {
        let store = ScriptedStore::new(vec![Ok(InstallOutcome::AlreadyPresent)]);
        let result = install_with_retry(
            &store,
            &sample_descriptor(),
            3,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(
            result,
            InstallResult::Installed(InstallOutcome::AlreadyPresent)
        );
    }

    #[tokio::test]
    async fn cancellation_abandons_pending_retries() {
        let store = ScriptedStore::new(vec![transient(503), transient(503), transient(503)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = install_with_retry(&store, &sample_descriptor(), 3, &cancel).await;
        match result {
            InstallResult::DeadLetter { reason, attempts, .. } => {
                assert_eq!(reason, "transient");
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        assert_eq!(install_backoff(1), Duration::from_millis(200));
        assert_eq!(install_backoff(2), Duration::from_millis(400));
        assert_eq!(install_backoff(3), Duration::from_millis(800));
        assert_eq!(install_backoff(10), Duration::from_secs(10));
    }
}
