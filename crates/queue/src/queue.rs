//! descriptor 큐 -- 외부 키/값 저장소의 단일 FIFO 리스트
//!
//! Collector와 Rule Loader 사이의 내구성 있는 핸드오프입니다.
//! 페이로드는 자기 기술(self-describing) JSON 레코드로 직렬화됩니다.
//! 연결 풀링과 재접속은 어댑터가 소유하며, 호출자는 재시도 소진
//! 이후에만 연결 에러를 봅니다.
//!
//! # 전달 보장
//! 저장소의 원자적 리스트 pop 덕분에 큐 관점에서는 descriptor당
//! 정확히 한 번 전달됩니다. 설치 실패가 재적재를 일으키므로
//! 종단 간에는 at-least-once입니다.

use std::time::{Duration, SystemTime};

use redis::aio::ConnectionManager;
use tracing::{debug, info, warn};

use mockbridge_core::config::QueueSection;
use mockbridge_core::types::{DeadLetterRecord, MockRuleDescriptor};

use crate::error::QueueError;

/// push 재시도 횟수
const PUSH_RETRY_ATTEMPTS: u32 = 5;
/// push 백오프 시작값
const PUSH_BACKOFF_BASE: Duration = Duration::from_millis(50);
/// push 백오프 상한
const PUSH_BACKOFF_MAX: Duration = Duration::from_secs(5);
/// 개별 저장소 명령 데드라인
const COMMAND_DEADLINE: Duration = Duration::from_secs(5);

/// 큐 어댑터 설정
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// 저장소 접속 주소 (`redis://host:port`)
    pub endpoint: String,
    /// 접속 비밀번호 (선택)
    pub password: Option<String>,
    /// descriptor 리스트 키
    pub list_name: String,
    /// 데드레터 리스트 키
    pub dlq_name: String,
}

impl QueueConfig {
    /// core의 `QueueSection`에서 설정을 생성합니다.
    pub fn from_core(core: &QueueSection) -> Self {
        Self {
            endpoint: core.endpoint.clone(),
            password: core.password.clone(),
            list_name: core.list_name.clone(),
            dlq_name: core.dlq_name.clone(),
        }
    }
}

/// descriptor 큐 어댑터
///
/// `Clone`은 내부 연결 관리자를 공유합니다. Collector의 적재 워커와
/// Rule Loader의 소비 워커가 같은 인스턴스의 복제본을 사용합니다.
#[derive(Clone)]
pub struct RuleQueue {
    manager: ConnectionManager,
    list_name: String,
    dlq_name: String,
}

impl RuleQueue {
    /// 저장소에 접속하고 도달성을 확인합니다.
    ///
    /// 시작 시점에 저장소에 도달할 수 없으면 에러를 반환하며,
    /// 데몬은 시작을 거부합니다.
    pub async fn connect(config: QueueConfig) -> Result<Self, QueueError> {
        let url = endpoint_with_password(&config.endpoint, config.password.as_deref());
        let client = redis::Client::open(url.as_str())
            .map_err(|e| QueueError::Connection(format!("invalid endpoint: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| QueueError::Connection(format!("connect failed: {e}")))?;

        let queue = Self {
            manager,
            list_name: config.list_name,
            dlq_name: config.dlq_name,
        };
        queue.ping().await?;
        info!(list = %queue.list_name, dlq = %queue.dlq_name, "queue adapter connected");
        Ok(queue)
    }

    /// 저장소 도달성을 확인합니다.
    pub async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let reply: String = run_command(redis::cmd("PING").query_async(&mut conn)).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(QueueError::Connection(format!("unexpected PING reply: {reply}")))
        }
    }

    /// descriptor를 FIFO 리스트 끝에 적재합니다.
    ///
    /// 일시 오류는 내부에서 지수 백오프로 재시도하며, 소진 시에만
    /// [`QueueError::Exhausted`]를 반환합니다.
    pub async fn push(&self, descriptor: &MockRuleDescriptor) -> Result<(), QueueError> {
        let payload = encode_payload(descriptor)?;
        self.push_with_retry(&self.list_name, payload).await
    }

    /// 리스트 앞에서 descriptor 배치를 꺼냅니다.
    ///
    /// 최소 1개가 도착하거나 `timeout`이 지날 때까지 블록한 뒤,
    /// 블록 없이 최대 `max_n`개까지 추가로 꺼냅니다.
    /// 역직렬화에 실패한 레코드는 경고 후 건너뜁니다.
    pub async fn pop_batch(
        &self,
        max_n: usize,
        timeout: Duration,
    ) -> Result<Vec<MockRuleDescriptor>, QueueError> {
        let mut conn = self.manager.clone();
        let mut batch = Vec::new();
        if max_n == 0 {
            return Ok(batch);
        }

        let first: Option<(String, String)> = tokio::time::timeout(
            timeout + COMMAND_DEADLINE,
            redis::cmd("BLPOP")
                .arg(&self.list_name)
                .arg(timeout.as_secs_f64())
                .query_async(&mut conn),
        )
        .await
        .map_err(|_| QueueError::Connection("BLPOP deadline exceeded".to_owned()))?
        .map_err(|e| QueueError::Connection(format!("BLPOP failed: {e}")))?;

        let Some((_, payload)) = first else {
            return Ok(batch);
        };
        match decode_payload(&payload) {
            Ok(descriptor) => batch.push(descriptor),
            Err(e) => warn!(error = %e, "skipping undecodable queue record"),
        }

        while batch.len() < max_n {
            let next: Option<String> =
                run_command(redis::cmd("LPOP").arg(&self.list_name).query_async(&mut conn))
                    .await?;
            let Some(payload) = next else { break };
            match decode_payload(&payload) {
                Ok(descriptor) => batch.push(descriptor),
                Err(e) => warn!(error = %e, "skipping undecodable queue record"),
            }
        }

        debug!(count = batch.len(), "popped descriptor batch");
        Ok(batch)
    }

    /// 설치에 최종 실패한 descriptor를 데드레터 리스트로 보냅니다.
    pub async fn dead_letter(
        &self,
        descriptor: &MockRuleDescriptor,
        reason: &str,
        last_error: &str,
        attempts: u32,
    ) -> Result<(), QueueError> {
        let record = DeadLetterRecord {
            descriptor: descriptor.clone(),
            reason: reason.to_owned(),
            last_error: last_error.to_owned(),
            attempts,
            first_seen: descriptor.metadata.observed_at,
            last_seen: SystemTime::now(),
        };
        let payload = serde_json::to_string(&record)
            .map_err(|e| QueueError::Codec(format!("dead-letter encode failed: {e}")))?;
        self.push_with_retry(&self.dlq_name, payload).await
    }

    /// 메인 리스트의 현재 깊이를 반환합니다.
    pub async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.manager.clone();
        run_command(redis::cmd("LLEN").arg(&self.list_name).query_async(&mut conn)).await
    }

    async fn push_with_retry(&self, list: &str, payload: String) -> Result<(), QueueError> {
        let mut last_error = String::new();
        for attempt in 0..PUSH_RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(push_backoff(attempt)).await;
            }
            let mut conn = self.manager.clone();
            let result: Result<i64, QueueError> =
                run_command(redis::cmd("RPUSH").arg(list).arg(&payload).query_async(&mut conn))
                    .await;
            match result {
                Ok(_) => return Ok(()),
                Err(e) => {
                    last_error = e.to_string();
                    warn!(list, attempt = attempt + 1, error = %last_error, "queue push attempt failed");
                }
            }
        }
        Err(QueueError::Exhausted {
            attempts: PUSH_RETRY_ATTEMPTS,
            last_error,
        })
    }
}

/// 명령 하나를 데드라인과 함께 실행합니다.
async fn run_command<T>(
    fut: impl std::future::Future<Output = redis::RedisResult<T>>,
) -> Result<T, QueueError> {
    tokio::time::timeout(COMMAND_DEADLINE, fut)
        .await
        .map_err(|_| QueueError::Connection("command deadline exceeded".to_owned()))?
        .map_err(|e| QueueError::Connection(e.to_string()))
}

/// n번째 재시도 전 대기 시간: 50ms에서 시작해 두 배씩, 5s 상한
fn push_backoff(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.min(16);
    (PUSH_BACKOFF_BASE * factor).min(PUSH_BACKOFF_MAX)
}

/// 비밀번호를 접속 URL에 주입합니다 (URL에 인증 정보가 없을 때만).
fn endpoint_with_password(endpoint: &str, password: Option<&str>) -> String {
    let Some(password) = password else {
        return endpoint.to_owned();
    };
    if endpoint.contains('@') {
        return endpoint.to_owned();
    }
    match endpoint.split_once("://") {
        Some((scheme, rest)) => format!("{scheme}://:{password}@{rest}"),
        None => endpoint.to_owned(),
    }
}

fn encode_payload(descriptor: &MockRuleDescriptor) -> Result<String, QueueError> {
    serde_json::to_string(descriptor).map_err(|e| QueueError::Codec(format!("encode failed: {e}")))
}

fn decode_payload(payload: &str) -> Result<MockRuleDescriptor, QueueError> {
    serde_json::from_str(payload).map_err(|e| QueueError::Codec(format!("decode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use mockbridge_core::types::{
        BodyContent, BodyPredicate, Fingerprint, RuleMatch, RuleMetadata, RuleResponse,
    };

    fn sample_descriptor() -> MockRuleDescriptor {
        MockRuleDescriptor {
            fingerprint: Fingerprint::from_bytes([7; 32]),
            rule_match: RuleMatch {
                method: "GET".to_owned(),
                path: "/v1/users/42".to_owned(),
                query: BTreeMap::new(),
                body_predicate: BodyPredicate::Any,
            },
            response: RuleResponse {
                status: 200,
                headers: BTreeMap::new(),
                body: BodyContent::Json(serde_json::json!({"id": 42})),
            },
            metadata: RuleMetadata {
                observed_at: SystemTime::UNIX_EPOCH,
                source_labels: BTreeMap::new(),
                sanitization_report: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn payload_roundtrip() {
        let descriptor = sample_descriptor();
        let payload = encode_payload(&descriptor).unwrap();
        let back = decode_payload(&payload).unwrap();
        assert_eq!(back, descriptor);
    }

    #[test]
    fn payload_is_self_describing_json() {
        let payload = encode_payload(&sample_descriptor()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert!(value.get("fingerprint").is_some());
        assert!(value.get("match").is_some());
        assert!(value.get("response").is_some());
        assert!(value.get("metadata").is_some());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_payload("not json").is_err());
        assert!(decode_payload("{}").is_err());
    }

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        assert_eq!(push_backoff(1), Duration::from_millis(100));
        assert_eq!(push_backoff(2), Duration::from_millis(200));
        assert_eq!(push_backoff(3), Duration::from_millis(400));
        assert_eq!(push_backoff(4), Duration::from_millis(800));
        // 상한 5s
        assert_eq!(push_backoff(10), Duration::from_secs(5));
    }

    #[test]
    fn password_is_injected_into_endpoint() {
        assert_eq!(
            endpoint_with_password("redis://queue.mesh:6379", Some("s3cret")),
            "redis://:s3cret@queue.mesh:6379"
        );
    }

    #[test]
    fn existing_auth_is_preserved() {
        assert_eq!(
            endpoint_with_password("redis://:old@queue.mesh:6379", Some("new")),
            "redis://:old@queue.mesh:6379"
        );
    }

    #[test]
    fn no_password_leaves_endpoint_unchanged() {
        assert_eq!(
            endpoint_with_password("redis://queue.mesh:6379", None),
            "redis://queue.mesh:6379"
        );
    }

    #[test]
    fn config_from_core_copies_names() {
        let core = QueueSection::default();
        let config = QueueConfig::from_core(&core);
        assert_eq!(config.list_name, "wiremock_mappings");
        assert_eq!(config.dlq_name, "wiremock_mappings_dlq");
    }
}
