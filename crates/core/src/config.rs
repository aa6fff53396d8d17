//! 설정 관리 — mockbridge.toml 파싱 및 검증
//!
//! 데몬 시작 시 한 번 로드되며, 잘못된 설정은 시작을 거부합니다.
//! 비밀 값(큐 비밀번호)은 `MOCKBRIDGE_QUEUE_PASSWORD` 환경변수로
//! 덮어쓸 수 있습니다.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// mockbridge 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MockBridgeConfig {
    /// 일반 설정
    pub general: GeneralConfig,
    /// Collector 설정
    pub collector: CollectorSection,
    /// 큐 어댑터 설정
    pub queue: QueueSection,
    /// Rule Loader 설정
    pub rule_loader: RuleLoaderSection,
    /// 메트릭/헬스 엔드포인트 설정
    pub metrics: MetricsConfig,
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 정제 패턴 정의 (이름, 정규식, 마커)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    /// 패턴 이름 (메트릭 레이블로 사용)
    pub name: String,
    /// 정규식 소스
    pub regex: String,
    /// 치환 마커 리터럴
    pub marker: String,
}

/// Collector 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSection {
    /// 활성화 여부
    pub enabled: bool,
    /// 탭 수신 바인드 주소
    pub ingest_listen_addr: String,
    /// 최대 동시 수신 연결 수
    pub max_connections: usize,
    /// 본문 크기 상한 (바이트, 초과분은 잘림)
    pub max_body_bytes: usize,
    /// 정제 패턴 목록 (비어 있으면 기본 카탈로그 사용)
    pub sanitize_patterns: Vec<PatternSpec>,
    /// 값 전체를 마커로 치환할 헤더 이름 목록
    pub header_denylist: Vec<String>,
    /// 구조화 본문에서 값을 치환할 필드 이름 목록
    pub field_name_denylist: Vec<String>,
    /// 중복 제거 캐시 크기
    pub dedup_cache_size: usize,
    /// 핑거프린트 계산에 쓰이는 비-JSON 본문 길이 제한 (바이트)
    pub dedup_body_limit: usize,
    /// 스테이징 채널 깊이
    pub staging_channel_depth: usize,
    /// 큐 적재 워커 수
    pub enqueue_workers: usize,
    /// 스테이징이 가득 찼을 때 대기 상한 (초)
    pub enqueue_timeout_secs: u64,
    /// 정제 이전에 건너뛸 경로 접두사 목록
    pub ignored_path_prefixes: Vec<String>,
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            ingest_listen_addr: "0.0.0.0:9090".to_owned(),
            max_connections: 256,
            max_body_bytes: 8 * 1024,
            sanitize_patterns: Vec::new(),
            header_denylist: Vec::new(),
            field_name_denylist: Vec::new(),
            dedup_cache_size: 10_000,
            dedup_body_limit: 1024,
            staging_channel_depth: 1024,
            enqueue_workers: 5,
            enqueue_timeout_secs: 2,
            ignored_path_prefixes: vec![
                "/health".to_owned(),
                "/healthz".to_owned(),
                "/ready".to_owned(),
                "/live".to_owned(),
                "/metrics".to_owned(),
            ],
        }
    }
}

/// 큐 어댑터 설정
///
/// endpoint/password/리스트 이름을 단일 평면 섹션으로 둡니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// 키/값 저장소 접속 주소
    pub endpoint: String,
    /// 접속 비밀번호 (선택)
    pub password: Option<String>,
    /// descriptor FIFO 리스트 키
    pub list_name: String,
    /// 데드레터 리스트 키
    pub dlq_name: String,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            endpoint: "redis://127.0.0.1:6379".to_owned(),
            password: None,
            list_name: "wiremock_mappings".to_owned(),
            dlq_name: "wiremock_mappings_dlq".to_owned(),
        }
    }
}

/// Rule Loader 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleLoaderSection {
    /// 활성화 여부
    pub enabled: bool,
    /// 목 서버 admin API 기본 URL
    pub mock_server_url: String,
    /// 설치 요청 타임아웃 (초)
    pub mock_server_timeout_secs: u64,
    /// 소비 워커 수
    pub workers: usize,
    /// 배치당 최대 descriptor 수
    pub batch_size: usize,
    /// 일시 오류 재시도 횟수
    pub retry_attempts: u32,
    /// 백업 싱크 경로 (선택, append-only JSON lines)
    pub backup_sink_path: Option<String>,
}

impl Default for RuleLoaderSection {
    fn default() -> Self {
        Self {
            enabled: true,
            mock_server_url: "http://127.0.0.1:8080".to_owned(),
            mock_server_timeout_secs: 30,
            workers: 3,
            batch_size: 10,
            retry_attempts: 3,
            backup_sink_path: None,
        }
    }
}

/// 메트릭/헬스 HTTP 엔드포인트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "0.0.0.0".to_owned(),
            port: 9091,
        }
    }
}

impl MockBridgeConfig {
    /// 설정 파일을 읽고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::FileNotFound {
                path: path.display().to_string(),
            })?;

        let mut config = Self::parse(&raw)?;
        config.override_queue_password(std::env::var("MOCKBRIDGE_QUEUE_PASSWORD").ok());
        Ok(config)
    }

    /// TOML 문자열을 파싱합니다.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })
    }

    /// 큐 비밀번호를 환경변수 값으로 덮어씁니다 (값이 있을 때만).
    pub fn override_queue_password(&mut self, password: Option<String>) {
        if let Some(password) = password {
            self.queue.password = Some(password);
        }
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 여기서 실패하면 데몬은 시작하지 않습니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const MIN_BODY_BYTES: usize = 1024;
        const MAX_BODY_BYTES: usize = 1024 * 1024;

        if self.general.log_format != "json" && self.general.log_format != "pretty" {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: "expected 'json' or 'pretty'".to_owned(),
            });
        }

        let c = &self.collector;
        if c.max_body_bytes < MIN_BODY_BYTES || c.max_body_bytes > MAX_BODY_BYTES {
            return Err(ConfigError::InvalidValue {
                field: "collector.max_body_bytes".to_owned(),
                reason: format!("must be {MIN_BODY_BYTES}-{MAX_BODY_BYTES}"),
            });
        }
        if c.dedup_cache_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "collector.dedup_cache_size".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if c.dedup_body_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "collector.dedup_body_limit".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if c.staging_channel_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "collector.staging_channel_depth".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if c.enqueue_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "collector.enqueue_workers".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if c.enqueue_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "collector.enqueue_timeout_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        for pattern in &c.sanitize_patterns {
            if pattern.name.is_empty() || pattern.regex.is_empty() || pattern.marker.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "collector.sanitize_patterns".to_owned(),
                    reason: "name, regex, and marker must all be non-empty".to_owned(),
                });
            }
        }

        if self.queue.endpoint.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "queue.endpoint".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if self.queue.list_name.is_empty() || self.queue.dlq_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "queue.list_name".to_owned(),
                reason: "list names must not be empty".to_owned(),
            });
        }
        if self.queue.list_name == self.queue.dlq_name {
            return Err(ConfigError::InvalidValue {
                field: "queue.dlq_name".to_owned(),
                reason: "dead-letter list must differ from the main list".to_owned(),
            });
        }

        let l = &self.rule_loader;
        if !l.mock_server_url.starts_with("http://") && !l.mock_server_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "rule_loader.mock_server_url".to_owned(),
                reason: "must start with http:// or https://".to_owned(),
            });
        }
        if l.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rule_loader.workers".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if l.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rule_loader.batch_size".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if l.mock_server_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rule_loader.mock_server_timeout_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(())
    }
}
