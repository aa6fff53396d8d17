//! Rule Loader 설정

use std::time::Duration;

use mockbridge_core::config::RuleLoaderSection;

use crate::error::LoaderError;

/// Rule Loader 설정
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// 목 서버 admin API 기본 URL
    pub mock_server_url: String,
    /// 설치 요청 타임아웃
    pub mock_server_timeout: Duration,
    /// 소비 워커 수
    pub workers: usize,
    /// 배치당 최대 descriptor 수
    pub batch_size: usize,
    /// 일시 오류 재시도 횟수
    pub retry_attempts: u32,
    /// 백업 싱크 경로 (선택)
    pub backup_sink_path: Option<String>,
    /// 큐 pop 블록 타임아웃
    pub pop_timeout: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::from_core(&RuleLoaderSection::default())
    }
}

impl LoaderConfig {
    /// core의 `RuleLoaderSection`에서 설정을 생성합니다.
    pub fn from_core(core: &RuleLoaderSection) -> Self {
        Self {
            mock_server_url: core.mock_server_url.clone(),
            mock_server_timeout: Duration::from_secs(core.mock_server_timeout_secs),
            workers: core.workers,
            batch_size: core.batch_size,
            retry_attempts: core.retry_attempts,
            backup_sink_path: core.backup_sink_path.clone(),
            pop_timeout: Duration::from_secs(2),
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LoaderError> {
        if !self.mock_server_url.starts_with("http://")
            && !self.mock_server_url.starts_with("https://")
        {
            return Err(LoaderError::Config {
                field: "mock_server_url".to_owned(),
                reason: "must start with http:// or https://".to_owned(),
            });
        }
        if self.workers == 0 {
            return Err(LoaderError::Config {
                field: "workers".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.batch_size == 0 {
            return Err(LoaderError::Config {
                field: "batch_size".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}
