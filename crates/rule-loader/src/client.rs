//! 목 서버 admin API 클라이언트
//!
//! 설치는 "키 기준 upsert"입니다: 결정적 stub id로 PUT을 먼저 시도하고,
//! 규칙이 아직 없으면(404) POST로 생성합니다. 409 충돌은 동일 키의
//! 규칙이 이미 있다는 뜻이므로 성공으로 취급합니다.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use mockbridge_core::types::MockRuleDescriptor;

use crate::error::{InstallError, LoaderError};
use crate::mapping::{stub_id, to_stub_mapping};

/// 설치 성공의 세부 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// 새 규칙이 생성됨
    Created,
    /// 기존 규칙이 교체됨
    Updated,
    /// 같은 키의 규칙이 이미 존재함 (충돌 = 멱등 성공)
    AlreadyPresent,
}

/// 규칙을 설치할 수 있는 저장소
///
/// 운영 구현은 [`WireMockClient`]이고, 소비 루프 테스트는
/// 스크립트된 구현을 주입합니다.
pub trait MappingStore: Send + Sync + 'static {
    /// descriptor 하나를 규칙으로 설치합니다.
    fn install(
        &self,
        descriptor: &MockRuleDescriptor,
    ) -> impl Future<Output = Result<InstallOutcome, InstallError>> + Send;
}

/// HTTP 상태 코드 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusClass {
    /// 2xx
    Success,
    /// 404 -- PUT 대상 규칙 없음, POST로 폴백
    NotFound,
    /// 409 -- 멱등 성공
    Conflict,
    /// 409 이외의 4xx -- 재시도 없이 데드레터
    Permanent,
    /// 5xx 및 그 외 -- 재시도 대상
    Transient,
}

pub(crate) fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        404 => StatusClass::NotFound,
        409 => StatusClass::Conflict,
        400..=499 => StatusClass::Permanent,
        _ => StatusClass::Transient,
    }
}

/// 목 서버 admin API 클라이언트
#[derive(Clone)]
pub struct WireMockClient {
    http: reqwest::Client,
    admin_url: String,
}

impl WireMockClient {
    /// 새 클라이언트를 생성합니다.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LoaderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LoaderError::Client(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            admin_url: format!("{}/__admin", base_url.trim_end_matches('/')),
        })
    }

    /// 목 서버가 응답하는지 확인합니다.
    pub async fn health(&self) -> bool {
        match self.http.get(format!("{}/health", self.admin_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn put_mapping(
        &self,
        id: &str,
        mapping: &serde_json::Value,
    ) -> Result<u16, InstallError> {
        let response = self
            .http
            .put(format!("{}/mappings/{id}", self.admin_url))
            .json(mapping)
            .send()
            .await
            .map_err(transport_error)?;
        Ok(response.status().as_u16())
    }

    async fn post_mapping(&self, mapping: &serde_json::Value) -> Result<u16, InstallError> {
        let response = self
            .http
            .post(format!("{}/mappings", self.admin_url))
            .json(mapping)
            .send()
            .await
            .map_err(transport_error)?;
        Ok(response.status().as_u16())
    }
}

impl MappingStore for WireMockClient {
    async fn install(
        &self,
        descriptor: &MockRuleDescriptor,
    ) -> Result<InstallOutcome, InstallError> {
        let id = stub_id(descriptor.fingerprint);
        let mapping = to_stub_mapping(descriptor);

        // 1차: 키 기준 교체 (upsert의 update 경로)
        let put_status = self.put_mapping(&id, &mapping).await?;
        match classify_status(put_status) {
            StatusClass::Success => {
                debug!(stub_id = %id, "rule replaced");
                return Ok(InstallOutcome::Updated);
            }
            StatusClass::Conflict => return Ok(InstallOutcome::AlreadyPresent),
            StatusClass::NotFound => {}
            StatusClass::Permanent => {
                return Err(InstallError::Permanent {
                    status: put_status,
                    message: "mapping rejected".to_owned(),
                });
            }
            StatusClass::Transient => {
                return Err(InstallError::Transient {
                    status: Some(put_status),
                    message: "mock server error".to_owned(),
                });
            }
        }

        // 2차: 규칙이 아직 없으므로 생성
        let post_status = self.post_mapping(&mapping).await?;
        match classify_status(post_status) {
            StatusClass::Success => {
                debug!(stub_id = %id, "rule created");
                Ok(InstallOutcome::Created)
            }
            StatusClass::Conflict => Ok(InstallOutcome::AlreadyPresent),
            StatusClass::NotFound | StatusClass::Permanent => Err(InstallError::Permanent {
                status: post_status,
                message: "mapping rejected".to_owned(),
            }),
            StatusClass::Transient => Err(InstallError::Transient {
                status: Some(post_status),
                message: "mock server error".to_owned(),
            }),
        }
    }
}

fn transport_error(err: reqwest::Error) -> InstallError {
    InstallError::Transient {
        status: None,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(200), StatusClass::Success);
        assert_eq!(classify_status(201), StatusClass::Success);
        assert_eq!(classify_status(404), StatusClass::NotFound);
        assert_eq!(classify_status(409), StatusClass::Conflict);
        assert_eq!(classify_status(400), StatusClass::Permanent);
        assert_eq!(classify_status(422), StatusClass::Permanent);
        assert_eq!(classify_status(500), StatusClass::Transient);
        assert_eq!(classify_status(503), StatusClass::Transient);
    }

    #[test]
    fn client_builds_admin_url() {
        let client =
            WireMockClient::new("http://wiremock:8080/", Duration::from_secs(30)).unwrap();
        assert_eq!(client.admin_url, "http://wiremock:8080/__admin");
    }
}
