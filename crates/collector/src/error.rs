//! Collector 에러 타입
//!
//! [`CollectorError`]는 수신/정제/중복 제거 파이프라인 내부에서 발생하는
//! 모든 에러를 표현합니다. `From<CollectorError> for MockBridgeError` 변환이
//! 구현되어 있어 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use mockbridge_core::error::{MockBridgeError, PipelineError};

/// Collector 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// 수신한 레코드의 형태가 잘못됨
    #[error("invalid capture record: {reason}")]
    Validation {
        /// 거부 사유
        reason: String,
    },

    /// 패턴 카탈로그 구성 실패 (정규식 컴파일, 마커 겹침 등)
    #[error("pattern catalog error: pattern '{name}': {reason}")]
    Catalog {
        /// 문제가 된 패턴 이름
        name: String,
        /// 실패 사유
        reason: String,
    },

    /// 수신 서버 에러 (바인드, accept 등)
    #[error("ingest error: {reason}")]
    Ingest {
        /// 에러 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CollectorError> for MockBridgeError {
    fn from(err: CollectorError) -> Self {
        MockBridgeError::Pipeline(PipelineError::InitFailed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = CollectorError::Validation {
            reason: "status 42 out of range".to_owned(),
        };
        assert!(err.to_string().contains("status 42"));
    }

    #[test]
    fn catalog_error_display() {
        let err = CollectorError::Catalog {
            name: "credit_card".to_owned(),
            reason: "marker matches pattern".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("credit_card"));
        assert!(msg.contains("marker matches pattern"));
    }

    #[test]
    fn converts_to_mockbridge_error() {
        let err = CollectorError::Channel("receiver closed".to_owned());
        let top: MockBridgeError = err.into();
        assert!(matches!(top, MockBridgeError::Pipeline(_)));
    }
}
