//! Rule Loader 에러 타입

use mockbridge_core::error::{MockBridgeError, PipelineError};

/// Rule Loader 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// HTTP 클라이언트 구성 실패
    #[error("client error: {0}")]
    Client(String),

    /// 백업 싱크 쓰기 실패
    #[error("backup sink error: {path}: {reason}")]
    Backup {
        /// 백업 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LoaderError> for MockBridgeError {
    fn from(err: LoaderError) -> Self {
        MockBridgeError::Pipeline(PipelineError::InitFailed(err.to_string()))
    }
}

/// 설치 호출 한 번의 실패 분류
///
/// 일시(transient) 오류만 재시도 대상입니다. 409 충돌은 실패가 아니라
/// 멱등 설치의 성공으로 취급되므로 여기 나타나지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// 5xx 또는 전송 계층 오류 -- 재시도 대상
    #[error("transient install error{}: {message}", status.map(|s| format!(" (http {s})")).unwrap_or_default())]
    Transient {
        /// HTTP 상태 코드 (전송 오류면 None)
        status: Option<u16>,
        /// 에러 메시지
        message: String,
    },

    /// 409 이외의 4xx -- 재시도 없이 데드레터
    #[error("permanent install error (http {status}): {message}")]
    Permanent {
        /// HTTP 상태 코드
        status: u16,
        /// 에러 메시지
        message: String,
    },
}
