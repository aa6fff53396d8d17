//! 큐 어댑터 에러 타입

use mockbridge_core::error::MockBridgeError;

/// 큐 어댑터 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// 연결 실패 (접속, 인증, 프로토콜)
    #[error("queue connection error: {0}")]
    Connection(String),

    /// 재시도 소진
    #[error("queue retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        /// 시도 횟수
        attempts: u32,
        /// 마지막 에러 메시지
        last_error: String,
    },

    /// 페이로드 직렬화/역직렬화 실패
    #[error("queue codec error: {0}")]
    Codec(String),
}

impl From<QueueError> for MockBridgeError {
    fn from(err: QueueError) -> Self {
        MockBridgeError::Queue(err.to_string())
    }
}
