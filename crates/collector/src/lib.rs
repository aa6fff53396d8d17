//! mockbridge Collector -- 사이드카 탭 트래픽을 정제하여 큐에 적재
//!
//! 사이드카 탭이 전달한 캡처 레코드를 스트림으로 수신하여
//! 정제(민감 데이터 치환) -> 핑거프린트 -> 중복 제거를 거친 뒤,
//! 생존한 레코드를 목 서버 규칙 기술자로 변환해 큐에 적재합니다.
//!
//! # 내부 아키텍처
//! ```text
//! IngestServer -> Processor -> staging mpsc -> enqueue workers -> Queue
//! ```

pub mod config;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod pipeline;
pub mod sanitize;

pub use config::CollectorConfig;
pub use dedup::{Deduplicator, Observation};
pub use error::CollectorError;
pub use pipeline::{
    CollectorPipeline, CollectorPipelineBuilder, DescriptorSink, IngestAck, Processor,
};
pub use sanitize::{PatternCatalog, SanitizeOutcome, Sanitizer};
