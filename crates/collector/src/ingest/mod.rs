//! 탭 수신 모듈 -- 사이드카 탭 스트림을 받아 파이프라인에 전달합니다.
//!
//! # 프로토콜
//! 연결당 하나의 양방향 스트림: 클라이언트는 length-delimited 프레임으로
//! [`proto::TapCapture`]를 보내고, 서버는 프레임마다 [`proto::TapAck`]를
//! 같은 순서로 돌려보냅니다.

pub mod proto;
pub mod server;

pub use proto::{TapAck, TapCapture, TapDirection};
pub use server::IngestServer;
