//! 탭 수신 서버
//!
//! length-delimited 프레임으로 [`TapCapture`](super::proto::TapCapture)를
//! 수신하고, 레코드마다 [`TapAck`](super::proto::TapAck)를 같은 순서로
//! 돌려보냅니다. 각 TCP 연결은 별도의 tokio 태스크에서 처리되며,
//! 동시 연결 수는 세마포어로 제한됩니다.
//!
//! 상호 TLS는 메시 데이터플레인이 제공한다고 가정하고,
//! 서버 자체는 추가 인증을 하지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use prost::Message;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mockbridge_core::metrics::{
    COLLECTOR_REQUESTS_TOTAL, LABEL_STATUS, STATUS_DROPPED_MALFORMED, STATUS_DROPPED_TIMEOUT,
};

use super::proto::{TapAck, TapCapture};
use crate::error::CollectorError;
use crate::pipeline::{IngestAck, Processor};

/// 프레임 크기 상한 (본문 상한 + 헤더/레이블 여유)
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// 탭 수신 서버
pub struct IngestServer {
    processor: Arc<Processor>,
    max_connections: usize,
    message_deadline: Duration,
    cancel: CancellationToken,
}

impl IngestServer {
    /// 새 수신 서버를 생성합니다.
    pub fn new(
        processor: Arc<Processor>,
        max_connections: usize,
        message_deadline: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            processor,
            max_connections,
            message_deadline,
            cancel,
        }
    }

    /// 연결 수락 루프를 실행합니다.
    ///
    /// 리스너는 호출자가 바인드하여 전달합니다 (시작 시점에 바인드
    /// 실패를 드러내기 위해). CancellationToken으로 graceful shutdown을
    /// 지원합니다.
    pub async fn run(self, listener: TcpListener) -> Result<(), CollectorError> {
        let local_addr = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned());
        info!(listen_addr = %local_addr, "tap ingest server listening");

        let connection_semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, addr) = result.map_err(|e| CollectorError::Ingest {
                        reason: format!("accept error: {e}"),
                    })?;

                    debug!(peer = %addr, "accepted tap connection");

                    let permit = match connection_semaphore.clone().try_acquire_owned() {
                        Ok(p) => p,
                        Err(_) => {
                            warn!(peer = %addr, "max connections reached, rejecting tap connection");
                            continue;
                        }
                    };

                    let processor = Arc::clone(&self.processor);
                    let cancel = self.cancel.clone();
                    let deadline = self.message_deadline;

                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, processor, deadline, cancel).await
                        {
                            debug!(peer = %addr, error = %e, "tap connection closed with error");
                        }
                        drop(permit);
                    });
                }
                _ = self.cancel.cancelled() => {
                    info!("tap ingest server received shutdown signal");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// 단일 탭 연결을 처리합니다.
async fn handle_connection(
    stream: TcpStream,
    processor: Arc<Processor>,
    message_deadline: Duration,
    cancel: CancellationToken,
) -> Result<(), CollectorError> {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec();
    let mut framed = Framed::new(stream, codec);

    loop {
        tokio::select! {
            frame = framed.next() => {
                match frame {
                    Some(Ok(bytes)) => {
                        let ack = match TapCapture::decode(bytes.freeze()) {
                            Ok(message) => {
                                match timeout(message_deadline, processor.process(message)).await {
                                    Ok(ack) => ack,
                                    Err(_) => {
                                        metrics::counter!(
                                            COLLECTOR_REQUESTS_TOTAL,
                                            LABEL_STATUS => STATUS_DROPPED_TIMEOUT
                                        )
                                        .increment(1);
                                        IngestAck::dropped("timeout")
                                    }
                                }
                            }
                            Err(e) => {
                                metrics::counter!(
                                    COLLECTOR_REQUESTS_TOTAL,
                                    LABEL_STATUS => STATUS_DROPPED_MALFORMED
                                )
                                .increment(1);
                                debug!(error = %e, "undecodable tap frame");
                                IngestAck::dropped("malformed")
                            }
                        };

                        let mut buf = bytes::BytesMut::new();
                        let wire: TapAck = ack.to_wire();
                        if let Err(e) = wire.encode(&mut buf) {
                            error!(error = %e, "failed to encode ack");
                            break;
                        }
                        if let Err(e) = framed.send(buf.freeze()).await {
                            return Err(CollectorError::Ingest {
                                reason: format!("ack send failed: {e}"),
                            });
                        }
                    }
                    Some(Err(e)) => {
                        return Err(CollectorError::Ingest {
                            reason: format!("frame read failed: {e}"),
                        });
                    }
                    None => {
                        debug!("tap connection closed by peer");
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => {
                debug!("tap connection handler received shutdown signal");
                break;
            }
        }
    }

    Ok(())
}
