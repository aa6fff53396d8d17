//! Ingest flow integration tests.
//!
//! Drives the collector pipeline end-to-end over a real TCP connection:
//! framed tap captures in, framed acks out, descriptors into an
//! in-memory sink standing in for the queue adapter.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use prost::Message;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use mockbridge_collector::ingest::proto::{
    MultiValue, TapAck, TapCapture, TapDirection, TapRequest, TapResponse,
};
use mockbridge_collector::{
    CollectorConfig, CollectorPipelineBuilder, DescriptorSink,
};
use mockbridge_core::pipeline::Pipeline;
use mockbridge_core::types::{BodyPredicate, MockRuleDescriptor};
use mockbridge_queue::QueueError;

#[derive(Clone, Default)]
struct MemorySink {
    pushed: Arc<tokio::sync::Mutex<Vec<MockRuleDescriptor>>>,
}

impl MemorySink {
    async fn descriptors(&self) -> Vec<MockRuleDescriptor> {
        self.pushed.lock().await.clone()
    }
}

impl DescriptorSink for MemorySink {
    async fn push(&self, descriptor: &MockRuleDescriptor) -> Result<(), QueueError> {
        self.pushed.lock().await.push(descriptor.clone());
        Ok(())
    }
}

fn capture(method: &str, path: &str, headers: &[(&str, &str)], body: &[u8]) -> TapCapture {
    TapCapture {
        direction: TapDirection::Inbound as i32,
        request: Some(TapRequest {
            method: method.to_owned(),
            path: path.to_owned(),
            query: Vec::new(),
            headers: headers
                .iter()
                .map(|(name, value)| MultiValue {
                    name: (*name).to_owned(),
                    values: vec![(*value).to_owned()],
                })
                .collect(),
            body: body.to_vec(),
        }),
        response: Some(TapResponse {
            status: 200,
            headers: Vec::new(),
            body: br#"{"id":42,"name":"John"}"#.to_vec(),
        }),
        observed_at_unix_ms: 1_700_000_000_000,
        source_labels: [("namespace".to_owned(), "payments".to_owned())]
            .into_iter()
            .collect(),
    }
}

async fn send_capture(
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
    message: TapCapture,
) -> TapAck {
    let mut buf = Vec::new();
    message.encode(&mut buf).expect("encode capture");
    framed.send(buf.into()).await.expect("send frame");

    let frame = framed
        .next()
        .await
        .expect("ack frame expected")
        .expect("frame read");
    TapAck::decode(frame.freeze()).expect("decode ack")
}

#[tokio::test]
async fn jwt_capture_is_sanitized_and_staged_once() {
    let sink = MemorySink::default();
    let config = CollectorConfig {
        ingest_listen_addr: "127.0.0.1:0".to_owned(),
        ..Default::default()
    };
    let mut pipeline = CollectorPipelineBuilder::new()
        .config(config)
        .sink(sink.clone())
        .build()
        .expect("pipeline builds");
    pipeline.start().await.expect("pipeline starts");

    let addr = pipeline.local_addr().expect("bound address");
    let stream = TcpStream::connect(addr).await.expect("connect");
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    let message = capture(
        "GET",
        "/v1/users/42",
        &[(
            "authorization",
            "Bearer eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiJqb2huIn0.sig",
        )],
        b"",
    );

    // First capture is accepted
    let ack = send_capture(&mut framed, message.clone()).await;
    assert!(ack.accepted);
    assert!(!ack.duplicate);
    assert_eq!(ack.dropped_reason, "");

    // Identical capture is suppressed as a duplicate
    let ack = send_capture(&mut framed, message).await;
    assert!(!ack.accepted);
    assert!(ack.duplicate);

    // Exactly one descriptor reached the sink, fully sanitized
    pipeline.stop().await.expect("pipeline stops");
    let descriptors = sink.descriptors().await;
    assert_eq!(descriptors.len(), 1);

    let descriptor = &descriptors[0];
    assert_eq!(descriptor.rule_match.method, "GET");
    assert_eq!(descriptor.rule_match.path, "/v1/users/42");
    assert_eq!(descriptor.rule_match.body_predicate, BodyPredicate::Any);
    assert_eq!(descriptor.response.status, 200);
    assert_eq!(
        descriptor.metadata.sanitization_report.get("authorization_header"),
        Some(&1)
    );

    // No JWT substring anywhere in the wire form
    let wire = serde_json::to_string(descriptor).expect("descriptor serializes");
    assert!(!wire.contains("eyJhbGci"));
}

#[tokio::test]
async fn reordered_query_params_share_a_fingerprint() {
    let sink = MemorySink::default();
    let config = CollectorConfig {
        ingest_listen_addr: "127.0.0.1:0".to_owned(),
        ..Default::default()
    };
    let mut pipeline = CollectorPipelineBuilder::new()
        .config(config)
        .sink(sink.clone())
        .build()
        .expect("pipeline builds");
    pipeline.start().await.expect("pipeline starts");

    let addr = pipeline.local_addr().expect("bound address");
    let stream = TcpStream::connect(addr).await.expect("connect");
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    let mut first = capture("GET", "/search", &[], b"");
    first.request.as_mut().unwrap().query = vec![
        MultiValue {
            name: "b".to_owned(),
            values: vec!["2".to_owned()],
        },
        MultiValue {
            name: "a".to_owned(),
            values: vec!["1".to_owned()],
        },
    ];
    let mut second = capture("GET", "/search", &[], b"");
    second.request.as_mut().unwrap().query = vec![
        MultiValue {
            name: "a".to_owned(),
            values: vec!["1".to_owned()],
        },
        MultiValue {
            name: "b".to_owned(),
            values: vec!["2".to_owned()],
        },
    ];

    let ack = send_capture(&mut framed, first).await;
    assert!(ack.accepted);

    let ack = send_capture(&mut framed, second).await;
    assert!(ack.duplicate, "reordered query params must deduplicate");

    pipeline.stop().await.expect("pipeline stops");
    assert_eq!(sink.descriptors().await.len(), 1);
}

#[tokio::test]
async fn card_number_in_json_body_is_masked_in_descriptor() {
    let sink = MemorySink::default();
    let config = CollectorConfig {
        ingest_listen_addr: "127.0.0.1:0".to_owned(),
        ..Default::default()
    };
    let mut pipeline = CollectorPipelineBuilder::new()
        .config(config)
        .sink(sink.clone())
        .build()
        .expect("pipeline builds");
    pipeline.start().await.expect("pipeline starts");

    let addr = pipeline.local_addr().expect("bound address");
    let stream = TcpStream::connect(addr).await.expect("connect");
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    let message = capture(
        "POST",
        "/pay",
        &[("content-type", "application/json")],
        br#"{"card":"4111111111111111","amount":10}"#,
    );
    let ack = send_capture(&mut framed, message).await;
    assert!(ack.accepted);

    pipeline.stop().await.expect("pipeline stops");
    let descriptors = sink.descriptors().await;
    assert_eq!(descriptors.len(), 1);

    match &descriptors[0].rule_match.body_predicate {
        BodyPredicate::EqualToJson { value } => {
            assert_eq!(value["card"], "SANITIZED_CARD");
            assert_eq!(value["amount"], 10);
        }
        other => panic!("expected equalToJson predicate, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_frame_is_rejected_without_closing_the_stream() {
    let sink = MemorySink::default();
    let config = CollectorConfig {
        ingest_listen_addr: "127.0.0.1:0".to_owned(),
        ..Default::default()
    };
    let mut pipeline = CollectorPipelineBuilder::new()
        .config(config)
        .sink(sink.clone())
        .build()
        .expect("pipeline builds");
    pipeline.start().await.expect("pipeline starts");

    let addr = pipeline.local_addr().expect("bound address");
    let stream = TcpStream::connect(addr).await.expect("connect");
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    // Garbage bytes that do not decode as a capture
    framed
        .send(bytes::Bytes::from_static(b"\xff\xff\xff\xff"))
        .await
        .expect("send frame");
    let frame = framed
        .next()
        .await
        .expect("ack frame expected")
        .expect("frame read");
    let ack = TapAck::decode(frame.freeze()).expect("decode ack");
    assert!(!ack.accepted);
    assert_eq!(ack.dropped_reason, "malformed");

    // The stream stays usable for well-formed captures
    let ack = send_capture(&mut framed, capture("GET", "/v1/ok", &[], b"")).await;
    assert!(ack.accepted);

    pipeline.stop().await.expect("pipeline stops");
}
