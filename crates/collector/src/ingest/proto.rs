//! 탭 수신 와이어 메시지 -- prost 인코딩 정의와 레코드 변환
//!
//! 사이드카 탭이 보내는 스트림은 length-delimited 프레임이며,
//! 각 프레임은 [`TapCapture`] 하나를 담습니다. 서버는 프레임마다
//! [`TapAck`] 하나를 같은 순서로 돌려보냅니다.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use bytes::Bytes;

use mockbridge_core::types::{CaptureRecord, Direction, RequestRecord, ResponseRecord};

use crate::error::CollectorError;

/// 트래픽 방향 (와이어 표현)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TapDirection {
    /// 서비스로 들어오는 트래픽
    Inbound = 0,
    /// 서비스에서 나가는 트래픽
    Outbound = 1,
}

/// 멀티밸류 엔트리 (헤더/쿼리 공용)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiValue {
    /// 이름 (헤더명 또는 쿼리 키)
    #[prost(string, tag = "1")]
    pub name: String,
    /// 값 목록
    #[prost(string, repeated, tag = "2")]
    pub values: Vec<String>,
}

/// 캡처된 요청 측
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TapRequest {
    /// HTTP 메서드
    #[prost(string, tag = "1")]
    pub method: String,
    /// 요청 경로
    #[prost(string, tag = "2")]
    pub path: String,
    /// 쿼리 파라미터
    #[prost(message, repeated, tag = "3")]
    pub query: Vec<MultiValue>,
    /// 요청 헤더
    #[prost(message, repeated, tag = "4")]
    pub headers: Vec<MultiValue>,
    /// 요청 본문
    #[prost(bytes = "vec", tag = "5")]
    pub body: Vec<u8>,
}

/// 캡처된 응답 측
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TapResponse {
    /// HTTP 상태 코드
    #[prost(uint32, tag = "1")]
    pub status: u32,
    /// 응답 헤더
    #[prost(message, repeated, tag = "2")]
    pub headers: Vec<MultiValue>,
    /// 응답 본문
    #[prost(bytes = "vec", tag = "3")]
    pub body: Vec<u8>,
}

/// 캡처 레코드 한 건
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TapCapture {
    /// 트래픽 방향
    #[prost(enumeration = "TapDirection", tag = "1")]
    pub direction: i32,
    /// 요청 측
    #[prost(message, optional, tag = "2")]
    pub request: Option<TapRequest>,
    /// 응답 측
    #[prost(message, optional, tag = "3")]
    pub response: Option<TapResponse>,
    /// 관측 시각 (Unix epoch, 밀리초)
    #[prost(int64, tag = "4")]
    pub observed_at_unix_ms: i64,
    /// 출처 레이블 (namespace, workload, route 등)
    #[prost(map = "string, string", tag = "5")]
    pub source_labels: std::collections::HashMap<String, String>,
}

/// 레코드 한 건에 대한 응답
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TapAck {
    /// 수용 여부
    #[prost(bool, tag = "1")]
    pub accepted: bool,
    /// 중복으로 억제되었는지 여부
    #[prost(bool, tag = "2")]
    pub duplicate: bool,
    /// 드롭 사유 (수용 시 빈 문자열)
    #[prost(string, tag = "3")]
    pub dropped_reason: String,
}

/// 와이어 메시지를 내부 레코드로 변환하고 형태를 검증합니다.
///
/// 본문이 `max_body_bytes`를 초과하면 잘라내고 잘림 플래그를 설정합니다.
///
/// # Errors
///
/// 요청/응답 누락, 빈 메서드, `/`로 시작하지 않는 경로,
/// 100-599 범위 밖의 상태 코드는 [`CollectorError::Validation`]입니다.
pub fn decode_capture(
    message: TapCapture,
    max_body_bytes: usize,
) -> Result<CaptureRecord, CollectorError> {
    let direction = match TapDirection::try_from(message.direction) {
        Ok(TapDirection::Inbound) => Direction::Inbound,
        Ok(TapDirection::Outbound) => Direction::Outbound,
        Err(_) => {
            return Err(CollectorError::Validation {
                reason: format!("unknown direction {}", message.direction),
            });
        }
    };

    let request = message.request.ok_or_else(|| CollectorError::Validation {
        reason: "missing request".to_owned(),
    })?;
    let response = message.response.ok_or_else(|| CollectorError::Validation {
        reason: "missing response".to_owned(),
    })?;

    let method = request.method.trim().to_uppercase();
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(CollectorError::Validation {
            reason: format!("invalid method '{}'", request.method),
        });
    }

    if !request.path.starts_with('/') {
        return Err(CollectorError::Validation {
            reason: format!("path must start with '/': '{}'", request.path),
        });
    }

    if !(100..=599).contains(&response.status) {
        return Err(CollectorError::Validation {
            reason: format!("status {} out of range", response.status),
        });
    }

    let (request_body, request_truncated) = bound_body(request.body, max_body_bytes);
    let (response_body, response_truncated) = bound_body(response.body, max_body_bytes);

    let observed_at = SystemTime::UNIX_EPOCH
        + Duration::from_millis(u64::try_from(message.observed_at_unix_ms).unwrap_or(0));

    Ok(CaptureRecord {
        direction,
        request: RequestRecord {
            method,
            path: request.path,
            query: collect_multi(request.query, false),
            headers: collect_multi(request.headers, true),
            body: request_body,
            body_truncated: request_truncated,
        },
        response: ResponseRecord {
            status: response.status as u16,
            headers: collect_multi(response.headers, true),
            body: response_body,
            body_truncated: response_truncated,
        },
        observed_at,
        source_labels: message.source_labels.into_iter().collect(),
    })
}

/// 본문을 크기 제한에 맞춰 자릅니다.
fn bound_body(body: Vec<u8>, max_bytes: usize) -> (Bytes, bool) {
    if body.len() > max_bytes {
        let mut bounded = body;
        bounded.truncate(max_bytes);
        (Bytes::from(bounded), true)
    } else {
        (Bytes::from(body), false)
    }
}

/// 멀티밸류 목록을 맵으로 모읍니다. 중복된 이름은 값을 이어 붙입니다.
fn collect_multi(entries: Vec<MultiValue>, lowercase_names: bool) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in entries {
        let name = if lowercase_names {
            entry.name.to_lowercase()
        } else {
            entry.name
        };
        out.entry(name).or_default().extend(entry.values);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn sample_message() -> TapCapture {
        TapCapture {
            direction: TapDirection::Inbound as i32,
            request: Some(TapRequest {
                method: "get".to_owned(),
                path: "/v1/users/42".to_owned(),
                query: vec![MultiValue {
                    name: "page".to_owned(),
                    values: vec!["1".to_owned()],
                }],
                headers: vec![MultiValue {
                    name: "Content-Type".to_owned(),
                    values: vec!["application/json".to_owned()],
                }],
                body: Vec::new(),
            }),
            response: Some(TapResponse {
                status: 200,
                headers: Vec::new(),
                body: br#"{"id":42}"#.to_vec(),
            }),
            observed_at_unix_ms: 1_700_000_000_000,
            source_labels: [("namespace".to_owned(), "payments".to_owned())]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let message = sample_message();
        let mut buf = Vec::new();
        message.encode(&mut buf).unwrap();
        let back = TapCapture::decode(buf.as_slice()).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn decode_normalizes_method_and_header_names() {
        let record = decode_capture(sample_message(), 8192).unwrap();
        assert_eq!(record.request.method, "GET");
        assert!(record.request.headers.contains_key("content-type"));
        assert_eq!(record.response.status, 200);
        assert_eq!(
            record.source_labels.get("namespace"),
            Some(&"payments".to_owned())
        );
    }

    #[test]
    fn missing_request_is_rejected() {
        let mut message = sample_message();
        message.request = None;
        let err = decode_capture(message, 8192).unwrap_err();
        assert!(err.to_string().contains("missing request"));
    }

    #[test]
    fn missing_response_is_rejected() {
        let mut message = sample_message();
        message.response = None;
        assert!(decode_capture(message, 8192).is_err());
    }

    #[test]
    fn empty_method_is_rejected() {
        let mut message = sample_message();
        message.request.as_mut().unwrap().method = "  ".to_owned();
        assert!(decode_capture(message, 8192).is_err());
    }

    #[test]
    fn relative_path_is_rejected() {
        let mut message = sample_message();
        message.request.as_mut().unwrap().path = "users/42".to_owned();
        assert!(decode_capture(message, 8192).is_err());
    }

    #[test]
    fn out_of_range_status_is_rejected() {
        let mut message = sample_message();
        message.response.as_mut().unwrap().status = 600;
        assert!(decode_capture(message, 8192).is_err());

        let mut message = sample_message();
        message.response.as_mut().unwrap().status = 99;
        assert!(decode_capture(message, 8192).is_err());
    }

    #[test]
    fn unknown_direction_is_rejected() {
        let mut message = sample_message();
        message.direction = 7;
        assert!(decode_capture(message, 8192).is_err());
    }

    #[test]
    fn body_at_limit_is_not_truncated() {
        let mut message = sample_message();
        message.request.as_mut().unwrap().body = vec![b'x'; 8192];
        let record = decode_capture(message, 8192).unwrap();
        assert_eq!(record.request.body.len(), 8192);
        assert!(!record.request.body_truncated);
    }

    #[test]
    fn body_over_limit_is_truncated_and_flagged() {
        let mut message = sample_message();
        message.request.as_mut().unwrap().body = vec![b'x'; 8193];
        let record = decode_capture(message, 8192).unwrap();
        assert_eq!(record.request.body.len(), 8192);
        assert!(record.request.body_truncated);
    }

    #[test]
    fn duplicate_header_names_are_merged() {
        let mut message = sample_message();
        message.request.as_mut().unwrap().headers = vec![
            MultiValue {
                name: "Accept".to_owned(),
                values: vec!["text/html".to_owned()],
            },
            MultiValue {
                name: "accept".to_owned(),
                values: vec!["application/json".to_owned()],
            },
        ];
        let record = decode_capture(message, 8192).unwrap();
        assert_eq!(record.request.headers["accept"].len(), 2);
    }
}
