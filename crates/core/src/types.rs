//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 사이드카 탭에서 수신한 캡처 레코드, 정제(sanitize) 결과,
//! 목 서버 규칙 기술자(descriptor)를 정의합니다.
//! 캡처 원본([`CaptureRecord`])은 의도적으로 `Serialize`를 구현하지 않습니다.
//! 정제 전 페이로드는 어디에도 저장되지 않아야 합니다.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// 트래픽 방향
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 서비스로 들어오는 트래픽
    #[default]
    Inbound,
    /// 서비스에서 나가는 트래픽
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

/// 캡처된 요청 측 데이터
///
/// 헤더 이름은 수신 시점에 소문자로 정규화됩니다.
/// 본문이 `max_body_bytes`를 초과하면 잘라내고 `body_truncated`를 설정합니다.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// HTTP 메서드 (대문자)
    pub method: String,
    /// 요청 경로 (`/`로 시작)
    pub path: String,
    /// 쿼리 파라미터 (키 → 값 목록)
    pub query: BTreeMap<String, Vec<String>>,
    /// 요청 헤더 (소문자 이름 → 값 목록)
    pub headers: BTreeMap<String, Vec<String>>,
    /// 요청 본문 (비어 있을 수 있음)
    pub body: Bytes,
    /// 본문이 크기 제한으로 잘렸는지 여부
    pub body_truncated: bool,
}

/// 캡처된 응답 측 데이터
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    /// HTTP 상태 코드 (100-599)
    pub status: u16,
    /// 응답 헤더 (소문자 이름 → 값 목록)
    pub headers: BTreeMap<String, Vec<String>>,
    /// 응답 본문
    pub body: Bytes,
    /// 본문이 크기 제한으로 잘렸는지 여부
    pub body_truncated: bool,
}

/// 사이드카 탭이 전달한 요청/응답 한 쌍
///
/// Collector 메모리 안에서만 존재하며, descriptor로 변환된 뒤 폐기됩니다.
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    /// 트래픽 방향
    pub direction: Direction,
    /// 요청 측
    pub request: RequestRecord,
    /// 응답 측
    pub response: ResponseRecord,
    /// 관측 시각 (사이드카 벽시계 기준)
    pub observed_at: SystemTime,
    /// 출처 레이블 (namespace, workload, route 등)
    pub source_labels: BTreeMap<String, String>,
}

impl fmt::Display for CaptureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} -> {}",
            self.direction, self.request.method, self.request.path, self.response.status,
        )
    }
}

/// 정제된 본문 내용
///
/// JSON 본문은 파싱된 트리 형태로 한 번만 보관하여
/// 재직렬화와 핑거프린트 계산에 재사용합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BodyContent {
    /// 빈 본문
    Empty,
    /// JSON으로 파싱된 본문
    Json(serde_json::Value),
    /// 일반 텍스트 본문 (UTF-8 lossy)
    Text(String),
}

impl BodyContent {
    /// 본문이 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// 정제된 본문 (내용 + 잘림 여부)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedBody {
    /// 정제된 내용
    pub content: BodyContent,
    /// 수신 시 크기 제한으로 잘렸는지 여부
    pub truncated: bool,
}

/// 정제가 끝난 캡처
///
/// [`CaptureRecord`]와 같은 모양이지만 헤더 값, 쿼리 값, 본문의
/// 민감 데이터가 모두 마커 리터럴로 치환되어 있습니다.
#[derive(Debug, Clone)]
pub struct SanitizedCapture {
    /// 트래픽 방향
    pub direction: Direction,
    /// HTTP 메서드 (대문자)
    pub method: String,
    /// 요청 경로
    pub path: String,
    /// 정제된 쿼리 파라미터 (키/값 정렬됨)
    pub query: BTreeMap<String, Vec<String>>,
    /// 정제된 요청 헤더
    pub request_headers: BTreeMap<String, Vec<String>>,
    /// 정제된 요청 본문
    pub request_body: SanitizedBody,
    /// 응답 상태 코드
    pub status: u16,
    /// 정제된 응답 헤더
    pub response_headers: BTreeMap<String, Vec<String>>,
    /// 정제된 응답 본문
    pub response_body: SanitizedBody,
    /// 관측 시각
    pub observed_at: SystemTime,
    /// 출처 레이블
    pub source_labels: BTreeMap<String, String>,
    /// 패턴별 치환 횟수
    pub sanitization_report: BTreeMap<String, u64>,
}

/// 정제된 요청 측의 정규형에 대한 SHA-256 핑거프린트
///
/// 중복 제거와 멱등 설치의 식별자로 사용됩니다.
/// 직렬화 시 소문자 16진수 문자열로 표현됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// 해시 다이제스트로부터 핑거프린트를 생성합니다.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// 64자리 소문자 16진수 문자열을 반환합니다.
    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut out = String::with_capacity(64);
        for byte in self.0 {
            out.push(HEX[usize::from(byte >> 4)] as char);
            out.push(HEX[usize::from(byte & 0x0f)] as char);
        }
        out
    }

    /// 로그 출력용 앞 12자리를 반환합니다.
    pub fn short(self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }

    /// 16진수 문자열에서 핑거프린트를 복원합니다.
    pub fn parse_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let high = (chunk[0] as char).to_digit(16)?;
            let low = (chunk[1] as char).to_digit(16)?;
            bytes[i] = ((high << 4) | low) as u8;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::parse_hex(&hex)
            .ok_or_else(|| serde::de::Error::custom("expected 64 hex characters"))
    }
}

/// 요청 본문 매칭 조건
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BodyPredicate {
    /// 정제된 본문이 JSON 문서일 때: JSON 동등 비교
    EqualToJson {
        /// 기대하는 JSON 문서
        value: serde_json::Value,
    },
    /// 짧은 비-JSON 본문: 문자열 동등 비교
    EqualTo {
        /// 기대하는 본문 문자열
        value: String,
    },
    /// 잘렸거나 빈 본문: 본문 무시
    Any,
}

/// descriptor의 요청 매칭 블록
///
/// 핑거프린트는 이 블록만의 결정적 함수입니다.
/// 같은 핑거프린트를 가진 두 descriptor는 동일한 매칭 블록을 가집니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    /// HTTP 메서드 (대문자)
    pub method: String,
    /// 요청 경로
    pub path: String,
    /// 정렬된 쿼리 파라미터
    pub query: BTreeMap<String, Vec<String>>,
    /// 본문 매칭 조건
    pub body_predicate: BodyPredicate,
}

/// descriptor의 응답 블록 (고정 응답)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResponse {
    /// 응답 상태 코드
    pub status: u16,
    /// 응답 헤더
    pub headers: BTreeMap<String, Vec<String>>,
    /// 응답 본문
    pub body: BodyContent,
}

/// descriptor 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMetadata {
    /// 원본 캡처의 관측 시각
    pub observed_at: SystemTime,
    /// 출처 레이블
    pub source_labels: BTreeMap<String, String>,
    /// 패턴별 치환 횟수
    pub sanitization_report: BTreeMap<String, u64>,
}

/// 큐 페이로드 — 목 서버 규칙 기술자
///
/// Collector가 생성하여 큐에 적재하고, Rule Loader가 소비하여
/// 목 서버 규칙으로 설치합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockRuleDescriptor {
    /// 멱등 키로 쓰이는 핑거프린트
    pub fingerprint: Fingerprint,
    /// 요청 매칭 블록
    #[serde(rename = "match")]
    pub rule_match: RuleMatch,
    /// 고정 응답 블록
    pub response: RuleResponse,
    /// 메타데이터
    pub metadata: RuleMetadata,
}

impl fmt::Display for MockRuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} [{}]",
            self.rule_match.method,
            self.rule_match.path,
            self.response.status,
            self.fingerprint.short(),
        )
    }
}

/// 설치에 최종 실패한 descriptor의 데드레터 레코드
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// 실패한 descriptor
    pub descriptor: MockRuleDescriptor,
    /// 실패 분류 (transient, permanent 등)
    pub reason: String,
    /// 마지막 에러 메시지
    pub last_error: String,
    /// 시도 횟수
    pub attempts: u32,
    /// 최초 관측 시각
    pub first_seen: SystemTime,
    /// 마지막 시도 시각
    pub last_seen: SystemTime,
}
