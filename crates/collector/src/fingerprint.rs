//! 핑거프린트 계산 -- 정제된 요청 측의 정규형에 대한 SHA-256
//!
//! 응답 측은 포함하지 않습니다. 같은 요청에 다른 응답이 오면 중복으로
//! 간주하고 처음 관측된 응답이 이깁니다.
//!
//! # 정규형
//! - 메서드 대문자
//! - 경로 그대로
//! - 쿼리: 키 정렬 후 값 정렬, `k=v&k=v` 형태로 퍼센트 인코딩
//! - 본문: JSON이면 키 정렬 + 공백 없는 재직렬화, 아니면 정제된
//!   바이트를 `body_limit`까지 잘라서 사용
//!
//! `method \n path \n query \n body`를 이어 붙여 SHA-256을 취합니다.

use sha2::{Digest, Sha256};

use mockbridge_core::types::{BodyContent, Fingerprint, SanitizedBody, SanitizedCapture};

/// 정제된 캡처의 요청 측 핑거프린트를 계산합니다.
pub fn compute(capture: &SanitizedCapture, body_limit: usize) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(capture.method.to_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(capture.path.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_query(&capture.query).as_bytes());
    hasher.update(b"\n");
    hasher.update(&canonical_body(&capture.request_body, body_limit));

    let digest = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Fingerprint::from_bytes(bytes)
}

/// 쿼리 맵을 정규형 문자열로 직렬화합니다.
///
/// 키는 `BTreeMap` 순서(정렬됨)를 따르고, 키마다 값을 정렬합니다.
fn canonical_query(query: &std::collections::BTreeMap<String, Vec<String>>) -> String {
    let mut parts = Vec::new();
    for (key, values) in query {
        let mut sorted = values.clone();
        sorted.sort();
        for value in sorted {
            parts.push(format!("{}={}", percent_encode(key), percent_encode(&value)));
        }
    }
    parts.join("&")
}

/// 본문을 정규형 바이트로 변환합니다.
fn canonical_body(body: &SanitizedBody, limit: usize) -> Vec<u8> {
    match &body.content {
        BodyContent::Empty => Vec::new(),
        // serde_json::Map은 BTreeMap 기반이므로 직렬화 결과의 키가 정렬됨
        BodyContent::Json(value) => serde_json::to_vec(value).unwrap_or_default(),
        BodyContent::Text(text) => {
            let bytes = text.as_bytes();
            bytes[..bytes.len().min(limit)].to_vec()
        }
    }
}

/// RFC 3986 unreserved 문자를 제외한 바이트를 `%XX`로 인코딩합니다.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            other => {
                out.push('%');
                out.push(char::from_digit(u32::from(other >> 4), 16).unwrap_or('0').to_ascii_uppercase());
                out.push(char::from_digit(u32::from(other & 0x0f), 16).unwrap_or('0').to_ascii_uppercase());
            }
        }
    }
    out
}
