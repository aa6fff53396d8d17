//! 정제 엔진 -- 캡처 레코드에서 민감 데이터를 마커로 치환합니다.
//!
//! [`Sanitizer::sanitize`]는 순수 함수입니다: I/O가 없고, 같은 입력과
//! 설정에 대해 항상 같은 출력을 냅니다. 치환이 끝난 뒤 같은 패턴
//! 목록으로 전체를 재검사하여, 잔존 매칭이 있으면 레코드를 통째로
//! 버립니다(fail-closed).
//!
//! # 처리 순서
//! 1. 헤더: deny-list 이름은 값 전체를 치환, 나머지는 패턴 적용
//! 2. 쿼리: deny-list 키는 값 전체를 치환, 나머지는 패턴 적용
//! 3. 본문: JSON이면 변형 트리 워크, 아니면 단일 문자열 패턴 적용
//! 4. 패턴별 치환 횟수를 리포트에 기록
//! 5. 재검사 -- 실패 시 [`SanitizeOutcome::Leak`]

pub mod catalog;

pub use catalog::{FIELD_MARKER, HEADER_MARKER, PatternCatalog};

use std::collections::BTreeMap;

use mockbridge_core::types::{BodyContent, CaptureRecord, SanitizedBody, SanitizedCapture};

/// 정제 결과
///
/// 재검사에서 패턴이 잔존하면 캡처를 버리고 `Leak`을 반환합니다.
pub enum SanitizeOutcome {
    /// 정제 완료, 잔존 패턴 없음
    Clean(Box<SanitizedCapture>),
    /// 재검사에서 패턴이 검출됨 -- 레코드는 버려야 함
    Leak {
        /// 검출된 패턴 이름
        pattern: String,
    },
}

/// 정제 엔진
pub struct Sanitizer {
    catalog: PatternCatalog,
}

impl Sanitizer {
    /// 컴파일된 카탈로그로 정제 엔진을 생성합니다.
    pub fn new(catalog: PatternCatalog) -> Self {
        Self { catalog }
    }

    /// 캡처 레코드를 정제합니다.
    pub fn sanitize(&self, record: &CaptureRecord) -> SanitizeOutcome {
        let mut report = BTreeMap::new();

        let request_headers = self.sanitize_headers(&record.request.headers, &mut report);
        let query = self.sanitize_query(&record.request.query, &mut report);
        let request_body = self.sanitize_body(
            &record.request.body,
            record.request.body_truncated,
            &mut report,
        );

        let response_headers = self.sanitize_headers(&record.response.headers, &mut report);
        let response_body = self.sanitize_body(
            &record.response.body,
            record.response.body_truncated,
            &mut report,
        );

        let sanitized = SanitizedCapture {
            direction: record.direction,
            method: record.request.method.clone(),
            path: record.request.path.clone(),
            query,
            request_headers,
            request_body,
            status: record.response.status,
            response_headers,
            response_body,
            observed_at: record.observed_at,
            source_labels: record.source_labels.clone(),
            sanitization_report: report,
        };

        match self.rescan(&sanitized) {
            Some(pattern) => SanitizeOutcome::Leak {
                pattern: pattern.to_owned(),
            },
            None => SanitizeOutcome::Clean(Box::new(sanitized)),
        }
    }

    /// 카탈로그에 대한 참조를 반환합니다.
    pub fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    fn sanitize_headers(
        &self,
        headers: &BTreeMap<String, Vec<String>>,
        report: &mut BTreeMap<String, u64>,
    ) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        for (name, values) in headers {
            if self.catalog.is_denied_header(name) {
                *report.entry(format!("{name}_header")).or_insert(0) += values.len() as u64;
                out.insert(name.clone(), vec![HEADER_MARKER.to_owned(); values.len()]);
            } else {
                let cleaned = values
                    .iter()
                    .map(|v| self.catalog.apply(v, report))
                    .collect();
                out.insert(name.clone(), cleaned);
            }
        }
        out
    }

    fn sanitize_query(
        &self,
        query: &BTreeMap<String, Vec<String>>,
        report: &mut BTreeMap<String, u64>,
    ) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        for (key, values) in query {
            if self.catalog.is_denied_field(key) {
                *report.entry(format!("{key}_field")).or_insert(0) += values.len() as u64;
                out.insert(key.clone(), vec![FIELD_MARKER.to_owned(); values.len()]);
            } else {
                let cleaned = values
                    .iter()
                    .map(|v| self.catalog.apply(v, report))
                    .collect();
                out.insert(key.clone(), cleaned);
            }
        }
        out
    }

    fn sanitize_body(
        &self,
        body: &[u8],
        truncated: bool,
        report: &mut BTreeMap<String, u64>,
    ) -> SanitizedBody {
        if body.is_empty() {
            return SanitizedBody {
                content: BodyContent::Empty,
                truncated,
            };
        }

        let text = String::from_utf8_lossy(body);

        // 잘린 본문은 JSON 시도 없이 불투명 텍스트로 취급
        if !truncated {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                let cleaned = self.sanitize_json_value(value, report);
                return SanitizedBody {
                    content: BodyContent::Json(cleaned),
                    truncated,
                };
            }
        }

        SanitizedBody {
            content: BodyContent::Text(self.catalog.apply(&text, report)),
            truncated,
        }
    }

    /// JSON 트리를 변형합니다: 문자열 리프에 패턴 적용,
    /// deny-list 키의 값은 형태와 무관하게 필드 마커로 치환.
    fn sanitize_json_value(
        &self,
        value: serde_json::Value,
        report: &mut BTreeMap<String, u64>,
    ) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, inner) in map {
                    if self.catalog.is_denied_field(&key) {
                        *report.entry(format!("{key}_field")).or_insert(0) += 1;
                        out.insert(key, serde_json::Value::String(FIELD_MARKER.to_owned()));
                    } else {
                        out.insert(key, self.sanitize_json_value(inner, report));
                    }
                }
                serde_json::Value::Object(out)
            }
            serde_json::Value::Array(items) => serde_json::Value::Array(
                items
                    .into_iter()
                    .map(|item| self.sanitize_json_value(item, report))
                    .collect(),
            ),
            serde_json::Value::String(s) => {
                serde_json::Value::String(self.catalog.apply(&s, report))
            }
            other => other,
        }
    }

    /// 정제 결과의 모든 문자열을 패턴 목록으로 재검사합니다.
    ///
    /// descriptor에 들어갈 수 있는 모든 필드가 대상입니다.
    /// 매칭된 첫 패턴 이름을 반환합니다.
    fn rescan(&self, capture: &SanitizedCapture) -> Option<&str> {
        if let Some(p) = self.catalog.scan(&capture.method) {
            return Some(p);
        }
        if let Some(p) = self.catalog.scan(&capture.path) {
            return Some(p);
        }
        for (key, values) in &capture.query {
            if let Some(p) = self.catalog.scan(key) {
                return Some(p);
            }
            for value in values {
                if let Some(p) = self.catalog.scan(value) {
                    return Some(p);
                }
            }
        }
        for headers in [&capture.request_headers, &capture.response_headers] {
            for values in headers.values() {
                for value in values {
                    if let Some(p) = self.catalog.scan(value) {
                        return Some(p);
                    }
                }
            }
        }
        for body in [&capture.request_body, &capture.response_body] {
            let rendered = match &body.content {
                BodyContent::Empty => continue,
                BodyContent::Json(value) => serde_json::to_string(value).unwrap_or_default(),
                BodyContent::Text(text) => text.clone(),
            };
            if let Some(p) = self.catalog.scan(&rendered) {
                return Some(p);
            }
        }
        for (key, value) in &capture.source_labels {
            if let Some(p) = self.catalog.scan(key) {
                return Some(p);
            }
            if let Some(p) = self.catalog.scan(value) {
                return Some(p);
            }
        }
        None
    }
}
