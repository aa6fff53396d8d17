//! 패턴 카탈로그 -- 민감 데이터 정규식과 마커의 컴파일/검증
//!
//! 카탈로그는 시작 시 한 번 빌드되며, 정규식은 이때 모두 컴파일됩니다.
//! 마커 리터럴이 어떤 패턴과도 매칭되지 않는다는 것을 빌드 시점에
//! 검증합니다. 이 검증이 실패하면 데몬은 시작하지 않습니다.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use regex::Regex;

use mockbridge_core::config::PatternSpec;

use crate::config::CollectorConfig;
use crate::error::CollectorError;

/// 헤더 deny-list 치환 마커
pub const HEADER_MARKER: &str = "SANITIZED_HEADER";

/// 필드 deny-list 치환 마커
pub const FIELD_MARKER: &str = "SANITIZED_FIELD";

/// 컴파일된 정제 패턴
#[derive(Debug)]
pub struct SanitizePattern {
    /// 패턴 이름 (메트릭 레이블, 리포트 키)
    pub name: String,
    /// 컴파일된 정규식
    pub regex: Regex,
    /// 치환 마커
    pub marker: String,
}

/// 정제 패턴 카탈로그
///
/// 순서가 의미를 가집니다: 하나의 부분 문자열이 여러 패턴에 매칭될 수
/// 있을 때 먼저 나온 패턴이 이깁니다.
#[derive(Debug)]
pub struct PatternCatalog {
    patterns: Vec<SanitizePattern>,
    header_denylist: BTreeSet<String>,
    field_denylist: BTreeSet<String>,
}

impl PatternCatalog {
    /// 설정에서 카탈로그를 빌드합니다.
    ///
    /// 패턴 목록/deny-list가 비어 있으면 기본 목록을 사용합니다.
    ///
    /// # Errors
    ///
    /// - 정규식 컴파일 실패
    /// - 마커가 어떤 패턴과 매칭됨 (재검사 오탐을 막기 위한 치명 에러)
    pub fn from_config(config: &CollectorConfig) -> Result<Self, CollectorError> {
        let specs = if config.sanitize_patterns.is_empty() {
            default_pattern_specs()
        } else {
            config.sanitize_patterns.clone()
        };

        let mut patterns = Vec::with_capacity(specs.len());
        for spec in &specs {
            let regex = Regex::new(&spec.regex).map_err(|e| CollectorError::Catalog {
                name: spec.name.clone(),
                reason: format!("invalid regex: {e}"),
            })?;
            patterns.push(SanitizePattern {
                name: spec.name.clone(),
                regex,
                marker: spec.marker.clone(),
            });
        }

        let header_denylist = if config.header_denylist.is_empty() {
            default_header_denylist()
        } else {
            config
                .header_denylist
                .iter()
                .map(|h| h.to_lowercase())
                .collect()
        };

        let field_denylist = if config.field_name_denylist.is_empty() {
            default_field_denylist()
        } else {
            config
                .field_name_denylist
                .iter()
                .map(|f| f.to_lowercase())
                .collect()
        };

        let catalog = Self {
            patterns,
            header_denylist,
            field_denylist,
        };
        catalog.check_markers()?;
        Ok(catalog)
    }

    /// 모든 마커가 어떤 패턴에도 매칭되지 않는지 검증합니다.
    fn check_markers(&self) -> Result<(), CollectorError> {
        let mut markers: Vec<&str> = self.patterns.iter().map(|p| p.marker.as_str()).collect();
        markers.push(HEADER_MARKER);
        markers.push(FIELD_MARKER);

        for pattern in &self.patterns {
            for marker in &markers {
                if pattern.regex.is_match(marker) {
                    return Err(CollectorError::Catalog {
                        name: pattern.name.clone(),
                        reason: format!("marker '{marker}' matches this pattern"),
                    });
                }
            }
        }
        Ok(())
    }

    /// 입력 문자열에 모든 패턴을 순서대로 적용하고, 패턴별 치환 횟수를
    /// 리포트에 누적합니다.
    pub fn apply(&self, input: &str, report: &mut BTreeMap<String, u64>) -> String {
        let mut current = input.to_owned();
        for pattern in &self.patterns {
            let mut count: u64 = 0;
            let replaced = pattern
                .regex
                .replace_all(&current, |_caps: &regex::Captures<'_>| {
                    count += 1;
                    pattern.marker.clone()
                });
            if count > 0 {
                current = replaced.into_owned();
                *report.entry(pattern.name.clone()).or_insert(0) += count;
            }
        }
        current
    }

    /// 입력이 어느 패턴이라도 매칭하는지 검사합니다.
    ///
    /// 재검사(leak 검출)에 사용됩니다. 매칭된 첫 패턴 이름을 반환합니다.
    pub fn scan(&self, input: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(input))
            .map(|p| p.name.as_str())
    }

    /// 헤더 이름이 deny-list에 있는지 확인합니다 (소문자 기준).
    pub fn is_denied_header(&self, name: &str) -> bool {
        self.header_denylist.contains(name)
    }

    /// 필드 이름이 deny-list에 있는지 확인합니다 (대소문자 무시).
    pub fn is_denied_field(&self, name: &str) -> bool {
        self.field_denylist.contains(&name.to_lowercase())
    }

    /// 로드된 패턴 수를 반환합니다.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

/// 기본 패턴 카탈로그
///
/// 신용카드/국가 식별번호 계열은 Luhn 검증 없이 자릿수 모양만으로
/// 공격적으로 치환합니다.
pub fn default_pattern_specs() -> Vec<PatternSpec> {
    let spec = |name: &str, regex: &str, marker: &str| PatternSpec {
        name: name.to_owned(),
        regex: regex.to_owned(),
        marker: marker.to_owned(),
    };

    vec![
        spec(
            "jwt",
            r"\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+",
            "SANITIZED_JWT",
        ),
        spec(
            "bearer_auth",
            r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]+",
            "SANITIZED_BEARER",
        ),
        spec(
            "basic_auth",
            r"(?i)\bbasic\s+[A-Za-z0-9+/=]+",
            "SANITIZED_BASIC",
        ),
        spec(
            "api_key",
            r#"(?i)\b(?:api[_-]?key|x-api-key)["']?\s*[:=]\s*["']?[A-Za-z0-9._-]{8,}"#,
            "SANITIZED_API_KEY",
        ),
        spec(
            "credit_card",
            r"\b\d(?:[ -]?\d){12,18}\b",
            "SANITIZED_CARD",
        ),
        spec("cpf", r"\b\d{3}\.?\d{3}\.?\d{3}-?\d{2}\b", "SANITIZED_CPF"),
        spec(
            "cnpj",
            r"\b\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}\b",
            "SANITIZED_CNPJ",
        ),
        spec("ssn", r"\b\d{3}-\d{2}-\d{4}\b", "SANITIZED_SSN"),
        spec(
            "phone",
            r"\+\d{1,3}[ -]?(?:\(?\d{1,4}\)?[ -]?)?\d{3,5}[ -]?\d{4}\b",
            "SANITIZED_PHONE",
        ),
        spec(
            "email",
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            "SANITIZED_EMAIL",
        ),
    ]
}

/// 기본 헤더 deny-list
pub fn default_header_denylist() -> BTreeSet<String> {
    [
        "authorization",
        "proxy-authorization",
        "cookie",
        "set-cookie",
        "x-api-key",
        "x-auth-token",
        "x-access-token",
        "x-refresh-token",
        "x-session-id",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

/// 기본 필드 이름 deny-list
pub fn default_field_denylist() -> BTreeSet<String> {
    [
        "password",
        "passwd",
        "pwd",
        "pass",
        "secret",
        "token",
        "api_key",
        "apikey",
        "access_token",
        "refresh_token",
        "private_key",
        "client_secret",
        "credit_card",
        "card_number",
        "cpf",
        "cnpj",
        "ssn",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}
