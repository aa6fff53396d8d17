//! descriptor -> 목 서버 규칙(stub mapping) 변환
//!
//! 매칭 블록은 요청 매처 객체(method + urlPath + queryParameters +
//! bodyPatterns)로, 응답 블록은 고정 응답 객체(status/headers/body)로
//! 변환됩니다. 핑거프린트는 규칙의 외부 멱등 키입니다: stub id는
//! 핑거프린트 앞 16바이트를 UUID 형태로 빚은 결정적 값이라
//! 같은 descriptor는 항상 같은 규칙을 덮어씁니다.

use mockbridge_core::types::{BodyContent, BodyPredicate, Fingerprint, MockRuleDescriptor};

/// 핑거프린트에서 결정적 stub id(UUID 형태)를 만듭니다.
pub fn stub_id(fingerprint: Fingerprint) -> String {
    let hex = fingerprint.to_hex();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32],
    )
}

/// descriptor를 목 서버 admin API의 stub mapping JSON으로 변환합니다.
pub fn to_stub_mapping(descriptor: &MockRuleDescriptor) -> serde_json::Value {
    let mut request = serde_json::Map::new();
    request.insert(
        "method".to_owned(),
        serde_json::Value::String(descriptor.rule_match.method.clone()),
    );
    request.insert(
        "urlPath".to_owned(),
        serde_json::Value::String(descriptor.rule_match.path.clone()),
    );

    if !descriptor.rule_match.query.is_empty() {
        let mut query_matchers = serde_json::Map::new();
        for (key, values) in &descriptor.rule_match.query {
            let matcher = match values.as_slice() {
                [single] => serde_json::json!({ "equalTo": single }),
                many => serde_json::json!({ "matches": format!(".*({}).*", many.join("|")) }),
            };
            query_matchers.insert(key.clone(), matcher);
        }
        request.insert(
            "queryParameters".to_owned(),
            serde_json::Value::Object(query_matchers),
        );
    }

    match &descriptor.rule_match.body_predicate {
        BodyPredicate::EqualToJson { value } => {
            request.insert(
                "bodyPatterns".to_owned(),
                serde_json::json!([{ "equalToJson": value }]),
            );
        }
        BodyPredicate::EqualTo { value } => {
            request.insert(
                "bodyPatterns".to_owned(),
                serde_json::json!([{ "equalTo": value }]),
            );
        }
        BodyPredicate::Any => {}
    }

    let mut response = serde_json::Map::new();
    response.insert(
        "status".to_owned(),
        serde_json::Value::Number(descriptor.response.status.into()),
    );
    if !descriptor.response.headers.is_empty() {
        let mut headers = serde_json::Map::new();
        for (name, values) in &descriptor.response.headers {
            headers.insert(name.clone(), serde_json::Value::String(values.join(", ")));
        }
        response.insert("headers".to_owned(), serde_json::Value::Object(headers));
    }
    match &descriptor.response.body {
        BodyContent::Empty => {}
        BodyContent::Json(value) => {
            response.insert("jsonBody".to_owned(), value.clone());
        }
        BodyContent::Text(text) => {
            response.insert("body".to_owned(), serde_json::Value::String(text.clone()));
        }
    }

    serde_json::json!({
        "id": stub_id(descriptor.fingerprint),
        "name": format!(
            "{} {} ({})",
            descriptor.rule_match.method,
            descriptor.rule_match.path,
            descriptor.fingerprint.short(),
        ),
        "request": serde_json::Value::Object(request),
        "response": serde_json::Value::Object(response),
        "metadata": {
            "fingerprint": descriptor.fingerprint.to_hex(),
            "observed_at": descriptor.metadata.observed_at,
            "source_labels": descriptor.metadata.source_labels,
            "sanitization_report": descriptor.metadata.sanitization_report,
            "generated_by": "mockbridge",
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::SystemTime;

    use mockbridge_core::types::{RuleMatch, RuleMetadata, RuleResponse};

    fn descriptor(
        method: &str,
        path: &str,
        query: &[(&str, &[&str])],
        body_predicate: BodyPredicate,
        response_body: BodyContent,
    ) -> MockRuleDescriptor {
        let mut query_map = BTreeMap::new();
        for (key, values) in query {
            query_map.insert(
                (*key).to_owned(),
                values.iter().map(|v| (*v).to_owned()).collect(),
            );
        }
        MockRuleDescriptor {
            fingerprint: Fingerprint::from_bytes([0xcd; 32]),
            rule_match: RuleMatch {
                method: method.to_owned(),
                path: path.to_owned(),
                query: query_map,
                body_predicate,
            },
            response: RuleResponse {
                status: 200,
                headers: BTreeMap::new(),
                body: response_body,
            },
            metadata: RuleMetadata {
                observed_at: SystemTime::UNIX_EPOCH,
                source_labels: BTreeMap::new(),
                sanitization_report: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn stub_id_is_deterministic_uuid_shape() {
        let fp = Fingerprint::from_bytes([0xcd; 32]);
        let id = stub_id(fp);
        assert_eq!(id, stub_id(fp));
        assert_eq!(id.len(), 36);
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(
            parts.iter().map(|p| p.len()).collect::<Vec<_>>(),
            vec![8, 4, 4, 4, 12]
        );
    }

    #[test]
    fn get_without_body_has_no_body_patterns() {
        let mapping = to_stub_mapping(&descriptor(
            "GET",
            "/v1/users/42",
            &[],
            BodyPredicate::Any,
            BodyContent::Json(serde_json::json!({"id": 42, "name": "John"})),
        ));

        assert_eq!(mapping["request"]["method"], "GET");
        assert_eq!(mapping["request"]["urlPath"], "/v1/users/42");
        assert!(mapping["request"].get("bodyPatterns").is_none());
        assert_eq!(mapping["response"]["status"], 200);
        assert_eq!(mapping["response"]["jsonBody"]["id"], 42);
    }

    #[test]
    fn json_body_becomes_equal_to_json() {
        let mapping = to_stub_mapping(&descriptor(
            "POST",
            "/pay",
            &[],
            BodyPredicate::EqualToJson {
                value: serde_json::json!({"card": "SANITIZED_CARD", "amount": 10}),
            },
            BodyContent::Empty,
        ));

        let pattern = &mapping["request"]["bodyPatterns"][0];
        assert_eq!(pattern["equalToJson"]["card"], "SANITIZED_CARD");
        assert_eq!(pattern["equalToJson"]["amount"], 10);
    }

    #[test]
    fn text_body_becomes_equal_to() {
        let mapping = to_stub_mapping(&descriptor(
            "POST",
            "/form",
            &[],
            BodyPredicate::EqualTo {
                value: "a=1&b=2".to_owned(),
            },
            BodyContent::Text("ok".to_owned()),
        ));

        assert_eq!(mapping["request"]["bodyPatterns"][0]["equalTo"], "a=1&b=2");
        assert_eq!(mapping["response"]["body"], "ok");
    }

    #[test]
    fn single_query_value_uses_equal_to() {
        let mapping = to_stub_mapping(&descriptor(
            "GET",
            "/search",
            &[("a", &["1"]), ("b", &["2"])],
            BodyPredicate::Any,
            BodyContent::Empty,
        ));

        assert_eq!(mapping["request"]["queryParameters"]["a"]["equalTo"], "1");
        assert_eq!(mapping["request"]["queryParameters"]["b"]["equalTo"], "2");
    }

    #[test]
    fn multi_query_values_use_matches() {
        let mapping = to_stub_mapping(&descriptor(
            "GET",
            "/t",
            &[("x", &["1", "2"])],
            BodyPredicate::Any,
            BodyContent::Empty,
        ));

        let matcher = mapping["request"]["queryParameters"]["x"]["matches"]
            .as_str()
            .unwrap();
        assert!(matcher.contains("1|2"));
    }

    #[test]
    fn metadata_carries_full_fingerprint() {
        let mapping = to_stub_mapping(&descriptor(
            "GET",
            "/x",
            &[],
            BodyPredicate::Any,
            BodyContent::Empty,
        ));
        assert_eq!(
            mapping["metadata"]["fingerprint"].as_str().unwrap(),
            "cd".repeat(32)
        );
        assert_eq!(mapping["metadata"]["generated_by"], "mockbridge");
    }

    #[test]
    fn response_headers_are_joined() {
        let mut d = descriptor("GET", "/x", &[], BodyPredicate::Any, BodyContent::Empty);
        d.response.headers.insert(
            "cache-control".to_owned(),
            vec!["no-cache".to_owned(), "no-store".to_owned()],
        );
        let mapping = to_stub_mapping(&d);
        assert_eq!(
            mapping["response"]["headers"]["cache-control"],
            "no-cache, no-store"
        );
    }
}
