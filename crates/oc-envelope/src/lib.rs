//! Envelope construction (C2): turns a loosely-typed incoming mapping
//! (whatever shape an upstream producer submits) into the canonical
//! [`oc_schemas::EnvelopeWire`] the dispatcher queues and eventually
//! dispatches.
//!
//! Historically this mapping arrived in two shapes: a bare dict with
//! `url_callback`/`base_url`/`method`/`params` (Temporal signal payloads),
//! and a CLI-submitted request with `uri`/`method`/`payload`/`headers`.
//! `from_mapping` accepts either by trying a short list of fallback keys
//! per field.

use std::fmt;

use oc_config::BucketLabel;
use oc_schemas::EnvelopeWire;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadInput(pub String);

impl fmt::Display for BadInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad envelope input: {}", self.0)
    }
}

impl std::error::Error for BadInput {}

const URL_CALLBACK_KEYS: &[&str] = &["url_callback", "callback_url", "url"];
const BASE_URL_KEYS: &[&str] = &["base_url", "host", "base"];
const METHOD_KEYS: &[&str] = &["method", "http_method"];
const PARAMS_KEYS: &[&str] = &["params", "payload", "body", "data"];
const ENCODING_KEYS: &[&str] = &["encoding", "content_type"];

fn first_str(mapping: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| mapping.get(*k))
        .and_then(|v| v.as_str().map(str::to_string))
}

/// Builds a canonical envelope from a raw mapping and the bucket it was
/// submitted under. `bucket` is validated against the known bucket set;
/// everything else falls back to the defaults a bare rate-limiter signal
/// would have carried (`method` = POST, `encoding` = form). `url_callback`
/// defaults to an empty string when absent — it is not an error here;
/// `to_dispatch_payload`'s caller finds out the hard way when the dispatch
/// itself fails against an empty URL.
pub fn from_mapping(bucket: &str, mapping: &Value) -> Result<EnvelopeWire, BadInput> {
    let mapping = mapping
        .as_object()
        .ok_or_else(|| BadInput("envelope payload must be a JSON object".to_string()))?;

    BucketLabel::new(bucket).map_err(|e| BadInput(e.to_string()))?;

    let url_callback = first_str(mapping, URL_CALLBACK_KEYS).unwrap_or_default();
    let base_url = first_str(mapping, BASE_URL_KEYS).unwrap_or_default();
    let method = first_str(mapping, METHOD_KEYS)
        .unwrap_or_else(|| "POST".to_string())
        .to_uppercase();
    let encoding = first_str(mapping, ENCODING_KEYS).unwrap_or_else(|| "form".to_string());

    let mut leftover = mapping.clone();
    for k in URL_CALLBACK_KEYS
        .iter()
        .chain(BASE_URL_KEYS)
        .chain(METHOD_KEYS)
        .chain(PARAMS_KEYS)
        .chain(ENCODING_KEYS)
    {
        leftover.remove(*k);
    }

    let params = PARAMS_KEYS
        .iter()
        .find_map(|k| mapping.get(*k).cloned())
        .unwrap_or_else(|| Value::Object(leftover.clone()));

    Ok(EnvelopeWire {
        bucket: bucket.to_string(),
        url_callback,
        base_url,
        method,
        params,
        encoding,
        meta: leftover,
    })
}

/// Resolves the fully-qualified URL and body/query the activity will send.
/// GET requests carry `params` as a query string; everything else carries
/// it as a JSON body, matching the historical dispatch activity.
pub fn to_dispatch_payload(envelope: &EnvelopeWire) -> (String, Option<Value>) {
    let url = if envelope.base_url.is_empty() {
        envelope.url_callback.clone()
    } else {
        format!(
            "{}{}",
            envelope.base_url.trim_end_matches('/'),
            envelope.url_callback
        )
    };
    if envelope.method.eq_ignore_ascii_case("GET") {
        (url, None)
    } else {
        (url, Some(envelope.params.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_from_canonical_shape() {
        let mapping = json!({
            "url_callback": "/v1/hook",
            "base_url": "https://example.com",
            "method": "post",
            "params": {"a": 1},
        });
        let env = from_mapping("regular", &mapping).unwrap();
        assert_eq!(env.method, "POST");
        assert_eq!(env.url_callback, "/v1/hook");
        assert_eq!(env.base_url, "https://example.com");
    }

    #[test]
    fn falls_back_to_alternate_keys() {
        let mapping = json!({
            "callback_url": "/v1/hook",
            "payload": {"x": 2},
        });
        let env = from_mapping("1m", &mapping).unwrap();
        assert_eq!(env.method, "POST");
        assert_eq!(env.params, json!({"x": 2}));
    }

    #[test]
    fn rejects_unknown_bucket() {
        let mapping = json!({"url_callback": "/x"});
        assert!(from_mapping("not-a-bucket", &mapping).is_err());
    }

    #[test]
    fn missing_url_callback_defaults_to_empty_string() {
        let mapping = json!({"params": {}});
        let env = from_mapping("regular", &mapping).unwrap();
        assert_eq!(env.url_callback, "");
    }

    #[test]
    fn missing_params_falls_back_to_leftover_mapping() {
        let mapping = json!({"url_callback": "/x", "batch_id": "b1", "root_tf": "1h"});
        let env = from_mapping("regular", &mapping).unwrap();
        assert_eq!(env.params, json!({"batch_id": "b1", "root_tf": "1h"}));
        assert_eq!(env.meta, env.params.as_object().cloned().unwrap());
    }

    #[test]
    fn dispatch_payload_uses_query_for_get_and_body_for_post() {
        let mapping = json!({
            "url_callback": "/hook",
            "base_url": "https://h/",
            "method": "GET",
            "params": {"a": 1},
        });
        let env = from_mapping("regular", &mapping).unwrap();
        let (url, body) = to_dispatch_payload(&env);
        assert_eq!(url, "https://h/hook");
        assert!(body.is_none());

        let mapping_post = json!({
            "url_callback": "/hook",
            "method": "POST",
            "params": {"a": 1},
        });
        let env_post = from_mapping("regular", &mapping_post).unwrap();
        let (_, body_post) = to_dispatch_payload(&env_post);
        assert_eq!(body_post, Some(json!({"a": 1})));
    }
}
