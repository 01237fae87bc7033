use anyhow::Result;
use serde_json::{Value, json};

use crate::api::RawResponse;
use crate::error::ApiClientError;

pub const SPREADSHEET_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Background job states that do not indicate failure.
const PENDING_OR_DONE: &[&str] = &["not-started", "success", "parsing"];

/// Top-level keys that mark a JSON object without a `status` as a success.
const SUCCESS_KEYS: &[&str] = &[
    "results",
    "readings",
    "data",
    "status",
    "id",
    "organizations",
    "sha",
    "users",
];

/// Extracted response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    /// Raw `.xlsx` bytes.
    Spreadsheet(Vec<u8>),
    /// Any other non-JSON body (PDF reports, plain text).
    Content { content_type: String, body: Vec<u8> },
}

impl Payload {
    /// Converts to JSON; non-JSON content is wrapped as
    /// `{"status": "success", "content": <text>}`.
    pub fn into_json(self) -> Result<Value> {
        match self {
            Payload::Json(v) => Ok(v),
            Payload::Content { body, .. } => Ok(json!({
                "status": "success",
                "content": String::from_utf8_lossy(&body),
            })),
            Payload::Spreadsheet(_) => {
                Err(ApiClientError::seed("expected JSON but SEED returned a spreadsheet").into())
            }
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Json(v) => v.to_string().into_bytes(),
            Payload::Spreadsheet(b) => b,
            Payload::Content { body, .. } => body,
        }
    }
}

fn is_json(raw: &RawResponse) -> bool {
    raw.content_type.contains(JSON_CONTENT_TYPE)
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn pending_or_done(status: Option<&Value>) -> bool {
    status
        .and_then(Value::as_str)
        .map(|s| PENDING_OR_DONE.contains(&s))
        .unwrap_or(false)
}

fn seed_error(raw: &RawResponse, message: impl Into<String>, caller: &str) -> anyhow::Error {
    ApiClientError::seed(message)
        .with_url(&raw.url)
        .with_caller(caller)
        .with_verb(raw.verb.as_str())
        .with_status(raw.status.as_u16())
        .into()
}

/// Decides whether a response is a failure according to its status and body.
fn is_error(raw: &RawResponse) -> bool {
    let code = raw.status.as_u16();
    if code == 204 {
        return false;
    }
    if raw.content_type.contains(SPREADSHEET_CONTENT_TYPE)
        || raw.content_type.contains(PDF_CONTENT_TYPE)
    {
        return false;
    }
    if !is_json(raw) {
        return raw.body.is_empty();
    }

    let body: Value = match serde_json::from_slice(&raw.body) {
        Ok(v) => v,
        Err(_) => return true,
    };
    match &body {
        Value::Object(obj) => {
            if let Some(status) = obj.get("status").filter(|s| truthy(s)) {
                if obj.contains_key("progress_key") {
                    // e.g. deleting a cycle: status + progress_key, no progress_data
                    !pending_or_done(Some(status))
                } else {
                    status.as_str() == Some("error")
                }
            } else if let Some(success) = obj.get("success") {
                // file uploads
                !truthy(success)
            } else if let Some(progress) = obj.get("progress_data") {
                !pending_or_done(progress.get("status"))
            } else {
                !obj.keys().any(|k| SUCCESS_KEYS.contains(&k.as_str()))
            }
        }
        Value::Array(_) => false,
        _ => true,
    }
}

/// Fails with an [`ApiClientError`] if `raw` is not a successful response.
///
/// `caller` names the client method for the error, e.g. `SeedReadWriteClient.get`.
pub fn check_response(raw: &RawResponse, caller: &str) -> Result<()> {
    let code = raw.status.as_u16();
    let bad_status = !matches!(code, 200 | 201 | 202 | 204);
    if !bad_status && !is_error(raw) {
        return Ok(());
    }

    let mut message = if bad_status {
        format!("SEED returned status code: {}", code)
    } else {
        "Unknown error from SEED API".to_string()
    };
    if !raw.body.is_empty() {
        message = match serde_json::from_slice::<Value>(&raw.body) {
            Ok(Value::Object(obj)) => match obj.get("message") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => format!("Unknown SEED Error {}: {}", code, Value::Object(obj.clone())),
            },
            Ok(other) => format!("Unknown SEED Error {}: {}", code, other),
            Err(_) => "Unknown SEED Error: No response returned".to_string(),
        };
    }
    Err(seed_error(raw, message, caller))
}

/// Guesses the envelope key from the request url.
///
/// This is the last path segment, or the one before it when the last is a
/// numeric id: `/api/v3/cycles/12/` gives `cycles`.
pub fn infer_data_name(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.trim_end_matches('/');
    let mut segments = path.rsplit('/');
    let last = segments.next()?;
    let name = if !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()) {
        segments.next()?
    } else {
        last
    };
    if name.is_empty() || name.contains(':') {
        None
    } else {
        Some(name.to_string())
    }
}

/// Extracts the payload from a response that passed [`check_response`].
///
/// Without `data_name` the key is inferred from the url. The value under the
/// first present key of `data_name`, `data`, `detail` is returned, or the
/// whole body when none match. `data_name = "all"` always returns the whole
/// body.
pub fn get_result(raw: &RawResponse, data_name: Option<&str>, caller: &str) -> Result<Payload> {
    if raw.content_type.contains(SPREADSHEET_CONTENT_TYPE) {
        return Ok(Payload::Spreadsheet(raw.body.clone()));
    }
    if !is_json(raw) {
        return Ok(Payload::Content {
            content_type: raw.content_type.clone(),
            body: raw.body.clone(),
        });
    }

    let data_name = match data_name {
        Some(d) => Some(d.to_string()),
        None => infer_data_name(&raw.url),
    };

    let result: Value = if raw.status.as_u16() == 204 {
        json!({ "status": "success" })
    } else {
        serde_json::from_slice(&raw.body)
            .map_err(|e| seed_error(raw, format!("Invalid JSON returned: {}", e), caller))?
    };
    if result.is_null() {
        return Err(seed_error(raw, "No results returned", caller));
    }

    if data_name.as_deref() == Some("all") {
        return Ok(Payload::Json(result));
    }

    if let Value::Object(obj) = &result {
        let candidates = data_name
            .as_deref()
            .into_iter()
            .chain(["data", "detail"]);
        for name in candidates {
            if let Some(v) = obj.get(name).filter(|v| !v.is_null()) {
                return Ok(Payload::Json(v.clone()));
            }
        }
    }
    Ok(Payload::Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Verb;
    use crate::error::api_error;
    use reqwest::StatusCode;

    const URL: &str = "http://example.org/api/v3/test/";

    fn response(status: u16, content_type: &str, body: &str) -> RawResponse {
        RawResponse {
            url: URL.to_string(),
            verb: Verb::Get,
            status: StatusCode::from_u16(status).unwrap(),
            content_type: content_type.to_string(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn json_response(status: u16, body: Value) -> RawResponse {
        response(status, "application/json", &body.to_string())
    }

    fn error_of(raw: &RawResponse) -> ApiClientError {
        let err = check_response(raw, "MySeedClient.get").unwrap_err();
        api_error(&err).unwrap().clone()
    }

    #[test]
    fn status_field_error_in_200() {
        let raw = json_response(200, json!({"status": "error", "message": "No llama!"}));
        let err = error_of(&raw);
        assert_eq!(err.error, "No llama!");
        assert_eq!(err.service.as_deref(), Some("SEED"));
        assert_eq!(err.url.as_deref(), Some(URL));
        assert_eq!(err.caller.as_deref(), Some("MySeedClient.get"));
        assert_eq!(err.verb.as_deref(), Some("GET"));
        assert_eq!(err.status_code, Some(200));
    }

    #[test]
    fn bad_status_without_body() {
        let err = error_of(&response(404, "application/json", ""));
        assert_eq!(err.error, "SEED returned status code: 404");
        assert_eq!(err.status_code, Some(404));
    }

    #[test]
    fn bad_status_with_message() {
        let raw = json_response(404, json!({"status": "error", "message": "No llama!"}));
        assert_eq!(error_of(&raw).error, "No llama!");

        let raw = json_response(500, json!({"detail": "oops"}));
        assert_eq!(
            error_of(&raw).error,
            r#"Unknown SEED Error 500: {"detail":"oops"}"#
        );

        let raw = response(502, "text/html", "<html>bad gateway</html>");
        assert_eq!(error_of(&raw).error, "Unknown SEED Error: No response returned");
    }

    #[test]
    fn success_shapes() {
        let ok = [
            json_response(200, json!({"status": "success", "data": 1})),
            json_response(200, json!({"status": "complete"})),
            json_response(201, json!({"id": 7, "name": "x"})),
            json_response(200, json!({"organizations": []})),
            json_response(200, json!({"sha": "abc", "version": "2.0"})),
            json_response(200, json!({"success": true, "import_file_id": 3})),
            json_response(200, json!({"progress_data": {"status": "parsing"}})),
            json_response(200, json!({"status": "not-started", "progress_key": "k"})),
            json_response(200, json!([1, 2, 3])),
            response(204, "", ""),
            response(200, SPREADSHEET_CONTENT_TYPE, ""),
            response(200, PDF_CONTENT_TYPE, ""),
            response(200, "text/plain", "hello"),
        ];
        for raw in &ok {
            assert!(check_response(raw, "t").is_ok(), "expected success: {:?}", raw);
        }
    }

    #[test]
    fn failure_shapes() {
        let bad = [
            json_response(200, json!({"success": false, "message": "upload failed"})),
            json_response(200, json!({"progress_data": {"status": "error"}})),
            json_response(200, json!({"status": "error", "progress_key": "k"})),
            json_response(200, json!({"unexpected": 1})),
            json_response(200, json!("just a string")),
            response(200, "text/plain", ""),
        ];
        for raw in &bad {
            assert!(check_response(raw, "t").is_err(), "expected failure: {:?}", raw);
        }
        let err = error_of(&bad[0]);
        assert_eq!(err.error, "upload failed");
        let err = error_of(&bad[5]);
        assert_eq!(err.error, "Unknown error from SEED API");
    }

    #[test]
    fn infers_data_name() {
        assert_eq!(infer_data_name("http://h/api/v3/cycles/").as_deref(), Some("cycles"));
        assert_eq!(infer_data_name("http://h/api/v3/cycles/12/").as_deref(), Some("cycles"));
        assert_eq!(
            infer_data_name("http://h/api/v3/cycles/?organization_id=1").as_deref(),
            Some("cycles")
        );
        assert_eq!(
            infer_data_name("http://h/api/v3/properties/5").as_deref(),
            Some("properties")
        );
    }

    #[test]
    fn extracts_envelope() {
        let raw = json_response(200, json!({"status": "success", "data": "test"}));
        assert_eq!(get_result(&raw, None, "t").unwrap(), Payload::Json(json!("test")));

        let mut raw = json_response(200, json!({"status": "success", "cycles": [1], "data": 2}));
        raw.url = "http://h/api/v3/cycles/".into();
        assert_eq!(get_result(&raw, None, "t").unwrap(), Payload::Json(json!([1])));
        assert_eq!(
            get_result(&raw, Some("missing"), "t").unwrap(),
            Payload::Json(json!(2))
        );
        assert_eq!(
            get_result(&raw, Some("all"), "t").unwrap(),
            Payload::Json(json!({"status": "success", "cycles": [1], "data": 2}))
        );

        let raw = json_response(200, json!({"status": "success", "detail": {"a": 1}}));
        assert_eq!(get_result(&raw, None, "t").unwrap(), Payload::Json(json!({"a": 1})));

        // nothing matches: whole body
        let raw = json_response(200, json!({"id": 3, "name": "n"}));
        assert_eq!(
            get_result(&raw, None, "t").unwrap(),
            Payload::Json(json!({"id": 3, "name": "n"}))
        );

        // lists pass through
        let raw = json_response(200, json!([{"id": 1}]));
        assert_eq!(get_result(&raw, None, "t").unwrap(), Payload::Json(json!([{"id": 1}])));
    }

    #[test]
    fn non_json_payloads() {
        let raw = response(200, SPREADSHEET_CONTENT_TYPE, "xlsx");
        assert_eq!(
            get_result(&raw, None, "t").unwrap(),
            Payload::Spreadsheet(b"xlsx".to_vec())
        );

        let raw = response(200, "text/plain", "hello");
        let value = get_result(&raw, None, "t").unwrap().into_json().unwrap();
        assert_eq!(value, json!({"status": "success", "content": "hello"}));

        let raw = response(204, "application/json", "");
        assert_eq!(
            get_result(&raw, None, "t").unwrap(),
            Payload::Json(json!({"status": "success"}))
        );
    }

    #[test]
    fn null_body_is_an_error() {
        let raw = response(200, "application/json", "null");
        let err = get_result(&raw, None, "MySeedClient.get").unwrap_err();
        assert_eq!(api_error(&err).unwrap().error, "No results returned");
    }
}
