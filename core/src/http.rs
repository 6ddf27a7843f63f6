//! HTTP transport types for the host-does-IO pattern.
//!
//! # Design
//! These types describe HTTP requests and responses as plain data. The
//! request builders in `client` produce `HttpRequest` values and the parsers
//! consume `HttpResponse` values without touching the network; a
//! `Transport` implementation (see `transport`) performs the actual I/O.
//!
//! Response bodies go through `parse_body` first: empty text is `Null`,
//! valid JSON is parsed, anything else is kept verbatim as a JSON string.
//! `into_result` then turns a non-2xx status into `ApiError`.

use serde_json::Value;

use crate::error::ApiError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// One field of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    },
}

/// Request payload.
///
/// Multipart bodies are encoded by the transport, which also owns the
/// boundary-bearing `Content-Type` header; callers never set it themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Json(String),
    Multipart(Vec<FormPart>),
}

impl RequestBody {
    /// The JSON text, if this is a JSON body.
    pub fn as_json(&self) -> Option<&str> {
        match self {
            RequestBody::Json(text) => Some(text),
            RequestBody::Multipart(_) => None,
        }
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Join `path` onto `base_url` unless it is already absolute.
pub fn absolute_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("{base_url}{path}")
    }
}

/// Assemble a request against `base_url`.
///
/// Adds `Content-Type: application/json` unless the caller supplied a
/// content type or the body is multipart.
pub fn build_request(
    base_url: &str,
    method: HttpMethod,
    path: &str,
    headers: Vec<(String, String)>,
    body: Option<RequestBody>,
) -> HttpRequest {
    let mut request = HttpRequest {
        method,
        url: absolute_url(base_url, path),
        headers,
        body,
    };
    let multipart = matches!(request.body, Some(RequestBody::Multipart(_)));
    if !multipart && request.header("content-type").is_none() {
        request
            .headers
            .insert(0, ("content-type".to_string(), "application/json".to_string()));
    }
    request
}

/// Parse response text leniently: empty is `Null`, invalid JSON is kept as a
/// JSON string holding the raw text.
pub fn parse_body(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Parse the body and map non-2xx statuses to `ApiError::Http`.
pub fn into_result(response: &HttpResponse) -> Result<Value, ApiError> {
    let body = parse_body(&response.body);
    if response.is_success() {
        Ok(body)
    } else {
        Err(ApiError::from_status(response.status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn empty_body_is_null() {
        assert_eq!(parse_body(""), Value::Null);
    }

    #[test]
    fn invalid_json_falls_back_to_text() {
        assert_eq!(parse_body("Bad Gateway"), json!("Bad Gateway"));
    }

    #[test]
    fn json_body_is_parsed() {
        assert_eq!(parse_body(r#"{"deleted":true}"#), json!({"deleted": true}));
    }

    #[test]
    fn success_returns_parsed_body() {
        let body = into_result(&response(201, r#"{"id":"1"}"#)).unwrap();
        assert_eq!(body["id"], "1");
    }

    #[test]
    fn plain_text_error_keeps_text_as_message() {
        let err = into_result(&response(409, "email taken")).unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert_eq!(err.to_string(), "email taken");
    }

    #[test]
    fn json_error_uses_status_message() {
        let err = into_result(&response(404, r#"{"message":"missing"}"#)).unwrap_err();
        assert_eq!(err.to_string(), "HTTP 404");
        assert_eq!(err.body()["message"], "missing");
    }

    #[test]
    fn build_request_defaults_to_json_content_type() {
        let req = build_request("http://api", HttpMethod::Get, "/users", Vec::new(), None);
        assert_eq!(req.url, "http://api/users");
        assert_eq!(req.header("content-type"), Some("application/json"));
    }

    #[test]
    fn build_request_keeps_caller_content_type() {
        let headers = vec![("Content-Type".to_string(), "text/plain".to_string())];
        let req = build_request("http://api", HttpMethod::Post, "/x", headers, None);
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("content-type"), Some("text/plain"));
    }

    #[test]
    fn build_request_leaves_multipart_content_type_to_transport() {
        let body = RequestBody::Multipart(vec![FormPart::Text {
            name: "userId".into(),
            value: "1".into(),
        }]);
        let req = build_request("http://api", HttpMethod::Post, "/up", Vec::new(), Some(body));
        assert_eq!(req.header("content-type"), None);
    }

    #[test]
    fn absolute_paths_bypass_base_url() {
        assert_eq!(
            absolute_url("http://api", "https://cdn.example.com/a.png"),
            "https://cdn.example.com/a.png"
        );
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = HttpRequest {
            method: HttpMethod::Get,
            url: "http://localhost/users".into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: None,
        };
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("accept"), None);
    }
}
