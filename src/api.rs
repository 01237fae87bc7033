use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT, WWW_AUTHENTICATE};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::Auth;
use crate::error::ApiClientError;
use crate::util::strip_scheme;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }

    fn has_body(&self) -> bool {
        matches!(self, Verb::Post | Verb::Put | Verb::Patch)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file sent as a multipart field.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Multipart field name, e.g. `file`.
    pub field: String,
    pub path: PathBuf,
}

impl UploadFile {
    pub fn new(field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            field: field.into(),
            path: path.into(),
        }
    }
}

/// Per-call request options.
///
/// Query parameters double as the request body when a body-carrying verb is
/// sent without an explicit `json` or `form` payload.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
    pub form: Vec<(String, String)>,
    pub files: Vec<UploadFile>,
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn form(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.form.push((key.into(), value.to_string()));
        self
    }

    pub fn file(mut self, field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.files.push(UploadFile::new(field, path));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub url: String,
    pub verb: Verb,
    pub status: StatusCode,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    fn read(verb: Verb, resp: Response) -> Result<Self> {
        let url = resp.url().to_string();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp
            .bytes()
            .with_context(|| format!("failed to read response body (url={})", url))?
            .to_vec();
        Ok(Self {
            url,
            verb,
            status,
            content_type,
            body,
        })
    }
}

/// Generic HTTP API client settings and verb dispatch.
#[derive(Debug, Clone)]
pub struct ApiBase {
    url: Option<String>,
    use_ssl: bool,
    timeout: Option<Duration>,
    use_json: bool,
    compulsory_params: Vec<String>,
    defaults: BTreeMap<String, String>,
    auth: Auth,
    http: HttpClient,
}

impl ApiBase {
    /// Creates a client; `url` may omit the scheme.
    pub fn new(url: Option<&str>, use_ssl: bool, timeout: Option<Duration>) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("seedapi-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("seedapi-rs")),
        );

        let mut builder = HttpClient::builder().default_headers(default_headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("failed to build HTTP client")?;

        let mut api = Self {
            url: None,
            use_ssl,
            timeout,
            use_json: false,
            compulsory_params: Vec::new(),
            defaults: BTreeMap::new(),
            auth: Auth::None,
            http,
        };
        if let Some(url) = url {
            api.url = Some(api.construct_url(Some(url))?);
        }
        Ok(api)
    }

    /// Same as [`ApiBase::new`] but sends JSON bodies.
    pub fn json(url: Option<&str>, use_ssl: bool, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self::new(url, use_ssl, timeout)?.with_json(true))
    }

    pub fn with_json(mut self, use_json: bool) -> Self {
        self.use_json = use_json;
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// Parameters every call must carry; missing ones come from `defaults`.
    pub fn with_compulsory_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compulsory_params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.defaults.insert(key.into(), value.to_string());
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn use_ssl(&self) -> bool {
        self.use_ssl
    }

    pub fn use_json(&self) -> bool {
        self.use_json
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Resolves the url for a call, enforcing the scheme implied by `use_ssl`.
    ///
    /// Without a url the client's default url is used.
    pub fn construct_url(&self, url: Option<&str>) -> Result<String> {
        let use_ssl = self.use_ssl;
        let url = match url.filter(|u| !u.is_empty()) {
            None => {
                return self
                    .url
                    .clone()
                    .ok_or_else(|| anyhow::Error::from(ApiClientError::new("No url set")));
            }
            Some(u) => u,
        };

        if url.starts_with("https://") && !use_ssl {
            return Err(ApiClientError::new("use_ssl is false but url starts with https").into());
        }
        if url.starts_with("http://") && use_ssl {
            return Err(
                ApiClientError::new("use_ssl is true but url does not starts with https").into(),
            );
        }

        let scheme = if use_ssl { "https://" } else { "http://" };
        Ok(format!("{}{}", scheme, strip_scheme(url)))
    }

    /// Fills compulsory parameters missing from `params`.
    pub fn construct_payload(&self, mut params: Vec<(String, String)>) -> Result<Vec<(String, String)>> {
        for param in &self.compulsory_params {
            if params.iter().any(|(k, _)| k == param) {
                continue;
            }
            match self.defaults.get(param) {
                Some(v) => params.push((param.clone(), v.clone())),
                None => {
                    return Err(
                        ApiClientError::new(format!("{} is a compulsory field", param)).into(),
                    );
                }
            }
        }
        Ok(params)
    }

    /// True if the call returned `200 OK`.
    pub fn check_call_success(&self, response: &RawResponse) -> bool {
        response.status == StatusCode::OK
    }

    pub fn get(&self, url: Option<&str>, opts: &RequestOptions) -> Result<RawResponse> {
        self.send(Verb::Get, url, opts)
    }

    pub fn post(&self, url: Option<&str>, opts: &RequestOptions) -> Result<RawResponse> {
        self.send(Verb::Post, url, opts)
    }

    pub fn put(&self, url: Option<&str>, opts: &RequestOptions) -> Result<RawResponse> {
        self.send(Verb::Put, url, opts)
    }

    pub fn patch(&self, url: Option<&str>, opts: &RequestOptions) -> Result<RawResponse> {
        self.send(Verb::Patch, url, opts)
    }

    pub fn delete(&self, url: Option<&str>, opts: &RequestOptions) -> Result<RawResponse> {
        self.send(Verb::Delete, url, opts)
    }

    /// Sends one request and reads the whole response.
    ///
    /// Digest credentials are answered on the first `401` challenge.
    pub fn send(&self, verb: Verb, url: Option<&str>, opts: &RequestOptions) -> Result<RawResponse> {
        let url = self.construct_url(url)?;
        let query = self.construct_payload(opts.query.clone())?;
        tracing::debug!(verb = %verb, url = %url, "sending request");

        let resp = self
            .build(verb, &url, &query, opts, None)?
            .send()
            .with_context(|| format!("could not connect ({} {})", verb, url))?;

        if resp.status() == StatusCode::UNAUTHORIZED && self.auth.is_digest() {
            if let Some(challenge) = resp
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
            {
                let request_url = resp.url().clone();
                let uri = match request_url.query() {
                    Some(q) => format!("{}?{}", request_url.path(), q),
                    None => request_url.path().to_string(),
                };
                let authorization =
                    self.auth
                        .digest_authorization(&challenge, verb.as_str(), &uri)?;
                let resp = self
                    .build(verb, &url, &query, opts, Some(&authorization))?
                    .send()
                    .with_context(|| format!("could not connect ({} {})", verb, url))?;
                return RawResponse::read(verb, resp);
            }
        }

        RawResponse::read(verb, resp)
    }

    fn build(
        &self,
        verb: Verb,
        url: &str,
        query: &[(String, String)],
        opts: &RequestOptions,
        authorization: Option<&str>,
    ) -> Result<RequestBuilder> {
        let mut req = match verb {
            Verb::Get => self.http.get(url),
            Verb::Post => self.http.post(url),
            Verb::Put => self.http.put(url),
            Verb::Patch => self.http.patch(url),
            Verb::Delete => self.http.delete(url),
        };
        for (name, value) in &opts.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        req = self.auth.apply(req)?;
        if let Some(authorization) = authorization {
            req = req.header(reqwest::header::AUTHORIZATION, authorization);
        }
        if !query.is_empty() {
            req = req.query(query);
        }
        if !verb.has_body() {
            return Ok(req);
        }

        if !opts.files.is_empty() {
            let mut form = Form::new();
            for (k, v) in &opts.form {
                form = form.text(k.clone(), v.clone());
            }
            for file in &opts.files {
                let part = Part::file(&file.path)
                    .with_context(|| format!("failed to open {}", file.path.display()))?;
                form = form.part(file.field.clone(), part);
            }
            return Ok(req.multipart(form));
        }

        if self.use_json {
            let body = match &opts.json {
                Some(body) => body.clone(),
                None => Value::Object(
                    query
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect::<Map<String, Value>>(),
                ),
            };
            Ok(req.json(&body))
        } else if !opts.form.is_empty() {
            Ok(req.form(&opts.form))
        } else {
            Ok(req.form(query))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::api_error;

    const NO_URL_ERROR: &str = "No url set";
    const SSL_ERROR: &str = "use_ssl is true but url does not starts with https";
    const SSL_ERROR2: &str = "use_ssl is false but url starts with https";

    fn message(err: anyhow::Error) -> String {
        api_error(&err).unwrap().error.clone()
    }

    #[test]
    fn scheme_follows_use_ssl() {
        let api = ApiBase::json(Some("example.org"), true, None).unwrap();
        assert_eq!(api.url(), Some("https://example.org"));
        assert!(api.use_json());

        let api = ApiBase::new(Some("example.org"), false, None).unwrap();
        assert_eq!(api.url(), Some("http://example.org"));
        assert!(!api.use_json());
    }

    #[test]
    fn scheme_mismatch_is_rejected() {
        let err = ApiBase::json(Some("http://example.org"), true, None).unwrap_err();
        assert_eq!(message(err), SSL_ERROR);

        let err = ApiBase::json(Some("https://example.org"), false, None).unwrap_err();
        assert_eq!(message(err), SSL_ERROR2);

        let api = ApiBase::new(None, true, None).unwrap();
        assert_eq!(message(api.construct_url(Some("http://example.org")).unwrap_err()), SSL_ERROR);
        assert_eq!(
            api.construct_url(Some("https://example.org/api/")).unwrap(),
            "https://example.org/api/"
        );
    }

    #[test]
    fn missing_url() {
        let api = ApiBase::new(None, false, None).unwrap();
        assert_eq!(message(api.construct_url(None).unwrap_err()), NO_URL_ERROR);
        assert_eq!(
            api.construct_url(Some("example.org/x")).unwrap(),
            "http://example.org/x"
        );
    }

    #[test]
    fn compulsory_params() {
        let api = ApiBase::new(Some("example.org"), true, None)
            .unwrap()
            .with_compulsory_params(["id"]);
        let err = api
            .construct_payload(vec![("foo".into(), "bar".into())])
            .unwrap_err();
        assert_eq!(message(err), "id is a compulsory field");
        assert!(api.construct_payload(vec![("id".into(), "1".into())]).is_ok());

        let api = api.with_compulsory_params(["id", "comp"]).with_default("comp", 1);
        let err = api.construct_payload(vec![]).unwrap_err();
        assert_eq!(message(err), "id is a compulsory field");
        let params = api.construct_payload(vec![("id".into(), "1".into())]).unwrap();
        assert_eq!(
            params,
            vec![("id".to_string(), "1".to_string()), ("comp".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn call_success_is_200_only() {
        let api = ApiBase::new(Some("example.org"), true, None).unwrap();
        let mut resp = RawResponse {
            url: "https://example.org".into(),
            verb: Verb::Get,
            status: StatusCode::OK,
            content_type: "application/json".into(),
            body: b"{}".to_vec(),
        };
        assert!(api.check_call_success(&resp));
        resp.status = StatusCode::CREATED;
        assert!(!api.check_call_success(&resp));
    }
}
