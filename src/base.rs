use anyhow::{Result, anyhow};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::{ApiBase, RequestOptions, Verb};
use crate::auth::{AccessTokenSource, Auth, AuthMethod, StaticToken};
use crate::error::ApiClientError;
use crate::response::{Payload, check_response, get_result};
use crate::urls::get_urls;
use crate::util::{add_pk, ensure_trailing_slash, replace_url_args};

/// Options for a single CRUD call.
#[derive(Debug, Clone)]
pub struct Call {
    pub endpoint: Option<String>,
    pub data_name: Option<String>,
    pub url_args: Vec<(String, String)>,
    pub required_pk: bool,
    pub include_org_id_query_param: bool,
    pub request: RequestOptions,
}

impl Default for Call {
    fn default() -> Self {
        Self {
            endpoint: None,
            data_name: None,
            url_args: Vec::new(),
            required_pk: true,
            include_org_id_query_param: false,
            request: RequestOptions::default(),
        }
    }
}

impl Call {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a call against a named endpoint, or a literal url for `post`.
    pub fn endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    pub fn data_name(mut self, data_name: impl Into<String>) -> Self {
        self.data_name = Some(data_name.into());
        self
    }

    /// Fills a `/KEY/` placeholder of the endpoint path.
    pub fn url_arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.url_args.push((key.into(), value.to_string()));
        self
    }

    pub fn required_pk(mut self, required: bool) -> Self {
        self.required_pk = required;
        self
    }

    pub fn include_org_id_query_param(mut self, include: bool) -> Self {
        self.include_org_id_query_param = include;
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.request = self.request.query(key, value);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.request = self.request.json(body);
        self
    }

    pub fn form(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.request = self.request.form(key, value);
        self
    }

    pub fn file(mut self, field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.request = self.request.file(field, path);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request = self.request.header(name, value);
        self
    }
}

/// Shared state and request plumbing for every SEED client type.
#[derive(Debug, Clone)]
pub struct SeedBaseClient {
    org_id: u64,
    username: Option<String>,
    base_url: String,
    urls: BTreeMap<String, String>,
    endpoint: Option<String>,
    data_name: Option<String>,
    api: ApiBase,
}

impl SeedBaseClient {
    pub fn builder(org_id: u64) -> SeedClientBuilder {
        SeedClientBuilder::new(org_id)
    }

    pub fn org_id(&self) -> u64 {
        self.org_id
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Host (and port) the endpoint urls are built on, always ending in `/`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn urls(&self) -> &BTreeMap<String, String> {
        &self.urls
    }

    /// Known endpoint names.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.urls.keys().map(String::as_str)
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn data_name(&self) -> Option<&str> {
        self.data_name.as_deref()
    }

    pub fn api(&self) -> &ApiBase {
        &self.api
    }

    fn resolve_endpoint(&self, call: &Call) -> Result<String> {
        call.endpoint
            .clone()
            .or_else(|| self.endpoint.clone())
            .ok_or_else(|| anyhow!(ApiClientError::new("endpoint is not set")))
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<String> {
        self.urls
            .get(endpoint)
            .cloned()
            .ok_or_else(|| anyhow!(ApiClientError::new(format!("Unknown endpoint: {}", endpoint))))
    }

    /// `org_in_url` is set when the url already carries `organization_id`.
    fn request_options(&self, call: &Call, org_in_url: bool) -> RequestOptions {
        let mut opts = call.request.clone();
        opts.query.retain(|(k, _)| k != "organization_id");
        if !org_in_url {
            opts.query
                .insert(0, ("organization_id".to_string(), self.org_id.to_string()));
        }
        opts
    }

    fn execute(
        &self,
        verb: Verb,
        url: &str,
        opts: &RequestOptions,
        call: &Call,
        caller: &str,
    ) -> Result<Payload> {
        let data_name = call.data_name.as_deref().or(self.data_name.as_deref());
        let raw = self.api.send(verb, Some(url), opts)?;
        check_response(&raw, caller)?;
        get_result(&raw, data_name, caller)
    }

    fn pk_url<P: ToString>(&self, pk: Option<P>, call: &Call) -> Result<String> {
        let endpoint = self.resolve_endpoint(call)?;
        let url = add_pk(&self.endpoint_url(&endpoint)?, pk, call.required_pk, true)?;
        Ok(replace_url_args(&url, &call.url_args))
    }

    fn collection_url(&self, call: &Call) -> Result<String> {
        let endpoint = self.resolve_endpoint(call)?;
        let url = ensure_trailing_slash(&self.endpoint_url(&endpoint)?);
        Ok(replace_url_args(&url, &call.url_args))
    }

    pub(crate) fn do_get<P: ToString>(&self, caller: &str, pk: Option<P>, call: Call) -> Result<Payload> {
        let mut url = self.pk_url(pk, &call)?;
        if call.include_org_id_query_param {
            url = format!("{}?organization_id={}", url, self.org_id);
        }
        let opts = self.request_options(&call, call.include_org_id_query_param);
        self.execute(Verb::Get, &url, &opts, &call, caller)
    }

    pub(crate) fn do_list(&self, caller: &str, call: Call) -> Result<Payload> {
        let url = self.collection_url(&call)?;
        self.execute(Verb::Get, &url, &self.request_options(&call, false), &call, caller)
    }

    pub(crate) fn do_post(&self, caller: &str, call: Call) -> Result<Payload> {
        let endpoint = self.resolve_endpoint(&call)?;
        let url = if endpoint.contains('/') {
            endpoint
        } else {
            self.endpoint_url(&endpoint)?
        };
        let url = replace_url_args(&ensure_trailing_slash(&url), &call.url_args);
        self.execute(Verb::Post, &url, &self.request_options(&call, false), &call, caller)
    }

    pub(crate) fn do_update<P: ToString>(
        &self,
        verb: Verb,
        caller: &str,
        pk: Option<P>,
        call: Call,
    ) -> Result<Payload> {
        let url = self.pk_url(pk, &call)?;
        self.execute(verb, &url, &self.request_options(&call, false), &call, caller)
    }

    pub(crate) fn do_delete<P: ToString>(
        &self,
        caller: &str,
        pk: Option<P>,
        call: Call,
    ) -> Result<Option<Payload>> {
        let url = self.pk_url(pk, &call)?;
        let raw = self
            .api
            .send(Verb::Delete, Some(&url), &self.request_options(&call, false))?;
        // 204 carries no content; anything else may be a background task
        if raw.status.as_u16() == 204 {
            return Ok(None);
        }
        check_response(&raw, caller)?;
        let data_name = call.data_name.as_deref().or(self.data_name.as_deref());
        get_result(&raw, data_name, caller).map(Some)
    }
}

/// Configures a [`SeedBaseClient`].
#[derive(Debug, Clone)]
pub struct SeedClientBuilder {
    org_id: u64,
    base_url: Option<String>,
    port: Option<u16>,
    use_ssl: bool,
    timeout: Option<Duration>,
    url_map: Option<BTreeMap<String, String>>,
    version: Option<String>,
    endpoint: Option<String>,
    data_name: Option<String>,
    username: Option<String>,
    password: Option<String>,
    api_key: Option<String>,
    auth_method: AuthMethod,
    token_source: Option<std::sync::Arc<dyn AccessTokenSource>>,
}

impl SeedClientBuilder {
    pub(crate) fn new(org_id: u64) -> Self {
        Self {
            org_id,
            base_url: None,
            port: None,
            use_ssl: true,
            timeout: None,
            url_map: None,
            version: None,
            endpoint: None,
            data_name: None,
            username: None,
            password: None,
            api_key: None,
            auth_method: AuthMethod::Basic,
            token_source: None,
        }
    }

    /// Host, optionally with scheme; defaults to `localhost`.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn use_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replaces the built-in endpoint table.
    pub fn url_map(mut self, url_map: BTreeMap<String, String>) -> Self {
        self.url_map = Some(url_map);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Endpoint used when a call does not name one.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Envelope key used when a call does not name one.
    pub fn data_name(mut self, data_name: impl Into<String>) -> Self {
        self.data_name = Some(data_name.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn auth_method(mut self, method: AuthMethod) -> Self {
        self.auth_method = method;
        self
    }

    /// Pre-issued OAuth access token, used by the OAuth client types.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.token_source = Some(std::sync::Arc::new(StaticToken(token.into())));
        self
    }

    /// Token source used by the OAuth client types when no token is given.
    pub fn oauth_client(mut self, source: impl AccessTokenSource + 'static) -> Self {
        if self.token_source.is_none() {
            self.token_source = Some(std::sync::Arc::new(source));
        }
        self
    }

    fn user_auth(&self) -> Auth {
        match &self.username {
            Some(username) => Auth::user(
                username.clone(),
                self.password.clone(),
                self.api_key.clone(),
                self.auth_method,
            ),
            None => Auth::None,
        }
    }

    fn oauth(&self) -> Result<Auth> {
        self.token_source
            .clone()
            .map(Auth::OAuth)
            .ok_or_else(|| anyhow!(ApiClientError::new("an access token or oauth client is required")))
    }

    fn build_with(self, auth: Auth) -> Result<SeedBaseClient> {
        let mut base_url = self.base_url.unwrap_or_else(|| "localhost".to_string());
        if let Some(port) = self.port {
            base_url = format!("{}:{}", base_url.trim_end_matches('/'), port);
        }
        let base_url = ensure_trailing_slash(&base_url);
        let urls = get_urls(&base_url, self.url_map.as_ref(), self.version.as_deref())?;
        let api = ApiBase::json(None, self.use_ssl, self.timeout)?.with_auth(auth);

        Ok(SeedBaseClient {
            org_id: self.org_id,
            username: self.username,
            base_url,
            urls,
            endpoint: self.endpoint,
            data_name: self.data_name,
            api,
        })
    }

    /// Base client with username/password (or api key) authentication.
    pub fn build(self) -> Result<SeedBaseClient> {
        let auth = self.user_auth();
        self.build_with(auth)
    }

    /// Base client with OAuth bearer authentication.
    pub fn build_oauth(self) -> Result<SeedBaseClient> {
        let auth = self.oauth()?;
        self.build_with(auth)
    }

    pub fn read_only(self) -> Result<SeedReadOnlyClient> {
        self.build().map(SeedReadOnlyClient)
    }

    pub fn read_write(self) -> Result<SeedReadWriteClient> {
        self.build().map(SeedReadWriteClient)
    }

    pub fn oauth_read_only(self) -> Result<SeedOAuthReadOnlyClient> {
        self.build_oauth().map(SeedOAuthReadOnlyClient)
    }

    pub fn oauth_read_write(self) -> Result<SeedOAuthReadWriteClient> {
        self.build_oauth().map(SeedOAuthReadWriteClient)
    }
}

/// A client type built on [`SeedBaseClient`].
pub trait SeedApi {
    /// Type name reported as the caller in errors.
    const NAME: &'static str;

    fn base(&self) -> &SeedBaseClient;
}

pub trait Read: SeedApi {
    /// Fetches one record.
    fn get<P: ToString>(&self, pk: Option<P>, call: Call) -> Result<Payload> {
        self.base().do_get(&format!("{}.get", Self::NAME), pk, call)
    }

    /// Fetches a collection.
    fn list(&self, call: Call) -> Result<Payload> {
        self.base().do_list(&format!("{}.list", Self::NAME), call)
    }
}

pub trait Create: SeedApi {
    /// Creates a record, or triggers an action endpoint.
    fn post(&self, call: Call) -> Result<Payload> {
        self.base().do_post(&format!("{}.post", Self::NAME), call)
    }
}

pub trait Update: SeedApi {
    fn put<P: ToString>(&self, pk: Option<P>, call: Call) -> Result<Payload> {
        self.base()
            .do_update(Verb::Put, &format!("{}.put", Self::NAME), pk, call)
    }

    fn patch<P: ToString>(&self, pk: Option<P>, call: Call) -> Result<Payload> {
        self.base()
            .do_update(Verb::Patch, &format!("{}.patch", Self::NAME), pk, call)
    }
}

pub trait Delete: SeedApi {
    /// Deletes a record; `None` when the server answers `204 No Content`.
    fn delete<P: ToString>(&self, pk: Option<P>, call: Call) -> Result<Option<Payload>> {
        self.base()
            .do_delete(&format!("{}.delete", Self::NAME), pk, call)
    }
}

macro_rules! seed_client {
    ($(#[$meta:meta])* $name:ident: $($cap:ident),+) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name(pub SeedBaseClient);

        impl SeedApi for $name {
            const NAME: &'static str = stringify!($name);

            fn base(&self) -> &SeedBaseClient {
                &self.0
            }
        }

        $(impl $cap for $name {})+
    };
}

seed_client!(
    /// Read only client with user authentication.
    SeedReadOnlyClient: Read
);
seed_client!(
    /// Full CRUD client with user authentication.
    SeedReadWriteClient: Read, Create, Update, Delete
);
seed_client!(
    /// Read only client with OAuth authentication.
    SeedOAuthReadOnlyClient: Read
);
seed_client!(
    /// Full CRUD client with OAuth authentication.
    SeedOAuthReadWriteClient: Read, Create, Update, Delete
);
