use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::AuthMethod;
use crate::base::SeedClientBuilder;

/// Name of the connection file looked up in the working and home directories.
pub const CONFIG_FILE_NAME: &str = "seed-config.json";

/// Connection settings for a SEED instance.
///
/// Deserializes from the JSON written by SEED's
/// `manage.py create_test_user_json --pyseed`:
///
/// ```json
/// {
///     "name": "seed_api_test",
///     "base_url": "http://127.0.0.1",
///     "username": "user@seed-platform.org",
///     "api_key": "b8a2...",
///     "port": 8000,
///     "use_ssl": false
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub name: Option<String>,
    pub base_url: Option<String>,
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: Option<u16>,
    pub username: Option<String>,
    pub api_key: Option<String>,
    pub password: Option<String>,
    pub use_ssl: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub auth_method: Option<AuthMethod>,
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Option::<Port>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Port::Number(n)) => Ok(Some(n)),
        Some(Port::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Port::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid port [{}]", s))),
    }
}

impl ConnectionParams {
    /// Reads a JSON connection file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("Cannot find connection config file: {}", path.display());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse configuration file {}", path.display()))
    }

    /// Reads `SEED_BASE_URL`, `SEED_USERNAME`, `SEED_API_KEY`, `SEED_PORT`
    /// and `SEED_USE_SSL`.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match var("SEED_PORT").filter(|p| !p.trim().is_empty()) {
            Some(p) => Some(
                p.trim()
                    .parse()
                    .with_context(|| format!("invalid SEED_PORT [{}]", p))?,
            ),
            None => None,
        };
        let use_ssl = var("SEED_USE_SSL").map(|v| {
            let v = v.trim().to_ascii_lowercase();
            !(v == "0" || v == "false" || v == "no")
        });

        Ok(Self {
            base_url: var("SEED_BASE_URL"),
            username: var("SEED_USERNAME"),
            api_key: var("SEED_API_KEY"),
            port,
            use_ssl,
            ..Self::default()
        })
    }

    /// Fills every unset field from `other`.
    pub fn or(self, other: Self) -> Self {
        Self {
            name: self.name.or(other.name),
            base_url: self.base_url.or(other.base_url),
            port: self.port.or(other.port),
            username: self.username.or(other.username),
            api_key: self.api_key.or(other.api_key),
            password: self.password.or(other.password),
            use_ssl: self.use_ssl.or(other.use_ssl),
            timeout_secs: self.timeout_secs.or(other.timeout_secs),
            auth_method: self.auth_method.or(other.auth_method),
        }
    }

    fn is_complete(&self) -> bool {
        self.base_url.is_some()
            && self.username.is_some()
            && (self.api_key.is_some() || self.password.is_some())
    }

    /// Client builder for `org_id` carrying these settings.
    ///
    /// `use_ssl` defaults to `true`.
    pub fn client_builder(&self, org_id: u64) -> SeedClientBuilder {
        let mut builder = SeedClientBuilder::new(org_id).use_ssl(self.use_ssl.unwrap_or(true));
        if let Some(base_url) = &self.base_url {
            builder = builder.base_url(base_url.as_str());
        }
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(username) = &self.username {
            builder = builder.username(username.as_str());
        }
        if let Some(password) = &self.password {
            builder = builder.password(password.as_str());
        }
        if let Some(api_key) = &self.api_key {
            builder = builder.api_key(api_key.as_str());
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(method) = self.auth_method {
            builder = builder.auth_method(method);
        }
        builder
    }
}

/// Resolves connection settings, in order of precedence:
/// - `explicit` fields
/// - `SEED_*` environment variables
/// - the first existing config file from [`config_candidates`]
pub fn load_config(explicit: ConnectionParams) -> Result<ConnectionParams> {
    let mut params = explicit.or(ConnectionParams::from_env()?);

    let candidates = config_candidates();
    if !params.is_complete() {
        for path in &candidates {
            if path.exists() {
                params = params.or(ConnectionParams::from_file(path)?);
                break;
            }
        }
    }

    if params.base_url.is_none() {
        bail!(
            "Missing configuration: base_url (set SEED_BASE_URL or put `base_url` in one of: {})",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(params)
}

/// Config file search order:
/// 1) `SEED_CONFIG` (explicit)
/// 2) `./seed-config.json`
/// 3) `~/seed-config.json`
pub fn config_candidates() -> Vec<PathBuf> {
    if let Ok(p) = std::env::var("SEED_CONFIG") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(CONFIG_FILE_NAME));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(CONFIG_FILE_NAME));
    }
    v
}
