use anyhow::{Context, Result, bail};
use md5::Md5;
use reqwest::blocking::RequestBuilder;
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// How username/password credentials are presented to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Basic,
    Digest,
}

/// Produces OAuth access tokens.
pub trait AccessTokenSource: fmt::Debug + Send + Sync {
    fn access_token(&self) -> Result<String>;
}

/// A pre-issued access token.
#[derive(Clone)]
pub struct StaticToken(pub String);

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

impl AccessTokenSource for StaticToken {
    fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Exchanges a signed JWT assertion for an access token.
///
/// Implementations own the signing and the token endpoint round-trip; the
/// client only supplies the private key contents and identity.
pub trait JwtGrantClient: fmt::Debug + Send + Sync {
    fn get_access_token(
        &self,
        private_key: &str,
        username: &str,
        client_id: &str,
        key_password: Option<&str>,
    ) -> Result<String>;
}

/// Token source backed by a private key file and a [`JwtGrantClient`].
#[derive(Debug, Clone)]
pub struct JwtGrant {
    pub private_key_location: PathBuf,
    pub client_id: String,
    pub username: String,
    pub pvt_key_password: Option<String>,
    pub client: Arc<dyn JwtGrantClient>,
}

impl AccessTokenSource for JwtGrant {
    fn access_token(&self) -> Result<String> {
        let key = std::fs::read_to_string(&self.private_key_location).with_context(|| {
            format!(
                "failed to read private key {}",
                self.private_key_location.display()
            )
        })?;
        self.client.get_access_token(
            &key,
            &self.username,
            &self.client_id,
            self.pvt_key_password.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub enum Auth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Digest {
        username: String,
        password: String,
    },
    OAuth(Arc<dyn AccessTokenSource>),
}

impl Auth {
    /// Username/password authentication.
    ///
    /// SEED api keys are sent in the password slot, so `api_key` is used when
    /// no password is given.
    pub fn user(
        username: impl Into<String>,
        password: Option<String>,
        api_key: Option<String>,
        method: AuthMethod,
    ) -> Self {
        let username = username.into();
        let password = password
            .filter(|p| !p.is_empty())
            .or(api_key)
            .unwrap_or_default();
        match method {
            AuthMethod::Basic => Auth::Basic { username, password },
            AuthMethod::Digest => Auth::Digest { username, password },
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Auth::OAuth(Arc::new(StaticToken(token.into())))
    }

    pub fn oauth(source: impl AccessTokenSource + 'static) -> Self {
        Auth::OAuth(Arc::new(source))
    }

    pub(crate) fn is_digest(&self) -> bool {
        matches!(self, Auth::Digest { .. })
    }

    /// Attaches credentials that do not need a server challenge.
    pub(crate) fn apply(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        Ok(match self {
            Auth::None | Auth::Digest { .. } => req,
            Auth::Basic { username, password } => req.basic_auth(username, Some(password)),
            Auth::OAuth(source) => {
                let token = source.access_token().context("failed to obtain access token")?;
                req.bearer_auth(token)
            }
        })
    }

    /// Builds the `Authorization` value answering a digest challenge.
    pub(crate) fn digest_authorization(
        &self,
        challenge: &str,
        method: &str,
        uri: &str,
    ) -> Result<String> {
        let Auth::Digest { username, password } = self else {
            bail!("digest challenge received without digest credentials");
        };
        let cnonce = format!("{:016x}", rand::random::<u64>());
        digest_response(username, password, challenge, method, uri, &cnonce)
    }
}

#[derive(Debug, Default)]
struct DigestChallenge {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    algorithm: Option<String>,
    qop: Option<String>,
}

fn parse_challenge(header: &str) -> Result<DigestChallenge> {
    let rest = header
        .trim()
        .strip_prefix("Digest")
        .or_else(|| header.trim().strip_prefix("digest"))
        .context("not a digest challenge")?;

    let mut challenge = DigestChallenge::default();
    for (key, value) in split_params(rest) {
        match key.to_ascii_lowercase().as_str() {
            "realm" => challenge.realm = value,
            "nonce" => challenge.nonce = value,
            "opaque" => challenge.opaque = Some(value),
            "algorithm" => challenge.algorithm = Some(value),
            "qop" => challenge.qop = Some(value),
            _ => {}
        }
    }
    if challenge.nonce.is_empty() {
        bail!("digest challenge has no nonce");
    }
    Ok(challenge)
}

fn split_params(s: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut current = String::new();
    let mut parts = Vec::new();
    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    for part in parts {
        if let Some((k, v)) = part.split_once('=') {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(v);
            out.push((k.trim().to_string(), v.to_string()));
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
enum DigestHash {
    Md5,
    Sha256,
}

impl DigestHash {
    fn hex(self, s: &str) -> String {
        match self {
            DigestHash::Md5 => format!("{:x}", Md5::digest(s.as_bytes())),
            DigestHash::Sha256 => format!("{:x}", Sha256::digest(s.as_bytes())),
        }
    }
}

/// Hash function and session flag for a challenge `algorithm`; MD5 when absent.
fn digest_algorithm(algorithm: &str) -> Result<(DigestHash, bool)> {
    Ok(match algorithm.to_ascii_uppercase().as_str() {
        "MD5" => (DigestHash::Md5, false),
        "MD5-SESS" => (DigestHash::Md5, true),
        "SHA-256" => (DigestHash::Sha256, false),
        "SHA-256-SESS" => (DigestHash::Sha256, true),
        other => bail!("unsupported digest algorithm [{}]", other),
    })
}

fn digest_response(
    username: &str,
    password: &str,
    header: &str,
    method: &str,
    uri: &str,
    cnonce: &str,
) -> Result<String> {
    let challenge = parse_challenge(header)?;
    let algorithm = challenge.algorithm.as_deref().unwrap_or("MD5");
    let (hash, sess) = digest_algorithm(algorithm)?;

    let mut ha1 = hash.hex(&format!("{}:{}:{}", username, challenge.realm, password));
    if sess {
        ha1 = hash.hex(&format!("{}:{}:{}", ha1, challenge.nonce, cnonce));
    }
    let ha2 = hash.hex(&format!("{}:{}", method.to_uppercase(), uri));

    let qop_auth = challenge
        .qop
        .as_deref()
        .map(|q| q.split(',').any(|o| o.trim() == "auth"))
        .unwrap_or(false);
    let nc = "00000001";

    let response = if qop_auth {
        hash.hex(&format!(
            "{}:{}:{}:{}:auth:{}",
            ha1, challenge.nonce, nc, cnonce, ha2
        ))
    } else {
        hash.hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2))
    };

    let mut value = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm={}, response=\"{}\"",
        username, challenge.realm, challenge.nonce, uri, algorithm, response
    );
    if qop_auth {
        value.push_str(&format!(", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce));
    }
    if let Some(opaque) = &challenge.opaque {
        value.push_str(&format!(", opaque=\"{}\"", opaque));
    }
    Ok(value)
}
