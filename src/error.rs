use std::fmt;

/// Error raised when an API call cannot be made or the server reports a failure.
///
/// Every field except `error` is optional: client-side validation failures
/// (missing url, bad primary key) only carry a message, while failures
/// classified from a server response carry the full HTTP context.
///
/// Library functions return [`anyhow::Result`]; recover this type with
/// `err.downcast_ref::<ApiClientError>()`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct ApiClientError {
    /// Human readable reason.
    pub error: String,
    /// Remote service name, e.g. `SEED`.
    pub service: Option<String>,
    /// Full request url.
    pub url: Option<String>,
    /// Client method that failed, e.g. `SeedReadWriteClient.get`.
    pub caller: Option<String>,
    /// HTTP method, always upper case.
    pub verb: Option<String>,
    pub status_code: Option<u16>,
    /// Extra call arguments reported alongside the error.
    pub arguments: Vec<(String, String)>,
}

impl ApiClientError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            service: None,
            url: None,
            caller: None,
            verb: None,
            status_code: None,
            arguments: Vec::new(),
        }
    }

    /// An error attributed to the SEED service.
    pub fn seed(error: impl Into<String>) -> Self {
        Self::new(error).with_service("SEED")
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn with_verb(mut self, verb: impl AsRef<str>) -> Self {
        self.verb = Some(verb.as_ref().to_uppercase());
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.arguments.push((key.into(), value.to_string()));
        self
    }
}

impl fmt::Display for ApiClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiClientError: {}", self.error)?;
        if let Some(service) = &self.service {
            write!(f, ", calling service {}", service)?;
        }
        if let Some(caller) = &self.caller {
            write!(f, " as {}", caller)?;
        }
        if let Some(url) = &self.url {
            write!(f, " with url {}", url)?;
        }
        if let Some(verb) = &self.verb {
            write!(f, ", http method: {}", verb)?;
        }
        if !self.arguments.is_empty() {
            let arguments = self
                .arguments
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " supplied with {}", arguments)?;
        }
        if let Some(code) = self.status_code {
            write!(f, " http status code: {}", code)?;
        }
        Ok(())
    }
}

/// Returns the [`ApiClientError`] carried by `err`, if any.
pub fn api_error(err: &anyhow::Error) -> Option<&ApiClientError> {
    err.downcast_ref::<ApiClientError>()
}
