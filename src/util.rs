use anyhow::Result;

use crate::error::ApiClientError;

/// Appends a primary key to `url`.
///
/// `pk` is rendered with [`ToString`] and must be a non-negative integer, so
/// both `7` and `"7"` are accepted while `"a"`, `1.2` and `-1` are rejected.
/// An empty value counts as missing.
pub fn add_pk<P: ToString>(url: &str, pk: Option<P>, required: bool, slash: bool) -> Result<String> {
    let pk = pk.map(|p| p.to_string()).filter(|p| !p.is_empty());
    if required && pk.is_none() {
        return Err(ApiClientError::new("id/pk must be supplied").into());
    }

    let mut url = url.to_string();
    if let Some(pk) = pk {
        if !pk.chars().all(|c| c.is_ascii_digit()) {
            return Err(ApiClientError::new("id/pk must be a positive integer").into());
        }
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str(&pk);
    }
    if slash && !url.ends_with('/') {
        url.push('/');
    }
    Ok(url)
}

/// Replaces `/KEY/` path segments with `/value/`.
pub fn replace_url_args<K: AsRef<str>, V: AsRef<str>>(url: &str, url_args: &[(K, V)]) -> String {
    let mut out = url.to_string();
    for (k, v) in url_args {
        out = out.replace(
            &format!("/{}/", k.as_ref()),
            &format!("/{}/", v.as_ref()),
        );
    }
    out
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub(crate) fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
}

pub(crate) fn ensure_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::api_error;

    fn pk_error<P: ToString>(pk: Option<P>) -> String {
        let err = add_pk("url", pk, true, false).unwrap_err();
        api_error(&err).unwrap().error.clone()
    }

    #[test]
    fn add_pk_rejects_missing_and_invalid() {
        assert_eq!(pk_error::<u64>(None), "id/pk must be supplied");
        assert_eq!(pk_error(Some("")), "id/pk must be supplied");
        assert_eq!(pk_error(Some("a")), "id/pk must be a positive integer");
        assert_eq!(pk_error(Some(1.2)), "id/pk must be a positive integer");
        assert_eq!(pk_error(Some(-1)), "id/pk must be a positive integer");
    }

    #[test]
    fn add_pk_appends() {
        assert_eq!(add_pk("url", Some(1), true, false).unwrap(), "url/1");
        assert_eq!(add_pk("url", Some("1"), true, false).unwrap(), "url/1");
        assert_eq!(add_pk("url", None::<u64>, false, false).unwrap(), "url");
        assert_eq!(add_pk("url", Some(1), true, true).unwrap(), "url/1/");
        assert_eq!(add_pk("url/", Some(1), true, false).unwrap(), "url/1");
        assert_eq!(add_pk("url/", None::<u64>, false, true).unwrap(), "url/");
        assert_eq!(add_pk("url", None::<u64>, false, true).unwrap(), "url/");
    }

    #[test]
    fn replaces_url_args() {
        let url = "https://h/api/v3/properties/PK/meters/METER_PK/readings/";
        assert_eq!(
            replace_url_args(url, &[("PK", "12"), ("METER_PK", "3")]),
            "https://h/api/v3/properties/12/meters/3/readings/"
        );
        // only whole segments are replaced
        assert_eq!(
            replace_url_args("https://h/api/v3/PKS/", &[("PK", "1")]),
            "https://h/api/v3/PKS/"
        );
    }

    #[test]
    fn joins_urls() {
        assert_eq!(join_url("example.org/", "/api/v3/"), "example.org/api/v3/");
        assert_eq!(join_url("example.org", "api/v3/"), "example.org/api/v3/");
        assert_eq!(strip_scheme("https://x.org"), "x.org");
        assert_eq!(strip_scheme("x.org"), "x.org");
    }
}
