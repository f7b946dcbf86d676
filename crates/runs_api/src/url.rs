use url::Url;

use crate::error::RunsApiError;

/// Path segments of the bulk runs collection.
pub const BULK_RUNS_SEGMENTS: [&str; 2] = ["runs", "bulk"];

/// Parse and normalize a base URL.
///
/// Normalization rules:
/// 1) surrounding whitespace and trailing slashes are dropped
/// 2) only `http` and `https` schemes are accepted
/// 3) query strings and fragments are rejected
pub fn normalize_base_url(input: &str) -> Result<Url, RunsApiError> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(RunsApiError::InvalidBaseUrl("base URL is empty".to_owned()));
    }

    let url = Url::parse(trimmed)
        .map_err(|error| RunsApiError::InvalidBaseUrl(format!("{trimmed}: {error}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RunsApiError::InvalidBaseUrl(format!(
            "{trimmed}: unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(RunsApiError::InvalidBaseUrl(format!(
            "{trimmed}: query strings and fragments are not allowed"
        )));
    }
    if url.cannot_be_a_base() {
        return Err(RunsApiError::InvalidBaseUrl(trimmed.to_owned()));
    }
    Ok(url)
}

/// Appends percent-encoded path segments to `base`.
pub fn join_segments<S: AsRef<str>>(base: &Url, segments: &[S]) -> Result<Url, RunsApiError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| RunsApiError::InvalidBaseUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments.iter().map(AsRef::as_ref));
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::{join_segments, normalize_base_url};

    #[test]
    fn trailing_slashes_are_dropped() {
        let url = normalize_base_url(" https://runs.example.test/api/v1/ ").expect("valid url");
        assert_eq!(url.as_str(), "https://runs.example.test/api/v1");
    }

    #[test]
    fn unsupported_inputs_are_rejected() {
        assert!(normalize_base_url("").is_err());
        assert!(normalize_base_url("ftp://runs.example.test").is_err());
        assert!(normalize_base_url("https://runs.example.test/?x=1").is_err());
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn segments_are_appended_and_encoded() {
        let base = normalize_base_url("https://runs.example.test/api").expect("valid url");
        let url = join_segments(&base, &["runs", "bulk", "batch 1/2"]).expect("joined");
        assert_eq!(
            url.as_str(),
            "https://runs.example.test/api/runs/bulk/batch%201%2F2"
        );

        let root = normalize_base_url("http://127.0.0.1:8080").expect("valid url");
        let url = join_segments(&root, &["runs", "bulk"]).expect("joined");
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/runs/bulk");
    }
}
