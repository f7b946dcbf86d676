use std::collections::BTreeMap;

use crate::config::RunsApiConfig;
use crate::error::RunsApiError;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_AGENT: &str = "user-agent";

/// Build a deterministic header map for runs service requests.
pub fn build_headers(
    config: &RunsApiConfig,
    user_agent: Option<&str>,
) -> Result<BTreeMap<String, String>, RunsApiError> {
    let api_key = config.api_key.trim();
    if api_key.is_empty() {
        return Err(RunsApiError::MissingApiKey);
    }

    let mut headers = BTreeMap::new();
    headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {api_key}"));
    headers.insert(HEADER_ACCEPT.to_owned(), "application/json".to_owned());
    headers.insert(
        HEADER_CONTENT_TYPE.to_owned(),
        "application/json".to_owned(),
    );

    let ua = match (user_agent, config.user_agent.as_deref()) {
        (Some(explicit), _) if !explicit.trim().is_empty() => explicit.trim().to_owned(),
        (None, Some(explicit)) if !explicit.trim().is_empty() => explicit.trim().to_owned(),
        _ => default_user_agent(),
    };
    headers.insert(HEADER_USER_AGENT.to_owned(), ua);

    for (key, value) in &config.extra_headers {
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(RunsApiError::InvalidHeader("empty header name".to_owned()));
        }
        headers.insert(key, value.trim().to_owned());
    }

    Ok(headers)
}

fn default_user_agent() -> String {
    format!(
        "runfleet/{} ({} {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        normalize_arch(std::env::consts::ARCH)
    )
}

fn normalize_arch(arch: &str) -> String {
    match arch.to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" => "x64".to_owned(),
        "x86" | "i386" | "i686" => "ia32".to_owned(),
        "aarch64" => "arm64".to_owned(),
        normalized => normalized.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_arch;

    #[test]
    fn arch_names_are_normalized() {
        assert_eq!(normalize_arch("x86_64"), "x64");
        assert_eq!(normalize_arch("aarch64"), "arm64");
        assert_eq!(normalize_arch("riscv64"), "riscv64");
    }
}
