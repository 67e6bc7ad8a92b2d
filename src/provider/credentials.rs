//! API key lookup.
//!
//! The environment variable wins; otherwise the key is read from a
//! `KEY=value` file in the installation directory.

use crate::config::Config;
use crate::error::ProviderError;
use std::path::Path;
use tracing::debug;

pub const API_KEY_VAR: &str = "PERPLEXITY_API_KEY";

/// Resolve the API key from the environment, then the credential file.
pub fn resolve_api_key() -> Result<String, ProviderError> {
    let file = Config::credentials_path().ok();
    resolve_from(std::env::var(API_KEY_VAR).ok(), file.as_deref())
}

/// Resolve the API key from explicit sources, in priority order.
pub fn resolve_from(env_value: Option<String>, file: Option<&Path>) -> Result<String, ProviderError> {
    if let Some(key) = env_value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        debug!("Using API key from {}", API_KEY_VAR);
        return Ok(key);
    }
    if let Some(key) = file.and_then(read_credential_file) {
        debug!("Using API key from credential file");
        return Ok(key);
    }
    Err(ProviderError::AuthMissing)
}

fn read_credential_file(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents.lines().find_map(|line| {
        let line = line.trim();
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line.split_once('=')?;
        if key.trim() != API_KEY_VAR {
            return None;
        }
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(".env");
        std::fs::write(&file, "PERPLEXITY_API_KEY=from-file\n").unwrap();

        let key = resolve_from(Some("from-env".to_string()), Some(&file)).unwrap();
        assert_eq!(key, "from-env");
    }

    #[test]
    fn test_file_used_when_env_missing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(".env");
        std::fs::write(&file, "# key\nexport PERPLEXITY_API_KEY=\"pplx-123\"\n").unwrap();

        assert_eq!(resolve_from(None, Some(&file)).unwrap(), "pplx-123");
    }

    #[test]
    fn test_blank_env_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(".env");
        std::fs::write(&file, "PERPLEXITY_API_KEY=pplx-456").unwrap();

        assert_eq!(
            resolve_from(Some("  ".to_string()), Some(&file)).unwrap(),
            "pplx-456"
        );
    }

    #[test]
    fn test_missing_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(".env");
        std::fs::write(&file, "OTHER_KEY=abc\n").unwrap();

        assert!(matches!(
            resolve_from(None, Some(&file)),
            Err(ProviderError::AuthMissing)
        ));
        assert!(matches!(resolve_from(None, None), Err(ProviderError::AuthMissing)));
    }
}
