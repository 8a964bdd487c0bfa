//! Configuration resolution for gmna-ba
//!
//! Provides multi-tier credential resolution with ENV → TOML priority.

use gmna_common::config::TomlConfig;
use tracing::{info, warn};

/// Service-specific key variable, checked first
pub const API_KEY_ENV: &str = "GMNA_OPENAI_API_KEY";

/// Conventional provider variable, checked second
pub const PROVIDER_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Resolve the analysis provider API key
///
/// **Priority:** `GMNA_OPENAI_API_KEY` → `OPENAI_API_KEY` → TOML `openai_api_key`
///
/// Returns `None` when no source carries a usable key. The service still
/// starts; batch submission answers 503 until a key is configured.
pub fn resolve_openai_api_key(toml_config: &TomlConfig) -> Option<String> {
    let candidates = [
        (API_KEY_ENV, std::env::var(API_KEY_ENV).ok()),
        (PROVIDER_API_KEY_ENV, std::env::var(PROVIDER_API_KEY_ENV).ok()),
        ("TOML", toml_config.openai_api_key.clone()),
    ];

    let valid: Vec<(&str, String)> = candidates
        .into_iter()
        .filter_map(|(source, key)| key.filter(|k| is_valid_key(k)).map(|k| (source, k)))
        .collect();

    if valid.len() > 1 {
        let sources: Vec<&str> = valid.iter().map(|(source, _)| *source).collect();
        warn!(
            "OpenAI API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    match valid.into_iter().next() {
        Some((source, key)) => {
            info!("OpenAI API key loaded from {}", source);
            Some(key.trim().to_string())
        }
        None => {
            warn!(
                "OpenAI API key not configured. Set {} or {}, or add openai_api_key to the TOML config",
                API_KEY_ENV, PROVIDER_API_KEY_ENV
            );
            None
        }
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var(API_KEY_ENV);
        std::env::remove_var(PROVIDER_API_KEY_ENV);
    }

    fn toml_with_key(key: Option<&str>) -> TomlConfig {
        TomlConfig {
            openai_api_key: key.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("sk-abc"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("  \t"));
    }

    #[test]
    #[serial]
    fn test_service_env_wins() {
        clear_env();
        std::env::set_var(API_KEY_ENV, "sk-service");
        std::env::set_var(PROVIDER_API_KEY_ENV, "sk-provider");

        let key = resolve_openai_api_key(&toml_with_key(Some("sk-toml")));
        assert_eq!(key.as_deref(), Some("sk-service"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_provider_env_before_toml() {
        clear_env();
        std::env::set_var(PROVIDER_API_KEY_ENV, "sk-provider");

        let key = resolve_openai_api_key(&toml_with_key(Some("sk-toml")));
        assert_eq!(key.as_deref(), Some("sk-provider"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_blank_env_falls_through_to_toml() {
        clear_env();
        std::env::set_var(API_KEY_ENV, "   ");

        let key = resolve_openai_api_key(&toml_with_key(Some("sk-toml")));
        assert_eq!(key.as_deref(), Some("sk-toml"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_no_key_anywhere() {
        clear_env();
        assert_eq!(resolve_openai_api_key(&toml_with_key(None)), None);
    }
}
