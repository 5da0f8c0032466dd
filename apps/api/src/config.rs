use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::llm_client::Provider;

pub const DEFAULT_MODEL: &str = "anthropic/claude-3.5-sonnet";

/// Application configuration loaded from environment variables.
/// Every variable has a default or is optional; malformed numbers fail startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// Absent → conversations and ratings are kept in memory only.
    pub database_url: Option<String>,
    /// Server-side fallback when a chat request carries no key of its own.
    pub openrouter_api_key: Option<String>,
    /// Same, for bare `gemini-*` models.
    pub gemini_api_key: Option<String>,
    pub default_model: String,
    pub tectonic_bin: String,
    pub compile_timeout_secs: u64,
    pub resume_class_path: Option<PathBuf>,
    /// Absent → the bundled starter template is served.
    pub template_path: Option<PathBuf>,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            port: parse_env("PORT", 8080).context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: optional_env("DATABASE_URL"),
            openrouter_api_key: optional_env("OPENROUTER_API_KEY"),
            gemini_api_key: optional_env("GEMINI_API_KEY"),
            default_model: optional_env("DEFAULT_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            tectonic_bin: optional_env("TECTONIC_BIN").unwrap_or_else(|| "tectonic".to_string()),
            compile_timeout_secs: parse_env("COMPILE_TIMEOUT_SECS", 60)
                .context("COMPILE_TIMEOUT_SECS must be a whole number of seconds")?,
            resume_class_path: optional_env("RESUME_CLASS_PATH").map(PathBuf::from),
            template_path: optional_env("RESUME_TEMPLATE_PATH").map(PathBuf::from),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)
                .context("MAX_UPLOAD_BYTES must be a byte count")?,
        })
    }

    /// The request's own key wins over the server default for the model's provider.
    /// Blank keys count as absent.
    pub fn api_key<'a>(&'a self, model_id: &str, requested: Option<&'a str>) -> Option<&'a str> {
        let server_key = match Provider::for_model(model_id) {
            Provider::OpenRouter => self.openrouter_api_key.as_deref(),
            Provider::Gemini => self.gemini_api_key.as_deref(),
        };
        requested.filter(|k| !k.trim().is_empty()).or(server_key)
    }
}

/// Unset or blank variables are `None`.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value '{raw}' for '{key}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            port: 8080,
            rust_log: "info".into(),
            database_url: None,
            openrouter_api_key: Some("server-key".into()),
            gemini_api_key: None,
            default_model: DEFAULT_MODEL.into(),
            tectonic_bin: "tectonic".into(),
            compile_timeout_secs: 60,
            resume_class_path: None,
            template_path: None,
            max_upload_bytes: 1024,
        }
    }

    #[test]
    fn test_request_key_overrides_server_key() {
        let config = config();
        assert_eq!(config.api_key(DEFAULT_MODEL, Some("mine")), Some("mine"));
        assert_eq!(config.api_key(DEFAULT_MODEL, Some("  ")), Some("server-key"));
        assert_eq!(config.api_key(DEFAULT_MODEL, None), Some("server-key"));

        let keyless = Config {
            openrouter_api_key: None,
            ..config
        };
        assert_eq!(keyless.api_key(DEFAULT_MODEL, None), None);
    }

    #[test]
    fn test_server_key_follows_model_provider() {
        let config = Config {
            gemini_api_key: Some("gemini-server-key".into()),
            ..config()
        };
        assert_eq!(
            config.api_key("gemini-2.5-flash", None),
            Some("gemini-server-key")
        );
        assert_eq!(config.api_key("openai/gpt-4o", None), Some("server-key"));
        assert_eq!(config.api_key("gemini-2.5-flash", Some("mine")), Some("mine"));

        let no_gemini = Config {
            gemini_api_key: None,
            ..config
        };
        assert_eq!(no_gemini.api_key("gemini-2.5-pro", None), None);
    }

    #[test]
    fn test_parse_env_defaults_and_rejects_garbage() {
        // Names unique to this test; nothing else reads them.
        std::env::remove_var("TEXPILOT_TEST_UNSET");
        assert_eq!(parse_env::<u64>("TEXPILOT_TEST_UNSET", 60).unwrap(), 60);

        std::env::set_var("TEXPILOT_TEST_TIMEOUT", "15");
        assert_eq!(parse_env::<u64>("TEXPILOT_TEST_TIMEOUT", 60).unwrap(), 15);

        std::env::set_var("TEXPILOT_TEST_PORT", "eighty");
        assert!(parse_env::<u16>("TEXPILOT_TEST_PORT", 8080).is_err());
    }
}
