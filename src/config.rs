//! Environment-backed settings.
//!
//! Secrets are required and fail fast; every other knob falls back to a
//! default so a bare `.env` with the API keys is enough to run.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub struct OracleSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl OracleSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: parse_env_required("OPENAI_API_KEY")?,
            base_url: parse_env_string("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            model: parse_env_string("OPENAI_MODEL", "gpt-4o"),
            timeout: Duration::from_secs(parse_env_u64("ORACLE_TIMEOUT_SECS", 120)),
            retry: RetryPolicy::new(
                parse_env_usize("ORACLE_MAX_ATTEMPTS", 3) as u32,
                Duration::from_millis(parse_env_u64("ORACLE_RETRY_DELAY_MS", 1000)),
            ),
        })
    }
}

#[derive(Clone, Debug)]
pub struct ScholarSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub search_limit: usize,
    pub top_papers: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ScholarSettings {
    pub fn from_env() -> Self {
        Self {
            base_url: parse_env_string(
                "S2_BASE_URL",
                "https://api.semanticscholar.org/graph/v1",
            ),
            api_key: parse_env_optional("S2_API_KEY"),
            search_limit: parse_env_usize("S2_SEARCH_LIMIT", 20),
            top_papers: parse_env_usize("S2_TOP_PAPERS", 2),
            timeout: Duration::from_secs(parse_env_u64("S2_TIMEOUT_SECS", 30)),
            retry: RetryPolicy::new(
                parse_env_usize("S2_MAX_ATTEMPTS", 3) as u32,
                Duration::from_millis(parse_env_u64("S2_RETRY_DELAY_MS", 2000)),
            ),
        }
    }
}

impl Default for ScholarSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.semanticscholar.org/graph/v1".to_string(),
            api_key: None,
            search_limit: 20,
            top_papers: 2,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::new(3, Duration::from_millis(2000)),
        }
    }
}

/// Paths shared by both binaries.
#[derive(Clone, Debug)]
pub struct PathSettings {
    pub taxonomy_path: PathBuf,
    pub files_dir: PathBuf,
    pub prompts_path: Option<PathBuf>,
}

impl PathSettings {
    pub fn from_env() -> Self {
        Self {
            taxonomy_path: PathBuf::from(parse_env_string("TAXONOMY_PATH", "kody_OECD.xlsx")),
            files_dir: PathBuf::from(parse_env_string("FILES_DIR", "files")),
            prompts_path: parse_env_optional("PROMPTS_PATH").map(PathBuf::from),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TelegramSettings {
    pub token: String,
    pub api_url: String,
    pub poll_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl TelegramSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            token: parse_env_required("TELEGRAM_BOT_TOKEN")?,
            api_url: parse_env_string("TELEGRAM_API_URL", "https://api.telegram.org"),
            poll_timeout_secs: parse_env_u64("TELEGRAM_POLL_TIMEOUT_SECS", 30),
            retry: RetryPolicy::new(
                parse_env_usize("TELEGRAM_MAX_ATTEMPTS", 3) as u32,
                Duration::from_millis(parse_env_u64("TELEGRAM_RETRY_DELAY_MS", 1000)),
            ),
        })
    }
}

pub fn parse_env_required(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::Config(format!("{name} is not set"))),
    }
}

pub fn parse_env_optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn parse_env_string(name: &str, default: &str) -> String {
    parse_env_optional(name).unwrap_or_else(|| default.to_string())
}

pub fn parse_env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

pub fn parse_env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_variables_fall_back_to_defaults() {
        assert_eq!(
            parse_env_string("RFB_TEST_SURELY_UNSET_STRING", "fallback"),
            "fallback"
        );
        assert_eq!(parse_env_usize("RFB_TEST_SURELY_UNSET_USIZE", 7), 7);
        assert_eq!(parse_env_optional("RFB_TEST_SURELY_UNSET_OPTIONAL"), None);
    }

    #[test]
    fn missing_required_variable_is_a_config_error() {
        let err = parse_env_required("RFB_TEST_SURELY_UNSET_REQUIRED").unwrap_err();
        assert!(matches!(err, Error::Config(message) if message.contains("RFB_TEST_SURELY_UNSET_REQUIRED")));
    }
}
