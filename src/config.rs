// Configuration management

use crate::core::errors::ShieldError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Global enforcement mode. AUDIT downgrades most BLOCK/REDACT verdicts to
/// ALLOW-but-traced; DISABLED skips the decision engine entirely (every call
/// ALLOWs, still traced).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShieldMode {
    Enforce,
    Audit,
    Disabled,
}

impl ShieldMode {
    fn parse(value: &str) -> Result<Self, ShieldError> {
        match value.to_lowercase().as_str() {
            "enforce" => Ok(ShieldMode::Enforce),
            "audit" => Ok(ShieldMode::Audit),
            "disabled" => Ok(ShieldMode::Disabled),
            other => Err(ShieldError::Config(format!(
                "invalid POLICYSHIELD_MODE '{other}': must be 'enforce', 'audit', or 'disabled'"
            ))),
        }
    }
}

/// Whether unexpected decision-engine errors default to ALLOW or BLOCK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    Open,
    Closed,
}

impl FailMode {
    fn parse(value: &str) -> Result<Self, ShieldError> {
        match value.to_lowercase().as_str() {
            "open" => Ok(FailMode::Open),
            "closed" => Ok(FailMode::Closed),
            other => Err(ShieldError::Config(format!(
                "invalid FAIL_MODE '{other}': must be 'open' or 'closed'"
            ))),
        }
    }
}

/// Application configuration loaded from environment variables.
/// All configuration is validated on load with clear error messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub bind_address: String,
    pub port: u16,

    // Rule loading
    pub rules_path: PathBuf,

    // Enforcement
    pub mode: ShieldMode,
    pub api_token: Option<String>,
    pub fail_mode: FailMode,

    // Session & chain state
    pub session_ttl_secs: u64,
    pub ring_buffer_capacity: usize,

    // Approval manager
    pub approval_max_age_secs: u64,

    // Trace recorder
    pub trace_path: PathBuf,
    pub trace_flush_threshold: usize,

    // Decision engine
    pub post_check_truncate_bytes: usize,

    // Hot reload
    pub reload_poll_interval_ms: u64,

    // Middleware configuration
    pub request_timeout_secs: u64,
    pub body_size_limit_bytes: usize,

    // External approval transport (boundary passthrough only)
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    // Logging configuration
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `rules_path` is deliberately not required here: the spec's documented
    /// launch (`<binary> server --rules <path> ...`) overlays the rules path
    /// from the CLI after this returns. Callers that need a running server
    /// must follow up with [`Config::validate_rules_path`] once any CLI
    /// override has been applied.
    pub fn from_env() -> Result<Self, ShieldError> {
        let config = Self {
            bind_address: Self::get_env_or_default("BIND_ADDRESS", "0.0.0.0")?,
            port: Self::parse_port()?,
            rules_path: Self::get_optional_env("POLICYSHIELD_RULES_PATH")?
                .map(PathBuf::from)
                .unwrap_or_default(),
            mode: ShieldMode::parse(&Self::get_env_or_default("POLICYSHIELD_MODE", "enforce")?)?,
            api_token: Self::get_optional_env("POLICYSHIELD_API_TOKEN")?,
            fail_mode: FailMode::parse(&Self::get_env_or_default("FAIL_MODE", "open")?)?,
            session_ttl_secs: Self::parse_u64_or_default("SESSION_TTL_SECS", 3600)?,
            ring_buffer_capacity: Self::parse_usize_or_default("RING_BUFFER_CAPACITY", 128)?,
            approval_max_age_secs: Self::parse_u64_or_default("APPROVAL_MAX_AGE_SECS", 86_400)?,
            trace_path: Self::get_env_or_default("POLICYSHIELD_TRACE_PATH", "trace.jsonl")?.into(),
            trace_flush_threshold: Self::parse_usize_or_default("TRACE_FLUSH_THRESHOLD", 50)?,
            post_check_truncate_bytes: Self::parse_usize_or_default(
                "POST_CHECK_TRUNCATE_BYTES",
                10_000,
            )?,
            reload_poll_interval_ms: Self::parse_u64_or_default("RELOAD_POLL_INTERVAL_MS", 1000)?,
            request_timeout_secs: Self::parse_u64_or_default("REQUEST_TIMEOUT_SECS", 30)?,
            body_size_limit_bytes: Self::parse_usize_or_default(
                "BODY_SIZE_LIMIT_BYTES",
                2 * 1024 * 1024,
            )?,
            telegram_token: Self::get_optional_env("POLICYSHIELD_TELEGRAM_TOKEN")?,
            telegram_chat_id: Self::get_optional_env("POLICYSHIELD_TELEGRAM_CHAT_ID")?,
            log_level: Self::get_env_or_default("LOG_LEVEL", "info")?,
            log_format: Self::get_env_or_default("LOG_FORMAT", "json")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Get environment variable or return default value
    fn get_env_or_default(key: &str, default: &str) -> Result<String, ShieldError> {
        Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
    }

    /// Get optional environment variable
    fn get_optional_env(key: &str) -> Result<Option<String>, ShieldError> {
        match env::var(key) {
            Ok(value) if !value.is_empty() => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Parse port from PORT environment variable
    fn parse_port() -> Result<u16, ShieldError> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "8000".to_string());
        let port = port_str
            .parse::<u16>()
            .map_err(|e| ShieldError::Config(format!("invalid PORT value '{port_str}': {e}")))?;

        if port == 0 {
            return Err(ShieldError::Config(
                "PORT must be between 1 and 65535".to_string(),
            ));
        }

        Ok(port)
    }

    /// Parse u64 from environment variable or return default
    fn parse_u64_or_default(key: &str, default: u64) -> Result<u64, ShieldError> {
        match env::var(key) {
            Ok(value) => value
                .parse::<u64>()
                .map_err(|e| ShieldError::Config(format!("invalid {key} value '{value}': {e}"))),
            _ => Ok(default),
        }
    }

    /// Parse usize from environment variable or return default
    fn parse_usize_or_default(key: &str, default: usize) -> Result<usize, ShieldError> {
        match env::var(key) {
            Ok(value) => value
                .parse::<usize>()
                .map_err(|e| ShieldError::Config(format!("invalid {key} value '{value}': {e}"))),
            _ => Ok(default),
        }
    }

    /// Validate all configuration values except `rules_path` (see
    /// [`Config::validate_rules_path`] for why that one is separate).
    fn validate(&self) -> Result<(), ShieldError> {
        if self.port == 0 {
            return Err(ShieldError::Config(format!(
                "invalid PORT value '{}': must be between 1 and 65535",
                self.port
            )));
        }

        Self::validate_log_level(&self.log_level)?;
        Self::validate_log_format(&self.log_format)?;

        Ok(())
    }

    /// Validate `rules_path` once it has its final value (after any `--rules`
    /// CLI override has been applied on top of `from_env`'s result).
    pub fn validate_rules_path(&self) -> Result<(), ShieldError> {
        if self.rules_path.as_os_str().is_empty() {
            return Err(ShieldError::Config(
                "no rules file given: pass --rules <path> or set POLICYSHIELD_RULES_PATH"
                    .to_string(),
            ));
        }
        Self::validate_file_path(&self.rules_path, "rules file")
    }

    /// Validate that a file path exists and is readable
    fn validate_file_path(path: &PathBuf, description: &str) -> Result<(), ShieldError> {
        if !path.exists() {
            return Err(ShieldError::Config(format!(
                "{description} not found at {path:?}"
            )));
        }

        if !path.is_file() {
            return Err(ShieldError::Config(format!(
                "{description} is not a file: {path:?}"
            )));
        }

        std::fs::File::open(path)
            .map_err(|e| ShieldError::Config(format!("cannot read {description} at {path:?}: {e}")))?;

        Ok(())
    }

    /// Validate log level
    fn validate_log_level(level: &str) -> Result<(), ShieldError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(ShieldError::Config(format!(
                "invalid LOG_LEVEL '{level}': must be one of {}",
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }

    /// Validate log format
    fn validate_log_format(format: &str) -> Result<(), ShieldError> {
        if format != "json" && format != "text" {
            return Err(ShieldError::Config(format!(
                "invalid LOG_FORMAT '{format}': must be 'json' or 'text'"
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Create a test configuration for unit tests.
    ///
    /// Bypasses environment variable loading and file validation.
    pub fn test_config() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            rules_path: PathBuf::from("/tmp/test_rules.yaml"),
            mode: ShieldMode::Enforce,
            api_token: None,
            fail_mode: FailMode::Open,
            session_ttl_secs: 3600,
            ring_buffer_capacity: 128,
            approval_max_age_secs: 86_400,
            trace_path: PathBuf::from("/tmp/test_trace.jsonl"),
            trace_flush_threshold: 50,
            post_check_truncate_bytes: 10_000,
            reload_poll_interval_ms: 1000,
            request_timeout_secs: 30,
            body_size_limit_bytes: 2 * 1024 * 1024,
            telegram_token: None,
            telegram_chat_id: None,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn setup_test_env() -> TempDir {
        TempDir::new().unwrap()
    }

    fn create_test_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "test content").unwrap();
        path
    }

    #[test]
    fn test_get_env_or_default() {
        env::set_var("TEST_VAR", "test_value");
        let result = Config::get_env_or_default("TEST_VAR", "default").unwrap();
        assert_eq!(result, "test_value");
        env::remove_var("TEST_VAR");
    }

    #[test]
    fn test_get_env_or_default_missing() {
        env::remove_var("TEST_VAR_MISSING");
        let result = Config::get_env_or_default("TEST_VAR_MISSING", "default").unwrap();
        assert_eq!(result, "default");
    }

    #[test]
    fn test_parse_port_valid() {
        env::remove_var("PORT");
        env::set_var("PORT", "8080");
        let port = Config::parse_port().unwrap();
        assert_eq!(port, 8080);
        env::remove_var("PORT");
    }

    #[test]
    fn test_parse_port_default() {
        env::remove_var("PORT");
        let port = Config::parse_port().unwrap();
        assert_eq!(port, 8000);
    }

    #[test]
    fn test_parse_port_invalid() {
        env::set_var("PORT", "99999");
        let result = Config::parse_port();
        assert!(result.is_err());
        env::remove_var("PORT");
    }

    #[test]
    fn test_validate_log_level() {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        for level in valid_levels {
            assert!(Config::validate_log_level(level).is_ok());
        }
    }

    #[test]
    fn test_validate_log_level_invalid() {
        assert!(Config::validate_log_level("invalid").is_err());
    }

    #[test]
    fn test_validate_log_format() {
        assert!(Config::validate_log_format("json").is_ok());
        assert!(Config::validate_log_format("text").is_ok());
    }

    #[test]
    fn test_validate_log_format_invalid() {
        assert!(Config::validate_log_format("invalid").is_err());
    }

    #[test]
    fn test_validate_file_path() {
        let temp_dir = setup_test_env();
        let test_file = create_test_file(temp_dir.path(), "test.txt");
        assert!(Config::validate_file_path(&test_file, "test file").is_ok());
    }

    #[test]
    fn test_validate_file_path_not_exists() {
        let path = PathBuf::from("/nonexistent/file.txt");
        assert!(Config::validate_file_path(&path, "test file").is_err());
    }

    #[test]
    fn from_env_succeeds_without_rules_path_env_var() {
        env::remove_var("POLICYSHIELD_RULES_PATH");
        let config = Config::from_env().unwrap();
        assert!(config.rules_path.as_os_str().is_empty());
        assert!(config.validate_rules_path().is_err());
    }

    #[test]
    fn validate_rules_path_succeeds_once_a_real_file_is_set() {
        let temp_dir = setup_test_env();
        let test_file = create_test_file(temp_dir.path(), "rules.yaml");
        let mut config = Config::test_config();
        config.rules_path = test_file;
        assert!(config.validate_rules_path().is_ok());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(ShieldMode::parse("enforce").unwrap(), ShieldMode::Enforce);
        assert_eq!(ShieldMode::parse("AUDIT").unwrap(), ShieldMode::Audit);
        assert_eq!(ShieldMode::parse("disabled").unwrap(), ShieldMode::Disabled);
        assert!(ShieldMode::parse("bogus").is_err());
    }
}
