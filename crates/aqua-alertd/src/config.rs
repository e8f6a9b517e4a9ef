//! Daemon configuration.
//!
//! One TOML file configures every part of the daemon:
//! - `[server]`: dashboard bind address and CORS origins
//! - `[logging]`: log level and output format
//! - `[engine]` and `[workers]`: alert engine policy and loop intervals
//! - `[channels]`: which notification channels are enabled
//! - `[[rules]]`: rules seeded into the store at startup

use std::path::Path;

use aqua_alerts::{EngineConfig, NewAlertRule, WorkerConfig};
use aqua_dashboard::DashboardConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// The sample configuration written by `init-config`.
pub const SAMPLE_CONFIG: &str = include_str!("../config/alertd.example.toml");

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read or written.
    #[error("failed to access config file '{path}': {source}")]
    Io {
        /// The file path.
        path: String,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("invalid TOML: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Email channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    /// Whether the channel sends.
    pub enabled: bool,
    /// Sender address.
    pub from: String,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            from: "alerts@aquaguard.local".to_string(),
        }
    }
}

/// SMS channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsSettings {
    /// Whether the channel sends.
    pub enabled: bool,
    /// Registered sender ID.
    pub sender_id: String,
}

impl Default for SmsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sender_id: "AQUAGD".to_string(),
        }
    }
}

/// Settings of a channel with nothing but an enable flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToggleSettings {
    /// Whether the channel sends.
    pub enabled: bool,
}

impl Default for ToggleSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Notification channel configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Email channel.
    pub email: EmailSettings,
    /// SMS channel.
    pub sms: SmsSettings,
    /// Push channel.
    pub push: ToggleSettings,
    /// Webhook channel.
    pub webhook: ToggleSettings,
}

/// Main daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertdConfig {
    /// Dashboard server.
    pub server: DashboardConfig,
    /// Logging.
    pub logging: LoggingConfig,
    /// Alert engine.
    pub engine: EngineConfig,
    /// Background loops.
    pub workers: WorkerConfig,
    /// Notification channels.
    pub channels: ChannelsConfig,
    /// Rules seeded at startup.
    pub rules: Vec<NewAlertRule>,
}

impl AlertdConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let intervals = [
            ("workers.outbox_interval_secs", self.workers.outbox_interval_secs),
            ("workers.escalation_interval_secs", self.workers.escalation_interval_secs),
            ("workers.auto_resolve_interval_secs", self.workers.auto_resolve_interval_secs),
        ];
        for (name, secs) in intervals {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }

        if self.server.default_page_size == 0 {
            return Err(ConfigError::Invalid(
                "server.default_page_size must be greater than 0".to_string(),
            ));
        }

        if EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(ConfigError::Invalid(format!(
                "logging.level is not a valid filter: '{}'",
                self.logging.level
            )));
        }

        if self.channels.email.enabled && !self.channels.email.from.contains('@') {
            return Err(ConfigError::Invalid(
                "channels.email.from must be an email address".to_string(),
            ));
        }

        for (index, rule) in self.rules.iter().enumerate() {
            rule.validate()
                .map_err(|e| ConfigError::Invalid(format!("rules[{index}]: {e}")))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqua_alerts::{ActionKind, AlertSeverity, AlertType, EscalationMode, TransitionPolicy};
    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_case::test_case;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AlertdConfig::from_toml("").expect("empty config is valid");

        assert_eq!(config, AlertdConfig::default());
        assert_eq!(config.server.bind_addr.port(), 8080);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.engine.transition_policy, TransitionPolicy::Permissive);
        assert_eq!(config.workers.outbox_interval_secs, 5);
        assert!(config.channels.webhook.enabled);
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_sample_config_parses() {
        let config = AlertdConfig::from_toml(SAMPLE_CONFIG).expect("sample config is valid");

        assert_eq!(config.server.cors_origins, vec!["http://localhost:3000".to_string()]);
        assert_eq!(config.engine.escalation_mode, EscalationMode::FirstStep);
        assert!(!config.channels.webhook.enabled);
        assert_eq!(config.rules.len(), 2);

        let turbidity = &config.rules[0];
        assert_eq!(turbidity.alert_type, AlertType::WaterQuality);
        assert_eq!(turbidity.severity, AlertSeverity::High);
        assert!(turbidity.enabled);
        assert_eq!(turbidity.conditions.len(), 1);
        assert_eq!(turbidity.actions[0].kind(), ActionKind::Email);
        assert_eq!(turbidity.escalation_rules[0].delay_minutes, 30);
        assert_eq!(turbidity.auto_resolve_after_minutes, Some(240));

        assert_eq!(config.rules[1].actions[0].kind(), ActionKind::Sms);
    }

    #[test]
    fn test_partial_sections() {
        let toml = r#"
            [logging]
            format = "json"

            [engine]
            transition_policy = "strict"
            escalation_mode = "chain"

            [channels.sms]
            enabled = false
        "#;

        let config = AlertdConfig::from_toml(toml).expect("should parse");

        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.engine.transition_policy, TransitionPolicy::Strict);
        assert_eq!(config.engine.escalation_mode, EscalationMode::Chain);
        assert_eq!(config.engine.store_timeout_secs, 10);
        assert!(!config.channels.sms.enabled);
        assert_eq!(config.channels.sms.sender_id, "AQUAGD");
    }

    #[test]
    fn test_load_from_file() {
        let temp_file = create_temp_config("[server]\nbind_addr = \"127.0.0.1:9100\"\n");
        let config = AlertdConfig::from_file(temp_file.path()).expect("should load from file");

        assert_eq!(config.server.bind_addr.port(), 9100);
    }

    #[test]
    fn test_file_not_found() {
        let err = AlertdConfig::from_file("/nonexistent/path/alertd.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_invalid_toml() {
        let err = AlertdConfig::from_toml("[server\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test_case("[workers]\noutbox_interval_secs = 0", "outbox_interval_secs"; "zero outbox interval")]
    #[test_case("[workers]\nauto_resolve_interval_secs = 0", "auto_resolve_interval_secs"; "zero sweep interval")]
    #[test_case("[engine]\nsystem_actor = \"\"", "system_actor"; "empty system actor")]
    #[test_case("[server]\ndefault_page_size = 0", "default_page_size"; "zero page size")]
    #[test_case("[logging]\nlevel = \"info,aqua=loud\"", "logging.level"; "bad filter")]
    #[test_case("[channels.email]\nfrom = \"nobody\"", "channels.email.from"; "bad sender")]
    #[test_case("[[rules]]\nname = \"\"\ntype = \"water_quality\"\nseverity = \"low\"", "rules[0]"; "blank rule name")]
    fn test_invalid_values(toml: &str, needle: &str) {
        let err = AlertdConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains(needle), "{err}");
    }

    #[test]
    fn test_unknown_enum_value_rejected() {
        let err = AlertdConfig::from_toml("[logging]\nformat = \"xml\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
