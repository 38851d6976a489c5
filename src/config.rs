//! Process configuration, read from the environment at startup.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::transport::{ReviewerId, SourceId};

/// Which pipeline the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayMode {
    /// Full pipeline: admission, dedup, review, scheduling.
    #[default]
    Processor,
    /// Single-source relay without review or dedup.
    Collector,
}

/// Process-level configuration. Runtime settings (caption, delays, media
/// filter, watermark) live in the store, not here.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bot API token.
    pub bot_token: SecretString,
    /// Target channel (numeric chat id or @username).
    pub target_channel: String,
    /// Path to the local database file.
    pub db_path: PathBuf,
    /// Reviewer seeded as the first elevated principal when none exists.
    pub first_admin: Option<ReviewerId>,
    pub mode: RelayMode,
    /// Source watched in collector mode.
    pub collect_source: Option<SourceId>,
    /// Acceptance chance in collector mode, 1..=100.
    pub collect_chance: u8,
    /// Optional log file; stderr only when unset.
    pub log_file: Option<PathBuf>,
}

impl RelayConfig {
    /// Build configuration from `MEDIA_RELAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("MEDIA_RELAY_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("MEDIA_RELAY_BOT_TOKEN".into()))?;
        let target_channel = std::env::var("MEDIA_RELAY_TARGET")
            .map_err(|_| ConfigError::MissingEnvVar("MEDIA_RELAY_TARGET".into()))?;

        let db_path = std::env::var("MEDIA_RELAY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/media-relay.db"));

        let first_admin = match std::env::var("MEDIA_RELAY_ADMIN") {
            Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "MEDIA_RELAY_ADMIN".into(),
                message: format!("not a numeric reviewer id: {raw}"),
            })?),
            Err(_) => None,
        };

        let mode = match std::env::var("MEDIA_RELAY_MODE").as_deref() {
            Ok("collector") => RelayMode::Collector,
            Ok("processor") | Err(_) => RelayMode::Processor,
            Ok(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "MEDIA_RELAY_MODE".into(),
                    message: format!("expected \"processor\" or \"collector\", got \"{other}\""),
                });
            }
        };

        let collect_source = match std::env::var("MEDIA_RELAY_COLLECT_SOURCE") {
            Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "MEDIA_RELAY_COLLECT_SOURCE".into(),
                message: format!("not a numeric chat id: {raw}"),
            })?),
            Err(_) => None,
        };
        if mode == RelayMode::Collector && collect_source.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "MEDIA_RELAY_COLLECT_SOURCE".into(),
            ));
        }

        let collect_chance = match std::env::var("MEDIA_RELAY_COLLECT_CHANCE") {
            Ok(raw) => match raw.parse() {
                Ok(chance @ 1..=100) => chance,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "MEDIA_RELAY_COLLECT_CHANCE".into(),
                        message: format!("expected 1..=100, got \"{raw}\""),
                    });
                }
            },
            Err(_) => 100,
        };

        let log_file = std::env::var("MEDIA_RELAY_LOG_FILE").ok().map(PathBuf::from);

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            target_channel,
            db_path,
            first_admin,
            mode,
            collect_source,
            collect_chance,
            log_file,
        })
    }
}
