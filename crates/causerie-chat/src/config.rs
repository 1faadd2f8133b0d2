//! Chat core configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the core can run with zero
//! configuration; deployments override the operator label and cadences.

use std::time::Duration;

use causerie_shared::constants;
use causerie_shared::UserId;

/// Messaging core configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Well-known identity key for the operator side.
    /// Env: `OPERATOR_ID`
    /// Default: `"operator"`
    pub operator_id: UserId,

    /// Display name recorded for the operator in new conversations.
    /// Env: `OPERATOR_NAME`
    pub operator_name: String,

    /// First message seeded into every new conversation.
    /// Env: `WELCOME_TEXT`
    pub welcome_text: String,

    /// Presence heartbeat cadence.
    /// Env: `PRESENCE_HEARTBEAT_SECS`
    /// Default: 30s
    pub heartbeat_interval: Duration,

    /// A presence record older than this is reported offline regardless of
    /// its stored flag.
    /// Env: `PRESENCE_ONLINE_CUTOFF_SECS`
    /// Default: 120
    pub online_cutoff_secs: i64,

    /// Typing records older than this are invisible to readers.
    /// Env: `TYPING_TTL_SECS`
    /// Default: 10
    pub typing_ttl_secs: i64,

    /// Typing records older than this are deleted by the hygiene sweep.
    /// Env: `TYPING_SWEEP_SECS`
    /// Default: 30
    pub typing_sweep_secs: i64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            operator_id: UserId::new(constants::OPERATOR_ID),
            operator_name: constants::OPERATOR_NAME.to_string(),
            welcome_text: constants::WELCOME_TEXT.to_string(),
            heartbeat_interval: Duration::from_secs(constants::HEARTBEAT_SECS),
            online_cutoff_secs: constants::ONLINE_CUTOFF_SECS,
            typing_ttl_secs: constants::TYPING_TTL_SECS,
            typing_sweep_secs: constants::TYPING_SWEEP_SECS,
        }
    }
}

impl ChatConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("OPERATOR_ID") {
            if !id.is_empty() {
                config.operator_id = UserId::new(id);
            }
        }

        if let Ok(name) = std::env::var("OPERATOR_NAME") {
            config.operator_name = name;
        }

        if let Ok(text) = std::env::var("WELCOME_TEXT") {
            config.welcome_text = text;
        }

        if let Some(secs) = env_secs("PRESENCE_HEARTBEAT_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs as u64);
        }

        if let Some(secs) = env_secs("PRESENCE_ONLINE_CUTOFF_SECS") {
            config.online_cutoff_secs = secs;
        }

        if let Some(secs) = env_secs("TYPING_TTL_SECS") {
            config.typing_ttl_secs = secs;
        }

        if let Some(secs) = env_secs("TYPING_SWEEP_SECS") {
            config.typing_sweep_secs = secs;
        }

        config
    }
}

/// Read a positive number of seconds from an env var, warning on junk.
fn env_secs(name: &str) -> Option<i64> {
    let value = std::env::var(name).ok()?;
    match value.parse::<i64>() {
        Ok(secs) if secs > 0 => Some(secs),
        _ => {
            tracing::warn!(var = name, value = %value, "Invalid duration, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();
        assert_eq!(config.operator_id.as_str(), "operator");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.online_cutoff_secs, 120);
        assert_eq!(config.typing_ttl_secs, 10);
        assert_eq!(config.typing_sweep_secs, 30);
    }
}
