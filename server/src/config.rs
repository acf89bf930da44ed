//! Server configuration.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes. Command-line flags are applied on top of the file by the binary.

use std::path::Path;

use railyard_shared::REFERENCE_TICK_RATE;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::game::GameRules;

/// One entry of the bot pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name. A name is drawn from the bot name pool when absent.
    #[serde(default)]
    pub nickname: Option<String>,
    /// Registered policy name, e.g. `"collector"`.
    pub policy: String,
}

impl AgentConfig {
    pub fn new(policy: impl Into<String>) -> Self {
        Self {
            nickname: None,
            policy: policy.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub players_per_room: usize,
    /// Base seed. Each room derives its own generator from it.
    pub seed: u64,
    pub respawn_cooldown_seconds: f64,
    pub client_timeout_seconds: f64,
    /// Simulation steps per wall-clock second.
    pub tick_rate: u32,
    pub batch_mode: bool,
    pub match_duration_seconds: u64,
    pub wait_before_bots_seconds: u64,
    pub max_passenger_value: u32,
    pub delivery_cooldown_seconds: f64,
    /// Wall-clock budget of one policy decision.
    pub policy_timeout_ms: u64,
    /// Delay between `match_over` and room teardown.
    pub end_grace_seconds: f64,
    pub agents: Vec<AgentConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5555,
            players_per_room: 2,
            seed: 0,
            respawn_cooldown_seconds: 5.0,
            client_timeout_seconds: 2.0,
            tick_rate: REFERENCE_TICK_RATE,
            batch_mode: false,
            match_duration_seconds: 300,
            wait_before_bots_seconds: 30,
            max_passenger_value: 3,
            delivery_cooldown_seconds: 0.1,
            policy_timeout_ms: 1000 / REFERENCE_TICK_RATE as u64,
            end_grace_seconds: 2.0,
            agents: vec![AgentConfig::new("collector"), AgentConfig::new("cruiser")],
        }
    }
}

impl ServerConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be positive".into()));
        }
        if self.players_per_room == 0 {
            return Err(ConfigError::Invalid(
                "players_per_room must be positive".into(),
            ));
        }
        if self.match_duration_seconds == 0 {
            return Err(ConfigError::Invalid(
                "match_duration_seconds must be positive".into(),
            ));
        }
        if self.max_passenger_value == 0 {
            return Err(ConfigError::Invalid(
                "max_passenger_value must be positive".into(),
            ));
        }
        if self.client_timeout_seconds <= 0.0 {
            return Err(ConfigError::Invalid(
                "client_timeout_seconds must be positive".into(),
            ));
        }
        if self.respawn_cooldown_seconds < 0.0 || self.delivery_cooldown_seconds < 0.0 {
            return Err(ConfigError::Invalid("cooldowns cannot be negative".into()));
        }
        // Bots backfill every room that times out, and make up all of a batch.
        if self.agents.is_empty() {
            return Err(ConfigError::Invalid("agent pool is empty".into()));
        }
        Ok(())
    }

    pub fn rules(&self) -> GameRules {
        GameRules {
            respawn_cooldown_seconds: self.respawn_cooldown_seconds,
            delivery_cooldown_seconds: self.delivery_cooldown_seconds,
            max_passenger_value: self.max_passenger_value,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5555);
        assert_eq!(config.players_per_room, 2);
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.policy_timeout_ms, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"tick_rate": 600, "batch_mode": true}"#).unwrap();
        assert_eq!(config.tick_rate, 600);
        assert!(config.batch_mode);
        assert_eq!(config.match_duration_seconds, 300);
    }

    #[test]
    fn test_agents_parse() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"agents": [{"policy": "cruiser"}, {"nickname": "Bot Zed", "policy": "collector"}]}"#,
        )
        .unwrap();
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].nickname, None);
        assert_eq!(config.agents[1].nickname.as_deref(), Some("Bot Zed"));
    }

    #[test]
    fn test_validate_rejects_zero_tick_rate() {
        let config = ServerConfig {
            tick_rate: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_agent_pool() {
        let config = ServerConfig {
            agents: vec![],
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = ServerConfig::load("/nonexistent/railyard.json");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_rules_follow_config() {
        let config = ServerConfig {
            respawn_cooldown_seconds: 1.5,
            ..ServerConfig::default()
        };
        assert_eq!(config.rules().respawn_cooldown_seconds, 1.5);
        assert_eq!(config.rules().max_passenger_value, 3);
    }
}
