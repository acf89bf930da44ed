//! Typed failures surfaced to participants or to the operator.

use thiserror::Error;

/// A command that could not be applied to a train.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("no train named {0}")]
    UnknownTrain(String),
    #[error("train {0} is not alive")]
    NotAlive(String),
    #[error("no wagon to drop")]
    NoWagons,
    #[error("boost cooling down for {remaining:.2}s")]
    CoolingDown { remaining: f64 },
}

impl CommandError {
    /// Remaining cooldown in seconds, zero for non-cooldown failures.
    pub fn remaining(&self) -> f64 {
        match self {
            CommandError::CoolingDown { remaining } => *remaining,
            _ => 0.0,
        }
    }
}

/// A spawn request that was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpawnError {
    #[error("train {0} is already alive")]
    AlreadyAlive(String),
    #[error("respawn cooldown active for {remaining:.2}s")]
    CoolingDown { remaining: f64 },
    #[error("game is over")]
    MatchOver,
    #[error("no match is running")]
    NotRunning,
    #[error("observers cannot spawn")]
    Observer,
}

/// A join request that was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("nickname must be between 1 and {max} characters")]
    InvalidNickname { max: usize },
    #[error("nicknames starting with \"Bot \" are reserved")]
    ReservedNickname,
    #[error("nickname {0} is already taken")]
    NicknameTaken(String),
    #[error("room is full")]
    RoomFull,
    #[error("room is no longer accepting players")]
    RoomClosed,
}

/// Invalid or unreadable server configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("unknown policy {0}")]
    UnknownPolicy(String),
}
