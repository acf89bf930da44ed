use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{Direction, Position, Rgb};

/// Whether a participant drives a train or only watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Player,
    Observer,
}

/// Lifecycle phase of a room. Phases only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    Waiting,
    Starting,
    Running,
    Ended,
    Closed,
}

/// Why a train died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathReason {
    SelfCollision,
    CollisionWithTrain,
    CollisionWithWagon,
    OutOfBounds,
}

/// Packets sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientPacket {
    Join {
        nickname: String,
        #[serde(default)]
        role: Role,
        #[serde(default)]
        client_version: u32,
    },
    Direction {
        heading: Direction,
    },
    DropSegment,
    RespawnRequest,
    Ping,
    Pong,
    Leave,
}

/// Packets sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerPacket {
    JoinAck {
        expected_version: u32,
        room_id: String,
    },
    JoinFailed {
        reason: String,
    },
    RoomStatus {
        room_id: String,
        phase: RoomPhase,
        roster: Vec<RosterEntry>,
        capacity: usize,
        wait_seconds: u64,
    },
    GameStarted {
        duration_seconds: u64,
    },
    FullState {
        data: StateUpdate,
    },
    State {
        data: StateUpdate,
    },
    Death {
        remaining: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<DeathReason>,
    },
    SpawnOk,
    SpawnFailed {
        reason: String,
    },
    DropSegmentOk {
        cooldown: f64,
    },
    DropSegmentFailed {
        reason: String,
        remaining: f64,
    },
    MatchOver {
        rankings: Vec<Ranking>,
        duration: u64,
    },
    Ping,
    Pong,
    Disconnect {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub nickname: String,
    pub role: Role,
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranking {
    pub name: String,
    pub best_score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSize {
    pub game_width: i32,
    pub game_height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerState {
    pub position: Position,
    pub value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryZoneState {
    pub position: Position,
    pub width: i32,
    pub height: i32,
}

/// Field groups of one train. Absent groups did not change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wagons: Option<Vec<Position>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost_cooldown_active: Option<bool>,
}

impl TrainUpdate {
    pub fn is_empty(&self) -> bool {
        self.position.is_none()
            && self.direction.is_none()
            && self.wagons.is_none()
            && self.score.is_none()
            && self.color.is_none()
            && self.alive.is_none()
            && self.boost_cooldown_active.is_none()
    }
}

/// A full snapshot or a dirty-only diff of a match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<GameSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_size: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passengers: Option<Vec<PassengerState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_zone: Option<DeliveryZoneState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub trains: BTreeMap<String, TrainUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_scores: Option<BTreeMap<String, u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_time: Option<u64>,
    /// `[old, new]` when a departed player's train was handed to a bot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_train: Option<[String; 2]>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        self.size.is_none()
            && self.cell_size.is_none()
            && self.passengers.is_none()
            && self.delivery_zone.is_none()
            && self.trains.is_empty()
            && self.best_scores.is_none()
            && self.remaining_time.is_none()
            && self.rename_train.is_none()
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("datagram is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes a packet as one newline-terminated JSON record.
pub fn encode<T: Serialize>(packet: &T) -> Result<Vec<u8>, CodecError> {
    let mut bytes = serde_json::to_vec(packet)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Splits a datagram into records and parses each one.
///
/// Blank lines are skipped. A datagram that is not UTF-8 yields a single error.
pub fn decode_datagram<T>(datagram: &[u8]) -> Vec<Result<T, CodecError>>
where
    T: for<'de> Deserialize<'de>,
{
    let text = match std::str::from_utf8(datagram) {
        Ok(text) => text,
        Err(e) => return vec![Err(CodecError::Utf8(e))],
    };

    text.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(CodecError::from))
        .collect()
}
