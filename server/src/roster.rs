//! Who is in a room: remote participants by address, bots by name.

use std::net::SocketAddr;

use railyard_shared::{Role, RosterEntry};

use crate::error::JoinError;

pub const MAX_NICKNAME_LENGTH: usize = 15;
pub const BOT_PREFIX: &str = "Bot ";

pub const BOT_NAMES: &[&str] = &[
    "Bot Adrian",
    "Bot Albert",
    "Bot Allen",
    "Bot Andy",
    "Bot Arnold",
    "Bot Bert",
    "Bot Cecil",
    "Bot Charles",
    "Bot Clarence",
    "Bot Elmer",
    "Bot Ernest",
    "Bot Felix",
    "Bot Frank",
    "Bot Fred",
    "Bot Gilbert",
    "Bot Gus",
    "Bot Hank",
    "Bot Howard",
    "Bot James",
    "Bot Lester",
];

/// Checks a nickname requested over the network.
pub fn validate_nickname(nickname: &str) -> Result<(), JoinError> {
    let length = nickname.chars().count();
    if length == 0 || length > MAX_NICKNAME_LENGTH || nickname.trim().is_empty() {
        return Err(JoinError::InvalidNickname {
            max: MAX_NICKNAME_LENGTH,
        });
    }
    if nickname.starts_with(BOT_PREFIX) {
        return Err(JoinError::ReservedNickname);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParticipantId {
    Remote(SocketAddr),
    Bot(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub nickname: String,
    pub role: Role,
}

impl Participant {
    pub fn is_bot(&self) -> bool {
        matches!(self.id, ParticipantId::Bot(_))
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        match self.id {
            ParticipantId::Remote(addr) => Some(addr),
            ParticipantId::Bot(_) => None,
        }
    }

    pub fn is_player(&self) -> bool {
        self.role == Role::Player
    }
}

#[derive(Debug, Default, Clone)]
pub struct Roster {
    participants: Vec<Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_remote(&mut self, addr: SocketAddr, nickname: &str, role: Role) {
        self.participants.push(Participant {
            id: ParticipantId::Remote(addr),
            nickname: nickname.to_string(),
            role,
        });
    }

    pub fn add_bot(&mut self, nickname: &str) {
        self.participants.push(Participant {
            id: ParticipantId::Bot(nickname.to_string()),
            nickname: nickname.to_string(),
            role: Role::Player,
        });
    }

    pub fn remove_remote(&mut self, addr: SocketAddr) -> Option<Participant> {
        let index = self
            .participants
            .iter()
            .position(|p| p.id == ParticipantId::Remote(addr))?;
        Some(self.participants.remove(index))
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.id == ParticipantId::Remote(addr))
    }

    pub fn contains_nickname(&self, nickname: &str) -> bool {
        self.participants.iter().any(|p| p.nickname == nickname)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    /// Participants that drive a train.
    pub fn players(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.is_player())
    }

    pub fn player_count(&self) -> usize {
        self.players().count()
    }

    /// Remote participants of any role.
    pub fn human_count(&self) -> usize {
        self.participants.iter().filter(|p| !p.is_bot()).count()
    }

    pub fn remote_addrs(&self) -> Vec<SocketAddr> {
        self.participants.iter().filter_map(Participant::addr).collect()
    }

    pub fn entries(&self) -> Vec<RosterEntry> {
        self.participants
            .iter()
            .map(|p| RosterEntry {
                nickname: p.nickname.clone(),
                role: p.role,
                bot: p.is_bot(),
            })
            .collect()
    }

    /// A bot name not yet used in this roster.
    ///
    /// `preferred` wins when free. Otherwise the first free pool name is used,
    /// and once the pool is exhausted names get a `-<n>` suffix.
    pub fn unused_bot_name(&self, preferred: Option<&str>) -> String {
        if let Some(name) = preferred {
            if !self.contains_nickname(name) {
                return name.to_string();
            }
        }
        if let Some(name) = BOT_NAMES.iter().find(|n| !self.contains_nickname(n)) {
            return name.to_string();
        }

        let base = preferred.unwrap_or(BOT_NAMES[0]);
        (2..)
            .map(|n| format!("{}-{}", base, n))
            .find(|name| !self.contains_nickname(name))
            .unwrap_or_else(|| base.to_string())
    }
}
