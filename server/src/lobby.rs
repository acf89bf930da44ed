//! Places joining clients into rooms and owns the room tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use railyard_shared::{Ranking, Role, RoomPhase};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::agent::PolicyRegistry;
use crate::config::ServerConfig;
use crate::error::{ConfigError, JoinError};
use crate::network::{GameMessage, ServerMessage};
use crate::room::Room;
use crate::roster::validate_nickname;

/// How long teardown waits for a room task to finish.
const ROOM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

struct RoomHandle {
    room: Arc<Room>,
    task: JoinHandle<Vec<Ranking>>,
}

pub struct Lobby {
    config: Arc<ServerConfig>,
    registry: Arc<PolicyRegistry>,
    rooms: Vec<RoomHandle>,
    next_room: u64,
    outbound: mpsc::UnboundedSender<GameMessage>,
    events: mpsc::UnboundedSender<ServerMessage>,
}

impl Lobby {
    /// Fails if an agent in the pool names a policy nobody registered.
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<PolicyRegistry>,
        outbound: mpsc::UnboundedSender<GameMessage>,
        events: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<Self, ConfigError> {
        if let Some(agent) = config
            .agents
            .iter()
            .find(|agent| !registry.contains(&agent.policy))
        {
            return Err(ConfigError::UnknownPolicy(agent.policy.clone()));
        }

        Ok(Self {
            config,
            registry,
            rooms: Vec::new(),
            next_room: 1,
            outbound,
            events,
        })
    }

    pub fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms
            .iter()
            .find(|handle| handle.room.id() == room_id)
            .map(|handle| Arc::clone(&handle.room))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn create_room(&mut self) -> Arc<Room> {
        let number = self.next_room;
        self.next_room += 1;

        let room = Arc::new(Room::new(
            format!("room-{}", number),
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            self.config.seed.wrapping_add(number),
            self.outbound.clone(),
        ));

        let task_room = Arc::clone(&room);
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let rankings = task_room.run().await;
            let room_id = task_room.id().to_string();
            if events.send(ServerMessage::RoomClosed { room_id }).is_err() {
                debug!("Server loop gone before room {} closed", task_room.id());
            }
            rankings
        });

        self.rooms.push(RoomHandle {
            room: Arc::clone(&room),
            task,
        });
        room
    }

    /// First room that can take this participant.
    async fn find_room(&self, role: Role) -> Option<Arc<Room>> {
        for handle in &self.rooms {
            let room = &handle.room;
            let fits = match role {
                Role::Player => room.has_player_slot().await,
                Role::Observer => {
                    room.is_running()
                        && matches!(room.phase().await, RoomPhase::Waiting | RoomPhase::Running)
                }
            };
            if fits {
                return Some(Arc::clone(room));
            }
        }
        None
    }

    /// Validates the nickname and seats the client.
    ///
    /// Players fill the first waiting room with a free seat; observers watch
    /// the first open room. A new room is created when none fits.
    pub async fn join(
        &mut self,
        addr: SocketAddr,
        nickname: &str,
        role: Role,
    ) -> Result<Arc<Room>, JoinError> {
        validate_nickname(nickname)?;
        for handle in &self.rooms {
            if handle.room.is_running() && handle.room.has_nickname(nickname).await {
                return Err(JoinError::NicknameTaken(nickname.to_string()));
            }
        }

        let room = match self.find_room(role).await {
            Some(room) => room,
            None => self.create_room(),
        };
        match room.join(addr, nickname, role).await {
            Ok(()) => Ok(room),
            Err(JoinError::RoomFull | JoinError::RoomClosed) => {
                // The room moved on between the lookup and the join.
                let room = self.create_room();
                room.join(addr, nickname, role).await?;
                Ok(room)
            }
            Err(e) => Err(e),
        }
    }

    /// Forgets a closed room and collects its task.
    pub async fn remove(&mut self, room_id: &str) -> Option<Vec<Ranking>> {
        let index = self
            .rooms
            .iter()
            .position(|handle| handle.room.id() == room_id)?;
        let mut handle = self.rooms.swap_remove(index);
        handle.room.stop();

        match tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, &mut handle.task).await {
            Ok(Ok(rankings)) => {
                info!("Room {} removed", room_id);
                Some(rankings)
            }
            Ok(Err(e)) => {
                warn!("Room {} task failed: {}", room_id, e);
                None
            }
            Err(_) => {
                warn!("Room {} did not shut down in time, aborting", room_id);
                handle.task.abort();
                None
            }
        }
    }

    /// Stops every room and waits briefly for each to finish.
    pub async fn shutdown(&mut self) {
        for handle in &self.rooms {
            handle.room.stop();
        }
        for mut handle in self.rooms.drain(..) {
            if tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, &mut handle.task)
                .await
                .is_err()
            {
                warn!("Room {} did not shut down in time, aborting", handle.room.id());
                handle.task.abort();
            }
        }
    }
}
