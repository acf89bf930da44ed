//! Server network layer handling UDP communications and room routing

use crate::agent::PolicyRegistry;
use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::lobby::Lobby;
use crate::room::Room;
use log::{debug, error, info, warn};
use railyard_shared::{
    decode_datagram, encode, ClientPacket, Role, ServerPacket, MAX_DATAGRAM_SIZE,
    PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from network tasks and rooms to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: ClientPacket,
        addr: SocketAddr,
    },
    ClientTimeout {
        addr: SocketAddr,
        room_id: String,
    },
    RoomClosed {
        room_id: String,
    },
    Shutdown,
}

/// Messages sent from rooms and the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: ServerPacket,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: ServerPacket,
        addrs: Vec<SocketAddr>,
    },
}

/// Main server coordinating the socket, clients and rooms
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    lobby: Lobby,
    client_timeout: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        config: ServerConfig,
        registry: PolicyRegistry,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;
        let addr = config.bind_address();
        let socket = Arc::new(UdpSocket::bind(&addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let client_timeout = Duration::from_secs_f64(config.client_timeout_seconds);
        let lobby = Lobby::new(
            Arc::new(config),
            Arc::new(registry),
            game_tx.clone(),
            server_tx.clone(),
        )?;

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new())),
            lobby,
            client_timeout,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// A sender that can stop [`Server::run`] with [`ServerMessage::Shutdown`].
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        for record in decode_datagram::<ClientPacket>(&buffer[..len]) {
                            match record {
                                Ok(packet) => {
                                    if let Err(e) = server_tx
                                        .send(ServerMessage::PacketReceived { packet, addr })
                                    {
                                        error!("Failed to send packet to main loop: {}", e);
                                        return;
                                    }
                                }
                                Err(e) => warn!("Dropping record from {}: {}", addr, e),
                            }
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, addrs } => {
                        for addr in addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", addr, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that pings clients and reports the silent ones
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let game_tx = self.game_tx.clone();
        let timeout = self.client_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(timeout / 2);

            loop {
                interval.tick().await;

                let (timed_out, addrs) = {
                    let mut clients_guard = clients.write().await;
                    let timed_out = clients_guard.check_timeouts(timeout);
                    (timed_out, clients_guard.get_client_addrs())
                };

                if !addrs.is_empty()
                    && game_tx
                        .send(GameMessage::BroadcastPacket {
                            packet: ServerPacket::Ping,
                            addrs,
                        })
                        .is_err()
                {
                    break;
                }

                for client in timed_out {
                    info!("Client {} at {} timed out", client.nickname, client.addr);
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout {
                        addr: client.addr,
                        room_id: client.room_id,
                    }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &ServerPacket,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let data = encode(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: ServerPacket, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    async fn room_for(&self, addr: SocketAddr) -> Option<Arc<Room>> {
        let room_id = {
            let clients = self.clients.read().await;
            clients.find_client_by_addr(addr)?.room_id.clone()
        };
        self.lobby.room(&room_id)
    }

    /// Removes a client and tells its room.
    async fn disconnect_client(&mut self, addr: SocketAddr) {
        let client = {
            let mut clients = self.clients.write().await;
            clients.remove_client(addr)
        };
        if let Some(client) = client {
            if let Some(room) = self.lobby.room(&client.room_id) {
                room.leave(addr).await;
            }
        }
    }

    async fn handle_join(
        &mut self,
        addr: SocketAddr,
        nickname: String,
        role: Role,
        client_version: u32,
    ) {
        info!(
            "Client {} joining from {} (version: {})",
            nickname, addr, client_version
        );
        if client_version != PROTOCOL_VERSION {
            warn!(
                "Client {} speaks protocol {}, server expects {}",
                addr, client_version, PROTOCOL_VERSION
            );
        }

        // A repeated join from the same address replaces the old seat
        let existing = {
            let clients = self.clients.read().await;
            clients.find_client_by_addr(addr).is_some()
        };
        if existing {
            info!("Removing existing client at {}", addr);
            self.disconnect_client(addr).await;
        }

        match self.lobby.join(addr, &nickname, role).await {
            Ok(room) => {
                let mut clients = self.clients.write().await;
                clients.add_client(addr, &nickname, room.id(), role);
            }
            Err(e) => {
                info!("Rejected join of {} from {}: {}", nickname, addr, e);
                self.send_packet(
                    ServerPacket::JoinFailed {
                        reason: e.to_string(),
                    },
                    addr,
                );
            }
        }
    }

    /// Routes one incoming packet to its room
    async fn handle_packet(&mut self, packet: ClientPacket, addr: SocketAddr) {
        let known = {
            let mut clients = self.clients.write().await;
            clients.touch(addr)
        };

        match packet {
            ClientPacket::Join {
                nickname,
                role,
                client_version,
            } => {
                self.handle_join(addr, nickname, role, client_version).await;
            }

            ClientPacket::Ping => self.send_packet(ServerPacket::Pong, addr),

            _ if !known => {
                debug!("Packet from unknown client at {}", addr);
                self.send_packet(
                    ServerPacket::Disconnect {
                        reason: "Unknown client".to_string(),
                    },
                    addr,
                );
            }

            ClientPacket::Pong => {}

            ClientPacket::Direction { heading } => {
                if let Some(room) = self.room_for(addr).await {
                    room.set_direction(addr, heading).await;
                }
            }

            ClientPacket::DropSegment => {
                if let Some(room) = self.room_for(addr).await {
                    if let Some(reply) = room.drop_segment(addr).await {
                        self.send_packet(reply, addr);
                    }
                }
            }

            ClientPacket::RespawnRequest => {
                if let Some(room) = self.room_for(addr).await {
                    if let Some(reply) = room.respawn(addr).await {
                        self.send_packet(reply, addr);
                    }
                }
            }

            ClientPacket::Leave => self.disconnect_client(addr).await,
        }
    }

    async fn handle_room_closed(&mut self, room_id: &str) {
        let clients = {
            let mut clients = self.clients.write().await;
            clients.remove_room(room_id)
        };
        for client in clients {
            self.send_packet(
                ServerPacket::Disconnect {
                    reason: "Room closed".to_string(),
                },
                client.addr,
            );
        }
        self.lobby.remove(room_id).await;
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        info!("Server started successfully");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr).await;
                }
                ServerMessage::ClientTimeout { addr, room_id } => {
                    if let Some(room) = self.lobby.room(&room_id) {
                        room.leave(addr).await;
                    }
                }
                ServerMessage::RoomClosed { room_id } => {
                    self.handle_room_closed(&room_id).await;
                }
                ServerMessage::Shutdown => break,
            }
        }

        info!("Server shutting down");
        self.lobby.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railyard_shared::Direction;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_server_message_creation() {
        let packet = ClientPacket::Direction {
            heading: Direction::Left,
        };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        let msg = ServerMessage::PacketReceived {
            packet: packet.clone(),
            addr,
        };

        match msg {
            ServerMessage::PacketReceived { packet: p, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(p, packet);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<GameMessage>();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 9090);

        assert!(tx
            .send(GameMessage::BroadcastPacket {
                packet: ServerPacket::Ping,
                addrs: vec![addr],
            })
            .is_ok());

        match rx.try_recv() {
            Ok(GameMessage::BroadcastPacket { packet, addrs }) => {
                assert_eq!(packet, ServerPacket::Ping);
                assert_eq!(addrs, vec![addr]);
            }
            other => panic!("Unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let server = Server::new(test_config(), PolicyRegistry::with_builtins())
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_server_rejects_invalid_config() {
        let config = ServerConfig {
            tick_rate: 0,
            ..test_config()
        };
        assert!(Server::new(config, PolicyRegistry::with_builtins())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_client_is_disconnected() {
        let mut server = Server::new(test_config(), PolicyRegistry::with_builtins())
            .await
            .unwrap();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 7000);

        server.handle_packet(ClientPacket::DropSegment, addr).await;
        server.handle_packet(ClientPacket::Ping, addr).await;

        let mut replies = Vec::new();
        while let Ok(GameMessage::SendPacket { packet, .. }) = server.game_rx.try_recv() {
            replies.push(packet);
        }
        assert_eq!(
            replies,
            vec![
                ServerPacket::Disconnect {
                    reason: "Unknown client".to_string()
                },
                ServerPacket::Pong,
            ]
        );
    }

    #[tokio::test]
    async fn test_join_registers_client() {
        let mut server = Server::new(test_config(), PolicyRegistry::with_builtins())
            .await
            .unwrap();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 7001);

        server
            .handle_packet(
                ClientPacket::Join {
                    nickname: "ada".to_string(),
                    role: Role::Player,
                    client_version: PROTOCOL_VERSION,
                },
                addr,
            )
            .await;

        assert!(server.room_for(addr).await.is_some());
        match server.game_rx.try_recv() {
            Ok(GameMessage::SendPacket {
                packet: ServerPacket::JoinAck { room_id, .. },
                ..
            }) => assert_eq!(room_id, "room-1"),
            other => panic!("Unexpected message {:?}", other),
        }

        server.handle_packet(ClientPacket::Leave, addr).await;
        assert!(server.room_for(addr).await.is_none());
        server.lobby.shutdown().await;
    }
}
