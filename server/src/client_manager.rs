//! Remote client tracking for the UDP server
//!
//! This module keeps the server-wide view of who is talking to us:
//! - Which address belongs to which nickname and room
//! - When each client was last heard from, for timeout detection
//! - Which addresses to drop when a room closes
//!
//! Rooms own the game-facing roster. The client manager only answers the
//! transport question "where does this datagram belong?".

use log::info;
use railyard_shared::Role;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A remote participant known to the server
///
/// Each client records:
/// - Its address and the room it was placed in
/// - The nickname and role it joined with
/// - The last time any datagram arrived from it
#[derive(Debug, Clone)]
pub struct Client {
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Nickname accepted at join time
    pub nickname: String,
    /// Room the client was placed in
    pub room_id: String,
    pub role: Role,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    /// Creates a client that was just heard from
    pub fn new(addr: SocketAddr, nickname: &str, room_id: &str, role: Role) -> Self {
        Self {
            addr,
            nickname: nickname.to_string(),
            room_id: room_id.to_string(),
            role,
            last_seen: Instant::now(),
        }
    }

    /// Checks if the client has exceeded the connection timeout
    ///
    /// Returns true if no packets have been received from this client
    /// within the specified timeout duration, indicating a likely disconnect.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all joined clients, keyed by address
///
/// A client is added once a room accepts its join and removed when it
/// leaves, times out, or its room closes.
#[derive(Debug, Default)]
pub struct ClientManager {
    clients: HashMap<SocketAddr, Client>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client after a successful join
    ///
    /// Replaces any previous entry for the same address.
    pub fn add_client(&mut self, addr: SocketAddr, nickname: &str, room_id: &str, role: Role) {
        info!(
            "Client {} ({}) connected from {} into room {}",
            nickname,
            match role {
                Role::Player => "player",
                Role::Observer => "observer",
            },
            addr,
            room_id
        );
        self.clients
            .insert(addr, Client::new(addr, nickname, room_id, role));
    }

    /// Removes a client from the server
    ///
    /// Returns the removed client so the caller can tell its room.
    pub fn remove_client(&mut self, addr: SocketAddr) -> Option<Client> {
        let client = self.clients.remove(&addr)?;
        info!("Client {} disconnected from {}", client.nickname, addr);
        Some(client)
    }

    /// Finds a client by their network address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<&Client> {
        self.clients.get(&addr)
    }

    /// Marks the client as alive. Returns false for unknown addresses.
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        match self.clients.get_mut(&addr) {
            Some(client) => {
                client.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Checks for and removes timed-out clients
    ///
    /// Returns the removed clients so their rooms can be told. This frees
    /// a seat when a client vanishes without sending `leave`.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<Client> {
        let timed_out: Vec<SocketAddr> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.addr)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|addr| self.remove_client(addr))
            .collect()
    }

    /// Forgets every client of a closed room
    pub fn remove_room(&mut self, room_id: &str) -> Vec<Client> {
        let addrs: Vec<SocketAddr> = self
            .clients
            .values()
            .filter(|client| client.room_id == room_id)
            .map(|client| client.addr)
            .collect();

        addrs
            .into_iter()
            .filter_map(|addr| self.clients.remove(&addr))
            .collect()
    }

    /// Gets every known client address
    ///
    /// Used by the timeout checker to ping clients between game packets.
    pub fn get_client_addrs(&self) -> Vec<SocketAddr> {
        self.clients.keys().copied().collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_client_creation() {
        let client = Client::new(test_addr(), "ada", "room-1", Role::Player);

        assert_eq!(client.addr, test_addr());
        assert_eq!(client.nickname, "ada");
        assert_eq!(client.room_id, "room-1");
        assert!(!client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_client_timeout() {
        let mut client = Client::new(test_addr(), "ada", "room-1", Role::Player);
        client.last_seen = Instant::now() - Duration::from_secs(3);

        assert!(client.is_timed_out(Duration::from_secs(2)));
    }

    #[test]
    fn test_add_and_remove_client() {
        let mut manager = ClientManager::new();
        assert!(manager.is_empty());

        manager.add_client(test_addr(), "ada", "room-1", Role::Player);
        assert_eq!(manager.len(), 1);
        assert_eq!(
            manager.find_client_by_addr(test_addr()).unwrap().nickname,
            "ada"
        );

        let removed = manager.remove_client(test_addr()).unwrap();
        assert_eq!(removed.nickname, "ada");
        assert!(manager.remove_client(test_addr()).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_rejoin_replaces_entry() {
        let mut manager = ClientManager::new();
        manager.add_client(test_addr(), "ada", "room-1", Role::Player);
        manager.add_client(test_addr(), "ada", "room-2", Role::Observer);

        assert_eq!(manager.len(), 1);
        let client = manager.find_client_by_addr(test_addr()).unwrap();
        assert_eq!(client.room_id, "room-2");
        assert_eq!(client.role, Role::Observer);
    }

    #[test]
    fn test_touch_unknown_client() {
        let mut manager = ClientManager::new();
        assert!(!manager.touch(test_addr()));
        manager.add_client(test_addr(), "ada", "room-1", Role::Player);
        assert!(manager.touch(test_addr()));
    }

    #[test]
    fn test_check_timeouts() {
        let mut manager = ClientManager::new();
        manager.add_client(test_addr(), "ada", "room-1", Role::Player);
        manager.add_client(test_addr2(), "bob", "room-1", Role::Player);

        manager.clients.get_mut(&test_addr()).unwrap().last_seen =
            Instant::now() - Duration::from_secs(5);

        let removed = manager.check_timeouts(Duration::from_secs(2));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].nickname, "ada");
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_room() {
        let mut manager = ClientManager::new();
        manager.add_client(test_addr(), "ada", "room-1", Role::Player);
        manager.add_client(test_addr2(), "bob", "room-2", Role::Player);

        let removed = manager.remove_room("room-1");
        assert_eq!(removed.len(), 1);
        assert_eq!(manager.get_client_addrs(), vec![test_addr2()]);
    }
}
