//! # Railyard Server Library
//!
//! This library provides the authoritative server for a multiplayer grid train
//! game. Trains move cell by cell on a square grid, pick up passengers to grow
//! their wagon trail, and deliver wagons into a delivery zone for points.
//! Matches run in rooms that fill with human players and are backfilled with
//! bots after a wait.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server runs the only copy of the game rules. Clients send intents
//! (turn, drop a wagon, respawn) and receive state diffs.
//!
//! ### Tick-Rate Independence
//! Every cooldown and the match length are counted in ticks of a fixed
//! reference rate of 60 Hz. Running the loop faster (batch evaluation) only
//! changes how quickly ticks are produced, never the game-time length of
//! anything.
//!
//! ### Bandwidth
//! Each tick sends only the field groups that changed since the last tick.
//! Joiners get a full snapshot once.
//!
//! ## Architecture Design
//!
//! ### Rooms as Tasks
//! Every room runs its lifecycle on its own task:
//! `waiting -> starting -> running -> ended -> closed`. Game state is mutated
//! only under the room's lock, one tick at a time.
//!
//! ### Bounded Bot Decisions
//! Bot policies run on blocking threads with a wall-clock deadline. A late
//! decision is dropped and the train keeps its heading.
//!
//! ### UDP-Based Communication
//! A single UDP socket carries newline-delimited JSON records. The server
//! pings clients and drops those that stay silent too long.
//!
//! ## Module Organization
//!
//! - `train`, `passenger`, `delivery_zone`: the entities and their rules
//! - `game`: one tick of collision, pickup and delivery resolution
//! - `cooldown`, `dirty`: reference-tick timers and change tracking
//! - `agent`: the bot policy seam and built-in policies
//! - `roster`, `room`, `lobby`: participants, match lifecycle and placement
//! - `client_manager`, `network`: the UDP transport
//! - `config`, `error`: configuration and typed errors
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use railyard_server::agent::PolicyRegistry;
//! use railyard_server::config::ServerConfig;
//! use railyard_server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         host: "127.0.0.1".to_string(),
//!         port: 5555,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Runs until a shutdown message arrives
//!     let mut server = Server::new(config, PolicyRegistry::with_builtins()).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod client_manager;
pub mod config;
pub mod cooldown;
pub mod delivery_zone;
pub mod dirty;
pub mod error;
pub mod game;
pub mod lobby;
pub mod network;
pub mod passenger;
pub mod room;
pub mod roster;
pub mod train;
