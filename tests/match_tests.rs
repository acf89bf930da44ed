//! End-to-end match tests driven through rooms, without a socket.

use assert_approx_eq::assert_approx_eq;
use railyard_server::agent::{Command, GameView, Policy, PolicyRegistry};
use railyard_server::config::{AgentConfig, ServerConfig};
use railyard_server::game::{Game, GameRules};
use railyard_server::network::GameMessage;
use railyard_server::room::Room;
use railyard_shared::{Role, RoomPhase, ServerPacket, REFERENCE_TICK_RATE};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

fn batch_config(tick_rate: u32, seconds: u64) -> ServerConfig {
    ServerConfig {
        tick_rate,
        batch_mode: true,
        match_duration_seconds: seconds,
        // Generous so no decision is ever dropped
        policy_timeout_ms: 5_000,
        end_grace_seconds: 0.0,
        ..ServerConfig::default()
    }
}

fn room(config: ServerConfig, seed: u64) -> (Room, UnboundedReceiver<GameMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let room = Room::new(
        "match",
        Arc::new(config),
        Arc::new(PolicyRegistry::with_builtins()),
        seed,
        tx,
    );
    (room, rx)
}

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

/// TICK-RATE INDEPENDENCE
mod timing_tests {
    use super::*;

    #[tokio::test]
    async fn batch_matches_at_different_rates_agree() {
        let (slow, _rx_slow) = room(batch_config(600, 20), 11);
        let (fast, _rx_fast) = room(batch_config(1200, 20), 11);

        let slow_rankings = slow.run().await;
        let fast_rankings = fast.run().await;

        assert_eq!(slow_rankings.len(), 2);
        assert_eq!(slow_rankings, fast_rankings);
        assert_approx_eq!(slow.elapsed_game_seconds().await, 20.0);
        assert_approx_eq!(fast.elapsed_game_seconds().await, 20.0);
    }

    #[tokio::test]
    async fn stepped_simulation_ignores_configured_rate() {
        let (a, _rx_a) = room(batch_config(60, 15), 3);
        let (b, _rx_b) = room(batch_config(6000, 15), 3);
        a.start_match().await;
        b.start_match().await;

        let mut ticks = 0;
        loop {
            let more_a = a.step().await;
            let more_b = b.step().await;
            assert_eq!(more_a, more_b);
            ticks += 1;
            if !more_a {
                break;
            }
        }

        assert_eq!(ticks, 15 * REFERENCE_TICK_RATE as u64);
        let snapshot_a = a.inspect(Game::snapshot).await.unwrap();
        let snapshot_b = b.inspect(Game::snapshot).await.unwrap();
        assert_eq!(snapshot_a, snapshot_b);
    }

    #[tokio::test]
    async fn paced_and_batch_runs_agree() {
        let paced_config = ServerConfig {
            tick_rate: 600,
            wait_before_bots_seconds: 0,
            match_duration_seconds: 2,
            policy_timeout_ms: 5_000,
            end_grace_seconds: 0.0,
            ..ServerConfig::default()
        };
        let (paced, _rx_paced) = room(paced_config, 5);
        let (batch, _rx_batch) = room(batch_config(600, 2), 5);

        let paced_rankings = paced.run().await;
        let batch_rankings = batch.run().await;
        assert_eq!(paced_rankings, batch_rankings);
    }

    #[test]
    fn respawn_cooldown_counts_reference_ticks() {
        let mut game = Game::new(GameRules::default(), 1, 9);
        game.spawn("ada").unwrap();

        // Drive the train into the nearest wall
        for _ in 0..2_000 {
            game.step();
            if !game.train("ada").unwrap().is_alive() {
                break;
            }
        }
        assert!(!game.train("ada").unwrap().is_alive());
        assert_approx_eq!(game.respawn_cooldown("ada"), 5.0);

        for _ in 0..150 {
            game.step();
        }
        assert_approx_eq!(game.respawn_cooldown("ada"), 2.5);
        assert!(game.spawn("ada").is_err());

        for _ in 0..150 {
            game.step();
        }
        assert_approx_eq!(game.respawn_cooldown("ada"), 0.0);
        assert!(game.spawn("ada").is_ok());
    }
}

/// ROOM LIFECYCLE
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn lone_player_is_backfilled_with_one_bot() {
        let config = ServerConfig {
            wait_before_bots_seconds: 0,
            ..ServerConfig::default()
        };
        let (room, _rx) = room(config, 1);
        room.join(addr(6000), "ada", Role::Player).await.unwrap();
        room.start_match().await;

        assert_eq!(room.phase().await, RoomPhase::Running);
        assert_eq!(room.player_count().await, 2);
        assert_eq!(room.inspect(Game::live_train_count).await, Some(2));
        let trains: Vec<String> = room
            .inspect(|game| game.trains().map(|t| t.nickname().to_string()).collect::<Vec<_>>())
            .await
            .unwrap();
        assert!(trains.contains(&"ada".to_string()));
        assert!(trains.iter().any(|name| name.starts_with("Bot ")));
    }

    #[tokio::test]
    async fn batch_room_seats_every_agent() {
        let config = ServerConfig {
            agents: vec![
                AgentConfig::new("cruiser"),
                AgentConfig::new("collector"),
                AgentConfig {
                    nickname: Some("Bot Zed".to_string()),
                    policy: "cruiser".to_string(),
                },
            ],
            ..batch_config(600, 1)
        };
        let (room, _rx) = room(config, 2);
        room.start_match().await;

        assert_eq!(room.player_count().await, 3);
        assert_eq!(room.human_count().await, 0);
        let zed = room.inspect(|game| game.train("Bot Zed").is_some()).await;
        assert_eq!(zed, Some(true));
    }

    #[tokio::test]
    async fn match_over_reports_rankings_and_duration() {
        let config = ServerConfig {
            match_duration_seconds: 1,
            ..ServerConfig::default()
        };
        let (room, mut rx) = room(config, 4);
        room.join(addr(6000), "ada", Role::Player).await.unwrap();
        room.start_match().await;
        while room.step().await {}
        room.end_match().await;

        let mut match_over = None;
        while let Ok(message) = rx.try_recv() {
            if let GameMessage::BroadcastPacket {
                packet: packet @ ServerPacket::MatchOver { .. },
                ..
            } = message
            {
                match_over = Some(packet);
            }
        }
        match match_over {
            Some(ServerPacket::MatchOver { rankings, duration }) => {
                assert_eq!(duration, 1);
                assert_eq!(rankings.len(), 2);
                assert!(rankings.windows(2).all(|w| w[0].best_score >= w[1].best_score));
            }
            other => panic!("expected match_over, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn snapshot_after_start_is_complete() {
        let config = ServerConfig {
            players_per_room: 1,
            ..ServerConfig::default()
        };
        let (room, _rx) = room(config, 8);
        room.join(addr(6000), "ada", Role::Player).await.unwrap();
        room.start_match().await;

        let snapshot = room.inspect(Game::snapshot).await.unwrap();
        assert!(snapshot.size.is_some());
        assert!(snapshot.trains.contains_key("ada"));
    }
}

/// PLAYER COMMANDS
mod command_tests {
    use super::*;

    struct Idle;

    impl Policy for Idle {
        fn decide(&mut self, _view: &GameView, _me: &str) -> Command {
            Command::Keep
        }
    }

    #[tokio::test]
    async fn respawn_during_cooldown_reports_remaining() {
        let (room, mut rx) = room(ServerConfig::default(), 21);
        room.join(addr(6000), "ada", Role::Player).await.unwrap();
        room.start_match().await;

        // Nobody steers ada, so she runs into something soon
        let mut ticks = 0;
        while room
            .inspect(|game| game.train("ada").map(|t| t.is_alive()))
            .await
            .flatten()
            .unwrap_or(false)
        {
            room.step().await;
            ticks += 1;
            assert!(ticks < 2_000, "train never died");
        }

        let death = std::iter::from_fn(|| rx.try_recv().ok()).find_map(|message| match message {
            GameMessage::SendPacket {
                packet: ServerPacket::Death { remaining, reason },
                ..
            } => Some((remaining, reason)),
            _ => None,
        });
        let (remaining, reason) = death.expect("no death packet");
        assert_approx_eq!(remaining, 5.0);
        assert!(reason.is_some());

        room.step().await;
        match room.respawn(addr(6000)).await {
            Some(ServerPacket::Death { remaining, reason }) => {
                assert_approx_eq!(remaining, 5.0 - 1.0 / 60.0, 1e-9);
                assert_eq!(reason, None);
            }
            other => panic!("unexpected reply {:?}", other),
        }

        // Ada has no wagons left to drop
        assert!(matches!(
            room.drop_segment(addr(6000)).await,
            Some(ServerPacket::DropSegmentFailed { .. })
        ));
    }

    #[test]
    fn registry_accepts_external_policies() {
        let mut registry = PolicyRegistry::with_builtins();
        registry.register("idle", || Box::new(Idle) as Box<dyn Policy>);
        assert!(registry.contains("idle"));

        let mut policy = registry.create("idle").unwrap();
        let view = Game::new(GameRules::default(), 1, 0).view();
        assert_eq!(policy.decide(&view, "nobody"), Command::Keep);
        assert!(registry.create("missing").is_err());
    }
}
