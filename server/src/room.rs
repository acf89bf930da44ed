//! One match from lobby to teardown.
//!
//! A [`Room`] owns a roster and, once started, a [`Game`]. Everything that
//! touches the game happens under the room's state lock: commands from the
//! network, the per-tick resolution pass and diff extraction. Bot policies
//! run outside the lock on an immutable view, and only their commands are
//! applied back under it.
//!
//! Phases only move forward:
//! `Waiting -> Starting -> Running -> Ended -> Closed`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use railyard_shared::{Direction, Ranking, Role, RoomPhase, ServerPacket, StateUpdate};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::agent::{BotController, Decision, GameView, PolicyRegistry};
use crate::config::{AgentConfig, ServerConfig};
use crate::cooldown::MatchClock;
use crate::error::{JoinError, SpawnError};
use crate::game::Game;
use crate::network::GameMessage;
use crate::roster::Roster;

/// How often a waiting room re-checks its start conditions.
const WAITING_POLL: Duration = Duration::from_millis(100);

struct RoomState {
    phase: RoomPhase,
    roster: Roster,
    game: Option<Game>,
    bots: Vec<Arc<BotController>>,
    clock: MatchClock,
    last_remaining: Option<u64>,
    rng: StdRng,
}

pub struct Room {
    id: String,
    config: Arc<ServerConfig>,
    registry: Arc<PolicyRegistry>,
    state: Mutex<RoomState>,
    running: AtomicBool,
    outbound: mpsc::UnboundedSender<GameMessage>,
    created_at: Instant,
}

impl Room {
    pub fn new(
        id: impl Into<String>,
        config: Arc<ServerConfig>,
        registry: Arc<PolicyRegistry>,
        seed: u64,
        outbound: mpsc::UnboundedSender<GameMessage>,
    ) -> Self {
        let id = id.into();
        info!("Room {} created (seed {})", id, seed);
        Self {
            state: Mutex::new(RoomState {
                phase: RoomPhase::Waiting,
                roster: Roster::new(),
                game: None,
                bots: Vec::new(),
                clock: MatchClock::new(config.match_duration_seconds),
                last_remaining: None,
                rng: StdRng::seed_from_u64(seed),
            }),
            id,
            config,
            registry,
            running: AtomicBool::new(true),
            outbound,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn phase(&self) -> RoomPhase {
        self.state.lock().await.phase
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Asks the lifecycle loop to wind down at its next check.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub async fn player_count(&self) -> usize {
        self.state.lock().await.roster.player_count()
    }

    pub async fn human_count(&self) -> usize {
        self.state.lock().await.roster.human_count()
    }

    pub async fn has_nickname(&self, nickname: &str) -> bool {
        self.state.lock().await.roster.contains_nickname(nickname)
    }

    /// True while a new player could still take a seat.
    pub async fn has_player_slot(&self) -> bool {
        let state = self.state.lock().await;
        state.phase == RoomPhase::Waiting
            && state.roster.player_count() < self.config.players_per_room
            && self.is_running()
    }

    /// Runs `f` against the match, if one has started.
    pub async fn inspect<R>(&self, f: impl FnOnce(&Game) -> R) -> Option<R> {
        self.state.lock().await.game.as_ref().map(f)
    }

    /// Game-seconds played so far.
    pub async fn elapsed_game_seconds(&self) -> f64 {
        self.state.lock().await.clock.elapsed_seconds()
    }

    fn send(&self, packet: ServerPacket, addr: SocketAddr) {
        if let Err(e) = self.outbound.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast(&self, packet: ServerPacket, addrs: Vec<SocketAddr>) {
        if addrs.is_empty() {
            return;
        }
        if let Err(e) = self
            .outbound
            .send(GameMessage::BroadcastPacket { packet, addrs })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    fn status_packet(&self, state: &RoomState) -> ServerPacket {
        let wait = Duration::from_secs(self.config.wait_before_bots_seconds);
        ServerPacket::RoomStatus {
            room_id: self.id.clone(),
            phase: state.phase,
            roster: state.roster.entries(),
            capacity: self.config.players_per_room,
            wait_seconds: wait.saturating_sub(self.created_at.elapsed()).as_secs(),
        }
    }

    async fn broadcast_status(&self) {
        let state = self.state.lock().await;
        self.broadcast(self.status_packet(&state), state.roster.remote_addrs());
    }

    /// Adds a remote participant and acknowledges the join.
    ///
    /// Players are only seated while the room is waiting. Observers may join
    /// a running match and are brought up to date with a full snapshot.
    pub async fn join(&self, addr: SocketAddr, nickname: &str, role: Role) -> Result<(), JoinError> {
        let mut state = self.state.lock().await;
        if !self.is_running() || state.phase >= RoomPhase::Ended {
            return Err(JoinError::RoomClosed);
        }
        if state.roster.contains_nickname(nickname) {
            return Err(JoinError::NicknameTaken(nickname.to_string()));
        }
        if role == Role::Player {
            if state.phase != RoomPhase::Waiting {
                return Err(JoinError::RoomClosed);
            }
            if state.roster.player_count() >= self.config.players_per_room {
                return Err(JoinError::RoomFull);
            }
        }

        state.roster.add_remote(addr, nickname, role);
        info!(
            "{} joined room {} as {:?} from {}",
            nickname, self.id, role, addr
        );

        self.send(
            ServerPacket::JoinAck {
                expected_version: railyard_shared::PROTOCOL_VERSION,
                room_id: self.id.clone(),
            },
            addr,
        );

        if state.phase == RoomPhase::Running {
            self.send(
                ServerPacket::GameStarted {
                    duration_seconds: self.config.match_duration_seconds,
                },
                addr,
            );
            let remaining = state.clock.remaining_seconds().round() as u64;
            if let Some(game) = state.game.as_ref() {
                let mut data = game.snapshot();
                data.remaining_time = Some(remaining);
                self.send(ServerPacket::FullState { data }, addr);
            }
        } else {
            self.broadcast(self.status_packet(&state), state.roster.remote_addrs());
        }
        Ok(())
    }

    /// Removes a remote participant.
    ///
    /// A player leaving a running match while other humans remain hands
    /// their train to a bot. Returns true when no remote participant is left
    /// and the room has been told to close.
    pub async fn leave(&self, addr: SocketAddr) -> bool {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(participant) = state.roster.remove_remote(addr) else {
            return false;
        };
        info!("{} left room {}", participant.nickname, self.id);

        let humans_left = state.roster.human_count() > 0 || self.config.batch_mode;
        if participant.is_player() && state.game.is_some() {
            let handed_over = state.phase == RoomPhase::Running
                && humans_left
                && self.hand_to_bot(state, &participant.nickname);
            if !handed_over {
                if let Some(game) = state.game.as_mut() {
                    game.retire(&participant.nickname);
                }
            }
        }
        if state.phase == RoomPhase::Waiting {
            self.broadcast(self.status_packet(state), state.roster.remote_addrs());
        }

        if !humans_left {
            info!("Room {} has no humans left, closing", self.id);
            self.stop();
            return true;
        }
        false
    }

    /// Moves a departed player's train to a freshly drawn bot.
    fn hand_to_bot(&self, state: &mut RoomState, nickname: &str) -> bool {
        let Some(agent) = self.draw_agents(&mut state.rng, 1).pop() else {
            return false;
        };
        let bot_name = state.roster.unused_bot_name(agent.nickname.as_deref());
        let policy = match self.registry.create(&agent.policy) {
            Ok(policy) => policy,
            Err(e) => {
                error!("Cannot hand {} to a bot in room {}: {}", nickname, self.id, e);
                return false;
            }
        };
        let Some(game) = state.game.as_mut() else {
            return false;
        };
        if !game.rename_train(nickname, &bot_name) {
            return false;
        }

        state.roster.add_bot(&bot_name);
        state.bots.push(Arc::new(BotController::new(
            bot_name.clone(),
            agent.policy.clone(),
            policy,
            Duration::from_millis(self.config.policy_timeout_ms),
        )));
        info!(
            "Train of {} in room {} now driven by {} ({})",
            nickname, self.id, bot_name, agent.policy
        );

        let data = StateUpdate {
            rename_train: Some([nickname.to_string(), bot_name]),
            ..StateUpdate::default()
        };
        self.broadcast(ServerPacket::State { data }, state.roster.remote_addrs());
        true
    }

    /// Applies a heading change immediately.
    pub async fn set_direction(&self, addr: SocketAddr, heading: Direction) {
        let mut state = self.state.lock().await;
        let Some(nickname) = state
            .roster
            .find_by_addr(addr)
            .filter(|p| p.is_player())
            .map(|p| p.nickname.clone())
        else {
            return;
        };
        if let Some(game) = state.game.as_mut() {
            if let Err(e) = game.change_direction(&nickname, heading) {
                debug!("Ignoring direction from {}: {}", nickname, e);
            }
        }
    }

    pub async fn drop_segment(&self, addr: SocketAddr) -> Option<ServerPacket> {
        let mut state = self.state.lock().await;
        let nickname = state.roster.find_by_addr(addr)?.nickname.clone();
        let running = state.phase == RoomPhase::Running;
        let reply = match state.game.as_mut() {
            Some(game) if running => match game.drop_segment(&nickname) {
                Ok(cooldown) => ServerPacket::DropSegmentOk { cooldown },
                Err(e) => ServerPacket::DropSegmentFailed {
                    reason: e.to_string(),
                    remaining: e.remaining(),
                },
            },
            _ => ServerPacket::DropSegmentFailed {
                reason: SpawnError::NotRunning.to_string(),
                remaining: 0.0,
            },
        };
        Some(reply)
    }

    /// Handles a respawn request. A request made during the cooldown is
    /// answered with the remaining cooldown.
    pub async fn respawn(&self, addr: SocketAddr) -> Option<ServerPacket> {
        let mut state = self.state.lock().await;
        let participant = state.roster.find_by_addr(addr)?.clone();
        if !participant.is_player() {
            return Some(ServerPacket::SpawnFailed {
                reason: SpawnError::Observer.to_string(),
            });
        }

        let finished = state.clock.is_finished();
        let running = state.phase == RoomPhase::Running;
        let result = match state.game.as_mut() {
            _ if finished => Err(SpawnError::MatchOver),
            Some(game) if running => game.spawn(&participant.nickname),
            _ => Err(SpawnError::NotRunning),
        };
        Some(match result {
            Ok(_) => ServerPacket::SpawnOk,
            Err(SpawnError::CoolingDown { remaining }) => ServerPacket::Death {
                remaining,
                reason: None,
            },
            Err(e) => ServerPacket::SpawnFailed {
                reason: e.to_string(),
            },
        })
    }

    /// Picks bot agents to fill `needed` seats.
    ///
    /// The pool is shuffled and drawn without replacement, and reshuffled
    /// whenever more bots are needed than it holds.
    fn draw_agents(&self, rng: &mut StdRng, needed: usize) -> Vec<AgentConfig> {
        let mut drawn = Vec::with_capacity(needed);
        if self.config.agents.is_empty() {
            return drawn;
        }
        while drawn.len() < needed {
            let mut pool = self.config.agents.clone();
            pool.shuffle(rng);
            drawn.extend(pool);
        }
        drawn.truncate(needed);
        drawn
    }

    /// Moves the room from `Waiting` through `Starting` to `Running`.
    ///
    /// Empty seats are backfilled with bots; in batch mode every configured
    /// agent joins. Every player gets a train.
    pub async fn start_match(&self) {
        let mut state = self.state.lock().await;
        if state.phase != RoomPhase::Waiting {
            return;
        }
        state.phase = RoomPhase::Starting;

        let needed = if self.config.batch_mode {
            self.config.agents.len()
        } else {
            self.config
                .players_per_room
                .saturating_sub(state.roster.player_count())
        };
        let mut rng = state.rng.clone();
        let agents = self.draw_agents(&mut rng, needed);
        let deadline = Duration::from_millis(self.config.policy_timeout_ms);
        for agent in agents {
            let nickname = state.roster.unused_bot_name(agent.nickname.as_deref());
            match self.registry.create(&agent.policy) {
                Ok(policy) => {
                    state.roster.add_bot(&nickname);
                    state.bots.push(Arc::new(BotController::new(
                        nickname.clone(),
                        agent.policy.clone(),
                        policy,
                        deadline,
                    )));
                    info!(
                        "Added bot {} ({}) to room {}",
                        nickname, agent.policy, self.id
                    );
                }
                Err(e) => error!("Cannot add bot {} to room {}: {}", nickname, self.id, e),
            }
        }

        let players: Vec<String> = state.roster.players().map(|p| p.nickname.clone()).collect();
        let mut game = Game::new(self.config.rules(), players.len(), rng.gen());
        state.rng = rng;
        for nickname in &players {
            if let Err(e) = game.spawn(nickname) {
                warn!("Could not spawn {} in room {}: {}", nickname, self.id, e);
            }
        }

        state.clock = MatchClock::new(self.config.match_duration_seconds);
        state.last_remaining = None;
        let addrs = state.roster.remote_addrs();
        self.broadcast(
            ServerPacket::GameStarted {
                duration_seconds: self.config.match_duration_seconds,
            },
            addrs.clone(),
        );
        let mut data = game.snapshot();
        data.remaining_time = Some(self.config.match_duration_seconds);
        self.broadcast(ServerPacket::FullState { data }, addrs);

        state.game = Some(game);
        state.phase = RoomPhase::Running;
        info!(
            "Room {} started with {} players ({} bots)",
            self.id,
            players.len(),
            state.bots.len()
        );
    }

    /// Advances the match by one tick.
    ///
    /// Returns false once the match clock has run out or no match is running.
    pub async fn step(&self) -> bool {
        let (view, bots, finished) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if state.phase != RoomPhase::Running {
                return false;
            }
            let Some(game) = state.game.as_mut() else {
                return false;
            };

            game.step();
            state.clock.advance();

            for death in game.take_deaths() {
                let addr = state
                    .roster
                    .iter()
                    .find(|p| p.nickname == death.nickname)
                    .and_then(|p| p.addr());
                if let Some(addr) = addr {
                    self.send(
                        ServerPacket::Death {
                            remaining: death.remaining,
                            reason: Some(death.reason),
                        },
                        addr,
                    );
                }
            }

            for bot in &state.bots {
                let name = bot.nickname();
                let dead = game.train(name).map(|t| !t.is_alive()).unwrap_or(true);
                if dead && game.respawn_cooldown(name) <= 0.0 {
                    if let Err(e) = game.spawn(name) {
                        debug!("Bot {} could not respawn: {}", name, e);
                    }
                }
            }

            let mut data = game.diff();
            let remaining = state.clock.remaining_seconds().round() as u64;
            if state.last_remaining != Some(remaining) {
                data.remaining_time = Some(remaining);
                state.last_remaining = Some(remaining);
            }
            if !data.is_empty() {
                self.broadcast(ServerPacket::State { data }, state.roster.remote_addrs());
            }

            let view = if state.bots.is_empty() {
                None
            } else {
                Some(Arc::new(game.view()))
            };
            (view, state.bots.clone(), state.clock.is_finished())
        };

        if let Some(view) = view {
            let decisions = poll_bots(&bots, view).await;
            let mut state = self.state.lock().await;
            if let Some(game) = state.game.as_mut() {
                for (nickname, decision) in decisions {
                    let Some(command) = decision.command() else {
                        continue;
                    };
                    if let Err(e) = game.apply(&nickname, command) {
                        debug!("Bot {} command {:?} rejected: {}", nickname, command, e);
                    }
                }
            }
        }

        !finished
    }

    /// Moves a running match to `Ended` and broadcasts the final rankings.
    pub async fn end_match(&self) -> Vec<Ranking> {
        let mut state = self.state.lock().await;
        if state.phase >= RoomPhase::Ended {
            return Vec::new();
        }
        state.phase = RoomPhase::Ended;

        let rankings = state
            .game
            .as_ref()
            .map(Game::rankings)
            .unwrap_or_default();
        let duration = state.clock.elapsed_seconds().round() as u64;
        self.broadcast(
            ServerPacket::MatchOver {
                rankings: rankings.clone(),
                duration,
            },
            state.roster.remote_addrs(),
        );

        info!("Room {} match over after {}s of game time", self.id, duration);
        for (place, ranking) in rankings.iter().enumerate() {
            info!("  {}. {} ({})", place + 1, ranking.name, ranking.best_score);
        }
        rankings
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        state.phase = RoomPhase::Closed;
        state.game = None;
        state.bots.clear();
        self.stop();
        info!("Room {} closed", self.id);
    }

    /// Waits for the room to fill or for the wait timeout.
    ///
    /// Returns false when the room was stopped before starting.
    async fn wait_for_players(&self) -> bool {
        if self.config.batch_mode {
            return self.is_running();
        }

        let wait = Duration::from_secs(self.config.wait_before_bots_seconds);
        let mut poll = interval(WAITING_POLL);
        let mut last_status = None;
        loop {
            poll.tick().await;
            if !self.is_running() {
                return false;
            }

            let players = self.player_count().await;
            let waited = self.created_at.elapsed();
            if players >= self.config.players_per_room {
                info!("Room {} is full", self.id);
                return true;
            }
            if waited >= wait {
                info!(
                    "Room {} waited {}s, backfilling {} seats with bots",
                    self.id,
                    wait.as_secs(),
                    self.config.players_per_room - players
                );
                return true;
            }

            let remaining = wait.saturating_sub(waited).as_secs();
            if last_status != Some(remaining) {
                self.broadcast_status().await;
                last_status = Some(remaining);
            }
        }
    }

    /// Runs the whole lifecycle and returns the final rankings.
    pub async fn run(&self) -> Vec<Ranking> {
        if !self.wait_for_players().await {
            self.close().await;
            return Vec::new();
        }

        self.start_match().await;

        if self.config.batch_mode {
            while self.is_running() && self.step().await {}
        } else {
            let tick = Duration::from_secs_f64(1.0 / self.config.tick_rate as f64);
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !self.is_running() || !self.step().await {
                    break;
                }
            }
        }

        let rankings = self.end_match().await;
        if !self.config.batch_mode && self.config.end_grace_seconds > 0.0 {
            self.linger(Duration::from_secs_f64(self.config.end_grace_seconds))
                .await;
        }
        self.close().await;
        rankings
    }

    /// Keeps an ended room around for `grace`, or until it is stopped.
    async fn linger(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        let mut poll = interval(WAITING_POLL);
        while self.is_running() && Instant::now() < deadline {
            tokio::select! {
                _ = poll.tick() => {}
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
    }
}

/// Polls every bot concurrently, in nickname order.
async fn poll_bots(bots: &[Arc<BotController>], view: Arc<GameView>) -> Vec<(String, Decision)> {
    let mut polls = JoinSet::new();
    for bot in bots {
        let bot = Arc::clone(bot);
        let view = Arc::clone(&view);
        polls.spawn(async move {
            let decision = bot.poll(view).await;
            (bot.nickname().to_string(), decision)
        });
    }

    let mut decisions = Vec::with_capacity(bots.len());
    while let Some(result) = polls.join_next().await {
        match result {
            Ok(decision) => decisions.push(decision),
            Err(e) => warn!("Bot poll task failed: {}", e),
        }
    }
    decisions.sort_by(|a, b| a.0.cmp(&b.0));
    decisions
}
