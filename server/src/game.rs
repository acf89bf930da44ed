//! Authoritative simulation of one match.
//!
//! A [`Game`] owns every train, passenger and the delivery zone of a room and
//! advances them one tick at a time. Collision checks for a tick all run
//! against the positions reached by that tick's moves, before any death is
//! applied, so simultaneous collisions never depend on iteration order.
//! Deaths are gathered into an outbox that the owning room drains after each
//! tick.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use railyard_shared::{
    ticks_to_seconds, DeathReason, Direction, GameSize, Position, Ranking, Rgb, StateUpdate,
};

use crate::agent::{Command, GameView, TrainView};
use crate::cooldown::CooldownTable;
use crate::delivery_zone::DeliveryZone;
use crate::dirty::{DirtySet, GameField};
use crate::error::{CommandError, SpawnError};
use crate::passenger::Passenger;
use crate::train::{boost_window_seconds, Step, Train};

pub const ORIGINAL_GAME_SIZE: i32 = 400;
pub const CELL_SIZE: i32 = 20;
/// Arena growth per participant, applied to both dimensions.
pub const GAME_SIZE_INCREMENT: i32 = 20;
/// Spawn candidates keep this many cells from borders and other trains.
pub const SPAWN_SAFE_ZONE: i32 = 3;
pub const SPAWN_ATTEMPTS: usize = 100;
pub const PASSENGER_ATTEMPTS: usize = 100;
/// Live trains per passenger.
pub const TRAINS_PER_PASSENGER: f64 = 1.0;

/// Tunables handed down from the server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRules {
    pub respawn_cooldown_seconds: f64,
    pub delivery_cooldown_seconds: f64,
    pub max_passenger_value: u32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            respawn_cooldown_seconds: 5.0,
            delivery_cooldown_seconds: 0.1,
            max_passenger_value: 3,
        }
    }
}

/// A death produced by the last tick, waiting to be reported.
#[derive(Debug, Clone, PartialEq)]
pub struct DeathNotice {
    pub nickname: String,
    pub reason: DeathReason,
    /// Respawn cooldown in game-seconds.
    pub remaining: f64,
}

pub struct Game {
    width: i32,
    height: i32,
    cell_size: i32,
    rules: GameRules,
    trains: BTreeMap<String, Train>,
    passengers: Vec<Passenger>,
    zone: DeliveryZone,
    tick: u64,
    respawn_cooldowns: CooldownTable,
    delivery_cooldowns: CooldownTable,
    best_scores: BTreeMap<String, u32>,
    rng: StdRng,
    dirty: DirtySet<GameField>,
    deaths: Vec<DeathNotice>,
}

impl Game {
    /// Creates an arena sized for `players` participants.
    pub fn new(rules: GameRules, players: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let growth = GAME_SIZE_INCREMENT * players as i32;
        let width = ORIGINAL_GAME_SIZE + growth;
        let height = ORIGINAL_GAME_SIZE + growth;
        let zone = DeliveryZone::generate(
            &mut rng,
            width,
            height,
            CELL_SIZE,
            players,
            SPAWN_SAFE_ZONE,
        );

        info!(
            "Created {}x{} game for {} players (seed {})",
            width, height, players, seed
        );

        Self {
            width,
            height,
            cell_size: CELL_SIZE,
            respawn_cooldowns: CooldownTable::from_seconds(rules.respawn_cooldown_seconds),
            delivery_cooldowns: CooldownTable::from_seconds(rules.delivery_cooldown_seconds),
            rules,
            trains: BTreeMap::new(),
            passengers: Vec::new(),
            zone,
            tick: 0,
            best_scores: BTreeMap::new(),
            rng,
            dirty: DirtySet::all(),
            deaths: Vec::new(),
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn cell_size(&self) -> i32 {
        self.cell_size
    }

    pub fn train(&self, nickname: &str) -> Option<&Train> {
        self.trains.get(nickname)
    }

    pub fn trains(&self) -> impl Iterator<Item = &Train> {
        self.trains.values()
    }

    pub fn live_train_count(&self) -> usize {
        self.trains.values().filter(|t| t.is_alive()).count()
    }

    pub fn passengers(&self) -> &[Passenger] {
        &self.passengers
    }

    pub fn delivery_zone(&self) -> &DeliveryZone {
        &self.zone
    }

    pub fn best_scores(&self) -> &BTreeMap<String, u32> {
        &self.best_scores
    }

    /// Off-grid cell where dead trains are parked.
    pub fn parking_cell(&self) -> Position {
        Position::new(-self.cell_size, -self.cell_size)
    }

    /// Runs one resolution pass: movement, collisions, pickups, deliveries.
    pub fn step(&mut self) {
        self.tick += 1;
        let now = self.tick;
        let cell = self.cell_size;

        let mut steps: Vec<(String, Step)> = Vec::new();
        for (nickname, train) in self.trains.iter_mut() {
            if let Some(step) = train.advance(now, cell) {
                steps.push((nickname.clone(), step));
            }
        }

        let collisions = self.detect_collisions(&steps);
        for (nickname, reason) in collisions {
            self.kill_train(&nickname, reason);
        }

        let live: Vec<String> = self
            .trains
            .values()
            .filter(|t| t.is_alive())
            .map(|t| t.nickname().to_string())
            .collect();
        for nickname in &live {
            self.check_pickup(nickname);
            self.check_delivery(nickname);
        }
    }

    /// Finds every death caused by this tick's moves.
    ///
    /// Each train is named at most once, with the first reason found.
    fn detect_collisions(&self, steps: &[(String, Step)]) -> Vec<(String, DeathReason)> {
        let moves: HashMap<&str, Step> = steps.iter().map(|(n, s)| (n.as_str(), *s)).collect();
        let mut seen = HashSet::new();
        let mut deaths = Vec::new();
        let mut push = |nickname: &str, reason: DeathReason| {
            if seen.insert(nickname.to_string()) {
                deaths.push((nickname.to_string(), reason));
            }
        };

        for (nickname, step) in steps {
            let Some(train) = self.trains.get(nickname) else {
                continue;
            };
            let head = step.to;

            if train.has_wagon_at(head) {
                push(nickname, DeathReason::SelfCollision);
                continue;
            }

            let mut hit = false;
            for (other_name, other) in &self.trains {
                if other_name == nickname || !other.is_alive() {
                    continue;
                }

                let swapped = moves
                    .get(other_name.as_str())
                    .map(|o| o.to == step.from && o.from == head)
                    .unwrap_or(false);
                if other.position() == head || swapped {
                    push(nickname, DeathReason::CollisionWithTrain);
                    push(other_name, DeathReason::CollisionWithTrain);
                    hit = true;
                    break;
                }

                if other.has_wagon_at(head) {
                    push(nickname, DeathReason::CollisionWithWagon);
                    hit = true;
                    break;
                }
            }
            if hit {
                continue;
            }

            if !self.in_bounds(head) {
                push(nickname, DeathReason::OutOfBounds);
            }
        }

        deaths
    }

    fn in_bounds(&self, cell: Position) -> bool {
        cell.x >= 0 && cell.y >= 0 && cell.x < self.width && cell.y < self.height
    }

    fn kill_train(&mut self, nickname: &str, reason: DeathReason) {
        let now = self.tick;
        let parking = self.parking_cell();
        let Some(train) = self.trains.get_mut(nickname) else {
            warn!("Train {} not found when applying death", nickname);
            return;
        };
        if !train.is_alive() {
            return;
        }

        train.kill(parking);
        self.respawn_cooldowns.record(nickname, now);
        self.delivery_cooldowns.clear(nickname);
        let remaining = ticks_to_seconds(self.respawn_cooldowns.length());
        debug!(
            "Train {} died at tick {} ({:?}), respawn in {:.2}s",
            nickname, now, reason, remaining
        );
        self.deaths.push(DeathNotice {
            nickname: nickname.to_string(),
            reason,
            remaining,
        });
        self.update_passenger_count();
    }

    fn check_pickup(&mut self, nickname: &str) {
        let Some(head) = self
            .trains
            .get(nickname)
            .filter(|t| t.is_alive())
            .map(Train::position)
        else {
            return;
        };

        let hits: Vec<usize> = self
            .passengers
            .iter()
            .enumerate()
            .filter(|(_, p)| p.position == head)
            .map(|(index, _)| index)
            .collect();
        for index in hits.into_iter().rev() {
            let value = self.passengers[index].value;
            if let Some(train) = self.trains.get_mut(nickname) {
                train.grow(value);
            }

            if self.passengers.len() <= self.desired_passengers() {
                let position = self.free_passenger_cell();
                let max = self.rules.max_passenger_value;
                self.passengers[index] = Passenger::random(&mut self.rng, position, max);
            } else {
                self.passengers.swap_remove(index);
            }
            self.dirty.mark(GameField::Passengers);
        }
    }

    fn check_delivery(&mut self, nickname: &str) {
        let now = self.tick;
        let Some(train) = self.trains.get_mut(nickname) else {
            return;
        };
        if !train.is_alive() || !self.zone.contains(train.position()) {
            return;
        }
        if !self.delivery_cooldowns.is_ready(nickname, now) {
            return;
        }
        if !train.deliver_one() {
            return;
        }

        let score = train.score();
        self.delivery_cooldowns.record(nickname, now);
        let best = self.best_scores.entry(nickname.to_string()).or_insert(0);
        if score > *best {
            *best = score;
            self.dirty.mark(GameField::BestScores);
        }
    }

    fn desired_passengers(&self) -> usize {
        (self.live_train_count() as f64 / TRAINS_PER_PASSENGER) as usize
    }

    /// Tops passengers up to the desired count. Surpluses are trimmed on pickup.
    fn update_passenger_count(&mut self) {
        let desired = self.desired_passengers();
        let mut changed = false;
        while self.passengers.len() < desired {
            let position = self.free_passenger_cell();
            let max = self.rules.max_passenger_value;
            self.passengers
                .push(Passenger::random(&mut self.rng, position, max));
            changed = true;
        }
        if changed {
            self.dirty.mark(GameField::Passengers);
        }
    }

    fn cell_is_occupied(&self, cell: Position) -> bool {
        self.trains
            .values()
            .any(|t| t.position() == cell || t.has_wagon_at(cell))
            || self.passengers.iter().any(|p| p.position == cell)
            || self.zone.contains(cell)
    }

    fn random_cell(&mut self, margin: i32) -> Position {
        let cols = self.width / self.cell_size;
        let rows = self.height / self.cell_size;
        let x = self.rng.gen_range(margin..=(cols - 1 - margin).max(margin));
        let y = self.rng.gen_range(margin..=(rows - 1 - margin).max(margin));
        Position::new(x * self.cell_size, y * self.cell_size)
    }

    fn free_passenger_cell(&mut self) -> Position {
        let mut candidate = self.random_cell(0);
        for _ in 1..PASSENGER_ATTEMPTS {
            if !self.cell_is_occupied(candidate) {
                return candidate;
            }
            candidate = self.random_cell(0);
        }
        candidate
    }

    fn is_spawn_safe(&self, cell: Position) -> bool {
        let safe = self.cell_size * SPAWN_SAFE_ZONE;
        if cell.x < safe
            || cell.y < safe
            || cell.x > self.width - safe
            || cell.y > self.height - safe
        {
            return false;
        }

        let near = |other: &Position| (other.x - cell.x).abs() < safe && (other.y - cell.y).abs() < safe;
        for train in self.trains.values().filter(|t| t.is_alive()) {
            if near(&train.position()) || train.wagons().any(near) {
                return false;
            }
        }

        !self.zone.contains(cell) && !self.passengers.iter().any(|p| p.position == cell)
    }

    fn safe_spawn_position(&mut self) -> Position {
        for _ in 0..SPAWN_ATTEMPTS {
            let candidate = self.random_cell(SPAWN_SAFE_ZONE);
            if self.is_spawn_safe(candidate) {
                return candidate;
            }
        }

        let center = Position::new(
            (self.width / 2) / self.cell_size * self.cell_size,
            (self.height / 2) / self.cell_size * self.cell_size,
        );
        warn!("Using default center position: ({}, {})", center.x, center.y);
        center
    }

    /// Remaining respawn cooldown in game-seconds.
    pub fn respawn_cooldown(&self, nickname: &str) -> f64 {
        self.respawn_cooldowns.remaining_seconds(nickname, self.tick)
    }

    /// Places a new train, or brings a dead one back, at a safe cell.
    pub fn spawn(&mut self, nickname: &str) -> Result<Position, SpawnError> {
        if self.trains.get(nickname).map(Train::is_alive).unwrap_or(false) {
            return Err(SpawnError::AlreadyAlive(nickname.to_string()));
        }
        let remaining = self.respawn_cooldown(nickname);
        if remaining > 0.0 {
            return Err(SpawnError::CoolingDown { remaining });
        }

        let position = self.safe_spawn_position();
        match self.trains.get_mut(nickname) {
            // Dead entries are retained, so the color carries over.
            Some(train) => train.respawn(position),
            None => {
                let color = random_non_blue_color(&mut self.rng);
                self.trains
                    .insert(nickname.to_string(), Train::new(nickname, position, color));
            }
        }
        self.respawn_cooldowns.clear(nickname);
        if !self.best_scores.contains_key(nickname) {
            self.best_scores.insert(nickname.to_string(), 0);
            self.dirty.mark(GameField::BestScores);
        }
        self.update_passenger_count();

        info!(
            "Spawned train {} at ({}, {}) on tick {}",
            nickname, position.x, position.y, self.tick
        );
        Ok(position)
    }

    /// Takes a train out of play without a death notice or cooldown.
    ///
    /// The entry is kept so clients see it go dead in the next diff.
    pub fn retire(&mut self, nickname: &str) {
        let parking = self.parking_cell();
        if let Some(train) = self.trains.get_mut(nickname) {
            if train.is_alive() {
                train.kill(parking);
                info!("Retired train {}", nickname);
            }
        }
    }

    /// Moves a train, its cooldowns and its best score to another nickname.
    ///
    /// The train keeps its color, wagons, score and alive state. Fails when
    /// `from` has no train or `to` already has one.
    pub fn rename_train(&mut self, from: &str, to: &str) -> bool {
        if self.trains.contains_key(to) {
            return false;
        }
        let Some(mut train) = self.trains.remove(from) else {
            return false;
        };
        train.rename(to);
        self.trains.insert(to.to_string(), train);
        self.respawn_cooldowns.rename(from, to);
        self.delivery_cooldowns.rename(from, to);
        if let Some(best) = self.best_scores.remove(from) {
            self.best_scores.insert(to.to_string(), best);
            self.dirty.mark(GameField::BestScores);
        }
        info!("Train {} renamed to {}", from, to);
        true
    }

    fn live_train_mut(&mut self, nickname: &str) -> Result<&mut Train, CommandError> {
        match self.trains.get_mut(nickname) {
            Some(train) if train.is_alive() => Ok(train),
            Some(_) => Err(CommandError::NotAlive(nickname.to_string())),
            None => Err(CommandError::UnknownTrain(nickname.to_string())),
        }
    }

    /// Queues a heading. `Ok(false)` means the reversal was ignored.
    pub fn change_direction(
        &mut self,
        nickname: &str,
        direction: Direction,
    ) -> Result<bool, CommandError> {
        Ok(self.live_train_mut(nickname)?.change_direction(direction))
    }

    /// Trades the tail wagon for a boost and leaves a passenger worth one
    /// wagon in its cell. Returns the cooldown window in game-seconds.
    pub fn drop_segment(&mut self, nickname: &str) -> Result<f64, CommandError> {
        let now = self.tick;
        let tail = self.live_train_mut(nickname)?.drop_segment(now)?;
        self.passengers.push(Passenger::new(tail, 1));
        self.dirty.mark(GameField::Passengers);
        Ok(boost_window_seconds())
    }

    /// Applies one control command on behalf of `nickname`.
    pub fn apply(&mut self, nickname: &str, command: Command) -> Result<(), CommandError> {
        match command {
            Command::Turn(direction) => self.change_direction(nickname, direction).map(|_| ()),
            Command::DropSegment => self.drop_segment(nickname).map(|_| ()),
            Command::Keep => Ok(()),
        }
    }

    /// Drains the deaths produced since the last call.
    pub fn take_deaths(&mut self) -> Vec<DeathNotice> {
        std::mem::take(&mut self.deaths)
    }

    /// Best scores ordered highest first, ties broken by nickname.
    pub fn rankings(&self) -> Vec<Ranking> {
        let mut rankings: Vec<Ranking> = self
            .best_scores
            .iter()
            .map(|(name, best)| Ranking {
                name: name.clone(),
                best_score: *best,
            })
            .collect();
        rankings.sort_by(|a, b| b.best_score.cmp(&a.best_score).then(a.name.cmp(&b.name)));
        rankings
    }

    /// Every field group of the match. Dirty bits are left untouched.
    pub fn snapshot(&self) -> StateUpdate {
        StateUpdate {
            size: Some(self.size()),
            cell_size: Some(self.cell_size),
            passengers: Some(self.passengers.iter().map(Passenger::state).collect()),
            delivery_zone: Some(self.zone.state()),
            trains: self
                .trains
                .iter()
                .map(|(name, train)| (name.clone(), train.snapshot()))
                .collect(),
            best_scores: Some(self.best_scores.clone()),
            remaining_time: None,
            rename_train: None,
        }
    }

    /// Field groups changed since the last diff. Clears what it reports.
    pub fn diff(&mut self) -> StateUpdate {
        let mut update = StateUpdate::default();
        if self.dirty.take(GameField::Size) {
            update.size = Some(self.size());
        }
        if self.dirty.take(GameField::CellSize) {
            update.cell_size = Some(self.cell_size);
        }
        if self.dirty.take(GameField::Passengers) {
            update.passengers = Some(self.passengers.iter().map(Passenger::state).collect());
        }
        if self.dirty.take(GameField::DeliveryZone) {
            update.delivery_zone = Some(self.zone.state());
        }
        if self.dirty.take(GameField::BestScores) {
            update.best_scores = Some(self.best_scores.clone());
        }
        for (name, train) in self.trains.iter_mut() {
            let train_update = train.diff();
            if !train_update.is_empty() {
                update.trains.insert(name.clone(), train_update);
            }
        }
        update
    }

    fn size(&self) -> GameSize {
        GameSize {
            game_width: self.width,
            game_height: self.height,
        }
    }

    /// Immutable copy of everything a control policy may look at.
    pub fn view(&self) -> GameView {
        GameView {
            tick: self.tick,
            width: self.width,
            height: self.height,
            cell_size: self.cell_size,
            trains: self
                .trains
                .values()
                .map(|train| TrainView {
                    nickname: train.nickname().to_string(),
                    position: train.position(),
                    direction: train.direction(),
                    wagons: train.wagons().copied().collect(),
                    alive: train.is_alive(),
                    score: train.score(),
                    boost_cooldown_active: train.boost_cooldown_active(),
                })
                .collect(),
            passengers: self.passengers.iter().map(Passenger::state).collect(),
            delivery_zone: self.zone.state(),
            best_scores: self.best_scores.clone(),
        }
    }
}

/// Random light color with more red or green than blue.
pub fn random_non_blue_color<R: Rng + ?Sized>(rng: &mut R) -> Rgb {
    loop {
        let r: u8 = rng.gen_range(100..=230);
        let g: u8 = rng.gen_range(100..=230);
        let b: u8 = rng.gen_range(0..=150);
        if r as i32 > b as i32 + 50 || g as i32 > b as i32 + 50 {
            return Rgb(r, g, b);
        }
    }
}
