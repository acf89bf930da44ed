//! A player- or bot-controlled train: head cell, heading, wagon chain,
//! score, and the boost state machine.

use std::collections::VecDeque;

use log::debug;
use railyard_shared::{Direction, Position, Rgb, TrainUpdate, REFERENCE_TICK_RATE};

use crate::cooldown::TickWindow;
use crate::dirty::{DirtySet, TrainField};
use crate::error::CommandError;

/// A train moves one cell every `REFERENCE_TICK_RATE / speed` ticks.
pub const INITIAL_SPEED: f64 = 10.0;
pub const SPEED_DECAY_PER_WAGON: f64 = 0.95;

pub const BOOST_DURATION_SECONDS: f64 = 0.25;
pub const BOOST_COOLDOWN_SECONDS: f64 = 10.0;
pub const BOOST_INTENSITY: f64 = 3.0;

/// Length of the window during which another boost is refused.
pub fn boost_window_seconds() -> f64 {
    BOOST_COOLDOWN_SECONDS + BOOST_DURATION_SECONDS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostState {
    Normal,
    Boosted {
        boost: TickWindow,
        cooldown: TickWindow,
    },
    CoolingDown {
        cooldown: TickWindow,
    },
}

/// The result of a committed move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub from: Position,
    pub to: Position,
}

#[derive(Debug, Clone)]
pub struct Train {
    nickname: String,
    position: Position,
    direction: Direction,
    pending_direction: Direction,
    wagons: VecDeque<Position>,
    /// Cell most recently left behind by the tail; new wagons attach here.
    last_vacated: Position,
    alive: bool,
    score: u32,
    color: Rgb,
    move_timer: u32,
    speed: f64,
    normal_speed: f64,
    boost: BoostState,
    dirty: DirtySet<TrainField>,
}

impl Train {
    pub fn new(nickname: impl Into<String>, position: Position, color: Rgb) -> Self {
        Self {
            nickname: nickname.into(),
            position,
            direction: Direction::Right,
            pending_direction: Direction::Right,
            wagons: VecDeque::new(),
            last_vacated: position,
            alive: true,
            score: 0,
            color,
            move_timer: 0,
            speed: INITIAL_SPEED,
            normal_speed: INITIAL_SPEED,
            boost: BoostState::Normal,
            dirty: DirtySet::all(),
        }
    }

    /// Starts a new life at `position`, keeping nickname and color.
    pub fn respawn(&mut self, position: Position) {
        let color = self.color;
        let nickname = std::mem::take(&mut self.nickname);
        *self = Train::new(nickname, position, color);
    }

    /// Marks the train dead and parks it off the grid with no wagons.
    pub fn kill(&mut self, parking: Position) {
        self.alive = false;
        self.position = parking;
        self.last_vacated = parking;
        self.wagons.clear();
        self.direction = Direction::Right;
        self.pending_direction = Direction::Right;
        self.move_timer = 0;
        self.boost = BoostState::Normal;
        self.update_speed();
        self.dirty.mark_all();
    }

    /// Hands the train to a new driver. Every field is resent under the new name.
    pub fn rename(&mut self, nickname: impl Into<String>) {
        self.nickname = nickname.into();
        self.dirty.mark_all();
    }

    #[cfg(test)]
    pub(crate) fn facing(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self.pending_direction = direction;
        self
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn pending_direction(&self) -> Direction {
        self.pending_direction
    }

    pub fn wagons(&self) -> impl Iterator<Item = &Position> {
        self.wagons.iter()
    }

    pub fn wagon_count(&self) -> usize {
        self.wagons.len()
    }

    pub fn has_wagon_at(&self, cell: Position) -> bool {
        self.wagons.contains(&cell)
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn color(&self) -> Rgb {
        self.color
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn boost_state(&self) -> BoostState {
        self.boost
    }

    pub fn boost_cooldown_active(&self) -> bool {
        !matches!(self.boost, BoostState::Normal)
    }

    pub fn boost_cooldown_remaining(&self, now: u64) -> f64 {
        match self.boost {
            BoostState::Normal => 0.0,
            BoostState::Boosted { cooldown, .. } | BoostState::CoolingDown { cooldown } => {
                cooldown.remaining_seconds(now)
            }
        }
    }

    /// Queues a heading for the next move. An exact reversal is ignored.
    pub fn change_direction(&mut self, direction: Direction) -> bool {
        if direction.is_reverse_of(self.direction) {
            return false;
        }
        self.pending_direction = direction;
        true
    }

    /// Advances timers by one tick and moves one cell when due.
    pub fn advance(&mut self, now: u64, cell_size: i32) -> Option<Step> {
        if !self.alive {
            return None;
        }

        self.update_boost(now);

        self.move_timer += 1;
        let threshold = REFERENCE_TICK_RATE as f64 / self.speed;
        if (self.move_timer as f64) < threshold {
            return None;
        }
        self.move_timer = 0;

        if self.pending_direction != self.direction {
            self.direction = self.pending_direction;
            self.dirty.mark(TrainField::Position);
        }

        let from = self.position;
        let to = from.offset(self.direction, cell_size);

        if self.wagons.is_empty() {
            self.last_vacated = from;
        } else {
            self.wagons.push_front(from);
            if let Some(tail) = self.wagons.pop_back() {
                self.last_vacated = tail;
            }
            self.dirty.mark(TrainField::Wagons);
        }

        self.position = to;
        self.dirty.mark(TrainField::Position);
        Some(Step { from, to })
    }

    fn update_boost(&mut self, now: u64) {
        if let BoostState::Boosted { boost, cooldown } = self.boost {
            if boost.is_elapsed(now) {
                debug!("Boost ended for train {}", self.nickname);
                self.boost = BoostState::CoolingDown { cooldown };
                self.speed = self.normal_speed;
            }
        }

        if let BoostState::CoolingDown { cooldown } = self.boost {
            if cooldown.is_elapsed(now) {
                debug!("Boost cooldown over for train {}", self.nickname);
                self.boost = BoostState::Normal;
                self.dirty.mark(TrainField::BoostCooldown);
            }
        }
    }

    /// Appends `count` wagons at the last vacated cell.
    pub fn grow(&mut self, count: u32) {
        for _ in 0..count {
            self.wagons.push_back(self.last_vacated);
        }
        self.dirty.mark(TrainField::Wagons);
        self.update_speed();
    }

    /// Removes one wagon and scores it. Returns false without a wagon.
    pub fn deliver_one(&mut self) -> bool {
        if self.wagons.pop_back().is_none() {
            return false;
        }
        self.score += 1;
        self.dirty.mark(TrainField::Wagons);
        self.dirty.mark(TrainField::Score);
        self.update_speed();
        true
    }

    /// Trades the tail wagon for a temporary speed boost.
    ///
    /// Returns the cell the wagon occupied.
    pub fn drop_segment(&mut self, now: u64) -> Result<Position, CommandError> {
        if !self.alive {
            return Err(CommandError::NotAlive(self.nickname.clone()));
        }
        if self.boost_cooldown_active() {
            return Err(CommandError::CoolingDown {
                remaining: self.boost_cooldown_remaining(now),
            });
        }
        let tail = self.wagons.pop_back().ok_or(CommandError::NoWagons)?;

        self.normal_speed = self.speed;
        self.speed = self.normal_speed * BOOST_INTENSITY;
        self.boost = BoostState::Boosted {
            boost: TickWindow::from_seconds(now, BOOST_DURATION_SECONDS),
            cooldown: TickWindow::from_seconds(now, boost_window_seconds()),
        };
        self.dirty.mark(TrainField::Wagons);
        self.dirty.mark(TrainField::BoostCooldown);
        debug!(
            "Train {} boosted to speed {:.2} at tick {}",
            self.nickname, self.speed, now
        );
        Ok(tail)
    }

    fn update_speed(&mut self) {
        self.normal_speed = INITIAL_SPEED * SPEED_DECAY_PER_WAGON.powi(self.wagons.len() as i32);
        self.speed = match self.boost {
            BoostState::Boosted { .. } => self.normal_speed * BOOST_INTENSITY,
            _ => self.normal_speed,
        };
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_clean()
    }

    /// Every field group, leaving dirty bits untouched.
    pub fn snapshot(&self) -> TrainUpdate {
        TrainUpdate {
            position: Some(self.position),
            direction: Some(self.direction),
            wagons: Some(self.wagons.iter().copied().collect()),
            score: Some(self.score),
            color: Some(self.color),
            alive: Some(self.alive),
            boost_cooldown_active: Some(self.boost_cooldown_active()),
        }
    }

    /// Dirty field groups only, clearing what was read.
    pub fn diff(&mut self) -> TrainUpdate {
        let mut update = TrainUpdate::default();
        if self.dirty.take(TrainField::Position) {
            update.position = Some(self.position);
            update.direction = Some(self.direction);
        }
        if self.dirty.take(TrainField::Wagons) {
            update.wagons = Some(self.wagons.iter().copied().collect());
        }
        if self.dirty.take(TrainField::Score) {
            update.score = Some(self.score);
        }
        if self.dirty.take(TrainField::Color) {
            update.color = Some(self.color);
        }
        if self.dirty.take(TrainField::Alive) {
            update.alive = Some(self.alive);
        }
        if self.dirty.take(TrainField::BoostCooldown) {
            update.boost_cooldown_active = Some(self.boost_cooldown_active());
        }
        update
    }
}
