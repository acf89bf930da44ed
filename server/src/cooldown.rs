//! Tick-relative cooldown arithmetic.
//!
//! Every cooldown is stored as a number of reference ticks
//! (`REFERENCE_TICK_RATE` per game-second) together with the tick at which it
//! started. The configured simulation rate never enters these calculations,
//! so stepping a match faster or slower changes wall-clock time only.

use std::collections::HashMap;

use railyard_shared::{seconds_to_ticks, ticks_to_seconds};

/// A window of `length` reference ticks opened at `started_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickWindow {
    started_at: u64,
    length: u64,
}

impl TickWindow {
    pub fn new(started_at: u64, length: u64) -> Self {
        Self { started_at, length }
    }

    pub fn from_seconds(started_at: u64, seconds: f64) -> Self {
        Self::new(started_at, seconds_to_ticks(seconds))
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// `max(0, length - (now - started_at))`
    pub fn remaining_ticks(&self, now: u64) -> u64 {
        let elapsed = now.saturating_sub(self.started_at);
        self.length.saturating_sub(elapsed)
    }

    pub fn remaining_seconds(&self, now: u64) -> f64 {
        ticks_to_seconds(self.remaining_ticks(now))
    }

    pub fn is_elapsed(&self, now: u64) -> bool {
        self.remaining_ticks(now) == 0
    }
}

/// Event ticks keyed by train nickname, all sharing one cooldown length.
///
/// Used for respawn cooldowns (keyed by death tick) and delivery cooldowns
/// (keyed by last delivery tick).
#[derive(Debug, Clone)]
pub struct CooldownTable {
    length: u64,
    events: HashMap<String, u64>,
}

impl CooldownTable {
    pub fn from_seconds(seconds: f64) -> Self {
        Self {
            length: seconds_to_ticks(seconds),
            events: HashMap::new(),
        }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn record(&mut self, nickname: &str, tick: u64) {
        self.events.insert(nickname.to_string(), tick);
    }

    pub fn clear(&mut self, nickname: &str) {
        self.events.remove(nickname);
    }

    /// Carries a running cooldown over to another nickname.
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(tick) = self.events.remove(from) {
            self.events.insert(to.to_string(), tick);
        }
    }

    pub fn event_tick(&self, nickname: &str) -> Option<u64> {
        self.events.get(nickname).copied()
    }

    /// Remaining ticks, zero when no event was recorded.
    pub fn remaining_ticks(&self, nickname: &str, now: u64) -> u64 {
        self.events
            .get(nickname)
            .map(|&tick| TickWindow::new(tick, self.length).remaining_ticks(now))
            .unwrap_or(0)
    }

    pub fn remaining_seconds(&self, nickname: &str, now: u64) -> f64 {
        ticks_to_seconds(self.remaining_ticks(nickname, now))
    }

    pub fn is_ready(&self, nickname: &str, now: u64) -> bool {
        self.remaining_ticks(nickname, now) == 0
    }
}

/// Game-time progress of a match, in reference ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchClock {
    total_ticks: u64,
    elapsed_ticks: u64,
}

impl MatchClock {
    pub fn new(duration_seconds: u64) -> Self {
        Self {
            total_ticks: seconds_to_ticks(duration_seconds as f64),
            elapsed_ticks: 0,
        }
    }

    pub fn advance(&mut self) {
        self.elapsed_ticks = (self.elapsed_ticks + 1).min(self.total_ticks);
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    pub fn elapsed_ticks(&self) -> u64 {
        self.elapsed_ticks
    }

    pub fn elapsed_seconds(&self) -> f64 {
        ticks_to_seconds(self.elapsed_ticks)
    }

    pub fn remaining_seconds(&self) -> f64 {
        ticks_to_seconds(self.total_ticks - self.elapsed_ticks)
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed_ticks >= self.total_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_window_counts_down() {
        let window = TickWindow::from_seconds(100, 5.0);
        assert_eq!(window.length(), 300);
        assert_eq!(window.remaining_ticks(100), 300);
        assert_eq!(window.remaining_ticks(250), 150);
        assert_eq!(window.remaining_ticks(400), 0);
        assert_eq!(window.remaining_ticks(10_000), 0);
        assert!(window.is_elapsed(400));
        assert!(!window.is_elapsed(399));
    }

    #[test]
    fn test_window_before_start_is_full() {
        let window = TickWindow::new(50, 10);
        assert_eq!(window.remaining_ticks(20), 10);
    }

    #[test]
    fn test_window_reports_seconds() {
        let window = TickWindow::from_seconds(0, 10.25);
        assert_approx_eq!(window.remaining_seconds(60), 9.25, 1e-9);
    }

    #[test]
    fn test_table_without_event_is_ready() {
        let table = CooldownTable::from_seconds(0.1);
        assert_eq!(table.length(), 6);
        assert!(table.is_ready("ada", 0));
        assert_eq!(table.remaining_ticks("ada", 12), 0);
    }

    #[test]
    fn test_table_tracks_each_nickname() {
        let mut table = CooldownTable::from_seconds(5.0);
        table.record("ada", 10);
        table.record("bob", 200);

        assert_eq!(table.remaining_ticks("ada", 250), 60);
        assert_approx_eq!(table.remaining_seconds("ada", 250), 1.0, 1e-9);
        assert_eq!(table.remaining_ticks("bob", 250), 250);
        assert!(table.is_ready("ada", 310));

        table.clear("bob");
        assert!(table.is_ready("bob", 250));
        assert_eq!(table.event_tick("bob"), None);
    }

    #[test]
    fn test_table_rename_carries_event() {
        let mut table = CooldownTable::from_seconds(5.0);
        table.record("ada", 10);
        table.rename("ada", "Bot Ivy");
        assert_eq!(table.event_tick("ada"), None);
        assert_eq!(table.event_tick("Bot Ivy"), Some(10));

        table.rename("ghost", "Bot Max");
        assert_eq!(table.event_tick("Bot Max"), None);
    }

    #[test]
    fn test_match_clock_is_rate_independent() {
        let mut clock = MatchClock::new(2);
        assert_eq!(clock.total_ticks(), 120);
        for _ in 0..119 {
            clock.advance();
        }
        assert!(!clock.is_finished());
        assert_approx_eq!(clock.remaining_seconds(), 1.0 / 60.0, 1e-9);
        clock.advance();
        clock.advance();
        assert!(clock.is_finished());
        assert_eq!(clock.elapsed_ticks(), 120);
        assert_approx_eq!(clock.elapsed_seconds(), 2.0, 1e-9);
    }
}
