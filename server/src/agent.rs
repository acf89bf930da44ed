//! Control policies for bot trains and the adapter that runs them.
//!
//! A policy sees an immutable [`GameView`] and answers with one [`Command`].
//! [`BotController`] runs each decision on the blocking pool under a
//! wall-clock deadline. A decision that misses the deadline is abandoned, not
//! killed: its result is never applied, and the policy is skipped on later
//! ticks until the abandoned call has returned.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use log::{debug, warn};
use railyard_shared::{DeliveryZoneState, Direction, PassengerState, Position};

use crate::error::ConfigError;

/// The single command a controller may issue per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Turn(Direction),
    DropSegment,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainView {
    pub nickname: String,
    pub position: Position,
    pub direction: Direction,
    pub wagons: Vec<Position>,
    pub alive: bool,
    pub score: u32,
    pub boost_cooldown_active: bool,
}

/// Read-only copy of a match, safe to hand to untrusted code.
#[derive(Debug, Clone, PartialEq)]
pub struct GameView {
    pub tick: u64,
    pub width: i32,
    pub height: i32,
    pub cell_size: i32,
    pub trains: Vec<TrainView>,
    pub passengers: Vec<PassengerState>,
    pub delivery_zone: DeliveryZoneState,
    pub best_scores: BTreeMap<String, u32>,
}

impl GameView {
    pub fn train(&self, nickname: &str) -> Option<&TrainView> {
        self.trains.iter().find(|t| t.nickname == nickname)
    }

    pub fn in_bounds(&self, cell: Position) -> bool {
        cell.x >= 0 && cell.y >= 0 && cell.x < self.width && cell.y < self.height
    }

    /// True when entering `cell` would kill the train `me`.
    pub fn is_blocked(&self, cell: Position, me: &str) -> bool {
        if !self.in_bounds(cell) {
            return true;
        }
        self.trains.iter().filter(|t| t.alive).any(|t| {
            (t.nickname != me && t.position == cell) || t.wagons.contains(&cell)
        })
    }

    /// Center cell of the delivery zone.
    pub fn delivery_target(&self) -> Position {
        let zone = &self.delivery_zone;
        let cell = self.cell_size;
        Position::new(
            zone.position.x + (zone.width / cell / 2) * cell,
            zone.position.y + (zone.height / cell / 2) * cell,
        )
    }
}

/// A decision function for one bot train.
pub trait Policy: Send {
    fn decide(&mut self, view: &GameView, me: &str) -> Command;
}

/// Headings a train may take next, current heading first.
fn candidate_headings(current: Direction) -> [Direction; 3] {
    [current, current.turn_left(), current.turn_right()]
}

/// Keeps its heading and swerves only to avoid a crash.
#[derive(Debug, Default)]
pub struct Cruiser;

impl Policy for Cruiser {
    fn decide(&mut self, view: &GameView, me: &str) -> Command {
        let Some(train) = view.train(me).filter(|t| t.alive) else {
            return Command::Keep;
        };

        let safe = candidate_headings(train.direction).into_iter().find(|d| {
            !view.is_blocked(train.position.offset(*d, view.cell_size), me)
        });
        match safe {
            Some(direction) if direction != train.direction => Command::Turn(direction),
            _ => Command::Keep,
        }
    }
}

/// Greedy collector: fetches the nearest passenger until it carries
/// `capacity` wagons, then heads for the delivery zone.
#[derive(Debug)]
pub struct Collector {
    capacity: usize,
    boost_distance: i32,
}

impl Default for Collector {
    fn default() -> Self {
        Self {
            capacity: 4,
            boost_distance: 12,
        }
    }
}

impl Policy for Collector {
    fn decide(&mut self, view: &GameView, me: &str) -> Command {
        let Some(train) = view.train(me).filter(|t| t.alive) else {
            return Command::Keep;
        };

        let fetching = train.wagons.len() < self.capacity && !view.passengers.is_empty();
        let target = if fetching {
            view.passengers
                .iter()
                .map(|p| p.position)
                .min_by_key(|p| (p.manhattan(train.position), *p))
                .unwrap_or_else(|| view.delivery_target())
        } else {
            view.delivery_target()
        };

        let distance = train.position.manhattan(target) / view.cell_size;
        if fetching
            && distance > self.boost_distance
            && train.wagons.len() > 1
            && !train.boost_cooldown_active
        {
            return Command::DropSegment;
        }

        let best = candidate_headings(train.direction)
            .into_iter()
            .filter(|d| !view.is_blocked(train.position.offset(*d, view.cell_size), me))
            .min_by_key(|d| train.position.offset(*d, view.cell_size).manhattan(target));
        match best {
            Some(direction) if direction != train.direction => Command::Turn(direction),
            _ => Command::Keep,
        }
    }
}

pub type PolicyFactory = Arc<dyn Fn() -> Box<dyn Policy> + Send + Sync>;

/// Policy constructors by configured name.
#[derive(Clone)]
pub struct PolicyRegistry {
    factories: HashMap<String, PolicyFactory>,
}

impl PolicyRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry holding `"cruiser"` and `"collector"`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("cruiser", || Box::new(Cruiser));
        registry.register("collector", || Box::new(Collector::default()));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Policy> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Policy>, ConfigError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ConfigError::UnknownPolicy(name.to_string()))
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Outcome of one bounded policy invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Command(Command),
    /// The deadline passed first. The train keeps its heading.
    TimedOut,
    /// The policy panicked.
    Faulted,
    /// An earlier call has not returned yet, so no new call was made.
    Busy,
}

impl Decision {
    pub fn command(self) -> Option<Command> {
        match self {
            Decision::Command(command) => Some(command),
            _ => None,
        }
    }
}

/// Drives one bot train through its policy.
pub struct BotController {
    nickname: String,
    policy_name: String,
    policy: Arc<Mutex<Box<dyn Policy>>>,
    deadline: Duration,
}

impl BotController {
    pub fn new(
        nickname: impl Into<String>,
        policy_name: impl Into<String>,
        policy: Box<dyn Policy>,
        deadline: Duration,
    ) -> Self {
        Self {
            nickname: nickname.into(),
            policy_name: policy_name.into(),
            policy: Arc::new(Mutex::new(policy)),
            deadline,
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn policy_name(&self) -> &str {
        &self.policy_name
    }

    /// Asks the policy for a command, waiting at most the deadline.
    pub async fn poll(&self, view: Arc<GameView>) -> Decision {
        let policy = Arc::clone(&self.policy);
        let me = self.nickname.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let mut guard = match policy.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return None,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };
            Some(guard.decide(&view, &me))
        });

        match tokio::time::timeout(self.deadline, handle).await {
            Ok(Ok(Some(command))) => Decision::Command(command),
            Ok(Ok(None)) => {
                debug!("Policy for {} still busy, skipping", self.nickname);
                Decision::Busy
            }
            Ok(Err(e)) => {
                warn!("Policy for {} failed: {}", self.nickname, e);
                Decision::Faulted
            }
            Err(_) => {
                warn!(
                    "Policy for {} exceeded {:?}, result discarded",
                    self.nickname, self.deadline
                );
                Decision::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_with(trains: Vec<TrainView>, passengers: Vec<PassengerState>) -> GameView {
        GameView {
            tick: 0,
            width: 200,
            height: 200,
            cell_size: 20,
            trains,
            passengers,
            delivery_zone: DeliveryZoneState {
                position: Position::new(0, 160),
                width: 40,
                height: 20,
            },
            best_scores: BTreeMap::new(),
        }
    }

    fn train(nickname: &str, x: i32, y: i32, direction: Direction) -> TrainView {
        TrainView {
            nickname: nickname.to_string(),
            position: Position::new(x, y),
            direction,
            wagons: vec![],
            alive: true,
            score: 0,
            boost_cooldown_active: false,
        }
    }

    struct Slow(Duration);

    impl Policy for Slow {
        fn decide(&mut self, _view: &GameView, _me: &str) -> Command {
            std::thread::sleep(self.0);
            Command::Keep
        }
    }

    struct PanicsOnce(bool);

    impl Policy for PanicsOnce {
        fn decide(&mut self, _view: &GameView, _me: &str) -> Command {
            if !self.0 {
                self.0 = true;
                panic!("policy bug");
            }
            Command::Turn(Direction::Up)
        }
    }

    #[test]
    fn test_is_blocked() {
        let mut other = train("b", 100, 100, Direction::Left);
        other.wagons = vec![Position::new(120, 100)];
        let view = view_with(vec![train("a", 40, 40, Direction::Right), other], vec![]);

        assert!(view.is_blocked(Position::new(200, 40), "a"));
        assert!(view.is_blocked(Position::new(100, 100), "a"));
        assert!(view.is_blocked(Position::new(120, 100), "a"));
        assert!(!view.is_blocked(Position::new(60, 40), "a"));
        assert!(!view.is_blocked(Position::new(40, 40), "a"));
    }

    #[test]
    fn test_cruiser_keeps_heading_when_clear() {
        let view = view_with(vec![train("a", 40, 40, Direction::Right)], vec![]);
        assert_eq!(Cruiser.decide(&view, "a"), Command::Keep);
    }

    #[test]
    fn test_cruiser_swerves_at_wall() {
        let view = view_with(vec![train("a", 180, 40, Direction::Right)], vec![]);
        // Left of "right" is "up", which is still inside the arena.
        assert_eq!(Cruiser.decide(&view, "a"), Command::Turn(Direction::Up));
    }

    #[test]
    fn test_dead_train_keeps() {
        let mut dead = train("a", 180, 40, Direction::Right);
        dead.alive = false;
        let view = view_with(vec![dead], vec![]);
        assert_eq!(Cruiser.decide(&view, "a"), Command::Keep);
        assert_eq!(Collector::default().decide(&view, "a"), Command::Keep);
    }

    #[test]
    fn test_collector_turns_towards_passenger() {
        let passenger = PassengerState {
            position: Position::new(40, 120),
            value: 1,
        };
        let view = view_with(vec![train("a", 40, 40, Direction::Right)], vec![passenger]);
        assert_eq!(
            Collector::default().decide(&view, "a"),
            Command::Turn(Direction::Down)
        );
    }

    #[test]
    fn test_collector_heads_home_when_full() {
        let mut full = train("a", 100, 40, Direction::Down);
        full.wagons = vec![Position::new(100, 20); 4];
        let passenger = PassengerState {
            position: Position::new(180, 40),
            value: 1,
        };
        let view = view_with(vec![full], vec![passenger]);
        assert_eq!(view.delivery_target(), Position::new(20, 160));
        assert_eq!(
            Collector::default().decide(&view, "a"),
            Command::Turn(Direction::Left)
        );
    }

    #[test]
    fn test_collector_boosts_when_far() {
        let mut me = train("a", 0, 0, Direction::Right);
        me.wagons = vec![Position::new(0, 0); 2];
        let passenger = PassengerState {
            position: Position::new(180, 180),
            value: 1,
        };
        let mut view = view_with(vec![me], vec![passenger]);
        view.width = 400;
        view.height = 400;
        let mut collector = Collector {
            capacity: 4,
            boost_distance: 5,
        };
        assert_eq!(collector.decide(&view, "a"), Command::DropSegment);

        view.trains[0].boost_cooldown_active = true;
        assert_ne!(collector.decide(&view, "a"), Command::DropSegment);
    }

    #[test]
    fn test_registry_builtins_and_unknown() {
        let registry = PolicyRegistry::with_builtins();
        assert!(registry.contains("cruiser"));
        assert!(registry.create("collector").is_ok());
        assert!(matches!(
            registry.create("telepathic"),
            Err(ConfigError::UnknownPolicy(_))
        ));
    }

    #[test]
    fn test_registry_accepts_external_policy() {
        let mut registry = PolicyRegistry::empty();
        registry.register("sleepy", || Box::new(Slow(Duration::from_millis(0))));
        assert!(registry.create("sleepy").is_ok());
        assert!(!registry.contains("cruiser"));
    }

    #[test]
    fn test_controller_returns_command() {
        let controller = BotController::new(
            "a",
            "cruiser",
            Box::new(Cruiser),
            Duration::from_millis(500),
        );
        let view = Arc::new(view_with(vec![train("a", 180, 40, Direction::Right)], vec![]));
        assert_eq!(
            tokio_test::block_on(controller.poll(view)),
            Decision::Command(Command::Turn(Direction::Up))
        );
    }

    #[tokio::test]
    async fn test_controller_discards_late_result_and_skips_while_busy() {
        let controller = BotController::new(
            "a",
            "slow",
            Box::new(Slow(Duration::from_millis(500))),
            Duration::from_millis(50),
        );
        let view = Arc::new(view_with(vec![], vec![]));

        assert_eq!(controller.poll(Arc::clone(&view)).await, Decision::TimedOut);
        assert_eq!(controller.poll(Arc::clone(&view)).await, Decision::Busy);

        tokio::time::sleep(Duration::from_millis(700)).await;
        // Free again, but still too slow for the deadline.
        assert_eq!(controller.poll(view).await, Decision::TimedOut);
    }

    #[tokio::test]
    async fn test_controller_survives_panicking_policy() {
        let controller = BotController::new(
            "a",
            "flaky",
            Box::new(PanicsOnce(false)),
            Duration::from_millis(500),
        );
        let view = Arc::new(view_with(vec![], vec![]));

        assert_eq!(controller.poll(Arc::clone(&view)).await, Decision::Faulted);
        assert_eq!(
            controller.poll(view).await,
            Decision::Command(Command::Turn(Direction::Up))
        );
    }
}
