use rand::Rng;
use railyard_shared::{PassengerState, Position};

/// A collectible cell worth `value` wagons on pickup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Passenger {
    pub position: Position,
    pub value: u32,
}

impl Passenger {
    pub fn new(position: Position, value: u32) -> Self {
        Self { position, value }
    }

    /// A passenger at `position` with a value uniform in `1..=max_value`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, position: Position, max_value: u32) -> Self {
        let value = rng.gen_range(1..=max_value.max(1));
        Self { position, value }
    }

    pub fn state(&self) -> PassengerState {
        PassengerState {
            position: self.position,
            value: self.value,
        }
    }
}
