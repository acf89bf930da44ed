//! Types shared between the railyard server and its clients.
//!
//! The wire format is newline-delimited JSON: every datagram carries one or
//! more `{"type": ...}` records separated by `\n`. Grid primitives live in
//! [`geometry`], message definitions and the codec in [`protocol`].

pub mod geometry;
pub mod protocol;

pub use geometry::{Direction, Position, Rgb};
pub use protocol::{
    decode_datagram, encode, ClientPacket, CodecError, DeathReason, DeliveryZoneState, GameSize,
    PassengerState, Ranking, Role, RoomPhase, RosterEntry, ServerPacket, StateUpdate,
    TrainUpdate,
};

/// Tick rate used to convert tick counts into game-time seconds.
///
/// Cooldowns and match duration are always expressed in ticks of this rate,
/// whatever rate the simulation is actually stepped at.
pub const REFERENCE_TICK_RATE: u32 = 60;

/// Protocol version announced in `join_ack`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest datagram the server will read.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Converts a duration in game-seconds to reference ticks, rounding to the
/// nearest tick.
pub fn seconds_to_ticks(seconds: f64) -> u64 {
    if seconds <= 0.0 {
        return 0;
    }
    (seconds * REFERENCE_TICK_RATE as f64).round() as u64
}

/// Converts reference ticks back to game-seconds.
pub fn ticks_to_seconds(ticks: u64) -> f64 {
    ticks as f64 / REFERENCE_TICK_RATE as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_seconds_to_ticks_rounds() {
        assert_eq!(seconds_to_ticks(5.0), 300);
        assert_eq!(seconds_to_ticks(0.25), 15);
        assert_eq!(seconds_to_ticks(0.1), 6);
        assert_eq!(seconds_to_ticks(10.25), 615);
        assert_eq!(seconds_to_ticks(0.0), 0);
        assert_eq!(seconds_to_ticks(-1.0), 0);
    }

    #[test]
    fn test_ticks_to_seconds() {
        assert_approx_eq!(ticks_to_seconds(300), 5.0, 1e-9);
        assert_approx_eq!(ticks_to_seconds(15), 0.25, 1e-9);
        assert_approx_eq!(ticks_to_seconds(0), 0.0, 1e-9);
    }
}
