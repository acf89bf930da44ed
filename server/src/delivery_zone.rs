//! The rectangle where carried wagons are converted into score.

use log::debug;
use rand::Rng;
use railyard_shared::{DeliveryZoneState, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryZone {
    pub position: Position,
    pub width: i32,
    pub height: i32,
}

impl DeliveryZone {
    /// Sizes the zone for `players` participants and places it on the grid.
    ///
    /// Both sides are `isqrt(players)` cells, one of them doubled at random.
    /// The zone stays clear of the `margin`-cell border band used for spawn
    /// candidates whenever the arena leaves room for it.
    pub fn generate<R: Rng + ?Sized>(
        rng: &mut R,
        game_width: i32,
        game_height: i32,
        cell_size: i32,
        players: usize,
        margin: i32,
    ) -> Self {
        let factor = isqrt(players.max(1)) as i32;
        let (mut cols, mut rows) = (factor, factor);
        if rng.gen_bool(0.5) {
            cols += factor;
        } else {
            rows += factor;
        }

        let x = place_axis(rng, game_width / cell_size, cols, margin);
        let y = place_axis(rng, game_height / cell_size, rows, margin);
        let zone = Self {
            position: Position::new(x * cell_size, y * cell_size),
            width: cols * cell_size,
            height: rows * cell_size,
        };
        debug!(
            "Delivery zone bounds: ({}, {}, {}, {})",
            zone.position.x,
            zone.position.y,
            zone.position.x + zone.width,
            zone.position.y + zone.height
        );
        zone
    }

    /// Half-open containment: the right and bottom edges are outside.
    pub fn contains(&self, cell: Position) -> bool {
        cell.x >= self.position.x
            && cell.x < self.position.x + self.width
            && cell.y >= self.position.y
            && cell.y < self.position.y + self.height
    }

    pub fn state(&self) -> DeliveryZoneState {
        DeliveryZoneState {
            position: self.position,
            width: self.width,
            height: self.height,
        }
    }
}

/// First cell of a span of `span` cells on an axis of `cells` cells.
fn place_axis<R: Rng + ?Sized>(rng: &mut R, cells: i32, span: i32, margin: i32) -> i32 {
    let inner_max = cells - margin - span;
    if inner_max >= margin {
        rng.gen_range(margin..=inner_max)
    } else {
        rng.gen_range(0..=(cells - 1 - span).max(0))
    }
}

fn isqrt(n: usize) -> usize {
    let mut root = (n as f64).sqrt() as usize;
    while root * root > n {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= n {
        root += 1;
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(3), 1);
        assert_eq!(isqrt(4), 2);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
    }

    #[test]
    fn test_size_grows_with_square_root() {
        let mut rng = StdRng::seed_from_u64(1);
        for players in [1usize, 2, 4, 9] {
            let zone = DeliveryZone::generate(&mut rng, 800, 800, 20, players, 3);
            let factor = isqrt(players) as i32 * 20;
            let sides = [zone.width, zone.height];
            assert!(sides.contains(&factor));
            assert!(sides.contains(&(2 * factor)));
        }
    }

    #[test]
    fn test_zone_avoids_border_band() {
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..100 {
            let zone = DeliveryZone::generate(&mut rng, 440, 440, 20, 2, 3);
            assert!(zone.position.x >= 60 && zone.position.y >= 60);
            assert!(zone.position.x + zone.width <= 440 - 60);
            assert!(zone.position.y + zone.height <= 440 - 60);
            assert!(zone.position.is_aligned(20));
        }
    }

    #[test]
    fn test_tiny_arena_falls_back_to_full_range() {
        let mut rng = StdRng::seed_from_u64(5);
        let zone = DeliveryZone::generate(&mut rng, 100, 100, 20, 4, 3);
        assert!(zone.position.x >= 0 && zone.position.y >= 0);
    }

    #[test]
    fn test_contains_is_half_open() {
        let zone = DeliveryZone {
            position: Position::new(100, 100),
            width: 40,
            height: 20,
        };
        assert!(zone.contains(Position::new(100, 100)));
        assert!(zone.contains(Position::new(120, 100)));
        assert!(!zone.contains(Position::new(140, 100)));
        assert!(!zone.contains(Position::new(100, 120)));
        assert!(!zone.contains(Position::new(80, 100)));
    }
}
