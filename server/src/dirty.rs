//! Per-entity dirty bits for the diff protocol.
//!
//! Each entity type declares a fixed set of field groups. A bit is set on
//! every write and cleared only when the serializer reads it, so changes
//! survive skipped broadcasts and are reported once with their latest value.

use std::marker::PhantomData;

/// A field group tracked by a [`DirtySet`].
pub trait DirtyField: Copy + 'static {
    const ALL: &'static [Self];

    fn bit(self) -> u16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtySet<F> {
    bits: u16,
    _field: PhantomData<F>,
}

impl<F: DirtyField> DirtySet<F> {
    pub fn clean() -> Self {
        Self {
            bits: 0,
            _field: PhantomData,
        }
    }

    pub fn all() -> Self {
        let mut set = Self::clean();
        set.mark_all();
        set
    }

    pub fn mark(&mut self, field: F) {
        self.bits |= field.bit();
    }

    pub fn mark_all(&mut self) {
        for field in F::ALL {
            self.mark(*field);
        }
    }

    pub fn is_set(&self, field: F) -> bool {
        self.bits & field.bit() != 0
    }

    /// Reads and clears one bit.
    pub fn take(&mut self, field: F) -> bool {
        let set = self.is_set(field);
        self.bits &= !field.bit();
        set
    }

    pub fn is_clean(&self) -> bool {
        self.bits == 0
    }
}

impl<F: DirtyField> Default for DirtySet<F> {
    fn default() -> Self {
        Self::clean()
    }
}

/// Field groups of a train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainField {
    /// Head position and heading travel together.
    Position,
    Wagons,
    Score,
    Color,
    Alive,
    BoostCooldown,
}

impl DirtyField for TrainField {
    const ALL: &'static [Self] = &[
        TrainField::Position,
        TrainField::Wagons,
        TrainField::Score,
        TrainField::Color,
        TrainField::Alive,
        TrainField::BoostCooldown,
    ];

    fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// Match-wide field groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameField {
    Size,
    CellSize,
    Passengers,
    DeliveryZone,
    BestScores,
}

impl DirtyField for GameField {
    const ALL: &'static [Self] = &[
        GameField::Size,
        GameField::CellSize,
        GameField::Passengers,
        GameField::DeliveryZone,
        GameField::BestScores,
    ];

    fn bit(self) -> u16 {
        1 << self as u16
    }
}
