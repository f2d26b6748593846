//! Card session state and the bring-up retry budget.

use crate::consts::BYTE_ADDRESS_SHIFT;

/// Card presence as seen by the rest of the firmware.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardStatus {
    NotPresent,
    Ready,
}

/// Card type.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    /// Pre-2.00 card, byte addressed.
    Sd1,
    /// 2.00+ standard capacity card, byte addressed.
    Sd2,
    /// High capacity card, block addressed.
    Sdhc,
}

impl CardType {
    /// Shift turning a sector number into the read command argument.
    pub fn address_shift(&self) -> u8 {
        match self {
            CardType::Sd1 | CardType::Sd2 => BYTE_ADDRESS_SHIFT,
            CardType::Sdhc => 0,
        }
    }
}

/// Card geometry found by a successful bring-up.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub card_type: CardType,
    /// Capacity in 512-byte blocks.
    pub block_count: u64,
}

/// State of the storage subsystem.
///
/// `address_shift` and `block_count` are only meaningful while the status is
/// [`CardStatus::Ready`] and stay fixed until the next bring-up.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardSession {
    status: CardStatus,
    error_count: u16,
    card_type: Option<CardType>,
    block_count: u64,
}

impl Default for CardSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CardSession {
    /// Session of a card that has not been brought up.
    pub const fn new() -> Self {
        CardSession {
            status: CardStatus::NotPresent,
            error_count: 0,
            card_type: None,
            block_count: 0,
        }
    }

    pub fn status(&self) -> CardStatus {
        self.status
    }

    pub fn error_count(&self) -> u16 {
        self.error_count
    }

    pub fn card_type(&self) -> Option<CardType> {
        self.card_type
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Geometry of a usable card.
    pub fn geometry(&self) -> Option<Geometry> {
        match self.card_type {
            Some(card_type) if self.is_usable() => Some(Geometry {
                card_type,
                block_count: self.block_count,
            }),
            _ => None,
        }
    }

    /// 0 for block addressed cards, 9 for byte addressed ones.
    pub fn address_shift(&self) -> u8 {
        self.card_type
            .map(|card_type| card_type.address_shift())
            .unwrap_or(BYTE_ADDRESS_SHIFT)
    }

    /// Read command argument for a sector.
    pub fn block_address(&self, sector: u32) -> u32 {
        sector << self.address_shift()
    }

    /// Ready and no error counted since the last bring-up.
    pub fn is_usable(&self) -> bool {
        self.status == CardStatus::Ready && self.error_count == 0
    }

    /// The control loop has to run bring-up before reading again.
    pub fn needs_bring_up(&self) -> bool {
        !self.is_usable()
    }

    /// Forget the card, keeping nothing from the previous bring-up.
    pub fn invalidate(&mut self) {
        *self = Self::new();
    }

    /// Count one protocol violation.
    pub fn record_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    /// Publish the outcome of a successful bring-up.
    pub fn publish(&mut self, geometry: Geometry) {
        self.status = CardStatus::Ready;
        self.error_count = 0;
        self.card_type = Some(geometry.card_type);
        self.block_count = geometry.block_count;
    }
}

/// Restarts left for one bring-up run.
///
/// Decremented once per full restart of the sequence, never per step.
#[derive(Debug)]
pub struct RetryBudget {
    remaining: u16,
}

impl RetryBudget {
    pub fn new(tries: u16) -> Self {
        RetryBudget { remaining: tries }
    }

    /// Take one attempt, `false` once the budget is spent.
    pub fn take(&mut self) -> bool {
        if self.remaining == 0 {
            false
        } else {
            self.remaining -= 1;
            true
        }
    }

    pub fn remaining(&self) -> u16 {
        self.remaining
    }
}
