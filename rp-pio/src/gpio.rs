//! Pin identities and pin sets
//!
//! PIO state machines address bank 0 GPIOs by number. The pins themselves are
//! owned by whoever constructs the configuration; this module only carries
//! their identity and the sets of pins a state machine touches.

use core::fmt;

/// Number of GPIOs in bank 0, which is the only bank PIO can drive.
pub const NUM_BANK0_GPIOS: u8 = 30;

/// Value-level representation of a bank 0 pin.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PinId(u8);

impl PinId {
    /// Create the identity of GPIO `num`.
    ///
    /// Returns `None` if the pin does not exist in bank 0.
    pub const fn new(num: u8) -> Option<Self> {
        if num < NUM_BANK0_GPIOS {
            Some(PinId(num))
        } else {
            None
        }
    }

    /// The GPIO number.
    pub const fn num(self) -> u8 {
        self.0
    }

    /// Mask with only this pin set.
    pub const fn mask(self) -> u32 {
        1 << self.0
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

/// A set of bank 0 pins, one bit per GPIO.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PinSet(u32);

impl PinSet {
    /// The empty set.
    pub const EMPTY: PinSet = PinSet(0);

    /// Build a set from a raw bitmask. Bits above the last bank 0 GPIO are dropped.
    pub const fn from_bits(bits: u32) -> Self {
        PinSet(bits & ((1 << NUM_BANK0_GPIOS) - 1))
    }

    /// `count` consecutive pins starting at `first`, truncated at the end of bank 0.
    pub fn consecutive(first: PinId, count: u8) -> Self {
        let end = (first.num() as u32 + count as u32).min(NUM_BANK0_GPIOS as u32);
        let mut bits = 0;
        for num in first.num() as u32..end {
            bits |= 1 << num;
        }
        PinSet(bits)
    }

    /// Raw bitmask.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether the set has no pins.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of pins in the set.
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Whether `pin` is in the set.
    pub const fn contains(self, pin: PinId) -> bool {
        self.0 & pin.mask() != 0
    }

    /// Pins in either set.
    pub const fn union(self, other: PinSet) -> Self {
        PinSet(self.0 | other.0)
    }

    /// Pins in both sets.
    pub const fn intersection(self, other: PinSet) -> Self {
        PinSet(self.0 & other.0)
    }

    /// Pins in `self` but not in `other`.
    pub const fn difference(self, other: PinSet) -> Self {
        PinSet(self.0 & !other.0)
    }

    /// Add a single pin.
    pub fn insert(&mut self, pin: PinId) {
        self.0 |= pin.mask();
    }

    /// Iterate over the pins in ascending order.
    pub fn iter(self) -> PinSetIter {
        PinSetIter(self.0)
    }
}

impl From<PinId> for PinSet {
    fn from(pin: PinId) -> Self {
        PinSet(pin.mask())
    }
}

impl IntoIterator for PinSet {
    type Item = PinId;
    type IntoIter = PinSetIter;

    fn into_iter(self) -> PinSetIter {
        self.iter()
    }
}

/// Iterator over the pins of a [`PinSet`].
#[derive(Debug, Clone)]
pub struct PinSetIter(u32);

impl Iterator for PinSetIter {
    type Item = PinId;

    fn next(&mut self) -> Option<PinId> {
        if self.0 == 0 {
            return None;
        }
        let num = self.0.trailing_zeros() as u8;
        // Clear lowest set bit.
        self.0 &= self.0 - 1;
        Some(PinId(num))
    }
}
