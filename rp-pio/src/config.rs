//! State machine configuration and its validation
//!
//! [`StateMachineConfig`] collects everything needed to place and start a
//! state machine. [`StateMachineConfig::validate`] checks it against the
//! hardware limits without touching any shared state and produces a
//! [`ValidConfig`], the only form the allocator and controller accept.

use fugit::HertzU32;

use crate::error::{Error, PinRole, ShiftRegister};
use crate::gpio::{PinId, PinSet, NUM_BANK0_GPIOS};

/// Instruction memory of one PIO block, in 16-bit instructions.
pub const PIO_INSTRUCTION_COUNT: usize = pio::RP2040_MAX_PROGRAM_SIZE;

/// Largest accepted program, in bytes.
pub const MAX_PROGRAM_BYTES: usize = PIO_INSTRUCTION_COUNT * 2;

/// Largest count accepted for `SET` and side-set pin groups.
pub const MAX_SET_PIN_COUNT: u8 = 5;

/// Shift direction for input and output shifting.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftDirection {
    /// Shift register to left (MSB first).
    Left,
    /// Shift register to right (LSB first).
    Right,
}

impl ShiftDirection {
    pub(crate) fn bit(self) -> bool {
        match self {
            Self::Left => false,
            Self::Right => true,
        }
    }
}

/// Shifting behaviour of one shift register.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftConfig {
    /// Automatically pull (OSR) or push (ISR) when the threshold is reached.
    pub auto: bool,
    /// Number of bits shifted before an auto or conditional pull/push, `1..=32`.
    pub threshold: u8,
    /// Direction the register shifts in.
    pub direction: ShiftDirection,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        ShiftConfig {
            auto: false,
            threshold: 32,
            direction: ShiftDirection::Right,
        }
    }
}

/// Consecutive pins used by one of the state machine's pin mappings.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinGroup {
    /// First pin of the group. `None` leaves the mapping unused and `count` ignored.
    pub first: Option<PinId>,
    /// Number of consecutive pins.
    pub count: u8,
}

impl PinGroup {
    /// A mapping that is not used.
    pub const UNUSED: PinGroup = PinGroup {
        first: None,
        count: 1,
    };

    /// `count` pins starting at `first`.
    pub const fn new(first: PinId, count: u8) -> Self {
        PinGroup {
            first: Some(first),
            count,
        }
    }

    /// Pins claimed by this group.
    pub fn pins(&self) -> PinSet {
        match self.first {
            Some(first) => PinSet::consecutive(first, self.count),
            None => PinSet::EMPTY,
        }
    }

    /// Base pin number written to the pin control register, 0 when unused.
    pub(crate) fn base(&self) -> u8 {
        self.first.map(PinId::num).unwrap_or(0)
    }

    /// Count written to the pin control register, 0 when unused.
    pub(crate) fn hw_count(&self) -> u8 {
        if self.first.is_some() {
            self.count
        } else {
            0
        }
    }

    fn validate(&self, role: PinRole, max: u8) -> Result<(), Error> {
        if self.count < 1 || self.count > max {
            return Err(Error::InvalidPinCount {
                role,
                count: self.count,
            });
        }
        Ok(())
    }

    fn validate_range(&self, role: PinRole) -> Result<(), Error> {
        if let Some(first) = self.first {
            if first.num() as u32 + self.count as u32 > NUM_BANK0_GPIOS as u32 {
                return Err(Error::InvalidPinRange {
                    role,
                    first,
                    count: self.count,
                });
            }
        }
        Ok(())
    }
}

impl Default for PinGroup {
    fn default() -> Self {
        PinGroup::UNUSED
    }
}

/// A validated main program: 1 to 32 instructions.
#[derive(Clone, Copy)]
pub struct Program {
    code: [u16; PIO_INSTRUCTION_COUNT],
    len: u8,
}

impl Program {
    /// Decode little-endian instruction bytes.
    ///
    /// Returns `None` unless `bytes` holds 1 to 32 whole instructions.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 || bytes.len() % 2 != 0 || bytes.len() > MAX_PROGRAM_BYTES {
            return None;
        }
        let mut code = [0; PIO_INSTRUCTION_COUNT];
        for (slot, pair) in code.iter_mut().zip(bytes.chunks_exact(2)) {
            *slot = u16::from_le_bytes([pair[0], pair[1]]);
        }
        Some(Program {
            code,
            len: (bytes.len() / 2) as u8,
        })
    }

    /// The instructions.
    pub fn code(&self) -> &[u16] {
        &self.code[..self.len as usize]
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false: a valid program has at least one instruction.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PartialEq for Program {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl Eq for Program {}

impl core::fmt::Debug for Program {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Program")
            .field("code", &self.code())
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Program {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Program {{ code: {} }}", self.code())
    }
}

/// A validated init program, executed once when the state machine starts.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitProgram<'a>(&'a [u8]);

impl<'a> InitProgram<'a> {
    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.0.len() / 2
    }

    /// Whether there is nothing to execute.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The instructions in execution order.
    pub fn instructions(&self) -> impl Iterator<Item = u16> + 'a {
        self.0
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
    }
}

/// Builder describing a state machine to construct.
///
/// Defaults: no init program, all pin mappings unused with a count of 1,
/// exclusive pin use, no auto pull/push, thresholds of 32 and both registers
/// shifting right.
#[derive(Debug, Clone)]
pub struct StateMachineConfig<'a> {
    program: &'a [u8],
    init: Option<&'a [u8]>,
    frequency: HertzU32,
    out_pins: PinGroup,
    in_pins: PinGroup,
    set_pins: PinGroup,
    side_set_pins: PinGroup,
    exclusive_pin_use: bool,
    out_shift: ShiftConfig,
    in_shift: ShiftConfig,
}

impl<'a> StateMachineConfig<'a> {
    /// Run `program` (little-endian 16-bit instructions) at `frequency`.
    pub fn new(program: &'a [u8], frequency: HertzU32) -> Self {
        StateMachineConfig {
            program,
            init: None,
            frequency,
            out_pins: PinGroup::UNUSED,
            in_pins: PinGroup::UNUSED,
            set_pins: PinGroup::UNUSED,
            side_set_pins: PinGroup::UNUSED,
            exclusive_pin_use: true,
            out_shift: ShiftConfig::default(),
            in_shift: ShiftConfig::default(),
        }
    }

    /// Set a program run once at start up.
    ///
    /// It is run after the main program is loaded so instructions may jump into it.
    pub fn init(mut self, init: &'a [u8]) -> Self {
        self.init = Some(init);
        self
    }

    /// Set the pins written by `OUT` instructions.
    pub fn out_pins(mut self, first: Option<PinId>, count: u8) -> Self {
        self.out_pins = PinGroup { first, count };
        self
    }

    /// Set the pins read by `IN` instructions.
    pub fn in_pins(mut self, first: Option<PinId>, count: u8) -> Self {
        self.in_pins = PinGroup { first, count };
        self
    }

    /// Set the pins written by `SET` instructions, at most 5.
    pub fn set_pins(mut self, first: Option<PinId>, count: u8) -> Self {
        self.set_pins = PinGroup { first, count };
        self
    }

    /// Set the pins driven by side-set, at most 5.
    pub fn side_set_pins(mut self, first: Option<PinId>, count: u8) -> Self {
        self.side_set_pins = PinGroup { first, count };
        self
    }

    /// When true, no pin of this state machine is shared with other state machines.
    ///
    /// Pins are never shared with other peripherals.
    pub fn exclusive_pin_use(mut self, exclusive: bool) -> Self {
        self.exclusive_pin_use = exclusive;
        self
    }

    /// Set the autopull state.
    pub fn autopull(mut self, autopull: bool) -> Self {
        self.out_shift.auto = autopull;
        self
    }

    /// Set the number of bits shifted out of the OSR before a new value is pulled.
    pub fn pull_threshold(mut self, threshold: u8) -> Self {
        self.out_shift.threshold = threshold;
        self
    }

    /// Set the OSR shift direction for `OUT` instructions.
    ///
    /// This impacts data alignment when a write does not fill a whole word.
    pub fn out_shift_direction(mut self, direction: ShiftDirection) -> Self {
        self.out_shift.direction = direction;
        self
    }

    /// Set the autopush state.
    pub fn autopush(mut self, autopush: bool) -> Self {
        self.in_shift.auto = autopush;
        self
    }

    /// Set the number of bits shifted into the ISR before it is pushed.
    pub fn push_threshold(mut self, threshold: u8) -> Self {
        self.in_shift.threshold = threshold;
        self
    }

    /// Set the ISR shift direction for `IN` instructions.
    pub fn in_shift_direction(mut self, direction: ShiftDirection) -> Self {
        self.in_shift.direction = direction;
        self
    }

    /// Check the configuration against the hardware limits.
    pub fn validate(&self) -> Result<ValidConfig<'a>, Error> {
        let program = Program::from_bytes(self.program).ok_or(Error::InvalidProgramSize {
            len: self.program.len(),
        })?;

        let init = self.init.unwrap_or(&[]);
        if init.len() % 2 != 0 {
            return Err(Error::InvalidInitProgramSize { len: init.len() });
        }

        self.out_pins.validate(PinRole::Out, u8::MAX)?;
        self.in_pins.validate(PinRole::In, u8::MAX)?;
        self.set_pins.validate(PinRole::Set, MAX_SET_PIN_COUNT)?;
        self.side_set_pins
            .validate(PinRole::SideSet, MAX_SET_PIN_COUNT)?;

        for (register, shift) in [
            (ShiftRegister::Osr, &self.out_shift),
            (ShiftRegister::Isr, &self.in_shift),
        ] {
            if !(1..=32).contains(&shift.threshold) {
                return Err(Error::InvalidThreshold {
                    register,
                    threshold: shift.threshold,
                });
            }
        }

        self.out_pins.validate_range(PinRole::Out)?;
        self.in_pins.validate_range(PinRole::In)?;
        self.set_pins.validate_range(PinRole::Set)?;
        self.side_set_pins.validate_range(PinRole::SideSet)?;

        if self.frequency.to_Hz() == 0 {
            return Err(Error::InvalidFrequency {
                requested: self.frequency,
            });
        }

        Ok(ValidConfig {
            program,
            init: InitProgram(init),
            frequency: self.frequency,
            out_pins: self.out_pins,
            in_pins: self.in_pins,
            set_pins: self.set_pins,
            side_set_pins: self.side_set_pins,
            exclusive_pin_use: self.exclusive_pin_use,
            out_shift: self.out_shift,
            in_shift: self.in_shift,
        })
    }
}

/// A configuration that passed [`StateMachineConfig::validate`].
#[derive(Debug, Clone)]
pub struct ValidConfig<'a> {
    program: Program,
    init: InitProgram<'a>,
    frequency: HertzU32,
    out_pins: PinGroup,
    in_pins: PinGroup,
    set_pins: PinGroup,
    side_set_pins: PinGroup,
    exclusive_pin_use: bool,
    out_shift: ShiftConfig,
    in_shift: ShiftConfig,
}

impl<'a> ValidConfig<'a> {
    /// The main program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The init program, possibly empty.
    pub fn init(&self) -> InitProgram<'a> {
        self.init
    }

    /// The requested frequency.
    pub fn frequency(&self) -> HertzU32 {
        self.frequency
    }

    /// `OUT` pin mapping.
    pub fn out_pins(&self) -> &PinGroup {
        &self.out_pins
    }

    /// `IN` pin mapping.
    pub fn in_pins(&self) -> &PinGroup {
        &self.in_pins
    }

    /// `SET` pin mapping.
    pub fn set_pins(&self) -> &PinGroup {
        &self.set_pins
    }

    /// Side-set pin mapping.
    pub fn side_set_pins(&self) -> &PinGroup {
        &self.side_set_pins
    }

    /// Whether pins must not be shared with other state machines.
    pub fn exclusive_pin_use(&self) -> bool {
        self.exclusive_pin_use
    }

    /// OSR behaviour.
    pub fn out_shift(&self) -> &ShiftConfig {
        &self.out_shift
    }

    /// ISR behaviour.
    pub fn in_shift(&self) -> &ShiftConfig {
        &self.in_shift
    }

    /// Every distinct pin touched by any of the four mappings.
    pub fn pins(&self) -> PinSet {
        self.output_pins().union(self.in_pins.pins())
    }

    /// Pins the state machine drives: `OUT`, `SET` and side-set.
    pub fn output_pins(&self) -> PinSet {
        self.out_pins
            .pins()
            .union(self.set_pins.pins())
            .union(self.side_set_pins.pins())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fugit::RateExtU32;

    const PROGRAM: [u8; 4] = [0x01, 0x60, 0x00, 0x00];

    fn pin(num: u8) -> PinId {
        PinId::new(num).unwrap()
    }

    fn config(program: &[u8]) -> StateMachineConfig<'_> {
        StateMachineConfig::new(program, 1_000_000.Hz())
    }

    #[test]
    fn even_programs_up_to_64_bytes_are_accepted() {
        let buf = [0u8; 70];
        for len in (2..=64).step_by(2) {
            let valid = config(&buf[..len]).validate().unwrap();
            assert_eq!(valid.program().len(), len / 2);
        }
    }

    #[test]
    fn odd_short_or_long_programs_are_rejected() {
        let buf = [0u8; 70];
        for len in [0, 1, 3, 33, 63, 65, 66, 70] {
            assert_eq!(
                config(&buf[..len]).validate().unwrap_err(),
                Error::InvalidProgramSize { len }
            );
        }
    }

    #[test]
    fn program_bytes_are_little_endian() {
        let program = Program::from_bytes(&PROGRAM).unwrap();
        assert_eq!(program.code(), &[0x6001, 0x0000]);
    }

    #[test]
    fn init_program_must_be_even() {
        assert_eq!(
            config(&PROGRAM).init(&[0; 3]).validate().unwrap_err(),
            Error::InvalidInitProgramSize { len: 3 }
        );
        // No upper bound beyond evenness.
        let long = [0u8; 200];
        let valid = config(&PROGRAM).init(&long).validate().unwrap();
        assert_eq!(valid.init().len(), 100);
    }

    #[test]
    fn set_and_side_set_counts_are_bounded() {
        for count in [0, 6] {
            assert_eq!(
                config(&PROGRAM)
                    .set_pins(Some(pin(0)), count)
                    .validate()
                    .unwrap_err(),
                Error::InvalidPinCount {
                    role: PinRole::Set,
                    count
                }
            );
            assert_eq!(
                config(&PROGRAM)
                    .side_set_pins(Some(pin(0)), count)
                    .validate()
                    .unwrap_err(),
                Error::InvalidPinCount {
                    role: PinRole::SideSet,
                    count
                }
            );
        }
        for count in [1, 5] {
            config(&PROGRAM)
                .set_pins(Some(pin(0)), count)
                .side_set_pins(Some(pin(10)), count)
                .validate()
                .unwrap();
        }
    }

    #[test]
    fn unused_groups_still_check_counts() {
        assert_eq!(
            config(&PROGRAM).out_pins(None, 0).validate().unwrap_err(),
            Error::InvalidPinCount {
                role: PinRole::Out,
                count: 0
            }
        );
        assert_eq!(
            config(&PROGRAM).in_pins(None, 0).validate().unwrap_err(),
            Error::InvalidPinCount {
                role: PinRole::In,
                count: 0
            }
        );
    }

    #[test]
    fn thresholds_are_bounded() {
        for threshold in [0, 33] {
            assert_eq!(
                config(&PROGRAM)
                    .pull_threshold(threshold)
                    .validate()
                    .unwrap_err(),
                Error::InvalidThreshold {
                    register: ShiftRegister::Osr,
                    threshold
                }
            );
            assert_eq!(
                config(&PROGRAM)
                    .push_threshold(threshold)
                    .validate()
                    .unwrap_err(),
                Error::InvalidThreshold {
                    register: ShiftRegister::Isr,
                    threshold
                }
            );
        }
        for threshold in [1, 32] {
            config(&PROGRAM)
                .pull_threshold(threshold)
                .push_threshold(threshold)
                .validate()
                .unwrap();
        }
    }

    #[test]
    fn program_size_is_reported_before_pin_counts() {
        assert_eq!(
            config(&PROGRAM[..1])
                .set_pins(Some(pin(0)), 9)
                .validate()
                .unwrap_err(),
            Error::InvalidProgramSize { len: 1 }
        );
    }

    #[test]
    fn groups_must_fit_in_bank0() {
        assert_eq!(
            config(&PROGRAM)
                .out_pins(Some(pin(28)), 3)
                .validate()
                .unwrap_err(),
            Error::InvalidPinRange {
                role: PinRole::Out,
                first: pin(28),
                count: 3
            }
        );
        config(&PROGRAM)
            .out_pins(Some(pin(28)), 2)
            .validate()
            .unwrap();
    }

    #[test]
    fn zero_frequency_is_rejected() {
        assert_eq!(
            StateMachineConfig::new(&PROGRAM, 0.Hz())
                .validate()
                .unwrap_err(),
            Error::InvalidFrequency { requested: 0.Hz() }
        );
    }

    #[test]
    fn pins_are_merged_across_roles() {
        let valid = config(&PROGRAM)
            .out_pins(Some(pin(2)), 4)
            .set_pins(Some(pin(4)), 2)
            .in_pins(Some(pin(10)), 1)
            .validate()
            .unwrap();
        assert_eq!(valid.pins(), PinSet::from_bits(0b100_0011_1100));
        assert_eq!(valid.output_pins(), PinSet::from_bits(0b11_1100));
    }

    #[test]
    fn validation_is_repeatable() {
        let cfg = config(&PROGRAM).set_pins(Some(pin(3)), 2);
        let a = cfg.validate().unwrap();
        let b = cfg.validate().unwrap();
        assert_eq!(a.program(), b.program());
        assert_eq!(a.pins(), b.pins());
    }
}
