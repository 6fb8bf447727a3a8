//! Errors reported by state machine construction, control and transfers.

use core::fmt;

use fugit::HertzU32;

use crate::gpio::{PinId, PinSet};

/// Which pin group of a state machine a parameter belongs to.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PinRole {
    /// Pins written by `OUT PINS`, `OUT PINDIRS` and `MOV PINS`.
    Out,
    /// Pins sampled by `IN PINS`.
    In,
    /// Pins written by `SET PINS` and `SET PINDIRS`.
    Set,
    /// Pins driven by side-set.
    SideSet,
}

impl fmt::Display for PinRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PinRole::Out => "out",
            PinRole::In => "in",
            PinRole::Set => "set",
            PinRole::SideSet => "side-set",
        })
    }
}

/// Shift register a threshold applies to.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShiftRegister {
    /// Output shift register, refilled from the TX FIFO (`pull_threshold`).
    Osr,
    /// Input shift register, emptied into the RX FIFO (`push_threshold`).
    Isr,
}

/// Hardware-level failure while moving data through a FIFO.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IoFault {
    /// A write hit a full TX FIFO and the data was dropped (`FDEBUG.TXOVER`).
    TxOverflow,
    /// A read hit an empty RX FIFO (`FDEBUG.RXUNDER`).
    RxUnderflow,
    /// The FIFO did not become ready within the configured number of polls.
    TimedOut,
    /// Any other fault reported by the register backend.
    Bus,
}

impl fmt::Display for IoFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IoFault::TxOverflow => "TX FIFO overflow",
            IoFault::RxUnderflow => "RX FIFO underflow",
            IoFault::TimedOut => "FIFO wait timed out",
            IoFault::Bus => "bus fault",
        })
    }
}

/// Errors that occurred while building, controlling or using a state machine.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The program is not 1 to 32 whole 16-bit instructions.
    InvalidProgramSize {
        /// Length of the program in bytes.
        len: usize,
    },
    /// The init program is not made of whole 16-bit instructions.
    InvalidInitProgramSize {
        /// Length of the init program in bytes.
        len: usize,
    },
    /// A pin group has a count outside of its allowed range.
    InvalidPinCount {
        /// The offending pin group.
        role: PinRole,
        /// The requested count.
        count: u8,
    },
    /// A pin group runs past the last bank 0 GPIO.
    InvalidPinRange {
        /// The offending pin group.
        role: PinRole,
        /// First pin of the group.
        first: PinId,
        /// The requested count.
        count: u8,
    },
    /// A pull or push threshold is outside `1..=32`.
    InvalidThreshold {
        /// The shift register the threshold applies to.
        register: ShiftRegister,
        /// The requested threshold.
        threshold: u8,
    },
    /// The requested frequency is zero or slower than the clock divider can reach.
    InvalidFrequency {
        /// The requested frequency.
        requested: HertzU32,
    },
    /// No PIO block has a free state machine, room for the program and the pins.
    NoResourceAvailable,
    /// Pins are already claimed by a PIO state machine or another peripheral.
    PinInUse {
        /// The conflicting pins.
        pins: PinSet,
    },
    /// State machines asked to act together live in different PIO blocks.
    NotColocated,
    /// The two ranges of a full-duplex transfer differ in length.
    MismatchedLengths {
        /// Bytes to write.
        out_len: usize,
        /// Bytes to read.
        in_len: usize,
    },
    /// The state machine has been deinitialized.
    Deinitialized,
    /// The hardware reported a fault during a transfer.
    Io(IoFault),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidProgramSize { len } => write!(
                f,
                "program must be 2 to 64 bytes of 16-bit instructions, got {} bytes",
                len
            ),
            Error::InvalidInitProgramSize { len } => write!(
                f,
                "init program must be whole 16-bit instructions, got {} bytes",
                len
            ),
            Error::InvalidPinCount { role, count } => match role {
                PinRole::Set | PinRole::SideSet => {
                    write!(f, "{} pin count must be between 1 and 5, got {}", role, count)
                }
                PinRole::Out | PinRole::In => {
                    write!(f, "{} pin count must be at least 1, got {}", role, count)
                }
            },
            Error::InvalidPinRange { role, first, count } => write!(
                f,
                "{} pins {}+{} run past the last GPIO",
                role, first, count
            ),
            Error::InvalidThreshold {
                register,
                threshold,
            } => {
                let name = match register {
                    ShiftRegister::Osr => "pull_threshold",
                    ShiftRegister::Isr => "push_threshold",
                };
                write!(f, "{} must be between 1 and 32, got {}", name, threshold)
            }
            Error::InvalidFrequency { requested } => {
                write!(f, "frequency {} Hz cannot be reached", requested.to_Hz())
            }
            Error::NoResourceAvailable => f.write_str("all state machines in use"),
            Error::PinInUse { pins } => write!(f, "pins {:#010x} in use", pins.bits()),
            Error::NotColocated => f.write_str("state machines are not in the same PIO"),
            Error::MismatchedLengths { out_len, in_len } => write!(
                f,
                "buffer slices must be of equal length, got {} and {} bytes",
                out_len, in_len
            ),
            Error::Deinitialized => f.write_str("object has been deinitialized"),
            Error::Io(fault) => write!(f, "I/O error: {}", fault),
        }
    }
}

impl From<IoFault> for Error {
    fn from(fault: IoFault) -> Self {
        Error::Io(fault)
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Error::Io(IoFault::TimedOut) => embedded_io::ErrorKind::TimedOut,
            Error::Io(_) => embedded_io::ErrorKind::Other,
            Error::Deinitialized => embedded_io::ErrorKind::NotConnected,
            Error::NoResourceAvailable | Error::PinInUse { .. } => {
                embedded_io::ErrorKind::OutOfMemory
            }
            _ => embedded_io::ErrorKind::InvalidInput,
        }
    }
}
