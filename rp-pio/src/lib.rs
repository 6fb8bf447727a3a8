//! Shared PIO state machines for the RP2040
//!
//! This crate hands out the eight PIO state machines of the RP2040 to
//! independent users. It validates each configuration against the hardware
//! limits, places it on a block that has a free state machine, room for its
//! program and its pins, shares program memory between state machines running
//! the same program, and moves buffers through the FIFOs.
//!
//! Register access goes through the [`PioHardware`] trait. Enable the
//! `rp2040` feature for the implementation on top of `rp2040-pac`.
//!
//! NOTE This crate is still under active development. This API will remain volatile until 1.0.0

#![deny(missing_docs)]
#![no_std]

#[cfg(test)]
extern crate std;

/// Log through defmt when the `defmt` feature is enabled.
macro_rules! log {
    ($level:ident, $($arg:tt)+) => {{
        #[cfg(feature = "defmt")]
        defmt::$level!($($arg)+);
        #[cfg(not(feature = "defmt"))]
        let _ = ($($arg)+);
    }};
}

pub mod allocator;
pub mod config;
pub mod error;
pub mod gpio;
pub mod hardware;
pub mod pio;
pub mod registers;

pub use allocator::{AllocatorState, BlockId, Colocate, Placement, NUM_STATE_MACHINES};
pub use config::{ShiftConfig, ShiftDirection, StateMachineConfig, ValidConfig};
pub use error::{Error, IoFault, PinRole, ShiftRegister};
pub use gpio::{PinId, PinSet};
pub use hardware::PioHardware;
pub use crate::pio::{Cancel, FifoWait, NeverCancel, Pio, StateMachine};
