//! Register access seam
//!
//! Every hardware access made by [`Pio`](crate::Pio) and its state machines
//! goes through [`PioHardware`]. The allocator decides what may be touched;
//! implementations only have to perform the access.
//!
//! With the `rp2040` feature, [`rp2040::Rp2040Pio`] implements the trait on top
//! of the `rp2040-pac` register blocks.

use fugit::HertzU32;

use crate::allocator::BlockId;
use crate::error::IoFault;
use crate::gpio::PinSet;
use crate::registers::SmRegister;

#[cfg(feature = "rp2040")]
pub mod rp2040;

/// Access to the registers of both PIO blocks and the GPIO routing.
///
/// `index` is a state machine index in `0..4`. `mask` has one bit per state
/// machine of the block, bit 0 for state machine 0.
///
/// Methods take `&self`: a single [`Pio`](crate::Pio) is shared by every state
/// machine it hands out, and never accesses the same state machine from two
/// places at once.
pub trait PioHardware {
    /// Frequency of the clock feeding the PIO blocks.
    fn system_clock(&self) -> HertzU32;

    /// Write `code` into the instruction memory of `block`, starting at `offset`.
    fn load_program(&self, block: BlockId, offset: u8, code: &[u16]);

    /// Write one of the configuration registers of a state machine.
    fn write_sm_register(&self, block: BlockId, index: u8, register: SmRegister, value: u32);

    /// Enable or disable the state machines in `mask`, leaving the others untouched.
    fn set_enabled(&self, block: BlockId, mask: u8, enabled: bool);

    /// Restart the state machines in `mask` and their clock dividers in a single write.
    fn restart(&self, block: BlockId, mask: u8);

    /// Drop anything in both FIFOs of a state machine and clear its FIFO debug flags.
    fn clear_fifos(&self, block: BlockId, index: u8);

    /// Execute `instruction` immediately on a state machine.
    fn exec(&self, block: BlockId, index: u8, instruction: u16);

    /// Push a word into the TX FIFO.
    ///
    /// Returns [`nb::Error::WouldBlock`] while the FIFO is full.
    fn push_tx(&self, block: BlockId, index: u8, word: u32) -> nb::Result<(), IoFault>;

    /// Pull a word from the RX FIFO.
    ///
    /// Returns [`nb::Error::WouldBlock`] while the FIFO is empty.
    fn pull_rx(&self, block: BlockId, index: u8) -> nb::Result<u32, IoFault>;

    /// Whether the TX FIFO is empty.
    fn tx_empty(&self, block: BlockId, index: u8) -> bool;

    /// Route `pins` to `block`.
    fn connect_pins(&self, block: BlockId, pins: PinSet);

    /// Detach `pins` from whichever PIO block drives them.
    fn disconnect_pins(&self, pins: PinSet);
}

impl<H: PioHardware + ?Sized> PioHardware for &H {
    fn system_clock(&self) -> HertzU32 {
        (**self).system_clock()
    }

    fn load_program(&self, block: BlockId, offset: u8, code: &[u16]) {
        (**self).load_program(block, offset, code)
    }

    fn write_sm_register(&self, block: BlockId, index: u8, register: SmRegister, value: u32) {
        (**self).write_sm_register(block, index, register, value)
    }

    fn set_enabled(&self, block: BlockId, mask: u8, enabled: bool) {
        (**self).set_enabled(block, mask, enabled)
    }

    fn restart(&self, block: BlockId, mask: u8) {
        (**self).restart(block, mask)
    }

    fn clear_fifos(&self, block: BlockId, index: u8) {
        (**self).clear_fifos(block, index)
    }

    fn exec(&self, block: BlockId, index: u8, instruction: u16) {
        (**self).exec(block, index, instruction)
    }

    fn push_tx(&self, block: BlockId, index: u8, word: u32) -> nb::Result<(), IoFault> {
        (**self).push_tx(block, index, word)
    }

    fn pull_rx(&self, block: BlockId, index: u8) -> nb::Result<u32, IoFault> {
        (**self).pull_rx(block, index)
    }

    fn tx_empty(&self, block: BlockId, index: u8) -> bool {
        (**self).tx_empty(block, index)
    }

    fn connect_pins(&self, block: BlockId, pins: PinSet) {
        (**self).connect_pins(block, pins)
    }

    fn disconnect_pins(&self, pins: PinSet) {
        (**self).disconnect_pins(pins)
    }
}
