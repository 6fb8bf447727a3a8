//! RP2040 register backend
//!
//! See [Chapter 3](https://rptl.io/pico-datasheet) for the PIO registers and
//! [Chapter 2 Section 19](https://rptl.io/pico-datasheet) for GPIO function
//! selection.
//!
//! ```ignore
//! use fugit::RateExtU32;
//! use rp_pio::{hardware::rp2040::Rp2040Pio, Pio};
//! use rp2040_pac as pac;
//!
//! let mut peripherals = pac::Peripherals::take().unwrap();
//! let hardware = Rp2040Pio::new(
//!     peripherals.PIO0,
//!     peripherals.PIO1,
//!     peripherals.IO_BANK0,
//!     peripherals.PADS_BANK0,
//!     &mut peripherals.RESETS,
//!     125.MHz(),
//! );
//! let pio = Pio::new(hardware);
//! ```

use core::ptr::write_volatile;

use fugit::HertzU32;
use rp2040_pac as pac;

use super::PioHardware;
use crate::allocator::BlockId;
use crate::error::IoFault;
use crate::gpio::PinSet;
use crate::registers::SmRegister;

// Bit offsets of the per state machine fields of CTRL and FDEBUG.
const CTRL_SM_RESTART: u32 = 4;
const CTRL_CLKDIV_RESTART: u32 = 8;
const FDEBUG_RXUNDER: u32 = 8;
const FDEBUG_TXOVER: u32 = 16;

mod private {
    use rp2040_pac as pac;

    pub trait SubsystemReset {
        fn reset_bring_up(&self, resets: &mut pac::RESETS);
        fn reset_bring_down(&self, resets: &mut pac::RESETS);
    }
}

use private::SubsystemReset;

macro_rules! generate_reset {
    ($MODULE:ident, $module:ident) => {
        impl SubsystemReset for pac::$MODULE {
            fn reset_bring_up(&self, resets: &mut pac::RESETS) {
                resets.reset().modify(|_, w| w.$module().clear_bit());
                while resets.reset_done().read().$module().bit_is_clear() {}
            }
            fn reset_bring_down(&self, resets: &mut pac::RESETS) {
                resets.reset().modify(|_, w| w.$module().set_bit());
            }
        }
    };
}

generate_reset!(PIO1, pio1);
generate_reset!(PIO0, pio0);

/// Perform atomic bitmask set operation on register
///
/// See [section 2.1.2 of the RP2040 datasheet][section_2_1_2] for details.
///
/// [section_2_1_2]: https://datasheets.raspberrypi.com/rp2040/rp2040-datasheet.pdf#atomic-rwtype
///
/// # Safety
///
/// In addition to the requirements of [core::ptr::write_volatile],
/// `register` must point to a register providing atomic aliases.
#[inline]
unsafe fn write_bitmask_set(register: *mut u32, bits: u32) {
    let alias = (register as usize + 0x2000) as *mut u32;
    write_volatile(alias, bits);
}

/// Perform atomic bitmask clear operation on register
///
/// # Safety
///
/// Same as [`write_bitmask_set`].
#[inline]
unsafe fn write_bitmask_clear(register: *mut u32, bits: u32) {
    let alias = (register as usize + 0x3000) as *mut u32;
    write_volatile(alias, bits);
}

/// Both PIO blocks of an RP2040, with the GPIO bank 0 function routing.
pub struct Rp2040Pio {
    pio0: pac::PIO0,
    pio1: pac::PIO1,
    io_bank0: pac::IO_BANK0,
    pads_bank0: pac::PADS_BANK0,
    system_clock: HertzU32,
}

impl Rp2040Pio {
    /// Take ownership of the peripherals and bring both PIO blocks out of reset.
    ///
    /// `IO_BANK0` and `PADS_BANK0` must already be out of reset, which is the
    /// case once the GPIO bank has been set up.
    pub fn new(
        pio0: pac::PIO0,
        pio1: pac::PIO1,
        io_bank0: pac::IO_BANK0,
        pads_bank0: pac::PADS_BANK0,
        resets: &mut pac::RESETS,
        system_clock: HertzU32,
    ) -> Self {
        pio0.reset_bring_down(resets);
        pio1.reset_bring_down(resets);
        pio0.reset_bring_up(resets);
        pio1.reset_bring_up(resets);

        Rp2040Pio {
            pio0,
            pio1,
            io_bank0,
            pads_bank0,
            system_clock,
        }
    }

    /// Hold both PIO blocks in reset and return the peripherals.
    pub fn free(
        self,
        resets: &mut pac::RESETS,
    ) -> (pac::PIO0, pac::PIO1, pac::IO_BANK0, pac::PADS_BANK0) {
        self.pio0.reset_bring_down(resets);
        self.pio1.reset_bring_down(resets);
        (self.pio0, self.pio1, self.io_bank0, self.pads_bank0)
    }

    fn block(&self, block: BlockId) -> &pac::pio0::RegisterBlock {
        match block {
            BlockId::Pio0 => &self.pio0,
            BlockId::Pio1 => &self.pio1,
        }
    }

    fn sm(&self, block: BlockId, index: u8) -> &pac::pio0::SM {
        self.block(block).sm(index as usize)
    }
}

impl PioHardware for Rp2040Pio {
    fn system_clock(&self) -> HertzU32 {
        self.system_clock
    }

    fn load_program(&self, block: BlockId, offset: u8, code: &[u16]) {
        let regs = self.block(block);
        for (i, instr) in code.iter().enumerate() {
            regs.instr_mem(offset as usize + i)
                .write(|w| unsafe { w.bits(*instr as u32) });
        }
    }

    fn write_sm_register(&self, block: BlockId, index: u8, register: SmRegister, value: u32) {
        let sm = self.sm(block, index);
        // SAFETY: every bit pattern is a valid register value, the images come from `registers`.
        match register {
            SmRegister::ClkDiv => sm.sm_clkdiv().write(|w| unsafe { w.bits(value) }),
            SmRegister::ExecCtrl => sm.sm_execctrl().write(|w| unsafe { w.bits(value) }),
            SmRegister::ShiftCtrl => sm.sm_shiftctrl().write(|w| unsafe { w.bits(value) }),
            SmRegister::PinCtrl => sm.sm_pinctrl().write(|w| unsafe { w.bits(value) }),
        };
    }

    fn set_enabled(&self, block: BlockId, mask: u8, enabled: bool) {
        let ctrl = self.block(block).ctrl().as_ptr();
        // SAFETY: CTRL has atomic aliases; other state machines are left untouched.
        unsafe {
            if enabled {
                write_bitmask_set(ctrl, mask as u32);
            } else {
                write_bitmask_clear(ctrl, mask as u32);
            }
        }
    }

    fn restart(&self, block: BlockId, mask: u8) {
        let ctrl = self.block(block).ctrl().as_ptr();
        let mask = mask as u32;
        // SAFETY: the restart bits are self clearing.
        unsafe {
            write_bitmask_set(
                ctrl,
                (mask << CTRL_SM_RESTART) | (mask << CTRL_CLKDIV_RESTART),
            );
        }
    }

    fn clear_fifos(&self, block: BlockId, index: u8) {
        let sm = self.sm(block, index);
        // Toggling FJOIN_RX twice flushes both FIFOs.
        sm.sm_shiftctrl()
            .modify(|r, w| w.fjoin_rx().bit(!r.fjoin_rx().bit()));
        sm.sm_shiftctrl()
            .modify(|r, w| w.fjoin_rx().bit(!r.fjoin_rx().bit()));

        let sm_mask = 1u32 << index;
        let flags = (sm_mask << FDEBUG_TXOVER) | (sm_mask << FDEBUG_RXUNDER);
        // SAFETY: FDEBUG flags are write-1-to-clear.
        self.block(block)
            .fdebug()
            .write(|w| unsafe { w.bits(flags) });
    }

    fn exec(&self, block: BlockId, index: u8, instruction: u16) {
        self.sm(block, index)
            .sm_instr()
            .write(|w| unsafe { w.sm0_instr().bits(instruction) });
    }

    fn push_tx(&self, block: BlockId, index: u8, word: u32) -> nb::Result<(), IoFault> {
        let regs = self.block(block);
        let sm_mask = 1u8 << index;
        if regs.fstat().read().txfull().bits() & sm_mask != 0 {
            return Err(nb::Error::WouldBlock);
        }
        regs.txf(index as usize).write(|w| unsafe { w.bits(word) });
        if regs.fdebug().read().txover().bits() & sm_mask != 0 {
            let flag = (sm_mask as u32) << FDEBUG_TXOVER;
            regs.fdebug().write(|w| unsafe { w.bits(flag) });
            return Err(nb::Error::Other(IoFault::TxOverflow));
        }
        Ok(())
    }

    fn pull_rx(&self, block: BlockId, index: u8) -> nb::Result<u32, IoFault> {
        let regs = self.block(block);
        let sm_mask = 1u8 << index;
        if regs.fstat().read().rxempty().bits() & sm_mask != 0 {
            return Err(nb::Error::WouldBlock);
        }
        let word = regs.rxf(index as usize).read().bits();
        if regs.fdebug().read().rxunder().bits() & sm_mask != 0 {
            let flag = (sm_mask as u32) << FDEBUG_RXUNDER;
            regs.fdebug().write(|w| unsafe { w.bits(flag) });
            return Err(nb::Error::Other(IoFault::RxUnderflow));
        }
        Ok(word)
    }

    fn tx_empty(&self, block: BlockId, index: u8) -> bool {
        self.block(block).fstat().read().txempty().bits() & (1 << index) != 0
    }

    fn connect_pins(&self, block: BlockId, pins: PinSet) {
        use pac::io_bank0::gpio::gpio_ctrl::FUNCSEL_A;
        let funcsel = match block {
            BlockId::Pio0 => FUNCSEL_A::PIO0,
            BlockId::Pio1 => FUNCSEL_A::PIO1,
        };
        for pin in pins {
            let num = pin.num() as usize;
            self.pads_bank0
                .gpio(num)
                .modify(|_, w| w.ie().set_bit().od().clear_bit());
            self.io_bank0
                .gpio(num)
                .gpio_ctrl()
                .modify(|_, w| w.funcsel().variant(funcsel));
        }
    }

    fn disconnect_pins(&self, pins: PinSet) {
        use pac::io_bank0::gpio::gpio_ctrl::FUNCSEL_A;
        for pin in pins {
            let num = pin.num() as usize;
            self.io_bank0
                .gpio(num)
                .gpio_ctrl()
                .modify(|_, w| w.funcsel().variant(FUNCSEL_A::NULL));
            self.pads_bank0
                .gpio(num)
                .modify(|_, w| w.ie().clear_bit());
        }
    }
}
