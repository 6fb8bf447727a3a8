//! State machine register images
//!
//! Every state machine is configured through four registers: `SM_CLKDIV`,
//! `SM_EXECCTRL`, `SM_SHIFTCTRL` and `SM_PINCTRL`. The values are computed
//! here, away from any hardware, and written by the controller through
//! [`PioHardware::write_sm_register`](crate::hardware::PioHardware::write_sm_register).
//!
//! See [Chapter 3](https://rptl.io/pico-datasheet) for the field layouts.

use fugit::{HertzU32, RateExtU32};

use crate::config::ValidConfig;
use crate::gpio::PinId;

bitfield::bitfield! {
    /// `SM_CLKDIV`: clock divisor, `INT + FRAC / 256`. An `INT` of 0 means 65536.
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct ClkDiv(u32);
    impl Debug;
    /// Integer part of the divisor.
    pub u16, int, set_int: 31, 16;
    /// Fractional part of the divisor, in 1/256ths.
    pub u8, frac, set_frac: 15, 8;
}

bitfield::bitfield! {
    /// `SM_EXECCTRL`: execution control.
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct ExecCtrl(u32);
    impl Debug;
    /// The most significant side-set bit is an enable.
    pub side_en, set_side_en: 30;
    /// Side-set drives pin directions instead of values.
    pub side_pindir, set_side_pindir: 29;
    /// GPIO tested by `JMP PIN`.
    pub u8, jmp_pin, set_jmp_pin: 28, 24;
    /// Data bit used as an inline write enable.
    pub u8, out_en_sel, set_out_en_sel: 23, 19;
    /// Use [`out_en_sel`](Self::out_en_sel).
    pub inline_out_en, set_inline_out_en: 18;
    /// Continuously assert the most recent `OUT`/`SET` to the pins.
    pub out_sticky, set_out_sticky: 17;
    /// Address after which execution wraps.
    pub u8, wrap_top, set_wrap_top: 16, 12;
    /// Address execution wraps to.
    pub u8, wrap_bottom, set_wrap_bottom: 11, 7;
    /// `MOV x, STATUS` compares the RX level instead of the TX level.
    pub status_sel, set_status_sel: 4;
    /// FIFO level compared by `MOV x, STATUS`.
    pub u8, status_n, set_status_n: 3, 0;
}

bitfield::bitfield! {
    /// `SM_SHIFTCTRL`: shift register and FIFO control.
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct ShiftCtrl(u32);
    impl Debug;
    /// RX FIFO steals the TX FIFO's storage.
    pub fjoin_rx, set_fjoin_rx: 31;
    /// TX FIFO steals the RX FIFO's storage.
    pub fjoin_tx, set_fjoin_tx: 30;
    /// Bits shifted out of the OSR before a pull, 0 encodes 32.
    pub u8, pull_thresh, set_pull_thresh: 29, 25;
    /// Bits shifted into the ISR before a push, 0 encodes 32.
    pub u8, push_thresh, set_push_thresh: 24, 20;
    /// OSR shifts right.
    pub out_shiftdir, set_out_shiftdir: 19;
    /// ISR shifts right.
    pub in_shiftdir, set_in_shiftdir: 18;
    /// Pull automatically when the OSR threshold is reached.
    pub autopull, set_autopull: 17;
    /// Push automatically when the ISR threshold is reached.
    pub autopush, set_autopush: 16;
}

bitfield::bitfield! {
    /// `SM_PINCTRL`: pin mapping.
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct PinCtrl(u32);
    impl Debug;
    /// Number of side-set bits, including the enable bit if any.
    pub u8, sideset_count, set_sideset_count: 31, 29;
    /// Number of pins asserted by `SET`.
    pub u8, set_count, set_set_count: 28, 26;
    /// Number of pins asserted by `OUT`.
    pub u8, out_count, set_out_count: 25, 20;
    /// First pin read by `IN`.
    pub u8, in_base, set_in_base: 19, 15;
    /// First pin driven by side-set.
    pub u8, sideset_base, set_sideset_base: 14, 10;
    /// First pin asserted by `SET`.
    pub u8, set_base, set_set_base: 9, 5;
    /// First pin asserted by `OUT`.
    pub u8, out_base, set_out_base: 4, 0;
}

macro_rules! raw_register {
    ($($name:ident),*) => {
        $(
            impl $name {
                /// Raw register value.
                pub fn bits(&self) -> u32 {
                    self.0
                }
            }
        )*
    };
}
raw_register!(ClkDiv, ExecCtrl, ShiftCtrl, PinCtrl);

impl PinCtrl {
    /// Mapping with a single `SET` pin, used to drive `SET PINDIRS` one pin at a time.
    pub fn single_set_pin(pin: PinId) -> Self {
        let mut pinctrl = PinCtrl::default();
        pinctrl.set_set_base(pin.num());
        pinctrl.set_set_count(1);
        pinctrl
    }
}

/// Per state machine registers written by the controller.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmRegister {
    /// `SM_CLKDIV`
    ClkDiv,
    /// `SM_EXECCTRL`
    ExecCtrl,
    /// `SM_SHIFTCTRL`
    ShiftCtrl,
    /// `SM_PINCTRL`
    PinCtrl,
}

/// Divisor applied to the system clock, in steps of 1/256 from 1.0 to 65536.0.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDivisor {
    // Divisor * 256, in `256..=MAX_DIVISOR_256THS`.
    in_256ths: u32,
}

const MIN_DIVISOR_256THS: u32 = 1 << 8;
const MAX_DIVISOR_256THS: u32 = 1 << 24;

impl ClockDivisor {
    /// Full speed.
    pub const ONE: ClockDivisor = ClockDivisor {
        in_256ths: MIN_DIVISOR_256THS,
    };

    /// The smallest divisor whose resulting rate does not exceed `target`.
    ///
    /// Requests above `system_clock` run at full speed. Returns `None` for a
    /// zero target or one slower than the largest divisor can reach.
    pub fn for_frequency(system_clock: HertzU32, target: HertzU32) -> Option<Self> {
        let system_clock = system_clock.to_Hz() as u64;
        let target = target.to_Hz() as u64;
        if target == 0 {
            return None;
        }
        let in_256ths = ((system_clock << 8) + target - 1) / target;
        if in_256ths > MAX_DIVISOR_256THS as u64 {
            return None;
        }
        Some(ClockDivisor {
            in_256ths: (in_256ths as u32).max(MIN_DIVISOR_256THS),
        })
    }

    /// Divisor from its value in 1/256ths, `256..=16777216`.
    pub fn from_256ths(in_256ths: u32) -> Option<Self> {
        if (MIN_DIVISOR_256THS..=MAX_DIVISOR_256THS).contains(&in_256ths) {
            Some(ClockDivisor { in_256ths })
        } else {
            None
        }
    }

    /// The divisor in 1/256ths.
    pub fn as_256ths(self) -> u32 {
        self.in_256ths
    }

    /// Rate the state machine runs at when clocked from `system_clock`.
    ///
    /// This is truncated to whole hertz.
    pub fn frequency(self, system_clock: HertzU32) -> HertzU32 {
        let rate = ((system_clock.to_Hz() as u64) << 8) / self.in_256ths as u64;
        (rate as u32).Hz()
    }

    /// `SM_CLKDIV` image.
    pub fn register(self) -> ClkDiv {
        let mut clkdiv = ClkDiv::default();
        // 65536.0 wraps to an integer part of 0, which the hardware reads as 65536.
        clkdiv.set_int((self.in_256ths >> 8) as u16);
        clkdiv.set_frac(self.in_256ths as u8);
        clkdiv
    }
}

/// Register images for one state machine running a validated configuration.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmRegisters {
    /// `SM_CLKDIV`
    pub clkdiv: ClkDiv,
    /// `SM_EXECCTRL`
    pub execctrl: ExecCtrl,
    /// `SM_SHIFTCTRL`
    pub shiftctrl: ShiftCtrl,
    /// `SM_PINCTRL`
    pub pinctrl: PinCtrl,
}

impl SmRegisters {
    /// Encode `config` with its program loaded at `offset` and clocked by `divisor`.
    pub fn new(config: &ValidConfig<'_>, offset: u8, divisor: ClockDivisor) -> Self {
        let mut execctrl = ExecCtrl::default();
        execctrl.set_wrap_bottom(offset);
        execctrl.set_wrap_top(offset + config.program().len() as u8 - 1);

        let out_shift = config.out_shift();
        let in_shift = config.in_shift();
        let mut shiftctrl = ShiftCtrl::default();
        // A threshold of 32 is encoded as 0.
        shiftctrl.set_pull_thresh(out_shift.threshold & 0x1f);
        shiftctrl.set_push_thresh(in_shift.threshold & 0x1f);
        shiftctrl.set_out_shiftdir(out_shift.direction.bit());
        shiftctrl.set_in_shiftdir(in_shift.direction.bit());
        shiftctrl.set_autopull(out_shift.auto);
        shiftctrl.set_autopush(in_shift.auto);

        let mut pinctrl = PinCtrl::default();
        pinctrl.set_sideset_count(config.side_set_pins().hw_count());
        pinctrl.set_set_count(config.set_pins().hw_count());
        pinctrl.set_out_count(config.out_pins().hw_count());
        pinctrl.set_in_base(config.in_pins().base());
        pinctrl.set_sideset_base(config.side_set_pins().base());
        pinctrl.set_set_base(config.set_pins().base());
        pinctrl.set_out_base(config.out_pins().base());

        SmRegisters {
            clkdiv: divisor.register(),
            execctrl,
            shiftctrl,
            pinctrl,
        }
    }
}
