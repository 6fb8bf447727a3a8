//! Programmable IO (PIO) state machines
//!
//! See [Chapter 3](https://rptl.io/pico-datasheet) for more details.
//!
//! [`Pio`] owns the register backend and the allocation table for both PIO
//! blocks. Each call to [`Pio::state_machine`] validates a configuration,
//! places it on a free state machine (loading the program only if no other
//! state machine of that block already runs it), starts it and returns a
//! [`StateMachine`] handle. Dropping the handle stops the state machine and
//! releases everything it held.
//!
//! ```
//! use fugit::RateExtU32;
//! use rp_pio::{Colocate, Pio, PioHardware, StateMachineConfig, PinId};
//!
//! # fn demo<H: PioHardware>(hardware: H) -> Result<(), rp_pio::Error> {
//! // set pins, 1 / jmp 0
//! let program = [0x01, 0xe0, 0x00, 0x00];
//! let pio = Pio::new(hardware);
//! let config = StateMachineConfig::new(&program, 1.MHz()).set_pins(PinId::new(25), 1);
//! let mut sm = pio.state_machine(&config, Colocate::Any)?;
//! sm.write(&[0xff; 8], 0, None)?;
//! sm.deinit();
//! # Ok(())
//! # }
//! ```

use core::cell::RefCell;

use critical_section::Mutex;
use fugit::HertzU32;

use crate::allocator::{AllocatorState, BlockId, Colocate, Placement, Reservation};
use crate::config::{ShiftDirection, StateMachineConfig, ValidConfig};
use crate::error::Error;
use crate::gpio::PinSet;
use crate::hardware::PioHardware;
use crate::registers::{ClockDivisor, PinCtrl, SmRegister, SmRegisters};

pub mod transfer;

pub use transfer::{Cancel, FifoWait, NeverCancel};

/// Programs are always loaded at the start of instruction memory.
const PROGRAM_OFFSET: u8 = 0;

fn jmp(address: u8) -> u16 {
    pio::InstructionOperands::JMP {
        condition: pio::JmpCondition::Always,
        address,
    }
    .encode()
}

fn set_pindirs(output: bool) -> u16 {
    pio::InstructionOperands::SET {
        destination: pio::SetDestination::PINDIRS,
        data: output as u8,
    }
    .encode()
}

/// Both PIO blocks, shared by every state machine built from them.
pub struct Pio<H: PioHardware> {
    hardware: H,
    state: Mutex<RefCell<AllocatorState>>,
    fifo_wait: FifoWait,
    placement: Placement,
}

impl<H: PioHardware> core::fmt::Debug for Pio<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Pio")
            .field("fifo_wait", &self.fifo_wait)
            .field("placement", &self.placement)
            .finish_non_exhaustive()
    }
}

impl<H: PioHardware> Pio<H> {
    /// Manage the PIO blocks behind `hardware`, with nothing allocated yet.
    ///
    /// FIFO waits are unbounded and placement follows [`Placement::ProgramReuse`].
    pub fn new(hardware: H) -> Self {
        Pio {
            hardware,
            state: Mutex::new(RefCell::new(AllocatorState::new())),
            fifo_wait: FifoWait::default(),
            placement: Placement::default(),
        }
    }

    /// Set how long transfers wait on a full or empty FIFO.
    pub fn with_fifo_wait(mut self, fifo_wait: FifoWait) -> Self {
        self.fifo_wait = fifo_wait;
        self
    }

    /// Set how blocks are chosen when no colocation is requested.
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// The register backend.
    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    /// Release the register backend.
    pub fn free(self) -> H {
        self.hardware
    }

    /// Validate `config`, place it on a free state machine and start it.
    ///
    /// On error nothing is reserved and no register has been written.
    pub fn state_machine(
        &self,
        config: &StateMachineConfig<'_>,
        colocate: Colocate,
    ) -> Result<StateMachine<'_, H>, Error> {
        let config = config.validate()?;
        let system_clock = self.hardware.system_clock();
        let divisor = ClockDivisor::for_frequency(system_clock, config.frequency()).ok_or(
            Error::InvalidFrequency {
                requested: config.frequency(),
            },
        )?;

        let reservation = critical_section::with(|cs| {
            self.state
                .borrow_ref_mut(cs)
                .reserve(&config, colocate, self.placement)
        })?;
        log!(
            debug,
            "pio: state machine {}:{} reserved, program {}, pins {:#x} exclusive: {}",
            reservation.block(),
            reservation.index(),
            if reservation.load_program() {
                "loaded"
            } else {
                "shared"
            },
            reservation.pins().bits(),
            reservation.exclusive()
        );

        self.activate(&config, &reservation, divisor);

        Ok(StateMachine {
            pio: self,
            block: reservation.block(),
            index: reservation.index(),
            reservation: Some(reservation),
            frequency: divisor.frequency(system_clock),
            out_shift: config.out_shift().direction,
            in_shift: config.in_shift().direction,
        })
    }

    /// Run `f` on a new state machine and deinitialize it afterwards.
    ///
    /// The state machine is also released if `f` panics and unwinds.
    pub fn scoped<R>(
        &self,
        config: &StateMachineConfig<'_>,
        colocate: Colocate,
        f: impl FnOnce(&mut StateMachine<'_, H>) -> R,
    ) -> Result<R, Error> {
        let mut sm = self.state_machine(config, colocate)?;
        let result = f(&mut sm);
        sm.deinit();
        Ok(result)
    }

    /// Keep `pins` away from every state machine while another peripheral drives them.
    ///
    /// Fails with [`Error::PinInUse`] if a state machine or another
    /// reservation already holds any of them.
    pub fn reserve_peripheral_pins(&self, pins: PinSet) -> Result<(), Error> {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).reserve_peripheral_pins(pins))
    }

    /// Hand pins reserved with [`Self::reserve_peripheral_pins`] back.
    pub fn release_peripheral_pins(&self, pins: PinSet) {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).release_peripheral_pins(pins))
    }

    /// Number of state machines running the program resident in `block`.
    pub fn program_users(&self, block: BlockId) -> u8 {
        self.with_state(|state| state.program_users(block))
    }

    /// Instruction memory of `block` in use, one bit per instruction slot.
    pub fn used_instruction_space(&self, block: BlockId) -> u32 {
        self.with_state(|state| state.used_instruction_space(block))
    }

    /// Number of state machines of `block` not in use.
    pub fn free_slots(&self, block: BlockId) -> u8 {
        self.with_state(|state| state.free_slots(block))
    }

    /// Whether state machine `index` of `block` is in use.
    pub fn is_slot_occupied(&self, block: BlockId, index: u8) -> bool {
        self.with_state(|state| state.is_slot_occupied(block, index))
    }

    /// Pins claimed by any state machine.
    pub fn claimed_pins(&self) -> PinSet {
        self.with_state(|state| state.claimed_pins())
    }

    fn with_state<R>(&self, f: impl FnOnce(&AllocatorState) -> R) -> R {
        critical_section::with(|cs| f(&self.state.borrow_ref(cs)))
    }

    fn activate(&self, config: &ValidConfig<'_>, reservation: &Reservation, divisor: ClockDivisor) {
        let hw = &self.hardware;
        let (block, index) = (reservation.block(), reservation.index());
        let mask = 1 << index;

        hw.set_enabled(block, mask, false);

        if reservation.load_program() {
            hw.load_program(block, PROGRAM_OFFSET, config.program().code());
        }
        hw.connect_pins(block, reservation.pins());

        let registers = SmRegisters::new(config, PROGRAM_OFFSET, divisor);
        hw.write_sm_register(block, index, SmRegister::ClkDiv, registers.clkdiv.bits());
        hw.write_sm_register(block, index, SmRegister::ExecCtrl, registers.execctrl.bits());
        hw.write_sm_register(block, index, SmRegister::ShiftCtrl, registers.shiftctrl.bits());

        // Pin directions are set one pin at a time with SET PINDIRS, which
        // needs a temporary single pin SET mapping.
        let outputs = config.output_pins();
        for pin in config.pins() {
            hw.write_sm_register(
                block,
                index,
                SmRegister::PinCtrl,
                PinCtrl::single_set_pin(pin).bits(),
            );
            hw.exec(block, index, set_pindirs(outputs.contains(pin)));
        }
        hw.write_sm_register(block, index, SmRegister::PinCtrl, registers.pinctrl.bits());

        hw.clear_fifos(block, index);
        hw.restart(block, mask);
        hw.exec(block, index, jmp(PROGRAM_OFFSET));

        for instruction in config.init().instructions() {
            hw.exec(block, index, instruction);
        }

        hw.set_enabled(block, mask, true);
    }
}

/// A running state machine.
///
/// Created by [`Pio::state_machine`]. Every operation fails with
/// [`Error::Deinitialized`] once [`StateMachine::deinit`] has been called.
pub struct StateMachine<'p, H: PioHardware> {
    pio: &'p Pio<H>,
    block: BlockId,
    index: u8,
    reservation: Option<Reservation>,
    frequency: HertzU32,
    out_shift: ShiftDirection,
    in_shift: ShiftDirection,
}

impl<H: PioHardware> core::fmt::Debug for StateMachine<'_, H> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("StateMachine")
            .field("block", &self.block)
            .field("index", &self.index)
            .field("alive", &self.is_alive())
            .field("frequency", &self.frequency)
            .finish()
    }
}

impl<'p, H: PioHardware> StateMachine<'p, H> {
    /// Block the state machine runs in.
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Index of the state machine within its block.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Whether [`Self::deinit`] has not been called yet.
    pub fn is_alive(&self) -> bool {
        self.reservation.is_some()
    }

    /// Pins claimed by this state machine.
    pub fn pins(&self) -> Result<PinSet, Error> {
        Ok(self.live()?.pins())
    }

    /// Placement hint for a state machine that must share this one's block.
    pub fn colocate(&self) -> Result<Colocate, Error> {
        self.live()?;
        Ok(Colocate::Block(self.block))
    }

    /// Actual clock rate of the state machine.
    ///
    /// This is the fastest rate the clock divider can reach without exceeding
    /// the requested frequency.
    pub fn frequency(&self) -> Result<HertzU32, Error> {
        self.live()?;
        Ok(self.frequency)
    }

    /// Restart this state machine and `others` together.
    ///
    /// Every state machine resumes at the start of its program with a
    /// restarted clock divider. The init program is not run again.
    pub fn restart(&self, others: &[&StateMachine<'p, H>]) -> Result<(), Error> {
        self.live()?;
        let mut mask = 1u8 << self.index;
        for other in others {
            other.live()?;
            if !core::ptr::eq(self.pio, other.pio) || other.block != self.block {
                return Err(Error::NotColocated);
            }
            mask |= 1 << other.index;
        }

        let hw = &self.pio.hardware;
        hw.set_enabled(self.block, mask, false);
        hw.restart(self.block, mask);
        for index in (0..crate::allocator::NUM_STATE_MACHINES).filter(|i| mask & (1 << i) != 0) {
            hw.exec(self.block, index, jmp(PROGRAM_OFFSET));
        }
        hw.set_enabled(self.block, mask, true);
        log!(trace, "pio: restarted {:b} in {}", mask, self.block);
        Ok(())
    }

    /// Stop the state machine and release its slot, program and pins.
    ///
    /// Pins no other state machine uses are detached from the PIO. Calling
    /// this again does nothing.
    pub fn deinit(&mut self) {
        let Some(reservation) = self.reservation.take() else {
            return;
        };
        let pio = self.pio;
        pio.hardware.set_enabled(self.block, 1 << self.index, false);
        let released = critical_section::with(|cs| {
            let released = pio.state.borrow_ref_mut(cs).release(reservation);
            if !released.pins.is_empty() {
                pio.hardware.disconnect_pins(released.pins);
            }
            released
        });
        log!(
            debug,
            "pio: state machine {}:{} released, program unloaded: {}",
            self.block,
            self.index,
            released.program_unloaded
        );
    }

    fn live(&self) -> Result<&Reservation, Error> {
        self.reservation.as_ref().ok_or(Error::Deinitialized)
    }
}

impl<H: PioHardware> Drop for StateMachine<'_, H> {
    fn drop(&mut self) {
        self.deinit();
    }
}
