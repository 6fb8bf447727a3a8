//! Shared PIO resource allocation
//!
//! Both PIO blocks, their program memory, their state machine slots and the
//! GPIOs routed to them are shared between every user of the peripheral.
//! [`AllocatorState`] is the single table recording who holds what. It is a
//! plain value: [`Pio`](crate::Pio) keeps one behind a critical section, tests
//! can build a fresh one and drive it directly.
//!
//! Each block holds at most one resident program, loaded at offset 0 and
//! reference counted across the state machines running it. A block whose
//! memory holds a different program is never evicted, it is skipped.

use crate::config::{Program, ValidConfig, PIO_INSTRUCTION_COUNT};
use crate::error::Error;
use crate::gpio::{PinId, PinSet, NUM_BANK0_GPIOS};

/// Number of state machines in each PIO block.
pub const NUM_STATE_MACHINES: u8 = 4;

const ALL_SLOTS: u8 = (1 << NUM_STATE_MACHINES) - 1;

/// One of the two PIO blocks.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockId {
    /// PIO0
    Pio0,
    /// PIO1
    Pio1,
}

impl BlockId {
    /// Both blocks, in hardware order.
    pub const ALL: [BlockId; 2] = [BlockId::Pio0, BlockId::Pio1];

    /// Index of the block, 0 or 1.
    pub const fn index(self) -> usize {
        match self {
            BlockId::Pio0 => 0,
            BlockId::Pio1 => 1,
        }
    }
}

/// Where a new state machine may be placed.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Colocate {
    /// Any block, chosen by the [`Placement`] policy.
    #[default]
    Any,
    /// Only the given block.
    ///
    /// Use [`StateMachine::colocate`](crate::StateMachine::colocate) to place a
    /// state machine next to an existing one.
    Block(BlockId),
}

/// Order in which blocks are tried when the caller does not ask for one.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Placement {
    /// Prefer the block already running an identical program, then the block
    /// with more free state machines, then PIO0.
    #[default]
    ProgramReuse,
    /// Prefer the block with more free state machines, then PIO0.
    MostFreeSlots,
    /// Always try PIO0 first.
    InOrder,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Resident {
    program: Program,
    users: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct BlockState {
    program: Option<Resident>,
    // bit for each occupied state machine
    occupied: u8,
}

impl BlockState {
    const fn new() -> Self {
        BlockState {
            program: None,
            occupied: 0,
        }
    }

    fn free_slots(&self) -> u8 {
        NUM_STATE_MACHINES - self.occupied.count_ones() as u8
    }

    fn lowest_free_slot(&self) -> Option<u8> {
        if self.occupied == ALL_SLOTS {
            None
        } else {
            Some((!self.occupied).trailing_zeros() as u8)
        }
    }

    fn holds(&self, program: &Program) -> bool {
        matches!(&self.program, Some(resident) if resident.program == *program)
    }

    fn can_run(&self, program: &Program) -> bool {
        self.program.is_none() || self.holds(program)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct PinClaim {
    block: BlockId,
    users: u8,
    exclusive: bool,
}

/// Resources held by one state machine, handed back to [`AllocatorState::release`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reservation holds PIO resources until it is released"]
pub struct Reservation {
    block: BlockId,
    index: u8,
    pins: PinSet,
    exclusive: bool,
    load_program: bool,
}

impl Reservation {
    /// Block the state machine lives in.
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Index of the state machine within its block.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Every pin claimed for the state machine.
    pub fn pins(&self) -> PinSet {
        self.pins
    }

    /// Whether the pins are claimed exclusively.
    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    /// Whether the program was not resident yet and has to be written to the block.
    pub fn load_program(&self) -> bool {
        self.load_program
    }
}

/// What became free when a [`Reservation`] was released.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Released {
    /// Pins no state machine claims any more.
    pub pins: PinSet,
    /// The block's program memory is free again.
    pub program_unloaded: bool,
}

/// Allocation table for both PIO blocks and the bank 0 GPIOs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocatorState {
    blocks: [BlockState; 2],
    pins: [Option<PinClaim>; NUM_BANK0_GPIOS as usize],
    peripheral_pins: PinSet,
}

impl Default for AllocatorState {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocatorState {
    /// Nothing allocated.
    pub const fn new() -> Self {
        AllocatorState {
            blocks: [BlockState::new(), BlockState::new()],
            pins: [None; NUM_BANK0_GPIOS as usize],
            peripheral_pins: PinSet::EMPTY,
        }
    }

    /// Reserve a state machine slot, program memory and pins for `config`.
    ///
    /// Either everything is reserved or, on error, nothing changes.
    pub fn reserve(
        &mut self,
        config: &ValidConfig<'_>,
        colocate: Colocate,
        placement: Placement,
    ) -> Result<Reservation, Error> {
        let program = config.program();
        let pins = config.pins();
        let exclusive = config.exclusive_pin_use();

        let candidates = match colocate {
            Colocate::Block(block) => [Some(block), None],
            Colocate::Any => {
                let [first, second] = self.block_order(placement, program);
                [Some(first), Some(second)]
            }
        };

        for block in candidates.into_iter().flatten() {
            let state = &self.blocks[block.index()];
            let index = match state.lowest_free_slot() {
                Some(index) => index,
                None => continue,
            };
            if !state.can_run(program) || !self.pins_available(block, pins, exclusive) {
                continue;
            }
            return Ok(self.commit(block, index, program, pins, exclusive));
        }

        Err(Error::NoResourceAvailable)
    }

    /// Give back everything held by `reservation`.
    pub fn release(&mut self, reservation: Reservation) -> Released {
        let state = &mut self.blocks[reservation.block.index()];
        state.occupied &= !(1 << reservation.index);

        let mut program_unloaded = false;
        if let Some(resident) = &mut state.program {
            resident.users -= 1;
            if resident.users == 0 {
                state.program = None;
                program_unloaded = true;
            }
        }

        let mut pins = PinSet::EMPTY;
        for pin in reservation.pins {
            let slot = &mut self.pins[pin.num() as usize];
            if let Some(claim) = slot {
                claim.users -= 1;
                if claim.users == 0 {
                    *slot = None;
                    pins.insert(pin);
                }
            }
        }

        Released {
            pins,
            program_unloaded,
        }
    }

    /// Keep `pins` away from every state machine while another peripheral uses them.
    pub fn reserve_peripheral_pins(&mut self, pins: PinSet) -> Result<(), Error> {
        let conflicts = pins.intersection(self.claimed_pins().union(self.peripheral_pins));
        if !conflicts.is_empty() {
            return Err(Error::PinInUse { pins: conflicts });
        }
        self.peripheral_pins = self.peripheral_pins.union(pins);
        Ok(())
    }

    /// Hand pins reserved with [`Self::reserve_peripheral_pins`] back.
    pub fn release_peripheral_pins(&mut self, pins: PinSet) {
        self.peripheral_pins = self.peripheral_pins.difference(pins);
    }

    /// Pins reserved for other peripherals.
    pub fn peripheral_pins(&self) -> PinSet {
        self.peripheral_pins
    }

    /// Pins claimed by any state machine.
    pub fn claimed_pins(&self) -> PinSet {
        self.claimed_pins_matching(|_| true)
    }

    /// Pins claimed by state machines of `block`.
    pub fn claimed_pins_in(&self, block: BlockId) -> PinSet {
        self.claimed_pins_matching(|claim| claim.block == block)
    }

    /// Number of state machines running the program resident in `block`.
    pub fn program_users(&self, block: BlockId) -> u8 {
        self.blocks[block.index()]
            .program
            .map(|resident| resident.users)
            .unwrap_or(0)
    }

    /// The program resident in `block`, if any.
    pub fn resident_program(&self, block: BlockId) -> Option<&Program> {
        self.blocks[block.index()]
            .program
            .as_ref()
            .map(|resident| &resident.program)
    }

    /// Instruction memory in use, one bit per instruction slot.
    pub fn used_instruction_space(&self, block: BlockId) -> u32 {
        match self.resident_program(block) {
            Some(program) if program.len() >= PIO_INSTRUCTION_COUNT => u32::MAX,
            Some(program) => (1 << program.len()) - 1,
            None => 0,
        }
    }

    /// Number of unoccupied state machines in `block`.
    pub fn free_slots(&self, block: BlockId) -> u8 {
        self.blocks[block.index()].free_slots()
    }

    /// Whether state machine `index` of `block` is in use.
    pub fn is_slot_occupied(&self, block: BlockId, index: u8) -> bool {
        index < NUM_STATE_MACHINES && self.blocks[block.index()].occupied & (1 << index) != 0
    }

    fn claimed_pins_matching(&self, filter: impl Fn(&PinClaim) -> bool) -> PinSet {
        let mut pins = PinSet::EMPTY;
        for (num, claim) in self.pins.iter().enumerate() {
            if let Some(claim) = claim {
                if filter(claim) {
                    if let Some(pin) = PinId::new(num as u8) {
                        pins.insert(pin);
                    }
                }
            }
        }
        pins
    }

    fn block_order(&self, placement: Placement, program: &Program) -> [BlockId; 2] {
        let [pio0, pio1] = BlockId::ALL;
        let (state0, state1) = (&self.blocks[0], &self.blocks[1]);
        let more_free = state1.free_slots() > state0.free_slots();
        let prefer_pio1 = match placement {
            Placement::InOrder => false,
            Placement::MostFreeSlots => more_free,
            Placement::ProgramReuse => match (state0.holds(program), state1.holds(program)) {
                (false, true) => true,
                (true, false) => false,
                _ => more_free,
            },
        };
        if prefer_pio1 {
            [pio1, pio0]
        } else {
            [pio0, pio1]
        }
    }

    fn pins_available(&self, block: BlockId, pins: PinSet, exclusive: bool) -> bool {
        if !pins.intersection(self.peripheral_pins).is_empty() {
            return false;
        }
        pins.iter()
            .all(|pin| match &self.pins[pin.num() as usize] {
                None => true,
                Some(claim) => claim.block == block && !exclusive && !claim.exclusive,
            })
    }

    fn commit(
        &mut self,
        block: BlockId,
        index: u8,
        program: &Program,
        pins: PinSet,
        exclusive: bool,
    ) -> Reservation {
        let state = &mut self.blocks[block.index()];
        state.occupied |= 1 << index;

        let load_program = match &mut state.program {
            Some(resident) => {
                resident.users += 1;
                false
            }
            None => {
                state.program = Some(Resident {
                    program: *program,
                    users: 1,
                });
                true
            }
        };

        for pin in pins {
            let slot = &mut self.pins[pin.num() as usize];
            match slot {
                Some(claim) => claim.users += 1,
                None => {
                    *slot = Some(PinClaim {
                        block,
                        users: 1,
                        exclusive,
                    })
                }
            }
        }

        Reservation {
            block,
            index,
            pins,
            exclusive,
            load_program,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateMachineConfig;
    use fugit::RateExtU32;

    const BLINK: [u8; 4] = [0x01, 0xe0, 0x00, 0x00];
    const OTHER: [u8; 4] = [0x02, 0xe0, 0x00, 0x00];
    const FULL: [u8; 64] = [0x42; 64];

    fn pin(num: u8) -> PinId {
        PinId::new(num).unwrap()
    }

    fn config(program: &[u8], first: u8, count: u8, exclusive: bool) -> ValidConfig<'_> {
        StateMachineConfig::new(program, 1_000_000.Hz())
            .out_pins(Some(pin(first)), count)
            .exclusive_pin_use(exclusive)
            .validate()
            .unwrap()
    }

    fn no_pins(program: &[u8]) -> ValidConfig<'_> {
        StateMachineConfig::new(program, 1_000_000.Hz())
            .validate()
            .unwrap()
    }

    fn reserve(state: &mut AllocatorState, config: &ValidConfig<'_>) -> Result<Reservation, Error> {
        state.reserve(config, Colocate::Any, Placement::default())
    }

    #[test]
    fn identical_programs_share_a_block() {
        let mut state = AllocatorState::new();
        let a = reserve(&mut state, &config(&BLINK, 0, 1, true)).unwrap();
        let b = reserve(&mut state, &config(&BLINK, 1, 1, true)).unwrap();
        assert_eq!(a.block(), b.block());
        assert!(a.load_program());
        assert!(!b.load_program());
        assert!(a.exclusive());
        assert_eq!((a.index(), b.index()), (0, 1));
        assert_eq!(state.program_users(a.block()), 2);
        assert_eq!(state.used_instruction_space(a.block()), 0b11);
    }

    #[test]
    fn full_memory_is_shared_by_identical_programs() {
        let mut state = AllocatorState::new();
        let a = reserve(&mut state, &no_pins(&FULL)).unwrap();
        let b = reserve(&mut state, &no_pins(&FULL)).unwrap();
        assert_eq!(a.block(), b.block());
        assert_eq!(state.used_instruction_space(a.block()), u32::MAX);
        assert_eq!(state.program_users(a.block()), 2);
    }

    #[test]
    fn different_program_goes_to_the_other_block() {
        let mut state = AllocatorState::new();
        let a = reserve(&mut state, &no_pins(&BLINK)).unwrap();
        let b = reserve(&mut state, &no_pins(&OTHER)).unwrap();
        assert_ne!(a.block(), b.block());
        assert!(b.load_program());

        // Both blocks hold something else now.
        assert_eq!(
            reserve(&mut state, &no_pins(&FULL)).unwrap_err(),
            Error::NoResourceAvailable
        );
    }

    #[test]
    fn fifth_state_machine_spills_into_the_other_block() {
        let mut state = AllocatorState::new();
        let mut held = [None, None, None, None];
        for slot in held.iter_mut() {
            *slot = Some(reserve(&mut state, &no_pins(&BLINK)).unwrap());
        }
        assert_eq!(state.free_slots(BlockId::Pio0), 0);
        let fifth = reserve(&mut state, &no_pins(&BLINK)).unwrap();
        assert_eq!(fifth.block(), BlockId::Pio1);
        assert!(fifth.load_program());
        assert_eq!(fifth.index(), 0);
    }

    #[test]
    fn lowest_free_slot_is_reused() {
        let mut state = AllocatorState::new();
        let a = reserve(&mut state, &no_pins(&BLINK)).unwrap();
        let _b = reserve(&mut state, &no_pins(&BLINK)).unwrap();
        state.release(a);
        let c = reserve(&mut state, &no_pins(&BLINK)).unwrap();
        assert_eq!(c.index(), 0);
    }

    #[test]
    fn colocation_restricts_to_one_block() {
        let mut state = AllocatorState::new();
        let a = reserve(&mut state, &no_pins(&BLINK)).unwrap();
        let before = state.clone();
        assert_eq!(
            state
                .reserve(&no_pins(&OTHER), Colocate::Block(a.block()), Placement::default())
                .unwrap_err(),
            Error::NoResourceAvailable
        );
        assert_eq!(state, before);

        let b = state
            .reserve(&no_pins(&BLINK), Colocate::Block(BlockId::Pio1), Placement::default())
            .unwrap();
        assert_eq!(b.block(), BlockId::Pio1);
    }

    #[test]
    fn placement_policies() {
        let mut state = AllocatorState::new();
        // PIO0: two users of BLINK. PIO1: one user of OTHER.
        let _a = reserve(&mut state, &no_pins(&BLINK)).unwrap();
        let _b = reserve(&mut state, &no_pins(&BLINK)).unwrap();
        let _c = reserve(&mut state, &no_pins(&OTHER)).unwrap();
        let d = state
            .reserve(&no_pins(&OTHER), Colocate::Any, Placement::ProgramReuse)
            .unwrap();
        assert_eq!(d.block(), BlockId::Pio1);

        let mut state = AllocatorState::new();
        let a = state
            .reserve(&no_pins(&BLINK), Colocate::Block(BlockId::Pio1), Placement::InOrder)
            .unwrap();
        state.release(a);
        let _b = state
            .reserve(&no_pins(&BLINK), Colocate::Block(BlockId::Pio1), Placement::InOrder)
            .unwrap();
        // PIO1 has fewer free slots, but InOrder and ProgramReuse disagree with MostFreeSlots.
        let in_order = state.clone().reserve(&no_pins(&BLINK), Colocate::Any, Placement::InOrder);
        assert_eq!(in_order.unwrap().block(), BlockId::Pio0);
        let reuse = state
            .clone()
            .reserve(&no_pins(&BLINK), Colocate::Any, Placement::ProgramReuse);
        assert_eq!(reuse.unwrap().block(), BlockId::Pio1);
        let free = state.reserve(&no_pins(&BLINK), Colocate::Any, Placement::MostFreeSlots);
        assert_eq!(free.unwrap().block(), BlockId::Pio0);
    }

    #[test]
    fn exclusive_pins_conflict_in_every_block() {
        let mut state = AllocatorState::new();
        let _a = reserve(&mut state, &config(&BLINK, 5, 1, true)).unwrap();
        let before = state.clone();
        assert_eq!(
            reserve(&mut state, &config(&OTHER, 4, 2, true)).unwrap_err(),
            Error::NoResourceAvailable
        );
        assert_eq!(
            reserve(&mut state, &config(&BLINK, 5, 1, false)).unwrap_err(),
            Error::NoResourceAvailable
        );
        assert_eq!(state, before);
        let _c = reserve(&mut state, &config(&OTHER, 6, 2, true)).unwrap();
    }

    #[test]
    fn shared_pins_stay_within_one_block() {
        let mut state = AllocatorState::new();
        let a = reserve(&mut state, &config(&BLINK, 5, 1, false)).unwrap();
        let b = reserve(&mut state, &config(&BLINK, 5, 1, false)).unwrap();
        assert_eq!(a.block(), b.block());
        assert!(!a.exclusive() && !b.exclusive());
        assert_eq!(state.claimed_pins_in(a.block()), PinSet::from(pin(5)));

        // OTHER cannot load next to BLINK and pin 5 belongs to the first block.
        assert_eq!(
            reserve(&mut state, &config(&OTHER, 5, 1, false)).unwrap_err(),
            Error::NoResourceAvailable
        );
        // An exclusive claim cannot join a shared pin either.
        assert_eq!(
            reserve(&mut state, &config(&BLINK, 5, 1, true)).unwrap_err(),
            Error::NoResourceAvailable
        );
    }

    #[test]
    fn pins_are_freed_with_their_last_user() {
        let mut state = AllocatorState::new();
        let a = reserve(&mut state, &config(&BLINK, 5, 2, false)).unwrap();
        let b = reserve(&mut state, &config(&BLINK, 6, 2, false)).unwrap();

        let released = state.release(a);
        assert_eq!(released.pins, PinSet::from(pin(5)));
        assert!(!released.program_unloaded);
        assert_eq!(state.claimed_pins(), PinSet::consecutive(pin(6), 2));

        let released = state.release(b);
        assert_eq!(released.pins, PinSet::consecutive(pin(6), 2));
        assert!(released.program_unloaded);
        assert_eq!(state, AllocatorState::new());
    }

    #[test]
    fn overlapping_roles_claim_a_pin_once() {
        let mut state = AllocatorState::new();
        let config = StateMachineConfig::new(&BLINK, 1_000_000.Hz())
            .out_pins(Some(pin(3)), 2)
            .set_pins(Some(pin(3)), 1)
            .side_set_pins(Some(pin(4)), 1)
            .validate()
            .unwrap();
        let a = reserve(&mut state, &config).unwrap();
        assert_eq!(a.pins(), PinSet::consecutive(pin(3), 2));
        state.release(a);
        assert_eq!(state.claimed_pins(), PinSet::EMPTY);
    }

    #[test]
    fn peripheral_pins_are_never_shared() {
        let mut state = AllocatorState::new();
        state
            .reserve_peripheral_pins(PinSet::consecutive(pin(0), 2))
            .unwrap();
        assert_eq!(
            reserve(&mut state, &config(&BLINK, 1, 1, false)).unwrap_err(),
            Error::NoResourceAvailable
        );

        let a = reserve(&mut state, &config(&BLINK, 2, 1, false)).unwrap();
        assert_eq!(
            state.reserve_peripheral_pins(PinSet::consecutive(pin(1), 3)),
            Err(Error::PinInUse {
                pins: PinSet::consecutive(pin(1), 2)
            })
        );
        state.release(a);
        state.release_peripheral_pins(PinSet::consecutive(pin(0), 2));
        assert_eq!(state.peripheral_pins(), PinSet::EMPTY);
        let _a = reserve(&mut state, &config(&BLINK, 0, 3, true)).unwrap();
    }

    #[test]
    fn slot_queries() {
        let mut state = AllocatorState::new();
        let a = reserve(&mut state, &no_pins(&BLINK)).unwrap();
        assert!(state.is_slot_occupied(a.block(), 0));
        assert!(!state.is_slot_occupied(a.block(), 1));
        assert!(!state.is_slot_occupied(a.block(), 7));
        assert_eq!(state.free_slots(a.block()), 3);
        assert_eq!(state.resident_program(BlockId::Pio1), None);
    }
}
