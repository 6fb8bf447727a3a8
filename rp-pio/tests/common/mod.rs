//! Recording register backend shared by the integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;

use fugit::{HertzU32, RateExtU32};
use rp_pio::registers::SmRegister;
use rp_pio::{BlockId, IoFault, PinId, PinSet, PioHardware, StateMachineConfig};

pub const SYSTEM_CLOCK_HZ: u32 = 125_000_000;

/// `set pins, 1` / `jmp 0`
pub const BLINK: [u8; 4] = [0x01, 0xe0, 0x00, 0x00];
/// `out pins, 8`
pub const OUT8: [u8; 2] = [0x08, 0x60];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    LoadProgram {
        block: BlockId,
        offset: u8,
        code: Vec<u16>,
    },
    WriteRegister {
        block: BlockId,
        index: u8,
        register: SmRegister,
        value: u32,
    },
    SetEnabled {
        block: BlockId,
        mask: u8,
        enabled: bool,
    },
    Restart {
        block: BlockId,
        mask: u8,
    },
    ClearFifos {
        block: BlockId,
        index: u8,
    },
    Exec {
        block: BlockId,
        index: u8,
        instruction: u16,
    },
    Push {
        block: BlockId,
        index: u8,
        word: u32,
    },
    Pull {
        block: BlockId,
        index: u8,
    },
    Connect {
        block: BlockId,
        pins: PinSet,
    },
    Disconnect {
        pins: PinSet,
    },
}

#[derive(Default)]
struct State {
    events: Vec<Event>,
    enabled: [u8; 2],
    tx: [[VecDeque<u32>; 4]; 2],
    rx: [[VecDeque<u32>; 4]; 2],
    connected: [Option<BlockId>; 30],
    tx_fault: Option<IoFault>,
    rx_fault: Option<IoFault>,
    fifo_polls: usize,
}

/// Records every access. FIFOs are plain queues: nothing consumes the TX
/// FIFO unless a test drains it, nothing fills the RX FIFO unless a test
/// feeds it.
pub struct MockPio {
    state: RefCell<State>,
    tx_capacity: usize,
}

impl MockPio {
    pub fn new() -> Self {
        MockPio {
            state: RefCell::new(State::default()),
            tx_capacity: usize::MAX,
        }
    }

    pub fn with_tx_capacity(mut self, capacity: usize) -> Self {
        self.tx_capacity = capacity;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    pub fn event_count(&self) -> usize {
        self.state.borrow().events.len()
    }

    /// Every FIFO access, including the ones that found the FIFO not ready.
    pub fn fifo_polls(&self) -> usize {
        self.state.borrow().fifo_polls
    }

    pub fn enabled(&self, block: BlockId) -> u8 {
        self.state.borrow().enabled[block.index()]
    }

    pub fn tx_words(&self, block: BlockId, index: u8) -> Vec<u32> {
        self.state.borrow().tx[block.index()][index as usize]
            .iter()
            .copied()
            .collect()
    }

    pub fn drain_tx(&self, block: BlockId, index: u8) {
        self.state.borrow_mut().tx[block.index()][index as usize].clear();
    }

    pub fn feed_rx(&self, block: BlockId, index: u8, words: &[u32]) {
        self.state.borrow_mut().rx[block.index()][index as usize].extend(words.iter().copied());
    }

    pub fn fail_next_push(&self, fault: IoFault) {
        self.state.borrow_mut().tx_fault = Some(fault);
    }

    pub fn fail_next_pull(&self, fault: IoFault) {
        self.state.borrow_mut().rx_fault = Some(fault);
    }

    pub fn connected(&self, pin: PinId) -> Option<BlockId> {
        self.state.borrow().connected[pin.num() as usize]
    }

    pub fn programs_loaded(&self) -> Vec<(BlockId, Vec<u16>)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::LoadProgram { block, code, .. } => Some((block, code)),
                _ => None,
            })
            .collect()
    }

    pub fn executed(&self, block: BlockId, index: u8) -> Vec<u16> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Exec {
                    block: b,
                    index: i,
                    instruction,
                } if b == block && i == index => Some(instruction),
                _ => None,
            })
            .collect()
    }

    /// Last value written to a state machine register.
    pub fn register(&self, block: BlockId, index: u8, register: SmRegister) -> Option<u32> {
        self.events().into_iter().rev().find_map(|event| match event {
            Event::WriteRegister {
                block: b,
                index: i,
                register: r,
                value,
            } if b == block && i == index && r == register => Some(value),
            _ => None,
        })
    }

    fn record(&self, event: Event) {
        self.state.borrow_mut().events.push(event);
    }
}

impl PioHardware for MockPio {
    fn system_clock(&self) -> HertzU32 {
        SYSTEM_CLOCK_HZ.Hz()
    }

    fn load_program(&self, block: BlockId, offset: u8, code: &[u16]) {
        self.record(Event::LoadProgram {
            block,
            offset,
            code: code.to_vec(),
        });
    }

    fn write_sm_register(&self, block: BlockId, index: u8, register: SmRegister, value: u32) {
        self.record(Event::WriteRegister {
            block,
            index,
            register,
            value,
        });
    }

    fn set_enabled(&self, block: BlockId, mask: u8, enabled: bool) {
        self.record(Event::SetEnabled {
            block,
            mask,
            enabled,
        });
        let mut state = self.state.borrow_mut();
        if enabled {
            state.enabled[block.index()] |= mask;
        } else {
            state.enabled[block.index()] &= !mask;
        }
    }

    fn restart(&self, block: BlockId, mask: u8) {
        self.record(Event::Restart { block, mask });
    }

    fn clear_fifos(&self, block: BlockId, index: u8) {
        self.record(Event::ClearFifos { block, index });
        let mut state = self.state.borrow_mut();
        state.tx[block.index()][index as usize].clear();
        state.rx[block.index()][index as usize].clear();
    }

    fn exec(&self, block: BlockId, index: u8, instruction: u16) {
        self.record(Event::Exec {
            block,
            index,
            instruction,
        });
    }

    fn push_tx(&self, block: BlockId, index: u8, word: u32) -> nb::Result<(), IoFault> {
        let mut state = self.state.borrow_mut();
        state.fifo_polls += 1;
        if let Some(fault) = state.tx_fault.take() {
            return Err(nb::Error::Other(fault));
        }
        let fifo = &mut state.tx[block.index()][index as usize];
        if fifo.len() >= self.tx_capacity {
            return Err(nb::Error::WouldBlock);
        }
        fifo.push_back(word);
        state.events.push(Event::Push { block, index, word });
        Ok(())
    }

    fn pull_rx(&self, block: BlockId, index: u8) -> nb::Result<u32, IoFault> {
        let mut state = self.state.borrow_mut();
        state.fifo_polls += 1;
        if let Some(fault) = state.rx_fault.take() {
            return Err(nb::Error::Other(fault));
        }
        let word = state.rx[block.index()][index as usize]
            .pop_front()
            .ok_or(nb::Error::WouldBlock)?;
        state.events.push(Event::Pull { block, index });
        Ok(word)
    }

    fn tx_empty(&self, block: BlockId, index: u8) -> bool {
        let mut state = self.state.borrow_mut();
        state.fifo_polls += 1;
        state.tx[block.index()][index as usize].is_empty()
    }

    fn connect_pins(&self, block: BlockId, pins: PinSet) {
        self.record(Event::Connect { block, pins });
        let mut state = self.state.borrow_mut();
        for pin in pins {
            state.connected[pin.num() as usize] = Some(block);
        }
    }

    fn disconnect_pins(&self, pins: PinSet) {
        self.record(Event::Disconnect { pins });
        let mut state = self.state.borrow_mut();
        for pin in pins {
            state.connected[pin.num() as usize] = None;
        }
    }
}

pub fn pin(num: u8) -> PinId {
    PinId::new(num).unwrap()
}

/// `program` at 1 MHz driving `count` OUT pins from `first`.
pub fn out_config(program: &[u8], first: u8, count: u8) -> StateMachineConfig<'_> {
    StateMachineConfig::new(program, 1_000_000.Hz()).out_pins(Some(pin(first)), count)
}
