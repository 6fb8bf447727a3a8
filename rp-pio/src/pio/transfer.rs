//! Buffered FIFO transfers
//!
//! Data moves through the FIFOs one 32-bit word per 4 bytes of buffer. Byte
//! order inside a word follows the shift direction of the register the word
//! goes through, so that the first byte of the buffer is always the first
//! byte shifted out (or in).
//!
//! Transfers block while the FIFO is full (or empty). They can be stopped
//! early with a [`Cancel`] token, which is not an error, or bounded with a
//! [`FifoWait`] policy set on the [`Pio`](crate::Pio).

use core::cell::Cell;
use core::ops::Range;
use core::sync::atomic::{AtomicBool, Ordering};

use super::StateMachine;
use crate::config::ShiftDirection;
use crate::error::{Error, IoFault};
use crate::hardware::PioHardware;

/// How long a transfer keeps polling a FIFO that is not ready.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum FifoWait {
    /// Wait until the FIFO is ready or the transfer is cancelled.
    #[default]
    Indefinite,
    /// Fail with [`IoFault::TimedOut`] after this many polls found the FIFO not ready.
    Polls(u32),
}

/// Cooperative cancellation, checked between words and while waiting on a FIFO.
pub trait Cancel {
    /// Whether the transfer should stop.
    fn is_cancelled(&self) -> bool;
}

impl Cancel for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl Cancel for Cell<bool> {
    fn is_cancelled(&self) -> bool {
        self.get()
    }
}

impl<C: Cancel + ?Sized> Cancel for &C {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

/// A token that is never cancelled.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Default)]
pub struct NeverCancel;

impl Cancel for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Resolve `buffer[start..end]` bounds against a buffer of `len` bytes.
///
/// Negative indices count back from the end, every index is clamped to the
/// buffer, `end` defaults to `len` and an `end` before `start` gives an empty
/// range.
pub fn normalize_bounds(len: usize, start: isize, end: Option<isize>) -> Range<usize> {
    let resolve = |index: isize| {
        if index < 0 {
            len.saturating_sub(index.unsigned_abs())
        } else {
            (index as usize).min(len)
        }
    };
    let start = resolve(start);
    let end = end.map_or(len, resolve);
    start..end.max(start)
}

fn pack(chunk: &[u8], direction: ShiftDirection) -> u32 {
    let mut bytes = [0; 4];
    bytes[..chunk.len()].copy_from_slice(chunk);
    match direction {
        ShiftDirection::Right => u32::from_le_bytes(bytes),
        ShiftDirection::Left => u32::from_be_bytes(bytes),
    }
}

fn unpack(word: u32, direction: ShiftDirection, chunk: &mut [u8]) {
    let bytes = match direction {
        ShiftDirection::Right => word.to_le_bytes(),
        ShiftDirection::Left => word.to_be_bytes(),
    };
    // A partial word is at the end the ISR shifted into last: the top bytes
    // when shifting right, the bottom bytes when shifting left.
    chunk.copy_from_slice(&bytes[4 - chunk.len()..]);
}

impl<'p, H: PioHardware> StateMachine<'p, H> {
    /// Write `buffer[start..end]` to the TX FIFO.
    ///
    /// See [`normalize_bounds`] for how `start` and `end` are interpreted. An
    /// empty range does nothing.
    pub fn write(&mut self, buffer: &[u8], start: isize, end: Option<isize>) -> Result<(), Error> {
        self.write_cancellable(buffer, start, end, &NeverCancel)
    }

    /// Like [`Self::write`], stopping early without error once `cancel` is set.
    ///
    /// A cancelled write has sent a prefix of the range, in whole words.
    pub fn write_cancellable<C: Cancel + ?Sized>(
        &mut self,
        buffer: &[u8],
        start: isize,
        end: Option<isize>,
        cancel: &C,
    ) -> Result<(), Error> {
        self.live()?;
        let data = &buffer[normalize_bounds(buffer.len(), start, end)];
        let hw = &self.pio.hardware;
        let (block, index) = (self.block, self.index);

        for chunk in data.chunks(4) {
            if cancel.is_cancelled() {
                log!(debug, "pio: write to {}:{} cancelled", block, index);
                return Ok(());
            }
            let word = pack(chunk, self.out_shift);
            if self.poll(cancel, || hw.push_tx(block, index, word))?.is_none() {
                log!(debug, "pio: write to {}:{} cancelled", block, index);
                return Ok(());
            }
        }
        Ok(())
    }

    /// Fill `buffer[start..end]` from the RX FIFO.
    ///
    /// Bounds are interpreted like [`Self::write`]'s.
    pub fn read_into(
        &mut self,
        buffer: &mut [u8],
        start: isize,
        end: Option<isize>,
    ) -> Result<(), Error> {
        self.read_into_cancellable(buffer, start, end, &NeverCancel)
    }

    /// Like [`Self::read_into`], stopping early without error once `cancel` is set.
    ///
    /// A cancelled read has filled a prefix of the range, in whole words. The
    /// rest of the range is left untouched.
    pub fn read_into_cancellable<C: Cancel + ?Sized>(
        &mut self,
        buffer: &mut [u8],
        start: isize,
        end: Option<isize>,
        cancel: &C,
    ) -> Result<(), Error> {
        self.live()?;
        let range = normalize_bounds(buffer.len(), start, end);
        let hw = &self.pio.hardware;
        let (block, index) = (self.block, self.index);

        for chunk in buffer[range].chunks_mut(4) {
            if cancel.is_cancelled() {
                log!(debug, "pio: read from {}:{} cancelled", block, index);
                return Ok(());
            }
            match self.poll(cancel, || hw.pull_rx(block, index))? {
                Some(word) => unpack(word, self.in_shift, chunk),
                None => {
                    log!(debug, "pio: read from {}:{} cancelled", block, index);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Write `out[out_bounds]` while filling `into[in_bounds]` from the RX FIFO.
    ///
    /// Bounds are `(start, end)` pairs interpreted like [`Self::write`]'s. Both
    /// ranges must have the same length. Each word is pushed before the
    /// matching word is pulled, so a program that answers every word it
    /// receives (like an SPI exchange) keeps both FIFOs moving.
    ///
    /// To clock data in while sending a fixed value, pass an `out` buffer
    /// filled with that value.
    pub fn write_read_into(
        &mut self,
        out: &[u8],
        out_bounds: (isize, Option<isize>),
        into: &mut [u8],
        in_bounds: (isize, Option<isize>),
    ) -> Result<(), Error> {
        self.write_read_into_cancellable(out, out_bounds, into, in_bounds, &NeverCancel)
    }

    /// Like [`Self::write_read_into`], stopping early without error once `cancel` is set.
    ///
    /// A cancelled transfer may have pushed one more word than it pulled.
    pub fn write_read_into_cancellable<C: Cancel + ?Sized>(
        &mut self,
        out: &[u8],
        out_bounds: (isize, Option<isize>),
        into: &mut [u8],
        in_bounds: (isize, Option<isize>),
        cancel: &C,
    ) -> Result<(), Error> {
        self.live()?;
        let out = &out[normalize_bounds(out.len(), out_bounds.0, out_bounds.1)];
        let in_range = normalize_bounds(into.len(), in_bounds.0, in_bounds.1);
        if out.len() != in_range.len() {
            return Err(Error::MismatchedLengths {
                out_len: out.len(),
                in_len: in_range.len(),
            });
        }
        let hw = &self.pio.hardware;
        let (block, index) = (self.block, self.index);

        for (tx, rx) in out.chunks(4).zip(into[in_range].chunks_mut(4)) {
            if cancel.is_cancelled() {
                log!(debug, "pio: transfer on {}:{} cancelled", block, index);
                return Ok(());
            }
            let word = pack(tx, self.out_shift);
            if self.poll(cancel, || hw.push_tx(block, index, word))?.is_none() {
                log!(debug, "pio: transfer on {}:{} cancelled", block, index);
                return Ok(());
            }
            match self.poll(cancel, || hw.pull_rx(block, index))? {
                Some(word) => unpack(word, self.in_shift, rx),
                None => {
                    log!(debug, "pio: transfer on {}:{} cancelled", block, index);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Wait until the TX FIFO has been drained by the state machine.
    fn wait_tx_empty(&self) -> Result<(), Error> {
        self.live()?;
        let hw = &self.pio.hardware;
        let (block, index) = (self.block, self.index);
        self.poll(&NeverCancel, || {
            if hw.tx_empty(block, index) {
                Ok(())
            } else {
                Err(nb::Error::WouldBlock)
            }
        })?;
        Ok(())
    }

    /// Retry `op` until it succeeds, faults, is cancelled or runs out of polls.
    ///
    /// Returns `Ok(None)` when cancelled. Cancellation wins over a fault
    /// reported by the same poll.
    fn poll<T, C: Cancel + ?Sized>(
        &self,
        cancel: &C,
        mut op: impl FnMut() -> nb::Result<T, IoFault>,
    ) -> Result<Option<T>, Error> {
        let mut polls: u32 = 0;
        loop {
            match op() {
                Ok(value) => return Ok(Some(value)),
                Err(nb::Error::Other(fault)) => {
                    if cancel.is_cancelled() {
                        return Ok(None);
                    }
                    log!(warn, "pio: {}:{} FIFO fault", self.block, self.index);
                    return Err(Error::Io(fault));
                }
                Err(nb::Error::WouldBlock) => {}
            }
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let FifoWait::Polls(limit) = self.pio.fifo_wait {
                polls = polls.saturating_add(1);
                if polls >= limit {
                    log!(warn, "pio: {}:{} FIFO wait timed out", self.block, self.index);
                    return Err(Error::Io(IoFault::TimedOut));
                }
            }
            core::hint::spin_loop();
        }
    }
}

impl<H: PioHardware> embedded_io::ErrorType for StateMachine<'_, H> {
    type Error = Error;
}

impl<H: PioHardware> embedded_io::Write for StateMachine<'_, H> {
    /// Push as many words as the TX FIFO takes, waiting only for the first.
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.live()?;
        let hw = &self.pio.hardware;
        let (block, index) = (self.block, self.index);
        let mut written = 0;
        for chunk in buf.chunks(4) {
            let word = pack(chunk, self.out_shift);
            if written == 0 {
                self.poll(&NeverCancel, || hw.push_tx(block, index, word))?;
            } else if hw.push_tx(block, index, word).is_err() {
                break;
            }
            written += chunk.len();
        }
        Ok(written)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.wait_tx_empty()
    }
}

impl<H: PioHardware> embedded_io::Read for StateMachine<'_, H> {
    /// Pull the words already waiting in the RX FIFO, waiting only for the first.
    ///
    /// A trailing partial word is unpacked like in [`StateMachine::read_into`].
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.live()?;
        let hw = &self.pio.hardware;
        let (block, index) = (self.block, self.index);
        let mut filled = 0;
        for chunk in buf.chunks_mut(4) {
            let word = if filled == 0 {
                match self.poll(&NeverCancel, || hw.pull_rx(block, index))? {
                    Some(word) => word,
                    None => break,
                }
            } else {
                match hw.pull_rx(block, index) {
                    Ok(word) => word,
                    Err(_) => break,
                }
            };
            unpack(word, self.in_shift, chunk);
            filled += chunk.len();
        }
        Ok(filled)
    }
}
