//! Waiting for a card to enter the field
//!
//! A [`WaitSignal`] tracks whether a wait is in flight and carries the request to stop it.
//! The reader borrows it, so another thread holding the same reference can cancel a wait
//! while the reader itself is busy.

use core::sync::atomic::{AtomicU8, Ordering};

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};
use fugit::MillisDurationU32;

use crate::{
    commands::{Command, PiccCommand},
    interface::Interface,
    registers::{address, BitFraming, ComIEn, ComIrq, Register},
    Error, Mfrc522, Result, RESET_DELAY,
};

/// Interval between two request re-primes
pub const WAIT_TICK: MillisDurationU32 = MillisDurationU32::millis(100);
/// Interval between two samples of the IRQ line
pub const IRQ_SAMPLE: MillisDurationU32 = MillisDurationU32::millis(1);

const IDLE: u8 = 0;
const WAITING: u8 = 1;
const CANCELLED: u8 = 2;

/// Single-flight state of [`Mfrc522::wait`]
#[derive(Debug)]
pub struct WaitSignal {
    state: AtomicU8,
}

impl Default for WaitSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitSignal {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    /// Asks the pending wait, if any, to stop
    ///
    /// Safe to call from any thread and any number of times. Returns whether a wait was
    /// pending.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(WAITING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_waiting(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }

    /// Marks a wait as in flight
    ///
    /// The state goes back to idle when the guard is dropped.
    pub fn try_begin(&self) -> Option<WaitGuard<'_>> {
        self.state
            .compare_exchange(IDLE, WAITING, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| WaitGuard { signal: self })
    }
}

/// Proof that a wait is in flight
#[derive(Debug)]
pub struct WaitGuard<'a> {
    signal: &'a WaitSignal,
}

impl WaitGuard<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.signal.state.load(Ordering::Acquire) == CANCELLED
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.signal.state.store(IDLE, Ordering::Release);
    }
}

/// Remembers the IRQ line level so only a high to low transition counts
struct FallingEdge {
    was_high: bool,
}

impl FallingEdge {
    /// Priming clears every request flag, so the line starts released
    fn armed() -> Self {
        Self { was_high: true }
    }

    fn update(&mut self, low: bool) -> bool {
        let edge = self.was_high && low;
        self.was_high = !low;
        edge
    }
}

impl<I, RST, IRQ, D> Mfrc522<'_, I, RST, IRQ, D>
where
    I: Interface,
    RST: OutputPin,
    IRQ: InputPin,
    D: DelayNs,
{
    /// Blocks until a card answers a request, the operation timeout expires or the wait is
    /// cancelled
    ///
    /// Fails with [`Error::ConcurrentAccess`] right away if another wait on the same signal is
    /// in flight.
    pub fn wait(&mut self) -> Result<(), I::Error> {
        let signal = self.signal;
        let Some(guard) = signal.try_begin() else {
            warn!("Wait already in progress");
            return Err(Error::ConcurrentAccess);
        };
        let timeout = self.timeout;
        debug!("Waiting for card, timeout {=u32}ms", timeout.to_millis());

        self.init()?;
        // IRQ pin goes low as soon as the card answers the request
        let mut ien = ComIEn::default();
        ien.set_rx_ien(true);
        ien.set_irq_inv(true);
        ien.write(&mut self.dev).map_err(Error::Interface)?;

        // init already slept through the reset delay
        let mut elapsed = RESET_DELAY;
        loop {
            self.prime_request()?;
            let mut edge = FallingEdge::armed();
            let tick_end = elapsed + WAIT_TICK;

            while elapsed < tick_end {
                if guard.is_cancelled() {
                    info!("Wait cancelled");
                    self.command(Command::Idle)?;
                    return Err(Error::Cancelled);
                }
                let low = self.irq.is_low().map_err(Error::pin)?;
                if edge.update(low) {
                    debug!("Card detected after {=u32}ms", elapsed.to_millis());
                    return Ok(());
                }
                if elapsed >= timeout {
                    debug!("No card within {=u32}ms", timeout.to_millis());
                    return Err(Error::Timeout);
                }
                self.delay.delay_ms(IRQ_SAMPLE.to_millis());
                elapsed = elapsed + IRQ_SAMPLE;
            }
        }
    }

    /// Queues a REQA and starts the transceive, the chip needs this periodically while idle
    fn prime_request(&mut self) -> Result<(), I::Error> {
        self.dev
            .register_write(address::COM_IRQ, &[ComIrq::CLEAR_ALL])
            .map_err(Error::Interface)?;
        self.flush_fifo()?;
        self.dev
            .register_write(address::FIFO_DATA, &[PiccCommand::ReqA as u8])
            .map_err(Error::Interface)?;
        self.command(Command::Transceive)?;
        BitFraming::short_frame(true)
            .write(&mut self.dev)
            .map_err(Error::Interface)
    }

    /// Stops a pending wait and idles the chip
    ///
    /// Always safe, calling it with no wait in flight only idles the chip. To stop a wait
    /// from another thread use [`WaitSignal::cancel`].
    pub fn halt(&mut self) -> Result<(), I::Error> {
        if self.signal.cancel() {
            debug!("Cancelled pending wait");
        }
        self.command(Command::Idle)
    }
}
