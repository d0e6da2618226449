//! Driver for the NXP MFRC522 contactless reader and Mifare Classic cards
//!
//! The reader is reached through an [`Interface`] (normally [`SpiInterface`] over an
//! `embedded-hal` SPI device), a reset pin and the IRQ line. Card access follows the usual
//! sequence: [`wait`](Mfrc522::wait) for a card, request, anticollision, select,
//! authenticate, then read or write blocks and finally stop the crypto unit.
//! The `*_card` methods run the whole sequence.
#![no_std]

#[macro_use]
mod fmt;

use embedded_hal::{
    delay::DelayNs,
    digital::{self, InputPin, OutputPin},
};
use fugit::MillisDurationU32;
use heapless::Vec;

use self::commands::Command;
use registers::{address, ComIrq, Control, DivIrq, ErrorFlags, FifoLevel, Register, RfCfg};

pub mod commands;
pub mod interface;
pub mod mifare_classic;
pub mod nfc_a;
pub mod registers;
pub mod wait;

#[cfg(test)]
mod mock;

pub use interface::{Interface, SpiInterface};
pub use wait::WaitSignal;

/// Capacity of the FIFO as seen by the driver, longer responses are truncated
pub const FIFO_CAPACITY: usize = 16;
/// ComIrq reads before a transceive is given up
pub const TRANSCEIVE_BUDGET: u16 = 2000;
/// DivIrq reads before a CRC computation is given up
pub const CRC_BUDGET: u16 = 255;

/// Oscillator start-up after power-up or soft reset
pub const RESET_DELAY: MillisDurationU32 = MillisDurationU32::millis(50);

/// Timer, modulation and CRC settings written by [`Mfrc522::init`]
const INIT_SEQUENCE: [(u8, u8); 6] = [
    // TAuto, prescaler 0xD3E: 2 kHz timer
    (address::T_MODE, 0x8D),
    (address::T_PRESCALER, 0x3E),
    // reload 30: the card gets 15 ms to answer
    (address::T_RELOAD_L, 30),
    (address::T_RELOAD_H, 0),
    // force 100% ASK
    (address::TX_ASK, 0x40),
    // CRC preset 0x6363
    (address::MODE, 0x3D),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error<E> {
    /// Bus transfer failed
    Interface(E),
    /// Reset or IRQ pin failed
    Pin(digital::ErrorKind),
    /// A polling budget ran out or the wait for a card expired
    Timeout,
    /// The reader's timer fired before the card answered
    NoResponse,
    /// The wait was stopped by [`Mfrc522::halt`] or [`WaitSignal::cancel`]
    Cancelled,
    /// Another wait on the same signal is in flight
    ConcurrentAccess,
    /// The error register flagged the last command
    Protocol(ErrorFlags),
    /// Response had an unexpected number of bits
    BitLength { expected: usize, actual: usize },
    /// Response had an unexpected number of bytes
    ByteLength { expected: usize, actual: usize },
    /// UID check byte doesn't match the UID
    Checksum { expected: u8, actual: u8 },
    /// CRC trailer of a block doesn't match its data, both `[lsb, msb]`
    Crc { expected: [u8; 2], actual: [u8; 2] },
    /// Card answered with something other than an ACK
    Nack(u8),
    /// Crypto unit not engaged after authentication
    Authentication,
    /// Block outside of a sector, or address past the card's address space
    InvalidAddress { sector: u8, block: u8 },
    /// Operation timeout must be positive
    InvalidTimeout,
}

impl<E> Error<E> {
    pub(crate) fn pin(e: impl digital::Error) -> Self {
        Self::Pin(e.kind())
    }
}

pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Reader settings applied at construction
#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Config {
    /// Receiver gain, 0 (18 dB) to 7 (48 dB)
    pub antenna_gain: u8,
    /// Upper bound for [`Mfrc522::wait`]
    pub operation_timeout: MillisDurationU32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            antenna_gain: 4,
            operation_timeout: MillisDurationU32::secs(30),
        }
    }
}

/// Raw reply of a [`Mfrc522::transceive`]
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Response {
    /// Received bytes, at most [`FIFO_CAPACITY`]
    pub data: Vec<u8, FIFO_CAPACITY>,
    /// Exact number of received bits, may not be a multiple of 8
    pub bits: usize,
}

impl Response {
    pub(crate) fn expect_bits<E>(&self, expected: usize) -> Result<(), E> {
        if self.bits == expected {
            Ok(())
        } else {
            Err(Error::BitLength {
                expected,
                actual: self.bits,
            })
        }
    }

    pub(crate) fn expect_bytes<E>(&self, expected: usize) -> Result<(), E> {
        if self.data.len() == expected {
            Ok(())
        } else {
            Err(Error::ByteLength {
                expected,
                actual: self.data.len(),
            })
        }
    }
}

pub struct Mfrc522<'s, I, RST, IRQ, D> {
    dev: I,
    reset: RST,
    irq: IRQ,
    delay: D,
    signal: &'s WaitSignal,
    antenna_gain: u8,
    timeout: MillisDurationU32,
}

impl<'s, I, RST, IRQ, D> Mfrc522<'s, I, RST, IRQ, D>
where
    I: Interface,
    RST: OutputPin,
    IRQ: InputPin,
    D: DelayNs,
{
    /// Takes ownership of the interface and pins, powers the chip up and initializes it
    pub fn new(
        dev: I,
        reset: RST,
        irq: IRQ,
        delay: D,
        signal: &'s WaitSignal,
        config: Config,
    ) -> Result<Self, I::Error> {
        let mut drv = Self {
            dev,
            reset,
            irq,
            delay,
            signal,
            antenna_gain: Config::default().antenna_gain,
            timeout: Config::default().operation_timeout,
        };
        drv.set_operation_timeout(config.operation_timeout)?;
        // applied by init
        if config.antenna_gain <= 7 {
            drv.antenna_gain = config.antenna_gain;
        } else {
            warn!("Ignoring antenna gain {=u8}", config.antenna_gain);
        }

        // out of hard power-down
        drv.reset.set_high().map_err(Error::pin)?;
        drv.delay.delay_ms(RESET_DELAY.to_millis());
        drv.init()?;

        let version = drv.version()?;
        info!("MFRC522 version {=u8:#X}", version);
        Ok(drv)
    }

    /// Soft reset followed by timer, modulation and CRC setup, antenna gain and antenna on
    pub fn init(&mut self) -> Result<(), I::Error> {
        self.reset()?;
        for (addr, value) in INIT_SEQUENCE {
            self.write_register(addr, value)?;
        }
        self.apply_antenna_gain()?;
        self.set_antenna(true)
    }

    /// Resets every register to its default value
    pub fn reset(&mut self) -> Result<(), I::Error> {
        self.command(Command::SoftReset)?;
        self.delay.delay_ms(RESET_DELAY.to_millis());
        Ok(())
    }

    /// Chip type and version, 0x91 or 0x92 for genuine parts
    pub fn version(&mut self) -> Result<u8, I::Error> {
        self.read_register(address::VERSION)
    }

    pub fn set_antenna(&mut self, on: bool) -> Result<(), I::Error> {
        use registers::TxControl;
        if on {
            self.set_bits(address::TX_CONTROL, TxControl::ANTENNA_MASK)
        } else {
            self.clear_bits(address::TX_CONTROL, TxControl::ANTENNA_MASK)
        }
    }

    /// Sets the receiver gain, 0 to 7
    ///
    /// Out of range values are ignored and the previous gain is kept.
    pub fn set_antenna_gain(&mut self, gain: u8) -> Result<(), I::Error> {
        if gain > 7 {
            warn!("Ignoring antenna gain {=u8}, keeping {=u8}", gain, self.antenna_gain);
            return Ok(());
        }
        self.antenna_gain = gain;
        self.apply_antenna_gain()
    }

    pub fn antenna_gain(&self) -> u8 {
        self.antenna_gain
    }

    /// Sets the upper bound for [`wait`](Self::wait), must be positive
    pub fn set_operation_timeout(&mut self, timeout: MillisDurationU32) -> Result<(), I::Error> {
        if timeout.ticks() == 0 {
            return Err(Error::InvalidTimeout);
        }
        self.timeout = timeout;
        Ok(())
    }

    pub fn operation_timeout(&self) -> MillisDurationU32 {
        self.timeout
    }

    fn apply_antenna_gain(&mut self) -> Result<(), I::Error> {
        let gain = bilge::arbitrary_int::u3::new(self.antenna_gain);
        RfCfg::modify(&mut self.dev, |r| r.set_rx_gain(gain)).map_err(Error::Interface)
    }

    pub fn write_register(&mut self, addr: u8, value: u8) -> Result<(), I::Error> {
        self.dev
            .register_write(addr, &[value])
            .map_err(Error::Interface)
    }

    pub fn read_register(&mut self, addr: u8) -> Result<u8, I::Error> {
        let mut buf = [0u8];
        self.dev
            .register_read(addr, &mut buf)
            .map_err(Error::Interface)?;
        Ok(buf[0])
    }

    pub fn set_bits(&mut self, addr: u8, mask: u8) -> Result<(), I::Error> {
        let value = self.read_register(addr)?;
        self.write_register(addr, value | mask)
    }

    pub fn clear_bits(&mut self, addr: u8, mask: u8) -> Result<(), I::Error> {
        let value = self.read_register(addr)?;
        self.write_register(addr, value & !mask)
    }

    fn command(&mut self, cmd: Command) -> Result<(), I::Error> {
        trace!("Command {} ({=u8:#X})", cmd, cmd as u8);
        self.write_register(address::COMMAND, cmd as u8)
    }

    fn flush_fifo(&mut self) -> Result<(), I::Error> {
        self.set_bits(address::FIFO_LEVEL, 0x80)
    }

    /// Computes the ISO14443A CRC of `data` with the CRC coprocessor
    ///
    /// Returns `[lsb, msb]`, in the order they are appended to a frame.
    pub fn calculate_crc(&mut self, data: &[u8]) -> Result<[u8; 2], I::Error> {
        self.command(Command::Idle)?;
        // Set2 low: the marked CRCIRq flag is cleared
        self.write_register(address::DIV_IRQ, 0x04)?;
        self.flush_fifo()?;
        self.dev
            .register_write(address::FIFO_DATA, data)
            .map_err(Error::Interface)?;
        self.command(Command::CalcCrc)?;

        let mut done = false;
        for _ in 0..CRC_BUDGET {
            if DivIrq::read(&mut self.dev).map_err(Error::Interface)?.crc_irq() {
                done = true;
                break;
            }
        }
        if !done {
            warn!("CRC not done after {=u16} reads", CRC_BUDGET);
            return Err(Error::Timeout);
        }
        self.command(Command::Idle)?;

        let lsb = self.read_register(address::CRC_RESULT_L)?;
        let msb = self.read_register(address::CRC_RESULT_M)?;
        Ok([lsb, msb])
    }

    /// Sends `data` through the FIFO with `command` and collects the reply
    ///
    /// Only [`Command::Transceive`] produces a reply, [`Command::MfAuthent`] returns an empty
    /// response. Callers have to check the bit length: short or misaligned frames still
    /// come back as `Ok`.
    pub fn transceive(&mut self, command: Command, data: &[u8]) -> Result<Response, I::Error> {
        let (irq_en, irq_wait) = command.irq_masks();
        let is_transceive = command == Command::Transceive;

        self.write_register(registers::ComIEn::ADDRESS, irq_en | 0x80)?;
        self.write_register(address::COM_IRQ, ComIrq::CLEAR_ALL)?;
        self.flush_fifo()?;
        self.command(Command::Idle)?;
        self.dev
            .register_write(address::FIFO_DATA, data)
            .map_err(Error::Interface)?;
        self.command(command)?;
        if is_transceive {
            self.set_bits(address::BIT_FRAMING, 0x80)?;
        }

        let mut irq = None;
        for _ in 0..TRANSCEIVE_BUDGET {
            let firing = ComIrq::read(&mut self.dev).map_err(Error::Interface)?;
            if u8::from(firing) & (irq_wait | 0x01) != 0 {
                irq = Some(firing);
                break;
            }
        }
        self.clear_bits(address::BIT_FRAMING, 0x80)?;
        let Some(irq) = irq else {
            warn!("{} not done after {=u16} reads", command, TRANSCEIVE_BUDGET);
            return Err(Error::Timeout);
        };

        let errors = ErrorFlags::read(&mut self.dev).map_err(Error::Interface)?;
        if errors.fails_transceive() {
            debug!("{} failed: {}", command, errors);
            return Err(Error::Protocol(errors));
        }
        if irq.timer_irq() && irq_en & 0x01 != 0 {
            return Err(Error::NoResponse);
        }

        let mut response = Response {
            data: Vec::new(),
            bits: 0,
        };
        if !is_transceive {
            return Ok(response);
        }

        let level = FifoLevel::read(&mut self.dev)
            .map_err(Error::Interface)?
            .level()
            .value() as usize;
        let last_bits = Control::read(&mut self.dev)
            .map_err(Error::Interface)?
            .rx_last_bits()
            .value() as usize;
        response.bits = match (level, last_bits) {
            (0, _) => 0,
            (n, 0) => n * 8,
            (n, b) => (n - 1) * 8 + b,
        };

        let count = level.min(FIFO_CAPACITY);
        // count never exceeds the capacity
        let _ = response.data.resize_default(count);
        self.dev
            .register_read(address::FIFO_DATA, &mut response.data)
            .map_err(Error::Interface)?;
        trace!("Received {=usize} bits: {=[u8]:02X}", response.bits, &response.data[..]);
        Ok(response)
    }

    /// Takes the driver apart
    pub fn release(self) -> (I, RST, IRQ, D) {
        (self.dev, self.reset, self.irq, self.delay)
    }
}
