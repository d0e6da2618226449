//! Simulated MFRC522 with a Mifare Classic 1K card in its field

extern crate std;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    vec::Vec,
};

use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, InputPin, OutputPin},
};

use crate::{registers::address, wait::WaitSignal, Config, Interface, Mfrc522, Result};

const COM_IEN: usize = 0x02;
const ERROR: usize = 0x06;
const CONTROL: usize = 0x0C;

/// Failure injected into every bus access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault;

/// ISO14443A CRC, preset 0x6363, returned as `[lsb, msb]`
pub fn crc_a(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0x6363;
    for &b in data {
        let mut ch = b ^ crc as u8;
        ch ^= ch << 4;
        let ch = ch as u16;
        crc = (crc >> 8) ^ (ch << 8) ^ (ch << 3) ^ (ch >> 4);
    }
    [crc as u8, (crc >> 8) as u8]
}

fn with_crc(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    out.extend_from_slice(&crc_a(data));
    out
}

fn crc_ok(frame: &[u8]) -> bool {
    frame.len() >= 2 && crc_a(&frame[..frame.len() - 2])[..] == frame[frame.len() - 2..]
}

enum Reply {
    /// Bytes and number of valid bits in the last one, 0 for all
    Frame(Vec<u8>, u8),
    Silent,
}

pub struct Card {
    pub uid: [u8; 4],
    pub blocks: [[u8; 16]; 64],
    /// Flip a UID bit in the anticollision answer without fixing the check byte
    pub corrupt_uid: bool,
    pub atqa_bits: usize,
    /// Cut or zero-pad read answers to this many bytes
    pub read_len: Option<usize>,
    /// Invert the CRC of read answers
    pub corrupt_read_crc: bool,
    /// NAK the write command
    pub nack_command: bool,
    /// NAK the written data
    pub nack_payload: bool,
    pub payloads_received: usize,
    pub ready: bool,
    pub selected: bool,
    pub halted: bool,
    pub authenticated: Option<u8>,
    pending_write: Option<u8>,
}

impl Card {
    pub fn new(uid: [u8; 4]) -> Self {
        let mut blocks = [[0u8; 16]; 64];
        for trailer in blocks.iter_mut().skip(3).step_by(4) {
            trailer[..6].fill(0xFF);
            trailer[6..10].copy_from_slice(&[0xFF, 0x07, 0x80, 0x69]);
            trailer[10..].fill(0xFF);
        }
        blocks[0][..4].copy_from_slice(&uid);
        blocks[0][4] = uid.iter().fold(0, |a, b| a ^ b);
        blocks[0][5] = 0x08;
        Self {
            uid,
            blocks,
            corrupt_uid: false,
            atqa_bits: 16,
            read_len: None,
            corrupt_read_crc: false,
            nack_command: false,
            nack_payload: false,
            payloads_received: 0,
            ready: false,
            selected: false,
            halted: false,
            authenticated: None,
            pending_write: None,
        }
    }

    /// Field switched off
    fn power_cycle(&mut self) {
        self.ready = false;
        self.selected = false;
        self.halted = false;
        self.authenticated = None;
        self.pending_write = None;
    }

    fn bcc(&self) -> u8 {
        self.uid.iter().fold(0, |a, b| a ^ b)
    }

    fn respond(&mut self, frame: &[u8], last_bits: u8) -> Reply {
        if let Some(addr) = self.pending_write.take() {
            self.payloads_received += 1;
            if self.nack_payload || frame.len() != 18 || !crc_ok(frame) {
                return Reply::Frame(std::vec![0x01], 4);
            }
            self.blocks[addr as usize].copy_from_slice(&frame[..16]);
            return Reply::Frame(std::vec![0x0A], 4);
        }

        match frame {
            [0x26] if last_bits == 7 => {
                if self.halted {
                    return Reply::Silent;
                }
                self.ready = true;
                self.selected = false;
                self.authenticated = None;
                let atqa = std::vec![0x04, 0x00];
                match self.atqa_bits {
                    16 => Reply::Frame(atqa, 0),
                    bits => Reply::Frame(atqa, (bits % 8) as u8),
                }
            }
            [0x93, 0x20] if self.ready => {
                let mut out = self.uid.to_vec();
                out.push(self.bcc());
                if self.corrupt_uid {
                    out[1] ^= 0x01;
                }
                Reply::Frame(out, 0)
            }
            [0x93, 0x70, uid @ .., _, _, _] if self.ready && crc_ok(frame) => {
                if uid[..] != self.uid[..] || frame[6] != self.bcc() {
                    return Reply::Silent;
                }
                self.selected = true;
                Reply::Frame(with_crc(&[0x08]), 0)
            }
            [0x30, addr, _, _] if crc_ok(frame) && self.may_access(*addr) => {
                let mut block = self.blocks[*addr as usize];
                if *addr % 4 == 3 {
                    // key A is never readable
                    block[..6].fill(0);
                }
                let mut out = with_crc(&block);
                if self.corrupt_read_crc {
                    out[16] ^= 0xFF;
                    out[17] ^= 0xFF;
                }
                if let Some(len) = self.read_len {
                    out.resize(len, 0);
                }
                Reply::Frame(out, 0)
            }
            [0xA0, addr, _, _] if crc_ok(frame) && self.may_access(*addr) => {
                if self.nack_command {
                    return Reply::Frame(std::vec![0x04], 4);
                }
                self.pending_write = Some(*addr);
                Reply::Frame(std::vec![0x0A], 4)
            }
            [0x50, 0x00, _, _] if crc_ok(frame) && self.selected => {
                self.halted = true;
                self.selected = false;
                self.authenticated = None;
                Reply::Silent
            }
            _ => Reply::Silent,
        }
    }

    fn may_access(&self, addr: u8) -> bool {
        self.selected && self.authenticated == Some(addr / 4)
    }

    fn authenticate(&mut self, frame: &[u8]) -> bool {
        let [mode, addr, key @ .., u0, u1, u2, u3] = frame else {
            return false;
        };
        if !self.selected || [*u0, *u1, *u2, *u3] != self.uid || key.len() != 6 {
            return false;
        }
        let trailer = &self.blocks[(*addr | 3) as usize];
        let expected = match *mode {
            0x60 => &trailer[..6],
            0x61 => &trailer[10..],
            _ => return false,
        };
        if key != expected {
            self.authenticated = None;
            return false;
        }
        self.authenticated = Some(addr / 4);
        true
    }
}

pub struct ChipState {
    pub regs: [u8; 64],
    fifo: VecDeque<u8>,
    pub card: Option<Card>,
    pub last_command: u8,
    pub reqa_count: usize,
    pub stall_crc: bool,
    pub stall_transceive: bool,
    /// Error register value after every transceive
    pub inject_error: u8,
    pub fail_bus: bool,
    pub com_irq_reads: usize,
    pub div_irq_reads: usize,
    pub reset_high: bool,
    /// Sum of all delays requested by the driver
    pub delayed_ns: u64,
}

impl ChipState {
    fn new() -> Self {
        let mut st = Self {
            regs: [0; 64],
            fifo: VecDeque::new(),
            card: None,
            last_command: 0,
            reqa_count: 0,
            stall_crc: false,
            stall_transceive: false,
            inject_error: 0,
            fail_bus: false,
            com_irq_reads: 0,
            div_irq_reads: 0,
            reset_high: false,
            delayed_ns: 0,
        };
        st.soft_reset();
        st
    }

    pub fn crypto_on(&self) -> bool {
        self.regs[address::STATUS2 as usize] & 0x08 != 0
    }

    fn irq_low(&self) -> bool {
        let ien = self.regs[COM_IEN];
        ien & 0x80 != 0 && self.regs[address::COM_IRQ as usize] & ien & 0x7F != 0
    }

    fn soft_reset(&mut self) {
        self.regs = [0; 64];
        self.regs[address::RF_CFG as usize] = 0x48;
        self.regs[address::TX_CONTROL as usize] = 0x80;
        self.fifo.clear();
        if let Some(card) = self.card.as_mut() {
            card.power_cycle();
        }
    }

    fn read(&mut self, addr: u8) -> u8 {
        match addr {
            address::COM_IRQ => {
                self.com_irq_reads += 1;
                self.regs[addr as usize]
            }
            address::DIV_IRQ => {
                self.div_irq_reads += 1;
                self.regs[addr as usize]
            }
            address::FIFO_DATA => self.fifo.pop_front().unwrap_or(0),
            address::FIFO_LEVEL => self.fifo.len().min(64) as u8,
            address::VERSION => 0x92,
            _ => self.regs[addr as usize],
        }
    }

    fn write(&mut self, addr: u8, value: u8) {
        match addr {
            address::COMMAND => {
                self.regs[addr as usize] = value;
                self.last_command = value & 0x0F;
                self.execute(value & 0x0F);
            }
            address::COM_IRQ | address::DIV_IRQ => {
                let reg = &mut self.regs[addr as usize];
                if value & 0x80 != 0 {
                    *reg |= value & 0x7F;
                } else {
                    *reg &= !(value & 0x7F);
                }
            }
            address::FIFO_DATA => self.fifo.push_back(value),
            address::FIFO_LEVEL => {
                if value & 0x80 != 0 {
                    self.fifo.clear();
                }
            }
            address::BIT_FRAMING => {
                self.regs[addr as usize] = value;
                if value & 0x80 != 0 && self.regs[address::COMMAND as usize] & 0x0F == 0x0C {
                    self.transceive(value & 0x07);
                }
            }
            _ => self.regs[addr as usize] = value,
        }
    }

    fn execute(&mut self, command: u8) {
        match command {
            0x0F => self.soft_reset(),
            0x03 if !self.stall_crc => {
                let data: Vec<u8> = self.fifo.iter().copied().collect();
                let [lsb, msb] = crc_a(&data);
                self.regs[address::CRC_RESULT_L as usize] = lsb;
                self.regs[address::CRC_RESULT_M as usize] = msb;
                self.regs[address::DIV_IRQ as usize] |= 0x04;
            }
            0x0E => {
                let frame: Vec<u8> = self.fifo.drain(..).collect();
                let ok = self
                    .card
                    .as_mut()
                    .map(|card| card.authenticate(&frame))
                    .unwrap_or(false);
                let status = &mut self.regs[address::STATUS2 as usize];
                if ok {
                    *status |= 0x08;
                } else {
                    *status &= !0x08;
                }
                self.regs[ERROR] = 0;
                self.regs[address::COM_IRQ as usize] |= 0x10;
            }
            _ => (),
        }
    }

    fn transceive(&mut self, tx_last_bits: u8) {
        let frame: Vec<u8> = self.fifo.drain(..).collect();
        if frame == [0x26] && tx_last_bits == 7 {
            self.reqa_count += 1;
        }
        if self.stall_transceive {
            return;
        }
        let reply = match self.card.as_mut() {
            Some(card) => card.respond(&frame, tx_last_bits),
            None => Reply::Silent,
        };
        self.regs[ERROR] = self.inject_error;
        let irq = match reply {
            // timer
            Reply::Silent => 0x01,
            Reply::Frame(bytes, last_bits) => {
                self.fifo.extend(bytes);
                self.regs[CONTROL] = self.regs[CONTROL] & !0x07 | last_bits;
                // rx and idle
                0x30
            }
        };
        self.regs[address::COM_IRQ as usize] |= irq;
    }
}

#[derive(Clone)]
pub struct Chip(Arc<Mutex<ChipState>>);

impl Chip {
    pub fn state(&self) -> MutexGuard<'_, ChipState> {
        self.0.lock().unwrap()
    }

    pub fn insert_card(&self, card: Card) {
        self.state().card = Some(card);
    }
}

pub struct MockInterface(Chip);

impl Interface for MockInterface {
    type Error = BusFault;

    fn register_write(&mut self, addr: u8, buf: &[u8]) -> core::result::Result<(), BusFault> {
        let mut st = self.0.state();
        if st.fail_bus {
            return Err(BusFault);
        }
        for &b in buf {
            st.write(addr, b);
        }
        Ok(())
    }

    fn register_read(&mut self, addr: u8, buf: &mut [u8]) -> core::result::Result<(), BusFault> {
        let mut st = self.0.state();
        if st.fail_bus {
            return Err(BusFault);
        }
        for b in buf {
            *b = st.read(addr);
        }
        Ok(())
    }
}

pub struct MockIrq(Chip);

impl ErrorType for MockIrq {
    type Error = core::convert::Infallible;
}

impl InputPin for MockIrq {
    fn is_high(&mut self) -> core::result::Result<bool, Self::Error> {
        Ok(!self.0.state().irq_low())
    }

    fn is_low(&mut self) -> core::result::Result<bool, Self::Error> {
        Ok(self.0.state().irq_low())
    }
}

pub struct MockReset(Chip);

impl ErrorType for MockReset {
    type Error = core::convert::Infallible;
}

impl OutputPin for MockReset {
    fn set_low(&mut self) -> core::result::Result<(), Self::Error> {
        self.0.state().reset_high = false;
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Self::Error> {
        self.0.state().reset_high = true;
        Ok(())
    }
}

/// Sleeps for real when `realtime`, returns at once otherwise
pub struct MockDelay {
    chip: Chip,
    realtime: bool,
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.chip.state().delayed_ns += u64::from(ns);
        if self.realtime {
            std::thread::sleep(std::time::Duration::from_nanos(ns.into()));
        }
    }
}

pub type MockReader<'s> = Mfrc522<'s, MockInterface, MockReset, MockIrq, MockDelay>;

fn build(
    signal: &WaitSignal,
    config: Config,
    realtime: bool,
) -> (Result<MockReader<'_>, BusFault>, Chip) {
    let chip = Chip(Arc::new(Mutex::new(ChipState::new())));
    let reader = Mfrc522::new(
        MockInterface(chip.clone()),
        MockReset(chip.clone()),
        MockIrq(chip.clone()),
        MockDelay {
            chip: chip.clone(),
            realtime,
        },
        signal,
        config,
    );
    (reader, chip)
}

pub fn try_reader(signal: &WaitSignal, config: Config) -> (Result<MockReader<'_>, BusFault>, Chip) {
    build(signal, config, false)
}

pub fn reader(signal: &WaitSignal, config: Config) -> (MockReader<'_>, Chip) {
    let (reader, chip) = build(signal, config, false);
    (reader.unwrap(), chip)
}

/// Reader whose delays take wall-clock time, for tests racing another thread
pub fn realtime_reader(signal: &WaitSignal, config: Config) -> (MockReader<'_>, Chip) {
    let (reader, chip) = build(signal, config, true);
    (reader.unwrap(), chip)
}
