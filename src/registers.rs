use bilge::prelude::*;

use crate::interface::Interface;

/// Addresses of byte-valued registers, accessed without a bitfield view
pub mod address {
    pub const COMMAND: u8 = 0x01;
    pub const COM_IRQ: u8 = 0x04;
    pub const DIV_IRQ: u8 = 0x05;
    pub const STATUS2: u8 = 0x08;
    pub const FIFO_DATA: u8 = 0x09;
    pub const FIFO_LEVEL: u8 = 0x0A;
    pub const BIT_FRAMING: u8 = 0x0D;
    pub const MODE: u8 = 0x11;
    pub const TX_CONTROL: u8 = 0x14;
    pub const TX_ASK: u8 = 0x15;
    pub const CRC_RESULT_M: u8 = 0x21;
    pub const CRC_RESULT_L: u8 = 0x22;
    pub const RF_CFG: u8 = 0x26;
    pub const T_MODE: u8 = 0x2A;
    pub const T_PRESCALER: u8 = 0x2B;
    pub const T_RELOAD_H: u8 = 0x2C;
    pub const T_RELOAD_L: u8 = 0x2D;
    pub const VERSION: u8 = 0x37;
}

/// Single byte register with a bitfield view
pub trait Register: Copy + Sized + PartialEq + From<u8> + Into<u8> {
    const ADDRESS: u8;
    fn read<I: Interface>(iface: &mut I) -> Result<Self, I::Error> {
        let mut buf = [0u8];
        iface.register_read(Self::ADDRESS, &mut buf)?;
        Ok(Self::from(buf[0]))
    }
    fn write<I: Interface>(self, iface: &mut I) -> Result<(), I::Error> {
        iface.register_write(Self::ADDRESS, &[self.into()])
    }
    fn modify<I: Interface>(iface: &mut I, mut f: impl FnMut(&mut Self)) -> Result<(), I::Error> {
        let mut reg = Self::read::<I>(iface)?;
        let copy = reg;
        f(&mut reg);
        if reg != copy {
            reg.write::<I>(iface)
        } else {
            Ok(())
        }
    }
}

macro_rules! register_impl {
    ($type:ty, $addr:expr) => {
        impl Register for $type {
            const ADDRESS: u8 = $addr;
        }
    };
}

register_impl!(CommandReg, address::COMMAND);
/// Starts and stops command execution
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandReg {
    /// See [`crate::commands::Command`]
    pub command: u4,
    /// Soft power-down mode entered, cleared once the oscillator is running again
    pub power_down: bool,
    /// Analog part of the receiver is switched off
    pub rcv_off: bool,
    reserved: u2,
}

register_impl!(ComIEn, 0x02);
/// Enable and disable interrupt request control bits
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComIEn {
    pub timer_ien: bool,
    pub err_ien: bool,
    pub lo_alert_ien: bool,
    pub hi_alert_ien: bool,
    pub idle_ien: bool,
    pub rx_ien: bool,
    pub tx_ien: bool,
    /// Signal on the IRQ pin is inverted, pin is low while an interrupt is pending
    pub irq_inv: bool,
}

register_impl!(ComIrq, address::COM_IRQ);
/// Interrupt request bits
///
/// Writes with `set1` cleared clear the marked bits, writes with `set1` set set them
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComIrq {
    /// Timer decremented to zero
    pub timer_irq: bool,
    /// Any error bit in the error register is set
    pub err_irq: bool,
    pub lo_alert_irq: bool,
    pub hi_alert_irq: bool,
    /// Command terminated by itself
    pub idle_irq: bool,
    /// Receiver detected the end of a valid data stream
    pub rx_irq: bool,
    /// Last bit of the transmitted data was sent out
    pub tx_irq: bool,
    pub set1: bool,
}

impl ComIrq {
    /// Clears every request flag
    pub const CLEAR_ALL: u8 = 0x7F;
}

register_impl!(DivIrq, address::DIV_IRQ);
/// Interrupt request bits, second half
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct DivIrq {
    reserved: u2,
    /// CalcCRC finished processing all the FIFO data
    pub crc_irq: bool,
    reserved: u1,
    /// MFIN is active
    pub mfin_act_irq: bool,
    reserved: u2,
    pub set2: bool,
}

register_impl!(ErrorFlags, 0x06);
/// Error bits of the last executed command
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ErrorFlags {
    /// SOF incorrect or wrong byte count after MFAuthent
    pub protocol_err: bool,
    pub parity_err: bool,
    pub crc_err: bool,
    /// Bit collision detected
    pub coll_err: bool,
    /// FIFO written while full
    pub buffer_ovfl: bool,
    reserved: u1,
    /// Antenna drivers switched off due to overheating
    pub temp_err: bool,
    /// Data written to the FIFO at the wrong time
    pub wr_err: bool,
}

impl ErrorFlags {
    /// Errors that fail a transceive: buffer overflow, collision, CRC, parity, protocol
    pub const TRANSCEIVE_MASK: u8 = 0x1F;

    pub fn fails_transceive(self) -> bool {
        u8::from(self) & Self::TRANSCEIVE_MASK != 0
    }
}

register_impl!(Status2, address::STATUS2);
/// Receiver and transmitter status bits
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status2 {
    pub modem_state: u3,
    /// Crypto1 unit is switched on, only set by a successful MFAuthent
    pub mf_crypto1_on: bool,
    reserved: u2,
    pub i2c_force_hs: bool,
    pub temp_sens_clear: bool,
}

register_impl!(FifoLevel, address::FIFO_LEVEL);
/// Number of bytes stored in the FIFO buffer
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct FifoLevel {
    pub level: u7,
    /// Write-only, clears the FIFO and the buffer overflow flag
    pub flush_buffer: bool,
}

register_impl!(Control, 0x0C);
/// Miscellaneous control bits
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct Control {
    /// Number of valid bits in the last received byte, 0 means the whole byte is valid
    pub rx_last_bits: u3,
    reserved: u3,
    pub t_start_now: bool,
    pub t_stop_now: bool,
}

register_impl!(BitFraming, address::BIT_FRAMING);
/// Adjustments for bit-oriented frames
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitFraming {
    /// Number of bits of the last byte that will be transmitted, 0 means the whole byte
    pub tx_last_bits: u3,
    reserved: u1,
    /// Bit position of the first received bit
    pub rx_align: u3,
    /// Starts the transmission of data, only valid with the Transceive command
    pub start_send: bool,
}

impl BitFraming {
    /// Framing of a short frame (REQA, WUPA): 7 bits
    pub fn short_frame(start: bool) -> Self {
        let mut r = Self::default();
        r.set_tx_last_bits(u3::new(7));
        r.set_start_send(start);
        r
    }
}

register_impl!(TxControl, address::TX_CONTROL);
/// Controls the logical behavior of the antenna driver pins TX1 and TX2
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxControl {
    /// TX1 delivers the modulated 13.56 MHz carrier
    pub tx1_rf_en: bool,
    /// TX2 delivers the modulated 13.56 MHz carrier
    pub tx2_rf_en: bool,
    reserved: u1,
    pub tx2_cw: bool,
    pub inv_tx1_rf_off: bool,
    pub inv_tx2_rf_off: bool,
    pub inv_tx1_rf_on: bool,
    pub inv_tx2_rf_on: bool,
}

impl TxControl {
    /// Both antenna drivers
    pub const ANTENNA_MASK: u8 = 0x03;
}

register_impl!(RfCfg, address::RF_CFG);
/// Receiver gain
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct RfCfg {
    reserved: u4,
    /// 0 and 1: 18 dB, 2 and 3: 23 dB, 4: 33 dB, 5: 38 dB, 6: 43 dB, 7: 48 dB
    pub rx_gain: u3,
    reserved: u1,
}

register_impl!(TMode, address::T_MODE);
/// Internal timer settings
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct TMode {
    /// Higher 4 bits of the prescaler, the lower 8 are in TPrescalerReg
    pub t_prescaler_hi: u4,
    pub t_auto_restart: bool,
    pub t_gated: u2,
    /// Timer starts automatically at the end of the transmission
    pub t_auto: bool,
}
