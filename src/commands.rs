/// Commands executed by the reader itself, written to the command register
///
/// From the [datasheet](https://www.nxp.com/docs/en/data-sheet/MFRC522.pdf), section 10.3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// No action, cancels current command execution
    Idle = 0x00,
    /// Stores 25 bytes into the internal buffer
    Mem = 0x01,
    /// Generates a 10-byte random ID number
    GenerateRandomId = 0x02,
    /// Activates the CRC coprocessor
    CalcCrc = 0x03,
    /// Transmits data from the FIFO buffer
    Transmit = 0x04,
    /// No command change, can be used to modify the command register bits without affecting
    /// the command
    NoCmdChange = 0x07,
    /// Activates the receiver circuits
    Receive = 0x08,
    /// Transmits data from FIFO buffer to antenna and automatically activates the receiver
    /// after transmission
    Transceive = 0x0C,
    /// Performs the MIFARE standard authentication as a reader
    MfAuthent = 0x0E,
    /// Resets the MFRC522
    SoftReset = 0x0F,
}

impl Command {
    /// Interrupts enabled while the command runs, and the subset that marks it as done
    ///
    /// Returns `(enable, wait)`
    pub const fn irq_masks(self) -> (u8, u8) {
        match self {
            // ErrIEn | IdleIEn, wait for IdleIRq
            Command::MfAuthent => (0x12, 0x10),
            // everything but HiAlert, wait for RxIRq or IdleIRq
            Command::Transceive => (0x77, 0x30),
            _ => (0x00, 0x00),
        }
    }
}

/// Commands sent over the air to the card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum PiccCommand {
    /// REQuest type A, sent as a 7 bit short frame
    ReqA = 0x26,
    /// Select cascade level 1, followed by 0x20 for anticollision or 0x70 for select
    SelCl1 = 0x93,
    /// Authenticate with key A
    AuthKeyA = 0x60,
    /// Authenticate with key B
    AuthKeyB = 0x61,
    ReadBlock = 0x30,
    WriteBlock = 0xA0,
    /// HLTA, followed by 0x00
    Halt = 0x50,
}

/// NVB for a cascade level 1 anticollision frame: 2 bytes, no UID bits
pub const NVB_ANTICOLLISION: u8 = 0x20;
/// NVB for a cascade level 1 select frame: 7 bytes
pub const NVB_SELECT: u8 = 0x70;

/// 4 bit acknowledge sent by Mifare Classic cards
pub const MF_ACK: u8 = 0x0A;
