//! Mifare Classic block access over an activated card
//!
//! The reader's crypto unit handles the cipher, so after [`authenticate`] the block
//! commands are plain frames. [`stop_crypto`] must run once the session is over, otherwise
//! the next card exchange goes out encrypted.
//!
//! [`authenticate`]: Mfrc522::authenticate
//! [`stop_crypto`]: Mfrc522::stop_crypto

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};

use crate::{
    commands::{Command, PiccCommand, MF_ACK},
    interface::Interface,
    nfc_a::Uid,
    registers::{address, Register, Status2},
    Error, Mfrc522, Response, Result,
};

pub mod access;

pub use access::{BlockAccess, BlocksAccess, TrailerAccess};

pub const BLOCK_SIZE: usize = 16;
pub const BLOCKS_PER_SECTOR: u8 = 4;
/// Index of the sector trailer inside a sector
pub const TRAILER_BLOCK: u8 = 3;

pub type Block = [u8; BLOCK_SIZE];

/// Block data followed by its CRC
const READ_RESPONSE_BITS: usize = (BLOCK_SIZE + 2) * 8;

/// 48 bit sector key
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Key(pub [u8; 6]);

impl Key {
    /// Factory default key
    pub const DEFAULT: Key = Key([0xFF; 6]);
}

impl core::fmt::Debug for Key {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Key(..)")
    }
}

#[cfg(feature = "defmt-03")]
impl defmt::Format for Key {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Key(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum AuthMode {
    KeyA,
    KeyB,
}

impl AuthMode {
    fn command(self) -> PiccCommand {
        match self {
            AuthMode::KeyA => PiccCommand::AuthKeyA,
            AuthMode::KeyB => PiccCommand::AuthKeyB,
        }
    }
}

/// Outcome of an authentication
///
/// Tells a wrong key apart from a failed exchange with the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum AuthStatus<E> {
    Ok,
    /// The exchange itself failed
    ReadFailure(Error<E>),
    /// The card rejected the key
    Failure,
}

impl<E> AuthStatus<E> {
    /// Turns everything but [`AuthStatus::Ok`] into an error
    pub fn into_result(self) -> Result<(), E> {
        match self {
            AuthStatus::Ok => Ok(()),
            AuthStatus::ReadFailure(e) => Err(e),
            AuthStatus::Failure => Err(Error::Authentication),
        }
    }
}

/// Sector trailer contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct SectorTrailer {
    /// Always reads back as zeros
    pub key_a: Key,
    pub access: BlocksAccess,
    /// Reads back as zeros unless the access bits make it readable
    pub key_b: Key,
}

impl SectorTrailer {
    pub fn to_block(&self) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        block[..6].copy_from_slice(&self.key_a.0);
        block[6..10].copy_from_slice(&self.access.encode());
        block[10..].copy_from_slice(&self.key_b.0);
        block
    }

    /// Splits a trailer block, `None` if the access bytes are inconsistent
    pub fn from_block(block: &Block) -> Option<Self> {
        let mut access = [0u8; 4];
        access.copy_from_slice(&block[6..10]);
        let mut key_a = [0u8; 6];
        key_a.copy_from_slice(&block[..6]);
        let mut key_b = [0u8; 6];
        key_b.copy_from_slice(&block[10..]);
        Some(Self {
            key_a: Key(key_a),
            access: BlocksAccess::verify(&access)?,
            key_b: Key(key_b),
        })
    }
}

/// Absolute block number of `block` in `sector`
pub fn block_address<E>(sector: u8, block: u8) -> Result<u8, E> {
    if block >= BLOCKS_PER_SECTOR {
        return Err(Error::InvalidAddress { sector, block });
    }
    sector
        .checked_mul(BLOCKS_PER_SECTOR)
        .and_then(|a| a.checked_add(block))
        .ok_or(Error::InvalidAddress { sector, block })
}

fn expect_ack<E>(res: &Response) -> Result<(), E> {
    res.expect_bits(4)?;
    let nibble = res.data[0] & 0x0F;
    if nibble != MF_ACK {
        warn!("Card answered {=u8:#X} instead of ACK", nibble);
        return Err(Error::Nack(nibble));
    }
    Ok(())
}

impl<I, RST, IRQ, D> Mfrc522<'_, I, RST, IRQ, D>
where
    I: Interface,
    RST: OutputPin,
    IRQ: InputPin,
    D: DelayNs,
{
    /// Authenticates `block` of `sector` on the selected card
    pub fn authenticate(
        &mut self,
        mode: AuthMode,
        sector: u8,
        block: u8,
        key: &Key,
        uid: &Uid,
    ) -> AuthStatus<I::Error> {
        match self.try_authenticate(mode, sector, block, key, uid) {
            Ok(true) => AuthStatus::Ok,
            Ok(false) => {
                debug!("Authentication to sector {=u8} rejected", sector);
                AuthStatus::Failure
            }
            Err(e) => AuthStatus::ReadFailure(e),
        }
    }

    fn try_authenticate(
        &mut self,
        mode: AuthMode,
        sector: u8,
        block: u8,
        key: &Key,
        uid: &Uid,
    ) -> Result<bool, I::Error> {
        let mut frame = [0u8; 12];
        frame[0] = mode.command() as u8;
        frame[1] = block_address(sector, block)?;
        frame[2..8].copy_from_slice(&key.0);
        frame[8..].copy_from_slice(uid.bytes());
        self.transceive(Command::MfAuthent, &frame)?;

        let status = Status2::read(&mut self.dev).map_err(Error::Interface)?;
        Ok(status.mf_crypto1_on())
    }

    /// Switches the crypto unit off, ending the authenticated session
    pub fn stop_crypto(&mut self) -> Result<(), I::Error> {
        self.clear_bits(address::STATUS2, 0x08)
    }

    /// Reads a block of an authenticated sector
    ///
    /// The card appends a CRC to the data, it is checked against the CRC coprocessor.
    pub fn read_block(&mut self, sector: u8, block: u8) -> Result<Block, I::Error> {
        let addr = block_address(sector, block)?;
        let mut frame = [PiccCommand::ReadBlock as u8, addr, 0, 0];
        let crc = self.calculate_crc(&frame[..2])?;
        frame[2..].copy_from_slice(&crc);

        let res = self.transceive(Command::Transceive, &frame)?;
        res.expect_bits(READ_RESPONSE_BITS)?;
        res.expect_bytes(BLOCK_SIZE)?;
        let mut out = [0u8; BLOCK_SIZE];
        out.copy_from_slice(&res.data);

        // the trailer is left in the FIFO past the read-back cap
        let mut actual = [0u8; 2];
        self.dev
            .register_read(address::FIFO_DATA, &mut actual)
            .map_err(Error::Interface)?;
        let expected = self.calculate_crc(&out)?;
        if actual != expected {
            warn!("Block {=u8} CRC mismatch", addr);
            return Err(Error::Crc { expected, actual });
        }
        Ok(out)
    }

    /// Writes a block of an authenticated sector
    ///
    /// The card has to acknowledge both the command and the data.
    pub fn write_block(&mut self, sector: u8, block: u8, data: &Block) -> Result<(), I::Error> {
        let addr = block_address(sector, block)?;
        let mut frame = [PiccCommand::WriteBlock as u8, addr, 0, 0];
        let crc = self.calculate_crc(&frame[..2])?;
        frame[2..].copy_from_slice(&crc);
        let res = self.transceive(Command::Transceive, &frame)?;
        expect_ack(&res)?;

        let mut payload = [0u8; BLOCK_SIZE + 2];
        payload[..BLOCK_SIZE].copy_from_slice(data);
        let crc = self.calculate_crc(data)?;
        payload[BLOCK_SIZE..].copy_from_slice(&crc);
        let res = self.transceive(Command::Transceive, &payload)?;
        expect_ack(&res)?;
        debug!("Wrote block {=u8}", addr);
        Ok(())
    }

    pub fn read_sector_trail(&mut self, sector: u8) -> Result<Block, I::Error> {
        self.read_block(sector, TRAILER_BLOCK)
    }

    pub fn write_sector_trail(
        &mut self,
        sector: u8,
        key_a: &Key,
        key_b: &Key,
        access: &BlocksAccess,
    ) -> Result<(), I::Error> {
        let trailer = SectorTrailer {
            key_a: *key_a,
            access: *access,
            key_b: *key_b,
        };
        self.write_block(sector, TRAILER_BLOCK, &trailer.to_block())
    }

    /// Selects a card, authenticates to `sector` with its trailer and runs `f`
    ///
    /// The crypto unit is switched off afterwards whatever the outcome.
    fn with_sector<T>(
        &mut self,
        mode: AuthMode,
        sector: u8,
        key: &Key,
        f: impl FnOnce(&mut Self) -> Result<T, I::Error>,
    ) -> Result<T, I::Error> {
        let uid = self.select_card()?;
        let res = self
            .authenticate(mode, sector, TRAILER_BLOCK, key, &uid)
            .into_result()
            .and_then(|_| f(self));
        let stopped = self.stop_crypto();
        let out = res?;
        stopped?;
        Ok(out)
    }

    /// Waits for a card and reads one of its blocks
    pub fn read_card(
        &mut self,
        mode: AuthMode,
        sector: u8,
        block: u8,
        key: &Key,
    ) -> Result<Block, I::Error> {
        self.with_sector(mode, sector, key, |drv| drv.read_block(sector, block))
    }

    /// Waits for a card and reads the trailer of `sector`
    pub fn read_auth(&mut self, mode: AuthMode, sector: u8, key: &Key) -> Result<Block, I::Error> {
        self.with_sector(mode, sector, key, |drv| drv.read_sector_trail(sector))
    }

    /// Waits for a card and writes one of its blocks
    pub fn write_card(
        &mut self,
        mode: AuthMode,
        sector: u8,
        block: u8,
        data: &Block,
        key: &Key,
    ) -> Result<(), I::Error> {
        self.with_sector(mode, sector, key, |drv| drv.write_block(sector, block, data))
    }

    /// Waits for a card and rewrites the keys and access bits of `sector`
    pub fn write_card_trailer(
        &mut self,
        mode: AuthMode,
        sector: u8,
        key_a: &Key,
        key_b: &Key,
        access: &BlocksAccess,
        key: &Key,
    ) -> Result<(), I::Error> {
        self.with_sector(mode, sector, key, |drv| {
            drv.write_sector_trail(sector, key_a, key_b, access)
        })
    }
}
