//! ISO14443A activation: request, anticollision and select, single size UIDs only

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};

use crate::{
    commands::{Command, PiccCommand, NVB_ANTICOLLISION, NVB_SELECT},
    interface::Interface,
    registers::{address, BitFraming, Register},
    Error, Mfrc522, Result,
};

/// ATQA length
pub const ATQA_BITS: usize = 16;
/// SAK + CRC length
pub const SAK_BITS: usize = 24;

/// Single size UID with its check byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Uid {
    bytes: [u8; 4],
    bcc: u8,
}

impl Uid {
    /// Validates an anticollision response: 4 UID bytes followed by their XOR
    pub fn from_anticollision<E>(data: &[u8]) -> Result<Self, E> {
        let &[a, b, c, d, bcc] = data else {
            return Err(Error::ByteLength {
                expected: 5,
                actual: data.len(),
            });
        };
        let bytes = [a, b, c, d];
        let expected = Self::check_byte(&bytes);
        if expected != bcc {
            return Err(Error::Checksum {
                expected,
                actual: bcc,
            });
        }
        Ok(Self { bytes, bcc })
    }

    pub fn new(bytes: [u8; 4]) -> Self {
        Self {
            bytes,
            bcc: Self::check_byte(&bytes),
        }
    }

    pub fn check_byte(bytes: &[u8; 4]) -> u8 {
        bytes.iter().fold(0, |acc, b| acc ^ b)
    }

    pub fn bytes(&self) -> &[u8; 4] {
        &self.bytes
    }

    pub fn bcc(&self) -> u8 {
        self.bcc
    }

    pub fn to_u32(&self) -> u32 {
        u32::from_be_bytes(self.bytes)
    }
}

impl<I, RST, IRQ, D> Mfrc522<'_, I, RST, IRQ, D>
where
    I: Interface,
    RST: OutputPin,
    IRQ: InputPin,
    D: DelayNs,
{
    /// Sends REQA, a card in the field answers with its 16 bit ATQA
    pub fn request(&mut self) -> Result<[u8; 2], I::Error> {
        BitFraming::short_frame(false)
            .write(&mut self.dev)
            .map_err(Error::Interface)?;
        let res = self.transceive(Command::Transceive, &[PiccCommand::ReqA as u8])?;
        res.expect_bits(ATQA_BITS)?;
        Ok([res.data[0], res.data[1]])
    }

    /// Runs a single cascade level 1 anticollision round
    pub fn anticollision(&mut self) -> Result<Uid, I::Error> {
        self.write_register(address::BIT_FRAMING, 0x00)?;
        let res = self.transceive(
            Command::Transceive,
            &[PiccCommand::SelCl1 as u8, NVB_ANTICOLLISION],
        )?;
        let uid = Uid::from_anticollision(&res.data)?;
        debug!("Anticollision found {=[u8]:02X}", &uid.bytes[..]);
        Ok(uid)
    }

    /// Selects the card with `uid`, returns its SAK
    pub fn select_tag(&mut self, uid: &Uid) -> Result<u8, I::Error> {
        let mut frame = [0u8; 9];
        frame[0] = PiccCommand::SelCl1 as u8;
        frame[1] = NVB_SELECT;
        frame[2..6].copy_from_slice(&uid.bytes);
        frame[6] = uid.bcc;
        let crc = self.calculate_crc(&frame[..7])?;
        frame[7..].copy_from_slice(&crc);

        let res = self.transceive(Command::Transceive, &frame)?;
        res.expect_bits(SAK_BITS)?;
        let sak = res.data[0];
        debug!("Selected {=[u8]:02X}, SAK {=u8:#X}", &uid.bytes[..], sak);
        Ok(sak)
    }

    /// Waits for a card and brings it into the selected state
    pub fn select_card(&mut self) -> Result<Uid, I::Error> {
        self.wait()?;
        self.init()?;
        let atqa = self.request()?;
        trace!("ATQA {=[u8]:02X}", &atqa[..]);
        let uid = self.anticollision()?;
        self.select_tag(&uid)?;
        Ok(uid)
    }

    /// Waits for a card and returns its UID
    pub fn read_uid(&mut self) -> Result<Uid, I::Error> {
        let uid = self.select_card()?;
        self.stop_crypto()?;
        Ok(uid)
    }

    /// Puts the selected card into the halt state
    ///
    /// The card doesn't answer HLTA, so a missing response is the expected outcome.
    pub fn halt_card(&mut self) -> Result<(), I::Error> {
        let mut frame = [PiccCommand::Halt as u8, 0x00, 0, 0];
        let crc = self.calculate_crc(&frame[..2])?;
        frame[2..].copy_from_slice(&crc);
        match self.transceive(Command::Transceive, &frame) {
            Err(Error::NoResponse) => Ok(()),
            Err(e) => Err(e),
            Ok(res) => {
                warn!("Card answered HLTA with {=usize} bits", res.bits);
                Err(Error::BitLength {
                    expected: 0,
                    actual: res.bits,
                })
            }
        }
    }
}
