//! Access conditions stored in the sector trailer
//!
//! Each block of a sector has a 3 bit access code C1 C2 C3. The trailer stores the codes
//! of all four blocks bit-plane by bit-plane, each plane once inverted and once plain:
//!
//! ```text
//! byte 6: !C2 (b3..b0) | !C1 (b3..b0)
//! byte 7:  C1 (b3..b0) | !C3 (b3..b0)
//! byte 8:  C3 (b3..b0) |  C2 (b3..b0)
//! byte 9:  byte 6 ^ byte 7 ^ byte 8
//! ```

use bilge::prelude::*;
use bitvec::prelude::*;

/// Access condition of a data block, named after the operations it allows
///
/// The discriminant is the C1 C2 C3 code, C1 being the most significant bit.
#[bitsize(3)]
#[derive(FromBits, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum BlockAccess {
    /// Read, write, increment, decrement with either key (transport configuration)
    #[default]
    AnyKey = 0b000,
    /// Read with either key, no write
    ReadAb = 0b010,
    /// Read with either key, write with key B
    ReadAbWriteB = 0b100,
    /// Read with either key, write and increment with key B, decrement with either key
    ReadAbWriteBIncB = 0b110,
    /// Read and decrement with either key, for value blocks
    ReadAbDecAb = 0b001,
    /// Read and write with key B
    ReadWriteB = 0b011,
    /// Read with key B
    ReadB = 0b101,
    /// No access
    Never = 0b111,
}

/// Access condition of the sector trailer
///
/// Key A is never readable. Key B is readable with key A when the access bits are.
#[bitsize(3)]
#[derive(FromBits, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum TrailerAccess {
    /// Keys written with key A, access bits read with key A, key B readable with key A
    KeyAWritesKeys = 0b000,
    /// Access bits and key B read with key A, nothing writable
    KeyAReadOnly = 0b010,
    /// Keys written with key B, access bits read with either key
    KeyBWritesKeys = 0b100,
    /// Access bits read with either key, nothing writable
    Frozen = 0b110,
    /// Keys and access bits written with key A (transport configuration)
    #[default]
    KeyAWritesAll = 0b001,
    /// Keys and access bits written with key B
    KeyBWritesAll = 0b011,
    /// Access bits written with key B, keys locked
    KeyBWritesAccess = 0b101,
    /// Access bits read with either key, nothing writable
    Locked = 0b111,
}

/// Access codes of the four blocks of a sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct BlocksAccess {
    pub b0: BlockAccess,
    pub b1: BlockAccess,
    pub b2: BlockAccess,
    pub b3: TrailerAccess,
}

/// Bit of the 3 bit code holding C1, C2 and C3
const fn code_bit(plane: usize) -> usize {
    3 - plane
}

impl BlocksAccess {
    fn codes(&self) -> [u8; 4] {
        [
            u3::from(self.b0).value(),
            u3::from(self.b1).value(),
            u3::from(self.b2).value(),
            u3::from(self.b3).value(),
        ]
    }

    /// Collects bit-plane C`plane` of every block into a nibble, block 0 in bit 0
    fn plane(&self, plane: usize) -> u8 {
        let mut nibble = 0u8;
        for (block, code) in self.codes().iter().enumerate() {
            let bit = code.view_bits::<Lsb0>()[code_bit(plane)];
            nibble.view_bits_mut::<Lsb0>().set(block, bit);
        }
        nibble
    }

    /// Serializes to bytes 6..10 of the sector trailer
    pub fn encode(&self) -> [u8; 4] {
        let (c1, c2, c3) = (self.plane(1), self.plane(2), self.plane(3));
        let b0 = (!c2 << 4 & 0xF0) | (!c1 & 0x0F);
        let b1 = (c1 << 4 & 0xF0) | (!c3 & 0x0F);
        let b2 = (c3 << 4 & 0xF0) | (c2 & 0x0F);
        [b0, b1, b2, b0 ^ b1 ^ b2]
    }

    /// Reads the codes from the plain copies in bytes 1 and 2
    ///
    /// The inverted copies and the check byte are ignored, see [`Self::verify`].
    pub fn decode(bytes: &[u8; 4]) -> Self {
        let planes = [bytes[1] >> 4, bytes[2] & 0x0F, bytes[2] >> 4];
        let code = |block: usize| {
            let mut code = 0u8;
            for (i, plane) in planes.iter().enumerate() {
                let bit = plane.view_bits::<Lsb0>()[block];
                code.view_bits_mut::<Lsb0>().set(code_bit(i + 1), bit);
            }
            u3::new(code)
        };
        Self {
            b0: BlockAccess::from(code(0)),
            b1: BlockAccess::from(code(1)),
            b2: BlockAccess::from(code(2)),
            b3: TrailerAccess::from(code(3)),
        }
    }

    /// Decodes `bytes` only if the inverted copies and the check byte agree
    pub fn verify(bytes: &[u8; 4]) -> Option<Self> {
        let access = Self::decode(bytes);
        (access.encode() == *bytes).then_some(access)
    }
}
