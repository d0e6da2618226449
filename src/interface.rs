use embedded_hal::spi::SpiDevice;

/// Largest number of data bytes moved in a single bus exchange
pub const MAX_TRANSFER: usize = 64;

pub trait Interface: Sized {
    type Error;
    /// Write one or more bytes to the same register
    ///
    /// Writing several bytes only makes sense for the FIFO data register
    fn register_write(&mut self, addr: u8, buf: &[u8]) -> Result<(), Self::Error>;
    /// Read one or more bytes from the same register
    fn register_read(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), Self::Error>;
}

pub mod spi_modes {
    /// Address byte for writing register `addr`
    pub const fn reg_write(addr: u8) -> u8 {
        (addr << 1) & 0x7E
    }
    /// Address byte for reading register `addr`
    pub const fn reg_read(addr: u8) -> u8 {
        reg_write(addr) | 0x80
    }
}

/// SPI bus adapter
///
/// Every access is one full-duplex transfer with equal-length write and read buffers.
pub struct SpiInterface<S: SpiDevice> {
    dev: S,
}

impl<S: SpiDevice> Interface for SpiInterface<S> {
    type Error = S::Error;

    fn register_write(&mut self, addr: u8, buf: &[u8]) -> Result<(), Self::Error> {
        trace!("Register {=u8:#X}, write {=[u8]:02X}", addr, buf);
        for chunk in buf.chunks(MAX_TRANSFER) {
            let mut tx = [0u8; MAX_TRANSFER + 1];
            let mut rx = [0u8; MAX_TRANSFER + 1];
            let len = chunk.len() + 1;
            tx[0] = spi_modes::reg_write(addr);
            tx[1..len].copy_from_slice(chunk);
            self.dev.transfer(&mut rx[..len], &tx[..len])?;
        }
        Ok(())
    }

    fn register_read(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), Self::Error> {
        for chunk in buf.chunks_mut(MAX_TRANSFER) {
            // the address is clocked out once per byte, the last byte only clocks in data
            let mut tx = [spi_modes::reg_read(addr); MAX_TRANSFER + 1];
            let mut rx = [0u8; MAX_TRANSFER + 1];
            let len = chunk.len() + 1;
            tx[chunk.len()] = 0;
            self.dev.transfer(&mut rx[..len], &tx[..len])?;
            chunk.copy_from_slice(&rx[1..len]);
        }
        trace!("Register {=u8:#X}, read {=[u8]:02X}", addr, buf);
        Ok(())
    }
}

impl<S: SpiDevice> SpiInterface<S> {
    pub fn new(dev: S) -> Self {
        Self { dev }
    }

    /// Gives the SPI device back
    pub fn release(self) -> S {
        self.dev
    }
}
