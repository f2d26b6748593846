use crate::{config::SdMmcSpiConfig, BlockBuffer, SdMmcSpi};

use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

/// Cooperative hook into the player's user interface.
///
/// Called after every block transfer and before every bring-up attempt, so
/// key scanning and playback keep running while storage stalls.
pub trait IdleHook {
    /// Run one slice of idle work.
    fn idle(&mut self);

    /// A read was refused because no usable card is present.
    fn card_gone(&mut self) {}
}

/// Hook that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl IdleHook for NoopHook {
    fn idle(&mut self) {}
}

/// Block device as seen by the decoder and the menu walker.
///
/// The SD driver is the default implementation; a boot loader may install
/// another one.
pub trait BlockDevice {
    /// Capacity in 512-byte blocks, read once the device is ready.
    fn block_count(&self) -> u64;

    /// Read consecutive blocks into `dest`, starting at `first_block`.
    ///
    /// Returns the number of blocks read before the first failure; a short
    /// count means the card is gone.
    fn read(&self, first_block: u32, dest: &mut [BlockBuffer]) -> usize;
}

impl<Spi: Transfer<u8>, Cs: OutputSwitch, Hook: IdleHook, Config: SdMmcSpiConfig> BlockDevice
    for SdMmcSpi<Spi, Cs, Hook, Config>
where
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    fn block_count(&self) -> u64 {
        self.session().block_count()
    }

    fn read(&self, first_block: u32, dest: &mut [BlockBuffer]) -> usize {
        self.read_blocks(first_block, dest)
    }
}
