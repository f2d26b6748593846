//! SD/MMC storage core of the Open Source Audio Bible player, written in
//! Embedded Rust after [sdmmc-spi](https://crates.io/crates/sdmmc-spi).
//!
//! This crate brings an SD/MMC card from power-on to a state where 512-byte
//! blocks can be read by sector number over a plain SPI bus, and exposes the
//! block reads the audio decoder and menu walker depend on.
//!
//! ## Features
//!
//! * `log`: Enabled by default. Generates log messages using the `log` crate.
//! * `defmt-log`: By turning off the default features and enabling the
//!   `defmt-log` feature you can configure this crate to log messages over defmt
//!   instead.
//!
//! You cannot enable both the `log` feature and the `defmt-log` feature.

#![cfg_attr(not(test), no_std)]

mod block;
mod bring_up;
mod cid;
mod command;
mod config;
mod consts;
mod crc;
mod csd;
mod device;
mod response;
mod session;
mod transport;

pub use crate::cid::{Cid, CidData};
pub use crate::command::CommandFrame;
pub use crate::config::{DefaultSdMmcSpiConfig, SdMmcSpiConfig};
pub use crate::consts::{BLOCK_SIZE, BLOCK_WORDS};
pub use crate::csd::{CapacityProvider, Csd, CsdData, CsdV1, CsdV2};
pub use crate::device::{BlockDevice, IdleHook, NoopHook};
pub use crate::response::{DataErrorFlags, DataToken, IfCond, Ocr, R1Response, ResponseToken};
pub use crate::session::{CardSession, CardStatus, CardType, Geometry, RetryBudget};
pub use crate::transport::{BusError, SpiBus};
pub use diskio::{
    BlockSize, DiskioDevice, Error as DiskioError, IoctlCmd, Lba, Status, StatusFlag,
};

use core::{
    cell::{Cell, RefCell},
    marker::PhantomData,
};
use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(feature = "log")]
use log::{debug, error, info, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, error, info, trace, warn};

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::debug! but only type-checks its arguments
macro_rules! debug {
    ($($arg:tt)+) => {{
        let _ = ::core::format_args!($($arg)+);
    }};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::error! but only type-checks its arguments
macro_rules! error {
    ($($arg:tt)+) => {{
        let _ = ::core::format_args!($($arg)+);
    }};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::info! but only type-checks its arguments
macro_rules! info {
    ($($arg:tt)+) => {{
        let _ = ::core::format_args!($($arg)+);
    }};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::trace! but only type-checks its arguments
macro_rules! trace {
    ($($arg:tt)+) => {{
        let _ = ::core::format_args!($($arg)+);
    }};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::warn! but only type-checks its arguments
macro_rules! warn {
    ($($arg:tt)+) => {{
        let _ = ::core::format_args!($($arg)+);
    }};
}

/// One block as the player consumes it, 256 big-endian words.
pub type BlockBuffer = [u16; BLOCK_WORDS];

/// [`SdMmcSpi`] result error.
///
/// `T` - transport error type.
/// `S` - select switch type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<T, S> {
    /// Error from the SPI peripheral.
    Transport(T),
    /// Couldn't set a select.
    SelectError(S),
    /// No response when waiting for the card to not be busy.
    TimeoutWaitAvailable,
    /// No response when executing this command.
    TimeoutCommand(u8),
    /// Unexpected R1 response (command, response).
    ErrorCommand(u8, u8),
    /// Card does not support the supplied voltage (OCR).
    UnsupportedVoltage(u32),
    /// Card refused to send a register.
    RegisterReadError,
    /// No data start token when reading data from the card.
    TimeoutReadBuffer,
    /// Card answered a read with a data error token.
    DataError(u8),
    /// Card answered a read with a token outside the defined range.
    ReadError(u8),
    /// CRC mismatch (card, host).
    CrcError(u16, u16),
    /// Can't perform this operation with the card in this state.
    BadState,
    /// Couldn't find the card within the retry budget.
    CardNotFound,
}

impl<T, S> Error<T, S> {
    /// Expected conditions that are handled by branching and never counted
    /// against the session.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ErrorCommand(..) | Error::DataError(_) | Error::BadState
        )
    }
}

/// Error type alias.
type ErrorFor<T> = <T as DiskioDevice>::HardwareError;

/// SD Card SPI driver.
///
/// `Spi` - SPI.
/// `Cs` - Chip select output switch.
/// `Hook` - Idle hook run after every block transfer.
/// `Config` - Config implementation of driver config trait.
///
/// Reads take `&self`, the session lives in a [`Cell`] and is only changed by
/// bring-up and error counting. The hook must not call back into the driver.
pub struct SdMmcSpi<Spi: Transfer<u8>, Cs: OutputSwitch, Hook: IdleHook, Config: SdMmcSpiConfig>
{
    bus: SpiBus<Spi, Cs>,
    hook: RefCell<Hook>,
    session: Cell<CardSession>,
    config: PhantomData<Config>,
}

impl<Spi: Transfer<u8>, Cs: OutputSwitch, Hook: IdleHook, Config: SdMmcSpiConfig>
    SdMmcSpi<Spi, Cs, Hook, Config>
where
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Creates a new [`SdMmcSpi<Spi, Cs, Hook, Config>`].
    ///
    /// `spi` - SPI instance.
    /// `cs` - chip select output switch.
    /// `hook` - cooperative idle hook.
    pub fn new(spi: Spi, cs: Cs, hook: Hook) -> Self {
        SdMmcSpi {
            bus: SpiBus::new(spi, cs),
            hook: RefCell::new(hook),
            session: Cell::new(CardSession::new()),
            config: PhantomData::<Config>,
        }
    }

    /// Release the bus and the hook.
    pub fn free(self) -> (Spi, Cs, Hook) {
        let (spi, cs) = self.bus.free();
        (spi, cs, self.hook.into_inner())
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> CardSession {
        self.session.get()
    }

    /// Access the idle hook.
    pub fn hook_mut(&mut self) -> &mut Hook {
        self.hook.get_mut()
    }

    /// Forget the card; the next [`ensure_ready`](Self::ensure_ready) runs a
    /// full bring-up.
    pub fn invalidate(&self) {
        info!("SD session invalidated");
        let mut session = self.session.get();
        session.invalidate();
        self.session.set(session);
    }

    /// Count one protocol violation against the session.
    fn record_error(&self) {
        let mut session = self.session.get();
        session.record_error();
        self.session.set(session);
    }

    /// Delay.
    fn delay() {
        for i in 0..Config::DELAY_DUMMY_CYCLES {
            unsafe { core::ptr::read_volatile(&i) };
        }
    }

    /// Validate buffer for read.
    fn validate_buffer_len(buf_len: usize) -> Result<(), DiskioError<ErrorFor<Self>>> {
        if buf_len == 0 || buf_len % BLOCK_SIZE != 0 {
            error!(
                "SD invalid buffer, length: {}, block size: {}",
                buf_len, BLOCK_SIZE
            );
            Err(DiskioError::InvalidArgument)
        } else {
            Ok(())
        }
    }

    /// Validate initialzed.
    fn validate_initialized(&self) -> Result<(), DiskioError<ErrorFor<Self>>> {
        if self.session.get().is_usable() {
            Ok(())
        } else {
            Err(DiskioError::NotInitialized)
        }
    }
}

impl<Spi: Transfer<u8>, Cs: OutputSwitch, Hook: IdleHook, Config: SdMmcSpiConfig> DiskioDevice
    for SdMmcSpi<Spi, Cs, Hook, Config>
where
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    type HardwareError = Error<Spi::Error, Cs::Error>;

    fn status(&self) -> Status {
        let session = self.session.get();

        if session.is_usable() {
            Status::default()
        } else if session.error_count() > 0 {
            StatusFlag::ErrorOccured | StatusFlag::NotInitialized
        } else {
            StatusFlag::NotInitialized.into()
        }
    }

    fn reset(&mut self) {
        info!("SD reset invoked");
        self.invalidate();
    }

    fn initialize(&mut self) -> Result<(), DiskioError<Self::HardwareError>> {
        if self.session.get().is_usable() {
            warn!("SD already is initialized");
            return Err(DiskioError::AlreadyInitialized);
        }

        self.bring_up(Config::BRING_UP_TRIES)
            .map(|_| ())
            .map_err(DiskioError::Hardware)
    }

    fn read(&self, buf: &mut [u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        Self::validate_buffer_len(buf.len())?;
        self.validate_initialized()?;

        let mut block: BlockBuffer = [0; BLOCK_WORDS];

        for (i, chunk) in buf.chunks_mut(BLOCK_SIZE).enumerate() {
            self.read_block((lba as u32).wrapping_add(i as u32), &mut block)
                .map_err(DiskioError::Hardware)?;

            for (bytes, word) in chunk.chunks_mut(2).zip(block.iter()) {
                bytes.copy_from_slice(&word.to_be_bytes());
            }
        }

        Ok(())
    }

    fn write(&self, _buf: &[u8], _lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        Err(DiskioError::NotSupported)
    }

    fn ioctl(&self, cmd: IoctlCmd) -> Result<(), DiskioError<Self::HardwareError>> {
        match cmd {
            IoctlCmd::CtrlSync => Ok(()),
            IoctlCmd::GetBlockSize(block_size) => {
                *block_size = BLOCK_SIZE;
                Ok(())
            }
            _ => Err(DiskioError::NotSupported),
        }
    }
}
