use crate::{
    config::SdMmcSpiConfig,
    consts::{commands, tokens},
    crc::crc7,
    device::IdleHook,
    response::R1Response,
    transport::BusError,
    Error, SdMmcSpi,
};

use crate::trace;
use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

/// Six byte command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    /// Command with the transmission bit set, see [`commands`](crate::consts::commands).
    pub cmd: u8,
    pub arg: u32,
}

impl CommandFrame {
    pub fn new(cmd: u8, arg: u32) -> Self {
        CommandFrame { cmd, arg }
    }

    /// Serialize the frame, CRC7 and end bit included.
    pub fn to_bytes(&self) -> [u8; 6] {
        let mut buf = [
            self.cmd,
            (self.arg >> 24) as u8,
            (self.arg >> 16) as u8,
            (self.arg >> 8) as u8,
            self.arg as u8,
            0,
        ];
        let crc_index = buf.len() - 1;

        buf[crc_index] = (crc7(&buf[..crc_index]) << 1) | 0x01;

        buf
    }
}

impl<Spi: Transfer<u8>, Cs: OutputSwitch, Hook: IdleHook, Config: SdMmcSpiConfig>
    SdMmcSpi<Spi, Cs, Hook, Config>
where
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Wait for token.
    fn wait_for_token<F: Fn(u8) -> bool>(
        &self,
        token_validator: F,
        error: BusError<Spi, Cs>,
    ) -> Result<u8, BusError<Spi, Cs>> {
        for _ in 0..Config::CMD_MAX_ATTEMPTS {
            let token = self.bus.receive()?;

            if token_validator(token) {
                return Ok(token);
            }

            Self::delay();
        }

        Err(error)
    }

    /// Wait available state of card.
    pub(crate) fn wait_available_state(&self) -> Result<(), BusError<Spi, Cs>> {
        self.wait_for_token(
            |token| token == tokens::AVAILABLE,
            Error::TimeoutWaitAvailable,
        )
        .map(|_| ())
    }

    /// Poll for the first byte of a data transfer.
    ///
    /// Returns the fill byte itself when nothing else shows up within
    /// `attempts`, callers classify it with [`DataToken`](crate::DataToken).
    pub(crate) fn wait_data_token(&self, attempts: usize) -> Result<u8, BusError<Spi, Cs>> {
        for _ in 0..attempts {
            let token = self.bus.receive()?;

            if token != tokens::AVAILABLE {
                return Ok(token);
            }
        }

        Ok(tokens::AVAILABLE)
    }

    /// Send command implementation.
    fn send_command_impl(&self, cmd: u8, arg: u32) -> Result<R1Response, BusError<Spi, Cs>> {
        // A card woken up mid-operation may hold the bus low until reset.
        if cmd != commands::CMD0 {
            self.wait_available_state()?;
        }

        self.bus.send_slice(&CommandFrame::new(cmd, arg).to_bytes())?;

        for _ in 0..Config::READ_R1_ATTEMPTS {
            let r1 = R1Response::from(self.bus.receive()?);

            if r1.is_valid() {
                trace!(
                    "CMD{} arg 0x{:08X}: 0x{:02X}",
                    commands::index(cmd),
                    arg,
                    r1.bits()
                );
                return Ok(r1);
            }
        }

        trace!("CMD{} arg 0x{:08X}: timeout", commands::index(cmd), arg);
        Err(Error::TimeoutCommand(cmd))
    }

    /// Send command.
    ///
    /// Application commands are prefixed with APP_CMD, whose answer is not
    /// checked.
    pub(crate) fn send_command(&self, cmd: u8, arg: u32) -> Result<R1Response, BusError<Spi, Cs>> {
        if (cmd & commands::ACMD_FLAG) != 0 {
            self.send_command_impl(commands::CMD55, 0x0000_0000)?;
        }

        self.send_command_impl(cmd & !commands::ACMD_FLAG, arg)
    }

    /// Read the 32-bit R3/R7 extension following an R1 byte.
    ///
    /// Only the caller knows which commands carry one.
    pub(crate) fn read_extended(&self) -> Result<u32, BusError<Spi, Cs>> {
        let high = self.bus.receive_word()?;
        let low = self.bus.receive_word()?;

        Ok((u32::from(high) << 16) | u32::from(low))
    }
}
