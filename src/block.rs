use crate::{
    cid::{Cid, CidData},
    config::SdMmcSpiConfig,
    consts::{args, commands, tokens},
    crc::crc16_words,
    device::IdleHook,
    response::{DataToken, R1Response},
    transport::BusError,
    BlockBuffer, Error, SdMmcSpi,
};

use crate::{trace, warn};
use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

impl<Spi: Transfer<u8>, Cs: OutputSwitch, Hook: IdleHook, Config: SdMmcSpiConfig>
    SdMmcSpi<Spi, Cs, Hook, Config>
where
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Idle bytes clocked out after a complete block.
    const BLOCK_FLUSH_BYTES: usize = 2;
    /// Idle bytes clocked out after a failed read.
    const FAILURE_FLUSH_BYTES: usize = 1;

    /// Read one block.
    ///
    /// Refused without touching the bus unless the session is usable. On any
    /// failure `buf` is zero-filled; protocol violations and timeouts are
    /// counted against the session, data error tokens and R1 flags are not.
    /// The idle hook runs after every transfer, whatever its outcome.
    pub fn read_block(&self, sector: u32, buf: &mut BlockBuffer) -> Result<(), BusError<Spi, Cs>> {
        let session = self.session.get();

        if !session.is_usable() {
            buf.fill(0);
            self.hook.borrow_mut().card_gone();
            return Err(Error::BadState);
        }

        let address = session.block_address(sector);
        let result = self.bus.cs_scope(|_| self.transfer_block(address, buf));
        let flush = match result {
            Ok(()) => Self::BLOCK_FLUSH_BYTES,
            Err(_) => Self::FAILURE_FLUSH_BYTES,
        };
        let result = result.and(self.bus.clock_pulses(flush));

        if let Err(err) = &result {
            buf.fill(0);

            if !err.is_transient() {
                self.record_error();
                warn!(
                    "SD read of sector {} failed, errors: {}",
                    sector,
                    self.session.get().error_count()
                );
            }
        }

        self.hook.borrow_mut().idle();

        result
    }

    /// Read consecutive blocks, stopping at the first failure.
    ///
    /// Returns the count of blocks read; the slot of the failed block is
    /// zero-filled and later slots are left untouched.
    pub fn read_blocks(&self, first_sector: u32, dest: &mut [BlockBuffer]) -> usize {
        let mut completed = 0;

        for (i, buf) in dest.iter_mut().enumerate() {
            if self
                .read_block(first_sector.wrapping_add(i as u32), buf)
                .is_err()
            {
                break;
            }

            completed += 1;
        }

        completed
    }

    /// Check the card still answers.
    ///
    /// Re-issues SET_BLOCKLEN on a usable session and counts an error when
    /// the card does not accept it. Returns whether the session is still
    /// usable.
    pub fn poll_presence(&self) -> bool {
        if !self.session.get().is_usable() {
            return false;
        }

        let result = self
            .bus
            .cs_scope(|_| self.send_command(commands::CMD16, args::BLOCK_LEN));
        let result = result.and_then(|r1| {
            self.bus
                .clock_pulses(Self::FAILURE_FLUSH_BYTES)
                .map(|()| r1)
        });

        if !matches!(result, Ok(R1Response::READY_STATE)) {
            self.record_error();
            warn!("SD presence check failed");
        }

        self.session.get().is_usable()
    }

    /// Read the Card Identification register of a usable card.
    pub fn read_cid(&self) -> Result<Cid, BusError<Spi, Cs>> {
        if !self.session.get().is_usable() {
            return Err(Error::BadState);
        }

        let mut cid_data: CidData = Default::default();

        let result = self.bus.cs_scope(|_| {
            self.read_register(commands::CMD10, Config::CID_TOKEN_ATTEMPTS, &mut cid_data)
        });
        let result = result.and(self.bus.clock_pulses(Self::FAILURE_FLUSH_BYTES));

        result.map(|()| Cid::from(cid_data))
    }

    /// READ_SINGLE_BLOCK with chip select held.
    fn transfer_block(&self, address: u32, buf: &mut BlockBuffer) -> Result<(), BusError<Spi, Cs>> {
        let r1 = self.send_command(commands::CMD17, address)?;

        if r1 != R1Response::READY_STATE {
            return Err(Error::ErrorCommand(commands::CMD17, r1.bits()));
        }

        match DataToken::from(self.wait_data_token(Config::READ_TOKEN_ATTEMPTS)?) {
            DataToken::Start => {}
            DataToken::Error(flags) => {
                trace!("SD data error token: 0x{:02X}", flags.bits());
                return Err(Error::DataError(flags.bits()));
            }
            DataToken::Unknown(tokens::AVAILABLE) => return Err(Error::TimeoutReadBuffer),
            DataToken::Unknown(token) => return Err(Error::ReadError(token)),
        }

        self.bus.receive_words(buf)?;

        let card_crc = self.bus.receive_word()?;

        if Config::VERIFY_BLOCK_CRC {
            let host_crc = crc16_words(buf);

            if card_crc != host_crc {
                return Err(Error::CrcError(card_crc, host_crc));
            }
        }

        Ok(())
    }
}
