//! Card bring-up: the negotiation from power-on to a readable card.
//!
//! The sequence is restarted from the wake-up clocks whenever a step sees an
//! answer it does not expect. Every restart consumes one unit of the retry
//! budget; running out leaves the session not present with one error
//! counted, and the control loop tries again later.

use crate::{
    config::SdMmcSpiConfig,
    consts::{args, commands, tokens},
    csd::{CapacityProvider, Csd, CsdData},
    device::IdleHook,
    response::{DataToken, IfCond, Ocr, R1Response, ResponseToken},
    session::{CardSession, CardType, Geometry, RetryBudget},
    transport::BusError,
    Error, SdMmcSpi,
};

use crate::{debug, error, info, trace, warn};
use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

/// Steps of one bring-up attempt.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BringUpState {
    /// Reset into SPI mode with GO_IDLE_STATE.
    Idle0,
    /// SEND_IF_COND tells 2.00+ cards from older ones.
    IfCond,
    /// READ_OCR voltage window check.
    OcrCheck { hcs: bool },
    /// APP_CMD + SD_SEND_OP_COND until the card leaves idle state.
    OpCondPoll { hcs: bool },
    /// READ_OCR again for the capacity status of 2.00+ cards.
    HcOcrCheck,
    /// SEND_CSD and geometry decode.
    ReadCsd { card_type: CardType },
    /// SET_BLOCKLEN to 512 bytes.
    SetBlockLen(Geometry),
    Ready(Geometry),
}

impl<Spi: Transfer<u8>, Cs: OutputSwitch, Hook: IdleHook, Config: SdMmcSpiConfig>
    SdMmcSpi<Spi, Cs, Hook, Config>
where
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Bring the card up within `tries` full attempts.
    ///
    /// Resets the session first. On success the geometry is published into
    /// the session with a clean error counter. Bus and chip select failures
    /// abort immediately; everything else restarts the sequence.
    pub fn bring_up(&mut self, tries: u16) -> Result<Geometry, BusError<Spi, Cs>> {
        info!("SD bring-up started, tries: {}", tries);

        let mut session = CardSession::new();
        let mut budget = RetryBudget::new(tries);

        self.session.set(session);

        loop {
            self.hook.get_mut().idle();

            if !budget.take() {
                session.record_error();
                self.session.set(session);
                error!("SD bring-up failed, retry budget exhausted");
                return Err(Error::CardNotFound);
            }

            match self.attempt() {
                Ok(geometry) => {
                    session.publish(geometry);
                    self.session.set(session);
                    info!(
                        "SD ready, type: {:?}, blocks: {}",
                        geometry.card_type, geometry.block_count
                    );
                    return Ok(geometry);
                }
                Err(err @ (Error::Transport(_) | Error::SelectError(_))) => {
                    session.record_error();
                    self.session.set(session);
                    error!("SD bring-up aborted by a bus failure");
                    return Err(err);
                }
                Err(_) => {
                    warn!("SD bring-up restarting, tries left: {}", budget.remaining());
                }
            }
        }
    }

    /// Bring the card up with [`SdMmcSpiConfig::BRING_UP_TRIES`] unless the
    /// session is already usable.
    pub fn ensure_ready(&mut self) -> Result<Geometry, BusError<Spi, Cs>> {
        match self.session.get().geometry() {
            Some(geometry) => Ok(geometry),
            None => self.bring_up(Config::BRING_UP_TRIES),
        }
    }

    /// One pass over the whole sequence, starting with the wake-up clocks.
    fn attempt(&self) -> Result<Geometry, BusError<Spi, Cs>> {
        self.bus.clock_pulses(Config::WAKE_UP_CLOCK_BYTES)?;

        let result = self.bus.cs_scope(|_| {
            let mut state = BringUpState::Idle0;

            loop {
                trace!("SD bring-up state: {:?}", state);

                state = match state {
                    BringUpState::Idle0 => {
                        self.go_idle_state()?;
                        BringUpState::IfCond
                    }
                    BringUpState::IfCond => BringUpState::OcrCheck {
                        hcs: self.send_if_cond()?,
                    },
                    BringUpState::OcrCheck { hcs } => {
                        self.check_voltage()?;
                        BringUpState::OpCondPoll { hcs }
                    }
                    BringUpState::OpCondPoll { hcs } => {
                        self.send_op_cond(hcs)?;
                        if hcs {
                            BringUpState::HcOcrCheck
                        } else {
                            BringUpState::ReadCsd {
                                card_type: CardType::Sd1,
                            }
                        }
                    }
                    BringUpState::HcOcrCheck => BringUpState::ReadCsd {
                        card_type: self.read_capacity_status()?,
                    },
                    BringUpState::ReadCsd { card_type } => {
                        BringUpState::SetBlockLen(Geometry {
                            card_type,
                            block_count: self.read_csd()?.card_capacity_blocks(),
                        })
                    }
                    BringUpState::SetBlockLen(geometry) => {
                        self.set_block_len()?;
                        BringUpState::Ready(geometry)
                    }
                    BringUpState::Ready(geometry) => return Ok(geometry),
                }
            }
        });

        self.bus.skip_byte()?;

        result
    }

    /// Reset the card into SPI mode.
    fn go_idle_state(&self) -> Result<(), BusError<Spi, Cs>> {
        match self.send_command(commands::CMD0, 0x0000_0000) {
            Ok(R1Response::IN_IDLE_STATE) => Ok(()),
            Ok(r) => {
                warn!(
                    "Wrong response from CMD{}: 0x{:02X}",
                    commands::index(commands::CMD0),
                    r.bits()
                );
                Self::delay();
                Err(Error::ErrorCommand(commands::CMD0, r.bits()))
            }
            Err(Error::TimeoutCommand(cmd)) => {
                Self::delay();
                Err(Error::TimeoutCommand(cmd))
            }
            Err(err) => Err(err),
        }
    }

    /// Verify SD Memory Card interface operating condition.
    ///
    /// Returns whether the card speaks version 2.00 of the physical layer and
    /// is therefore probed with HCS set.
    fn send_if_cond(&self) -> Result<bool, BusError<Spi, Cs>> {
        let r1 = self.send_command(commands::CMD8, args::IF_COND)?;

        match ResponseToken::from(r1) {
            ResponseToken::Idle => {
                let r7 = IfCond::from(self.read_extended()?);
                debug!(
                    "SD 2.00+ card, R7 voltage: 0x{:X}, pattern: 0x{:02X}",
                    r7.voltage_accepted(),
                    r7.check_pattern()
                );
                Ok(true)
            }
            ResponseToken::IllegalCommand => {
                debug!("SD card older than 2.00");
                Ok(false)
            }
            _ => Err(Error::ErrorCommand(commands::CMD8, r1.bits())),
        }
    }

    /// Check the card supports the supplied voltage.
    fn check_voltage(&self) -> Result<(), BusError<Spi, Cs>> {
        self.send_command(commands::CMD58, 0x0000_0000)?;

        let ocr = Ocr::from(self.read_extended()?);

        if ocr.supports_host_voltage() {
            Ok(())
        } else {
            warn!("SD voltage window not supported, OCR: 0x{:08X}", ocr.bits());
            Err(Error::UnsupportedVoltage(ocr.bits()))
        }
    }

    /// Sends host capacity support information and waits for the card to
    /// leave idle state.
    fn send_op_cond(&self, hcs: bool) -> Result<(), BusError<Spi, Cs>> {
        let arg = if hcs {
            args::OP_COND_HCS
        } else {
            args::OP_COND_LEGACY
        };

        for _ in 0..Config::OP_COND_ATTEMPTS {
            match self.send_command(commands::ACMD41, arg).map(ResponseToken::from) {
                Ok(ResponseToken::Ready) => return Ok(()),
                // A missed answer counts as one more idle poll.
                Ok(ResponseToken::Idle) | Err(Error::TimeoutCommand(_)) => Self::delay(),
                Ok(ResponseToken::IllegalCommand) => {
                    return Err(Error::ErrorCommand(
                        commands::ACMD41,
                        R1Response::IN_IDLE_AND_ILLEGAL.bits(),
                    ))
                }
                Ok(ResponseToken::Flags(bits)) => {
                    return Err(Error::ErrorCommand(commands::ACMD41, bits))
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::TimeoutCommand(commands::ACMD41))
    }

    /// Tell high capacity cards from standard capacity 2.00+ cards.
    fn read_capacity_status(&self) -> Result<CardType, BusError<Spi, Cs>> {
        if self.send_command(commands::CMD58, 0x0000_0000)? != R1Response::READY_STATE {
            return Ok(CardType::Sd2);
        }

        if Ocr::from(self.read_extended()?).card_capacity_status() {
            Ok(CardType::Sdhc)
        } else {
            Ok(CardType::Sd2)
        }
    }

    /// Read CSD.
    fn read_csd(&self) -> Result<Csd, BusError<Spi, Cs>> {
        let mut csd_data: CsdData = Default::default();

        self.read_register(commands::CMD9, Config::CSD_TOKEN_ATTEMPTS, &mut csd_data)?;

        Ok(Csd::from(csd_data))
    }

    /// Read a 16-byte register, discarding its CRC.
    pub(crate) fn read_register(
        &self,
        cmd: u8,
        attempts: usize,
        data: &mut [u8; 16],
    ) -> Result<(), BusError<Spi, Cs>> {
        if self.send_command(cmd, 0x0000_0000)? != R1Response::READY_STATE {
            return Err(Error::RegisterReadError);
        }

        match DataToken::from(self.wait_data_token(attempts)?) {
            DataToken::Start => {}
            DataToken::Unknown(tokens::AVAILABLE) => return Err(Error::TimeoutReadBuffer),
            DataToken::Error(flags) => return Err(Error::DataError(flags.bits())),
            DataToken::Unknown(token) => return Err(Error::ReadError(token)),
        }

        self.bus.receive_slice(data)?;
        self.bus.receive_word()?;

        Ok(())
    }

    /// Set the block length to 512 bytes.
    fn set_block_len(&self) -> Result<(), BusError<Spi, Cs>> {
        let r1 = self.send_command(commands::CMD16, args::BLOCK_LEN)?;

        if r1 != R1Response::READY_STATE {
            return Err(Error::ErrorCommand(commands::CMD16, r1.bits()));
        }

        Ok(())
    }
}
