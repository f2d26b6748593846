use crate::Error;

use core::cell::RefCell;
use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

/// Error type alias.
pub type BusError<Spi, Cs> =
    Error<<Spi as Transfer<u8>>::Error, <Cs as OutputSwitch>::Error>;

/// Byte pump between the host and the card.
///
/// The bus must not be driven by anything else (the configuration EEPROM
/// shares it) while a transaction group is in progress.
pub struct SpiBus<Spi: Transfer<u8>, Cs: OutputSwitch> {
    spi: RefCell<Spi>,
    cs: RefCell<Cs>,
}

impl<Spi: Transfer<u8>, Cs: OutputSwitch> SpiBus<Spi, Cs> {
    /// Receive transfer token.
    const RECEIVE_TRANSFER_TOKEN: u8 = 0xFF;

    pub fn new(spi: Spi, cs: Cs) -> Self {
        SpiBus {
            spi: RefCell::new(spi),
            cs: RefCell::new(cs),
        }
    }

    /// Release the SPI peripheral and chip select.
    pub fn free(self) -> (Spi, Cs) {
        (self.spi.into_inner(), self.cs.into_inner())
    }

    /// Activate chip select.
    pub fn select(&self) -> Result<(), BusError<Spi, Cs>> {
        self.cs.borrow_mut().on().map_err(Error::SelectError)
    }

    /// Deactivate chip select.
    pub fn unselect(&self) -> Result<(), BusError<Spi, Cs>> {
        self.cs.borrow_mut().off().map_err(Error::SelectError)
    }

    /// CS scope.
    ///
    /// Chip select is released even when `f` fails.
    pub fn cs_scope<T, F>(&self, f: F) -> Result<T, BusError<Spi, Cs>>
    where
        F: FnOnce(&Self) -> Result<T, BusError<Spi, Cs>>,
    {
        self.select()?;
        let result = f(self);
        self.unselect()?;

        result
    }

    /// Send one byte and receive one byte.
    pub fn exchange(&self, data: u8) -> Result<u8, BusError<Spi, Cs>> {
        self.spi
            .borrow_mut()
            .transfer(&mut [data])
            .map(|b| b[0])
            .map_err(Error::Transport)
    }

    /// Send one 16-bit word and receive one, most significant byte first.
    pub fn exchange_word(&self, data: u16) -> Result<u16, BusError<Spi, Cs>> {
        self.spi
            .borrow_mut()
            .transfer(&mut data.to_be_bytes())
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .map_err(Error::Transport)
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    pub fn receive(&self) -> Result<u8, BusError<Spi, Cs>> {
        self.exchange(Self::RECEIVE_TRANSFER_TOKEN)
    }

    /// Receive a word from the SD card.
    pub fn receive_word(&self) -> Result<u16, BusError<Spi, Cs>> {
        self.exchange_word(u16::from_be_bytes([Self::RECEIVE_TRANSFER_TOKEN; 2]))
    }

    /// Send a byte to the SD card.
    pub fn send(&self, data: u8) -> Result<(), BusError<Spi, Cs>> {
        self.exchange(data).map(|_| ())
    }

    /// Receive a slice from the SD card.
    pub fn receive_slice(&self, data: &mut [u8]) -> Result<(), BusError<Spi, Cs>> {
        for byte in data.iter_mut() {
            *byte = self.receive()?;
        }

        Ok(())
    }

    /// Receive a slice of words from the SD card.
    pub fn receive_words(&self, data: &mut [u16]) -> Result<(), BusError<Spi, Cs>> {
        for word in data.iter_mut() {
            *word = self.receive_word()?;
        }

        Ok(())
    }

    /// Send a slice to the SD card.
    pub fn send_slice(&self, data: &[u8]) -> Result<(), BusError<Spi, Cs>> {
        for byte in data.iter() {
            self.send(*byte)?;
        }

        Ok(())
    }

    /// Skip byte.
    pub fn skip_byte(&self) -> Result<(), BusError<Spi, Cs>> {
        self.receive().map(|_| ())
    }

    /// Clock out `count` idle bytes with the card unselected.
    ///
    /// Wakes the card up before CMD0 and lets it finish after a data block.
    pub fn clock_pulses(&self, count: usize) -> Result<(), BusError<Spi, Cs>> {
        self.unselect()?;

        for _ in 0..count {
            self.send(Self::RECEIVE_TRANSFER_TOKEN)?;
        }

        Ok(())
    }
}
