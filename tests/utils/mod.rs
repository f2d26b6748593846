//! Useful library code for tests

#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    convert::Infallible,
    rc::Rc,
};

use embedded_hal::blocking::spi::Transfer;
use osab_sdmmc::{BlockBuffer, DefaultSdMmcSpiConfig, IdleHook, SdMmcSpi, BLOCK_WORDS};
use switch_hal::OutputSwitch;

/// Revision and capacity class of a simulated card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    /// Pre-2.00 card: rejects SEND_IF_COND.
    Legacy,
    /// 2.00+ standard capacity card.
    Standard,
    /// 2.00+ high capacity card.
    HighCapacity,
}

/// What the simulated card answers.
#[derive(Debug, Clone)]
pub struct CardModel {
    pub kind: CardKind,
    pub csd: [u8; 16],
    pub cid: [u8; 16],
    /// ACMD41 answers in idle state before the card reports ready.
    pub busy_polls: usize,
    /// GO_IDLE_STATE answer once `cmd0_failures` is used up.
    pub cmd0_response: u8,
    /// GO_IDLE_STATE answered with "illegal command" this many times first.
    pub cmd0_failures: usize,
    pub ocr_voltage: u32,
    pub set_blocklen_response: u8,
    /// Sectors answered with the given token instead of data.
    pub failing_sectors: Vec<(u32, u8)>,
    /// Send a wrong CRC after every data block.
    pub corrupt_crc: bool,
    /// SEND_IF_COND answer overriding the one of the card kind.
    pub cmd8_response: Option<u8>,
    /// SD_SEND_OP_COND answer overriding the idle/ready sequence.
    pub acmd41_response: Option<u8>,
    /// SD_SEND_OP_COND requests left unanswered before the card responds.
    pub acmd41_silent: usize,
    /// SEND_CSD answers R1 but never sends the data start token.
    pub csd_without_token: bool,
}

impl CardModel {
    pub fn new(kind: CardKind, csd: [u8; 16]) -> Self {
        CardModel {
            kind,
            csd,
            cid: *b"\x03SDSD08G\x80\xA1\xB2\xC3\xD4\x01\x1B\x5F",
            busy_polls: 3,
            cmd0_response: 0x01,
            cmd0_failures: 0,
            ocr_voltage: 0x00FF_8000,
            set_blocklen_response: 0x00,
            failing_sectors: Vec::new(),
            corrupt_crc: false,
            cmd8_response: None,
            acmd41_response: None,
            acmd41_silent: 0,
            csd_without_token: false,
        }
    }

    pub fn sdhc(c_size: u32) -> Self {
        Self::new(CardKind::HighCapacity, sdhc_csd(c_size))
    }

    pub fn sdsc(c_size: u16, c_size_mult: u8, read_bl_len: u8) -> Self {
        Self::new(
            CardKind::Standard,
            legacy_csd(c_size, c_size_mult, read_bl_len),
        )
    }

    pub fn legacy(c_size: u16, c_size_mult: u8, read_bl_len: u8) -> Self {
        Self::new(CardKind::Legacy, legacy_csd(c_size, c_size_mult, read_bl_len))
    }
}

/// Version 1 CSD with the given geometry fields.
pub fn legacy_csd(c_size: u16, c_size_mult: u8, read_bl_len: u8) -> [u8; 16] {
    let raw = (u128::from(read_bl_len & 0xF) << 80)
        | (u128::from(c_size & 0xFFF) << 62)
        | (u128::from(c_size_mult & 0x7) << 47);
    raw.to_be_bytes()
}

/// Version 2 CSD with the given size field.
pub fn sdhc_csd(c_size: u32) -> [u8; 16] {
    let raw = (1u128 << 126) | (u128::from(c_size & 0x3F_FFFF) << 48);
    raw.to_be_bytes()
}

/// Byte `i` of a sector's contents.
pub fn sector_byte(sector: u32, i: usize) -> u8 {
    (sector as u8).wrapping_mul(7).wrapping_add(i as u8)
}

/// A sector's contents as the driver hands them out.
pub fn sector_words(sector: u32) -> BlockBuffer {
    let mut words = [0; BLOCK_WORDS];
    for (i, word) in words.iter_mut().enumerate() {
        *word = u16::from_be_bytes([sector_byte(sector, 2 * i), sector_byte(sector, 2 * i + 1)]);
    }
    words
}

/// CRC-16/XMODEM, bit by bit.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[derive(Debug)]
struct SimState {
    model: CardModel,
    present: bool,
    selected: bool,
    initialized: bool,
    app_cmd: bool,
    busy_left: usize,
    frame: Vec<u8>,
    out: VecDeque<u8>,
    commands: Vec<(u8, u32)>,
    transfers: usize,
    /// Fail transfers issued with chip select released.
    idle_clock_fault: bool,
}

impl SimState {
    fn clock(&mut self, mosi: u8) -> u8 {
        if !self.selected || !self.present {
            return 0xFF;
        }

        let miso = self.out.pop_front().unwrap_or(0xFF);

        if self.frame.is_empty() {
            if mosi & 0xC0 == 0x40 {
                self.frame.push(mosi);
            }
        } else {
            self.frame.push(mosi);
            if self.frame.len() == 6 {
                let frame = std::mem::take(&mut self.frame);
                let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
                self.execute(frame[0] & 0x3F, arg);
            }
        }

        miso
    }

    fn r1(&self) -> u8 {
        if self.initialized {
            0x00
        } else {
            0x01
        }
    }

    fn push_data(&mut self, data: &[u8], crc: u16) {
        self.out.push_back(0xFF);
        self.out.push_back(0xFE);
        self.out.extend(data.iter().copied());
        self.out.extend(crc.to_be_bytes());
    }

    fn execute(&mut self, index: u8, arg: u32) {
        let app = std::mem::take(&mut self.app_cmd);

        self.commands.push((index, arg));
        self.out.clear();
        // NCR
        self.out.push_back(0xFF);

        match (app, index) {
            (_, 0) => {
                self.initialized = false;
                self.busy_left = self.model.busy_polls;
                if self.model.cmd0_failures > 0 {
                    self.model.cmd0_failures -= 1;
                    self.out.push_back(0x05);
                } else {
                    self.out.push_back(self.model.cmd0_response);
                }
            }
            (false, 8) => match (self.model.cmd8_response, self.model.kind) {
                (Some(response), _) => self.out.push_back(response),
                (None, CardKind::Legacy) => self.out.push_back(0x05),
                (None, CardKind::Standard | CardKind::HighCapacity) => {
                    self.out.push_back(0x01);
                    self.out.extend([0x00, 0x00, (arg >> 8) as u8 & 0x0F, arg as u8]);
                }
            },
            (false, 58) => {
                let mut ocr = self.model.ocr_voltage;
                if self.initialized {
                    ocr |= 0x8000_0000;
                    if self.model.kind == CardKind::HighCapacity {
                        ocr |= 0x4000_0000;
                    }
                }
                self.out.push_back(self.r1());
                self.out.extend(ocr.to_be_bytes());
            }
            (false, 55) => {
                self.app_cmd = true;
                self.out.push_back(self.r1());
            }
            (true, 41) => {
                if self.model.acmd41_silent > 0 {
                    self.model.acmd41_silent -= 1;
                } else if let Some(response) = self.model.acmd41_response {
                    self.out.push_back(response);
                } else if self.busy_left > 0 {
                    self.busy_left -= 1;
                    self.out.push_back(0x01);
                } else {
                    self.initialized = true;
                    self.out.push_back(0x00);
                }
            }
            (false, 9) if self.initialized => {
                let csd = self.model.csd;
                self.out.push_back(0x00);
                if !self.model.csd_without_token {
                    self.push_data(&csd, 0);
                }
            }
            (false, 10) if self.initialized => {
                let cid = self.model.cid;
                self.out.push_back(0x00);
                self.push_data(&cid, 0);
            }
            (false, 16) => self.out.push_back(self.model.set_blocklen_response),
            (false, 17) if self.initialized => {
                let sector = match self.model.kind {
                    CardKind::HighCapacity => arg,
                    CardKind::Standard | CardKind::Legacy => arg / 512,
                };
                self.out.push_back(0x00);
                let failure = self
                    .model
                    .failing_sectors
                    .iter()
                    .find(|(failing, _)| *failing == sector)
                    .map(|(_, token)| *token);
                match failure {
                    Some(token) => {
                        self.out.push_back(0xFF);
                        self.out.push_back(token);
                    }
                    None => {
                        let data: Vec<u8> = (0..512).map(|i| sector_byte(sector, i)).collect();
                        let mut crc = crc16(&data);
                        if self.model.corrupt_crc {
                            crc = !crc;
                        }
                        self.push_data(&data, crc);
                    }
                }
            }
            _ => self.out.push_back(0x04),
        }
    }
}

/// Handle on a simulated card, for arranging faults and inspecting traffic.
#[derive(Clone)]
pub struct SimCard {
    state: Rc<RefCell<SimState>>,
}

impl SimCard {
    pub fn new(model: CardModel) -> Self {
        SimCard {
            state: Rc::new(RefCell::new(SimState {
                model,
                present: true,
                selected: false,
                initialized: false,
                app_cmd: false,
                busy_left: 0,
                frame: Vec::new(),
                out: VecDeque::new(),
                commands: Vec::new(),
                transfers: 0,
                idle_clock_fault: false,
            })),
        }
    }

    pub fn spi(&self) -> SimSpi {
        SimSpi {
            state: self.state.clone(),
        }
    }

    pub fn cs(&self) -> SimCs {
        SimCs {
            state: self.state.clone(),
        }
    }

    /// Count of SPI transfers the driver issued.
    pub fn transfers(&self) -> usize {
        self.state.borrow().transfers
    }

    /// Every command frame received, as (index, argument).
    pub fn commands(&self) -> Vec<(u8, u32)> {
        self.state.borrow().commands.clone()
    }

    /// Arguments of every command with the given index.
    pub fn args_of(&self, index: u8) -> Vec<u32> {
        self.commands()
            .into_iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, arg)| arg)
            .collect()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.borrow_mut();
        state.commands.clear();
        state.transfers = 0;
    }

    /// Pull the card out or put it back.
    pub fn set_present(&self, present: bool) {
        let mut state = self.state.borrow_mut();
        state.present = present;
        if !present {
            state.initialized = false;
            state.out.clear();
            state.frame.clear();
        }
    }

    pub fn fail_sector(&self, sector: u32, token: u8) {
        self.state
            .borrow_mut()
            .model
            .failing_sectors
            .push((sector, token));
    }

    pub fn set_blocklen_response(&self, response: u8) {
        self.state.borrow_mut().model.set_blocklen_response = response;
    }

    /// Make the bus fail every transfer issued with chip select released.
    pub fn set_idle_clock_fault(&self, fault: bool) {
        self.state.borrow_mut().idle_clock_fault = fault;
    }
}

/// Bus failure injected by [`SimCard::set_idle_clock_fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault;

pub struct SimSpi {
    state: Rc<RefCell<SimState>>,
}

impl Transfer<u8> for SimSpi {
    type Error = BusFault;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        let mut state = self.state.borrow_mut();
        state.transfers += 1;
        if state.idle_clock_fault && !state.selected {
            return Err(BusFault);
        }
        for word in words.iter_mut() {
            *word = state.clock(*word);
        }
        Ok(words)
    }
}

pub struct SimCs {
    state: Rc<RefCell<SimState>>,
}

impl OutputSwitch for SimCs {
    type Error = Infallible;

    fn on(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().selected = true;
        Ok(())
    }

    fn off(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.selected = false;
        state.frame.clear();
        state.out.clear();
        Ok(())
    }
}

/// Idle hook counting its invocations.
#[derive(Clone, Default)]
pub struct CountingHook {
    pub idles: Rc<Cell<usize>>,
    pub gone: Rc<Cell<usize>>,
}

impl IdleHook for CountingHook {
    fn idle(&mut self) {
        self.idles.set(self.idles.get() + 1);
    }

    fn card_gone(&mut self) {
        self.gone.set(self.gone.get() + 1);
    }
}

pub type SimDriver<Config = DefaultSdMmcSpiConfig> = SdMmcSpi<SimSpi, SimCs, CountingHook, Config>;

/// Driver wired to a simulated card, plus the hook counters.
pub fn driver(card: &SimCard) -> (SimDriver, CountingHook) {
    let hook = CountingHook::default();
    (SdMmcSpi::new(card.spi(), card.cs(), hook.clone()), hook)
}

/// Driver with a custom config.
pub fn driver_with<Config: osab_sdmmc::SdMmcSpiConfig>(
    card: &SimCard,
) -> (SimDriver<Config>, CountingHook) {
    let hook = CountingHook::default();
    (SdMmcSpi::new(card.spi(), card.cs(), hook.clone()), hook)
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
