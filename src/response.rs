use crate::consts::tokens;

use bitfield::bitfield;

bitfield! {
    /// R1 response bitset.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct R1Response(u8);
    impl Debug;
    pub in_idle_state, _: 0;
    pub erase_reset, _: 1;
    pub illegal_command, _: 2;
    pub command_crc_error, _: 3;
    pub erase_sequence_error, _: 4;
    pub address_error, _: 5;
    pub parameter_error, _: 6;
    pub start_bit, _: 7;
}

impl R1Response {
    /// Card is initialized and accepted the command.
    pub const READY_STATE: Self = Self(0x00);
    /// Card is still initializing.
    pub const IN_IDLE_STATE: Self = Self(0x01);
    /// Idle card rejecting the command, the answer of pre-2.00 cards to CMD8.
    pub const IN_IDLE_AND_ILLEGAL: Self = Self(0x05);

    /// The start bit of a response is always zero, fill bytes are all ones.
    pub fn is_valid(&self) -> bool {
        !self.start_bit()
    }

    /// Raw response byte.
    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl From<u8> for R1Response {
    fn from(byte: u8) -> Self {
        R1Response(byte)
    }
}

/// Classified response to a command.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseToken {
    Ready,
    Idle,
    IllegalCommand,
    /// Any other combination of R1 flags.
    Flags(u8),
}

impl From<R1Response> for ResponseToken {
    fn from(r1: R1Response) -> Self {
        match r1 {
            R1Response::READY_STATE => ResponseToken::Ready,
            R1Response::IN_IDLE_STATE => ResponseToken::Idle,
            R1Response::IN_IDLE_AND_ILLEGAL => ResponseToken::IllegalCommand,
            R1Response(other) => ResponseToken::Flags(other),
        }
    }
}

bitfield! {
    /// R3 payload, Operation Conditions Register.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Ocr(u32);
    impl Debug;
    pub power_up_done, _: 31;
    pub card_capacity_status, _: 30;
    pub u16, voltage_window, _: 23, 15;
}

impl Ocr {
    /// 2.8-3.6V, every window bit in OCR[23:16].
    pub const SUPPORTED_VOLTAGES: u32 = 0x00FF_0000;

    /// The card supports the full 2.8-3.6V range the player supplies.
    pub fn supports_host_voltage(&self) -> bool {
        self.0 & Self::SUPPORTED_VOLTAGES == Self::SUPPORTED_VOLTAGES
    }

    /// Raw register value.
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl From<u32> for Ocr {
    fn from(payload: u32) -> Self {
        Ocr(payload)
    }
}

bitfield! {
    /// R7 payload of SEND_IF_COND.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct IfCond(u32);
    impl Debug;
    pub u8, command_version, _: 31, 28;
    pub u8, voltage_accepted, _: 11, 8;
    pub u8, check_pattern, _: 7, 0;
}

impl From<u32> for IfCond {
    fn from(payload: u32) -> Self {
        IfCond(payload)
    }
}

bitfield! {
    /// Data error token flags.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct DataErrorFlags(u8);
    impl Debug;
    pub error, _: 0;
    pub cc_error, _: 1;
    pub card_ecc_failed, _: 2;
    pub out_of_range, _: 3;
}

impl DataErrorFlags {
    /// Raw token value.
    pub fn bits(&self) -> u8 {
        self.0
    }
}

/// First non-fill byte of a data transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataToken {
    /// Data block follows.
    Start,
    /// Card reported a transient read failure.
    Error(DataErrorFlags),
    /// Anything else, including the fill byte after a timeout.
    Unknown(u8),
}

impl From<u8> for DataToken {
    fn from(token: u8) -> Self {
        match token {
            tokens::DATA_START_BLOCK => DataToken::Start,
            0..=tokens::DATA_ERROR_MAX => DataToken::Error(DataErrorFlags(token)),
            other => DataToken::Unknown(other),
        }
    }
}
