/// Size of one block in bytes.
pub const BLOCK_SIZE: usize = 512;
/// Size of one block in 16-bit words.
pub const BLOCK_WORDS: usize = BLOCK_SIZE / 2;
/// Byte to word address shift for standard capacity cards.
pub const BYTE_ADDRESS_SHIFT: u8 = 9;

pub mod commands {
    /// CMD base value (start bit clear, transmission bit set).
    pub const CMD_BASE: u8 = 0x40;
    /// ACMD flag.
    pub const ACMD_FLAG: u8 = 0x80;
    /// GO_IDLE_STATE - init card in spi mode if CS low.
    pub const CMD0: u8 = CMD_BASE;
    /// SEND_IF_COND - verify SD Memory Card interface operating condition.
    pub const CMD8: u8 = CMD_BASE + 8;
    /// SEND_CSD - read the Card Specific Data (CSD register).
    pub const CMD9: u8 = CMD_BASE + 9;
    /// SEND_CID - read the Card Identification (CID register).
    pub const CMD10: u8 = CMD_BASE + 10;
    /// SET_BLOCKLEN - set the block length for block commands.
    pub const CMD16: u8 = CMD_BASE + 16;
    /// READ_SINGLE_BLOCK - read a single data block from the card.
    pub const CMD17: u8 = CMD_BASE + 17;
    /// APP_CMD - escape for application specific command.
    pub const CMD55: u8 = CMD_BASE + 55;
    /// READ_OCR - read the OCR register of a card.
    pub const CMD58: u8 = CMD_BASE + 58;
    /// SD_SEND_OP_COMD - Sends host capacity support information and activates
    /// the card's initialization process.
    pub const ACMD41: u8 = CMD_BASE + ACMD_FLAG + 41;

    /// Command index as written in the physical layer specification.
    pub const fn index(cmd: u8) -> u8 {
        cmd & !(CMD_BASE | ACMD_FLAG)
    }
}

pub mod args {
    /// SEND_IF_COND: 2.7-3.6V window and check pattern.
    pub const IF_COND: u32 = 0x0000_01AA;
    /// SD_SEND_OP_COND for cards older than 2.00.
    pub const OP_COND_LEGACY: u32 = 0x0000_0000;
    /// SD_SEND_OP_COND with HCS set and the 3.2-3.3V window bit.
    pub const OP_COND_HCS: u32 = 0x4010_0000;
    /// SET_BLOCKLEN to the block size.
    pub const BLOCK_LEN: u32 = super::BLOCK_SIZE as u32;
}

pub mod tokens {
    /// Bus available / fill byte.
    pub const AVAILABLE: u8 = 0xFF;
    /// Start data token for read single block.
    pub const DATA_START_BLOCK: u8 = 0xFE;
    /// Highest data error token, flags live in the low nibble.
    pub const DATA_ERROR_MAX: u8 = 0x0F;
}
