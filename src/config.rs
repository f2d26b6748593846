/// Represents config for [`SdMmcSpi`](crate::SdMmcSpi).
///
/// All timeouts are iteration bounds calibrated to the SPI clock, not
/// wall-clock durations. Changing the bus clock means re-deriving them.
pub trait SdMmcSpiConfig {
    /// Max attempts to wait for the bus available state before a command.
    const CMD_MAX_ATTEMPTS: usize;
    /// Max attempts to read R1.
    const READ_R1_ATTEMPTS: usize;
    /// Filler bytes clocked out with the card unselected before CMD0.
    const WAKE_UP_CLOCK_BYTES: usize;
    /// Max ACMD41 polls while the card stays in idle state.
    const OP_COND_ATTEMPTS: usize;
    /// Max polls for the data start token after SEND_CSD.
    const CSD_TOKEN_ATTEMPTS: usize;
    /// Max polls for the data start token after SEND_CID.
    const CID_TOKEN_ATTEMPTS: usize;
    /// Max polls for the data start token after READ_SINGLE_BLOCK.
    const READ_TOKEN_ATTEMPTS: usize;
    /// Count of dummy cycles for delay.
    const DELAY_DUMMY_CYCLES: usize;
    /// Bring-up restarts granted by [`SdMmcSpi::ensure_ready`](crate::SdMmcSpi::ensure_ready).
    const BRING_UP_TRIES: u16;
    /// Check the trailing CRC16 of every data block instead of discarding it.
    const VERIFY_BLOCK_CRC: bool;
}

/// Default implementation of [`SdMmcSpiConfig`](crate::SdMmcSpiConfig).
pub struct DefaultSdMmcSpiConfig;

impl SdMmcSpiConfig for DefaultSdMmcSpiConfig {
    const CMD_MAX_ATTEMPTS: usize = 256;
    const READ_R1_ATTEMPTS: usize = 128;
    const WAKE_UP_CLOCK_BYTES: usize = 512;
    const OP_COND_ATTEMPTS: usize = 200;
    const CSD_TOKEN_ATTEMPTS: usize = 640;
    const CID_TOKEN_ATTEMPTS: usize = 3200;
    const READ_TOKEN_ATTEMPTS: usize = 65535;
    const DELAY_DUMMY_CYCLES: usize = 32;
    const BRING_UP_TRIES: u16 = 50;
    const VERIFY_BLOCK_CRC: bool = false;
}
