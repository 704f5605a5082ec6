/// Represents config for [`CardSession`](crate::CardSession).
///
/// Every timeout of the driver is a bounded retry count, optionally paced by the transport's
/// delay. The effective wall-clock budget is `attempts * delay`.
pub trait SdSpiConfig {
    /// Max attempts to put the card into the idle state with CMD0.
    const IDLE_ATTEMPTS: usize;
    /// Max response polls granted to CMD0.
    const IDLE_RESPONSE_ATTEMPTS: usize;
    /// Max response polls granted to any other command.
    const CMD_RESPONSE_ATTEMPTS: usize;
    /// Max CMD55 + ACMD41 rounds before the card must leave the idle state.
    const OP_COND_ATTEMPTS: usize;
    /// Delay between ACMD41 rounds, microseconds.
    const OP_COND_DELAY_US: u32;
    /// Max polls for the data token of a register read.
    const REGISTER_TOKEN_ATTEMPTS: usize;
    /// Max polls for the data token of a block read.
    const READ_TOKEN_ATTEMPTS: usize;
    /// Max busy polls after a block write.
    const WRITE_BUSY_ATTEMPTS: usize;
    /// Delay between busy polls after a block write, microseconds.
    const WRITE_BUSY_DELAY_US: u32;
    /// Max busy polls after a command with an R1b response.
    const ERASE_BUSY_ATTEMPTS: usize;
    /// Delay between busy polls after a command with an R1b response, microseconds.
    const ERASE_BUSY_DELAY_US: u32;
    /// Enable CRC checking on the card and verify data CRCs on the host.
    const CRC_ENABLED: bool;
}

/// Default implementation of [`SdSpiConfig`](crate::SdSpiConfig).
pub struct DefaultSdSpiConfig;

impl SdSpiConfig for DefaultSdSpiConfig {
    const IDLE_ATTEMPTS: usize = 255;
    const IDLE_RESPONSE_ATTEMPTS: usize = 255;
    const CMD_RESPONSE_ATTEMPTS: usize = 5;
    const OP_COND_ATTEMPTS: usize = 255;
    const OP_COND_DELAY_US: u32 = 1_000;
    const REGISTER_TOKEN_ATTEMPTS: usize = 255;
    const READ_TOKEN_ATTEMPTS: usize = 100;
    const WRITE_BUSY_ATTEMPTS: usize = 500;
    const WRITE_BUSY_DELAY_US: u32 = 1_000;
    // 60 s, covers a full-card erase of large SDXC cards.
    const ERASE_BUSY_ATTEMPTS: usize = 12_000;
    const ERASE_BUSY_DELAY_US: u32 = 5_000;
    const CRC_ENABLED: bool = false;
}
