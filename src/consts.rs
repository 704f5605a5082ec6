/// Transfer block size used with every card class.
pub const BLOCK_SIZE: u32 = 512;
/// Capacity above which a block-addressed card is reported as SDXC.
pub const SDXC_CAPACITY_THRESHOLD: u64 = 32_000_000_000;
/// Dummy bytes clocked with the card deselected after power-up (80 clocks).
pub const POWER_UP_DUMMY_BYTES: usize = 10;

pub mod commands {
    /// CMD base value, the transmission bit of the command byte.
    pub const CMD_BASE: u8 = 0x40;
    /// Mask of the 6-bit command index.
    pub const CMD_INDEX_MASK: u8 = 0x3F;
    /// GO_IDLE_STATE - init card in spi mode if CS low.
    pub const CMD0: u8 = CMD_BASE;
    /// SEND_IF_COND - verify SD Memory Card interface operating condition.
    pub const CMD8: u8 = CMD_BASE + 8;
    /// SEND_CSD - read the Card Specific Data (CSD register).
    pub const CMD9: u8 = CMD_BASE + 9;
    /// SEND_STATUS - read the card status register.
    pub const CMD13: u8 = CMD_BASE + 13;
    /// SET_BLOCKLEN - set the block length of a standard capacity card.
    pub const CMD16: u8 = CMD_BASE + 16;
    /// READ_SINGLE_BLOCK - read a single data block from the card.
    pub const CMD17: u8 = CMD_BASE + 17;
    /// WRITE_BLOCK - write a single data block to the card.
    pub const CMD24: u8 = CMD_BASE + 24;
    /// ERASE_WR_BLK_START_ADDR - first write block to be erased.
    pub const CMD32: u8 = CMD_BASE + 32;
    /// ERASE_WR_BLK_END_ADDR - last write block of the erase range.
    pub const CMD33: u8 = CMD_BASE + 33;
    /// ERASE - erase the selected write blocks.
    pub const CMD38: u8 = CMD_BASE + 38;
    /// APP_CMD - escape for application specific command.
    pub const CMD55: u8 = CMD_BASE + 55;
    /// READ_OCR - read the OCR register of a card.
    pub const CMD58: u8 = CMD_BASE + 58;
    /// CRC_ON_OFF - enable or disable CRC checking.
    pub const CMD59: u8 = CMD_BASE + 59;
    /// SD_SEND_OP_COND - Sends host capacity support information and activates
    /// the card's initialization process. Must follow [`CMD55`].
    pub const ACMD41: u8 = CMD_BASE + 41;
}

pub mod args {
    /// SEND_IF_COND argument: 2.7-3.6V supply and the check pattern.
    pub const IF_COND: u32 = 0x0000_01AA;
    /// Voltage accepted nibble echoed by SEND_IF_COND.
    pub const IF_COND_VOLTAGE: u8 = 0x01;
    /// Check pattern echoed by SEND_IF_COND.
    pub const IF_COND_PATTERN: u8 = 0xAA;
    /// SD_SEND_OP_COND argument with the Host Capacity Support bit.
    pub const OP_COND_HCS: u32 = 0x4000_0000;
    /// CRC_ON_OFF argument turning CRC checking on.
    pub const CRC_ON: u32 = 0x0000_0001;
}

pub mod tokens {
    /// Level of an idle bus, also clocked out while receiving.
    pub const IDLE: u8 = 0xFF;
    /// Level held by the card while busy programming or erasing.
    pub const BUSY: u8 = 0x00;
    /// Start data token for read or write single block.
    pub const DATA_START_BLOCK: u8 = 0xFE;
    /// Mask for data response tokens after a write block operation.
    pub const DATA_RES_MASK: u8 = 0x1F;
    /// Write data accepted token.
    pub const DATA_RES_ACCEPTED: u8 = 0x05;
    /// CRC sent after a data block when CRC checking is off.
    pub const FILLER_CRC: [u8; 2] = [0xFF, 0xFF];
}
