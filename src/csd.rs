//! Card Specific Data register decoding.
//!
//! Both layouts are read as one big-endian `u128`, so bit numbers below are the ones of the
//! SD Physical Layer specification (bit 127 is the top bit of the first byte received).

use crate::{
    consts::BLOCK_SIZE,
    geometry::{CardClass, Geometry},
    Error,
};

use bitfield::bitfield;
use size::{consts::KiB, Size};

/// Card Specific Data block.
pub type CsdData = [u8; 16];

/// CSD_STRUCTURE of standard capacity cards.
const CSD_STRUCTURE_V1: u8 = 0;
/// CSD_STRUCTURE of high and extended capacity cards.
const CSD_STRUCTURE_V2: u8 = 1;

bitfield! {
    /// Card Specific Data, version 1.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct CsdV1(u128);
    impl Debug;
    pub u8, version, set_version: 127, 126;
    pub u8, data_read_access_time1, _: 119, 112;
    pub u8, data_read_access_time2, _: 111, 104;
    pub u8, max_data_transfer_rate, _: 103, 96;
    pub u16, card_command_classes, _: 95, 84;
    pub u8, read_block_length, set_read_block_length: 83, 80;
    pub read_partial_blocks, _: 79;
    pub write_block_misalignment, _: 78;
    pub read_block_misalignment, _: 77;
    pub dsr_implemented, _: 76;
    pub u16, device_size, set_device_size: 73, 62;
    pub u8, max_read_current_vdd_min, _: 61, 59;
    pub u8, max_read_current_vdd_max, _: 58, 56;
    pub u8, max_write_current_vdd_min, _: 55, 53;
    pub u8, max_write_current_vdd_max, _: 52, 50;
    pub u8, device_size_multiplier, set_device_size_multiplier: 49, 47;
    pub erase_single_block_enabled, set_erase_single_block_enabled: 46;
    pub u8, erase_sector_size, set_erase_sector_size: 45, 39;
    pub u8, write_protect_group_size, _: 38, 32;
    pub write_protect_group_enable, _: 31;
    pub u8, write_speed_factor, _: 28, 26;
    pub u8, write_block_length, set_write_block_length: 25, 22;
    pub write_partial_blocks_allowed, _: 21;
    pub file_format_group, _: 15;
    pub copy_flag, _: 14;
    pub permanent_write_protection, _: 13;
    pub temporary_write_protection, _: 12;
    pub u8, file_format, _: 11, 10;
    pub u8, crc, _: 7, 1;
}

bitfield! {
    /// Card Specific Data, version 2.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct CsdV2(u128);
    impl Debug;
    pub u8, version, set_version: 127, 126;
    pub u8, data_read_access_time1, _: 119, 112;
    pub u8, data_read_access_time2, _: 111, 104;
    pub u8, max_data_transfer_rate, _: 103, 96;
    pub u16, card_command_classes, _: 95, 84;
    pub u8, read_block_length, _: 83, 80;
    pub read_partial_blocks, _: 79;
    pub write_block_misalignment, _: 78;
    pub read_block_misalignment, _: 77;
    pub dsr_implemented, _: 76;
    pub u32, device_size, set_device_size: 69, 48;
    pub erase_single_block_enabled, set_erase_single_block_enabled: 46;
    pub u8, erase_sector_size, set_erase_sector_size: 45, 39;
    pub u8, write_protect_group_size, _: 38, 32;
    pub write_protect_group_enable, _: 31;
    pub u8, write_speed_factor, _: 28, 26;
    pub u8, write_block_length, set_write_block_length: 25, 22;
    pub write_partial_blocks_allowed, _: 21;
    pub file_format_group, _: 15;
    pub copy_flag, _: 14;
    pub permanent_write_protection, _: 13;
    pub temporary_write_protection, _: 12;
    pub u8, file_format, _: 11, 10;
    pub u8, crc, _: 7, 1;
}

/// Card Specific Data, generic container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Csd {
    V1(CsdV1),
    V2(CsdV2),
}

/// Represents capacity provider.
pub trait CapacityProvider {
    /// Returns the card capacity in bytes.
    fn card_capacity(&self) -> Size;

    /// Returns the card capacity in 512-byte blocks.
    fn card_capacity_blocks(&self) -> u64;
}

impl From<CsdData> for CsdV1 {
    fn from(csd_data: CsdData) -> Self {
        CsdV1(u128::from_be_bytes(csd_data))
    }
}

impl From<CsdData> for CsdV2 {
    fn from(csd_data: CsdData) -> Self {
        CsdV2(u128::from_be_bytes(csd_data))
    }
}

impl CsdV1 {
    /// Size of a read block in bytes.
    pub fn block_size(&self) -> u32 {
        1 << self.read_block_length()
    }

    /// Count of read blocks.
    pub fn block_count(&self) -> u64 {
        (u64::from(self.device_size()) + 1) << (self.device_size_multiplier() + 2)
    }

    /// Size of an erasable sector in bytes.
    pub fn erase_sector_bytes(&self) -> u32 {
        (u32::from(self.erase_sector_size()) + 1) << self.write_block_length()
    }
}

impl CsdV2 {
    /// Count of 512-byte blocks.
    pub fn block_count(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * (KiB as u64)
    }

    /// Size of an erasable sector in bytes.
    pub fn erase_sector_bytes(&self) -> u32 {
        (u32::from(self.erase_sector_size()) + 1) << self.write_block_length()
    }
}

impl CapacityProvider for CsdV1 {
    fn card_capacity(&self) -> Size {
        Size::from_bytes(u64::from(self.block_size()) * self.block_count())
    }

    fn card_capacity_blocks(&self) -> u64 {
        u64::from(self.block_size()) * self.block_count() / u64::from(BLOCK_SIZE)
    }
}

impl CapacityProvider for CsdV2 {
    fn card_capacity(&self) -> Size {
        Size::from_bytes(self.card_capacity_blocks() * u64::from(BLOCK_SIZE))
    }

    fn card_capacity_blocks(&self) -> u64 {
        self.block_count()
    }
}

impl CapacityProvider for Csd {
    fn card_capacity(&self) -> Size {
        match self {
            Csd::V1(csd) => csd.card_capacity(),
            Csd::V2(csd) => csd.card_capacity(),
        }
    }

    fn card_capacity_blocks(&self) -> u64 {
        match self {
            Csd::V1(csd) => csd.card_capacity_blocks(),
            Csd::V2(csd) => csd.card_capacity_blocks(),
        }
    }
}

/// Decodes a version 1 CSD, the layout of standard capacity cards.
///
/// The returned geometry has an [`CardClass::Unknown`] class, identification decides it.
pub fn parse_csd_v1(data: &CsdData) -> Result<Geometry, Error> {
    let csd = CsdV1::from(*data);

    if csd.version() != CSD_STRUCTURE_V1 {
        return Err(Error::Failed);
    }

    let block_size = csd.block_size();
    let block_count = csd.block_count();

    Ok(Geometry {
        class: CardClass::Unknown,
        block_size,
        block_count,
        capacity: u64::from(block_size) * block_count,
        erase_sector_size: csd.erase_sector_bytes(),
    })
}

/// Decodes a version 2 CSD, the layout of high and extended capacity cards.
///
/// The returned geometry has an [`CardClass::Unknown`] class, identification decides it.
pub fn parse_csd_v2(data: &CsdData) -> Result<Geometry, Error> {
    let csd = CsdV2::from(*data);

    if csd.version() != CSD_STRUCTURE_V2 {
        return Err(Error::Failed);
    }

    let block_count = csd.block_count();

    Ok(Geometry {
        class: CardClass::Unknown,
        block_size: BLOCK_SIZE,
        block_count,
        capacity: block_count * u64::from(BLOCK_SIZE),
        erase_sector_size: csd.erase_sector_bytes(),
    })
}
