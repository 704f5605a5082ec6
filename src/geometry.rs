use crate::{consts::BLOCK_SIZE, csd::CapacityProvider, Error};

use size::Size;

/// Card class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum CardClass {
    /// Not an SD memory card (MMC or something else).
    NotSd,
    /// Standard capacity, physical layer version 1.x.
    SdscV1,
    /// Standard capacity, physical layer version 2.00 or later.
    SdscV2,
    /// High capacity, up to 32 GB.
    Sdhc,
    /// Extended capacity, above 32 GB.
    Sdxc,
    /// Not identified yet.
    #[default]
    Unknown,
}

impl CardClass {
    /// Human readable class name.
    pub fn name(&self) -> &'static str {
        match self {
            CardClass::SdscV1 => "SDSC v1.x",
            CardClass::SdscV2 => "SDSC v2.00",
            CardClass::Sdhc => "SDHC",
            CardClass::Sdxc => "SDXC",
            CardClass::NotSd | CardClass::Unknown => "Unknown",
        }
    }

    /// Block addressed cards take block numbers as data addresses, the others take bytes.
    pub fn is_block_addressed(&self) -> bool {
        matches!(self, CardClass::Sdhc | CardClass::Sdxc)
    }

    /// Returns `true` for the classes the driver can transfer data with.
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            CardClass::SdscV1 | CardClass::SdscV2 | CardClass::Sdhc | CardClass::Sdxc
        )
    }
}

/// Card geometry, resolved once by identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct Geometry {
    /// Card class.
    pub class: CardClass,
    /// Block size in bytes.
    pub block_size: u32,
    /// Total count of blocks.
    pub block_count: u64,
    /// Total capacity in bytes.
    pub capacity: u64,
    /// Minimum erasable unit in bytes.
    pub erase_sector_size: u32,
}

/// User request, byte addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbaRequest {
    /// Byte offset on the card.
    pub offset: u64,
    /// Length in bytes.
    pub len: u32,
}

/// Card request, in the address units of the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct LbaOperation {
    /// Data address of the first block.
    pub lba_addr: u32,
    /// Count of consecutive blocks.
    pub lba_count: u32,
}

/// Erase range, in the address units of the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct EraseRange {
    /// Address of the first erased block.
    pub start: u32,
    /// Address of the last erased block.
    pub end: u32,
}

impl Geometry {
    /// Step between the data addresses of two consecutive blocks.
    pub fn address_step(&self) -> u32 {
        if self.class.is_block_addressed() {
            1
        } else {
            self.block_size
        }
    }

    /// Translates a byte addressed request into card addresses.
    ///
    /// The offset must be block aligned and the address must fit the 32-bit command argument.
    pub fn translate(&self, request: LbaRequest) -> Result<LbaOperation, Error> {
        let block_size = u64::from(self.block_size);

        if block_size == 0 || request.offset % block_size != 0 {
            return Err(Error::Param);
        }

        let lba_addr = if self.class.is_block_addressed() {
            request.offset / block_size
        } else {
            request.offset
        };

        Ok(LbaOperation {
            lba_addr: u32::try_from(lba_addr).map_err(|_| Error::Param)?,
            lba_count: request.len / self.block_size,
        })
    }

    /// Computes the range covering `count` erase sectors from the byte offset `offset`.
    pub fn erase_range(&self, offset: u64, count: u32) -> Result<EraseRange, Error> {
        if !self.class.is_supported() {
            return Err(Error::Unsupported);
        }

        let total = u64::from(self.erase_sector_size) * u64::from(count);
        if total == 0 {
            return Err(Error::Param);
        }

        let last = offset.checked_add(total - 1).ok_or(Error::Param)?;
        let (start, end) = if self.class.is_block_addressed() {
            let block_size = u64::from(self.block_size);
            (offset / block_size, last / block_size)
        } else {
            (offset, last)
        };

        Ok(EraseRange {
            start: u32::try_from(start).map_err(|_| Error::Param)?,
            end: u32::try_from(end).map_err(|_| Error::Param)?,
        })
    }

    /// Splits large legacy read blocks into transfer blocks, keeping the capacity.
    pub(crate) fn with_transfer_blocks(self) -> Self {
        if self.block_size <= BLOCK_SIZE {
            return self;
        }

        Geometry {
            block_size: BLOCK_SIZE,
            block_count: self.block_count * u64::from(self.block_size / BLOCK_SIZE),
            ..self
        }
    }
}

impl CapacityProvider for Geometry {
    fn card_capacity(&self) -> Size {
        Size::from_bytes(self.capacity)
    }

    fn card_capacity_blocks(&self) -> u64 {
        self.capacity / u64::from(BLOCK_SIZE)
    }
}
