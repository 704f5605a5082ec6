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
    /// Card is ready, no error flags.
    pub const READY_STATE: Self = Self(0x00);
    /// Card is in the idle state, no error flags.
    pub const IN_IDLE_STATE: Self = Self(0x01);

    /// Returns `true` when the card reports an error flag.
    pub fn has_error(&self) -> bool {
        self.0 & 0x7E != 0
    }
}

bitfield! {
    /// Operation Conditions Register, payload of an R3 response.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Ocr(u32);
    impl Debug;
    pub power_up_complete, _: 31;
    pub card_capacity_status, _: 30;
    pub u16, voltage_window, _: 23, 15;
}

bitfield! {
    /// SEND_IF_COND echo, payload of an R7 response.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct IfCondEcho(u32);
    impl Debug;
    pub u8, command_version, _: 31, 28;
    pub u8, voltage_accepted, _: 11, 8;
    pub u8, check_pattern, _: 7, 0;
}

/// Expected shape of a command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum ResponseShape {
    /// R1 byte only.
    R1,
    /// R1 byte followed by the card holding the bus busy.
    R1b,
    /// R1 byte followed by a 16-byte register data block.
    R2,
    /// R1 byte followed by the OCR.
    R3,
    /// R1 byte followed by the interface condition echo.
    R7,
}

/// Response of one command.
///
/// For [`ResponseShape::R2`] the buffer holds the 16 register bytes; for every other shape
/// byte 0 is the R1 byte, followed by the 4 payload bytes of R3 and R7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseResult {
    buf: [u8; 16],
    filled: usize,
}

impl ResponseResult {
    /// Appends received bytes.
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buf[self.filled..self.filled + bytes.len()].copy_from_slice(bytes);
        self.filled += bytes.len();
    }

    /// Gives the unfilled tail of the buffer to a receive call.
    pub(crate) fn fill_with<F, E>(&mut self, len: usize, receive: F) -> Result<(), E>
    where
        F: FnOnce(&mut [u8]) -> Result<(), E>,
    {
        receive(&mut self.buf[self.filled..self.filled + len])?;
        self.filled += len;
        Ok(())
    }

    /// Drops received bytes.
    pub(crate) fn clear(&mut self) {
        self.filled = 0;
    }

    /// Received bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Count of received bytes.
    pub fn len(&self) -> usize {
        self.filled
    }

    /// Returns `true` when nothing was received.
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// R1 byte of the response.
    pub fn r1(&self) -> R1Response {
        R1Response(self.buf[0])
    }

    /// 32-bit payload following the R1 byte of an R3 or R7 response.
    pub fn payload(&self) -> u32 {
        u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]])
    }

    /// OCR carried by an R3 response.
    pub fn ocr(&self) -> Ocr {
        Ocr(self.payload())
    }

    /// Echo carried by an R7 response.
    pub fn if_cond(&self) -> IfCondEcho {
        IfCondEcho(self.payload())
    }

    /// Register carried by an R2 response.
    pub fn register(&self) -> [u8; 16] {
        self.buf
    }
}
