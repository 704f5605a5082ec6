use crate::{
    config::SdSpiConfig,
    consts::{commands, tokens},
    crc::crc16,
    geometry::{EraseRange, Geometry, LbaOperation},
    response::{R1Response, ResponseShape},
    transport::{Link, SpiTransport},
    Error,
};

impl<T: SpiTransport, C: SdSpiConfig> Link<T, C> {
    /// Issues a data command, the card must answer with a clean R1.
    fn data_command(&mut self, cmd: u8, addr: u32) -> Result<(), Error> {
        let response = self.command(cmd, addr, ResponseShape::R1)?;

        if response.r1() != R1Response::READY_STATE {
            error!(
                "CMD{} rejected, address: {}, response: 0x{:02X}",
                cmd & commands::CMD_INDEX_MASK,
                addr,
                response.r1().0
            );
            return Err(Error::Response);
        }

        Ok(())
    }

    /// Reads one block at the card address `addr` into `buf`.
    pub fn read_block(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.data_command(commands::CMD17, addr)?;

        let token = self.wait_for_token(C::READ_TOKEN_ATTEMPTS, 0, |token| {
            token == tokens::DATA_START_BLOCK
        })?;
        if token.is_none() {
            warn!("Data token timeout, address: {}", addr);
            return Err(Error::Timeout);
        }

        self.receive_slice(buf)?;

        let mut crc = [0u8; 2];
        self.receive_slice(&mut crc)?;

        if C::CRC_ENABLED {
            let card_crc = u16::from_be_bytes(crc);
            let host_crc = crc16(buf);

            if card_crc != host_crc {
                error!("Data CRC mismatch, card: {}, host: {}", card_crc, host_crc);
                return Err(Error::Response);
            }
        }

        Ok(())
    }

    /// Writes one block from `buf` at the card address `addr`.
    pub fn write_block(&mut self, addr: u32, buf: &[u8]) -> Result<(), Error> {
        self.data_command(commands::CMD24, addr)?;

        let crc = if C::CRC_ENABLED {
            crc16(buf).to_be_bytes()
        } else {
            tokens::FILLER_CRC
        };

        self.send(tokens::DATA_START_BLOCK)?;
        self.send_slice(buf)?;
        self.send_slice(&crc)?;

        let data_response = self.receive()?;
        if data_response & tokens::DATA_RES_MASK != tokens::DATA_RES_ACCEPTED {
            error!("Data rejected, address: {}, token: 0x{:02X}", addr, data_response);
            return Err(Error::Response);
        }

        self.wait_not_busy(C::WRITE_BUSY_ATTEMPTS, C::WRITE_BUSY_DELAY_US)
            .map_err(|err| {
                warn!("Card stays busy after write, address: {}", addr);
                err
            })
    }

    /// Reads consecutive blocks, stops at the first failure.
    pub fn read_blocks(
        &mut self,
        geometry: &Geometry,
        op: LbaOperation,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let step = geometry.address_step();
        let block_size = geometry.block_size as usize;

        for (i, block) in buf.chunks_exact_mut(block_size).enumerate() {
            let addr = Self::block_address(op, step, i)?;
            self.read_block(addr, block)?;
        }

        Ok(())
    }

    /// Writes consecutive blocks, stops at the first failure.
    pub fn write_blocks(
        &mut self,
        geometry: &Geometry,
        op: LbaOperation,
        buf: &[u8],
    ) -> Result<(), Error> {
        let step = geometry.address_step();
        let block_size = geometry.block_size as usize;

        for (i, block) in buf.chunks_exact(block_size).enumerate() {
            let addr = Self::block_address(op, step, i)?;
            self.write_block(addr, block)?;
        }

        Ok(())
    }

    fn block_address(op: LbaOperation, step: u32, index: usize) -> Result<u32, Error> {
        u32::try_from(index)
            .ok()
            .and_then(|index| index.checked_mul(step))
            .and_then(|offset| op.lba_addr.checked_add(offset))
            .ok_or(Error::Param)
    }

    /// Erases the range with CMD32, CMD33 and CMD38.
    pub fn erase(&mut self, range: EraseRange) -> Result<(), Error> {
        debug!("SD erase, start: {}, end: {}", range.start, range.end);

        let steps = [
            (commands::CMD32, range.start, ResponseShape::R1),
            (commands::CMD33, range.end, ResponseShape::R1),
            (commands::CMD38, 0, ResponseShape::R1b),
        ];

        for (cmd, arg, shape) in steps {
            let response = self.command(cmd, arg, shape)?;

            if response.r1() != R1Response::READY_STATE {
                error!(
                    "CMD{} failed: 0x{:02X}",
                    cmd & commands::CMD_INDEX_MASK,
                    response.r1().0
                );
                return Err(Error::Failed);
            }
        }

        Ok(())
    }
}
