use crate::{
    config::SdSpiConfig,
    consts::{commands, tokens},
    crc::{crc16, crc7},
    response::{ResponseResult, ResponseShape},
    transport::{Link, SpiTransport},
    Error,
};

/// Default count of response polls of a command.
const DEFAULT_RETRY: usize = 5;

/// One framed command and the way to read its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct CommandRequest {
    /// Command byte, index with the transmission bit set.
    pub cmd: u8,
    /// Argument.
    pub arg: u32,
    /// Last frame byte, CRC7 and the end bit.
    pub crc: u8,
    /// Expected response.
    pub shape: ResponseShape,
    /// Max polls for the first response byte.
    pub retry: usize,
}

impl CommandRequest {
    pub fn new(cmd: u8, arg: u32, shape: ResponseShape) -> Self {
        let mut request = CommandRequest {
            cmd,
            arg,
            crc: 0,
            shape,
            retry: DEFAULT_RETRY,
        };
        let frame = request.frame();
        request.crc = (crc7(&frame[..5]) << 1) | 0x01;

        request
    }

    pub fn with_retry(self, retry: usize) -> Self {
        CommandRequest { retry, ..self }
    }

    /// Command index, as in `CMD<index>`.
    pub fn index(&self) -> u8 {
        self.cmd & commands::CMD_INDEX_MASK
    }

    /// Bytes on the wire.
    pub fn frame(&self) -> [u8; 6] {
        let arg = self.arg.to_be_bytes();
        [self.cmd, arg[0], arg[1], arg[2], arg[3], self.crc]
    }
}

impl<T: SpiTransport, C: SdSpiConfig> Link<T, C> {
    /// Sends a command and reads the response of the requested shape.
    pub fn send_command(&mut self, request: &CommandRequest) -> Result<ResponseResult, Error> {
        let mut response = ResponseResult::default();

        self.send_slice(&request.frame())?;

        let first = self.wait_for_token(request.retry, 0, |byte| byte != tokens::IDLE)?;
        let Some(r1) = first else {
            warn!("CMD{} response timeout", request.index());
            return Err(Error::Timeout);
        };
        response.push(&[r1]);

        match request.shape {
            ResponseShape::R1 => {}
            ResponseShape::R1b => {
                self.wait_not_busy(C::ERASE_BUSY_ATTEMPTS, C::ERASE_BUSY_DELAY_US)
                    .map_err(|err| {
                        warn!("CMD{} busy timeout", request.index());
                        err
                    })?;
            }
            ResponseShape::R2 => self.read_register(request, &mut response)?,
            ResponseShape::R3 | ResponseShape::R7 => {
                response.fill_with(4, |buf| self.receive_slice(buf))?;
            }
        }

        trace!("CMD{} response: 0x{:02X}", request.index(), r1);

        Ok(response)
    }

    /// Sends a command with the default poll budget.
    pub fn command(&mut self, cmd: u8, arg: u32, shape: ResponseShape) -> Result<ResponseResult, Error> {
        let request = CommandRequest::new(cmd, arg, shape).with_retry(C::CMD_RESPONSE_ATTEMPTS);
        self.send_command(&request)
    }

    /// Data phase of an R2 response, the 16 register bytes replace the R1 byte.
    fn read_register(
        &mut self,
        request: &CommandRequest,
        response: &mut ResponseResult,
    ) -> Result<(), Error> {
        let r1 = response.r1();
        if r1.0 != 0x00 {
            error!("CMD{} error before data phase: 0x{:02X}", request.index(), r1.0);
            return Err(Error::Response);
        }

        let token = self.wait_for_token(C::REGISTER_TOKEN_ATTEMPTS, 0, |byte| {
            byte == tokens::DATA_START_BLOCK
        })?;
        if token.is_none() {
            warn!("Data token timeout for CMD{}", request.index());
            return Err(Error::Timeout);
        }

        response.clear();
        response.fill_with(16, |buf| self.receive_slice(buf))?;

        let mut crc = [0u8; 2];
        self.receive_slice(&mut crc)?;

        if C::CRC_ENABLED && u16::from_be_bytes(crc) != crc16(response.as_slice()) {
            error!("CMD{} register CRC mismatch", request.index());
            return Err(Error::Response);
        }

        Ok(())
    }

    /// Reads the R1 status of the card.
    pub fn status(&mut self) -> Result<u8, Error> {
        let request = CommandRequest::new(commands::CMD13, 0, ResponseShape::R1)
            .with_retry(usize::from(u8::MAX));

        Ok(self.send_command(&request)?.r1().0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consts::args,
        testutil::{CrcSdSpiConfig, ScriptedTransport},
        DefaultSdSpiConfig,
    };

    type TestLink = Link<ScriptedTransport, DefaultSdSpiConfig>;
    type CrcLink = Link<ScriptedTransport, CrcSdSpiConfig>;

    fn register_reply(crc: u16) -> Vec<u8> {
        let mut replies = vec![0x00, 0xFE];
        replies.extend(1..=16u8);
        replies.extend(crc.to_be_bytes());
        replies
    }

    #[test]
    fn go_idle_frame() {
        let request = CommandRequest::new(commands::CMD0, 0, ResponseShape::R1);

        assert_eq!(request.frame(), [0x40, 0x00, 0x00, 0x00, 0x00, 0x95]);
        assert_eq!(request.index(), 0);
    }

    #[test]
    fn send_if_cond_frame() {
        let request = CommandRequest::new(commands::CMD8, args::IF_COND, ResponseShape::R7);

        assert_eq!(request.frame(), [0x48, 0x00, 0x00, 0x01, 0xAA, 0x87]);
        assert_eq!(request.index(), 8);
    }

    #[test]
    fn r1_after_idle_bytes() {
        let mut link = TestLink::new(ScriptedTransport::replying(&[0xFF, 0xFF, 0x01]));
        let request = CommandRequest::new(commands::CMD0, 0, ResponseShape::R1);

        let response = link.send_command(&request).unwrap();

        assert_eq!(response.as_slice(), [0x01]);
        assert_eq!(&link.transport().sent[..6], request.frame());
    }

    #[test]
    fn no_response_is_timeout() {
        let mut link = TestLink::new(ScriptedTransport::default());
        let request = CommandRequest::new(commands::CMD17, 0, ResponseShape::R1);

        assert_eq!(link.send_command(&request), Err(Error::Timeout));
        // 6 frame bytes and 5 polls.
        assert_eq!(link.transport().sent.len(), 11);
    }

    #[test]
    fn r7_reads_four_more_bytes() {
        let mut link = TestLink::new(ScriptedTransport::replying(&[0x01, 0x00, 0x00, 0x01, 0xAA]));

        let response = link.command(commands::CMD8, args::IF_COND, ResponseShape::R7).unwrap();

        assert_eq!(response.len(), 5);
        assert_eq!(response.payload(), 0x1AA);
    }

    #[test]
    fn r3_reads_ocr() {
        let mut link = TestLink::new(ScriptedTransport::replying(&[0x00, 0xC0, 0xFF, 0x80, 0x00]));

        let response = link.command(commands::CMD58, 0, ResponseShape::R3).unwrap();

        assert!(response.ocr().card_capacity_status());
    }

    #[test]
    fn r2_reads_register() {
        let mut replies = vec![0x00, 0xFF, 0xFF, 0xFE];
        replies.extend(1..=16u8);
        replies.extend([0x12, 0x34]);
        let mut link = TestLink::new(ScriptedTransport::replying(&replies));

        let response = link.command(commands::CMD9, 0, ResponseShape::R2).unwrap();

        assert_eq!(response.len(), 16);
        assert_eq!(response.register()[0], 1);
        assert_eq!(response.register()[15], 16);
        assert!(link.transport().replies.is_empty());
    }

    #[test]
    fn r2_crc_checked() {
        let register: Vec<u8> = (1..=16u8).collect();
        let mut link = CrcLink::new(ScriptedTransport::replying(&register_reply(crc16(&register))));

        let response = link.command(commands::CMD9, 0, ResponseShape::R2).unwrap();

        assert_eq!(response.as_slice(), register);
    }

    #[test]
    fn r2_crc_mismatch_is_response() {
        let mut link = CrcLink::new(ScriptedTransport::replying(&register_reply(0x1234)));

        assert_eq!(
            link.command(commands::CMD9, 0, ResponseShape::R2),
            Err(Error::Response)
        );
    }

    #[test]
    fn r2_with_error_is_response() {
        let mut link = TestLink::new(ScriptedTransport::replying(&[0x04, 0xFE]));

        assert_eq!(
            link.command(commands::CMD9, 0, ResponseShape::R2),
            Err(Error::Response)
        );
    }

    #[test]
    fn r2_without_token_is_timeout() {
        let mut link = TestLink::new(ScriptedTransport::replying(&[0x00]));

        assert_eq!(
            link.command(commands::CMD9, 0, ResponseShape::R2),
            Err(Error::Timeout)
        );
    }

    #[test]
    fn r1b_waits_while_zero() {
        let mut link = TestLink::new(ScriptedTransport::replying(&[0x00, 0x00, 0x00, 0xFF]));

        let response = link.command(commands::CMD38, 0, ResponseShape::R1b).unwrap();

        assert_eq!(response.r1().0, 0x00);
        assert_eq!(link.transport().delays, [5_000, 5_000]);
        assert!(link.transport().replies.is_empty());
    }

    #[test]
    fn status_returns_r1() {
        let mut link = TestLink::new(ScriptedTransport::replying(&[0xFF, 0x00]));

        assert_eq!(link.status(), Ok(0x00));
        assert_eq!(link.transport().sent[0], 0x4D);
    }
}
