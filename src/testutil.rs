//! Scripted transport for unit tests.
//!
//! Sent bytes are recorded and never consume the reply queue: the queue only feeds bytes the
//! driver receives. An exhausted queue reads as an idle bus.

use crate::{ControlOp, DefaultSdSpiConfig, Error, SdSpiConfig, SpiTransport};

use std::{collections::VecDeque, vec::Vec};

/// Default budgets with CRC checking on.
pub struct CrcSdSpiConfig;

impl SdSpiConfig for CrcSdSpiConfig {
    const IDLE_ATTEMPTS: usize = DefaultSdSpiConfig::IDLE_ATTEMPTS;
    const IDLE_RESPONSE_ATTEMPTS: usize = DefaultSdSpiConfig::IDLE_RESPONSE_ATTEMPTS;
    const CMD_RESPONSE_ATTEMPTS: usize = DefaultSdSpiConfig::CMD_RESPONSE_ATTEMPTS;
    const OP_COND_ATTEMPTS: usize = DefaultSdSpiConfig::OP_COND_ATTEMPTS;
    const OP_COND_DELAY_US: u32 = DefaultSdSpiConfig::OP_COND_DELAY_US;
    const REGISTER_TOKEN_ATTEMPTS: usize = DefaultSdSpiConfig::REGISTER_TOKEN_ATTEMPTS;
    const READ_TOKEN_ATTEMPTS: usize = DefaultSdSpiConfig::READ_TOKEN_ATTEMPTS;
    const WRITE_BUSY_ATTEMPTS: usize = DefaultSdSpiConfig::WRITE_BUSY_ATTEMPTS;
    const WRITE_BUSY_DELAY_US: u32 = DefaultSdSpiConfig::WRITE_BUSY_DELAY_US;
    const ERASE_BUSY_ATTEMPTS: usize = DefaultSdSpiConfig::ERASE_BUSY_ATTEMPTS;
    const ERASE_BUSY_DELAY_US: u32 = DefaultSdSpiConfig::ERASE_BUSY_DELAY_US;
    const CRC_ENABLED: bool = true;
}

pub struct ScriptedTransport {
    pub replies: VecDeque<u8>,
    pub sent: Vec<u8>,
    pub controls: Vec<ControlOp>,
    pub delays: Vec<u32>,
    pub detect: Result<(), Error>,
    pub short_transfers: bool,
    pub fail_transfers: bool,
    pub refuse_bus: bool,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        ScriptedTransport {
            replies: VecDeque::new(),
            sent: Vec::new(),
            controls: Vec::new(),
            delays: Vec::new(),
            detect: Err(Error::Unsupported),
            short_transfers: false,
            fail_transfers: false,
            refuse_bus: false,
        }
    }
}

impl ScriptedTransport {
    pub fn replying(replies: &[u8]) -> Self {
        let mut transport = Self::default();
        transport.queue(replies);
        transport
    }

    pub fn queue(&mut self, replies: &[u8]) {
        self.replies.extend(replies.iter().copied());
    }
}

impl SpiTransport for ScriptedTransport {
    fn control(&mut self, op: ControlOp) -> Result<(), Error> {
        self.controls.push(op);

        match op {
            ControlOp::TakeBus if self.refuse_bus => Err(Error::Timeout),
            ControlOp::QueryDetached => self.detect,
            _ => Ok(()),
        }
    }

    fn transfer(&mut self, tx: Option<&[u8]>, rx: Option<&mut [u8]>) -> Result<usize, Error> {
        if self.fail_transfers {
            return Err(Error::Io);
        }

        let len = match (tx, rx) {
            (Some(tx), rx) => {
                self.sent.extend_from_slice(tx);
                if let Some(rx) = rx {
                    for byte in rx.iter_mut() {
                        *byte = self.replies.pop_front().unwrap_or(0xFF);
                    }
                }
                tx.len()
            }
            (None, Some(rx)) => {
                for byte in rx.iter_mut() {
                    self.sent.push(0xFF);
                    *byte = self.replies.pop_front().unwrap_or(0xFF);
                }
                rx.len()
            }
            (None, None) => 0,
        };

        if self.short_transfers && len > 0 {
            Ok(len - 1)
        } else {
            Ok(len)
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.delays.push(us);
    }
}
