//! Simulated SD card speaking the SPI-mode protocol.

#![allow(dead_code)]

use sdspi::{ControlOp, CsdData, CsdV1, CsdV2, Error, SpiTransport};

use std::collections::{HashMap, VecDeque};

pub const BLOCK: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    /// Physical layer 1.x, rejects SEND_IF_COND.
    V1,
    SdscV2,
    Sdhc,
    Sdxc,
}

/// Version 1 CSD: 1 GiB card with 1024-byte read blocks and 64 KiB erase sectors.
pub fn csd_v1() -> CsdData {
    let mut csd = CsdV1(0);
    csd.set_version(0);
    csd.set_read_block_length(10);
    csd.set_device_size(4095);
    csd.set_device_size_multiplier(6);
    csd.set_erase_sector_size(127);
    csd.set_write_block_length(9);
    csd.0.to_be_bytes()
}

/// Version 2 CSD with the given C_SIZE and 64 KiB erase sectors.
pub fn csd_v2(c_size: u32) -> CsdData {
    let mut csd = CsdV2(0);
    csd.set_version(1);
    csd.set_device_size(c_size);
    csd.set_erase_sector_size(127);
    csd.set_write_block_length(9);
    csd.0.to_be_bytes()
}

/// C_SIZE of a 16 GiB card.
pub const SDHC_C_SIZE: u32 = 32_767;
/// C_SIZE of a 64 GiB card.
pub const SDXC_C_SIZE: u32 = 131_071;

enum Write {
    Idle,
    AwaitToken(u64),
    Data(u64, Vec<u8>),
}

pub struct SimCard {
    pub kind: CardKind,
    pub csd: CsdData,
    /// Fail the transfer carrying the SEND_IF_COND frame.
    pub cmd8_io_error: bool,
    /// Answer every SD_SEND_OP_COND with the idle bit set.
    pub acmd41_never_ready: bool,
    /// Answer READ_SINGLE_BLOCK without a data token.
    pub drop_data_token: bool,
    /// Reply to a card-detect query.
    pub detect: Result<(), Error>,
    pub controls: Vec<ControlOp>,
    pub transfers: usize,
    pub commands: Vec<(u8, u32)>,
    pub delays: u64,
    blocks: HashMap<u64, Vec<u8>>,
    erased: Vec<(u64, u64)>,
    selected: bool,
    idle: bool,
    app_cmd: bool,
    op_cond_rounds: u32,
    frame: Vec<u8>,
    out: VecDeque<u8>,
    write: Write,
    erase_start: u32,
    erase_end: u32,
}

impl SimCard {
    pub fn new(kind: CardKind) -> Self {
        let csd = match kind {
            CardKind::V1 | CardKind::SdscV2 => csd_v1(),
            CardKind::Sdhc => csd_v2(SDHC_C_SIZE),
            CardKind::Sdxc => csd_v2(SDXC_C_SIZE),
        };

        SimCard {
            kind,
            csd,
            cmd8_io_error: false,
            acmd41_never_ready: false,
            drop_data_token: false,
            detect: Err(Error::Unsupported),
            controls: Vec::new(),
            transfers: 0,
            commands: Vec::new(),
            delays: 0,
            blocks: HashMap::new(),
            erased: Vec::new(),
            selected: false,
            idle: false,
            app_cmd: false,
            op_cond_rounds: 3,
            frame: Vec::new(),
            out: VecDeque::new(),
            write: Write::Idle,
            erase_start: 0,
            erase_end: 0,
        }
    }

    /// Count of bus interactions of any kind.
    pub fn bus_activity(&self) -> usize {
        self.controls.len() + self.transfers
    }

    pub fn commands_sent(&self, index: u8) -> usize {
        self.commands.iter().filter(|(cmd, _)| *cmd == index).count()
    }

    fn block_addressed(&self) -> bool {
        matches!(self.kind, CardKind::Sdhc | CardKind::Sdxc)
    }

    /// Block number of a data address.
    fn block_of(&self, addr: u32) -> u64 {
        if self.block_addressed() {
            u64::from(addr)
        } else {
            u64::from(addr) / BLOCK as u64
        }
    }

    pub fn block(&self, number: u64) -> Vec<u8> {
        if let Some(data) = self.blocks.get(&number) {
            return data.clone();
        }

        let erased = self
            .erased
            .iter()
            .any(|(start, end)| (*start..=*end).contains(&number));

        vec![if erased { 0xFF } else { 0x00 }; BLOCK]
    }

    pub fn erased_ranges(&self) -> &[(u64, u64)] {
        &self.erased
    }

    fn respond(&mut self, bytes: &[u8]) {
        // One idle byte before the response.
        self.out.push_back(0xFF);
        self.out.extend(bytes.iter().copied());
    }

    fn r1(&self) -> u8 {
        u8::from(self.idle)
    }

    fn execute(&mut self, cmd: u8, arg: u32) {
        self.commands.push((cmd, arg));
        let app_cmd = std::mem::take(&mut self.app_cmd);

        match (cmd, app_cmd) {
            (0, _) => {
                self.idle = true;
                self.op_cond_rounds = 3;
                self.respond(&[0x01]);
            }
            (8, _) if self.kind == CardKind::V1 => self.respond(&[0x05]),
            (8, _) => {
                let [_, _, voltage, pattern] = arg.to_be_bytes();
                self.respond(&[self.r1(), 0x00, 0x00, voltage & 0x0F, pattern]);
            }
            (55, _) => {
                self.app_cmd = true;
                self.respond(&[self.r1()]);
            }
            (41, true) => {
                if !self.acmd41_never_ready {
                    self.op_cond_rounds = self.op_cond_rounds.saturating_sub(1);
                    if self.op_cond_rounds == 0 {
                        self.idle = false;
                    }
                }
                self.respond(&[self.r1()]);
            }
            (58, _) => {
                let ccs = if self.block_addressed() { 0x40 } else { 0x00 };
                self.respond(&[self.r1(), 0x80 | ccs, 0xFF, 0x80, 0x00]);
            }
            (59, _) => self.respond(&[self.r1()]),
            (16, _) if arg == BLOCK as u32 => self.respond(&[0x00]),
            (16, _) => self.respond(&[0x40]),
            (9, _) => {
                let mut bytes = vec![0x00, 0xFF, 0xFE];
                bytes.extend_from_slice(&self.csd);
                bytes.extend_from_slice(&[0x00, 0x00]);
                self.respond(&bytes);
            }
            (13, _) => self.respond(&[0x00, 0x00]),
            (17, _) => {
                let number = self.block_of(arg);
                let mut bytes = vec![0x00, 0xFF];
                if !self.drop_data_token {
                    bytes.push(0xFE);
                    bytes.extend(self.block(number));
                    bytes.extend_from_slice(&[0x00, 0x00]);
                }
                self.respond(&bytes);
            }
            (24, _) => {
                self.write = Write::AwaitToken(self.block_of(arg));
                self.respond(&[0x00]);
            }
            (32, _) => {
                self.erase_start = arg;
                self.respond(&[0x00]);
            }
            (33, _) => {
                self.erase_end = arg;
                self.respond(&[0x00]);
            }
            (38, _) => {
                let start = self.block_of(self.erase_start);
                let end = self.block_of(self.erase_end);
                self.blocks
                    .retain(|number, _| !(start..=end).contains(number));
                self.erased.push((start, end));
                self.respond(&[0x00, 0x00, 0x00, 0x00]);
            }
            _ => self.respond(&[self.r1() | 0x04]),
        }
    }

    fn on_write_byte(&mut self, byte: u8) -> bool {
        match std::mem::replace(&mut self.write, Write::Idle) {
            Write::Idle => false,
            Write::AwaitToken(number) => {
                self.write = if byte == 0xFE {
                    Write::Data(number, Vec::with_capacity(BLOCK + 2))
                } else {
                    Write::AwaitToken(number)
                };
                true
            }
            Write::Data(number, mut data) => {
                data.push(byte);
                if data.len() == BLOCK + 2 {
                    data.truncate(BLOCK);
                    self.blocks.insert(number, data);
                    // Data accepted, then busy while programming.
                    self.out.extend([0xE5, 0x00, 0x00]);
                } else {
                    self.write = Write::Data(number, data);
                }
                true
            }
        }
    }

    fn on_byte(&mut self, byte: u8) {
        if !self.selected || self.on_write_byte(byte) {
            return;
        }

        if self.frame.is_empty() && byte & 0xC0 != 0x40 {
            return;
        }

        self.frame.push(byte);
        if self.frame.len() == 6 {
            let frame = std::mem::take(&mut self.frame);
            let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
            self.execute(frame[0] & 0x3F, arg);
        }
    }
}

impl SpiTransport for SimCard {
    fn control(&mut self, op: ControlOp) -> Result<(), Error> {
        self.controls.push(op);

        match op {
            ControlOp::Select => self.selected = true,
            ControlOp::Deselect => {
                self.selected = false;
                self.out.clear();
                self.frame.clear();
            }
            ControlOp::QueryDetached => return self.detect,
            _ => {}
        }

        Ok(())
    }

    fn transfer(&mut self, tx: Option<&[u8]>, rx: Option<&mut [u8]>) -> Result<usize, Error> {
        self.transfers += 1;

        if let Some(tx) = tx {
            if self.cmd8_io_error && self.selected && tx.first() == Some(&0x48) {
                return Err(Error::Io);
            }

            for byte in tx {
                self.on_byte(*byte);
            }

            return Ok(tx.len());
        }

        match rx {
            Some(rx) => {
                for byte in rx.iter_mut() {
                    *byte = self.out.pop_front().unwrap_or(0xFF);
                }
                Ok(rx.len())
            }
            None => Ok(0),
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.delays += u64::from(us);
    }
}
