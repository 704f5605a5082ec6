//! Card identification: reset to idle, voltage check and the two initialization paths.

use crate::{
    command::CommandRequest,
    config::SdSpiConfig,
    consts::{args, commands, BLOCK_SIZE, SDXC_CAPACITY_THRESHOLD},
    csd::{parse_csd_v1, parse_csd_v2, CsdData},
    geometry::{CardClass, Geometry},
    response::{R1Response, ResponseShape},
    transport::{Link, SpiTransport},
    Error,
};

/// Identification progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum IdentState {
    /// Card put into the idle state.
    Reset,
    /// SEND_IF_COND issued.
    VoltageCheckSent,
    /// Card rejected SEND_IF_COND, physical layer 1.x.
    LegacyPath,
    /// Card echoed SEND_IF_COND, physical layer 2.00 or later.
    V2Path,
    /// Class and geometry known.
    GeometryResolved,
}

/// Outcome of SEND_IF_COND.
enum VoltageCheck {
    Legacy,
    V2,
}

fn enter(state: IdentState) {
    debug!("SD identification: {:?}", state);
}

impl<T: SpiTransport, C: SdSpiConfig> Link<T, C> {
    /// Puts the card into the idle state with GO_IDLE_STATE.
    pub fn into_idle(&mut self) -> Result<(), Error> {
        let request = CommandRequest::new(commands::CMD0, 0, ResponseShape::R1)
            .with_retry(C::IDLE_RESPONSE_ATTEMPTS);

        self.settled_scope(|link| {
            for attempt in 0..C::IDLE_ATTEMPTS {
                trace!("Enter to SPI mode for SD, attempt: {}", attempt + 1);

                match link.send_command(&request) {
                    Ok(response) if response.r1() == R1Response::IN_IDLE_STATE => return Ok(()),
                    Ok(response) => warn!(
                        "Wrong response from CMD{}: 0x{:02X}",
                        request.index(),
                        response.r1().0
                    ),
                    Err(Error::Timeout) => {}
                    Err(err) => return Err(err),
                }
            }

            error!("SD card doesn't enter the idle state");
            Err(Error::Timeout)
        })
    }

    /// Resets the card and resolves its class and geometry.
    pub fn identify(&mut self) -> Result<Geometry, Error> {
        enter(IdentState::Reset);
        self.into_idle()?;

        let geometry = self.settled_scope(|link| {
            if C::CRC_ENABLED {
                link.enable_crc()?;
            }

            match link.check_voltage()? {
                VoltageCheck::Legacy => link.legacy_path(),
                VoltageCheck::V2 => link.v2_path(),
            }
        })?;

        enter(IdentState::GeometryResolved);

        Ok(geometry)
    }

    /// Enable CRC.
    fn enable_crc(&mut self) -> Result<(), Error> {
        info!("Enabling CRC for SD");

        let response = self.command(commands::CMD59, args::CRC_ON, ResponseShape::R1)?;
        if response.r1() != R1Response::IN_IDLE_STATE {
            error!("CMD59 failed: 0x{:02X}", response.r1().0);
            return Err(Error::Failed);
        }

        Ok(())
    }

    /// Verify SD Memory Card interface operating condition.
    fn check_voltage(&mut self) -> Result<VoltageCheck, Error> {
        enter(IdentState::VoltageCheckSent);

        let response = match self.command(commands::CMD8, args::IF_COND, ResponseShape::R7) {
            Ok(response) => response,
            Err(err) => {
                info!("CMD8 failed ({:?}), maybe a SDSC v1.x or MMC", err);
                return Ok(VoltageCheck::Legacy);
            }
        };

        let r1 = response.r1();
        if r1 == R1Response::IN_IDLE_STATE {
            let echo = response.if_cond();
            if echo.voltage_accepted() == args::IF_COND_VOLTAGE
                && echo.check_pattern() == args::IF_COND_PATTERN
            {
                debug!("CMD8 allowed, maybe a SD v2.00+");
                Ok(VoltageCheck::V2)
            } else {
                error!("CMD8 voltage or pattern mismatch");
                Err(Error::Unsupported)
            }
        } else if r1.in_idle_state() && r1.illegal_command() {
            info!("CMD8 is illegal, maybe a SDSC v1.x or MMC");
            Ok(VoltageCheck::Legacy)
        } else {
            error!("CMD8 response error: 0x{:02X}", r1.0);
            Err(Error::Response)
        }
    }

    /// Runs CMD55 + ACMD41 until the card leaves the idle state.
    ///
    /// CMD55 must find the card idle, `rejected` is returned otherwise.
    fn wait_op_cond(&mut self, arg: u32, rejected: Error) -> Result<(), Error> {
        for _ in 0..C::OP_COND_ATTEMPTS {
            let response = self.command(commands::CMD55, 0, ResponseShape::R1)?;
            if response.r1() != R1Response::IN_IDLE_STATE {
                error!("CMD55 failed: 0x{:02X}", response.r1().0);
                return Err(rejected);
            }

            let response = self.command(commands::ACMD41, arg, ResponseShape::R1)?;
            if !response.r1().in_idle_state() {
                return Ok(());
            }

            self.delay_us(C::OP_COND_DELAY_US);
        }

        warn!("ACMD41 init timeout");
        Err(Error::Timeout)
    }

    fn read_csd(&mut self) -> Result<CsdData, Error> {
        Ok(self
            .command(commands::CMD9, 0, ResponseShape::R2)?
            .register())
    }

    fn legacy_path(&mut self) -> Result<Geometry, Error> {
        enter(IdentState::LegacyPath);

        self.wait_op_cond(0, Error::Failed)?;
        debug!("Card identified as SDSC v1.x");

        let response = self.command(commands::CMD16, BLOCK_SIZE, ResponseShape::R1)?;
        if response.r1() != R1Response::READY_STATE {
            error!("CMD16 failed: 0x{:02X}", response.r1().0);
            return Err(Error::Response);
        }

        let csd = self.read_csd()?;
        let geometry = parse_csd_v1(&csd).map_err(|err| {
            error!("Failed to parse CSD for V1 card");
            err
        })?;

        Ok(Geometry {
            class: CardClass::SdscV1,
            ..geometry
        }
        .with_transfer_blocks())
    }

    fn v2_path(&mut self) -> Result<Geometry, Error> {
        enter(IdentState::V2Path);

        self.wait_op_cond(args::OP_COND_HCS, Error::Unsupported)?;

        let response = self.command(commands::CMD58, 0, ResponseShape::R3)?;
        if response.r1().start_bit() {
            error!("CMD58 error: 0x{:02X}", response.r1().0);
            return Err(Error::Unsupported);
        }
        let high_capacity = response.ocr().card_capacity_status();
        debug!("CCS: {}", high_capacity);

        self.send_dummy(2)?;
        let csd = self.read_csd()?;

        if high_capacity {
            let geometry = parse_csd_v2(&csd).map_err(|err| {
                error!("Failed to parse CSD for SDHC/SDXC card");
                err
            })?;
            let class = if geometry.capacity > SDXC_CAPACITY_THRESHOLD {
                CardClass::Sdxc
            } else {
                CardClass::Sdhc
            };

            Ok(Geometry { class, ..geometry })
        } else {
            let geometry = parse_csd_v1(&csd).map_err(|err| {
                error!("Failed to parse CSD for SDSC v2 card");
                err
            })?;

            Ok(Geometry {
                class: CardClass::SdscV2,
                ..geometry
            }
            .with_transfer_blocks())
        }
    }
}
