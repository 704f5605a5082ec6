//! SD Memory Card driver for the SPI-mode protocol, written in Embedded Rust.
//!
//! The driver is card agnostic: it identifies the card generation and capacity class, then
//! translates byte addressed read/write/erase requests into block commands. The bus is reached
//! through the [`SpiTransport`] trait; [`HalTransport`] implements it over `embedded-hal` SPI and
//! `switch-hal` pins.
//!
//! ```ignore
//! let transport = HalTransport::new(spi, cs.into_active_low_switch(), delay);
//! let mut card = CardSession::new("sd0", transport);
//!
//! card.init()?;
//! card.read(0, &mut buf)?;
//! ```

#![cfg_attr(not(test), no_std)]

mod fmt;

mod block;
mod command;
mod config;
mod consts;
mod crc;
mod csd;
mod geometry;
mod hal;
mod identify;
mod registry;
mod response;
mod transport;

#[cfg(test)]
mod testutil;

pub use crate::command::CommandRequest;
pub use crate::config::{DefaultSdSpiConfig, SdSpiConfig};
pub use crate::csd::{parse_csd_v1, parse_csd_v2, CapacityProvider, Csd, CsdData, CsdV1, CsdV2};
pub use crate::geometry::{CardClass, EraseRange, Geometry, LbaOperation, LbaRequest};
pub use crate::hal::{BusSpeed, HalTransport, NoCardDetect};
pub use crate::identify::IdentState;
pub use crate::registry::Registry;
pub use crate::response::{IfCondEcho, Ocr, R1Response, ResponseResult, ResponseShape};
pub use crate::transport::{ControlOp, SpiTransport};
pub use diskio::{
    BlockSize, DiskioDevice, Error as DiskioError, IoctlCmd, Lba, Status, StatusFlag,
};

use crate::{consts::BLOCK_SIZE, transport::Link};

use core::cell::{Cell, RefCell};
use size::Size;

/// Driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Error {
    /// Transport failure or short transfer.
    Io,
    /// Bounded wait exhausted: no response, no data token, card busy or bus taken.
    Timeout,
    /// Card or operation not supported.
    Unsupported,
    /// Card is not initialized.
    NotInited,
    /// Card refused an operation or returned a malformed register.
    Failed,
    /// Invalid argument.
    Param,
    /// Card reported an error in a response or a data token.
    Response,
}

/// Lifecycle of a [`CardSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum SessionState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Deinitialized,
}

/// One SD card behind a [`SpiTransport`].
///
/// `T` - transport, pass `&mut transport` to keep ownership of it.
/// `C` - config implementation of driver config trait.
/// `U` - user data.
pub struct CardSession<T: SpiTransport, C: SdSpiConfig = DefaultSdSpiConfig, U = ()> {
    name: &'static str,
    link: RefCell<Link<T, C>>,
    geometry: Geometry,
    state: Cell<SessionState>,
    faulted: bool,
    user_data: U,
}

impl<T: SpiTransport> CardSession<T> {
    /// Creates a new [`CardSession`] with the default config.
    ///
    /// `name` - identity used in diagnostics and registry lookups.
    /// `transport` - bus of the card.
    pub fn new(name: &'static str, transport: T) -> Self {
        Self::with_config(name, transport)
    }
}

impl<T: SpiTransport, C: SdSpiConfig> CardSession<T, C> {
    /// Creates a new [`CardSession`], the config is picked by the type parameter.
    pub fn with_config(name: &'static str, transport: T) -> Self {
        CardSession {
            name,
            link: RefCell::new(Link::new(transport)),
            geometry: Geometry::default(),
            state: Cell::new(SessionState::Uninitialized),
            faulted: false,
            user_data: (),
        }
    }
}

impl<T: SpiTransport, C: SdSpiConfig, U> CardSession<T, C, U> {
    /// Attaches user data.
    pub fn with_user_data<V>(self, user_data: V) -> CardSession<T, C, V> {
        CardSession {
            name: self.name,
            link: self.link,
            geometry: self.geometry,
            state: self.state,
            faulted: self.faulted,
            user_data,
        }
    }

    /// Powers up and identifies the card.
    pub fn init(&mut self) -> Result<(), Error> {
        info!("SD {} initialize started", self.name);

        self.state.set(SessionState::Initializing);
        self.geometry = Geometry::default();

        match Self::bring_up(self.link.get_mut()) {
            Ok(geometry) => {
                self.geometry = geometry;
                self.faulted = false;
                self.state.set(SessionState::Ready);
                self.print_info();
                Ok(())
            }
            Err(err) => {
                error!("Failed to initialize SD {}: {:?}", self.name, err);
                self.faulted = true;
                self.state.set(SessionState::Uninitialized);
                Err(err)
            }
        }
    }

    /// Power up, identify, switch to the data clock.
    fn bring_up(link: &mut Link<T, C>) -> Result<Geometry, Error> {
        link.control(ControlOp::InitHardware)?;
        link.control(ControlOp::SetLowSpeed)?;
        link.power_on()?;

        let geometry = link.identify()?;

        link.control(ControlOp::SetHighSpeed)?;

        Ok(geometry)
    }

    /// Print info.
    fn print_info(&self) {
        info!(
            "{} card {} ready, capacity: {} MiB, block size: {}, erase sector: {} KiB",
            self.geometry.class.name(),
            self.name,
            self.geometry.capacity >> 20,
            self.geometry.block_size,
            self.geometry.erase_sector_size >> 10
        );
    }

    /// Puts the card back to idle and releases the bus hardware.
    pub fn deinit(&mut self) -> Result<(), Error> {
        info!("SD {} deinitialize", self.name);

        let link = self.link.get_mut();
        if let Err(err) = link.into_idle() {
            warn!("SD {} doesn't return to idle: {:?}", self.name, err);
        }
        link.control(ControlOp::DeinitHardware)?;

        self.state.set(SessionState::Deinitialized);

        Ok(())
    }

    /// Validate a read/write request before any bus activity.
    fn validate_request(&self, buf_len: usize) -> Result<LbaRequest, Error> {
        if buf_len == 0 {
            return Err(Error::Param);
        }

        self.validate_ready()?;

        let block_size = self.geometry.block_size as usize;
        if buf_len % block_size != 0 {
            error!(
                "SD invalid buffer, length: {}, block size: {}",
                buf_len, block_size
            );
            return Err(Error::Param);
        }

        Ok(LbaRequest {
            offset: 0,
            len: u32::try_from(buf_len).map_err(|_| Error::Param)?,
        })
    }

    /// Validate initialized.
    fn validate_ready(&self) -> Result<(), Error> {
        if self.state.get() == SessionState::Ready {
            Ok(())
        } else {
            Err(Error::NotInited)
        }
    }

    /// Reads `buf.len()` bytes from the byte address `addr`.
    ///
    /// The length must be a multiple of the block size and `addr` block aligned.
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), Error> {
        let request = LbaRequest {
            offset: addr,
            ..self.validate_request(buf.len())?
        };
        let op = self.geometry.translate(request)?;
        let geometry = self.geometry;

        self.link
            .borrow_mut()
            .cs_scope(|link| link.read_blocks(&geometry, op, buf))
            .map_err(|err| {
                error!("Read at {} failed: {:?}", addr, err);
                err
            })
    }

    /// Writes `buf` at the byte address `addr`.
    ///
    /// The length must be a multiple of the block size and `addr` block aligned.
    pub fn write(&self, addr: u64, buf: &[u8]) -> Result<(), Error> {
        let request = LbaRequest {
            offset: addr,
            ..self.validate_request(buf.len())?
        };
        let op = self.geometry.translate(request)?;
        let geometry = self.geometry;

        self.link
            .borrow_mut()
            .cs_scope(|link| link.write_blocks(&geometry, op, buf))
            .map_err(|err| {
                error!("Write at {} failed: {:?}", addr, err);
                err
            })
    }

    /// Erases `count` erase sectors from the byte address `addr`.
    pub fn erase_sectors(&self, addr: u64, count: u32) -> Result<(), Error> {
        if count == 0 {
            return Err(Error::Param);
        }

        self.validate_ready()?;

        let range = self.geometry.erase_range(addr, count)?;

        self.link
            .borrow_mut()
            .cs_scope(|link| link.erase(range))
            .map_err(|err| {
                error!("Erase at {} failed: {:?}", addr, err);
                err
            })
    }

    /// Erases the whole card.
    pub fn erase_all(&self) -> Result<(), Error> {
        self.validate_ready()?;

        let sector = u64::from(self.geometry.erase_sector_size);
        if sector == 0 {
            return Err(Error::Unsupported);
        }
        let count = u32::try_from(self.geometry.capacity / sector).map_err(|_| Error::Param)?;

        info!(
            "Erase chip, capacity: {} MiB, sector size: {} KiB, total sector count: {}",
            self.geometry.capacity >> 20,
            sector >> 10,
            count
        );

        self.erase_sectors(0, count)
    }

    /// Reads the R1 status of the card with SEND_STATUS.
    pub fn status_byte(&self) -> Result<u8, Error> {
        self.validate_ready()?;

        self.link.borrow_mut().cs_scope(|link| link.status())
    }

    /// Checks whether a card sits in the slot.
    ///
    /// The card-detect hardware answers first. Without it, an initialized card is probed with
    /// GO_IDLE_STATE; that leaves the card idle, so the session has to be initialized again.
    pub fn is_inserted(&self) -> bool {
        let mut link = self.link.borrow_mut();

        match link.transport_mut().control(ControlOp::QueryDetached) {
            Ok(()) => false,
            Err(Error::Failed) => true,
            Err(_) if self.state.get() == SessionState::Ready => {
                let present = link.into_idle().is_ok();
                self.state.set(SessionState::Uninitialized);
                present
            }
            Err(_) => false,
        }
    }

    /// Name of the session.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Capacity in bytes, zero before initialization.
    pub fn capacity(&self) -> u64 {
        self.ready_geometry().capacity
    }

    /// Class of the card, resolved by identification.
    pub fn class(&self) -> CardClass {
        self.geometry.class
    }

    /// Block size in bytes, zero before initialization.
    pub fn block_size(&self) -> u32 {
        self.ready_geometry().block_size
    }

    /// Erase sector size in bytes, zero before initialization.
    pub fn erase_sector_size(&self) -> u32 {
        self.ready_geometry().erase_sector_size
    }

    /// Geometry of the card, default before initialization.
    pub fn geometry(&self) -> Geometry {
        self.ready_geometry()
    }

    /// Geometry, when ready.
    fn ready_geometry(&self) -> Geometry {
        if self.is_initialized() {
            self.geometry
        } else {
            Geometry::default()
        }
    }

    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Returns `true` when the session is ready for data transfers.
    pub fn is_initialized(&self) -> bool {
        self.state.get() == SessionState::Ready
    }

    /// Returns `true` while the card is selected.
    pub fn is_selected(&self) -> bool {
        self.link.borrow().is_selected()
    }

    /// User data.
    pub fn user_data(&self) -> &U {
        &self.user_data
    }

    /// Mutable user data.
    pub fn user_data_mut(&mut self) -> &mut U {
        &mut self.user_data
    }

    /// Replaces the user data.
    pub fn set_user_data(&mut self, user_data: U) {
        self.user_data = user_data;
    }

    /// Transport of the card, for direct bus access.
    pub fn transport_mut(&mut self) -> &mut T {
        self.link.get_mut().transport_mut()
    }

    /// Releases the transport.
    pub fn release(self) -> T {
        self.link.into_inner().into_transport()
    }
}

impl<T: SpiTransport, C: SdSpiConfig, U> CapacityProvider for CardSession<T, C, U> {
    fn card_capacity(&self) -> Size {
        self.ready_geometry().card_capacity()
    }

    fn card_capacity_blocks(&self) -> u64 {
        self.ready_geometry().card_capacity_blocks()
    }
}

impl<T: SpiTransport, C: SdSpiConfig, U> CardSession<T, C, U> {
    /// Byte address of a logical block.
    fn lba_offset(&self, lba: Lba) -> Result<u64, DiskioError<Error>> {
        (lba as u64)
            .checked_mul(u64::from(self.geometry.block_size))
            .ok_or(DiskioError::InvalidArgument)
    }
}

/// Maps driver errors onto the block device errors.
fn disk_error(err: Error) -> DiskioError<Error> {
    match err {
        Error::Param => DiskioError::InvalidArgument,
        Error::NotInited => DiskioError::NotInitialized,
        err => DiskioError::Hardware(err),
    }
}

impl<T: SpiTransport, C: SdSpiConfig, U> DiskioDevice for CardSession<T, C, U> {
    type HardwareError = Error;

    fn status(&self) -> Status {
        match self.state.get() {
            SessionState::Ready => Status::default(),
            _ if self.faulted => StatusFlag::ErrorOccured | StatusFlag::NotInitialized,
            _ => StatusFlag::NotInitialized.into(),
        }
    }

    fn reset(&mut self) {
        info!("SD reset invoked");
        self.faulted = false;
        self.state.set(SessionState::Uninitialized);
    }

    fn initialize(&mut self) -> Result<(), DiskioError<Self::HardwareError>> {
        if self.is_initialized() {
            warn!("SD already is initialized");
            return Err(DiskioError::AlreadyInitialized);
        }

        self.init().map_err(DiskioError::Hardware)
    }

    fn read(&self, buf: &mut [u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        let addr = self.lba_offset(lba)?;

        CardSession::read(self, addr, buf).map_err(disk_error)
    }

    fn write(&self, buf: &[u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        let addr = self.lba_offset(lba)?;

        CardSession::write(self, addr, buf).map_err(disk_error)
    }

    fn ioctl(&self, cmd: IoctlCmd) -> Result<(), DiskioError<Self::HardwareError>> {
        match cmd {
            IoctlCmd::CtrlSync => {
                self.validate_ready().map_err(disk_error)?;

                self.link
                    .borrow_mut()
                    .cs_scope(|link| {
                        link.wait_not_busy(C::WRITE_BUSY_ATTEMPTS, C::WRITE_BUSY_DELAY_US)
                    })
                    .map_err(DiskioError::Hardware)
            }
            IoctlCmd::GetBlockSize(block_size) => {
                *block_size = BLOCK_SIZE as BlockSize;
                Ok(())
            }
            _ => Err(DiskioError::NotSupported),
        }
    }
}
