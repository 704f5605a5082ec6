//! [`SpiTransport`] over an `embedded-hal` SPI bus and `switch-hal` pins.

use crate::{
    consts::tokens,
    transport::{ControlOp, SpiTransport},
    Error,
};

use embedded_hal::blocking::{delay::DelayUs, spi::Transfer};
use switch_hal::{InputSwitch, OutputSwitch};

/// Bus clock requested by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum BusSpeed {
    /// Identification clock, 100-400 kHz.
    Low,
    /// Data transfer clock.
    High,
}

/// Card-detect placeholder of a slot without a detect switch.
pub enum NoCardDetect {}

impl InputSwitch for NoCardDetect {
    type Error = ();

    fn is_active(&self) -> Result<bool, Self::Error> {
        match *self {}
    }
}

/// Outgoing bytes are copied into chunks of this size, the bus exchanges buffers in place.
const SCRATCH_LEN: usize = 32;

/// Transport of one card slot.
///
/// `Spi` - SPI bus.
/// `Cs` - chip select output switch, active when the card is selected.
/// `Delay` - microseconds delay.
/// `Detect` - card-detect input switch, active when a card is present.
pub struct HalTransport<Spi, Cs, Delay, Detect = NoCardDetect> {
    spi: Spi,
    cs: Cs,
    delay: Delay,
    detect: Option<Detect>,
    speed_hook: Option<fn(&mut Spi, BusSpeed)>,
    bus_taken: bool,
}

impl<Spi, Cs, Delay> HalTransport<Spi, Cs, Delay>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Delay: DelayUs<u32>,
{
    /// Creates a transport without card detection.
    pub fn new(spi: Spi, cs: Cs, delay: Delay) -> Self {
        HalTransport {
            spi,
            cs,
            delay,
            detect: None,
            speed_hook: None,
            bus_taken: false,
        }
    }
}

impl<Spi, Cs, Delay, Detect> HalTransport<Spi, Cs, Delay, Detect>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Delay: DelayUs<u32>,
    Detect: InputSwitch,
{
    /// Adds a card-detect switch.
    pub fn with_card_detect<D: InputSwitch>(self, detect: D) -> HalTransport<Spi, Cs, Delay, D> {
        HalTransport {
            spi: self.spi,
            cs: self.cs,
            delay: self.delay,
            detect: Some(detect),
            speed_hook: self.speed_hook,
            bus_taken: self.bus_taken,
        }
    }

    /// Adds a hook re-clocking the bus when the driver switches speed.
    pub fn with_speed_hook(self, hook: fn(&mut Spi, BusSpeed)) -> Self {
        HalTransport {
            speed_hook: Some(hook),
            ..self
        }
    }

    pub fn spi_mut(&mut self) -> &mut Spi {
        &mut self.spi
    }

    /// Releases the peripherals.
    pub fn release(self) -> (Spi, Cs, Delay) {
        (self.spi, self.cs, self.delay)
    }

    fn set_speed(&mut self, speed: BusSpeed) {
        debug!("SD bus speed: {:?}", speed);

        if let Some(hook) = self.speed_hook {
            hook(&mut self.spi, speed);
        }
    }

    fn query_detached(&mut self) -> Result<(), Error> {
        let Some(detect) = self.detect.as_ref() else {
            return Err(Error::Unsupported);
        };

        match detect.is_active() {
            Ok(true) => Err(Error::Failed),
            Ok(false) => Ok(()),
            Err(_) => {
                warn!("Card detect switch read failed");
                Err(Error::Io)
            }
        }
    }

    fn exchange(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        let len = buf.len();

        self.spi.transfer(buf).map(|_| ()).map_err(|_| {
            error!("SPI transfer of {} bytes failed", len);
            Error::Io
        })
    }
}

impl<Spi, Cs, Delay, Detect> SpiTransport for HalTransport<Spi, Cs, Delay, Detect>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Delay: DelayUs<u32>,
    Detect: InputSwitch,
{
    fn control(&mut self, op: ControlOp) -> Result<(), Error> {
        match op {
            ControlOp::InitHardware => Ok(()),
            ControlOp::DeinitHardware => self.cs.off().map_err(|_| Error::Io),
            ControlOp::QueryDetached => self.query_detached(),
            ControlOp::Select => self.cs.on().map_err(|_| {
                error!("Chip select failed");
                Error::Io
            }),
            ControlOp::Deselect => self.cs.off().map_err(|_| {
                error!("Chip deselect failed");
                Error::Io
            }),
            ControlOp::TakeBus if self.bus_taken => Err(Error::Timeout),
            ControlOp::TakeBus => {
                self.bus_taken = true;
                Ok(())
            }
            ControlOp::ReleaseBus => {
                self.bus_taken = false;
                Ok(())
            }
            ControlOp::SetLowSpeed => {
                self.set_speed(BusSpeed::Low);
                Ok(())
            }
            ControlOp::SetHighSpeed => {
                self.set_speed(BusSpeed::High);
                Ok(())
            }
        }
    }

    fn transfer(&mut self, tx: Option<&[u8]>, rx: Option<&mut [u8]>) -> Result<usize, Error> {
        match (tx, rx) {
            (Some(tx), Some(rx)) => {
                if tx.len() != rx.len() {
                    return Err(Error::Param);
                }

                rx.copy_from_slice(tx);
                self.exchange(rx)?;

                Ok(rx.len())
            }
            (Some(tx), None) => {
                let mut scratch = [tokens::IDLE; SCRATCH_LEN];

                for chunk in tx.chunks(SCRATCH_LEN) {
                    let buf = &mut scratch[..chunk.len()];
                    buf.copy_from_slice(chunk);
                    self.exchange(buf)?;
                }

                Ok(tx.len())
            }
            (None, Some(rx)) => {
                rx.fill(tokens::IDLE);
                self.exchange(rx)?;

                Ok(rx.len())
            }
            (None, None) => Ok(0),
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }
}
