use crate::{
    config::SdSpiConfig,
    consts::{tokens, POWER_UP_DUMMY_BYTES},
    Error,
};

use core::marker::PhantomData;

/// Hardware control operation requested from a [`SpiTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum ControlOp {
    /// Initialize the bus hardware.
    InitHardware,
    /// Release the bus hardware.
    DeinitHardware,
    /// Ask the card-detect hardware whether the card is gone.
    ///
    /// Reply with `Ok(())` when the card is detached, `Err(Error::Failed)` when it is present
    /// and `Err(Error::Unsupported)` when there is no card-detect signal.
    QueryDetached,
    /// Assert chip select.
    Select,
    /// Release chip select.
    Deselect,
    /// Take exclusive ownership of a shared bus.
    TakeBus,
    /// Give the shared bus back.
    ReleaseBus,
    /// Clock the bus for identification, 100-400 kHz.
    SetLowSpeed,
    /// Clock the bus for data transfer.
    SetHighSpeed,
}

/// Byte transport to one card.
///
/// Every call blocks until done. Implementations sharing one physical bus between several
/// cards must make [`ControlOp::TakeBus`] exclusive until the matching
/// [`ControlOp::ReleaseBus`].
pub trait SpiTransport {
    /// Performs a hardware control operation.
    fn control(&mut self, op: ControlOp) -> Result<(), Error>;

    /// Exchanges bytes with the card and returns the count of bytes moved.
    ///
    /// `tx` only: send and discard what is received. `rx` only: clock out `0xFF` and store
    /// what is received. Both: full duplex, the slices have the same length.
    fn transfer(&mut self, tx: Option<&[u8]>, rx: Option<&mut [u8]>) -> Result<usize, Error>;

    /// Waits at least `us` microseconds.
    fn delay_us(&mut self, us: u32);
}

impl<T: SpiTransport + ?Sized> SpiTransport for &mut T {
    fn control(&mut self, op: ControlOp) -> Result<(), Error> {
        (**self).control(op)
    }

    fn transfer(&mut self, tx: Option<&[u8]>, rx: Option<&mut [u8]>) -> Result<usize, Error> {
        (**self).transfer(tx, rx)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

/// Protocol side of a transport: byte IO with short-transfer checks and select tracking.
///
/// The command engine, the identification state machine and the block sequencer are
/// implemented on top of it in their own modules.
pub(crate) struct Link<T, C> {
    transport: T,
    selected: bool,
    transferring: bool,
    config: PhantomData<C>,
}

impl<T: SpiTransport, C: SdSpiConfig> Link<T, C> {
    pub fn new(transport: T) -> Self {
        Link {
            transport,
            selected: false,
            transferring: false,
            config: PhantomData::<C>,
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Performs a control operation.
    pub fn control(&mut self, op: ControlOp) -> Result<(), Error> {
        self.transport.control(op).map_err(|err| {
            warn!("Transport control {:?} failed: {:?}", op, err);
            err
        })
    }

    /// Takes the bus and asserts chip select.
    pub fn select(&mut self) -> Result<(), Error> {
        if self.transport.control(ControlOp::TakeBus).is_err() {
            warn!("SD bus is busy");
            return Err(Error::Timeout);
        }

        if let Err(err) = self.control(ControlOp::Select) {
            let _ = self.transport.control(ControlOp::ReleaseBus);
            return Err(err);
        }

        self.selected = true;

        Ok(())
    }

    /// Releases chip select and the bus.
    pub fn deselect(&mut self) -> Result<(), Error> {
        let deselected = self.control(ControlOp::Deselect);
        let released = self.control(ControlOp::ReleaseBus);
        self.selected = false;

        deselected.and(released)
    }

    /// CS scope.
    ///
    /// Chip select is released whatever `f` returns; an error of `f` wins over a deselect
    /// error.
    pub fn cs_scope<R, F>(&mut self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Self) -> Result<R, Error>,
    {
        self.select()?;
        let result = f(self);
        let deselected = self.deselect();

        result.and_then(|value| deselected.map(|_| value))
    }

    /// CS scope followed by one dummy byte, giving the card clocks to settle its state.
    pub fn settled_scope<R, F>(&mut self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Self) -> Result<R, Error>,
    {
        let result = self.cs_scope(f);
        let settled = self.send_dummy(1);

        result.and_then(|value| settled.map(|_| value))
    }

    /// Power-up clocking: at least 74 clocks with the card deselected.
    pub fn power_on(&mut self) -> Result<(), Error> {
        self.deselect()?;
        self.send_dummy(POWER_UP_DUMMY_BYTES)
    }

    /// One transport call; anything short of the full length is an IO error.
    fn transfer(&mut self, tx: Option<&[u8]>, rx: Option<&mut [u8]>) -> Result<(), Error> {
        let expected = match (&tx, &rx) {
            (Some(tx), _) => tx.len(),
            (None, Some(rx)) => rx.len(),
            (None, None) => return Ok(()),
        };

        debug_assert!(!self.transferring);
        self.transferring = true;
        let moved = self.transport.transfer(tx, rx);
        self.transferring = false;

        match moved {
            Ok(count) if count == expected => Ok(()),
            Ok(count) => {
                warn!("Short SPI transfer: {} of {} bytes", count, expected);
                Err(Error::Io)
            }
            Err(err) => {
                warn!("SPI transfer failed: {:?}", err);
                Err(Error::Io)
            }
        }
    }

    /// Send a slice to the SD card.
    pub fn send_slice(&mut self, data: &[u8]) -> Result<(), Error> {
        self.transfer(Some(data), None)
    }

    /// Send a byte to the SD card.
    pub fn send(&mut self, data: u8) -> Result<(), Error> {
        self.send_slice(&[data])
    }

    /// Receive a slice from the SD card by clocking out `0xFF` bytes.
    pub fn receive_slice(&mut self, data: &mut [u8]) -> Result<(), Error> {
        self.transfer(None, Some(data))
    }

    /// Receive a byte from the SD card.
    pub fn receive(&mut self) -> Result<u8, Error> {
        let mut byte = [tokens::IDLE];
        self.receive_slice(&mut byte)?;

        Ok(byte[0])
    }

    /// Send idle bytes.
    pub fn send_dummy(&mut self, count: usize) -> Result<(), Error> {
        for _ in 0..count {
            self.send(tokens::IDLE)?;
        }

        Ok(())
    }

    pub fn delay_us(&mut self, us: u32) {
        self.transport.delay_us(us);
    }

    /// Wait for token.
    ///
    /// Receives up to `attempts` bytes, pausing `pace_us` after each rejected one, and
    /// returns the first byte accepted by `token_validator`, or `None` when out of attempts.
    pub fn wait_for_token<F: Fn(u8) -> bool>(
        &mut self,
        attempts: usize,
        pace_us: u32,
        token_validator: F,
    ) -> Result<Option<u8>, Error> {
        for _ in 0..attempts {
            let token = self.receive()?;

            if token_validator(token) {
                return Ok(Some(token));
            }

            if pace_us > 0 {
                self.delay_us(pace_us);
            }
        }

        Ok(None)
    }

    /// Wait until the card releases the bus from the busy (`0x00`) level.
    pub fn wait_not_busy(&mut self, attempts: usize, pace_us: u32) -> Result<(), Error> {
        match self.wait_for_token(attempts, pace_us, |token| token != tokens::BUSY)? {
            Some(_) => Ok(()),
            None => Err(Error::Timeout),
        }
    }
}
