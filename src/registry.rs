use crate::{config::SdSpiConfig, transport::SpiTransport, CardSession, Error};

/// Fixed-capacity lookup of card sessions by name.
///
/// The application owns both the registry and the sessions; the registry only borrows them.
pub struct Registry<'r, T: SpiTransport, C: SdSpiConfig, U, const N: usize> {
    slots: [Option<&'r mut CardSession<T, C, U>>; N],
}

impl<'r, T: SpiTransport, C: SdSpiConfig, U, const N: usize> Default for Registry<'r, T, C, U, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'r, T: SpiTransport, C: SdSpiConfig, U, const N: usize> Registry<'r, T, C, U, N> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Adds a session, names must be unique.
    pub fn register(&mut self, session: &'r mut CardSession<T, C, U>) -> Result<(), Error> {
        if self.find(session.name()).is_some() {
            warn!("SD {} is already registered", session.name());
            return Err(Error::Param);
        }

        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(session);
                Ok(())
            }
            None => {
                warn!("SD registry is full, capacity: {}", N);
                Err(Error::Failed)
            }
        }
    }

    /// Finds a session by name.
    pub fn find(&self, name: &str) -> Option<&CardSession<T, C, U>> {
        self.iter().find(|session| session.name() == name)
    }

    /// Finds a session by name, mutably.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut CardSession<T, C, U>> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|session| session.name() == name)
            .map(|session| &mut **session)
    }

    /// Iterates the sessions in registration order.
    pub fn iter(&self) -> Iter<'_, 'r, T, C, U> {
        Iter {
            slots: self.slots.iter(),
        }
    }

    /// Count of registered sessions.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` when no session is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Iterator over the registered sessions.
pub struct Iter<'a, 'r, T: SpiTransport, C: SdSpiConfig, U> {
    slots: core::slice::Iter<'a, Option<&'r mut CardSession<T, C, U>>>,
}

impl<'a, 'r, T: SpiTransport, C: SdSpiConfig, U> Iterator for Iter<'a, 'r, T, C, U> {
    type Item = &'a CardSession<T, C, U>;

    fn next(&mut self) -> Option<Self::Item> {
        self.slots.by_ref().flatten().next().map(|session| &**session)
    }
}
