use std::sync::RwLock;

use secrecy::{ExposeSecret, SecretString};

//------------ PinStore ------------------------------------------------------

/// Holds the one PIN used to unlock the token.
///
/// Every open attempt of the owning context reads the PIN from here. Setting
/// a new value replaces the old one, setting nothing or an empty string
/// clears it.
#[derive(Debug, Default)]
pub struct PinStore {
    pin: RwLock<Option<SecretString>>,
}

impl PinStore {
    pub fn new() -> Self {
        PinStore::default()
    }

    pub fn set(&self, pin: Option<String>) {
        let pin = pin.filter(|pin| !pin.is_empty()).map(SecretString::new);
        *self.pin.write().unwrap() = pin;
    }

    pub fn clear(&self) {
        self.set(None)
    }

    pub fn is_set(&self) -> bool {
        self.pin.read().unwrap().is_some()
    }

    /// Returns a copy of the current PIN, if any.
    pub fn current(&self) -> Option<SecretString> {
        self.pin
            .read()
            .unwrap()
            .as_ref()
            .map(|pin| SecretString::new(pin.expose_secret().clone()))
    }
}

//------------ Tests ---------------------------------------------------------
