//! Dispatch to the available token backends.
//!
//! There is one real backend, talking PKCS#11 through `cryptoki`. Tests add
//! a scripted in-memory one. Each backend is a variant here rather than an
//! implementation of an open trait, so the set of backends stays closed.

use secrecy::SecretString;

use crate::{
    commons::error::TokenError,
    token::{
        cert::CertificateEntry,
        module::ModuleConfig,
        pkcs11::{CryptokiModule, CryptokiStore},
    },
};

#[cfg(test)]
use {
    crate::token::mock::{MockBay, MockModule, MockStore},
    std::sync::Arc,
};

//------------ ModuleLoader --------------------------------------------------

/// Knows how to turn a module configuration into a loaded module.
#[derive(Clone, Debug)]
pub enum ModuleLoader {
    Cryptoki,

    #[cfg(test)]
    Mock(Arc<MockBay>),
}

impl ModuleLoader {
    pub fn load(&self, config: &ModuleConfig) -> Result<LoadedModule, TokenError> {
        match self {
            ModuleLoader::Cryptoki => CryptokiModule::load(config).map(LoadedModule::Cryptoki),
            #[cfg(test)]
            ModuleLoader::Mock(bay) => MockModule::load(bay.clone(), config).map(LoadedModule::Mock),
        }
    }
}

//------------ LoadedModule --------------------------------------------------

/// A native module that was loaded and initialized.
#[derive(Debug)]
pub enum LoadedModule {
    Cryptoki(CryptokiModule),

    #[cfg(test)]
    Mock(MockModule),
}

impl LoadedModule {
    /// Opens the certificate store of the token, authenticating with `pin`.
    pub fn open_store(&self, pin: &SecretString) -> Result<StoreHandle, TokenError> {
        match self {
            LoadedModule::Cryptoki(module) => module.open_store(pin).map(StoreHandle::Cryptoki),
            #[cfg(test)]
            LoadedModule::Mock(module) => module.open_store(pin).map(StoreHandle::Mock),
        }
    }
}

//------------ StoreHandle ---------------------------------------------------

/// An open, authenticated connection to the token's store.
#[derive(Debug)]
pub enum StoreHandle {
    Cryptoki(CryptokiStore),

    #[cfg(test)]
    Mock(MockStore),
}

impl StoreHandle {
    /// Enumerates the certificate entries of the store in store order.
    pub fn certificates(&self) -> Result<Vec<CertificateEntry>, TokenError> {
        match self {
            StoreHandle::Cryptoki(store) => store.certificates(),
            #[cfg(test)]
            StoreHandle::Mock(store) => store.certificates(),
        }
    }

    /// Looks up the alias the store keeps `entry` under.
    ///
    /// Returns `Ok(None)` if the store does not know the certificate.
    pub fn certificate_alias(&self, entry: &CertificateEntry) -> Result<Option<String>, TokenError> {
        match self {
            StoreHandle::Cryptoki(store) => store.certificate_alias(entry),
            #[cfg(test)]
            StoreHandle::Mock(store) => store.certificate_alias(entry),
        }
    }

    /// Drops the token side authentication state.
    pub fn logout(&self) -> Result<(), TokenError> {
        match self {
            StoreHandle::Cryptoki(store) => store.logout(),
            #[cfg(test)]
            StoreHandle::Mock(store) => store.logout(),
        }
    }

    /// Human readable identification of the token and library.
    pub fn info(&self) -> &str {
        match self {
            StoreHandle::Cryptoki(store) => store.info(),
            #[cfg(test)]
            StoreHandle::Mock(store) => store.info(),
        }
    }
}
