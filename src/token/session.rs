use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use secrecy::SecretString;

use crate::{
    commons::error::TokenError,
    token::{cert::CertificateEntry, module::RegisteredModule, provider::StoreHandle},
};

//------------ TokenSession --------------------------------------------------

/// An open, logged in connection to the certificate store of the token.
///
/// A session only stays usable while the token is present. Once logged out
/// it refuses every further operation, callers have to go back to the
/// manager for a fresh one.
#[derive(Debug)]
pub struct TokenSession {
    module: RegisteredModule,
    store: StoreHandle,
    logged_out: AtomicBool,
}

impl TokenSession {
    pub(super) fn open(module: RegisteredModule, pin: &SecretString) -> Result<Self, TokenError> {
        let store = module.module().open_store(pin)?;
        Ok(TokenSession {
            module,
            store,
            logged_out: AtomicBool::new(false),
        })
    }

    pub fn module(&self) -> &RegisteredModule {
        &self.module
    }

    /// Identification of the token and library this session talks to.
    pub fn info(&self) -> &str {
        self.store.info()
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    pub fn certificates(&self) -> Result<Vec<CertificateEntry>, TokenError> {
        self.check_open()?;
        self.store.certificates()
    }

    pub fn certificate_alias(&self, entry: &CertificateEntry) -> Result<Option<String>, TokenError> {
        self.check_open()?;
        self.store.certificate_alias(entry)
    }

    /// Logs the session out. Safe to call more than once, failures are only
    /// logged because a removed token is logged out anyway.
    pub(super) fn logout(&self) {
        if self.logged_out.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.store.logout() {
            debug!("Ignoring failed logout from {}: {}", self.info(), err);
        }
    }

    fn check_open(&self) -> Result<(), TokenError> {
        if self.is_logged_out() {
            Err(TokenError::SessionClosed)
        } else {
            Ok(())
        }
    }
}
