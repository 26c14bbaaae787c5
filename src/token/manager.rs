//! The token session manager.
//!
//! All state that used to be process global lives in one context object:
//! the PIN, the registered module, the open session and the certificate
//! selected from it. The manager is cheap to clone, clones share that
//! context.
//!
//! Every call that talks to the token runs on the blocking thread pool and
//! is bounded by a timeout, so that a hanging driver cannot take the caller
//! with it.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::Utc;
use log::{Level, debug, info, log_enabled, warn};
use secrecy::SecretString;

use crate::{
    commons::error::TokenError,
    constants::DEFAULT_TOKEN_TIMEOUT,
    token::{
        cert::CertificateEntry,
        module::{CandidateModule, ModuleRegistry, ModuleStatus},
        pin::PinStore,
        provider::ModuleLoader,
        selector,
        session::TokenSession,
    },
};

//------------ TokenSessionManager -------------------------------------------

#[derive(Clone, Debug)]
pub struct TokenSessionManager {
    core: Arc<SessionCore>,
    timeout: Duration,
}

impl TokenSessionManager {
    /// Creates a manager that tries the given PKCS#11 libraries in order.
    pub fn new(candidates: Vec<CandidateModule>) -> Result<Self, TokenError> {
        Self::with_loader(ModuleLoader::Cryptoki, candidates)
    }

    pub(crate) fn with_loader(loader: ModuleLoader, candidates: Vec<CandidateModule>) -> Result<Self, TokenError> {
        if candidates.is_empty() {
            return Err(TokenError::NoLibrariesAvailable);
        }
        Ok(TokenSessionManager {
            core: Arc::new(SessionCore::new(loader, candidates)),
            timeout: DEFAULT_TOKEN_TIMEOUT,
        })
    }

    /// Sets how long a single token operation may take.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the PIN used for the next open. `None` or an empty PIN clears it.
    ///
    /// The PIN is not checked against the token here. A session that is
    /// already open stays open when the PIN changes, but clearing the PIN
    /// makes it unusable.
    pub fn set_pin(&self, pin: Option<String>) {
        self.core.pins.set(pin)
    }

    pub fn clear_pin(&self) {
        self.core.pins.clear()
    }

    pub fn is_pin_set(&self) -> bool {
        self.core.pins.is_set()
    }

    pub fn module_status(&self) -> ModuleStatus {
        self.core.registry.status()
    }

    pub fn candidates(&self) -> Vec<CandidateModule> {
        self.core.state().candidates.clone()
    }

    /// Returns the open session, opening one with the configured candidate
    /// libraries if needed.
    pub async fn open_session(&self) -> Result<Arc<TokenSession>, TokenError> {
        self.run("Opening the token session", |core| core.open_session(None))
            .await
    }

    /// Like `open_session`, but replaces the candidate libraries first.
    pub async fn open_session_with(&self, candidates: Vec<CandidateModule>) -> Result<Arc<TokenSession>, TokenError> {
        self.run("Opening the token session", move |core| core.open_session(Some(candidates)))
            .await
    }

    /// Returns the certificate to sign with.
    ///
    /// The selection is made once per session and then cached.
    pub async fn signing_certificate(&self) -> Result<CertificateEntry, TokenError> {
        self.run("Selecting the signing certificate", |core| core.signing_certificate())
            .await
    }

    /// Returns the alias the store keeps the signing certificate under.
    ///
    /// An alias that cannot be read results in an empty string rather than
    /// an error.
    pub async fn alias(&self) -> Result<String, TokenError> {
        self.run("Reading the certificate alias", |core| core.alias()).await
    }

    /// Logs out of the token. Always safe to call.
    pub async fn logout(&self) {
        if let Err(err) = self
            .run("Logging out of the token", |core| {
                core.logout();
                Ok(())
            })
            .await
        {
            warn!("{}", err);
        }
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, TokenError>
    where
        F: FnOnce(&SessionCore) -> Result<T, TokenError> + Send + 'static,
        T: Send + 'static,
    {
        let core = self.core.clone();
        let task = tokio::task::spawn_blocking(move || f(&core));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(res)) => res,
            Ok(Err(join_err)) => Err(TokenError::other(format!("{} failed: {}", op, join_err))),
            Err(_) => {
                warn!("{} did not finish within {:?}, giving up", op, self.timeout);
                Err(TokenError::Timeout {
                    op: op.to_string(),
                    after: self.timeout,
                })
            }
        }
    }
}

//------------ SessionCore ---------------------------------------------------

/// The blocking implementation behind the manager.
#[derive(Debug)]
struct SessionCore {
    pins: PinStore,
    registry: ModuleRegistry,

    /// Held for the whole of every open so that concurrent callers wait for
    /// the first one and then share its session.
    state: Mutex<SessionState>,
}

#[derive(Debug)]
struct SessionState {
    candidates: Vec<CandidateModule>,
    session: Option<Arc<TokenSession>>,
    selected: Option<CertificateEntry>,
}

impl SessionCore {
    fn new(loader: ModuleLoader, candidates: Vec<CandidateModule>) -> Self {
        SessionCore {
            pins: PinStore::new(),
            registry: ModuleRegistry::new(loader),
            state: Mutex::new(SessionState {
                candidates,
                session: None,
                selected: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap()
    }

    fn open_session(&self, candidates: Option<Vec<CandidateModule>>) -> Result<Arc<TokenSession>, TokenError> {
        let mut state = self.state();
        if let Some(candidates) = candidates {
            if candidates.is_empty() {
                return Err(TokenError::NoLibrariesAvailable);
            }
            state.candidates = candidates;
        }
        self.open_locked(&mut state)
    }

    fn open_locked(&self, state: &mut SessionState) -> Result<Arc<TokenSession>, TokenError> {
        if let Some(session) = state.session.clone() {
            if self.is_usable(&session) {
                return Ok(session);
            }
            debug!("Discarding token session that is no longer usable");
            self.invalidate(state);
        }

        let pin = self.pins.current().ok_or(TokenError::PinNotSet)?;

        let session = match self.registry.confirmed() {
            // Once a module was confirmed, no other one may be registered.
            Some(module) => {
                debug!("Reopening token store with registered module {}", module.candidate());
                match TokenSession::open(module.clone(), &pin) {
                    Ok(session) => {
                        self.registry.confirm(&module);
                        session
                    }
                    Err(TokenError::PinRejected) => return Err(TokenError::PinRejected),
                    Err(err) => {
                        debug!("Failed to reopen token store with {}: {}", module.candidate(), err);
                        return Err(TokenError::NoUsableModule);
                    }
                }
            }
            None => self.open_with_candidates(&state.candidates, &pin)?,
        };

        info!("Opened {}", session.info());
        let session = Arc::new(session);
        state.session = Some(session.clone());
        state.selected = None;
        Ok(session)
    }

    fn open_with_candidates(
        &self,
        candidates: &[CandidateModule],
        pin: &SecretString,
    ) -> Result<TokenSession, TokenError> {
        let show_info = log_enabled!(Level::Debug);

        for candidate in candidates {
            match self.try_candidate(candidate, pin, show_info) {
                Ok(session) => return Ok(session),
                Err(TokenError::PinRejected) => {
                    // Trying the next library would just burn another PIN
                    // attempt.
                    return Err(TokenError::PinRejected);
                }
                Err(err) => debug!(
                    "Failed to open token store with library {}: {}. Will try with the next one if available.",
                    candidate, err
                ),
            }
        }

        Err(TokenError::NoUsableModule)
    }

    fn try_candidate(
        &self,
        candidate: &CandidateModule,
        pin: &SecretString,
        show_info: bool,
    ) -> Result<TokenSession, TokenError> {
        let module = self.registry.register_if_absent(candidate, show_info)?;
        match TokenSession::open(module.clone(), pin) {
            Ok(session) => {
                self.registry.confirm(&module);
                Ok(session)
            }
            Err(err) => {
                self.registry.abandon_trial();
                Err(err)
            }
        }
    }

    fn is_usable(&self, session: &TokenSession) -> bool {
        !session.is_logged_out() && self.registry.is_active(session.module()) && self.pins.is_set()
    }

    fn signing_certificate(&self) -> Result<CertificateEntry, TokenError> {
        let mut state = self.state();
        self.signing_certificate_locked(&mut state)
    }

    fn signing_certificate_locked(&self, state: &mut SessionState) -> Result<CertificateEntry, TokenError> {
        let session = self.open_locked(state)?;
        if let Some(selected) = &state.selected {
            return Ok(selected.clone());
        }

        let entries = session.certificates().map_err(|err| self.fail_session(state, err))?;
        debug!("Token holds {} certificates", entries.len());

        let selected = selector::select(&entries, Utc::now())
            .cloned()
            .ok_or(TokenError::NoValidCertificate)?;
        debug!("Selected signing certificate {}", selected);

        state.selected = Some(selected.clone());
        Ok(selected)
    }

    fn alias(&self) -> Result<String, TokenError> {
        let mut state = self.state();
        let selected = self.signing_certificate_locked(&mut state)?;
        let session = self.open_locked(&mut state)?;

        match session.certificate_alias(&selected) {
            Ok(Some(alias)) => Ok(alias),
            Ok(None) => {
                info!("Can't read alias for certificate {}: not found in store", selected);
                Ok(String::new())
            }
            Err(err) if err.is_removal() => Err(self.fail_session(&mut state, err)),
            Err(err) => {
                info!("Can't read alias for certificate {}: {}", selected, err);
                Ok(String::new())
            }
        }
    }

    fn logout(&self) {
        let mut state = self.state();
        self.invalidate(&mut state);
    }

    /// Turns a failure on an open session into the error for the caller.
    ///
    /// A removed token invalidates the session and logs out, so that the
    /// next call opens a fresh one.
    fn fail_session(&self, state: &mut SessionState, err: TokenError) -> TokenError {
        if err.is_removal() {
            warn!("Lost the token session, logging out: {}", err);
            self.invalidate(state);
            TokenError::TokenRemoved
        } else {
            err
        }
    }

    fn invalidate(&self, state: &mut SessionState) {
        state.selected = None;
        if let Some(session) = state.session.take() {
            session.logout();
        }
        if let Some(module) = self.registry.logout() {
            debug!("Logged out of PKCS#11 module {}", module.candidate());
        }
    }
}

//------------ Tests ---------------------------------------------------------
