//! A scripted in-memory token for tests.
//!
//! A `MockBay` plays the part of the card reader together with the installed
//! vendor drivers: tests decide which library paths load at all, which of
//! them actually understand the inserted token, which PIN the token expects,
//! which certificates it holds and when it gets pulled out.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use secrecy::{ExposeSecret, SecretString};

use crate::{
    commons::error::TokenError,
    token::{cert::CertificateEntry, module::ModuleConfig},
};

pub const MOCK_PIN: &str = "1234";

//------------ MockBay -------------------------------------------------------

#[derive(Debug)]
pub struct MockBay {
    /// Libraries that can be loaded and talk to the inserted token.
    drivers: RwLock<HashSet<PathBuf>>,

    /// Libraries that load but do not recognize the inserted token.
    foreign_drivers: RwLock<HashSet<PathBuf>>,

    present: AtomicBool,

    /// Bumped on every insertion, stores opened before are stale after it.
    insertion: AtomicU64,

    pin: RwLock<String>,
    entries: RwLock<Vec<CertificateEntry>>,
    unresolvable_aliases: RwLock<HashSet<String>>,
    open_delay: RwLock<Option<Duration>>,

    loads: AtomicUsize,
    opens: AtomicUsize,
    logouts: AtomicUsize,
    live_modules: AtomicUsize,
    last_show_info: AtomicBool,
    last_config: RwLock<String>,
}

impl MockBay {
    /// A bay with an inserted token expecting `MOCK_PIN` and holding no
    /// certificates.
    pub fn with_token() -> Arc<Self> {
        Arc::new(MockBay {
            drivers: RwLock::new(HashSet::new()),
            foreign_drivers: RwLock::new(HashSet::new()),
            present: AtomicBool::new(true),
            insertion: AtomicU64::new(0),
            pin: RwLock::new(MOCK_PIN.to_string()),
            entries: RwLock::new(Vec::new()),
            unresolvable_aliases: RwLock::new(HashSet::new()),
            open_delay: RwLock::new(None),
            loads: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            live_modules: AtomicUsize::new(0),
            last_show_info: AtomicBool::new(false),
            last_config: RwLock::new(String::new()),
        })
    }

    pub fn add_loadable(&self, path: impl Into<PathBuf>) {
        self.drivers.write().unwrap().insert(path.into());
    }

    pub fn add_foreign(&self, path: impl Into<PathBuf>) {
        self.foreign_drivers.write().unwrap().insert(path.into());
    }

    pub fn set_entries(&self, entries: Vec<CertificateEntry>) {
        *self.entries.write().unwrap() = entries;
    }

    pub fn set_alias_unresolvable(&self, alias: &str) {
        self.unresolvable_aliases.write().unwrap().insert(alias.to_string());
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.write().unwrap() = Some(delay);
    }

    pub fn remove_token(&self) {
        self.present.store(false, Ordering::SeqCst);
    }

    pub fn insert_token(&self) {
        self.insertion.fetch_add(1, Ordering::SeqCst);
        self.present.store(true, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    /// Number of loaded modules that were not released yet.
    pub fn live_modules(&self) -> usize {
        self.live_modules.load(Ordering::SeqCst)
    }

    pub fn last_show_info(&self) -> bool {
        self.last_show_info.load(Ordering::SeqCst)
    }

    /// The configuration block of the most recent load, as rendered.
    pub fn last_config(&self) -> String {
        self.last_config.read().unwrap().clone()
    }

    fn is_driver(&self, path: &Path) -> bool {
        self.drivers.read().unwrap().contains(path)
    }

    fn is_foreign(&self, path: &Path) -> bool {
        self.foreign_drivers.read().unwrap().contains(path)
    }

    fn check_present(&self, insertion: u64) -> Result<(), TokenError> {
        if self.present.load(Ordering::SeqCst) && self.insertion.load(Ordering::SeqCst) == insertion {
            Ok(())
        } else {
            Err(TokenError::TokenRemoved)
        }
    }
}

//------------ MockModule ----------------------------------------------------

#[derive(Debug)]
pub struct MockModule {
    bay: Arc<MockBay>,
    library: PathBuf,
}

impl MockModule {
    pub fn load(bay: Arc<MockBay>, config: &ModuleConfig) -> Result<Self, TokenError> {
        let library = config.library().to_path_buf();
        if !bay.is_driver(&library) && !bay.is_foreign(&library) {
            return Err(TokenError::Pkcs11(format!("cannot load '{}'", library.display())));
        }

        bay.loads.fetch_add(1, Ordering::SeqCst);
        bay.live_modules.fetch_add(1, Ordering::SeqCst);
        bay.last_show_info.store(config.show_info(), Ordering::SeqCst);
        *bay.last_config.write().unwrap() = config.to_string();
        Ok(MockModule { bay, library })
    }

    pub fn open_store(&self, pin: &SecretString) -> Result<MockStore, TokenError> {
        let bay = &self.bay;
        bay.opens.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = *bay.open_delay.read().unwrap() {
            std::thread::sleep(delay);
        }

        if !bay.is_driver(&self.library) {
            return Err(TokenError::Pkcs11("token not recognized".to_string()));
        }

        if !bay.present.load(Ordering::SeqCst) {
            return Err(TokenError::TokenRemoved);
        }

        if pin.expose_secret() != &*bay.pin.read().unwrap() {
            return Err(TokenError::PinRejected);
        }

        Ok(MockStore {
            bay: bay.clone(),
            insertion: bay.insertion.load(Ordering::SeqCst),
            info: format!("Mock token [library: {}]", self.library.display()),
        })
    }
}

impl Drop for MockModule {
    fn drop(&mut self) {
        self.bay.live_modules.fetch_sub(1, Ordering::SeqCst);
    }
}

//------------ MockStore -----------------------------------------------------

#[derive(Debug)]
pub struct MockStore {
    bay: Arc<MockBay>,
    insertion: u64,
    info: String,
}

impl MockStore {
    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn certificates(&self) -> Result<Vec<CertificateEntry>, TokenError> {
        self.bay.check_present(self.insertion)?;
        Ok(self.bay.entries.read().unwrap().clone())
    }

    pub fn certificate_alias(&self, entry: &CertificateEntry) -> Result<Option<String>, TokenError> {
        self.bay.check_present(self.insertion)?;
        if self.bay.unresolvable_aliases.read().unwrap().contains(&entry.alias) {
            return Err(TokenError::AliasLookupFailed(format!("no key for '{}'", entry.alias)));
        }

        let known = self.bay.entries.read().unwrap().iter().any(|known| known == entry);
        Ok(known.then(|| entry.alias.clone()))
    }

    pub fn logout(&self) -> Result<(), TokenError> {
        self.bay.logouts.fetch_add(1, Ordering::SeqCst);
        self.bay.check_present(self.insertion)
    }
}
