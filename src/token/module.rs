//! Registration of the native PKCS#11 module.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use log::{debug, info};

use crate::{
    commons::error::TokenError,
    constants::MODULE_PROVIDER_NAME,
    token::provider::{LoadedModule, ModuleLoader},
};

//------------ CandidateModule -----------------------------------------------

/// A native PKCS#11 library that may be able to talk to the token.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CandidateModule {
    path: PathBuf,
    name: String,
}

impl CandidateModule {
    /// Creates a candidate named after the library file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        CandidateModule { path, name }
    }

    pub fn with_name(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        CandidateModule {
            path: path.into(),
            name: name.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for CandidateModule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

//------------ ModuleConfig --------------------------------------------------

/// The configuration block handed to the module loader.
///
/// Rendered as `name`, `showInfo` and `library` lines, in that order. Both
/// the key names and their order are what the loader expects, do not change
/// them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleConfig {
    name: String,
    show_info: bool,
    library: PathBuf,
}

impl ModuleConfig {
    pub fn new(candidate: &CandidateModule, show_info: bool) -> Self {
        ModuleConfig {
            name: MODULE_PROVIDER_NAME.to_string(),
            show_info,
            library: candidate.path().to_path_buf(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn show_info(&self) -> bool {
        self.show_info
    }

    pub fn library(&self) -> &Path {
        &self.library
    }
}

impl fmt::Display for ModuleConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "name={}", self.name)?;
        writeln!(f, "showInfo={}", self.show_info)?;
        writeln!(f, "library={}", self.library.display())
    }
}

//------------ RegisteredModule ----------------------------------------------

/// The module registered with the cryptographic subsystem.
#[derive(Clone, Debug)]
pub struct RegisteredModule {
    candidate: CandidateModule,
    module: Arc<LoadedModule>,
}

impl RegisteredModule {
    pub fn candidate(&self) -> &CandidateModule {
        &self.candidate
    }

    pub(super) fn module(&self) -> &LoadedModule {
        &self.module
    }

    /// Whether both handles refer to the same registration.
    pub fn same_as(&self, other: &RegisteredModule) -> bool {
        Arc::ptr_eq(&self.module, &other.module)
    }
}

//------------ ModuleStatus --------------------------------------------------

/// Where the registry is in its life cycle.
///
/// A freshly loaded module stays on `Trial` until a session was opened with
/// it. A failed trial is released again so that the next candidate can be
/// loaded. Once confirmed, the module is never replaced: it only moves
/// between `Registered` and `LoggedOut`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModuleStatus {
    Unregistered,
    Trial,
    Registered,
    LoggedOut,
}

#[derive(Debug)]
enum RegistryState {
    Unregistered,
    Trial(RegisteredModule),
    Registered(RegisteredModule),
    LoggedOut(RegisteredModule),
}

impl RegistryState {
    fn module(&self) -> Option<&RegisteredModule> {
        match self {
            RegistryState::Unregistered => None,
            RegistryState::Trial(module) | RegistryState::Registered(module) | RegistryState::LoggedOut(module) => {
                Some(module)
            }
        }
    }

    fn status(&self) -> ModuleStatus {
        match self {
            RegistryState::Unregistered => ModuleStatus::Unregistered,
            RegistryState::Trial(_) => ModuleStatus::Trial,
            RegistryState::Registered(_) => ModuleStatus::Registered,
            RegistryState::LoggedOut(_) => ModuleStatus::LoggedOut,
        }
    }
}

//------------ ModuleRegistry ------------------------------------------------

/// Makes sure that at most one module gets registered.
///
/// Registering the same native provider twice is not allowed by the
/// underlying libraries, so every registration goes through here.
#[derive(Debug)]
pub struct ModuleRegistry {
    loader: ModuleLoader,
    state: Mutex<RegistryState>,
}

impl ModuleRegistry {
    pub fn new(loader: ModuleLoader) -> Self {
        ModuleRegistry {
            loader,
            state: Mutex::new(RegistryState::Unregistered),
        }
    }

    /// Returns the registered module, loading `candidate` if there is none.
    ///
    /// If a module is registered already this is a no-op returning that
    /// module, whatever candidate is passed in. A load failure leaves the
    /// registry unregistered.
    pub fn register_if_absent(&self, candidate: &CandidateModule, debug: bool) -> Result<RegisteredModule, TokenError> {
        let mut state = self.state.lock().unwrap();

        if let Some(module) = state.module() {
            debug!(
                "PKCS#11 module {} already registered, not registering {}",
                module.candidate(),
                candidate
            );
            return Ok(module.clone());
        }

        let config = ModuleConfig::new(candidate, debug);
        debug!("Registering PKCS#11 module with configuration:\n{}", config);

        let loaded = self
            .loader
            .load(&config)
            .map_err(|err| TokenError::module_load_failed(candidate, err))?;

        let module = RegisteredModule {
            candidate: candidate.clone(),
            module: Arc::new(loaded),
        };
        *state = RegistryState::Trial(module.clone());
        Ok(module)
    }

    /// Marks the module as proven usable after a session was opened with it.
    pub fn confirm(&self, module: &RegisteredModule) {
        let mut state = self.state.lock().unwrap();
        let confirmed = match &*state {
            RegistryState::Trial(current) | RegistryState::LoggedOut(current) if current.same_as(module) => {
                Some(current.clone())
            }
            _ => None,
        };
        if let Some(current) = confirmed {
            if matches!(*state, RegistryState::Trial(_)) {
                info!("Registered PKCS#11 module {}", current.candidate());
            }
            *state = RegistryState::Registered(current);
        }
    }

    /// Releases a module that never got a session open.
    ///
    /// Does nothing once a module was confirmed.
    pub fn abandon_trial(&self) {
        let mut state = self.state.lock().unwrap();
        if let RegistryState::Trial(module) = &*state {
            debug!("Releasing unusable PKCS#11 module {}", module.candidate());
            *state = RegistryState::Unregistered;
        }
    }

    /// Moves a registered module to the logged out state.
    ///
    /// Returns the module if one was registered. Never fails: without a
    /// module there is nothing to log out of.
    pub fn logout(&self) -> Option<RegisteredModule> {
        let mut state = self.state.lock().unwrap();
        match &*state {
            RegistryState::Registered(module) => {
                let module = module.clone();
                *state = RegistryState::LoggedOut(module.clone());
                Some(module)
            }
            RegistryState::LoggedOut(module) => Some(module.clone()),
            RegistryState::Trial(_) | RegistryState::Unregistered => None,
        }
    }

    pub fn status(&self) -> ModuleStatus {
        self.state.lock().unwrap().status()
    }

    /// Whether `module` is the registered module and not logged out.
    pub fn is_active(&self, module: &RegisteredModule) -> bool {
        match &*self.state.lock().unwrap() {
            RegistryState::Registered(current) => current.same_as(module),
            _ => false,
        }
    }

    /// The module confirmed earlier, if any, whether logged out or not.
    pub fn confirmed(&self) -> Option<RegisteredModule> {
        match &*self.state.lock().unwrap() {
            RegistryState::Registered(module) | RegistryState::LoggedOut(module) => Some(module.clone()),
            _ => None,
        }
    }
}

//------------ Tests ---------------------------------------------------------
