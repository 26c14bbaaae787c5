//! The PKCS#11 backend, using the `cryptoki` crate.

use std::{fmt, sync::Mutex};

use cryptoki::{
    context::{CInitializeArgs, Pkcs11},
    error::{Error as Pkcs11Error, RvError},
    object::{Attribute, AttributeType, ObjectClass, ObjectHandle},
    session::{Session, UserType},
    types::AuthPin,
};
use log::{debug, info, trace};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    commons::error::TokenError,
    token::{
        cert::{self, CertificateEntry, CertificateObject},
        module::ModuleConfig,
    },
};

//------------ CryptokiModule ------------------------------------------------

/// A loaded and initialized PKCS#11 library.
///
/// The library is finalized when the last reference to it, including those
/// held by open sessions, is dropped.
pub struct CryptokiModule {
    lib_file_name: String,
    ctx: Pkcs11,
}

impl fmt::Debug for CryptokiModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptokiModule")
            .field("lib_file_name", &self.lib_file_name)
            .finish()
    }
}

impl CryptokiModule {
    pub fn load(config: &ModuleConfig) -> Result<Self, TokenError> {
        let lib_path = config.library();
        let lib_file_name = lib_path
            .file_name()
            .ok_or_else(|| {
                TokenError::Pkcs11(format!(
                    "PKCS#11 library path '{}' does not point to a file",
                    lib_path.display()
                ))
            })?
            .to_string_lossy()
            .to_string();

        let ctx = Pkcs11::new(lib_path).map_err(|err| {
            TokenError::Pkcs11(format!("Failed to load PKCS#11 library '{}': {}", lib_path.display(), err))
        })?;

        if let Err(err) = ctx.initialize(CInitializeArgs::OsThreads) {
            // Someone else in this process initialized the library already,
            // which is fine by us.
            if !matches!(err, Pkcs11Error::Pkcs11(RvError::CryptokiAlreadyInitialized, _)) {
                return Err(TokenError::Pkcs11(format!(
                    "Failed to initialize PKCS#11 library '{}': {}",
                    lib_file_name, err
                )));
            }
        }

        match ctx.get_library_info() {
            Ok(lib_info) if config.show_info() => info!("[{}] C_GetInfo(): {:?}", config.name(), lib_info),
            Ok(lib_info) => trace!("[{}] C_GetInfo(): {:?}", config.name(), lib_info),
            Err(err) => debug!(
                "[{}] Unable to read PKCS#11 info for library '{}': {}",
                config.name(),
                lib_file_name,
                err
            ),
        }

        Ok(CryptokiModule { lib_file_name, ctx })
    }

    /// Opens a read-only session on the first slot with a token in it and
    /// logs in as user.
    pub fn open_store(&self, pin: &SecretString) -> Result<CryptokiStore, TokenError> {
        let lib_name = &self.lib_file_name;

        let slot = self
            .ctx
            .get_slots_with_token()?
            .into_iter()
            .next()
            .ok_or_else(|| TokenError::Pkcs11(format!("No token present in any slot of library '{}'", lib_name)))?;

        let token_info = self.ctx.get_token_info(slot)?;
        trace!("C_GetTokenInfo(): {:?}", token_info);

        let session = self.ctx.open_ro_session(slot)?;

        let auth_pin = AuthPin::new(pin.expose_secret().clone().into());
        match session.login(UserType::User, Some(&auth_pin)) {
            Ok(()) => trace!("Logged in to PKCS#11 session for library '{}' slot {}", lib_name, slot.id()),
            Err(Pkcs11Error::Pkcs11(RvError::UserAlreadyLoggedIn, _)) => {
                trace!("Already logged in to library '{}' slot {}", lib_name, slot.id())
            }
            Err(err) => return Err(err.into()),
        }

        // Note: cryptoki trims the padding of the Cryptoki string fields.
        let info = format!(
            "PKCS#11 token [label: {}, model: {}, vendor: {}, slot: {}, library: {}]",
            token_info.label(),
            token_info.model(),
            token_info.manufacturer_id(),
            slot.id(),
            lib_name
        );

        Ok(CryptokiStore {
            session: Mutex::new(session),
            info,
        })
    }
}

//------------ CryptokiStore -------------------------------------------------

/// A logged in PKCS#11 session.
///
/// Closing the session happens on drop. When the last session of the
/// application is closed the token returns to the public state, so there is
/// no separate logout on drop.
pub struct CryptokiStore {
    session: Mutex<Session>,
    info: String,
}

impl fmt::Debug for CryptokiStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptokiStore").field("info", &self.info).finish()
    }
}

impl CryptokiStore {
    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn certificates(&self) -> Result<Vec<CertificateEntry>, TokenError> {
        let session = self.session.lock().unwrap();

        let handles = session.find_objects(&[Attribute::Class(ObjectClass::CERTIFICATE)])?;
        trace!("Found {} certificate objects on {}", handles.len(), self.info);

        let mut objects = Vec::with_capacity(handles.len());
        for handle in handles {
            objects.push(Self::read_object(&session, handle)?);
        }

        Ok(cert::entries_from_objects(&objects))
    }

    pub fn certificate_alias(&self, entry: &CertificateEntry) -> Result<Option<String>, TokenError> {
        if entry.der.is_empty() {
            return Err(TokenError::AliasLookupFailed(format!(
                "no encoded certificate for '{}'",
                entry.alias
            )));
        }

        let session = self.session.lock().unwrap();
        let template = [
            Attribute::Class(ObjectClass::CERTIFICATE),
            Attribute::Value(entry.der.clone()),
        ];

        match session.find_objects(&template)?.first() {
            Some(handle) => Ok(Self::read_object(&session, *handle)?.alias()),
            None => Ok(None),
        }
    }

    pub fn logout(&self) -> Result<(), TokenError> {
        match self.session.lock().unwrap().logout() {
            Ok(()) | Err(Pkcs11Error::Pkcs11(RvError::UserNotLoggedIn, _)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn read_object(session: &Session, handle: ObjectHandle) -> Result<CertificateObject, TokenError> {
        let attributes =
            session.get_attributes(handle, &[AttributeType::Value, AttributeType::Label, AttributeType::Id])?;

        let mut object = CertificateObject {
            label: None,
            id: Vec::new(),
            der: Vec::new(),
        };
        for attribute in attributes {
            match attribute {
                Attribute::Value(der) => object.der = der,
                Attribute::Label(label) => {
                    object.label = Some(String::from_utf8_lossy(&label).trim_end().to_string())
                }
                Attribute::Id(id) => object.id = id,
                _ => {}
            }
        }
        Ok(object)
    }
}
