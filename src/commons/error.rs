//! Errors reported by token access and certificate selection.

use std::{fmt, time::Duration};

use cryptoki::error::{Error as Pkcs11Error, RvError};

//------------ TokenError ----------------------------------------------------

/// Everything that can go wrong between asking for a signing certificate and
/// getting one.
///
/// Callers are expected to match on the variant: a `PinRejected` means asking
/// for the PIN again, a `TokenRemoved` or `NoUsableModule` means asking for
/// the card to be (re)inserted, anything else is most likely fatal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TokenError {
    /// No candidate module paths were given to the context.
    NoLibrariesAvailable,

    /// A single candidate module could not be registered or opened.
    ModuleLoadFailed { module: String, reason: String },

    /// None of the candidate modules gave us a usable session.
    NoUsableModule,

    /// No PIN is set, we refuse to open the store unauthenticated.
    PinNotSet,

    /// The token refused the PIN.
    PinRejected,

    /// A previously usable session stopped working, the token was most
    /// likely pulled out.
    TokenRemoved,

    /// The session was logged out and cannot be used anymore.
    SessionClosed,

    /// The token is there, but none of its certificates can be used to sign.
    NoValidCertificate,

    /// The store cannot tell us under which alias a certificate lives.
    AliasLookupFailed(String),

    /// A token call did not complete in time.
    Timeout { op: String, after: Duration },

    /// The PKCS#11 library returned an error we do not classify further.
    Pkcs11(String),

    /// A certificate on the token could not be decoded.
    CertificateDecode(String),

    Other(String),
}

impl TokenError {
    pub fn module_load_failed(module: impl fmt::Display, reason: impl fmt::Display) -> Self {
        TokenError::ModuleLoadFailed {
            module: module.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn other(msg: impl fmt::Display) -> Self {
        TokenError::Other(msg.to_string())
    }

    /// Returns whether the error means the session we were using is gone.
    pub fn is_removal(&self) -> bool {
        matches!(self, TokenError::TokenRemoved)
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenError::NoLibrariesAvailable => write!(
                f,
                "Need native PKCS#11 libraries to access the smart card, none were given"
            ),
            TokenError::ModuleLoadFailed { module, reason } => {
                write!(f, "Failed to use PKCS#11 module '{}': {}", module, reason)
            }
            TokenError::NoUsableModule => write!(
                f,
                "None of the PKCS#11 libraries found were able to open the store on the smart card"
            ),
            TokenError::PinNotSet => write!(f, "A PIN is required to unlock the smart card"),
            TokenError::PinRejected => write!(f, "The smart card rejected the PIN"),
            TokenError::TokenRemoved => write!(f, "The smart card was removed"),
            TokenError::SessionClosed => write!(f, "The smart card session was logged out"),
            TokenError::NoValidCertificate => {
                write!(f, "The smart card holds no certificate that is valid for signing")
            }
            TokenError::AliasLookupFailed(e) => write!(f, "Cannot read alias for certificate: {}", e),
            TokenError::Timeout { op, after } => {
                write!(f, "{} did not complete within {:?}", op, after)
            }
            TokenError::Pkcs11(e) => write!(f, "PKCS#11 error: {}", e),
            TokenError::CertificateDecode(e) => write!(f, "Cannot decode certificate: {}", e),
            TokenError::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TokenError {}

impl From<Pkcs11Error> for TokenError {
    fn from(err: Pkcs11Error) -> Self {
        match &err {
            Pkcs11Error::Pkcs11(rv, _) if is_removal(rv) => TokenError::TokenRemoved,
            Pkcs11Error::Pkcs11(rv, _) if is_pin_rejection(rv) => TokenError::PinRejected,
            _ => TokenError::Pkcs11(err.to_string()),
        }
    }
}

/// Return values which mean the session or token we were talking to is gone.
fn is_removal(rv: &RvError) -> bool {
    matches!(
        rv,
        RvError::DeviceRemoved
            | RvError::TokenNotPresent
            | RvError::SessionHandleInvalid
            | RvError::SessionClosed
            | RvError::DeviceError
    )
}

/// Return values which mean the PIN itself is the problem. Trying the same
/// PIN again only brings the card closer to locking it.
fn is_pin_rejection(rv: &RvError) -> bool {
    matches!(
        rv,
        RvError::PinIncorrect | RvError::PinInvalid | RvError::PinLenRange | RvError::PinExpired | RvError::PinLocked
    )
}

//------------ Tests ---------------------------------------------------------
