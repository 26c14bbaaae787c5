//! Access to the smart card: module registration, the token session and
//! selection of the signing certificate.

pub mod cert;
pub mod discovery;
pub mod manager;
pub mod module;
pub mod pin;
pub mod pkcs11;
pub mod provider;
pub mod selector;
pub mod session;

#[cfg(test)]
pub mod mock;

pub use self::{
    cert::{CertificateEntry, KeyUsage},
    manager::TokenSessionManager,
    module::{CandidateModule, ModuleStatus},
    session::TokenSession,
};
