//! The _tokencert_ library crate.
//!
//! Opens an authenticated session on a PKCS#11 smart card, trying a list of
//! vendor libraries until one of them understands the inserted token, and
//! picks the certificate to sign with from the certificates it holds.

pub mod cli;
pub mod commons;
pub mod config;
pub mod constants;
pub mod token;
