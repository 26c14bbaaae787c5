//! Picking the certificate to sign with.

use chrono::{DateTime, Utc};
use log::trace;

use super::cert::CertificateEntry;

/// Whether an entry may be used to sign at `now`.
///
/// The certificate must be within its validity period, and if it restricts
/// its key usage, it must allow either `digitalSignature` or
/// `nonRepudiation`.
pub fn is_usable(entry: &CertificateEntry, now: DateTime<Utc>) -> bool {
    if !entry.is_valid_at(now) {
        trace!(
            "Certificate '{}' is not valid at {} (valid {} - {})",
            entry.alias, now, entry.not_before, entry.not_after
        );
        return false;
    }

    if !entry.allows_signing() {
        trace!("Certificate '{}' does not allow signing", entry.alias);
        return false;
    }

    true
}

/// Selects the signing certificate among the entries of a token.
///
/// Among the usable entries the one with the longest chain wins, the earliest
/// one in enumeration order if there is a tie. Returns `None` if no entry is
/// usable, an expired or wrongly scoped certificate is never returned.
pub fn select(entries: &[CertificateEntry], now: DateTime<Utc>) -> Option<&CertificateEntry> {
    entries
        .iter()
        .filter(|entry| is_usable(entry, now))
        .fold(None, |best: Option<&CertificateEntry>, entry| match best {
            Some(best) if best.chain_length >= entry.chain_length => Some(best),
            _ => Some(entry),
        })
}

//------------ Tests ---------------------------------------------------------
