//! Certificates as found on a token.

use std::{collections::HashSet, fmt};

use chrono::{DateTime, Utc};
use log::warn;
use x509_parser::parse_x509_certificate;

use crate::commons::error::TokenError;

//------------ KeyUsage ------------------------------------------------------

/// The bits of the X.509 key usage extension.
///
/// Bit positions follow RFC 5280, section 4.2.1.3: bit 0 is
/// `digitalSignature`, bit 8 is `decipherOnly`.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct KeyUsage(u16);

impl KeyUsage {
    pub const DIGITAL_SIGNATURE: u16 = 1 << 0;
    pub const NON_REPUDIATION: u16 = 1 << 1;
    pub const KEY_ENCIPHERMENT: u16 = 1 << 2;
    pub const DATA_ENCIPHERMENT: u16 = 1 << 3;
    pub const KEY_AGREEMENT: u16 = 1 << 4;
    pub const KEY_CERT_SIGN: u16 = 1 << 5;
    pub const CRL_SIGN: u16 = 1 << 6;
    pub const ENCIPHER_ONLY: u16 = 1 << 7;
    pub const DECIPHER_ONLY: u16 = 1 << 8;

    pub const fn from_bits(bits: u16) -> Self {
        KeyUsage(bits)
    }

    pub const fn contains(self, bit: u16) -> bool {
        self.0 & bit == bit
    }

    /// Whether the key may be used to create signatures on documents, i.e.
    /// `digitalSignature` or `nonRepudiation` (a.k.a. `contentCommitment`).
    pub const fn allows_signing(self) -> bool {
        self.contains(Self::DIGITAL_SIGNATURE) || self.contains(Self::NON_REPUDIATION)
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const NAMES: &[(u16, &str)] = &[
            (KeyUsage::DIGITAL_SIGNATURE, "digitalSignature"),
            (KeyUsage::NON_REPUDIATION, "nonRepudiation"),
            (KeyUsage::KEY_ENCIPHERMENT, "keyEncipherment"),
            (KeyUsage::DATA_ENCIPHERMENT, "dataEncipherment"),
            (KeyUsage::KEY_AGREEMENT, "keyAgreement"),
            (KeyUsage::KEY_CERT_SIGN, "keyCertSign"),
            (KeyUsage::CRL_SIGN, "cRLSign"),
            (KeyUsage::ENCIPHER_ONLY, "encipherOnly"),
            (KeyUsage::DECIPHER_ONLY, "decipherOnly"),
        ];

        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();

        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join(", "))
        }
    }
}

//------------ CertificateEntry ----------------------------------------------

/// One certificate entry enumerated from a token store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateEntry {
    /// The label the store exposes the certificate under.
    pub alias: String,

    /// Number of certificates in the issuance chain, the entry included.
    pub chain_length: usize,

    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,

    /// `None` if the certificate has no key usage extension.
    pub key_usage: Option<KeyUsage>,

    pub subject: String,
    pub issuer: String,

    /// The DER encoded certificate, empty if the entry was not built from one.
    pub der: Vec<u8>,
}

impl CertificateEntry {
    pub fn new(
        alias: impl Into<String>,
        chain_length: usize,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        key_usage: Option<KeyUsage>,
    ) -> Self {
        CertificateEntry {
            alias: alias.into(),
            chain_length: chain_length.max(1),
            not_before,
            not_after,
            key_usage,
            subject: String::new(),
            issuer: String::new(),
            der: Vec::new(),
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    pub fn allows_signing(&self) -> bool {
        self.key_usage.is_none_or(KeyUsage::allows_signing)
    }
}

impl fmt::Display for CertificateEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "alias:      {}", self.alias)?;
        writeln!(f, "subject:    {}", self.subject)?;
        writeln!(f, "issuer:     {}", self.issuer)?;
        writeln!(f, "not before: {}", self.not_before.to_rfc3339())?;
        writeln!(f, "not after:  {}", self.not_after.to_rfc3339())?;
        writeln!(f, "chain:      {}", self.chain_length)?;
        match self.key_usage {
            Some(usage) => write!(f, "key usage:  {}", usage),
            None => write!(f, "key usage:  (unrestricted)"),
        }
    }
}

//------------ CertificateObject ---------------------------------------------

/// A raw certificate object as read from the token.
#[derive(Clone, Debug)]
pub struct CertificateObject {
    pub label: Option<String>,
    pub id: Vec<u8>,
    pub der: Vec<u8>,
}

impl CertificateObject {
    /// The alias a store would show for this object: the label, or the hex
    /// encoded id for objects without one.
    pub fn alias(&self) -> Option<String> {
        match &self.label {
            Some(label) if !label.is_empty() => Some(label.clone()),
            _ if !self.id.is_empty() => Some(hex::encode(&self.id)),
            _ => None,
        }
    }
}

/// The parts of a decoded certificate we need to build entries.
#[derive(Clone, Debug)]
struct DecodedCertificate {
    alias: String,
    der: Vec<u8>,
    subject_raw: Vec<u8>,
    issuer_raw: Vec<u8>,
    subject: String,
    issuer: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    key_usage: Option<KeyUsage>,
}

impl DecodedCertificate {
    fn decode(object: &CertificateObject) -> Result<Self, TokenError> {
        let (_, cert) = parse_x509_certificate(&object.der)
            .map_err(|err| TokenError::CertificateDecode(err.to_string()))?;

        let not_before = timestamp(cert.validity().not_before.timestamp())?;
        let not_after = timestamp(cert.validity().not_after.timestamp())?;

        let key_usage = cert
            .key_usage()
            .map_err(|err| TokenError::CertificateDecode(format!("invalid key usage extension: {}", err)))?
            .map(|ext| KeyUsage::from_bits(ext.value.flags));

        Ok(DecodedCertificate {
            alias: object.alias().unwrap_or_default(),
            der: object.der.clone(),
            subject_raw: cert.subject().as_raw().to_vec(),
            issuer_raw: cert.issuer().as_raw().to_vec(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before,
            not_after,
            key_usage,
        })
    }

    fn is_self_issued(&self) -> bool {
        self.subject_raw == self.issuer_raw
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, TokenError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| TokenError::CertificateDecode(format!("validity time out of range: {}", secs)))
}

/// Counts the certificates in the chain of `certs[idx]` that are present in
/// `certs`, following issuer to subject links until a self issued
/// certificate or a missing issuer is reached.
fn chain_length(certs: &[DecodedCertificate], idx: usize) -> usize {
    let mut seen = HashSet::new();
    seen.insert(idx);

    let mut current = &certs[idx];
    while !current.is_self_issued() {
        let issuer = certs
            .iter()
            .enumerate()
            .find(|(i, candidate)| !seen.contains(i) && candidate.subject_raw == current.issuer_raw);

        match issuer {
            Some((i, cert)) => {
                seen.insert(i);
                current = cert;
            }
            None => break,
        }
    }

    seen.len()
}

/// Turns the certificate objects of a token into entries, keeping the
/// enumeration order. Objects that cannot be decoded are skipped.
pub fn entries_from_objects(objects: &[CertificateObject]) -> Vec<CertificateEntry> {
    let decoded: Vec<DecodedCertificate> = objects
        .iter()
        .filter_map(|object| match DecodedCertificate::decode(object) {
            Ok(cert) => Some(cert),
            Err(err) => {
                warn!(
                    "Ignoring certificate '{}' on token: {}",
                    object.alias().unwrap_or_default(),
                    err
                );
                None
            }
        })
        .collect();

    decoded
        .iter()
        .enumerate()
        .map(|(idx, cert)| CertificateEntry {
            alias: cert.alias.clone(),
            chain_length: chain_length(&decoded, idx),
            not_before: cert.not_before,
            not_after: cert.not_after,
            key_usage: cert.key_usage,
            subject: cert.subject.clone(),
            issuer: cert.issuer.clone(),
            der: cert.der.clone(),
        })
        .collect()
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn decoded(subject: &str, issuer: &str) -> DecodedCertificate {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        DecodedCertificate {
            alias: subject.to_string(),
            der: vec![],
            subject_raw: subject.as_bytes().to_vec(),
            issuer_raw: issuer.as_bytes().to_vec(),
            subject: subject.to_string(),
            issuer: issuer.to_string(),
            not_before: at,
            not_after: at,
            key_usage: None,
        }
    }

    #[test]
    fn chain_follows_issuers_on_token() {
        let certs = vec![
            decoded("user", "sub-ca"),
            decoded("root", "root"),
            decoded("sub-ca", "root"),
        ];

        assert_eq!(3, chain_length(&certs, 0));
        assert_eq!(1, chain_length(&certs, 1));
        assert_eq!(2, chain_length(&certs, 2));
    }

    #[test]
    fn chain_stops_at_missing_issuer() {
        let certs = vec![decoded("user", "sub-ca"), decoded("other", "elsewhere")];
        assert_eq!(1, chain_length(&certs, 0));
    }

    #[test]
    fn chain_survives_issuer_loops() {
        let certs = vec![decoded("a", "b"), decoded("b", "a")];
        assert_eq!(2, chain_length(&certs, 0));
    }

    #[test]
    fn key_usage_signing_bits() {
        assert!(KeyUsage::from_bits(KeyUsage::DIGITAL_SIGNATURE).allows_signing());
        assert!(KeyUsage::from_bits(KeyUsage::NON_REPUDIATION).allows_signing());
        assert!(!KeyUsage::from_bits(KeyUsage::KEY_ENCIPHERMENT | KeyUsage::KEY_CERT_SIGN).allows_signing());
        assert_eq!(
            "digitalSignature, keyEncipherment",
            KeyUsage::from_bits(KeyUsage::DIGITAL_SIGNATURE | KeyUsage::KEY_ENCIPHERMENT).to_string()
        );
    }

    #[test]
    fn alias_falls_back_to_hex_id() {
        let object = CertificateObject {
            label: Some(String::new()),
            id: vec![0xab, 0x01],
            der: vec![],
        };
        assert_eq!(Some("ab01".to_string()), object.alias());

        let object = CertificateObject {
            label: None,
            id: vec![],
            der: vec![],
        };
        assert_eq!(None, object.alias());
    }

    const CA: &[u8] = include_bytes!("../../test-resources/certs/ca.der");
    const SIGN: &[u8] = include_bytes!("../../test-resources/certs/sign.der");
    const ENCRYPT: &[u8] = include_bytes!("../../test-resources/certs/encrypt.der");

    fn object(label: &str, der: &[u8]) -> CertificateObject {
        CertificateObject {
            label: Some(label.to_string()),
            id: vec![],
            der: der.to_vec(),
        }
    }

    #[test]
    fn decodes_certificates_from_token() {
        let entries = entries_from_objects(&[object("sign", SIGN), object("encrypt", ENCRYPT), object("ca", CA)]);
        assert_eq!(3, entries.len());

        let sign = &entries[0];
        assert_eq!("sign", sign.alias);
        assert_eq!("CN=Jane Signer", sign.subject);
        assert_eq!("CN=Test Root CA", sign.issuer);
        assert_eq!(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(), sign.not_before);
        assert_eq!(Utc.with_ymd_and_hms(2034, 6, 1, 0, 0, 0).unwrap(), sign.not_after);
        assert_eq!(Some(KeyUsage::from_bits(KeyUsage::NON_REPUDIATION)), sign.key_usage);
        assert_eq!(2, sign.chain_length);
        assert_eq!(SIGN, sign.der.as_slice());

        let encrypt = &entries[1];
        assert_eq!(Some(KeyUsage::from_bits(KeyUsage::KEY_ENCIPHERMENT)), encrypt.key_usage);
        assert_eq!(2, encrypt.chain_length);

        let ca = &entries[2];
        assert_eq!(
            Some(KeyUsage::from_bits(KeyUsage::KEY_CERT_SIGN | KeyUsage::CRL_SIGN)),
            ca.key_usage
        );
        assert_eq!(Utc.with_ymd_and_hms(2044, 1, 1, 0, 0, 0).unwrap(), ca.not_after);
        assert_eq!(1, ca.chain_length);
    }

    #[test]
    fn chain_needs_the_issuer_on_the_token() {
        let entries = entries_from_objects(&[object("sign", SIGN)]);
        assert_eq!(1, entries[0].chain_length);
    }

    #[test]
    fn undecodable_objects_are_skipped() {
        let objects = vec![CertificateObject {
            label: Some("garbage".to_string()),
            id: vec![1],
            der: vec![0x30, 0x03, 0x02, 0x01],
        }];
        assert!(entries_from_objects(&objects).is_empty());
    }
}
