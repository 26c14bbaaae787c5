//! Various tokencert-wide constants.

use std::time::Duration;

//------------ Binary Names -------------------------------------------------

/// The friendly name of the `tokencert` binary.
pub const TOKENCERT_APP: &str = "Token Certificate Tool";

//------------ Environment Variables ----------------------------------------

/// The environment variable the command line tool reads the PIN from.
pub const TOKENCERT_ENV_PIN: &str = "TOKENCERT_PIN";

/// The environment variable pointing at a config file.
pub const TOKENCERT_ENV_CONFIG: &str = "TOKENCERT_CONFIG";

//------------ Module Configuration -----------------------------------------

/// The provider name written into every module configuration block.
///
/// The native loader identifies the provider by this name, so it must never
/// differ between candidates.
pub const MODULE_PROVIDER_NAME: &str = "SmartCard";

//------------ Timing --------------------------------------------------------

/// How long to wait for a single token operation before giving up on it.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

//------------ Module Discovery ---------------------------------------------

pub const WIN_MODULE_BASE: &str = "C:/Windows/System32/";
pub const UNIX_MODULE_BASE: &str = "/usr/lib/";
pub const MACOS_MODULE_BASE: &str = "/Library/Security/tokend/";

/// Vendor PKCS#11 libraries known to be installed in the Windows system
/// directory.
pub const WIN_MODULES: &[&str] = &[
    "idprimepkcs11.dll",
    "aetpkss1.dll",
    "asepkcs.dll",
    "gclib.dll",
    "pk2priv.dll",
    "w32pk2ig.dll",
    "ngp11v211.dll",
    "eTPkcs11.dll",
    "eTPKCS11.dll",
    "acospkcs11.dll",
    "dkck201.dll",
    "dkck232.dll",
    "cryptoki22.dll",
    "acpkcs.dll",
    "slbck.dll",
    "WDPKCS.dll",
    "cmP11.dll",
    "WDBraz_P11_CCID_v34.dll",
    "cvP11.dll",
];

/// Vendor PKCS#11 libraries known on Unix like systems. Relative names are
/// looked up under the platform base directory, absolute ones as is. On macOS
/// the `.so` suffix is swapped for `.dylib`.
pub const UNIX_MODULES: &[&str] = &[
    "libASEP11.so",
    "opensc-pkcs11.so",
    "libaetpkss.so",
    "libaetpkss.so.3",
    "libgpkcs11.so",
    "libgpkcs11.so.2",
    "libepsng_p11.so",
    "libepsng_p11.so.1",
    "libeTPkcs11.so",
    "libeToken.so",
    "libeToken.so.4",
    "libcmP11.so",
    "libwdpkcs.so",
    "/usr/local/lib64/libwdpkcs.so",
    "/usr/local/lib/libwdpkcs.so",
    "pkcs11/opensc-pkcs11.so",
    "/usr/lib/x86_64-linux-gnu/opensc-pkcs11.so",
    "ifdokccid.so",
    "libokbase2.so",
    "libokbase2.so.3",
];
