//! Finding the vendor PKCS#11 libraries installed on this machine.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;

use crate::{
    constants::{MACOS_MODULE_BASE, UNIX_MODULE_BASE, UNIX_MODULES, WIN_MODULE_BASE, WIN_MODULES},
    token::module::CandidateModule,
};

/// Returns the known vendor libraries that exist on this system, in the
/// order they should be tried.
pub fn available_modules() -> Vec<CandidateModule> {
    debug!("Detected OS: {}", std::env::consts::OS);

    let found = if cfg!(windows) {
        find_modules(Path::new(WIN_MODULE_BASE), WIN_MODULES, false)
    } else if cfg!(target_os = "macos") {
        find_modules(Path::new(MACOS_MODULE_BASE), UNIX_MODULES, true)
    } else {
        find_modules(Path::new(UNIX_MODULE_BASE), UNIX_MODULES, false)
    };

    debug!("{} PKCS#11 libraries found", found.len());
    found
}

/// Looks for the libraries `names` under `base`.
///
/// Absolute names are checked as they are. With `bundles` set, the
/// directories below `base` are searched first, recursively, and `.so` in
/// the names is replaced by `.dylib`. A path is only returned once.
pub fn find_modules(base: &Path, names: &[&str], bundles: bool) -> Vec<CandidateModule> {
    let mut found = Vec::new();
    collect(base, names, bundles, &mut found);

    let mut seen = Vec::new();
    found
        .into_iter()
        .filter(|path| {
            if seen.contains(path) {
                false
            } else {
                seen.push(path.clone());
                true
            }
        })
        .map(CandidateModule::new)
        .collect()
}

fn collect(base: &Path, names: &[&str], bundles: bool, found: &mut Vec<PathBuf>) {
    if bundles {
        let mut dirs: Vec<PathBuf> = match fs::read_dir(base) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect(),
            Err(err) => {
                debug!("Cannot list '{}': {}", base.display(), err);
                Vec::new()
            }
        };
        dirs.sort();
        for dir in dirs {
            collect(&dir, names, bundles, found);
        }
    }

    for name in names {
        let name = if bundles {
            name.replace(".so", ".dylib")
        } else {
            name.to_string()
        };

        let path = if is_absolute(&name) {
            PathBuf::from(&name)
        } else {
            base.join(&name)
        };

        if path.is_file() {
            debug!("Found PKCS#11 library: {}", path.display());
            found.push(path);
        }
    }
}

/// Also treats drive paths as absolute when not running on Windows, the
/// name lists are shared between platforms.
fn is_absolute(name: &str) -> bool {
    name.starts_with('/') || name.starts_with("C:") || Path::new(name).is_absolute()
}

//------------ Tests ---------------------------------------------------------
