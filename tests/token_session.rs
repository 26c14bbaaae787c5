//! The session manager against real PKCS#11 loading, without a token.

use std::fs::File;

use tokencert::{
    commons::error::TokenError,
    token::{CandidateModule, ModuleStatus, TokenSessionManager},
};

#[test]
fn no_libraries_no_manager() {
    assert_eq!(
        Some(TokenError::NoLibrariesAvailable),
        TokenSessionManager::new(vec![]).err()
    );
}

#[tokio::test]
async fn pin_is_required_before_any_library_is_loaded() {
    let manager = TokenSessionManager::new(vec![CandidateModule::new("/nonexistent/libpkcs11.so")]).unwrap();

    assert!(!manager.is_pin_set());
    assert_eq!(Some(TokenError::PinNotSet), manager.signing_certificate().await.err());
    assert_eq!(ModuleStatus::Unregistered, manager.module_status());
}

#[tokio::test]
async fn unloadable_libraries_leave_nothing_registered() {
    let dir = tempfile::tempdir().unwrap();
    let not_a_library = dir.path().join("libfake-pkcs11.so");
    File::create(&not_a_library).unwrap();

    let manager = TokenSessionManager::new(vec![
        CandidateModule::new(dir.path().join("missing.so")),
        CandidateModule::new(&not_a_library),
    ])
    .unwrap();
    manager.set_pin(Some("1234".to_string()));

    assert_eq!(Some(TokenError::NoUsableModule), manager.open_session().await.err());
    assert_eq!(ModuleStatus::Unregistered, manager.module_status());

    // Nothing to log out of, but that is fine.
    manager.logout().await;
    assert_eq!(ModuleStatus::Unregistered, manager.module_status());
}
