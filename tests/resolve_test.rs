use std::path::PathBuf;

use dbferry::util::profile_store::EncryptedConfigStore;
use dbferry::{AutoSelector, ConfigResolver, ConnectionArgs, ConnectionProfile, Error, Provenance};
use tempfile::TempDir;

const PASSPHRASE: &str = "correct horse";

fn profile(host: &str, port: u16) -> ConnectionProfile {
    ConnectionProfile {
        host: host.to_string(),
        port,
        user: "migrator".to_string(),
        password: "s3cret".to_string(),
        database: None,
    }
}

fn save(dir: &TempDir, name: &str, profile: &ConnectionProfile) -> PathBuf {
    let path = dir.path().join(name);
    EncryptedConfigStore.save(&path, profile, PASSPHRASE).unwrap();
    path
}

#[test]
fn config_file_beats_flags() {
    let dir = TempDir::new().unwrap();
    let path = save(&dir, "prod.enc", &profile("prod-db", 3307));
    let args = ConnectionArgs {
        config: Some(path.clone()),
        host: Some("ignored".to_string()),
        passphrase: Some(PASSPHRASE.to_string()),
        ..Default::default()
    };

    let (resolved, provenance) = ConfigResolver::new(&AutoSelector, None)
        .resolve(&args, "source")
        .unwrap();
    assert_eq!(resolved, profile("prod-db", 3307));
    assert_eq!(provenance, Provenance::ConfigFile(path));
}

#[test]
fn wrong_passphrase_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = save(&dir, "prod.enc", &profile("prod-db", 3307));
    let args = ConnectionArgs {
        config: Some(path),
        host: Some("fallback".to_string()),
        passphrase: Some("wrong".to_string()),
        ..Default::default()
    };

    let err = ConfigResolver::new(&AutoSelector, Some(dir.path().to_path_buf()))
        .resolve(&args, "source")
        .unwrap_err();
    assert!(matches!(err, Error::Crypto(_)), "{}", err);
}

#[test]
fn missing_config_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    let args = ConnectionArgs {
        config: Some(dir.path().join("nope.enc")),
        passphrase: Some(PASSPHRASE.to_string()),
        ..Default::default()
    };
    assert!(ConfigResolver::new(&AutoSelector, None)
        .resolve(&args, "target")
        .is_err());
}

#[test]
fn flags_fill_in_defaults() {
    let args = ConnectionArgs {
        host: Some("10.0.0.5".to_string()),
        database: Some("shop".to_string()),
        ..Default::default()
    };
    let (resolved, provenance) = ConfigResolver::new(&AutoSelector, None)
        .resolve(&args, "target")
        .unwrap();
    assert_eq!(provenance, Provenance::Flags);
    assert_eq!(resolved.host, "10.0.0.5");
    assert_eq!(resolved.port, 3306);
    assert_eq!(resolved.user, "root");
    assert_eq!(resolved.database.as_deref(), Some("shop"));
}

#[test]
fn auto_mode_picks_first_discovered_profile() {
    let dir = TempDir::new().unwrap();
    save(&dir, "b-replica.enc", &profile("replica", 3306));
    let first = save(&dir, "a-primary.enc", &profile("primary", 3306));
    std::fs::write(dir.path().join("notes.txt"), "not a profile").unwrap();

    let args = ConnectionArgs {
        passphrase: Some(PASSPHRASE.to_string()),
        ..Default::default()
    };
    let (resolved, provenance) = ConfigResolver::new(&AutoSelector, Some(dir.path().to_path_buf()))
        .resolve(&args, "source")
        .unwrap();
    assert_eq!(resolved.host, "primary");
    assert_eq!(provenance, Provenance::Discovered(first));
}

#[test]
fn auto_mode_without_passphrase_cannot_open_profiles() {
    let dir = TempDir::new().unwrap();
    save(&dir, "prod.enc", &profile("prod-db", 3306));

    let err = ConfigResolver::new(&AutoSelector, Some(dir.path().to_path_buf()))
        .resolve(&ConnectionArgs::default(), "source")
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(err.to_string().contains("DBFERRY_SOURCE_PASSPHRASE"));
}

#[test]
fn nothing_given_falls_back_to_defaults() {
    let empty = TempDir::new().unwrap();
    let (resolved, provenance) = ConfigResolver::new(&AutoSelector, Some(empty.path().to_path_buf()))
        .resolve(&ConnectionArgs::default(), "server")
        .unwrap();
    assert_eq!(provenance, Provenance::Defaults);
    assert_eq!(resolved, ConnectionProfile::default());
}
