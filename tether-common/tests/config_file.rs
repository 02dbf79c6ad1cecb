mod common;

use common::{fixture, init_test_logging};
use serial_test::serial;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tether_common::config::ConfigSource;
use tether_common::{HostRole, InstallMethod, SizeClass, TetherConfig};
use tracing::info;

#[test]
#[serial]
fn test_full_file_loads_every_section() {
    init_test_logging();
    info!("TEST START: test_full_file_loads_every_section");

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tether.toml");
    std::fs::write(&path, fixture("tether_full.toml")).unwrap();

    let loaded = TetherConfig::load(Some(&path)).unwrap();
    let config = &loaded.config;
    assert_eq!(loaded.file.as_deref(), Some(path.as_path()));

    assert_eq!(config.project.venv_python(), PathBuf::from("/srv/assistant/venv/bin/python"));
    assert!(!config.git.enabled);
    assert_eq!(config.tunnel.poll_policy().attempts, 8);
    assert_eq!(config.tunnel.poll_policy().delay, Duration::from_millis(500));
    assert_eq!(config.install.download_policy().delay, Duration::from_secs(15));
    assert_eq!(config.assistant.whisper_model, "small");
    assert_eq!(config.assistant.memory_size, 20);

    let deps = config.install.dependencies.as_ref().unwrap();
    assert_eq!(deps.len(), 2);
    assert_eq!(deps[0].target, HostRole::Local);
    assert_eq!(deps[1].size, SizeClass::Large);
    assert!(matches!(deps[1].install, InstallMethod::OllamaPull { .. }));

    assert_eq!(loaded.sources["remote.host"], ConfigSource::File(path.clone()));
    assert_eq!(loaded.sources["tunnel.state_dir"], ConfigSource::Default);
    info!("TEST PASS: test_full_file_loads_every_section");
}

#[test]
#[serial]
#[allow(unsafe_code)]
fn test_invalid_env_override_is_reported() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tether.toml");
    std::fs::write(&path, fixture("tether_full.toml")).unwrap();

    // SAFETY: serialized with other environment tests.
    unsafe { std::env::set_var("TETHER_LOCAL_PORT", "not-a-port") };
    let result = TetherConfig::load(Some(&path));
    // SAFETY: serialized with other environment tests.
    unsafe { std::env::remove_var("TETHER_LOCAL_PORT") };

    let err = result.unwrap_err();
    assert!(err.to_string().contains("TETHER_LOCAL_PORT"), "{err}");
    assert_eq!(err.code(), tether_common::ErrorCode::ConfigEnvError);
}

#[test]
#[serial]
fn test_malformed_file_is_a_parse_error() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tether.toml");
    std::fs::write(&path, "[tunnel\nlocal_port = 1").unwrap();

    let err = TetherConfig::load(Some(&path)).unwrap_err();
    assert_eq!(err.code(), tether_common::ErrorCode::ConfigParseError);
}
