//! Configuration system tests
//!
//! Loads configuration files from disk and builds a runtime from them

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use taskgraph_core::comm::MockTransfer;
use taskgraph_core::config::{init_config, PolicyKind, RuntimeConfig};
use taskgraph_core::error::{Error, ErrorCode};
use taskgraph_core::scheduler::TaskScheduler;
use tempfile::TempDir;

/// Test fixture for configuration testing
struct ConfigFixture {
    _temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("runtime.toml");
        Self {
            _temp_dir: temp_dir,
            config_path,
        }
    }

    fn write_config(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[scheduler]
policy = "locality"
max_retries = 5
app_host = "login-1"
history_limit = 50

[transfers]
max_concurrent_copies = 8
copy_timeout_ms = 30000

[logging]
level = "debug"
json_format = true

[logging.components]
comm = "trace"
scheduler = "warn"
"#,
    );

    let config = RuntimeConfig::load(Some(fixture.path())).unwrap();
    assert_eq!(config.scheduler.policy, PolicyKind::Locality);
    assert_eq!(config.scheduler.max_retries, 5);
    assert_eq!(config.scheduler.app_host, "login-1");
    assert_eq!(config.transfers.effective_concurrency(), 8);
    assert_eq!(config.transfers.copy_timeout().map(|d| d.as_millis()), Some(30000));
    assert_eq!(config.scheduler.history_limit, 50);
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json_format);
    assert_eq!(config.logging.components.get("comm").map(String::as_str), Some("trace"));
    assert_eq!(config.logging.components.len(), 2);
}

#[test]
fn test_partial_config_keeps_defaults() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[scheduler]
policy = "constraints_fifo"
"#,
    );

    let config = RuntimeConfig::load(Some(fixture.path())).unwrap();
    assert_eq!(config.scheduler.policy, PolicyKind::ConstraintsFifo);
    assert_eq!(config.scheduler.max_retries, 2);
    assert_eq!(config.scheduler.history_limit, 10_000);
    assert!(config.logging.components.is_empty());
    assert!(config.transfers.copy_timeout().is_none());
    assert!(config.transfers.effective_concurrency() >= 1);
}

#[test]
fn test_every_policy_name_parses() {
    for kind in PolicyKind::all() {
        let fixture = ConfigFixture::new();
        fixture.write_config(&format!("[scheduler]\npolicy = \"{}\"\n", kind.name()));
        let config = RuntimeConfig::load(Some(fixture.path())).unwrap();
        assert_eq!(config.scheduler.policy, *kind);
    }
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_missing_explicit_file() {
    let fixture = ConfigFixture::new();
    let err = RuntimeConfig::load(Some(fixture.path())).unwrap_err();
    assert!(matches!(err, Error::ConfigNotFound { .. }));
    assert_eq!(err.code(), ErrorCode::ConfigNotFound);
}

#[test]
fn test_unknown_policy_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[scheduler]\npolicy = \"random\"\n");
    let err = RuntimeConfig::load(Some(fixture.path())).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigParseError);
}

#[test]
fn test_invalid_log_level_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[logging]\nlevel = \"loud\"\n");
    let err = RuntimeConfig::load(Some(fixture.path())).unwrap_err();
    assert!(matches!(err, Error::ConfigValidation { .. }));
    assert!(err.suggestion().is_some());
}

#[test]
fn test_unknown_log_component_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[logging.components]\nnetwork = \"debug\"\n");
    let err = RuntimeConfig::load(Some(fixture.path())).unwrap_err();
    match err {
        Error::ConfigValidation { field, .. } => {
            assert_eq!(field.as_deref(), Some("logging.components.network"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_invalid_component_level_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[logging.components]\ndata = \"chatty\"\n");
    let err = RuntimeConfig::load(Some(fixture.path())).unwrap_err();
    assert!(matches!(err, Error::ConfigValidation { .. }));
}

#[test]
fn test_empty_app_host_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[scheduler]\napp_host = \"  \"\n");
    let err = RuntimeConfig::load(Some(fixture.path())).unwrap_err();
    assert!(matches!(err, Error::ConfigValidation { .. }));
}

// ─────────────────────────────────────────────────────────────────
// Init and wiring
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_init_config_round_trip() {
    let fixture = ConfigFixture::new();
    let path = init_config(Some(fixture.path()), false).unwrap();
    assert!(path.exists());

    // Refuses to overwrite unless forced
    assert!(init_config(Some(fixture.path()), false).is_err());
    assert!(init_config(Some(fixture.path()), true).is_ok());

    let config = RuntimeConfig::load(Some(fixture.path())).unwrap();
    assert_eq!(config.scheduler.policy, PolicyKind::Fifo);
}

#[test]
fn test_scheduler_from_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[scheduler]\npolicy = \"lifo\"\napp_host = \"app\"\n");

    let config = RuntimeConfig::load(Some(fixture.path())).unwrap();
    let scheduler = TaskScheduler::from_config(&config, Arc::new(MockTransfer::new()));
    assert_eq!(scheduler.policy_name(), "lifo");
    assert!(scheduler.resource_names().is_empty());
    assert_eq!(scheduler.stats().submitted, 0);
}
