use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::tempdir;

use stackd::config::{load_and_validate, load_config, load_from_path, validate_config};
use stackd::errors::StackdError;
use stackd_test_utils::builders::ConfigBuilder;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn full_config_becomes_the_initial_snapshot() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("Stackd.toml");
    fs::write(
        &path,
        r#"
[paths]
run_dir = "/Users/me/Library/Stackd"
static_dir = "/Applications/Stackd.app/Contents/Resources/static"

[setup]
lang = "zh"
password = "hunter2"

[setup.proxy]
on = true
proxy = "export https_proxy=http://127.0.0.1:7890 http_proxy=http://127.0.0.1:7890"

[worker]
timeout = "10m"
"#,
    )?;

    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.worker_timeout, Some(Duration::from_secs(600)));
    assert_eq!(cfg.hosts_file, PathBuf::from("/private/etc/hosts"));

    let state = cfg.initial_state();
    assert_eq!(state.lang.as_deref(), Some("zh"));
    assert_eq!(
        state.php_dir,
        PathBuf::from("/Users/me/Library/Stackd/server/php")
    );
    assert_eq!(state.password.as_ref().map(|p| p.expose()), Some("hunter2"));
    let proxy = state.proxy.expect("proxy is on");
    assert_eq!(proxy.len(), 2);
    assert_eq!(proxy["https_proxy"], "http://127.0.0.1:7890");
    assert!(!proxy.contains_key("export"));
    Ok(())
}

#[test]
fn every_section_is_optional() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("empty.toml");
    fs::write(&path, "")?;

    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.run_dir, PathBuf::from(".stackd"));
    assert!(cfg.password.is_none());
    assert!(cfg.proxy.is_none());
    assert!(cfg.worker_timeout.is_none());
    Ok(())
}

#[test]
fn unknown_keys_are_rejected() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("typo.toml");
    fs::write(&path, "[pahts]\nrun_dir = \"/x\"\n")?;

    assert!(matches!(load_from_path(&path), Err(StackdError::TomlError(_))));
    Ok(())
}

#[test]
fn invalid_values_are_config_errors() {
    let mut raw = stackd::config::RawConfig::default();
    raw.worker.timeout = Some("0s".to_string());
    assert!(matches!(validate_config(&raw), Err(StackdError::ConfigError(_))));

    raw.worker.timeout = Some("soon".to_string());
    assert!(matches!(validate_config(&raw), Err(StackdError::ConfigError(_))));

    let mut raw = stackd::config::RawConfig::default();
    raw.setup.proxy.on = true;
    raw.setup.proxy.proxy = "export".to_string();
    assert!(matches!(validate_config(&raw), Err(StackdError::ConfigError(_))));

    let mut raw = stackd::config::RawConfig::default();
    raw.paths.run_dir = PathBuf::new();
    assert!(matches!(validate_config(&raw), Err(StackdError::ConfigError(_))));
}

#[test]
fn empty_password_counts_as_unset() {
    let cfg = ConfigBuilder::new().with_password("").build();
    assert!(cfg.password.is_none());
    assert!(cfg.initial_state().password.is_none());
}

#[test]
fn explicit_config_path_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(matches!(
        load_config(Some(missing.as_path())),
        Err(StackdError::IoError(_))
    ));
}

#[test]
fn password_is_never_serialized_for_the_ui() -> TestResult {
    let cfg = ConfigBuilder::new()
        .with_run_dir("/srv/stackd")
        .with_password("hunter2")
        .with_proxy("http_proxy=http://proxy:3128")
        .with_timeout("30s")
        .build();
    let message = stackd::engine::UiMessage::new(
        "application:global-server-updata",
        "k",
        stackd::engine::UiPayload::State(cfg.initial_state()),
    );
    let rendered = message.to_json().to_string();
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("http://proxy:3128"));
    Ok(())
}
