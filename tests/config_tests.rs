use std::io::Write;

use chrono::{TimeZone, Utc};
use lightning_connector::accelerators::DeviceType;
use lightning_connector::config::{LightningConfig, CONFIG_ENV};
use lightning_connector::connector::AcceleratorConnector;
use lightning_connector::strategies::StrategyRegistry;
use lightning_connector::system::StaticPlatform;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_and_resolve_from_file() {
    let file = write_config(
        r#"
[trainer]
accelerator = "gpu"
devices = "0,1"
precision = "bf16"
plugins = ["checkpoint_io:torch"]
"#,
    );
    let cfg = LightningConfig::load(file.path()).unwrap();
    let platform = StaticPlatform::cpu_only().with_devices(DeviceType::Cuda, 2);
    let accelerators = cfg.accelerator_registry().unwrap();
    let strategies = StrategyRegistry::with_defaults();
    let config = cfg.trainer.to_connector_config(&platform).unwrap();
    let connector = AcceleratorConnector::new(config, &accelerators, &strategies, &platform).unwrap();

    assert_eq!(connector.strategy().name(), "ddp");
    assert_eq!(connector.devices(), &[0, 1]);
    assert_eq!(connector.checkpoint_io().map(|c| c.name()), Some("TorchCheckpointIO"));
    // legacy "bf16" spelling
    assert_eq!(connector.warnings().len(), 1);
}

#[test]
fn test_malformed_file_is_an_error() {
    let file = write_config("[trainer\naccelerator = ");
    let err = LightningConfig::load(file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("failed to parse config file"));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = LightningConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn test_load_or_default_uses_env_path() {
    let file = write_config("[logging]\nlevel = \"trace\"\n");
    std::env::set_var(CONFIG_ENV, file.path());
    let cfg = LightningConfig::load_or_default();
    std::env::remove_var(CONFIG_ENV);
    assert_eq!(cfg.logging.level, "trace");
}

#[test]
fn test_schedule_table_from_config() {
    let file = write_config(
        r#"
[[schedules]]
call_hash = "h1"
name = "root.nightly"
cron = "0 0 * * *"
start_time = "2024-05-01T00:00:00Z"

[[schedules]]
call_hash = "h2"
name = "root.hourly"
cron = "0 * * * *"
"#,
    );
    let cfg = LightningConfig::load(file.path()).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
    let table = cfg.schedule_table(now).unwrap();
    assert_eq!(table.len(), 2);

    let nightly = table.get("h1").unwrap().unwrap();
    assert_eq!(nightly.next_fire(), Some(Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap()));
    let hourly = table.get("h2").unwrap().unwrap();
    assert_eq!(hourly.start_time, now);
}

#[test]
fn test_invalid_schedule_names_the_entry() {
    let file = write_config(
        r#"
[[schedules]]
call_hash = "h1"
name = "root.broken"
cron = "sometimes"
"#,
    );
    let cfg = LightningConfig::load(file.path()).unwrap();
    let err = cfg.schedule_table(Utc::now()).unwrap_err();
    assert!(err.to_string().contains("root.broken"));
}
