//! Configuration file to running PLC units.

use std::io::Write;
use std::time::Duration;
use tandem_common::config::ConfigLoader;
use tandem_image::LockPolicy;
use tandem_runtime::plc::OperationMode;
use tandem_runtime::{PlcBuilder, RuntimeConfig, RuntimeContextBuilder};

const CONFIG: &str = r#"
[shared]
log_level = "warn"
service_name = "rover"

[monitor]
window_s = 2.0
tolerance = 0.2

[[units]]
name = "plc"
cycle_time_ms = 10
lock_policy = "write_preferring"

[[units]]
name = "hmi"
cycle_time_ms = 20
"#;

fn load() -> RuntimeConfig {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    RuntimeConfig::load_validated(file.path()).unwrap()
}

#[test]
fn config_file_builds_context() {
    let config = load();
    assert_eq!(config.units.len(), 2);
    assert_eq!(config.unit("plc").unwrap().lock_policy, LockPolicy::WritePreferring);
    assert_eq!(config.unit("hmi").unwrap().cycle_time(), Duration::from_millis(20));

    let ctx = RuntimeContextBuilder::from_config(&config).unwrap().build();
    let senders: Vec<&str> = ctx.senders().collect();
    assert_eq!(senders, vec!["hmi", "plc"]);
    assert_eq!(
        ctx.image("plc").unwrap().policy(),
        LockPolicy::WritePreferring
    );
}

#[test]
fn one_plc_per_unit() {
    let config = load();
    let ctx = RuntimeContextBuilder::from_config(&config).unwrap().build();

    let plcs: Vec<_> = config
        .units
        .iter()
        .map(|unit| {
            PlcBuilder::new(unit.name.clone(), unit.cycle_time())
                .options(unit.cycler_options(&config.monitor))
                .spawn(&ctx)
                .unwrap()
        })
        .collect();

    for plc in &plcs {
        assert_eq!(plc.mode(), OperationMode::Off);
        plc.set_mode(OperationMode::On).unwrap();
        plc.set_mode(OperationMode::Started).unwrap();
        plc.cycler().start(true).unwrap();
    }
    std::thread::sleep(Duration::from_millis(60));
    for plc in &plcs {
        assert_eq!(plc.mode(), OperationMode::Started);
        assert!(plc.cycler().is_alive());
        plc.cycler().shutdown(true).unwrap();
    }
}

#[test]
fn invalid_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"[shared]\nlog_level = \"info\"\nservice_name = \"x\"\n\n[[units]]\nname = \"plc\"\ncycle_time_ms = 0\n")
        .unwrap();
    assert!(RuntimeConfig::load(file.path()).is_ok());
    assert!(RuntimeConfig::load_validated(file.path()).is_err());
}
