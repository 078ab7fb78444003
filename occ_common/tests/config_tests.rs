//! Config loading tests.

use occ_common::prelude::*;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{content}").unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
[shared]
log_level = "debug"
service_name = "occ-test"

[link]
device = "/tmp/occ_rx,/tmp/occ_tx"
kind = "pipe"
interface = "lvds"
local_buffer_size = 0

[[modules]]
name = "dsp1"
hardware_id = "21.50.85.1"
module_type = 0x30
response_timeout_ms = 1500

[[modules]]
name = "roc1"
hardware_id = "0x0A000001"
module_type = 0x20
"#,
    );

    let config = OccConfig::load(file.path()).unwrap();
    config.validate().unwrap();
    assert_eq!(config.shared.log_level, LogLevel::Debug);
    assert_eq!(config.link.kind, LinkKind::Pipe);
    assert_eq!(config.link.interface, Interface::Lvds);
    assert_eq!(config.link.local_buffer_size, 0);
    assert_eq!(config.link.wait_timeout_ms, 100);
    assert_eq!(config.modules.len(), 2);
    assert_eq!(config.modules[0].module_type, ModuleType::Dsp);
    assert_eq!(config.modules[0].response_timeout_ms, 1500);
    assert_eq!(config.modules[1].link(), ModuleLink::Lvds);
    assert_eq!(config.modules[1].hardware_id.to_string(), "10.0.0.1");
}

#[test]
fn test_defaults_apply() {
    let file = write_config(
        r#"
[shared]
service_name = "occ"

[link]
device = "/dev/snsocb0"
"#,
    );

    let config = OccConfig::load(file.path()).unwrap();
    config.validate().unwrap();
    assert_eq!(config.shared.log_level, LogLevel::Info);
    assert_eq!(config.link.kind, LinkKind::Hardware);
    assert_eq!(config.link.interface, Interface::Optical);
    assert!(config.link.local_buffer_size >= PACKET_MAX_LENGTH);
    assert!(config.modules.is_empty());
}

#[test]
fn test_duplicate_module_rejected() {
    let file = write_config(
        r#"
[shared]
service_name = "occ"

[link]
device = "/dev/snsocb0"

[[modules]]
name = "dup"
hardware_id = "1.2.3.4"
module_type = 0x20

[[modules]]
name = "dup"
hardware_id = "1.2.3.5"
module_type = 0x20
"#,
    );

    let config = OccConfig::load(file.path()).unwrap();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ValidationError(_))
    ));
}

#[test]
fn test_bad_hardware_id_is_parse_error() {
    let file = write_config(
        r#"
[shared]
service_name = "occ"

[link]
device = "/dev/snsocb0"

[[modules]]
name = "roc"
hardware_id = "not-an-id"
module_type = 0x20
"#,
    );

    assert!(matches!(
        OccConfig::load(file.path()),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_missing_file() {
    assert!(matches!(
        OccConfig::load(Path::new("/nonexistent/occ.toml")),
        Err(ConfigError::FileNotFound)
    ));
}
