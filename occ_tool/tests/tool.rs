//! Subcommands against the pipe simulator

use clap::Parser;
use occ::config::{Interface, LinkKind, LogLevel, OccConfig};
use occ::packet::Packet;
use occ::packet::command::{Command, ModuleType};
use occ::packet::info::{CommandFlags, CommandInfo};
use occ_link::{LinkError, OccHandle};
use occ_tool::{Args, Context, ToolError, ToolResult, execute, resolve_config};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

const DSP: u32 = 0x1532_5501;

/// FIFO pair created up front, with the feeding end held open so queued
/// packets survive until the tool reads them.
struct Fifos {
    dir: tempfile::TempDir,
    feed: File,
}

impl Fifos {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let device = device(&dir);
        drop(OccHandle::open(&device, LinkKind::Pipe, Interface::Optical).unwrap());
        let feed = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.path().join("rx"))
            .unwrap();
        Self { dir, feed }
    }

    fn device(&self) -> String {
        device(&self.dir)
    }

    fn queue(&mut self, packet: &Packet) {
        self.feed.write_all(packet.as_bytes()).unwrap();
    }

    fn args(&self, extra: &[&str]) -> Args {
        let device = self.device();
        let mut argv = vec!["occ", "--kind", "pipe", "--device", device.as_str()];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }
}

fn device(dir: &tempfile::TempDir) -> String {
    format!(
        "{},{}",
        dir.path().join("rx").display(),
        dir.path().join("tx").display()
    )
}

fn dsp_response(command: Command, payload: &[u32]) -> Packet {
    let mut info = CommandInfo::new(command);
    info.flags |= CommandFlags::IS_RESPONSE;
    info.selector = ModuleType::Dsp.into();
    Packet::new(0, DSP, info.to_raw(), payload).unwrap()
}

fn run(args: &Args) -> ToolResult<String> {
    let config = resolve_config(args)?;
    let context = Context {
        config: &config,
        debug: args.debug,
        json: args.json,
        stop: Arc::new(AtomicBool::new(false)),
    };
    let mut out = Vec::new();
    execute(&context, &args.command, &mut out)?;
    Ok(String::from_utf8(out).unwrap())
}

#[test]
fn status_as_json() -> ToolResult<()> {
    let fifos = Fifos::new();
    let out = run(&fifos.args(&["--json", "status"]))?;
    let status: serde_json::Value = serde_json::from_str(&out)?;
    assert_eq!(status["rx_enabled"], false);
    assert_eq!(status["interface"], "optical");
    Ok(())
}

#[test]
fn dump_stops_after_count() -> ToolResult<()> {
    let mut fifos = Fifos::new();
    for _ in 0..3 {
        fifos.queue(&dsp_response(Command::ReadStatus, &[1, 2]));
    }
    let out = run(&fifos.args(&["dump", "-n", "2", "--timeout", "500"]))?;
    let lines: Vec<_> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l.contains("cmd=ReadStatus (response)")));
    assert!(lines[0].contains("src=21.50.85.1"));
    Ok(())
}

#[test]
fn dump_json_lines_until_idle() -> ToolResult<()> {
    let mut fifos = Fifos::new();
    fifos.queue(&Packet::create_occ(DSP, Command::Discover, 0, &[])?);
    let out = run(&fifos.args(&["--json", "dump", "--timeout", "200"]))?;
    let record: serde_json::Value = serde_json::from_str(out.trim())?;
    assert_eq!(record["kind"], "command");
    assert_eq!(record["command"], "Discover");
    assert_eq!(record["length"], 24);
    Ok(())
}

#[test]
fn discover_lists_answering_dsp() -> ToolResult<()> {
    let mut fifos = Fifos::new();
    fifos.queue(&dsp_response(Command::Discover, &[]));
    fifos.queue(&dsp_response(
        Command::ReadVersion,
        &[0x2113_0405, 0x5214_1231, 0, 0],
    ));
    let out = run(&fifos.args(&["--json", "discover", "--timeout", "300"]))?;
    let modules: serde_json::Value = serde_json::from_str(&out)?;
    assert_eq!(modules.as_array().map(Vec::len), Some(1));
    assert_eq!(modules[0]["hardware_id"], "21.50.85.1");
    assert_eq!(modules[0]["version"]["firmware"]["year"], 2014);
    Ok(())
}

#[test]
fn registers_unsupported_on_pipe() {
    let fifos = Fifos::new();
    let result = run(&fifos.args(&["read", "0", "0x40"]));
    assert!(matches!(
        result,
        Err(ToolError::Link(LinkError::Unsupported { .. }))
    ));
}

#[test]
fn debug_handle_refused_by_simulator() {
    let fifos = Fifos::new();
    let result = run(&fifos.args(&["--debug", "status"]));
    assert!(matches!(
        result,
        Err(ToolError::Link(LinkError::Unsupported { .. }))
    ));
}

#[test]
fn config_file_with_overrides() -> ToolResult<()> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("occ.toml");
    std::fs::write(
        &path,
        r#"
[shared]
log_level = "warn"
service_name = "occ"

[link]
device = "/dev/snsocb1"
local_buffer_size = 0

[[modules]]
name = "dsp1"
hardware_id = "21.50.85.1"
module_type = 0x30
"#,
    )?;
    let config_path = path.display().to_string();

    let args = Args::try_parse_from(["occ", "--config", config_path.as_str(), "status"]).unwrap();
    let config: OccConfig = resolve_config(&args)?;
    assert_eq!(config.link.device, "/dev/snsocb1");
    assert_eq!(config.shared.log_level, LogLevel::Warn);
    assert_eq!(config.modules.len(), 1);

    let args = Args::try_parse_from([
        "occ",
        "--config",
        config_path.as_str(),
        "--kind",
        "socket",
        "--device",
        "127.0.0.1:0",
        "-v",
        "status",
    ])
    .unwrap();
    let config = resolve_config(&args)?;
    assert_eq!(config.link.kind, LinkKind::Socket);
    assert_eq!(config.link.interface, Interface::Socket);
    assert_eq!(config.shared.log_level, LogLevel::Debug);
    Ok(())
}

#[test]
fn invalid_pipe_device_is_rejected() {
    let args = Args::try_parse_from(["occ", "--kind", "pipe", "--device", "only-one", "status"]).unwrap();
    assert!(matches!(resolve_config(&args), Err(ToolError::Config(_))));
}
