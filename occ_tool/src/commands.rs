//! Subcommand implementations.
//!
//! Every subcommand writes its report to the given writer, human readable
//! or as JSON, so the binary and the tests share the same code path.

use crate::error::ToolResult;
use occ::config::{ModuleConfig, OccConfig};
use occ::consts::PACKET_MAX_LENGTH;
use occ::hwid::HardwareId;
use occ::packet::PacketRef;
use occ::packet::command::Command;
use occ_link::{
    CircularBuffer, DirectRing, DmaCopier, LinkControl, LinkError, OccHandle, OccStatus,
    PacketList, Reservation, Transport,
};
use occ_module::{
    DiscoveredModule, Discovery, Dispatcher, DspHandler, DspVersion, ModuleCommander,
    PacketHandler, VerifyState,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Settings shared by all subcommands.
pub struct Context<'a> {
    /// Resolved configuration
    pub config: &'a OccConfig,
    /// Open restricted handles
    pub debug: bool,
    /// Emit JSON
    pub json: bool,
    /// Set by the signal handler
    pub stop: Arc<AtomicBool>,
}

/// One register word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterValue {
    /// Byte offset in the BAR
    pub offset: u32,
    /// Register content
    pub value: u32,
}

/// One dumped packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacketRecord {
    /// Kind of packet
    pub kind: &'static str,
    /// Sender
    pub source: HardwareId,
    /// Destination address
    pub destination: u32,
    /// Total length in bytes
    pub length: usize,
    /// Command name, for command packets
    pub command: Option<String>,
    /// Response flag, for command packets
    pub response: bool,
    /// Payload length in bytes
    pub payload_length: usize,
}

impl PacketRecord {
    /// Summarize `packet`.
    pub fn new(packet: &PacketRef<'_>) -> Self {
        let kind = if packet.is_bad() {
            "bad"
        } else if packet.is_command() {
            "command"
        } else if packet.is_rtdl() {
            "rtdl"
        } else if packet.is_neutron_data() {
            "neutron"
        } else if packet.is_meta_data() {
            "meta"
        } else {
            "data"
        };
        Self {
            kind,
            source: HardwareId(packet.source()),
            destination: packet.destination(),
            length: packet.length(),
            command: packet.command().map(|c| c.to_string()),
            response: packet.is_command() && packet.is_response(),
            payload_length: packet.payload_length(),
        }
    }

    fn line(&self) -> String {
        let mut line = format!(
            "{:<7} src={} dst={:#010x} len={}",
            self.kind,
            self.source.to_string(),
            self.destination,
            self.length
        );
        if let Some(command) = &self.command {
            line.push_str(&format!(" cmd={command}"));
            if self.response {
                line.push_str(" (response)");
            }
        }
        line
    }
}

/// Verification result of one configured module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyReport {
    /// Module name
    pub name: String,
    /// Module address
    pub hardware_id: HardwareId,
    /// Final verification state
    pub state: VerifyState,
    /// Reported versions, if READ_VERSION was answered
    pub version: Option<DspVersion>,
}

/// Collects packet summaries on the dispatcher threads.
struct DumpHandler {
    records: Mutex<Vec<PacketRecord>>,
    seen: AtomicU64,
    limit: Option<u64>,
}

impl DumpHandler {
    fn new(limit: Option<u64>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            seen: AtomicU64::new(0),
            limit,
        }
    }

    fn done(&self) -> bool {
        self.limit
            .is_some_and(|limit| self.seen.load(Ordering::Relaxed) >= limit)
    }

    fn take(&self) -> Vec<PacketRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl PacketHandler for DumpHandler {
    fn process(&self, packets: &Reservation<'_, &[u8]>) {
        let mut records = self.records.lock();
        for packet in packets.packets() {
            if self.done() {
                break;
            }
            records.push(PacketRecord::new(&packet));
            self.seen.fetch_add(1, Ordering::Relaxed);
            if self.done() {
                // Leave the rest of the window to whoever reads next.
                packets.mark_processed(&packet);
            }
        }
    }
}

impl Context<'_> {
    fn open(&self) -> ToolResult<OccHandle> {
        let link = &self.config.link;
        let handle = if self.debug {
            OccHandle::open_debug(&link.device, link.kind)?
        } else {
            OccHandle::open(&link.device, link.kind, link.interface)?
        };
        debug!("Opened {} ({:?}, debug={})", link.device, link.kind, self.debug);
        Ok(handle)
    }

    fn write_json<T: Serialize>(&self, out: &mut dyn Write, value: &T) -> ToolResult<()> {
        serde_json::to_writer_pretty(&mut *out, value)?;
        writeln!(out)?;
        Ok(())
    }

    /// Print the board status.
    pub fn status(&self, out: &mut dyn Write) -> ToolResult<()> {
        let status = self.open()?.status()?;
        if self.json {
            return self.write_json(out, &status);
        }
        write_status(out, &status)?;
        Ok(())
    }

    /// Print received packets until `count` packets were shown, nothing
    /// arrived for `idle`, or the stop flag is set.
    pub fn dump(
        &self,
        out: &mut dyn Write,
        count: Option<u64>,
        idle: Option<Duration>,
    ) -> ToolResult<()> {
        let mut handle = self.open()?;
        let handler = Arc::new(DumpHandler::new(count));

        if handle.is_debug() {
            // A restricted handle cannot acknowledge, so only peek once.
            let mut buf = vec![0u8; PACKET_MAX_LENGTH * 16];
            let len = handle.read(&mut buf, idle.or(Some(self.poll())))?;
            let list = PacketList::new();
            if list.reset(&buf[..len]).is_ok()
                && let Some(reservation) = list.reserve()
            {
                handler.process(&reservation);
            }
            list.release();
            return self.print_records(out, handler.take());
        }

        handle.enable_receive(true)?;
        let local = self.config.link.local_buffer_size;
        if local > 0 {
            let (copier, ring) = DmaCopier::start(handle, local, self.poll())?;
            let result = self.dump_from(out, &mut Dispatcher::new(ring), &handler, idle);
            if let Some(mut handle) = copier.stop() {
                handle.enable_receive(false)?;
            }
            result
        } else {
            let mut dispatcher = Dispatcher::new(DirectRing::new(handle)?);
            let result = self.dump_from(out, &mut dispatcher, &handler, idle);
            let mut handle = dispatcher.into_ring().into_inner();
            handle.enable_receive(false)?;
            result
        }
    }

    fn dump_from<B: CircularBuffer>(
        &self,
        out: &mut dyn Write,
        dispatcher: &mut Dispatcher<B>,
        handler: &Arc<DumpHandler>,
        idle: Option<Duration>,
    ) -> ToolResult<()> {
        dispatcher.add_handler(handler.clone());
        let mut last_data = Instant::now();
        while !self.stop.load(Ordering::Relaxed) && !handler.done() {
            match dispatcher.dispatch_once(Some(self.poll())) {
                Ok(0) => std::thread::sleep(Duration::from_millis(1)),
                Ok(_) => last_data = Instant::now(),
                Err(LinkError::Timeout) => {}
                Err(e) => return Err(e.into()),
            }
            self.print_records(out, handler.take())?;
            if idle.is_some_and(|idle| last_data.elapsed() >= idle) {
                debug!("No data for {:?}, stopping", idle);
                break;
            }
        }
        let stats = dispatcher.stats();
        info!(
            "Dumped {} packets, {} bytes, {} resyncs",
            stats.packets, stats.bytes, stats.resyncs
        );
        Ok(())
    }

    fn print_records(&self, out: &mut dyn Write, records: Vec<PacketRecord>) -> ToolResult<()> {
        for record in records {
            if self.json {
                serde_json::to_writer(&mut *out, &record)?;
                writeln!(out)?;
            } else {
                writeln!(out, "{}", record.line())?;
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Broadcast DISCOVER and list the modules that answered within
    /// `window`.
    pub fn discover(&self, out: &mut dyn Write, window: Duration) -> ToolResult<()> {
        let mut handle = self.open()?;
        handle.enable_receive(true)?;
        let discovery = Arc::new(Discovery::new(Arc::new(handle.control())));
        let mut dispatcher = Dispatcher::new(DirectRing::new(handle)?);
        dispatcher.add_handler(discovery.clone());

        discovery.start()?;
        self.pump(&mut dispatcher, Instant::now() + window, || false)?;
        let mut handle = dispatcher.into_ring().into_inner();
        handle.enable_receive(false)?;

        let modules = discovery.modules();
        info!("Discovered {} modules", modules.len());
        if self.json {
            return self.write_json(out, &modules);
        }
        write_modules(out, &modules)?;
        Ok(())
    }

    /// Verify every configured DSP: DISCOVER, then READ_VERSION once the
    /// type matched.
    pub fn verify(&self, out: &mut dyn Write) -> ToolResult<()> {
        let mut handle = self.open()?;
        handle.enable_receive(true)?;
        let control = Arc::new(handle.control());
        let mut dispatcher = Dispatcher::new(DirectRing::new(handle)?);

        let mut commanders = Vec::new();
        for module in &self.config.modules {
            if !module.module_type.is_dsp() {
                warn!("Skipping {}: only DSP modules can be verified", module.name);
                continue;
            }
            let commander = ModuleCommander::new(module, control.clone(), DspHandler::new()?)?;
            dispatcher.add_handler(Arc::new(commander.clone()));
            commanders.push((module, commander));
        }

        for command in [Command::Discover, Command::ReadVersion] {
            let mut deadline = Instant::now();
            for (module, commander) in &commanders {
                let ready = command == Command::Discover
                    || commander.verify_state() == VerifyState::TypeOk;
                if ready {
                    commander.send_command(command, &[])?;
                    deadline = deadline.max(Instant::now() + response_window(module));
                }
            }
            self.pump(&mut dispatcher, deadline, || {
                commanders.iter().all(|(_, c)| !c.is_busy())
            })?;
        }
        let mut handle = dispatcher.into_ring().into_inner();
        handle.enable_receive(false)?;

        let reports: Vec<VerifyReport> = commanders
            .iter()
            .map(|(module, commander)| VerifyReport {
                name: module.name.clone(),
                hardware_id: module.hardware_id,
                state: commander.verify_state(),
                version: commander.with_handler(|h| h.version().copied()),
            })
            .collect();
        if self.json {
            return self.write_json(out, &reports);
        }
        for report in &reports {
            let firmware = report
                .version
                .map(|v| {
                    let fw = v.firmware;
                    format!(" firmware {}.{} {}", fw.version, fw.revision, fw.date())
                })
                .unwrap_or_default();
            writeln!(
                out,
                "{:<12} {:<16} {:?}{}",
                report.name,
                report.hardware_id.to_string(),
                report.state,
                firmware
            )?;
        }
        Ok(())
    }

    /// Dispatch until `deadline`, `done` holds or the stop flag is set.
    fn pump<B: CircularBuffer>(
        &self,
        dispatcher: &mut Dispatcher<B>,
        deadline: Instant,
        done: impl Fn() -> bool,
    ) -> ToolResult<()> {
        while !self.stop.load(Ordering::Relaxed) && !done() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            match dispatcher.dispatch_once(Some(left.min(self.poll()))) {
                Ok(0) => std::thread::sleep(Duration::from_millis(1)),
                Ok(_) | Err(LinkError::Timeout) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read `count` words from `bar` starting at byte `offset`.
    pub fn read_registers(
        &self,
        out: &mut dyn Write,
        bar: usize,
        offset: u32,
        count: usize,
    ) -> ToolResult<()> {
        let control = self.open()?.control();
        let mut words = vec![0u32; count];
        control.register_read(bar, offset as usize, &mut words)?;
        let values: Vec<RegisterValue> = words
            .iter()
            .zip((offset..).step_by(4))
            .map(|(&value, offset)| RegisterValue { offset, value })
            .collect();
        if self.json {
            return self.write_json(out, &values);
        }
        for v in &values {
            writeln!(out, "BAR{bar} {:#010x}: {:#010x}", v.offset, v.value)?;
        }
        Ok(())
    }

    /// Write `values` to `bar` starting at byte `offset`.
    pub fn write_registers(&self, bar: usize, offset: u32, values: &[u32]) -> ToolResult<()> {
        let control = self.open()?.control();
        control.register_write(bar, offset as usize, values)?;
        info!("Wrote {} words to BAR{} at {:#x}", values.len(), bar, offset);
        Ok(())
    }

    /// Reset the link.
    pub fn reset(&self) -> ToolResult<()> {
        self.open()?.reset()?;
        info!("Link reset");
        Ok(())
    }

    fn poll(&self) -> Duration {
        Duration::from_millis(self.config.link.wait_timeout_ms)
    }
}

fn response_window(module: &ModuleConfig) -> Duration {
    Duration::from_millis(module.response_timeout_ms) + Duration::from_millis(100)
}

fn write_status(out: &mut dyn Write, s: &OccStatus) -> std::io::Result<()> {
    writeln!(out, "Board:            {:?}", s.board)?;
    writeln!(out, "Interface:        {:?}", s.interface)?;
    writeln!(out, "Hardware version: {:#x}", s.hardware_ver)?;
    writeln!(out, "Firmware version: {:#x} ({:#010x})", s.firmware_ver, s.firmware_date)?;
    writeln!(out, "FPGA serial:      {:#018x}", s.fpga_serial)?;
    writeln!(out, "RX enabled:       {}", s.rx_enabled)?;
    writeln!(out, "Error packets:    {}", s.err_packets_enabled)?;
    writeln!(out, "Stalled:          {}", s.stalled)?;
    writeln!(out, "Overflowed:       {}", s.overflowed)?;
    writeln!(
        out,
        "Optical:          signal={} present={} fault={}",
        s.optical_signal, s.optical_present, s.optical_fault
    )?;
    writeln!(out, "DMA buffer:       {} / {} bytes", s.dma_used, s.dma_size)?;
    writeln!(out, "RX rate:          {} B/s", s.rx_rate)?;
    writeln!(
        out,
        "Errors:           crc={} length={} frame={}",
        s.err_crc, s.err_length, s.err_frame
    )?;
    writeln!(
        out,
        "FPGA:             {:.1} C, core {:.2} V, aux {:.2} V",
        s.fpga_temp, s.fpga_core_volt, s.fpga_aux_volt
    )
}

fn write_modules(out: &mut dyn Write, modules: &[DiscoveredModule]) -> std::io::Result<()> {
    for m in modules {
        let parent = m.parent.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        write!(
            out,
            "{:<16} {:<8} parent={}",
            m.hardware_id.to_string(),
            m.module_type.to_string(),
            parent
        )?;
        if let Some(version) = m.version {
            write!(out, " firmware={}", version.firmware.date())?;
        }
        writeln!(out)?;
    }
    Ok(())
}
