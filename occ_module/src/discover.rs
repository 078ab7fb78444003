//! Topology discovery.
//!
//! A broadcast DISCOVER reaches every DSP on the optical link. Each DSP
//! answers with the ids of the submodules it relays for; those are then
//! asked one by one with an LVDS DISCOVER, since a broadcast LVDS
//! DISCOVER is not answered by every module type. DSPs are also asked for
//! their version.

use crate::commander::CommandSink;
use crate::dispatcher::PacketHandler;
use crate::dsp::DspVersion;
use crate::error::ModuleResult;
use occ::consts::HWID_BROADCAST;
use occ::hwid::HardwareId;
use occ::packet::command::{Command, ModuleType};
use occ::packet::{CodecResult, Packet, PacketRef};
use occ_link::Reservation;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One module found on the link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredModule {
    /// Module address.
    pub hardware_id: HardwareId,
    /// Reported type.
    pub module_type: ModuleType,
    /// DSP relaying for the module, `None` for modules on the optical link.
    pub parent: Option<HardwareId>,
    /// Decoded version, DSPs only.
    pub version: Option<DspVersion>,
}

/// Collects DISCOVER responses and issues the follow-up requests.
pub struct Discovery {
    sink: Arc<dyn CommandSink>,
    modules: Mutex<BTreeMap<u32, DiscoveredModule>>,
}

impl Discovery {
    /// Discovery sending through `sink`.
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        Self {
            sink,
            modules: Mutex::new(BTreeMap::new()),
        }
    }

    /// Forget earlier results and broadcast DISCOVER.
    pub fn start(&self) -> ModuleResult<()> {
        self.modules.lock().clear();
        let packet = Packet::create_occ(HWID_BROADCAST, Command::Discover, 0, &[])?;
        self.sink.send_packet(&packet)?;
        info!("Discovery started");
        Ok(())
    }

    /// Modules found so far, ordered by address.
    pub fn modules(&self) -> Vec<DiscoveredModule> {
        self.modules.lock().values().cloned().collect()
    }

    /// Number of modules found so far.
    pub fn len(&self) -> usize {
        self.modules.lock().len()
    }

    /// True until the first module answered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn send(&self, packet: CodecResult<Packet>) -> ModuleResult<()> {
        self.sink.send_packet(&packet?)?;
        Ok(())
    }

    /// Record a response. Returns `true` if the packet was a DISCOVER or
    /// READ_VERSION response.
    pub fn handle_packet(&self, packet: &PacketRef<'_>) -> bool {
        if !packet.is_response() {
            return false;
        }
        let Some(module_type) = packet.module_type() else {
            return false;
        };
        let source = packet.source_address();

        match packet.command() {
            Some(Command::Discover) => {
                let (parent, followups) = if module_type.is_dsp() && !packet.is_passthru() {
                    let mut followups: Vec<_> = packet
                        .payload()
                        .iter()
                        .map(|id| Packet::create_lvds(id, Command::Discover, 0, &[]))
                        .collect();
                    followups.push(Packet::create_occ(source, Command::ReadVersion, 0, &[]));
                    (None, followups)
                } else if packet.is_passthru() {
                    (Some(HardwareId(packet.router_address())), Vec::new())
                } else {
                    (None, Vec::new())
                };

                debug!("Discovered {} at {}", module_type, HardwareId(source));
                self.modules.lock().insert(
                    source,
                    DiscoveredModule {
                        hardware_id: HardwareId(source),
                        module_type,
                        parent,
                        version: None,
                    },
                );
                for followup in followups {
                    if let Err(e) = self.send(followup) {
                        warn!("Discovery follow-up for {} failed: {}", HardwareId(source), e);
                    }
                }
                true
            }
            Some(Command::ReadVersion) => {
                let mut modules = self.modules.lock();
                if let Some(module) = modules.get_mut(&source)
                    && module.module_type.is_dsp()
                {
                    module.version = DspVersion::parse(&packet.payload());
                }
                true
            }
            _ => false,
        }
    }
}

impl PacketHandler for Discovery {
    fn process(&self, packets: &Reservation<'_, &[u8]>) {
        for packet in packets.packets() {
            self.handle_packet(&packet);
        }
    }
}
