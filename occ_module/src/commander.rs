//! Command/response cycle with one front-end module.
//!
//! At most one command is outstanding per module. Sending arms a response
//! timer; a matching response cancels it and runs the module's
//! [`ResponseHandler`], an expired timer clears the outstanding command
//! instead. Both paths end in exactly one [`Outcome`] per command, handed
//! to the listener.
//!
//! ```text
//!   send_command ──► sink.send ──► timer armed ──┬─► response: cancel won ──► handler ──► Outcome::Response
//!                                                └─► timer expired         ─────────────► Outcome::Timeout
//! ```

use crate::dispatcher::PacketHandler;
use crate::error::{ModuleError, ModuleResult};
use crate::state_machine::StateMachine;
use crate::timer::Timer;
use crate::verify::{VerifyAction, VerifyState, verify_machine};
use occ::config::{ModuleConfig, ModuleLink};
use occ::hwid::HardwareId;
use occ::packet::command::{Command, ModuleType};
use occ::packet::{Packet, PacketRef};
use occ_link::{LinkControl, LinkError, LinkResult, OccControl, Reservation};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where outgoing command packets go.
pub trait CommandSink: Send + Sync {
    /// Transmit one packet.
    fn send_packet(&self, packet: &Packet) -> LinkResult<usize>;
}

impl CommandSink for OccControl {
    fn send_packet(&self, packet: &Packet) -> LinkResult<usize> {
        self.send(packet.as_bytes())
    }
}

/// Module specific response processing.
pub trait ResponseHandler: Send {
    /// Process the response to `command`, returning the verification
    /// event it represents, if any.
    fn handle_response(&mut self, command: Command, packet: &PacketRef<'_>) -> Option<VerifyAction>;
}

impl<F> ResponseHandler for F
where
    F: FnMut(Command, &PacketRef<'_>) -> Option<VerifyAction> + Send,
{
    fn handle_response(&mut self, command: Command, packet: &PacketRef<'_>) -> Option<VerifyAction> {
        self(command, packet)
    }
}

/// Terminal result of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The module answered.
    Response {
        /// Command that was answered.
        command: Command,
        /// Verification event produced by the handler.
        action: Option<VerifyAction>,
    },
    /// The response timer expired first.
    Timeout {
        /// Command left unanswered.
        command: Command,
    },
}

type Listener = Box<dyn Fn(&Outcome) + Send + Sync>;

struct Pending {
    command: Command,
    sequence: u64,
}

struct Protocol {
    pending: Option<Pending>,
    sequence: u64,
    verify: StateMachine<VerifyState, VerifyAction>,
}

struct Inner<H> {
    name: String,
    address: HardwareId,
    module_type: ModuleType,
    link: ModuleLink,
    timeout: Duration,
    sink: Arc<dyn CommandSink>,
    protocol: Mutex<Protocol>,
    handler: Mutex<H>,
    listener: Mutex<Option<Listener>>,
    timer: Timer,
}

impl<H> Inner<H> {
    fn notify(&self, outcome: &Outcome) {
        if let Some(listener) = self.listener.lock().as_ref() {
            listener(outcome);
        }
    }

    fn expire(&self, sequence: u64) {
        let command = {
            let mut protocol = self.protocol.lock();
            match protocol.pending.take() {
                Some(pending) if pending.sequence == sequence => {
                    protocol.verify.transition(VerifyAction::Timeout);
                    pending.command
                }
                other => {
                    protocol.pending = other;
                    return;
                }
            }
        };
        warn!(
            "{}: no response to {} within {:?}",
            self.name, command, self.timeout
        );
        self.notify(&Outcome::Timeout { command });
    }
}

fn expiry<H: Send + 'static>(
    inner: Weak<Inner<H>>,
    sequence: u64,
) -> impl FnMut() -> Option<Duration> + Send + 'static {
    move || {
        if let Some(inner) = inner.upgrade() {
            inner.expire(sequence);
        }
        None
    }
}

/// Sends commands to one module and matches its responses.
pub struct ModuleCommander<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for ModuleCommander<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: ResponseHandler + 'static> ModuleCommander<H> {
    /// Commander for the module described by `config`.
    pub fn new(config: &ModuleConfig, sink: Arc<dyn CommandSink>, handler: H) -> ModuleResult<Self> {
        let timer = Timer::new(&config.name).map_err(LinkError::from)?;
        info!(
            "Module {} at {} ({}, {:?} link)",
            config.name,
            config.hardware_id,
            config.module_type,
            config.link()
        );
        Ok(Self {
            inner: Arc::new(Inner {
                name: config.name.clone(),
                address: config.hardware_id,
                module_type: config.module_type,
                link: config.link(),
                timeout: Duration::from_millis(config.response_timeout_ms),
                sink,
                protocol: Mutex::new(Protocol {
                    pending: None,
                    sequence: 0,
                    verify: verify_machine(),
                }),
                handler: Mutex::new(handler),
                listener: Mutex::new(None),
                timer,
            }),
        })
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Module address.
    pub fn address(&self) -> HardwareId {
        self.inner.address
    }

    /// Configured module type.
    pub fn module_type(&self) -> ModuleType {
        self.inner.module_type
    }

    /// Response timeout.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Receive every [`Outcome`].
    pub fn set_listener<F>(&self, listener: F)
    where
        F: Fn(&Outcome) + Send + Sync + 'static,
    {
        *self.inner.listener.lock() = Some(Box::new(listener));
    }

    /// Command waiting for a response.
    pub fn outstanding(&self) -> Option<Command> {
        self.inner.protocol.lock().pending.as_ref().map(|p| p.command)
    }

    /// True while a command is outstanding.
    pub fn is_busy(&self) -> bool {
        self.outstanding().is_some()
    }

    /// Current verification state.
    pub fn verify_state(&self) -> VerifyState {
        self.inner.protocol.lock().verify.current()
    }

    /// Start verification over.
    pub fn restart_verification(&self) {
        self.inner.protocol.lock().verify.force(VerifyState::Init);
    }

    /// Run `f` on the response handler.
    pub fn with_handler<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.inner.handler.lock())
    }

    /// Build the packet carrying `command` for this module.
    pub fn build_packet(&self, command: Command, channel: u8, payload: &[u32]) -> ModuleResult<Packet> {
        let address = self.inner.address.raw();
        let packet = match self.inner.link {
            ModuleLink::Direct => Packet::create_occ(address, command, channel, payload)?,
            ModuleLink::Lvds => {
                let bytes: Vec<u8> = payload.iter().flat_map(|w| w.to_le_bytes()).collect();
                Packet::create_lvds(address, command, channel, &bytes)?
            }
        };
        Ok(packet)
    }

    /// Send `command` and arm the response timer.
    pub fn send_command(&self, command: Command, payload: &[u32]) -> ModuleResult<()> {
        self.send_channel_command(command, 0, payload)
    }

    /// Send `command` to one channel of the module. `channel` is one
    /// based, 0 addresses the whole module.
    pub fn send_channel_command(&self, command: Command, channel: u8, payload: &[u32]) -> ModuleResult<()> {
        let inner = &self.inner;
        let mut protocol = inner.protocol.lock();
        if let Some(pending) = &protocol.pending {
            return Err(ModuleError::Busy {
                module: inner.address,
                outstanding: pending.command,
            });
        }

        let packet = self.build_packet(command, channel, payload)?;
        inner.sink.send_packet(&packet)?;

        protocol.sequence += 1;
        let sequence = protocol.sequence;
        protocol.pending = Some(Pending { command, sequence });

        let weak = Arc::downgrade(inner);
        if !inner.timer.schedule(inner.timeout, expiry(weak.clone(), sequence)) {
            warn!("{}: replacing a stale response timer", inner.name);
            inner.timer.cancel();
            inner.timer.schedule(inner.timeout, expiry(weak, sequence));
        }
        debug!("{}: sent {} ({} bytes)", inner.name, command, packet.as_bytes().len());
        Ok(())
    }

    /// Offer a received packet. Returns `true` if it completed the
    /// outstanding command.
    pub fn handle_packet(&self, packet: &PacketRef<'_>) -> bool {
        let inner = &self.inner;
        if !packet.is_response() || packet.source_address() != inner.address.raw() {
            return false;
        }
        let Some(response) = packet.response_type() else {
            return false;
        };

        let command = {
            let mut protocol = inner.protocol.lock();
            let Some(pending) = protocol.pending.as_ref() else {
                debug!("{}: unsolicited {} response", inner.name, response);
                return false;
            };
            if pending.command != response {
                warn!(
                    "{}: got {} response while waiting for {}",
                    inner.name, response, pending.command
                );
                return false;
            }
            if !inner.timer.cancel() {
                debug!("{}: {} response arrived after its timeout", inner.name, response);
                return false;
            }
            protocol.pending = None;
            response
        };

        let action = inner.handler.lock().handle_response(command, packet);
        if let Some(action) = action {
            let mut protocol = inner.protocol.lock();
            let from = protocol.verify.current();
            if protocol.verify.transition(action) {
                debug!("{}: {:?} -> {:?}", inner.name, from, protocol.verify.current());
            }
        }
        inner.notify(&Outcome::Response { command, action });
        true
    }
}

impl<H: ResponseHandler + 'static> PacketHandler for ModuleCommander<H> {
    fn process(&self, packets: &Reservation<'_, &[u8]>) {
        for packet in packets.packets() {
            self.handle_packet(&packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use occ::packet::info::{CommandFlags, CommandInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Packet>>,
    }

    impl CommandSink for Recorder {
        fn send_packet(&self, packet: &Packet) -> LinkResult<usize> {
            self.sent.lock().push(packet.clone());
            Ok(packet.as_bytes().len())
        }
    }

    fn config(module_type: ModuleType, timeout_ms: u64) -> ModuleConfig {
        ModuleConfig {
            name: "dsp1".to_string(),
            hardware_id: HardwareId(0x1532_5501),
            module_type,
            link: None,
            response_timeout_ms: timeout_ms,
        }
    }

    fn response(source: u32, command: Command, module_type: ModuleType) -> Packet {
        let mut info = CommandInfo::new(command);
        info.flags |= CommandFlags::IS_RESPONSE;
        info.selector = module_type.into();
        Packet::new(0, source, info.to_raw(), &[]).unwrap()
    }

    fn discover_ok(_: Command, pkt: &PacketRef<'_>) -> Option<VerifyAction> {
        Some(if pkt.module_type() == Some(ModuleType::Dsp) {
            VerifyAction::DiscoverOk
        } else {
            VerifyAction::DiscoverErr
        })
    }

    #[test]
    fn second_command_is_busy() {
        let sink = Arc::new(Recorder::default());
        let cmd = ModuleCommander::new(&config(ModuleType::Dsp, 1000), sink.clone(), discover_ok).unwrap();
        cmd.send_command(Command::Discover, &[]).unwrap();
        assert!(matches!(
            cmd.send_command(Command::ReadVersion, &[]),
            Err(ModuleError::Busy { outstanding: Command::Discover, .. })
        ));
        assert_eq!(sink.sent.lock().len(), 1);
    }

    #[test]
    fn dsp_commands_are_direct() {
        let sink = Arc::new(Recorder::default());
        let cmd = ModuleCommander::new(&config(ModuleType::Dsp, 1000), sink.clone(), discover_ok).unwrap();
        cmd.send_command(Command::ReadStatus, &[]).unwrap();
        let sent = sink.sent.lock();
        let view = sent[0].view();
        assert!(!view.is_passthru());
        assert_eq!(view.destination(), 0x1532_5501);
    }

    #[test]
    fn submodule_commands_pass_through() {
        let sink = Arc::new(Recorder::default());
        let cmd = ModuleCommander::new(&config(ModuleType::Roc, 1000), sink.clone(), discover_ok).unwrap();
        cmd.send_command(Command::ReadStatus, &[]).unwrap();
        let sent = sink.sent.lock();
        assert!(sent[0].view().is_passthru());
        assert_eq!(sent[0].view().destination(), 0);
    }

    #[test]
    fn matching_response_completes_command() {
        let sink = Arc::new(Recorder::default());
        let cmd = ModuleCommander::new(&config(ModuleType::Dsp, 1000), sink, discover_ok).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        cmd.set_listener(move |o| log.lock().push(*o));

        cmd.send_command(Command::Discover, &[]).unwrap();
        let other = response(0x0102_0304, Command::Discover, ModuleType::Dsp);
        assert!(!cmd.handle_packet(&other.view()));
        let wrong = response(0x1532_5501, Command::ReadVersion, ModuleType::Dsp);
        assert!(!cmd.handle_packet(&wrong.view()));
        assert!(cmd.is_busy());

        let pkt = response(0x1532_5501, Command::Discover, ModuleType::Dsp);
        assert!(cmd.handle_packet(&pkt.view()));
        assert!(!cmd.is_busy());
        assert_eq!(cmd.verify_state(), VerifyState::TypeOk);
        assert_eq!(
            seen.lock().as_slice(),
            &[Outcome::Response {
                command: Command::Discover,
                action: Some(VerifyAction::DiscoverOk)
            }]
        );
        assert!(!cmd.handle_packet(&pkt.view()));
    }

    #[test]
    fn timeout_clears_and_reports() {
        let sink = Arc::new(Recorder::default());
        let cmd = ModuleCommander::new(&config(ModuleType::Dsp, 20), sink, discover_ok).unwrap();
        let timeouts = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&timeouts);
        cmd.set_listener(move |o| {
            if matches!(o, Outcome::Timeout { .. }) {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        cmd.send_command(Command::Discover, &[]).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        assert!(!cmd.is_busy());
        assert_eq!(cmd.verify_state(), VerifyState::Timeout);

        let late = response(0x1532_5501, Command::Discover, ModuleType::Dsp);
        assert!(!cmd.handle_packet(&late.view()));
        cmd.send_command(Command::Discover, &[]).unwrap();
    }
}
