//! # OCC Module Protocol
//!
//! Talking to the front-end modules behind a link adapter: one command at
//! a time per module, responses matched by source address and command,
//! unanswered commands timed out, and module identity verified through a
//! small state machine.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌──────────────────┐
//! │   Dispatcher    │    │ ModuleCommander │    │  ResponseHandler │
//! │                 │    │                 │    │                  │
//! │ ring ─► packets ├───►│ match + cancel  ├───►│ DspHandler, ...  │
//! │ fan-out         │    │ timer, verify   │    │ params, version  │
//! └────────┬────────┘    └────────┬────────┘    └──────────────────┘
//!          │                      │
//!   ┌──────┴──────┐        ┌──────┴──────┐
//!   │  Discovery  │        │ CommandSink │──► OccControl::send
//!   └─────────────┘        └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use occ_module::{Dispatcher, DspHandler, ModuleCommander};
//! use occ::config::{Interface, LinkKind, ModuleConfig};
//! use occ::packet::command::{Command, ModuleType};
//! use occ_link::{DmaCopier, OccHandle, Transport};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut handle = OccHandle::open("/dev/snsocb0", LinkKind::Hardware, Interface::Optical)?;
//! handle.enable_receive(true)?;
//! let control = handle.control();
//! let (_copier, ring) = DmaCopier::start(handle, 4 << 20, Duration::from_millis(100))?;
//!
//! let config = ModuleConfig {
//!     name: "dsp1".into(),
//!     hardware_id: "21.50.85.1".parse()?,
//!     module_type: ModuleType::Dsp,
//!     link: None,
//!     response_timeout_ms: 1000,
//! };
//! let dsp = ModuleCommander::new(&config, Arc::new(control), DspHandler::new()?)?;
//! let mut dispatcher = Dispatcher::new(ring);
//! dispatcher.add_handler(Arc::new(dsp.clone()));
//!
//! dsp.send_command(Command::Discover, &[])?;
//! dispatcher.dispatch_once(Some(Duration::from_secs(1)))?;
//! println!("{:?}", dsp.verify_state());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod commander;
pub mod discover;
pub mod dispatcher;
pub mod dsp;
pub mod error;
pub mod params;
pub mod state_machine;
pub mod timer;
pub mod verify;

pub use commander::{CommandSink, ModuleCommander, Outcome, ResponseHandler};
pub use discover::{DiscoveredModule, Discovery};
pub use dispatcher::{DispatchStats, Dispatcher, PacketHandler};
pub use dsp::{ComponentVersion, DspHandler, DspVersion};
pub use error::{ModuleError, ModuleResult};
pub use params::{ConfigParam, ConfigTable, StatusParam, StatusTable};
pub use state_machine::StateMachine;
pub use timer::Timer;
pub use verify::{VerifyAction, VerifyState, verify_machine};
