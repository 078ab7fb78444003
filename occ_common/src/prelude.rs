//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use occ_common::prelude::*;` and get
//! the most important types without listing individual paths.

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ConfigError, ConfigLoader, Interface, LinkConfig, LinkKind, ModuleConfig, ModuleLink,
    OccConfig, SharedConfig,
};

// ─── Protocol Constants ─────────────────────────────────────────────
pub use crate::consts::{
    ALIGNMENT, HEADER_LEN, HWID_BROADCAST, HWID_SELF, PACKET_MAX_LENGTH, PACKET_MIN_LENGTH,
};

// ─── Wire Codec ─────────────────────────────────────────────────────
pub use crate::hwid::HardwareId;
pub use crate::packet::command::{Command, ModuleType};
pub use crate::packet::info::{CommandFlags, CommandInfo, DataFlags, DataInfo, Info};
pub use crate::packet::lvds::{Addressing, LvdsCommand};
pub use crate::packet::rtdl::{CycleVeto, NeutronEvent, PulseFlavor, RtdlHeader};
pub use crate::packet::{CodecError, CodecResult, Packet, PacketRef, Words};
