//! OCC Common Library
//!
//! This crate provides the wire codec, shared constants and configuration
//! loading utilities for all OCC workspace crates.
//!
//! # Module Structure
//!
//! - [`packet`] - Packet header, info words, LVDS framing and RTDL header
//! - [`hwid`] - Hardware id parsing and formatting
//! - [`consts`] - Packet size limits and reserved addresses
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use occ_common::prelude::*;
//!
//! let pkt = Packet::create_lvds(0x0A00_0001, Command::ReadStatus, 0, &[]).unwrap();
//! let view = pkt.view();
//! assert!(view.is_passthru());
//! assert_eq!(view.length(), 24 + 8);
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod consts;
pub mod hwid;
pub mod packet;
pub mod prelude;
