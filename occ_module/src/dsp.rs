//! Detector signal processor: version decoding, parameter tables and the
//! response handler used while verifying a DSP.

use crate::commander::ResponseHandler;
use crate::error::ModuleResult;
use crate::params::{ConfigTable, StatusTable};
use crate::verify::VerifyAction;
use heapless::String as FixedString;
use occ::packet::command::Command;
use occ::packet::{PacketRef, Words};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;
use tracing::{debug, warn};

/// How long a DSP gets to answer a command.
pub const DSP_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Payload words of a READ_VERSION response.
const VERSION_WORDS: usize = 4;

/// Rendered `YYYY/M/D` date.
pub type DateString = FixedString<16>;

/// Two BCD digits to their decimal value.
fn bcd(byte: u32) -> u32 {
    let byte = byte & 0xFF;
    (byte / 16) * 10 + byte % 16
}

/// Version and build date of one hardware or firmware component.
///
/// Packed as `day:8 | month:8 | year:8 | revision:4 | version:4`, least
/// significant bits first, with BCD encoded date fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComponentVersion {
    /// Major version.
    pub version: u8,
    /// Revision.
    pub revision: u8,
    /// Four digit year.
    pub year: u16,
    /// Month.
    pub month: u8,
    /// Day of month.
    pub day: u8,
}

impl ComponentVersion {
    /// Decode one packed version word.
    pub fn from_word(word: u32) -> Self {
        Self {
            day: bcd(word) as u8,
            month: bcd(word >> 8) as u8,
            year: 2000 + bcd(word >> 16) as u16,
            revision: ((word >> 24) & 0xF) as u8,
            version: ((word >> 28) & 0xF) as u8,
        }
    }

    /// Build date as `YYYY/M/D`.
    pub fn date(&self) -> DateString {
        let mut out = DateString::new();
        // Three bounded integers always fit.
        let _ = write!(out, "{}/{}/{}", self.year, self.month, self.day);
        out
    }
}

/// Decoded READ_VERSION response of a DSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DspVersion {
    /// Board version.
    pub hardware: ComponentVersion,
    /// Firmware version.
    pub firmware: ComponentVersion,
    /// First EEPROM identification word.
    pub eeprom_code1: u32,
    /// Second EEPROM identification word.
    pub eeprom_code2: u32,
}

impl DspVersion {
    /// Decode a response payload, which must be exactly four words.
    pub fn parse(payload: &Words<'_>) -> Option<Self> {
        if payload.len() != VERSION_WORDS || payload.as_bytes().len() != VERSION_WORDS * 4 {
            return None;
        }
        Some(Self {
            hardware: ComponentVersion::from_word(payload.get(0)?),
            firmware: ComponentVersion::from_word(payload.get(1)?),
            eeprom_code1: payload.get(2)?,
            eeprom_code2: payload.get(3)?,
        })
    }
}

const STATUS_FIELDS: &[(&str, usize, u32, u32)] = &[
    ("Configured", 0x0, 1, 0),
    ("AcquireStat", 0x0, 1, 1),
    ("ProgramErr", 0x0, 1, 2),
    ("PktLenErr", 0x0, 1, 3),
    ("UnknwnCmdErr", 0x0, 1, 4),
    ("LvdsTxFifFul", 0x0, 1, 5),
    ("LvdsCmdErr", 0x0, 1, 6),
    ("EepromInitOk", 0x0, 1, 7),
    ("FoTransStatA", 0x0, 5, 16),
    ("FoTransOutA", 0x0, 2, 22),
    ("FoTransStatB", 0x0, 5, 24),
    ("FoTransOutB", 0x0, 2, 30),
    ("RxNumErrsA", 0x1, 8, 0),
    ("RxErrFlagsA", 0x1, 13, 8),
    ("RxGoodPacketA", 0x1, 1, 21),
];

const CONFIG_FIELDS: &[(&str, char, usize, u32, u32, u32)] = &[
    ("PixIdOffset", 'B', 0x0, 32, 0, 0),
    ("Chop0Delay", 'C', 0x0, 32, 0, 0),
    ("Chop1Delay", 'C', 0x1, 32, 0, 0),
    ("Chop0Freq", 'C', 0x8, 4, 0, 0),
    ("Chop1Freq", 'C', 0x8, 4, 4, 0),
    ("ChopDutyCycl", 'C', 0x9, 32, 0, 83400),
    ("ChopMaxPerio", 'C', 0xA, 32, 0, 166800),
    ("ChopFixedOff", 'C', 0xB, 32, 0, 0),
    ("ChopRtdlFr6", 'C', 0xC, 8, 0, 4),
    ("ChopRtdlFr7", 'C', 0xC, 8, 8, 5),
    ("ChopTrefTrig", 'C', 0x13, 2, 0, 1),
    ("ChopTrefFreq", 'C', 0x13, 4, 2, 0),
    ("ChopSweepEn", 'C', 0x13, 1, 31, 0),
    ("STsyncDelMax", 'C', 0x14, 32, 0, 0),
];

/// Status fields of a DSP READ_STATUS response.
pub fn status_table() -> ModuleResult<StatusTable> {
    let mut table = StatusTable::new();
    for &(name, offset, width, shift) in STATUS_FIELDS {
        table.add(name, offset, width, shift)?;
    }
    Ok(table)
}

/// Configuration fields of a DSP WRITE_CONFIG block.
pub fn config_table() -> ModuleResult<ConfigTable> {
    let mut table = ConfigTable::new();
    for &(name, section, offset, width, shift, default) in CONFIG_FIELDS {
        table.add(name, section, offset, width, shift, default)?;
    }
    Ok(table)
}

/// Response handler for a DSP.
///
/// DISCOVER confirms the module type, READ_VERSION is decoded and checked
/// against an optional expected firmware version, READ_STATUS updates the
/// status values.
#[derive(Debug)]
pub struct DspHandler {
    status: StatusTable,
    config: ConfigTable,
    expected_firmware: Option<(u8, u8)>,
    version: Option<DspVersion>,
    values: BTreeMap<String, u32>,
}

impl DspHandler {
    /// Handler with the standard DSP tables.
    pub fn new() -> ModuleResult<Self> {
        Ok(Self {
            status: status_table()?,
            config: config_table()?,
            expected_firmware: None,
            version: None,
            values: BTreeMap::new(),
        })
    }

    /// Reject firmware other than `version.revision`.
    pub fn expect_firmware(mut self, version: u8, revision: u8) -> Self {
        self.expected_firmware = Some((version, revision));
        self
    }

    /// Last decoded version.
    pub fn version(&self) -> Option<&DspVersion> {
        self.version.as_ref()
    }

    /// Values from the last status response.
    pub fn status_values(&self) -> &BTreeMap<String, u32> {
        &self.values
    }

    /// Configuration values, changed with [`ConfigTable::set`].
    pub fn config(&mut self) -> &mut ConfigTable {
        &mut self.config
    }

    /// WRITE_CONFIG payload for the current configuration.
    pub fn config_payload(&self) -> Vec<u32> {
        self.config.pack()
    }

    fn check_version(&mut self, packet: &PacketRef<'_>) -> VerifyAction {
        let Some(version) = DspVersion::parse(&packet.payload()) else {
            warn!(
                "Bad READ_VERSION payload length {} from {:#010x}",
                packet.payload_length(),
                packet.source_address()
            );
            return VerifyAction::VersionErr;
        };
        self.version = Some(version);
        match self.expected_firmware {
            Some((v, r)) if (version.firmware.version, version.firmware.revision) != (v, r) => {
                warn!(
                    "Unsupported DSP firmware {}.{}, expected {}.{}",
                    version.firmware.version, version.firmware.revision, v, r
                );
                VerifyAction::VersionErr
            }
            _ => VerifyAction::VersionOk,
        }
    }
}

impl ResponseHandler for DspHandler {
    fn handle_response(&mut self, command: Command, packet: &PacketRef<'_>) -> Option<VerifyAction> {
        if packet.command() == Some(Command::Nack) {
            debug!("{} rejected by {:#010x}", command, packet.source_address());
            return None;
        }
        match command {
            Command::Discover => Some(match packet.module_type() {
                Some(t) if t.is_dsp() => VerifyAction::DiscoverOk,
                other => {
                    warn!("Expected a DSP, module reports {:?}", other);
                    VerifyAction::DiscoverErr
                }
            }),
            Command::ReadVersion => Some(self.check_version(packet)),
            Command::ReadStatus => {
                self.values = self.status.extract(&packet.payload());
                None
            }
            _ => None,
        }
    }
}
