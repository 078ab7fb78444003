//! Hardware ids: 32-bit module addresses written like IPv4 addresses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// Error parsing a hardware id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid hardware id '{0}', expected dotted quad or 0x-prefixed hex")]
pub struct HwidParseError(pub String);

/// 32-bit module address.
///
/// Parses from `"21.50.85.1"`, `"0x15325501"` or a plain decimal number
/// and always displays as a dotted quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareId(pub u32);

impl HardwareId {
    /// Raw address.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl FromStr for HardwareId {
    type Err = HwidParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let trimmed = text.trim();
        let parsed = if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            u32::from_str_radix(hex, 16).ok()
        } else if trimmed.contains('.') {
            trimmed.parse::<Ipv4Addr>().ok().map(u32::from)
        } else {
            trimmed.parse::<u32>().ok()
        };
        parsed
            .map(HardwareId)
            .ok_or_else(|| HwidParseError(text.to_string()))
    }
}

impl TryFrom<String> for HardwareId {
    type Error = HwidParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HardwareId> for String {
    fn from(value: HardwareId) -> Self {
        value.to_string()
    }
}

impl From<u32> for HardwareId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Ipv4Addr::from(self.0))
    }
}
