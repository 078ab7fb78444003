//! Named bit fields inside response and configuration payloads.
//!
//! A status descriptor picks `width` bits at `shift` out of payload word
//! `offset`. Configuration descriptors additionally belong to a section;
//! a WRITE_CONFIG payload is the concatenation of all sections in
//! alphabetical order, each as long as its highest used word.

use crate::error::{ModuleError, ModuleResult};
use occ::packet::Words;
use std::collections::{BTreeMap, HashMap};

fn check_field(name: &str, width: u32, shift: u32) -> ModuleResult<()> {
    if width == 0 {
        return Err(ModuleError::invalid_param(name, "width must be positive"));
    }
    if shift + width > 32 {
        return Err(ModuleError::invalid_param(
            name,
            format!("shift {shift} + width {width} exceeds 32 bits"),
        ));
    }
    Ok(())
}

fn mask(width: u32) -> u32 {
    if width >= 32 { u32::MAX } else { (1 << width) - 1 }
}

/// Read-only field of a status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusParam {
    /// Parameter name.
    pub name: String,
    /// Payload word index.
    pub offset: usize,
    /// Field width in bits.
    pub width: u32,
    /// Lowest bit of the field.
    pub shift: u32,
}

impl StatusParam {
    /// Value of this field in `payload`, `None` if the word is missing.
    pub fn extract(&self, payload: &Words<'_>) -> Option<u32> {
        payload
            .get(self.offset)
            .map(|word| (word >> self.shift) & mask(self.width))
    }
}

/// Ordered set of status fields.
#[derive(Debug, Clone, Default)]
pub struct StatusTable {
    params: Vec<StatusParam>,
}

impl StatusTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field of `width` bits at `shift` in word `offset`.
    pub fn add(&mut self, name: &str, offset: usize, width: u32, shift: u32) -> ModuleResult<&mut Self> {
        check_field(name, width, shift)?;
        if self.params.iter().any(|p| p.name == name) {
            return Err(ModuleError::invalid_param(name, "defined twice"));
        }
        self.params.push(StatusParam {
            name: name.to_string(),
            offset,
            width,
            shift,
        });
        Ok(self)
    }

    /// Descriptors in definition order.
    pub fn params(&self) -> &[StatusParam] {
        &self.params
    }

    /// Payload words a complete response must carry.
    pub fn payload_words(&self) -> usize {
        self.params.iter().map(|p| p.offset + 1).max().unwrap_or(0)
    }

    /// Decode every field present in `payload`.
    pub fn extract(&self, payload: &Words<'_>) -> BTreeMap<String, u32> {
        self.params
            .iter()
            .filter_map(|p| p.extract(payload).map(|v| (p.name.clone(), v)))
            .collect()
    }
}

/// Writable field of a configuration block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigParam {
    /// Parameter name.
    pub name: String,
    /// Section letter or digit.
    pub section: char,
    /// Word index within the section.
    pub offset: usize,
    /// Field width in bits.
    pub width: u32,
    /// Lowest bit of the field.
    pub shift: u32,
    /// Value used until [`ConfigTable::set`] is called.
    pub default: u32,
}

/// Configuration fields with their current values.
#[derive(Debug, Clone, Default)]
pub struct ConfigTable {
    params: Vec<ConfigParam>,
    values: HashMap<String, u32>,
}

impl ConfigTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. `default` must fit in `width` bits.
    pub fn add(
        &mut self,
        name: &str,
        section: char,
        offset: usize,
        width: u32,
        shift: u32,
        default: u32,
    ) -> ModuleResult<&mut Self> {
        check_field(name, width, shift)?;
        if !section.is_ascii_alphanumeric() {
            return Err(ModuleError::invalid_param(
                name,
                format!("section '{section}' must be a letter or digit"),
            ));
        }
        if default & !mask(width) != 0 {
            return Err(ModuleError::invalid_param(
                name,
                format!("default {default} does not fit in {width} bits"),
            ));
        }
        if self.params.iter().any(|p| p.name == name) {
            return Err(ModuleError::invalid_param(name, "defined twice"));
        }
        self.params.push(ConfigParam {
            name: name.to_string(),
            section,
            offset,
            width,
            shift,
            default,
        });
        Ok(self)
    }

    /// Descriptors in definition order.
    pub fn params(&self) -> &[ConfigParam] {
        &self.params
    }

    /// Set the value written for `name`.
    pub fn set(&mut self, name: &str, value: u32) -> ModuleResult<()> {
        let param = self
            .params
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ModuleError::invalid_param(name, "unknown parameter"))?;
        if value & !mask(param.width) != 0 {
            return Err(ModuleError::invalid_param(
                name,
                format!("value {value} does not fit in {} bits", param.width),
            ));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Current value of `name`.
    pub fn get(&self, name: &str) -> Option<u32> {
        let param = self.params.iter().find(|p| p.name == name)?;
        Some(self.values.get(name).copied().unwrap_or(param.default))
    }

    /// Word count of every section, in payload order.
    pub fn section_sizes(&self) -> BTreeMap<char, usize> {
        let mut sizes = BTreeMap::new();
        for p in &self.params {
            let size = sizes.entry(p.section).or_insert(0);
            *size = (*size).max(p.offset + 1);
        }
        sizes
    }

    /// Build the WRITE_CONFIG payload.
    pub fn pack(&self) -> Vec<u32> {
        let mut base = BTreeMap::new();
        let mut total = 0;
        for (section, size) in self.section_sizes() {
            base.insert(section, total);
            total += size;
        }

        let mut words = vec![0u32; total];
        for p in &self.params {
            let value = self.values.get(&p.name).copied().unwrap_or(p.default);
            if let Some(start) = base.get(&p.section) {
                words[start + p.offset] |= (value & mask(p.width)) << p.shift;
            }
        }
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn status_fields_extract() {
        let mut table = StatusTable::new();
        table
            .add("Configured", 0, 1, 0)
            .unwrap()
            .add("FoTransStatA", 0, 5, 16)
            .unwrap()
            .add("RxNumErrsA", 1, 8, 0)
            .unwrap()
            .add("Whole", 2, 32, 0)
            .unwrap();
        let raw = bytes(&[0x001F_0001, 0x0000_01FF, 0xDEAD_BEEF]);
        let values = table.extract(&Words::new(&raw));
        assert_eq!(values["Configured"], 1);
        assert_eq!(values["FoTransStatA"], 0x1F);
        assert_eq!(values["RxNumErrsA"], 0xFF);
        assert_eq!(values["Whole"], 0xDEAD_BEEF);
        assert_eq!(table.payload_words(), 3);
    }

    #[test]
    fn missing_words_are_skipped() {
        let mut table = StatusTable::new();
        table.add("Late", 4, 1, 0).unwrap();
        assert!(table.extract(&Words::new(&bytes(&[1]))).is_empty());
    }

    #[test]
    fn field_must_fit_in_word() {
        let mut table = StatusTable::new();
        assert!(matches!(
            table.add("Wide", 0, 8, 28),
            Err(ModuleError::InvalidParam { .. })
        ));
        assert!(table.add("Empty", 0, 0, 0).is_err());
        table.add("Edge", 0, 4, 28).unwrap();
        assert!(table.add("Edge", 1, 1, 0).is_err());
    }

    #[test]
    fn config_sections_pack_in_order() {
        let mut table = ConfigTable::new();
        table
            .add("Chop0Freq", 'C', 8, 4, 0, 0)
            .unwrap()
            .add("Chop1Freq", 'C', 8, 4, 4, 3)
            .unwrap()
            .add("PixIdOffset", 'B', 0, 32, 0, 0)
            .unwrap();
        table.set("PixIdOffset", 0x1234).unwrap();
        table.set("Chop0Freq", 5).unwrap();

        let sizes = table.section_sizes();
        assert_eq!(sizes.into_iter().collect::<Vec<_>>(), vec![('B', 1), ('C', 9)]);

        let words = table.pack();
        assert_eq!(words.len(), 10);
        assert_eq!(words[0], 0x1234);
        assert_eq!(words[1 + 8], 0x35);
        assert!(words[1..9].iter().all(|w| *w == 0));
    }

    #[test]
    fn config_values_checked() {
        let mut table = ConfigTable::new();
        table.add("Nibble", 'A', 0, 4, 0, 15).unwrap();
        assert_eq!(table.get("Nibble"), Some(15));
        assert!(table.set("Nibble", 16).is_err());
        assert!(table.set("Other", 1).is_err());
        assert!(table.add("Bad", 'A', 0, 4, 0, 16).is_err());
        assert!(table.add("Bad", '#', 0, 4, 0, 0).is_err());
    }
}
