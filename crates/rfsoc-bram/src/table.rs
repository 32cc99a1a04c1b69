//! Region table: BRAM names to physical addresses and sizes

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{BramError, BramResult};

/// Byte-size category of a region, derived from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    /// Spectrum register bank
    Large,
    /// Reduced-resolution register bank
    Small,
    /// Accumulation counter
    Counter,
}

/// Naming rules that decide a region's size class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeRules {
    /// Exact name of the counter region
    pub counter_name: String,
    /// Counter size in bytes
    pub counter_size: usize,
    /// Name prefix of small register banks
    pub small_prefix: String,
    /// Small bank size in bytes
    pub small_size: usize,
    /// Size of every other bank in bytes
    pub large_size: usize,
}

impl Default for SizeRules {
    fn default() -> Self {
        Self {
            counter_name: "acc_cnt".to_string(),
            counter_size: 4,
            small_prefix: "re_bin_".to_string(),
            small_size: 256,
            large_size: 4096,
        }
    }
}

impl SizeRules {
    /// Classify a region name. The counter name is matched exactly and
    /// takes precedence over the small prefix.
    pub fn classify(&self, name: &str) -> SizeClass {
        if name == self.counter_name {
            SizeClass::Counter
        } else if !self.small_prefix.is_empty() && name.starts_with(&self.small_prefix) {
            SizeClass::Small
        } else {
            SizeClass::Large
        }
    }

    /// Byte size of a class
    pub fn size_of(&self, class: SizeClass) -> usize {
        match class {
            SizeClass::Large => self.large_size,
            SizeClass::Small => self.small_size,
            SizeClass::Counter => self.counter_size,
        }
    }

    fn describe(&self, entry: &RegionEntry) -> RegionDescriptor {
        let class = self.classify(&entry.name);
        RegionDescriptor {
            name: entry.name.clone(),
            address: entry.address,
            class,
            size: self.size_of(class),
        }
    }

    pub fn validate(&self) -> BramResult<()> {
        if self.counter_name.is_empty() {
            return Err(BramError::Config("counter_name must not be empty".to_string()));
        }
        for (label, size) in [
            ("counter_size", self.counter_size),
            ("small_size", self.small_size),
            ("large_size", self.large_size),
        ] {
            if size == 0 {
                return Err(BramError::Config(format!("{} must be > 0", label)));
            }
        }
        Ok(())
    }
}

/// One named region of physical memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionDescriptor {
    pub name: String,
    pub address: u64,
    pub class: SizeClass,
    pub size: usize,
}

/// `(name, physical address)` pair as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub name: String,
    pub address: u64,
}

impl RegionEntry {
    pub fn new(name: impl Into<String>, address: u64) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

/// Immutable lookup table of every servable region
#[derive(Debug, Clone)]
pub struct RegionTable {
    rules: SizeRules,
    regions: HashMap<String, RegionDescriptor>,
}

impl RegionTable {
    /// Build a table from `(name, address)` entries
    pub fn from_entries(rules: SizeRules, entries: &[RegionEntry]) -> BramResult<Self> {
        rules.validate()?;

        let mut regions = HashMap::with_capacity(entries.len());
        for entry in entries {
            if entry.name.is_empty() || entry.name.contains(char::is_whitespace) {
                return Err(BramError::Config(format!(
                    "invalid region name '{}'",
                    entry.name
                )));
            }

            let descriptor = rules.describe(entry);
            if regions.insert(entry.name.clone(), descriptor).is_some() {
                return Err(BramError::Config(format!(
                    "duplicate region '{}'",
                    entry.name
                )));
            }
        }

        Ok(Self { rules, regions })
    }

    /// Table of a built-in design, with that design's size rules
    pub fn from_preset(preset: TablePreset) -> Self {
        let rules = preset.rules();
        let regions = preset
            .entries()
            .iter()
            .map(|entry| (entry.name.clone(), rules.describe(entry)))
            .collect();

        Self { rules, regions }
    }

    /// Address table of the RFSoC 4x2 spectrometer
    pub fn rfsoc4x2_spectrometer() -> Self {
        Self::from_preset(TablePreset::Rfsoc4x2)
    }

    /// Address table of the 8192-channel design
    pub fn rfsoc_8192ch() -> Self {
        Self::from_preset(TablePreset::Ch8192)
    }

    /// Address table of the 32768-channel design
    pub fn rfsoc_32768ch() -> Self {
        Self::from_preset(TablePreset::Ch32768)
    }

    pub fn lookup(&self, name: &str) -> Option<&RegionDescriptor> {
        self.regions.get(name)
    }

    /// Size class a name would have under this table's rules
    pub fn size_class(&self, name: &str) -> SizeClass {
        self.rules.classify(name)
    }

    pub fn rules(&self) -> &SizeRules {
        &self.rules
    }

    /// Descriptors ordered by physical address
    pub fn descriptors(&self) -> Vec<&RegionDescriptor> {
        let mut all: Vec<_> = self.regions.values().collect();
        all.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.name.cmp(&b.name)));
        all
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Built-in address tables of the deployed spectrometer designs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum TablePreset {
    /// Sixteen 4 KiB banks and the counter
    #[default]
    #[serde(rename = "rfsoc4x2")]
    #[value(name = "rfsoc4x2")]
    Rfsoc4x2,
    /// Sixteen 4 KiB banks, sixteen reduced banks and the counter
    #[serde(rename = "8192ch")]
    #[value(name = "8192ch")]
    Ch8192,
    /// Sixteen 16 KiB banks, sixteen reduced banks and the counter
    #[serde(rename = "32768ch")]
    #[value(name = "32768ch")]
    Ch32768,
}

impl TablePreset {
    /// Size rules of the design
    pub fn rules(self) -> SizeRules {
        match self {
            TablePreset::Rfsoc4x2 | TablePreset::Ch8192 => SizeRules::default(),
            TablePreset::Ch32768 => SizeRules {
                large_size: 0x4000,
                ..Default::default()
            },
        }
    }

    /// `(name, address)` entries of the design
    ///
    /// Each sideband has eight banks; `synth1_0` follows `synth0_7`.
    pub fn entries(self) -> Vec<RegionEntry> {
        let (large_base, large_stride, reduced_base, counter) = match self {
            TablePreset::Rfsoc4x2 => (0xA016_0000, 0x1000, None, 0xA017_0000),
            TablePreset::Ch8192 => (0xA014_0000, 0x1000, Some(0xA015_0000), 0xA015_1000),
            TablePreset::Ch32768 => (0xA014_0000, 0x4000, Some(0xA018_0000), 0xA018_1000),
        };

        let mut entries: Vec<RegionEntry> = banks("synth", large_base, large_stride).collect();
        if let Some(base) = reduced_base {
            entries.extend(banks("re_bin_synth", base, 0x100));
        }
        entries.push(RegionEntry::new("acc_cnt", counter));
        entries
    }
}

fn banks(prefix: &'static str, base: u64, stride: u64) -> impl Iterator<Item = RegionEntry> {
    (0..16u64).map(move |i| {
        RegionEntry::new(format!("{}{}_{}", prefix, i / 8, i % 8), base + i * stride)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let rules = SizeRules::default();
        assert_eq!(rules.classify("acc_cnt"), SizeClass::Counter);
        assert_eq!(rules.classify("re_bin_synth0_3"), SizeClass::Small);
        assert_eq!(rules.classify("re_bin_ab_re0"), SizeClass::Small);
        assert_eq!(rules.classify("synth1_7"), SizeClass::Large);
        // Exact match only for the counter
        assert_eq!(rules.classify("acc_cnt_old"), SizeClass::Large);
    }

    #[test]
    fn test_classify_is_stable() {
        let table = RegionTable::rfsoc4x2_spectrometer();
        for _ in 0..3 {
            assert_eq!(table.size_class("acc_cnt"), SizeClass::Counter);
            assert_eq!(table.size_class("synth0_0"), SizeClass::Large);
        }
    }

    #[test]
    fn test_builtin_table() {
        let table = RegionTable::rfsoc4x2_spectrometer();
        assert_eq!(table.len(), 17);

        let synth = table.lookup("synth1_2").unwrap();
        assert_eq!(synth.address, 0xA016_A000);
        assert_eq!(synth.size, 4096);

        let cnt = table.lookup("acc_cnt").unwrap();
        assert_eq!(cnt.address, 0xA017_0000);
        assert_eq!(cnt.class, SizeClass::Counter);
        assert_eq!(cnt.size, 4);

        assert!(table.lookup("synth2_0").is_none());
    }

    #[test]
    fn test_8192ch_table() {
        let table = RegionTable::rfsoc_8192ch();
        assert_eq!(table.len(), 33);

        let synth = table.lookup("synth1_7").unwrap();
        assert_eq!(synth.address, 0xA014_F000);
        assert_eq!(synth.size, 0x1000);

        let small = table.lookup("re_bin_synth0_0").unwrap();
        assert_eq!(small.address, 0xA015_0000);
        assert_eq!(small.class, SizeClass::Small);
        assert_eq!(small.size, 0x100);
        assert_eq!(table.lookup("re_bin_synth1_2").unwrap().address, 0xA015_0A00);

        let cnt = table.lookup("acc_cnt").unwrap();
        assert_eq!(cnt.address, 0xA015_1000);
        assert_eq!(cnt.size, 4);
    }

    #[test]
    fn test_32768ch_table() {
        let table = RegionTable::rfsoc_32768ch();
        assert_eq!(table.len(), 33);

        let synth = table.lookup("synth0_3").unwrap();
        assert_eq!(synth.address, 0xA014_C000);
        assert_eq!(synth.size, 0x4000);
        assert_eq!(table.lookup("synth1_0").unwrap().address, 0xA016_0000);
        assert_eq!(table.lookup("synth1_7").unwrap().address, 0xA017_C000);

        let small = table.lookup("re_bin_synth1_7").unwrap();
        assert_eq!(small.address, 0xA018_0F00);
        assert_eq!(small.size, 0x100);

        let cnt = table.lookup("acc_cnt").unwrap();
        assert_eq!(cnt.address, 0xA018_1000);
        assert_eq!(cnt.size, 4);
    }

    #[test]
    fn test_presets_do_not_overlap() {
        for preset in [TablePreset::Rfsoc4x2, TablePreset::Ch8192, TablePreset::Ch32768] {
            let table = RegionTable::from_preset(preset);
            let descriptors = table.descriptors();
            for pair in descriptors.windows(2) {
                assert!(
                    pair[0].address + pair[0].size as u64 <= pair[1].address,
                    "{:?}: {} overlaps {}",
                    preset,
                    pair[0].name,
                    pair[1].name
                );
            }
            // Every preset name passes entry validation
            assert!(RegionTable::from_entries(preset.rules(), &preset.entries()).is_ok());
        }
    }

    #[test]
    fn test_descriptors_sorted() {
        let table = RegionTable::rfsoc4x2_spectrometer();
        let addrs: Vec<u64> = table.descriptors().iter().map(|d| d.address).collect();
        let mut sorted = addrs.clone();
        sorted.sort();
        assert_eq!(addrs, sorted);
        assert_eq!(table.descriptors().last().unwrap().name, "acc_cnt");
    }

    #[test]
    fn test_from_entries() {
        let rules = SizeRules {
            small_size: 512,
            ..Default::default()
        };
        let table = RegionTable::from_entries(
            rules,
            &[
                RegionEntry::new("re_bin_synth0_0", 0xA000_0000),
                RegionEntry::new("acc_cnt", 0xA000_1000),
            ],
        )
        .unwrap();
        assert_eq!(table.lookup("re_bin_synth0_0").unwrap().size, 512);
        assert_eq!(table.lookup("acc_cnt").unwrap().size, 4);
    }

    #[test]
    fn test_duplicate_rejected() {
        let result = RegionTable::from_entries(
            SizeRules::default(),
            &[
                RegionEntry::new("synth0_0", 0xA016_0000),
                RegionEntry::new("synth0_0", 0xA016_1000),
            ],
        );
        assert!(matches!(result, Err(BramError::Config(_))));
    }

    #[test]
    fn test_bad_names_rejected() {
        for name in ["", "two words"] {
            let result =
                RegionTable::from_entries(SizeRules::default(), &[RegionEntry::new(name, 0)]);
            assert!(result.is_err(), "{:?} should be rejected", name);
        }
    }

    #[test]
    fn test_zero_size_rule_rejected() {
        let rules = SizeRules {
            counter_size: 0,
            ..Default::default()
        };
        assert!(rules.validate().is_err());
        assert!(RegionTable::from_entries(rules, &[]).is_err());
    }
}
