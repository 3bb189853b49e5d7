//! Darkest-to-brightest symbol ramps.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

pub const DETAILED_RAMP: &str =
    r#" .'`^,:;Il!i><~+_-?][}{1)(|\/tfjrxnumbroCLJVUNYXOZmwqpdbkhao*#MW&8%B@$"#;
pub const STANDARD_RAMP: &str = " .:-=+*#%@";
pub const BLOCKS_RAMP: &str = " ░▒▓█";
pub const MINIMAL_RAMP: &str = " .:#";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharsetPreset {
    #[default]
    Detailed,
    Standard,
    Blocks,
    Minimal,
}

impl CharsetPreset {
    pub const ALL: [CharsetPreset; 4] = [
        CharsetPreset::Detailed,
        CharsetPreset::Standard,
        CharsetPreset::Blocks,
        CharsetPreset::Minimal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Detailed => "detailed",
            Self::Standard => "standard",
            Self::Blocks => "blocks",
            Self::Minimal => "minimal",
        }
    }

    pub fn ramp(self) -> &'static str {
        match self {
            Self::Detailed => DETAILED_RAMP,
            Self::Standard => STANDARD_RAMP,
            Self::Blocks => BLOCKS_RAMP,
            Self::Minimal => MINIMAL_RAMP,
        }
    }

    pub fn charset(self) -> Charset {
        Charset {
            symbols: self.ramp().chars().collect(),
        }
    }
}

impl fmt::Display for CharsetPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CharsetPreset {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let value = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|preset| preset.name() == value)
            .ok_or_else(|| {
                let known = Self::ALL.map(CharsetPreset::name).join(", ");
                anyhow!("unknown charset preset '{raw}'; expected one of: {known}")
            })
    }
}

/// Non-empty ordered ramp. Index 0 is drawn for the darkest blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charset {
    symbols: Vec<char>,
}

impl Charset {
    pub fn from_ramp(ramp: &str) -> Result<Self> {
        let symbols = ramp
            .chars()
            .filter(|ch| !ch.is_control())
            .collect::<Vec<_>>();
        if symbols.is_empty() {
            bail!("charset ramp must contain at least one printable symbol");
        }
        Ok(Self { symbols })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[char] {
        &self.symbols
    }

    /// Index into the ramp for an average luminance, `L * (N - 1) / 255`.
    pub fn index_for_luminance(&self, luminance: u8) -> usize {
        usize::from(luminance) * (self.symbols.len() - 1) / 255
    }

    pub fn symbol_for_luminance(&self, luminance: u8) -> char {
        self.symbols[self.index_for_luminance(luminance)]
    }

    pub fn to_ramp(&self) -> String {
        self.symbols.iter().collect()
    }
}

impl Default for Charset {
    fn default() -> Self {
        CharsetPreset::default().charset()
    }
}

#[cfg(test)]
mod tests {
    use super::{Charset, CharsetPreset};

    #[test]
    fn detailed_preset_has_seventy_symbols() {
        let charset = CharsetPreset::Detailed.charset();
        assert_eq!(charset.len(), 70);
        assert_eq!(charset.symbols()[0], ' ');
        assert_eq!(charset.symbols()[69], '$');
    }

    #[test]
    fn preset_names_parse_case_insensitively() {
        assert_eq!("Blocks".parse::<CharsetPreset>().expect("preset"), CharsetPreset::Blocks);
        assert!("braille".parse::<CharsetPreset>().is_err());
    }

    #[test]
    fn empty_ramp_is_rejected() {
        assert!(Charset::from_ramp("").is_err());
        assert!(Charset::from_ramp("\n\t").is_err());
    }

    #[test]
    fn index_is_monotonic_and_bounded() {
        for preset in CharsetPreset::ALL {
            let charset = preset.charset();
            let mut previous = 0;
            for luminance in 0..=255_u8 {
                let index = charset.index_for_luminance(luminance);
                assert!(index >= previous, "{preset} regressed at {luminance}");
                assert!(index < charset.len());
                previous = index;
            }
            assert_eq!(charset.index_for_luminance(0), 0);
            assert_eq!(charset.index_for_luminance(255), charset.len() - 1);
        }
    }

    #[test]
    fn single_symbol_ramp_always_selects_it() {
        let charset = Charset::from_ramp("#").expect("charset");
        assert_eq!(charset.symbol_for_luminance(0), '#');
        assert_eq!(charset.symbol_for_luminance(255), '#');
    }
}
