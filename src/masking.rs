//! Bit-flag mask decoding
//!
//! Quality bands pack several flags into one integer. A flag definition
//! names the bits it occupies and what each raw value of those bits means:
//!
//! ```yaml
//! pixelquality:
//!   contiguous:
//!     bits: 8
//!     values: {0: false, 1: true}
//!   cloud_acca:
//!     bits: 10
//!     values: {0: cloud, 1: no_cloud}
//! ```

use crate::config::FlagValue;
use crate::errors::{Result, StatsError};
use crate::model::Band;
use crate::sources::MaskDecoder;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bits occupied by a flag
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagBits {
    One(u32),
    Many(Vec<u32>),
}

impl FlagBits {
    fn bits(&self) -> &[u32] {
        match self {
            Self::One(bit) => std::slice::from_ref(bit),
            Self::Many(bits) => bits,
        }
    }
}

/// Definition of one flag within a quality band
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlagDefinition {
    pub bits: FlagBits,
    /// Raw value of the bits to its meaning
    pub values: BTreeMap<u64, FlagValue>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FlagDefinition {
    /// `(mask, shift)` selecting this flag's bits
    fn selector(&self) -> Result<(u64, u32)> {
        let bits = self.bits.bits();
        let shift = bits
            .iter()
            .copied()
            .min()
            .ok_or_else(|| StatsError::config("flag definition has no bits"))?;
        if bits.iter().any(|&b| b >= 64) {
            return Err(StatsError::config(format!("flag bits {bits:?} exceed 64")));
        }
        let mask = bits.iter().fold(0_u64, |acc, &b| acc | (1 << b));
        Ok((mask, shift))
    }

    /// Raw value that encodes `wanted`
    fn raw_value(&self, wanted: &FlagValue) -> Option<u64> {
        self.values
            .iter()
            .find(|(_, meaning)| *meaning == wanted)
            .map(|(&raw, _)| raw)
            .or(match wanted {
                FlagValue::Int(raw) => u64::try_from(*raw).ok(),
                _ => None,
            })
    }
}

/// Flag definitions of one quality measurement
pub type FlagsDefinition = BTreeMap<String, FlagDefinition>;

/// [`MaskDecoder`] driven by per-measurement flag definitions
#[derive(Debug, Clone, Default)]
pub struct FlagMaskDecoder {
    definitions: BTreeMap<String, FlagsDefinition>,
}

impl FlagMaskDecoder {
    #[must_use]
    pub fn new(definitions: BTreeMap<String, FlagsDefinition>) -> Self {
        Self { definitions }
    }

    pub fn insert(&mut self, measurement: impl Into<String>, definition: FlagsDefinition) {
        self.definitions.insert(measurement.into(), definition);
    }
}

impl MaskDecoder for FlagMaskDecoder {
    fn make_mask(&self, band: &Band, flags: &BTreeMap<String, FlagValue>) -> Result<Array3<bool>> {
        let name = &band.measurement.name;
        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| StatsError::config(format!("no flags definition for measurement '{name}'")))?;

        let mut selectors = Vec::with_capacity(flags.len());
        for (flag, wanted) in flags {
            let def = definition
                .get(flag)
                .ok_or_else(|| StatsError::config(format!("measurement '{name}' has no flag '{flag}'")))?;
            let (mask, shift) = def.selector()?;
            let raw = def.raw_value(wanted).ok_or_else(|| {
                StatsError::config(format!("flag '{flag}' of '{name}' has no value {wanted:?}"))
            })?;
            selectors.push((mask, raw << shift));
        }

        Ok(band.data.mapv(|v| {
            v.is_finite()
                && v >= 0.0
                && selectors
                    .iter()
                    .all(|&(mask, expected)| ((v as u64) & mask) == expected)
        }))
    }
}
