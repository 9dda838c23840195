//! Scalability modes of SVC/simulcast encodings, like `L3T2_KEY` or `S2T3`.


use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU8;
use std::str::FromStr;
use thiserror::Error;

/// Number of spatial and temporal layers in an RTP stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScalabilityMode {
    spatial_layers: NonZeroU8,
    temporal_layers: NonZeroU8,
    ksvc: bool,
    shift: bool,
    separate_streams: bool,
}

impl Default for ScalabilityMode {
    fn default() -> Self {
        Self::L1T1
    }
}

/// Scalability mode string is malformed.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ParseScalabilityModeError {
    /// Input doesn't look like a scalability mode at all.
    #[error("Invalid scalability mode input")]
    InvalidInput,
    /// Zero or too many layers.
    #[error("Invalid number of layers in scalability mode")]
    InvalidLayers,
}

impl ScalabilityMode {
    /// Single spatial and single temporal layer.
    pub const L1T1: Self = Self {
        spatial_layers: NonZeroU8::MIN,
        temporal_layers: NonZeroU8::MIN,
        ksvc: false,
        shift: false,
        separate_streams: false,
    };

    /// Number of spatial layers.
    #[must_use]
    pub fn spatial_layers(&self) -> NonZeroU8 {
        self.spatial_layers
    }

    /// Number of temporal layers.
    #[must_use]
    pub fn temporal_layers(&self) -> NonZeroU8 {
        self.temporal_layers
    }

    /// K-SVC mode, spatial layers only depend on each other on key frames.
    #[must_use]
    pub fn ksvc(&self) -> bool {
        self.ksvc
    }
}

impl FromStr for ScalabilityMode {
    type Err = ParseScalabilityModeError;

    fn from_str(scalability_mode: &str) -> Result<Self, Self::Err> {
        static SCALABILITY_MODE_REGEX: OnceCell<Regex> = OnceCell::new();

        let captures = SCALABILITY_MODE_REGEX
            .get_or_init(|| {
                Regex::new(r"^[LS]([0-9]+)T([0-9]+)(_KEY)?(_SHIFT)?$")
                    .expect("Scalability mode regex is valid")
            })
            .captures(scalability_mode)
            .ok_or(ParseScalabilityModeError::InvalidInput)?;

        let layers = |index: usize| {
            captures
                .get(index)
                .and_then(|capture| capture.as_str().parse::<u8>().ok())
                .filter(|layers| *layers <= 20)
                .and_then(NonZeroU8::new)
                .ok_or(ParseScalabilityModeError::InvalidLayers)
        };

        Ok(Self {
            spatial_layers: layers(1)?,
            temporal_layers: layers(2)?,
            ksvc: captures.get(3).is_some(),
            shift: captures.get(4).is_some(),
            separate_streams: scalability_mode.starts_with('S'),
        })
    }
}

impl TryFrom<String> for ScalabilityMode {
    type Error = ParseScalabilityModeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScalabilityMode> for String {
    fn from(scalability_mode: ScalabilityMode) -> Self {
        scalability_mode.to_string()
    }
}

impl fmt::Display for ScalabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}T{}{}{}",
            if self.separate_streams { "S" } else { "L" },
            self.spatial_layers,
            self.temporal_layers,
            if self.ksvc { "_KEY" } else { "" },
            if self.shift { "_SHIFT" } else { "" },
        )
    }
}
