//! Quality-flag decoding for Landsat surface reflectance scenes
//!
//! Each sensor family maps to a [`QualityRule`]. A rule builds a deferred
//! [`MaskExpr`] that is true wherever a pixel is usable. The expression
//! combines the family's quality-bit test with the edge-consistency mask
//! and, for TM/ETM+, the B1 saturation test.

use crate::core::expr::MaskExpr;
use crate::types::{CountError, CountResult, MaskImage, Scene, SensorFamily};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Bit positions in the Collection 1 `pixel_qa` word
pub mod qa_bits {
    pub const FILL: u8 = 0;
    pub const CLOUD_SHADOW: u8 = 3;
    pub const SNOW: u8 = 4;
    pub const CLOUD: u8 = 5;
    pub const CLOUD_CONFIDENCE_MEDIUM: u8 = 6;
    pub const CLOUD_CONFIDENCE_HIGH: u8 = 7;
    /// OLI only
    pub const CIRRUS_CONFIDENCE_MEDIUM: u8 = 8;
    /// OLI only
    pub const CIRRUS_CONFIDENCE_HIGH: u8 = 9;
}

/// Band checked for saturation on TM/ETM+
pub const SATURATION_BAND: &str = "B1";

/// B1 digital number at or above which a TM/ETM+ pixel is treated as
/// saturated (undetected cloud)
pub const SATURATION_THRESHOLD: i32 = 20000;

/// How the TM/ETM+ rule combines the cloud bit with the high-confidence bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LegacyCloudRule {
    /// Cloud OR high confidence: either flag alone masks the pixel
    #[default]
    AnyFlag,
    /// Cloud AND high confidence: only confident clouds are masked
    ConfidentCloud,
}

impl std::fmt::Display for LegacyCloudRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegacyCloudRule::AnyFlag => write!(f, "any"),
            LegacyCloudRule::ConfidentCloud => write!(f, "confident"),
        }
    }
}

impl FromStr for LegacyCloudRule {
    type Err = CountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "any" | "or" => Ok(LegacyCloudRule::AnyFlag),
            "confident" | "and" => Ok(LegacyCloudRule::ConfidentCloud),
            _ => Err(CountError::Config(format!("Invalid legacy cloud rule: {}", s))),
        }
    }
}

/// Per-family decoding rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityRule {
    /// TM (Landsat 4/5) and ETM+ (Landsat 7)
    Legacy { cloud_rule: LegacyCloudRule },
    /// OLI (Landsat 8)
    Oli,
}

impl QualityRule {
    pub fn for_family(family: SensorFamily, cloud_rule: LegacyCloudRule) -> Self {
        if family.is_oli() {
            QualityRule::Oli
        } else {
            QualityRule::Legacy { cloud_rule }
        }
    }

    /// Quality bits that make a pixel unusable
    pub fn unusable_flags(&self) -> MaskExpr {
        use qa_bits::*;

        let bit = MaskExpr::qa_bit;
        match self {
            QualityRule::Legacy { cloud_rule } => {
                let cloud = match cloud_rule {
                    LegacyCloudRule::AnyFlag => bit(CLOUD) | bit(CLOUD_CONFIDENCE_HIGH),
                    LegacyCloudRule::ConfidentCloud => bit(CLOUD) & bit(CLOUD_CONFIDENCE_HIGH),
                };
                cloud | bit(CLOUD_SHADOW) | bit(SNOW)
            }
            QualityRule::Oli => {
                let cloud = bit(CLOUD) & (bit(CLOUD_CONFIDENCE_MEDIUM) | bit(CLOUD_CONFIDENCE_HIGH));
                let cirrus = bit(CIRRUS_CONFIDENCE_MEDIUM) & bit(CIRRUS_CONFIDENCE_HIGH);
                cloud | bit(SNOW) | bit(CLOUD_SHADOW) | cirrus
            }
        }
    }

    /// Full usable-pixel expression for one scene of this family
    pub fn usable_mask(&self) -> MaskExpr {
        let usable = !self.unusable_flags() & MaskExpr::AllBandsValid;
        match self {
            QualityRule::Legacy { .. } => {
                usable & MaskExpr::band_below(SATURATION_BAND, SATURATION_THRESHOLD)
            }
            QualityRule::Oli => usable,
        }
    }

    /// Evaluate the usable mask on the scene's grid
    pub fn decode(&self, scene: &Scene) -> CountResult<MaskImage> {
        let mask = self.usable_mask().evaluate(scene)?;
        log::debug!(
            "Scene {}: {} of {} pixels usable",
            scene.id,
            mask.iter().filter(|&&v| v).count(),
            mask.len()
        );
        Ok(mask)
    }
}
