//! Count request configuration
//!
//! A request is described by a small XML document:
//!
//! ```xml
//! <countConfig>
//!   <startYear>1984</startYear>
//!   <endYear>2019</endYear>
//!   <startMonth>4</startMonth>
//!   <endMonth>9</endMonth>
//!   <mode>monthly</mode>
//!   <aoi>
//!     <vertex x="500000" y="4800000"/>
//!     <vertex x="500000" y="4740000"/>
//!     <vertex x="590000" y="4740000"/>
//!   </aoi>
//! </countConfig>
//! ```
//!
//! Everything except the ranges and the AOI has a default. Validation turns
//! the raw document into a [`CountRequest`] before any catalog is touched.

use crate::core::merge::CountStrategy;
use crate::core::quality_mask::LegacyCloudRule;
use crate::types::{AggregationMode, Aoi, CountError, CountResult, Period};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output resolution in map units per pixel
pub const DEFAULT_SCALE: f64 = 30.0;

/// Largest pixel count a single evaluation may touch
pub const DEFAULT_MAX_PIXELS: u64 = 10_000_000_000_000;

/// Inclusive year and month ranges, applied independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start_year: i32,
    end_year: i32,
    start_month: u32,
    end_month: u32,
}

impl DateRange {
    pub fn new(start_year: i32, end_year: i32, start_month: u32, end_month: u32) -> CountResult<Self> {
        if start_year > end_year {
            return Err(CountError::Config(format!(
                "Start year {} is after end year {}",
                start_year, end_year
            )));
        }

        for month in [start_month, end_month] {
            if !(1..=12).contains(&month) {
                return Err(CountError::Config(format!(
                    "Month {} is outside 1-12",
                    month
                )));
            }
        }

        if start_month > end_month {
            return Err(CountError::Config(format!(
                "Start month {} is after end month {}",
                start_month, end_month
            )));
        }

        Ok(Self {
            start_year,
            end_year,
            start_month,
            end_month,
        })
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn end_year(&self) -> i32 {
        self.end_year
    }

    pub fn start_month(&self) -> u32 {
        self.start_month
    }

    pub fn end_month(&self) -> u32 {
        self.end_month
    }

    /// Year in range AND month in range. A date in a selected year but outside
    /// the month window does not qualify, even if it lies between the first and
    /// last selected day on the calendar.
    pub fn contains(&self, date: NaiveDate) -> bool {
        (self.start_year..=self.end_year).contains(&date.year())
            && (self.start_month..=self.end_month).contains(&date.month())
    }

    /// Ascending periods for one aggregation mode
    pub fn periods(&self, mode: AggregationMode) -> Vec<Period> {
        match mode {
            AggregationMode::Monthly => (self.start_month..=self.end_month).map(Period::Month).collect(),
            AggregationMode::Yearly => (self.start_year..=self.end_year).map(Period::Year).collect(),
        }
    }
}

/// Validated count request
#[derive(Debug, Clone)]
pub struct CountRequest {
    pub range: DateRange,
    pub aoi: Aoi,
    pub mode: AggregationMode,
    pub prefix: String,
    pub scale: f64,
    pub max_pixels: u64,
    pub legacy_cloud_rule: LegacyCloudRule,
    pub strategy: CountStrategy,
}

impl CountRequest {
    /// Request with default prefix, resolution, ceiling and mask rules
    pub fn new(range: DateRange, aoi: Aoi, mode: AggregationMode) -> Self {
        Self {
            range,
            aoi,
            mode,
            prefix: mode.default_prefix().to_string(),
            scale: DEFAULT_SCALE,
            max_pixels: DEFAULT_MAX_PIXELS,
            legacy_cloud_rule: LegacyCloudRule::default(),
            strategy: CountStrategy::default(),
        }
    }

    pub fn with_legacy_cloud_rule(mut self, rule: LegacyCloudRule) -> Self {
        self.legacy_cloud_rule = rule;
        self
    }

    pub fn with_strategy(mut self, strategy: CountStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> CountResult<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(CountError::Config(format!("Invalid scale: {}", scale)));
        }
        self.scale = scale;
        Ok(self)
    }

    pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn periods(&self) -> Vec<Period> {
        self.range.periods(self.mode)
    }

    /// `<prefix><startPeriod>_<endPeriod>`
    pub fn output_name(&self) -> String {
        match self.mode {
            AggregationMode::Monthly => format!(
                "{}{}_{}",
                self.prefix,
                self.range.start_month(),
                self.range.end_month()
            ),
            AggregationMode::Yearly => format!(
                "{}{}_{}",
                self.prefix,
                self.range.start_year(),
                self.range.end_year()
            ),
        }
    }
}

/// Polygon vertex as written in the configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexConfig {
    #[serde(rename = "@x")]
    pub x: f64,
    #[serde(rename = "@y")]
    pub y: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AoiConfig {
    #[serde(rename = "vertex", default)]
    pub vertices: Vec<VertexConfig>,
}

/// Raw configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "countConfig", rename_all = "camelCase")]
pub struct CountConfig {
    pub start_year: i32,
    pub end_year: i32,
    pub start_month: u32,
    pub end_month: u32,
    #[serde(default)]
    pub aoi: AoiConfig,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_max_pixels")]
    pub max_pixels: f64,
    #[serde(default = "default_legacy_cloud_rule")]
    pub legacy_cloud_rule: String,
    #[serde(default = "default_count_strategy")]
    pub count_strategy: String,
}

fn default_mode() -> String {
    AggregationMode::Monthly.to_string()
}

fn default_scale() -> f64 {
    DEFAULT_SCALE
}

fn default_max_pixels() -> f64 {
    DEFAULT_MAX_PIXELS as f64
}

fn default_legacy_cloud_rule() -> String {
    LegacyCloudRule::default().to_string()
}

fn default_count_strategy() -> String {
    CountStrategy::default().to_string()
}

impl CountConfig {
    pub fn from_xml_str(xml: &str) -> CountResult<Self> {
        quick_xml::de::from_str(xml)
            .map_err(|e| CountError::XmlParsing(format!("Failed to parse count config: {}", e)))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> CountResult<Self> {
        log::info!("Reading count config: {}", path.as_ref().display());
        let xml = std::fs::read_to_string(path)?;
        Self::from_xml_str(&xml)
    }

    pub fn to_xml_string(&self) -> CountResult<String> {
        quick_xml::se::to_string(self)
            .map_err(|e| CountError::XmlParsing(format!("Failed to write count config: {}", e)))
    }

    /// Check every field and build the request
    pub fn validate(&self) -> CountResult<CountRequest> {
        let range = DateRange::new(self.start_year, self.end_year, self.start_month, self.end_month)?;
        let aoi = Aoi::polygon(self.aoi.vertices.iter().map(|v| (v.x, v.y)).collect())?;
        let mode: AggregationMode = self.mode.parse()?;

        if !self.max_pixels.is_finite() || self.max_pixels < 1.0 {
            return Err(CountError::Config(format!(
                "Invalid pixel ceiling: {}",
                self.max_pixels
            )));
        }

        let mut request = CountRequest::new(range, aoi, mode)
            .with_scale(self.scale)?
            .with_max_pixels(self.max_pixels as u64)
            .with_legacy_cloud_rule(self.legacy_cloud_rule.parse()?)
            .with_strategy(self.count_strategy.parse()?);

        if let Some(prefix) = &self.prefix {
            request = request.with_prefix(prefix.clone());
        }

        Ok(request)
    }
}
