use crate::core::merge::{count_period, CountStrategy, MergedCollection, PeriodCount};
use crate::types::{AggregationMode, Aoi, CountError, CountResult, Period};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pixel type of a stacked output raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelType {
    /// Native reducer output
    Float64,
    /// Integer-coerced output
    Int32,
}

impl std::fmt::Display for PixelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelType::Float64 => write!(f, "float64"),
            PixelType::Int32 => write!(f, "int32"),
        }
    }
}

/// One labelled band of the stack
#[derive(Debug, Clone)]
pub struct StackedBand {
    pub label: String,
    pub count: PeriodCount,
}

/// Deferred multi-band raster: one period count per band
#[derive(Debug, Clone)]
pub struct StackedImage {
    mode: AggregationMode,
    bands: Vec<StackedBand>,
    clip: Option<Aoi>,
    pixel_type: PixelType,
}

impl StackedImage {
    pub fn mode(&self) -> AggregationMode {
        self.mode
    }

    pub fn bands(&self) -> &[StackedBand] {
        &self.bands
    }

    pub fn labels(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.label.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Polygon outside which output pixels are masked
    pub fn clip(&self) -> Option<&Aoi> {
        self.clip.as_ref()
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    /// Single-band image for one label
    pub fn select(&self, label: &str) -> Option<StackedImage> {
        let band = self.bands.iter().find(|b| b.label == label)?;
        Some(StackedImage {
            mode: self.mode,
            bands: vec![band.clone()],
            clip: self.clip.clone(),
            pixel_type: self.pixel_type,
        })
    }
}

/// Builds the per-period stack for one aggregation mode
#[derive(Debug, Clone, Copy)]
pub struct PeriodAggregator {
    mode: AggregationMode,
    strategy: CountStrategy,
}

impl PeriodAggregator {
    pub fn new(mode: AggregationMode, strategy: CountStrategy) -> Self {
        Self { mode, strategy }
    }

    /// Stack one count per period, in the order given.
    ///
    /// Periods must be non-empty, strictly ascending and of the kind the mode
    /// expects. Yearly stacks are clipped to `aoi` and coerced to integers.
    /// Monthly stacks keep the reducer's float type and are not clipped.
    pub fn aggregate(
        &self,
        collection: &Arc<MergedCollection>,
        periods: &[Period],
        aoi: &Aoi,
    ) -> CountResult<StackedImage> {
        if periods.is_empty() {
            return Err(CountError::Config("No periods to aggregate".to_string()));
        }

        for period in periods {
            let matches_mode = match (self.mode, period) {
                (AggregationMode::Monthly, Period::Month(m)) => (1..=12).contains(m),
                (AggregationMode::Yearly, Period::Year(_)) => true,
                _ => false,
            };
            if !matches_mode {
                return Err(CountError::Config(format!(
                    "Period {:?} does not fit {} aggregation",
                    period, self.mode
                )));
            }
        }

        if periods.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CountError::Config(
                "Periods must be strictly ascending".to_string(),
            ));
        }

        log::info!(
            "Aggregating {} {} periods ({} to {}) over {} scenes",
            periods.len(),
            self.mode,
            periods[0],
            periods[periods.len() - 1],
            collection.len()
        );

        let bands = periods
            .iter()
            .map(|&period| {
                let count = count_period(collection, period, self.strategy);
                log::debug!("Period {}: at most {} contributions", period, count.max_count());
                Ok(StackedBand {
                    label: period.label()?,
                    count,
                })
            })
            .collect::<CountResult<Vec<StackedBand>>>()?;

        let (clip, pixel_type) = match self.mode {
            AggregationMode::Monthly => (None, PixelType::Float64),
            AggregationMode::Yearly => (Some(aoi.clone()), PixelType::Int32),
        };

        Ok(StackedImage {
            mode: self.mode,
            bands,
            clip,
            pixel_type,
        })
    }
}
