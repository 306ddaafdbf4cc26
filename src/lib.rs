//! clearcount: per-pixel counts of clear Landsat observations
//!
//! Landsat 4, 5, 7 and 8 surface reflectance scenes are masked with their
//! `pixel_qa` bits, harmonized to one near-infrared band and counted per
//! calendar month or per year as the number of distinct acquisition dates
//! with a usable pixel.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use config::{CountConfig, CountRequest, DateRange};
pub use types::{
    AggregationMode, Aoi, Band, BoundingBox, CountError, CountResult, GeoTransform, Period, Scene,
    SensorFamily,
};

pub use crate::core::{
    BandHarmonizer, CountProduct, CountStrategy, LegacyCloudRule, LocalEvaluator, MultiBandRaster,
    ObservationCounter, QualityRule, RasterEvaluator, StackedImage,
};
pub use io::{ArchiveCatalog, ArchiveExporter, InMemoryCatalog, RasterSink, SceneCatalog};
