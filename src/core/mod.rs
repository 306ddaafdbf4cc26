//! Masking, harmonization, merging and counting

pub mod aggregate;
pub mod evaluate;
pub mod expr;
pub mod harmonize;
pub mod merge;
pub mod pipeline;
pub mod quality_mask;

// Re-export main types
pub use aggregate::{PeriodAggregator, PixelType, StackedBand, StackedImage};
pub use evaluate::{
    EvaluationRegion, LocalEvaluator, MultiBandRaster, OutputGrid, RasterData, RasterEvaluator,
};
pub use expr::MaskExpr;
pub use harmonize::{BandHarmonizer, HarmonizedScene, SceneHandle, CANONICAL_BAND};
pub use merge::{count_period, CountStrategy, MergedCollection, PeriodCount};
pub use pipeline::{CountProduct, ObservationCounter};
pub use quality_mask::{LegacyCloudRule, QualityRule};
