use crate::config::{CountConfig, CountRequest};
use crate::core::aggregate::{PeriodAggregator, StackedImage};
use crate::core::evaluate::{EvaluationRegion, MultiBandRaster, RasterEvaluator};
use crate::core::harmonize::BandHarmonizer;
use crate::core::merge::MergedCollection;
use crate::io::catalog::{CatalogFilter, SceneCatalog};
use crate::io::export::{ExportReceipt, ExportTask, RasterSink};
use crate::types::{AggregationMode, CountResult, SensorFamily};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Deferred result of one counting run, ready for evaluation or export
#[derive(Debug, Clone)]
pub struct CountProduct {
    pub name: String,
    pub mode: AggregationMode,
    pub image: StackedImage,
    pub region: EvaluationRegion,
    /// Catalog hits per sensor, before masking
    pub scenes_per_sensor: BTreeMap<SensorFamily, usize>,
}

/// Clear-observation counting pipeline
pub struct ObservationCounter {
    request: CountRequest,
}

impl ObservationCounter {
    pub fn new(request: CountRequest) -> Self {
        Self { request }
    }

    pub fn from_config(config: &CountConfig) -> CountResult<Self> {
        Ok(Self::new(config.validate()?))
    }

    pub fn request(&self) -> &CountRequest {
        &self.request
    }

    /// Query every sensor, harmonize, merge and stack the period counts
    pub fn build<C: SceneCatalog + ?Sized>(&self, catalog: &C) -> CountResult<CountProduct> {
        let request = &self.request;
        log::info!(
            "Building {} count {} for {}-{}, months {}-{}",
            request.mode,
            request.output_name(),
            request.range.start_year(),
            request.range.end_year(),
            request.range.start_month(),
            request.range.end_month()
        );

        let filter = CatalogFilter::new(request.range, request.aoi.clone());
        let harmonizer = BandHarmonizer::new(request.legacy_cloud_rule);

        let mut scenes_per_sensor = BTreeMap::new();
        let mut per_sensor = Vec::with_capacity(SensorFamily::ALL.len());
        for family in SensorFamily::ALL {
            let scenes = catalog.query(family, &filter)?;
            if scenes.is_empty() {
                log::warn!("No {} scenes match the request", family);
            } else {
                log::info!("{}: {} scenes", family, scenes.len());
            }
            scenes_per_sensor.insert(family, scenes.len());
            per_sensor.push(harmonizer.harmonize_all(scenes));
        }

        let merged = Arc::new(MergedCollection::merge(per_sensor));

        let image = PeriodAggregator::new(request.mode, request.strategy).aggregate(
            &merged,
            &request.periods(),
            &request.aoi,
        )?;

        Ok(CountProduct {
            name: request.output_name(),
            mode: request.mode,
            image,
            region: EvaluationRegion {
                aoi: request.aoi.clone(),
                scale: request.scale,
                max_pixels: request.max_pixels,
            },
            scenes_per_sensor,
        })
    }

    /// Build and materialize in one go
    pub fn evaluate<C, E>(&self, catalog: &C, evaluator: &E) -> CountResult<MultiBandRaster>
    where
        C: SceneCatalog + ?Sized,
        E: RasterEvaluator + ?Sized,
    {
        let product = self.build(catalog)?;
        evaluator.evaluate(&product.image, &product.region)
    }

    /// Build and hand the product to a sink
    pub fn export<C, S>(&self, catalog: &C, sink: &S) -> CountResult<ExportReceipt>
    where
        C: SceneCatalog + ?Sized,
        S: RasterSink + ?Sized,
    {
        let product = self.build(catalog)?;
        sink.export(&ExportTask::from_product(&product))
    }
}
