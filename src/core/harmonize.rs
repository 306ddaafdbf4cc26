use crate::core::expr::MaskExpr;
use crate::core::quality_mask::{LegacyCloudRule, QualityRule};
use crate::types::{
    date_code, Band, BoundingBox, CountResult, GeoTransform, MaskImage, ReflectanceValue, Scene,
};
use chrono::NaiveDate;
use ndarray::{Array2, Zip};
use std::sync::Arc;

/// Shared handle to an immutable catalog scene
pub type SceneHandle = Arc<Scene>;

/// Name every sensor's near-infrared band is renamed to
pub const CANONICAL_BAND: &str = "B4";

/// One scene reduced to its canonical NIR band and usable mask.
///
/// The sensor family is resolved at construction and not exposed, so
/// everything downstream treats all sensors alike.
#[derive(Debug, Clone)]
pub struct HarmonizedScene {
    scene: SceneHandle,
    source_band: &'static str,
    usable: MaskExpr,
}

impl HarmonizedScene {
    pub fn scene_id(&self) -> &str {
        &self.scene.id
    }

    pub fn date(&self) -> NaiveDate {
        self.scene.date
    }

    /// `YYYYMMDD` value carried by the date band
    pub fn date_code(&self) -> u32 {
        date_code(self.scene.date)
    }

    pub fn band_name(&self) -> &'static str {
        CANONICAL_BAND
    }

    pub fn usable_expr(&self) -> &MaskExpr {
        &self.usable
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.scene.transform
    }

    pub fn dim(&self) -> (usize, usize) {
        self.scene.dim()
    }

    pub fn footprint(&self) -> BoundingBox {
        self.scene.footprint()
    }

    /// Usable mask restricted to pixels where the canonical band is present
    pub fn usable_mask(&self) -> CountResult<MaskImage> {
        let mut mask = self.usable.evaluate(&self.scene)?;
        let band = self.scene.band(self.source_band)?;
        Zip::from(&mut mask)
            .and(&band.valid)
            .for_each(|m, &v| *m = *m && v);
        Ok(mask)
    }

    /// Canonical band values with the usable mask applied
    pub fn canonical_band(&self) -> CountResult<Band<ReflectanceValue>> {
        let band = self.scene.band(self.source_band)?;
        Band::new(band.data.clone(), self.usable_mask()?)
    }

    /// Date band: the `YYYYMMDD` code wherever the canonical band is usable,
    /// `0` elsewhere
    pub fn date_band(&self) -> CountResult<Array2<u32>> {
        let band = self.canonical_band()?;
        let code = self.date_code();
        Ok(band.valid.mapv(|usable| if usable { code } else { 0 }))
    }
}

/// Selects and renames the NIR band of each scene and attaches its usable mask
#[derive(Debug, Clone, Copy, Default)]
pub struct BandHarmonizer {
    legacy_rule: LegacyCloudRule,
}

impl BandHarmonizer {
    pub fn new(legacy_rule: LegacyCloudRule) -> Self {
        Self { legacy_rule }
    }

    pub fn harmonize(&self, scene: SceneHandle) -> HarmonizedScene {
        let rule = QualityRule::for_family(scene.family, self.legacy_rule);
        let source_band = scene.family.nir_band();
        let usable = rule.usable_mask();

        log::debug!(
            "Harmonizing {} ({}): {} -> {}, usable = {}",
            scene.id,
            scene.family,
            source_band,
            CANONICAL_BAND,
            usable
        );

        HarmonizedScene {
            scene,
            source_band,
            usable,
        }
    }

    pub fn harmonize_all(&self, scenes: Vec<SceneHandle>) -> Vec<HarmonizedScene> {
        scenes.into_iter().map(|s| self.harmonize(s)).collect()
    }
}
