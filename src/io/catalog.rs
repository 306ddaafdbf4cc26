use crate::config::DateRange;
use crate::core::harmonize::SceneHandle;
use crate::types::{Aoi, CountResult, Scene, SensorFamily};
use std::sync::Arc;

/// Date and footprint filter applied to every sensor's archive
#[derive(Debug, Clone)]
pub struct CatalogFilter {
    pub range: DateRange,
    pub aoi: Aoi,
}

impl CatalogFilter {
    pub fn new(range: DateRange, aoi: Aoi) -> Self {
        Self { range, aoi }
    }

    pub fn accepts(&self, scene: &Scene) -> bool {
        self.range.contains(scene.date) && self.aoi.intersects_box(&scene.footprint())
    }
}

/// Source of scenes per sensor family.
///
/// A family with no matching scenes yields an empty list, not an error.
pub trait SceneCatalog {
    fn query(&self, family: SensorFamily, filter: &CatalogFilter) -> CountResult<Vec<SceneHandle>>;
}

/// Catalog over scenes already held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    scenes: Vec<SceneHandle>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scenes<I: IntoIterator<Item = Scene>>(scenes: I) -> Self {
        Self {
            scenes: scenes.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn insert(&mut self, scene: Scene) {
        self.scenes.push(Arc::new(scene));
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

impl SceneCatalog for InMemoryCatalog {
    fn query(&self, family: SensorFamily, filter: &CatalogFilter) -> CountResult<Vec<SceneHandle>> {
        let mut hits: Vec<SceneHandle> = self
            .scenes
            .iter()
            .filter(|s| s.family == family && filter.accepts(s))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

        log::debug!("{} ({}): {} scenes", family, family.collection_id(), hits.len());
        Ok(hits)
    }
}
