//! Cross-sensor merge and per-period counting
//!
//! The merged collection is a plain multiset of harmonized scenes. A
//! [`PeriodCount`] is the deferred reduction over the date bands of the
//! scenes falling in one period: count-distinct of the `YYYYMMDD` codes, or
//! a plain count of usable scenes. It holds the collection explicitly
//! instead of reaching for shared state.

use crate::core::harmonize::HarmonizedScene;
use crate::types::{CountError, Period};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

/// What a pixel's count measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CountStrategy {
    /// Unique acquisition dates; same-day scenes count once
    #[default]
    DistinctDates,
    /// Every scene counts, duplicates included
    AllScenes,
}

impl std::fmt::Display for CountStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CountStrategy::DistinctDates => write!(f, "distinct"),
            CountStrategy::AllScenes => write!(f, "all"),
        }
    }
}

impl FromStr for CountStrategy {
    type Err = CountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "distinct" | "distinct-dates" => Ok(CountStrategy::DistinctDates),
            "all" | "all-scenes" => Ok(CountStrategy::AllScenes),
            _ => Err(CountError::Config(format!("Invalid count strategy: {}", s))),
        }
    }
}

/// All harmonized scenes from every sensor, in no particular order
#[derive(Debug, Clone, Default)]
pub struct MergedCollection {
    scenes: Vec<HarmonizedScene>,
}

impl MergedCollection {
    /// Concatenate per-sensor sets; empty sets are fine
    pub fn merge<I>(sets: I) -> Self
    where
        I: IntoIterator<Item = Vec<HarmonizedScene>>,
    {
        let scenes: Vec<HarmonizedScene> = sets.into_iter().flatten().collect();
        log::info!("Merged collection holds {} scenes", scenes.len());
        Self { scenes }
    }

    pub fn push(&mut self, scene: HarmonizedScene) {
        self.scenes.push(scene);
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn scenes(&self) -> &[HarmonizedScene] {
        &self.scenes
    }

    pub fn in_period(&self, period: Period) -> impl Iterator<Item = &HarmonizedScene> {
        self.scenes.iter().filter(move |s| period.contains(s.date()))
    }

    /// Scenes of a period grouped by acquisition date, dates ascending
    pub fn date_groups(&self, period: Period) -> BTreeMap<NaiveDate, Vec<&HarmonizedScene>> {
        let mut groups: BTreeMap<NaiveDate, Vec<&HarmonizedScene>> = BTreeMap::new();
        for scene in self.in_period(period) {
            groups.entry(scene.date()).or_default().push(scene);
        }
        groups
    }
}

/// Deferred per-pixel count for one period
#[derive(Debug, Clone)]
pub struct PeriodCount {
    collection: Arc<MergedCollection>,
    period: Period,
    strategy: CountStrategy,
}

/// Describe the count for `period` over `collection`
pub fn count_period(
    collection: &Arc<MergedCollection>,
    period: Period,
    strategy: CountStrategy,
) -> PeriodCount {
    PeriodCount {
        collection: Arc::clone(collection),
        period,
        strategy,
    }
}

impl PeriodCount {
    pub fn period(&self) -> Period {
        self.period
    }

    pub fn strategy(&self) -> CountStrategy {
        self.strategy
    }

    pub fn collection(&self) -> &Arc<MergedCollection> {
        &self.collection
    }

    /// Scenes of the period, ascending by date code and then scene id.
    ///
    /// Distinct-date reduction relies on this order: equal codes are adjacent.
    pub fn contributions(&self) -> Vec<&HarmonizedScene> {
        let mut scenes: Vec<&HarmonizedScene> = self.collection.in_period(self.period).collect();
        scenes.sort_by(|a, b| {
            a.date_code()
                .cmp(&b.date_code())
                .then_with(|| a.scene_id().cmp(b.scene_id()))
        });
        scenes
    }

    /// Upper bound of any pixel's count
    pub fn max_count(&self) -> usize {
        match self.strategy {
            CountStrategy::DistinctDates => self.collection.date_groups(self.period).len(),
            CountStrategy::AllScenes => self.collection.in_period(self.period).count(),
        }
    }
}
