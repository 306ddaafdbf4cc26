#![allow(dead_code)]

use chrono::NaiveDate;
use clearcount::{Band, GeoTransform, Scene, SensorFamily};
use ndarray::Array2;
use std::collections::BTreeMap;

/// Clear land pixel for TM/ETM+ (clear bit, low cloud confidence)
pub const CLEAR_LEGACY: u16 = 66;

/// Clear land pixel for OLI (clear bit, low cloud and cirrus confidence)
pub const CLEAR_OLI: u16 = 322;

/// Cloud with high confidence
pub const CLOUDY: u16 = (1 << 5) | (1 << 6) | (1 << 7);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn product_id(family: SensorFamily, date: NaiveDate) -> String {
    format!(
        "{}_L1TP_023030_{}_20170407_01_T1",
        family.code(),
        date.format("%Y%m%d")
    )
}

/// Scene at 30 m whose top-left corner is `origin`
pub fn scene_on_grid(
    family: SensorFamily,
    date: NaiveDate,
    origin: (f64, f64),
    qa: Array2<u16>,
) -> Scene {
    let shape = qa.dim();
    let mut bands = BTreeMap::new();
    for name in ["B1", "B4", "B5"] {
        bands.insert(name.to_string(), Band::fully_valid(Array2::from_elem(shape, 1200i16)));
    }

    Scene::new(
        product_id(family, date),
        family,
        date,
        GeoTransform::north_up(origin.0, origin.1, 30.0),
        Band::fully_valid(qa),
        bands,
    )
    .expect("valid scene")
}

/// 3x3 scene at 30 m on the grid whose top-left corner is (0, 90)
pub fn scene_with_qa(family: SensorFamily, date: NaiveDate, qa: Array2<u16>) -> Scene {
    scene_on_grid(family, date, (0.0, 90.0), qa)
}

pub fn clear_qa(family: SensorFamily, shape: (usize, usize)) -> Array2<u16> {
    let clear = if family.is_oli() { CLEAR_OLI } else { CLEAR_LEGACY };
    Array2::from_elem(shape, clear)
}

pub fn clear_scene(family: SensorFamily, date: NaiveDate) -> Scene {
    scene_with_qa(family, date, clear_qa(family, (3, 3)))
}

pub fn cloudy_scene(family: SensorFamily, date: NaiveDate) -> Scene {
    scene_with_qa(family, date, Array2::from_elem((3, 3), CLOUDY))
}
