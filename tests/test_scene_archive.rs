mod common;

use clearcount::config::DateRange;
use clearcount::io::{write_scene_archive, CatalogFilter, SceneReader};
use clearcount::{
    AggregationMode, Aoi, ArchiveCatalog, CountError, CountRequest, InMemoryCatalog,
    LocalEvaluator, ObservationCounter, SceneCatalog, SensorFamily,
};
use common::*;
use std::io::Write;

#[test]
fn test_scene_archive_roundtrip() {
    init_logging();

    let dir = tempfile::tempdir().expect("temp dir");
    let mut scene = clear_scene(SensorFamily::Lc08, date(2015, 6, 10));
    scene.qa.valid[[0, 0]] = false;
    scene.reflectance.get_mut("B5").expect("B5 present").valid[[1, 2]] = false;

    let path = dir.path().join("scene.zip");
    write_scene_archive(&scene, &path).expect("write archive");

    let read = SceneReader::open(&path)
        .expect("open archive")
        .read_scene()
        .expect("read scene");

    assert_eq!(read.id, scene.id);
    assert_eq!(read.family, SensorFamily::Lc08);
    assert_eq!(read.date, date(2015, 6, 10));
    assert_eq!(read.transform, scene.transform);
    assert_eq!(read.qa.valid, scene.qa.valid);
    assert_eq!(read.qa.data[[1, 1]], CLEAR_OLI);
    assert_eq!(read.reflectance["B5"].valid, scene.reflectance["B5"].valid);
    assert_eq!(read.reflectance["B4"].data, scene.reflectance["B4"].data);
}

#[test]
fn test_archive_catalog_matches_memory_catalog() {
    init_logging();

    let scenes = vec![
        clear_scene(SensorFamily::Lt05, date(2009, 6, 3)),
        clear_scene(SensorFamily::Le07, date(2009, 6, 11)),
        clear_scene(SensorFamily::Le07, date(2012, 6, 11)),
        cloudy_scene(SensorFamily::Lc08, date(2014, 7, 1)),
        clear_scene(SensorFamily::Lc08, date(2014, 7, 17)),
    ];

    let dir = tempfile::tempdir().expect("temp dir");
    for (i, scene) in scenes.iter().enumerate() {
        write_scene_archive(scene, dir.path().join(format!("scene_{}.zip", i)))
            .expect("write archive");
    }
    // Non-archive files are skipped
    std::fs::write(dir.path().join("README.txt"), "scenes").expect("write readme");

    let archive = ArchiveCatalog::open(dir.path()).expect("open catalog");
    assert_eq!(archive.len(), 5);

    let filter = CatalogFilter::new(
        DateRange::new(2009, 2014, 6, 7).expect("valid range"),
        Aoi::rectangle(0.0, 0.0, 90.0, 90.0).expect("valid aoi"),
    );
    let le07 = archive.query(SensorFamily::Le07, &filter).expect("query");
    assert_eq!(le07.len(), 2);
    assert!(le07[0].date < le07[1].date);

    let memory = InMemoryCatalog::with_scenes(scenes);
    let range = DateRange::new(2009, 2014, 6, 7).expect("valid range");
    let aoi = Aoi::rectangle(0.0, 0.0, 90.0, 90.0).expect("valid aoi");
    let counter = ObservationCounter::new(CountRequest::new(range, aoi, AggregationMode::Monthly));

    let from_disk = counter
        .evaluate(&archive, &LocalEvaluator::new())
        .expect("evaluate archive catalog");
    let from_memory = counter
        .evaluate(&memory, &LocalEvaluator::new())
        .expect("evaluate memory catalog");

    assert_eq!(from_disk, from_memory);
    assert_eq!(from_disk.value(0, 1, 1), Some(3.0));
    assert_eq!(from_disk.value(1, 1, 1), Some(1.0));
}

#[test]
fn test_manifest_must_agree_with_product_id() {
    init_logging();

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("bad.zip");

    let file = std::fs::File::create(&path).expect("create archive");
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("manifest.xml", zip::write::FileOptions::default())
        .expect("start manifest");
    zip.write_all(
        br#"<scene id="LC08_L1TP_023030_20150610_20170407_01_T1" sensor="LE07" date="2015-06-10">
              <grid rows="1" cols="1" originX="0" originY="30" pixelSize="30"/>
              <band name="pixel_qa" file="pixel_qa.raw" dtype="uint16"/>
            </scene>"#,
    )
    .expect("write manifest");
    zip.finish().expect("finish archive");

    let result = SceneReader::open(&path).expect("open archive").read_scene();
    assert!(matches!(result, Err(CountError::InvalidFormat(_))));
}

#[test]
fn test_missing_archive_is_io_error() {
    let result = SceneReader::open("/nonexistent/scene.zip");
    assert!(matches!(result, Err(CountError::Io(_))));
}

fn archive_with_grid(path: &std::path::Path, rows: &str, cols: &str) {
    let file = std::fs::File::create(path).expect("create archive");
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("manifest.xml", zip::write::FileOptions::default())
        .expect("start manifest");
    let manifest = format!(
        r#"<scene id="LE07_L1TP_023030_20150610_20170407_01_T1" sensor="LE07" date="2015-06-10">
              <grid rows="{}" cols="{}" originX="0" originY="30" pixelSize="30"/>
              <band name="pixel_qa" file="pixel_qa.raw" dtype="uint16"/>
            </scene>"#,
        rows, cols
    );
    zip.write_all(manifest.as_bytes()).expect("write manifest");
    zip.start_file("pixel_qa.raw", zip::write::FileOptions::default())
        .expect("start band");
    zip.write_all(&66u16.to_le_bytes()).expect("write band");
    zip.finish().expect("finish archive");
}

#[test]
fn test_oversized_grid_is_rejected() {
    init_logging();

    let dir = tempfile::tempdir().expect("temp dir");

    // rows * cols * 2 overflows usize
    let overflowing = dir.path().join("overflow.zip");
    archive_with_grid(&overflowing, "8589934592", "8589934592");
    let result = SceneReader::open(&overflowing).expect("open archive").read_scene();
    assert!(matches!(result, Err(CountError::InvalidFormat(_))));

    // 20 GB declared, 2 bytes stored
    let truncated = dir.path().join("truncated.zip");
    archive_with_grid(&truncated, "100000", "100000");
    let result = SceneReader::open(&truncated).expect("open archive").read_scene();
    assert!(matches!(result, Err(CountError::InvalidFormat(_))));
}
