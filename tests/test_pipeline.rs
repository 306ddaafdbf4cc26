mod common;

use approx::assert_relative_eq;
use clearcount::core::{PixelType, RasterData};
use clearcount::{
    AggregationMode, Aoi, CountConfig, CountError, CountRequest, CountStrategy, DateRange,
    InMemoryCatalog, LegacyCloudRule, LocalEvaluator, MultiBandRaster, ObservationCounter,
    SensorFamily,
};
use common::*;
use ndarray::Array2;

fn square() -> Aoi {
    Aoi::rectangle(0.0, 0.0, 90.0, 90.0).expect("valid aoi")
}

fn run(catalog: &InMemoryCatalog, request: CountRequest) -> MultiBandRaster {
    ObservationCounter::new(request)
        .evaluate(catalog, &LocalEvaluator::new())
        .expect("evaluation succeeds")
}

fn monthly(start_year: i32, end_year: i32, start_month: u32, end_month: u32) -> CountRequest {
    let range = DateRange::new(start_year, end_year, start_month, end_month).expect("valid range");
    CountRequest::new(range, square(), AggregationMode::Monthly)
}

fn yearly(start_year: i32, end_year: i32, start_month: u32, end_month: u32) -> CountRequest {
    let range = DateRange::new(start_year, end_year, start_month, end_month).expect("valid range");
    CountRequest::new(range, square(), AggregationMode::Yearly)
}

#[test]
fn test_same_day_two_sensors_counts_once() {
    init_logging();

    let catalog = InMemoryCatalog::with_scenes(vec![
        clear_scene(SensorFamily::Le07, date(2015, 6, 10)),
        clear_scene(SensorFamily::Lc08, date(2015, 6, 10)),
    ]);

    let raster = run(&catalog, monthly(2015, 2015, 6, 6));

    assert_eq!(raster.labels, vec!["jun"]);
    assert_eq!(raster.pixel_type(), PixelType::Float64);
    assert_eq!(raster.dim(), (1, 3, 3));
    for r in 0..3 {
        for c in 0..3 {
            assert_eq!(raster.value(0, r, c), Some(1.0));
        }
    }
}

#[test]
fn test_all_scenes_strategy_counts_every_scene() {
    init_logging();

    let catalog = InMemoryCatalog::with_scenes(vec![
        clear_scene(SensorFamily::Le07, date(2015, 6, 10)),
        clear_scene(SensorFamily::Lc08, date(2015, 6, 10)),
    ]);

    let raster = run(
        &catalog,
        monthly(2015, 2015, 6, 6).with_strategy(CountStrategy::AllScenes),
    );
    assert_eq!(raster.value(0, 1, 1), Some(2.0));
}

#[test]
fn test_fully_masked_scene_is_no_data() {
    init_logging();

    let catalog = InMemoryCatalog::with_scenes(vec![cloudy_scene(SensorFamily::Lt05, date(1995, 7, 3))]);

    let raster = run(&catalog, monthly(1995, 1995, 7, 7));
    assert_eq!(raster.valid_count(0), 0);
    assert_eq!(raster.value(0, 0, 0), None);
}

#[test]
fn test_partially_masked_scene() {
    init_logging();

    let mut qa = Array2::from_elem((3, 3), CLEAR_OLI);
    qa[[0, 0]] = CLOUDY;
    // cirrus with medium and high confidence
    qa[[2, 2]] = CLEAR_OLI | (1 << 9);

    let catalog = InMemoryCatalog::with_scenes(vec![
        scene_with_qa(SensorFamily::Lc08, date(2016, 8, 1), qa),
        clear_scene(SensorFamily::Lc08, date(2016, 8, 17)),
    ]);

    let raster = run(&catalog, monthly(2016, 2016, 8, 8));
    assert_eq!(raster.value(0, 0, 0), Some(1.0));
    assert_eq!(raster.value(0, 2, 2), Some(1.0));
    assert_eq!(raster.value(0, 1, 1), Some(2.0));
}

#[test]
fn test_legacy_saturation_and_cloud_rule() {
    init_logging();

    let mut scene = clear_scene(SensorFamily::Lt05, date(1990, 5, 5));
    scene
        .reflectance
        .get_mut("B1")
        .expect("B1 present")
        .data[[1, 1]] = 20000;
    // cloud bit without high confidence
    scene.qa.data[[0, 1]] = CLEAR_LEGACY | (1 << 5);

    let catalog = InMemoryCatalog::with_scenes(vec![scene]);

    let any_flag = run(&catalog, monthly(1990, 1990, 5, 5));
    assert_eq!(any_flag.value(0, 1, 1), None);
    assert_eq!(any_flag.value(0, 0, 1), None);
    assert_eq!(any_flag.value(0, 0, 0), Some(1.0));

    let confident = run(
        &catalog,
        monthly(1990, 1990, 5, 5).with_legacy_cloud_rule(LegacyCloudRule::ConfidentCloud),
    );
    assert_eq!(confident.value(0, 0, 1), Some(1.0));
    assert_eq!(confident.value(0, 1, 1), None);
}

#[test]
fn test_monthly_and_yearly_totals_agree() {
    init_logging();

    let catalog = InMemoryCatalog::with_scenes(vec![
        clear_scene(SensorFamily::Lt05, date(2010, 4, 2)),
        clear_scene(SensorFamily::Le07, date(2010, 4, 10)),
        clear_scene(SensorFamily::Le07, date(2011, 6, 1)),
        clear_scene(SensorFamily::Lc08, date(2013, 6, 1)),
        clear_scene(SensorFamily::Le07, date(2013, 6, 1)),
        clear_scene(SensorFamily::Lc08, date(2013, 9, 20)),
        cloudy_scene(SensorFamily::Lc08, date(2014, 5, 5)),
    ]);

    let by_month = run(&catalog, monthly(2010, 2014, 4, 9));
    let by_year = run(&catalog, yearly(2010, 2014, 4, 9));

    assert_eq!(by_month.labels, vec!["apr", "may", "jun", "jul", "aug", "sep"]);
    assert_eq!(by_year.labels, vec!["2010", "2011", "2012", "2013", "2014"]);
    assert_eq!(by_year.pixel_type(), PixelType::Int32);

    let month_total: f64 = (0..6).map(|b| by_month.band_or_zero(b)[[1, 1]]).sum();
    let year_total: f64 = (0..5).map(|b| by_year.band_or_zero(b)[[1, 1]]).sum();
    assert_relative_eq!(month_total, 5.0);
    assert_relative_eq!(month_total, year_total);

    assert_eq!(by_month.value(0, 0, 0), Some(2.0));
    assert_eq!(by_month.value(1, 0, 0), None);
    assert_eq!(by_year.value(3, 0, 0), Some(2.0));
    assert_eq!(by_year.value(2, 0, 0), None);
}

#[test]
fn test_adding_scenes_never_lowers_counts() {
    init_logging();

    let mut catalog = InMemoryCatalog::with_scenes(vec![
        clear_scene(SensorFamily::Lt05, date(2000, 7, 1)),
        clear_scene(SensorFamily::Le07, date(2001, 7, 9)),
    ]);
    let before = run(&catalog, monthly(2000, 2001, 7, 7)).band_or_zero(0);

    catalog.insert(cloudy_scene(SensorFamily::Le07, date(2000, 7, 17)));
    catalog.insert(clear_scene(SensorFamily::Lt05, date(2001, 7, 9)));
    catalog.insert(clear_scene(SensorFamily::Lt05, date(2001, 7, 25)));
    let after = run(&catalog, monthly(2000, 2001, 7, 7)).band_or_zero(0);

    assert!(after.iter().zip(before.iter()).all(|(a, b)| a >= b));
    assert_relative_eq!(after[[0, 0]], 3.0);
}

#[test]
fn test_evaluation_is_deterministic() {
    init_logging();

    let catalog = InMemoryCatalog::with_scenes(vec![
        clear_scene(SensorFamily::Lt04, date(1989, 6, 1)),
        clear_scene(SensorFamily::Lt05, date(1989, 6, 1)),
        cloudy_scene(SensorFamily::Lt05, date(1989, 6, 17)),
    ]);

    let first = run(&catalog, yearly(1989, 1989, 1, 12));
    let second = run(&catalog, yearly(1989, 1989, 1, 12));
    assert_eq!(first, second);
    assert_eq!(first.labels, vec!["1989"]);
}

#[test]
fn test_yearly_output_is_clipped() {
    init_logging();

    let triangle = Aoi::polygon(vec![(0.0, 0.0), (90.0, 0.0), (0.0, 90.0)]).expect("valid aoi");
    let catalog = InMemoryCatalog::with_scenes(vec![clear_scene(SensorFamily::Lc08, date(2019, 3, 3))]);

    let range = DateRange::new(2019, 2019, 1, 12).expect("valid range");
    let raster = run(
        &catalog,
        CountRequest::new(range, triangle.clone(), AggregationMode::Yearly),
    );
    assert_eq!(raster.value(0, 2, 0), Some(1.0));
    assert_eq!(raster.value(0, 0, 2), None);
    match &raster.data {
        RasterData::Int32(data) => assert_eq!(data[[0, 2, 0]], 1),
        RasterData::Float64(_) => panic!("yearly output must be integer"),
    }

    // Monthly output keeps pixels outside the polygon
    let range = DateRange::new(2019, 2019, 3, 3).expect("valid range");
    let raster = run(
        &catalog,
        CountRequest::new(range, triangle, AggregationMode::Monthly),
    );
    assert_eq!(raster.value(0, 0, 2), Some(1.0));
}

#[test]
fn test_scenes_outside_the_range_are_ignored() {
    init_logging();

    let catalog = InMemoryCatalog::with_scenes(vec![
        clear_scene(SensorFamily::Lc08, date(2015, 6, 10)),
        clear_scene(SensorFamily::Lc08, date(2015, 10, 10)),
        clear_scene(SensorFamily::Lc08, date(2017, 6, 10)),
    ]);

    let raster = run(&catalog, yearly(2015, 2016, 5, 9));
    assert_eq!(raster.value(0, 1, 1), Some(1.0));
    assert_eq!(raster.value(1, 1, 1), None);
}

#[test]
fn test_pixel_ceiling_is_reported() {
    init_logging();

    let catalog = InMemoryCatalog::with_scenes(vec![clear_scene(SensorFamily::Lc08, date(2015, 6, 10))]);

    let result = ObservationCounter::new(monthly(2015, 2015, 6, 6).with_max_pixels(4))
        .evaluate(&catalog, &LocalEvaluator::new());

    match result {
        Err(CountError::External(message)) => {
            assert!(message.starts_with("Too many pixels in the region"));
        }
        other => panic!("expected a pixel ceiling error, got {:?}", other),
    }
}

#[test]
fn test_build_reports_catalog_hits() {
    init_logging();

    let catalog = InMemoryCatalog::with_scenes(vec![
        clear_scene(SensorFamily::Le07, date(2015, 6, 10)),
        clear_scene(SensorFamily::Lc08, date(2015, 6, 10)),
        clear_scene(SensorFamily::Lc08, date(2015, 6, 26)),
    ]);

    let product = ObservationCounter::new(monthly(2015, 2015, 6, 6))
        .build(&catalog)
        .expect("build succeeds");

    assert_eq!(product.name, "CountLandsatByMonth6_6");
    assert_eq!(product.scenes_per_sensor[&SensorFamily::Lc08], 2);
    assert_eq!(product.scenes_per_sensor[&SensorFamily::Le07], 1);
    assert_eq!(product.scenes_per_sensor[&SensorFamily::Lt04], 0);
    assert_eq!(product.image.bands()[0].count.max_count(), 2);
}

#[test]
fn test_counter_from_xml_config() {
    init_logging();

    let xml = r#"
        <countConfig>
            <startYear>2015</startYear>
            <endYear>2015</endYear>
            <startMonth>6</startMonth>
            <endMonth>6</endMonth>
            <aoi>
                <vertex x="0" y="0"/>
                <vertex x="90" y="0"/>
                <vertex x="90" y="90"/>
                <vertex x="0" y="90"/>
            </aoi>
            <mode>yearly</mode>
            <countStrategy>all</countStrategy>
        </countConfig>
    "#;
    let config = CountConfig::from_xml_str(xml).expect("valid config");
    let counter = ObservationCounter::from_config(&config).expect("valid request");
    assert_eq!(counter.request().output_name(), "CountLandsatByYear2015_2015");

    let catalog = InMemoryCatalog::with_scenes(vec![
        clear_scene(SensorFamily::Le07, date(2015, 6, 10)),
        clear_scene(SensorFamily::Lc08, date(2015, 6, 10)),
    ]);
    let raster = counter
        .evaluate(&catalog, &LocalEvaluator::new())
        .expect("evaluation succeeds");
    assert_eq!(raster.value(0, 0, 0), Some(2.0));
}

#[test]
fn test_single_year_months_sum_to_year_at_every_pixel() {
    init_logging();

    let mut patchy = Array2::from_elem((3, 3), CLEAR_OLI);
    patchy[[0, 0]] = CLOUDY;
    patchy[[2, 1]] = CLOUDY;

    let mut shadowed = Array2::from_elem((3, 3), CLEAR_LEGACY);
    shadowed[[1, 1]] = CLEAR_LEGACY | (1 << 3);

    let catalog = InMemoryCatalog::with_scenes(vec![
        clear_scene(SensorFamily::Le07, date(2017, 1, 9)),
        scene_with_qa(SensorFamily::Lc08, date(2017, 1, 9), patchy.clone()),
        scene_with_qa(SensorFamily::Lc08, date(2017, 3, 30), patchy),
        scene_with_qa(SensorFamily::Le07, date(2017, 3, 22), shadowed.clone()),
        scene_with_qa(SensorFamily::Le07, date(2017, 8, 14), shadowed),
        clear_scene(SensorFamily::Lc08, date(2017, 8, 22)),
        cloudy_scene(SensorFamily::Lc08, date(2017, 11, 3)),
    ]);

    let by_month = run(&catalog, monthly(2017, 2017, 1, 12));
    let by_year = run(&catalog, yearly(2017, 2017, 1, 12));
    assert_eq!(by_month.labels.len(), 12);
    assert_eq!(by_year.labels, vec!["2017"]);

    let year = by_year.band_or_zero(0);
    for r in 0..3 {
        for c in 0..3 {
            let month_sum: f64 = (0..12).map(|b| by_month.band_or_zero(b)[[r, c]]).sum();
            assert_relative_eq!(month_sum, year[[r, c]]);
        }
    }
    assert_relative_eq!(year[[1, 1]], 3.0);
    assert_relative_eq!(year[[0, 0]], 4.0);
}

#[test]
fn test_partial_scene_coverage() {
    init_logging();

    let catalog = InMemoryCatalog::with_scenes(vec![
        // Covers columns 1 and 2 of the output grid
        scene_on_grid(SensorFamily::Lc08, date(2018, 5, 2), (30.0, 90.0), clear_qa(SensorFamily::Lc08, (3, 3))),
        // One pixel under the bottom-left output pixel, same day
        scene_on_grid(SensorFamily::Le07, date(2018, 5, 2), (0.0, 30.0), clear_qa(SensorFamily::Le07, (1, 1))),
        // Grid offset by half a pixel, reaching only the top-left output pixel
        scene_on_grid(SensorFamily::Lc08, date(2018, 5, 18), (-45.0, 135.0), clear_qa(SensorFamily::Lc08, (3, 3))),
    ]);

    let raster = run(&catalog, monthly(2018, 2018, 5, 5));

    assert_eq!(raster.value(0, 0, 0), Some(1.0));
    assert_eq!(raster.value(0, 1, 0), None);
    assert_eq!(raster.value(0, 2, 0), Some(1.0));
    for r in 0..3 {
        assert_eq!(raster.value(0, r, 1), Some(1.0));
        assert_eq!(raster.value(0, r, 2), Some(1.0));
    }
}

#[test]
fn test_huge_aoi_reports_pixel_ceiling() {
    init_logging();

    let range = DateRange::new(2015, 2015, 6, 6).expect("valid range");
    let aoi = Aoi::rectangle(0.0, 0.0, 1e150, 1e150).expect("valid aoi");
    let catalog = InMemoryCatalog::with_scenes(vec![clear_scene(SensorFamily::Lc08, date(2015, 6, 10))]);

    let result = ObservationCounter::new(CountRequest::new(range, aoi, AggregationMode::Monthly))
        .evaluate(&catalog, &LocalEvaluator::new());

    assert!(matches!(result, Err(CountError::External(_))));
}
