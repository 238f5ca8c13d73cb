mod common;

use chrono::Datelike;
use common::{grid_config, int16, observation, tile, utc, MemoryCatalog, MemoryReader, ValueMaskDecoder};
use ndarray::{Array2, Axis};
use stack_stats::config::{MaskSpec, SourceSpec, StatsConfig};
use stack_stats::errors::{ErrorKind, StatsError};
use stack_stats::geometry::{ChunkWindow, GridSpec, Resolution, TileIndex};
use stack_stats::loader::load_data;
use stack_stats::model::DType;
use stack_stats::orchestrator::{process_task, run_tasks, Collaborators};
use stack_stats::output::create_driver;
use stack_stats::products::make_products;
use stack_stats::sources::SourceTile;
use stack_stats::statistics::StatisticRegistry;
use stack_stats::tasks::{make_tasks, SourceBundle, Task};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const PRODUCTS: &str = "
  - name: nbar_mean
    statistic: mean
    file_path_template: 'mean/{x}_{y}/MEAN_{x}_{y}_{start_time:%Y%m%d}.nc'
  - name: nbar_p50
    statistic: percentile_50
    file_path_template: 'p50/P50_{x}_{y}_{start_time}.nc'
    exclude_variables: [red_observed]
    dtype_overrides: {nir: float32}
";

const TIFF_PRODUCTS: &str = "
  - name: nbar_mean
    statistic: mean
    file_path_template: 'mean/{x}_{y}/{name}_{var_name}_{start_time:%Y}.tif'
";

fn grid() -> GridSpec {
    GridSpec {
        crs: "EPSG:3577".to_string(),
        tile_size: Resolution { x: 100.0, y: 100.0 },
        resolution: Resolution { x: 25.0, y: -25.0 },
    }
}

fn filled(value: f32) -> Array2<f32> {
    Array2::from_elem((4, 4), value)
}

/// Two tiles with two 2015 observations and one 2016 observation each
fn fixtures() -> (MemoryCatalog, MemoryReader) {
    let measurements = vec![int16("red"), int16("nir")];
    let mut catalog = MemoryCatalog::default().with_product("nbar", measurements.clone());
    let mut reader = MemoryReader::default().with_product("nbar", measurements);

    for x in [0, 1] {
        let index = TileIndex::new(x, 0);
        let paths = [
            (utc(2015, 3, 1), format!("t{x}_a.nc")),
            (utc(2015, 6, 1), format!("t{x}_b.nc")),
            (utc(2016, 3, 1), format!("t{x}_c.nc")),
        ];
        let observations = paths.iter().map(|(t, p)| observation(*t, p)).collect();
        catalog = catalog.with_tile(index, tile("nbar", grid().tile_geobox(index), observations));

        let mut second = filled(20.0);
        second[[0, 0]] = -999.0;
        reader = reader
            .with_file(&paths[0].1, "red", filled(10.0))
            .with_file(&paths[0].1, "nir", filled(30.0))
            .with_file(&paths[1].1, "red", second)
            .with_file(&paths[1].1, "nir", filled(40.0))
            .with_file(&paths[2].1, "red", filled(5.0))
            .with_file(&paths[2].1, "nir", filled(50.0));
    }
    (catalog, reader)
}

fn first_task(config: &StatsConfig, catalog: &MemoryCatalog) -> Task {
    let products = Arc::new(make_products(config, catalog, &StatisticRegistry::standard().unwrap()).unwrap());
    make_tasks(config, catalog, products).unwrap().next().unwrap().unwrap()
}

#[test]
fn test_config_validation() {
    let dir = tempdir().unwrap();
    let config = grid_config(dir.path(), "NetCDF CF", PRODUCTS);
    assert_eq!(config.time_periods().unwrap().len(), 2);
    assert!(!config.is_region_mode());

    let duplicate = format!(
        "{PRODUCTS}  - name: nbar_mean\n    statistic: max\n    file_path_template: 'x.nc'\n"
    );
    let err = StatsConfig::from_yaml_str(&config_document(dir.path(), &duplicate)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("Duplicates found"));

    let no_tile = config_document(dir.path(), PRODUCTS).replace("  tile_size: {x: 100.0, y: 100.0}\n", "");
    assert!(StatsConfig::from_yaml_str(&no_tile).is_err());

    let bad_chunking = config_document(dir.path(), PRODUCTS).replace("{x: 2, y: 2, time: 1}", "{x: 2, y: 2}");
    assert!(StatsConfig::from_yaml_str(&bad_chunking).is_err());

    let bad_interval = config_document(dir.path(), PRODUCTS).replace("step_size: 1y", "step_size: 1q");
    assert!(StatsConfig::from_yaml_str(&bad_interval).is_err());

    let reversed = config_document(dir.path(), PRODUCTS).replace("end_date: 2017-01-01", "end_date: 2014-01-01");
    assert!(StatsConfig::from_yaml_str(&reversed).is_err());
}

fn config_document(location: &Path, products: &str) -> String {
    format!(
        "
location: {}
start_date: 2015-01-01
end_date: 2017-01-01
stats_duration: 1y
step_size: 1y
storage:
  driver: NetCDF CF
  crs: EPSG:3577
  tile_size: {{x: 100.0, y: 100.0}}
  resolution: {{x: 25, y: -25}}
  chunking: {{x: 2, y: 2, time: 1}}
  dimension_order: [time, y, x]
sources:
  - product: nbar
    measurements: [red, nir]
output_products:
{products}
",
        location.display()
    )
}

#[test]
fn test_make_products_applies_exclusions_and_overrides() {
    let dir = tempdir().unwrap();
    let config = grid_config(dir.path(), "NetCDF CF", PRODUCTS);
    let (catalog, _) = fixtures();

    let products = make_products(&config, &catalog, &StatisticRegistry::standard().unwrap()).unwrap();
    assert_eq!(products.len(), 2);
    assert!(products.needs_masked());
    assert!(!products.needs_unmasked());

    let p50 = products.get("nbar_p50").unwrap();
    assert_eq!(p50.measurements.len(), 4 * 2 - 1);
    assert!(p50.measurement("red_observed").is_none());
    assert_eq!(p50.measurement("nir").unwrap().dtype, DType::Float32);
    assert_eq!(p50.measurement("red").unwrap().dtype, DType::Int16);
    assert_eq!(p50.compression(), Some(4));
    assert!(p50.shuffle());
}

#[test]
fn test_make_products_errors() {
    let dir = tempdir().unwrap();
    let (catalog, _) = fixtures();
    let registry = StatisticRegistry::standard().unwrap();

    let unknown = "
  - name: nbar_mode
    statistic: mode
    file_path_template: 'mode.nc'
";
    let err = make_products(&grid_config(dir.path(), "NetCDF CF", unknown), &catalog, &registry).unwrap_err();
    assert!(matches!(err, StatsError::UnknownStatistic { .. }));

    let ndwi = "
  - name: nbar_ndwi
    statistic: ndwi_stats
    file_path_template: 'ndwi.nc'
";
    let err = make_products(&grid_config(dir.path(), "NetCDF CF", ndwi), &catalog, &registry).unwrap_err();
    assert!(matches!(err, StatsError::MissingBand { .. }));

    let bad_exclusion = "
  - name: nbar_mean
    statistic: mean
    file_path_template: 'mean.nc'
    exclude_variables: [blue]
";
    let err = make_products(&grid_config(dir.path(), "NetCDF CF", bad_exclusion), &catalog, &registry).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let unknown_band = config_document(dir.path(), PRODUCTS).replace("[red, nir]", "[red, swir3]");
    let config = StatsConfig::from_yaml_str(&unknown_band).unwrap();
    assert!(make_products(&config, &catalog, &registry).is_err());
}

#[test]
fn test_grid_tasks_per_cell_and_period() {
    let dir = tempdir().unwrap();
    let config = grid_config(dir.path(), "NetCDF CF", PRODUCTS);
    let (catalog, _) = fixtures();
    let products = Arc::new(make_products(&config, &catalog, &StatisticRegistry::standard().unwrap()).unwrap());

    let tasks: Vec<Task> = make_tasks(&config, &catalog, products)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(tasks.len(), 4);
    for task in &tasks {
        assert_eq!(task.products.len(), 2);
        assert_eq!(task.sources.len(), 1);
        assert_eq!(task.geobox().unwrap().shape(), (4, 4));
    }

    let keys: Vec<(i32, Option<TileIndex>)> = tasks
        .iter()
        .map(|t| (t.period.start.year(), t.tile_index))
        .collect();
    assert_eq!(
        keys,
        vec![
            (2015, Some(TileIndex::new(0, 0))),
            (2015, Some(TileIndex::new(1, 0))),
            (2016, Some(TileIndex::new(0, 0))),
            (2016, Some(TileIndex::new(1, 0))),
        ]
    );
    assert_eq!(tasks[0].observation_count(), 2);
    assert_eq!(tasks[2].observation_count(), 1);
}

#[test]
fn test_region_tasks_skip_empty_periods() {
    let dir = tempdir().unwrap();
    let document = config_document(dir.path(), PRODUCTS)
        .replace("  tile_size: {x: 100.0, y: 100.0}\n", "")
        .replace("start_date: 2015-01-01", "start_date: 2014-01-01")
        .replace("end_date: 2017-01-01", "end_date: 2016-01-01")
        .replace("  - product: nbar\n", "  - product: nbar\n    group_by: solar_day\n")
        + "input_region: {x: [0.0, 100.0], y: [0.0, 200.0]}\n";
    let config = StatsConfig::from_yaml_str(&document).unwrap();
    assert!(config.is_region_mode());

    let (catalog, _) = fixtures();
    let products = Arc::new(make_products(&config, &catalog, &StatisticRegistry::standard().unwrap()).unwrap());
    let tasks: Vec<Task> = make_tasks(&config, &catalog, products)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    // 2014 has no observations
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.period.start, utc(2015, 1, 1));
    assert_eq!(task.tile_index, None);
    assert_eq!(task.geobox().unwrap().shape(), (8, 4));
}

fn bundle(product: &str, times: &[(i32, u32)], masks: Vec<Option<SourceTile>>) -> SourceBundle {
    let observations = times
        .iter()
        .map(|&(year, month)| observation(utc(year, month, 1), &format!("{product}_{year}_{month}.nc")))
        .collect();
    let mask_specs = masks
        .iter()
        .map(|_| MaskSpec {
            product: "pq".to_string(),
            measurement: "pixelquality".to_string(),
            flags: BTreeMap::new(),
            fuse_func: None,
        })
        .collect();
    SourceBundle {
        spec: SourceSpec {
            product: product.to_string(),
            measurements: vec!["red".to_string()],
            masks: mask_specs,
            group_by: None,
        },
        data: tile(product, common::geobox(2, 2), observations),
        masks,
    }
}

fn dated_reader(products: &[&str]) -> MemoryReader {
    let mut reader = MemoryReader::default().with_product("pq", vec![int16("pixelquality")]);
    for product in products {
        reader = reader.with_product(product, vec![int16("red")]);
        for month in 1..=12 {
            let path = format!("{product}_2015_{month}.nc");
            let mut values = Array2::from_elem((2, 2), month as f32);
            values[[1, 1]] = -999.0;
            reader = reader.with_file(&path, "red", values);
        }
    }
    reader
}

#[test]
fn test_loader_merges_sources_by_time() {
    let bundles = vec![
        bundle("ls8", &[(2015, 2), (2015, 6)], vec![]),
        bundle("ls7", &[(2015, 1), (2015, 4), (2015, 6)], vec![]),
    ];
    let reader = dated_reader(&["ls8", "ls7"]);
    let window = ChunkWindow::new(0..2, 0..2);

    let merged = load_data(&window, &bundles, true, &reader, &ValueMaskDecoder).unwrap();
    assert!(merged.is_masked());
    assert_eq!(merged.sources(), &[1, 0, 1, 0, 1]);
    let months: Vec<f32> = merged.band("red").unwrap().data.index_axis(Axis(1), 0).column(0).to_vec();
    assert_eq!(months, vec![1.0, 2.0, 4.0, 6.0, 6.0]);
    assert!(merged.times().windows(2).all(|w| w[0] <= w[1]));
    assert!(merged.band("red").unwrap().data[[0, 1, 1]].is_nan());

    let raw = load_data(&window, &bundles, false, &reader, &ValueMaskDecoder).unwrap();
    assert!(!raw.is_masked());
    assert_eq!(raw.band("red").unwrap().data[[0, 1, 1]], -999.0);
}

#[test]
fn test_loader_applies_masks_and_drops_unmatched_slices() {
    let mask_tile = tile(
        "pq",
        common::geobox(2, 2),
        vec![observation(utc(2015, 3, 1), "pq_2015_3.nc")],
    );
    let bundles = vec![bundle("ls8", &[(2015, 3), (2015, 5)], vec![Some(mask_tile)])];
    let mut reader = dated_reader(&["ls8"]);
    let mut quality = Array2::from_elem((2, 2), 1.0);
    quality[[0, 1]] = 0.0;
    reader = reader.with_file("pq_2015_3.nc", "pixelquality", quality);

    let window = ChunkWindow::new(0..2, 0..2);
    let merged = load_data(&window, &bundles, true, &reader, &ValueMaskDecoder).unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged.times(), &[utc(2015, 3, 1)]);
    let red = &merged.band("red").unwrap().data;
    assert_eq!(red[[0, 0, 0]], 3.0);
    assert!(red[[0, 0, 1]].is_nan());

    let missing = vec![bundle("ls8", &[(2015, 3)], vec![None])];
    let err = load_data(&window, &missing, true, &reader, &ValueMaskDecoder).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
}

#[test]
fn test_netcdf_driver_partial_writes() {
    let dir = tempdir().unwrap();
    let config = grid_config(dir.path(), "NetCDF CF", PRODUCTS);
    let (catalog, _) = fixtures();
    let task = first_task(&config, &catalog);

    let mut driver = create_driver(&config.storage, &config.location);
    driver.open(&task).unwrap();
    assert!(driver.open(&task).is_err());
    driver
        .write("nbar_mean", "red", &ChunkWindow::new(0..2, 0..4), &Array2::from_elem((2, 4), 1.0))
        .unwrap();
    driver
        .write("nbar_mean", "red", &ChunkWindow::new(2..3, 0..2), &Array2::from_elem((1, 2), 2.0))
        .unwrap();
    let out_of_bounds = driver.write("nbar_mean", "red", &ChunkWindow::new(3..5, 0..2), &Array2::zeros((2, 2)));
    assert!(out_of_bounds.is_err());
    assert!(driver.write("nbar_mean", "blue", &ChunkWindow::new(0..1, 0..1), &Array2::zeros((1, 1))).is_err());
    driver.close().unwrap();
    driver.close().unwrap();

    let paths = driver.output_paths();
    assert_eq!(paths.len(), 2);
    assert_eq!(paths[0], dir.path().join("mean/0_0/MEAN_0_0_20150101.nc"));

    let file = netcdf::open(&paths[0]).unwrap();
    let red: Vec<i16> = file.variable("red").unwrap().get_values::<i16, _>(..).unwrap();
    #[rustfmt::skip]
    let expected = vec![
        1, 1, 1, 1,
        1, 1, 1, 1,
        2, 2, -999, -999,
        -999, -999, -999, -999,
    ];
    assert_eq!(red, expected);
    assert!(file.variable("x").is_some());
    assert!(file.variable("time").is_some());
}

#[test]
fn test_netcdf_driver_rejects_bad_chunking() {
    let dir = tempdir().unwrap();
    let mut config = grid_config(dir.path(), "NetCDF CF", PRODUCTS);
    let (catalog, _) = fixtures();
    let task = first_task(&config, &catalog);

    config.storage.chunking.remove("time");
    let mut driver = create_driver(&config.storage, &config.location);
    let err = driver.open(&task).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(driver.output_paths().is_empty());
}

#[test]
fn test_process_task_end_to_end() {
    let dir = tempdir().unwrap();
    let config = grid_config(dir.path(), "NetCDF CF", PRODUCTS);
    let (catalog, reader) = fixtures();
    let task = first_task(&config, &catalog);
    let collaborators = Collaborators {
        reader: &reader,
        decoder: &ValueMaskDecoder,
    };

    let paths = process_task(&task, &config, collaborators).unwrap();
    assert_eq!(paths.len(), 2);

    let mean = netcdf::open(&paths[0]).unwrap();
    let red: Vec<i16> = mean.variable("red").unwrap().get_values::<i16, _>(..).unwrap();
    // pixel (0, 0) is no-data in the second observation
    assert_eq!(red[0], 10);
    assert!(red[1..].iter().all(|&v| v == 15));

    let p50 = netcdf::open(&paths[1]).unwrap();
    assert!(p50.variable("red_observed").is_none());
    assert!(p50.variable("nir_observed").is_some());
    let dates: Vec<i32> = p50.variable("red_observed_date").unwrap().get_values::<i32, _>(..).unwrap();
    assert_eq!(dates[0], 20150301);
    let nir: Vec<f32> = p50.variable("nir").unwrap().get_values::<f32, _>(..).unwrap();
    assert!(nir.iter().all(|&v| v == 30.0 || v == 40.0));
}

#[test]
fn test_run_tasks_reports_failures() {
    let dir = tempdir().unwrap();
    let config = grid_config(dir.path(), "NetCDF CF", PRODUCTS);
    let (catalog, reader) = fixtures();
    let products = Arc::new(make_products(&config, &catalog, &StatisticRegistry::standard().unwrap()).unwrap());

    // no 2016 files for tile (1, 0)
    let mut partial = MemoryReader::default().with_product("nbar", vec![int16("red"), int16("nir")]);
    partial.files = reader
        .files
        .iter()
        .filter(|((path, _), _)| !path.ends_with("t1_c.nc"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let tasks = make_tasks(&config, &catalog, products).unwrap();
    let summary = run_tasks(
        tasks,
        &config,
        Collaborators {
            reader: &partial,
            decoder: &ValueMaskDecoder,
        },
    );
    assert_eq!(summary.reports.len(), 4);
    assert_eq!(summary.succeeded(), 3);
    assert_eq!(summary.failed(), 1);

    let failed = &summary.reports[3];
    assert_eq!(failed.tile_index, Some(TileIndex::new(1, 0)));
    assert_eq!(failed.outcome.as_ref().unwrap_err().kind(), ErrorKind::Data);
}

#[test]
fn test_geotiff_driver_writes_one_file_per_variable() {
    let dir = tempdir().unwrap();
    let config = grid_config(dir.path(), "Geotiff", TIFF_PRODUCTS);
    let (catalog, reader) = fixtures();
    let task = first_task(&config, &catalog);

    let paths = process_task(
        &task,
        &config,
        Collaborators {
            reader: &reader,
            decoder: &ValueMaskDecoder,
        },
    )
    .unwrap();
    assert_eq!(paths.len(), 2);
    assert!(paths.contains(&dir.path().join("mean/0_0/nbar_mean_red_2015.tif")));

    for path in &paths {
        let file = std::fs::File::open(path).unwrap();
        let mut decoder = tiff::decoder::Decoder::new(file).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (4, 4));
    }
}

#[test]
fn test_netcdf_writes_are_visible_before_close() {
    let dir = tempdir().unwrap();
    let config = grid_config(dir.path(), "NetCDF CF", PRODUCTS);
    let (catalog, _) = fixtures();
    let task = first_task(&config, &catalog);

    let mut driver = create_driver(&config.storage, &config.location);
    driver.open(&task).unwrap();
    driver
        .write("nbar_mean", "nir", &ChunkWindow::new(0..1, 0..4), &Array2::from_elem((1, 4), 7.0))
        .unwrap();

    let path = &driver.output_paths()[0];
    {
        let file = netcdf::open(path).unwrap();
        let nir: Vec<i16> = file.variable("nir").unwrap().get_values::<i16, _>((0..1, 0..1, 0..4)).unwrap();
        assert_eq!(nir, vec![7, 7, 7, 7]);
    }
    assert!(driver.close().is_ok());
}

#[test]
fn test_process_task_reports_open_failure() {
    let dir = tempdir().unwrap();
    let mut config = grid_config(dir.path(), "Geotiff", TIFF_PRODUCTS);
    let (catalog, reader) = fixtures();
    let task = first_task(&config, &catalog);
    config.storage.chunking.insert("band".to_string(), 1);

    let err = process_task(
        &task,
        &config,
        Collaborators {
            reader: &reader,
            decoder: &ValueMaskDecoder,
        },
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(!dir.path().join("mean").exists());
}

#[test]
fn test_geotiff_values_and_tags() {
    let dir = tempdir().unwrap();
    let config = grid_config(dir.path(), "Geotiff", TIFF_PRODUCTS);
    let (catalog, _) = fixtures();
    let task = first_task(&config, &catalog);

    let mut driver = create_driver(&config.storage, &config.location);
    driver.open(&task).unwrap();
    let mut values = Array2::from_elem((2, 2), 12.4);
    values[[1, 1]] = f64::NAN;
    driver.write("nbar_mean", "red", &ChunkWindow::new(0..2, 0..2), &values).unwrap();
    driver.close().unwrap();

    let path = dir.path().join("mean/0_0/nbar_mean_red_2015.tif");
    let mut decoder = tiff::decoder::Decoder::new(std::fs::File::open(&path).unwrap()).unwrap();
    assert_eq!(decoder.get_tag_ascii_string(tiff::tags::Tag::GdalNodata).unwrap(), "-999");
    assert_eq!(
        decoder.get_tag_f64_vec(tiff::tags::Tag::ModelPixelScaleTag).unwrap(),
        vec![25.0, 25.0, 0.0]
    );
    let tiepoint = decoder.get_tag_f64_vec(tiff::tags::Tag::ModelTiepointTag).unwrap();
    assert_eq!(&tiepoint[3..5], &[0.0, 100.0]);

    let tiff::decoder::DecodingResult::I16(red) = decoder.read_image().unwrap() else {
        panic!("red is stored as int16");
    };
    #[rustfmt::skip]
    let expected = vec![
        12, 12, -999, -999,
        12, -999, -999, -999,
        -999, -999, -999, -999,
        -999, -999, -999, -999,
    ];
    assert_eq!(red, expected);

    // nir was never written
    let nir = dir.path().join("mean/0_0/nbar_mean_nir_2015.tif");
    let mut decoder = tiff::decoder::Decoder::new(std::fs::File::open(&nir).unwrap()).unwrap();
    let tiff::decoder::DecodingResult::I16(nir) = decoder.read_image().unwrap() else {
        panic!("nir is stored as int16");
    };
    assert!(nir.iter().all(|&v| v == -999));
}

#[test]
fn test_region_source_tags_follow_present_bundles() {
    let dir = tempdir().unwrap();
    let document = config_document(dir.path(), PRODUCTS)
        .replace("  tile_size: {x: 100.0, y: 100.0}\n", "")
        .replace(
            "  - product: nbar\n    measurements: [red, nir]\n",
            "  - product: ls7\n    measurements: [red, nir]\n  - product: nbar\n    measurements: [red, nir]\n",
        )
        + "input_region: {x: [0.0, 100.0], y: [0.0, 100.0]}\n";
    let config = StatsConfig::from_yaml_str(&document).unwrap();

    let (catalog, reader) = fixtures();
    let catalog = catalog.with_product("ls7", vec![int16("red"), int16("nir")]);
    let products = Arc::new(make_products(&config, &catalog, &StatisticRegistry::standard().unwrap()).unwrap());
    let task = make_tasks(&config, &catalog, products).unwrap().next().unwrap().unwrap();

    assert_eq!(task.sources.len(), 1);
    assert_eq!(task.sources[0].spec.product, "nbar");

    let window = ChunkWindow::new(0..4, 0..4);
    let data = load_data(&window, &task.sources, true, &reader, &ValueMaskDecoder).unwrap();
    assert!(!data.is_empty());
    assert!(data.sources().iter().all(|&s| s == 0));
}
