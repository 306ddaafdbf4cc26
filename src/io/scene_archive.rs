//! Scene archives on local disk
//!
//! Each scene is a zip file holding `manifest.xml` plus one raw
//! little-endian file per band:
//!
//! ```xml
//! <scene id="LC08_L1TP_023030_20150610_20170407_01_T1" sensor="LC08" date="2015-06-10">
//!   <grid rows="200" cols="200" originX="300000" originY="4800000" pixelSize="30"/>
//!   <band name="pixel_qa" file="pixel_qa.raw" dtype="uint16"/>
//!   <band name="B5" file="B5.raw" dtype="int16" nodata="-9999"/>
//! </scene>
//! ```
//!
//! A quality pixel with the fill bit set is absent. A reflectance pixel equal
//! to the band's `nodata` value is absent.

use crate::core::harmonize::SceneHandle;
use crate::core::quality_mask::qa_bits;
use crate::io::catalog::{CatalogFilter, SceneCatalog};
use crate::types::{
    Band, BoundingBox, CountError, CountResult, GeoTransform, QaValue, ReflectanceValue, Scene,
    SensorFamily, QA_BAND,
};
use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const MANIFEST_NAME: &str = "manifest.xml";

/// Value written for absent reflectance pixels
pub const REFLECTANCE_NODATA: ReflectanceValue = -9999;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "scene")]
struct SceneManifest {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@sensor")]
    sensor: String,
    #[serde(rename = "@date")]
    date: String,
    grid: GridElement,
    #[serde(rename = "band", default)]
    bands: Vec<BandElement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GridElement {
    #[serde(rename = "@rows")]
    rows: usize,
    #[serde(rename = "@cols")]
    cols: usize,
    #[serde(rename = "@originX")]
    origin_x: f64,
    #[serde(rename = "@originY")]
    origin_y: f64,
    #[serde(rename = "@pixelSize")]
    pixel_size: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct BandElement {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@file")]
    file: String,
    #[serde(rename = "@dtype")]
    dtype: String,
    #[serde(rename = "@nodata", default, skip_serializing_if = "Option::is_none")]
    nodata: Option<i32>,
}

impl SceneManifest {
    fn family(&self) -> CountResult<SensorFamily> {
        self.sensor.parse()
    }

    fn date(&self) -> CountResult<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").map_err(|e| {
            CountError::InvalidFormat(format!("Scene {}: bad date {}: {}", self.id, self.date, e))
        })
    }

    fn transform(&self) -> GeoTransform {
        GeoTransform::north_up(self.grid.origin_x, self.grid.origin_y, self.grid.pixel_size)
    }

    fn footprint(&self) -> BoundingBox {
        self.transform().footprint(self.grid.rows, self.grid.cols)
    }
}

/// Fields encoded in a Landsat Collection 1 product identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductId {
    pub family: SensorFamily,
    pub path: u16,
    pub row: u16,
    pub acquisition_date: NaiveDate,
    pub tier: String,
}

impl ProductId {
    /// Parse `LXSS_LLLL_PPPRRR_YYYYMMDD_yyyymmdd_CC_TX`; `None` if the id
    /// does not follow the scheme
    pub fn parse(id: &str) -> CountResult<Option<Self>> {
        let captures = match product_id_pattern()?.captures(id) {
            Some(captures) => captures,
            None => return Ok(None),
        };

        let fields = || {
            Some(Self {
                family: captures[1].parse().ok()?,
                path: captures[2].parse().ok()?,
                row: captures[3].parse().ok()?,
                acquisition_date: NaiveDate::parse_from_str(&captures[4], "%Y%m%d").ok()?,
                tier: captures[5].to_string(),
            })
        };
        Ok(fields())
    }
}

fn product_id_pattern() -> CountResult<&'static Regex> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"^(L[CTE]0[4578])_(?:L1TP|L1GT|L1GS)_(\d{3})(\d{3})_(\d{8})_\d{8}_\d{2}_(T1|T2|RT)$",
            )
        })
        .as_ref()
        .map_err(|e| CountError::Processing(format!("Regex error: {}", e)))
}

/// Reads one scene archive
pub struct SceneReader {
    archive_path: PathBuf,
    archive: ZipArchive<File>,
}

impl SceneReader {
    pub fn open<P: AsRef<Path>>(archive_path: P) -> CountResult<Self> {
        let archive_path = archive_path.as_ref().to_path_buf();

        if !archive_path.exists() {
            return Err(CountError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", archive_path.display()),
            )));
        }

        let archive = ZipArchive::new(File::open(&archive_path)?)?;
        Ok(Self {
            archive_path,
            archive,
        })
    }

    fn read_entry(&mut self, name: &str) -> CountResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.archive.by_name(name)?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Read at most `limit + 1` bytes, enough to detect an oversized entry
    fn read_entry_limited(&mut self, name: &str, limit: usize) -> CountResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.archive
            .by_name(name)?
            .take(limit as u64 + 1)
            .read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn read_manifest(&mut self) -> CountResult<SceneManifest> {
        let bytes = self.read_entry(MANIFEST_NAME)?;
        let xml = String::from_utf8(bytes).map_err(|e| {
            CountError::InvalidFormat(format!("{} is not UTF-8: {}", MANIFEST_NAME, e))
        })?;

        let manifest: SceneManifest = quick_xml::de::from_str(&xml).map_err(|e| {
            CountError::XmlParsing(format!(
                "Failed to parse manifest of {}: {}",
                self.archive_path.display(),
                e
            ))
        })?;

        if let Some(product) = ProductId::parse(&manifest.id)? {
            let family = manifest.family()?;
            let date = manifest.date()?;
            if product.family != family || product.acquisition_date != date {
                return Err(CountError::InvalidFormat(format!(
                    "Scene {} declares {} on {}, its identifier says {} on {}",
                    manifest.id, family, date, product.family, product.acquisition_date
                )));
            }
        } else {
            log::debug!("Scene id {} is not a Landsat product id", manifest.id);
        }

        Ok(manifest)
    }

    fn read_raw<T, const N: usize>(
        &mut self,
        element: &BandElement,
        shape: (usize, usize),
        decode: fn([u8; N]) -> T,
    ) -> CountResult<Array2<T>> {
        let expected = shape
            .0
            .checked_mul(shape.1)
            .and_then(|n| n.checked_mul(N))
            .ok_or_else(|| {
                CountError::InvalidFormat(format!(
                    "Band {} grid of {} x {} pixels is too large",
                    element.name, shape.0, shape.1
                ))
            })?;
        let bytes = self.read_entry_limited(&element.file, expected)?;
        if bytes.len() != expected {
            return Err(CountError::InvalidFormat(format!(
                "Band {} has {} bytes, expected {}",
                element.name,
                bytes.len(),
                expected
            )));
        }

        let values: Vec<T> = bytes
            .chunks_exact(N)
            .map(|chunk| {
                let mut word = [0u8; N];
                word.copy_from_slice(chunk);
                decode(word)
            })
            .collect();

        Array2::from_shape_vec(shape, values)
            .map_err(|e| CountError::InvalidFormat(format!("Shape error: {}", e)))
    }

    /// Read the complete scene
    pub fn read_scene(&mut self) -> CountResult<Scene> {
        let manifest = self.read_manifest()?;
        let family = manifest.family()?;
        let date = manifest.date()?;
        let shape = (manifest.grid.rows, manifest.grid.cols);

        log::info!(
            "Reading scene {} ({}, {}), {}x{} pixels",
            manifest.id,
            family,
            date,
            shape.0,
            shape.1
        );

        let mut qa = None;
        let mut reflectance = BTreeMap::new();

        for element in &manifest.bands {
            match (element.name.as_str(), element.dtype.as_str()) {
                (QA_BAND, "uint16") => {
                    let data = self.read_raw(element, shape, QaValue::from_le_bytes)?;
                    let fill = 1u16 << qa_bits::FILL;
                    let nodata = element.nodata;
                    let valid = data.mapv(|v| v & fill == 0 && nodata != Some(i32::from(v)));
                    qa = Some(Band::new(data, valid)?);
                }
                (QA_BAND, other) => {
                    return Err(CountError::InvalidFormat(format!(
                        "Quality band must be uint16, found {}",
                        other
                    )));
                }
                (name, "int16") => {
                    let data = self.read_raw(element, shape, ReflectanceValue::from_le_bytes)?;
                    let nodata = element.nodata;
                    let valid = data.mapv(|v| nodata != Some(i32::from(v)));
                    reflectance.insert(name.to_string(), Band::new(data, valid)?);
                }
                (name, other) => {
                    return Err(CountError::InvalidFormat(format!(
                        "Band {} has unsupported dtype {}",
                        name, other
                    )));
                }
            }
        }

        let qa = qa.ok_or_else(|| {
            CountError::InvalidFormat(format!("Scene {} has no {} band", manifest.id, QA_BAND))
        })?;

        Scene::new(manifest.id.clone(), family, date, manifest.transform(), qa, reflectance)
    }
}

/// Package a scene as an archive readable by [`SceneReader`]
pub fn write_scene_archive<P: AsRef<Path>>(scene: &Scene, path: P) -> CountResult<()> {
    let transform = &scene.transform;
    if transform.pixel_width != -transform.pixel_height {
        return Err(CountError::InvalidFormat(format!(
            "Scene {} does not have square pixels",
            scene.id
        )));
    }

    let (rows, cols) = scene.dim();
    let mut bands = vec![BandElement {
        name: QA_BAND.to_string(),
        file: format!("{}.raw", QA_BAND),
        dtype: "uint16".to_string(),
        nodata: None,
    }];
    for name in scene.reflectance.keys() {
        bands.push(BandElement {
            name: name.clone(),
            file: format!("{}.raw", name),
            dtype: "int16".to_string(),
            nodata: Some(i32::from(REFLECTANCE_NODATA)),
        });
    }

    let manifest = SceneManifest {
        id: scene.id.clone(),
        sensor: scene.family.code().to_string(),
        date: scene.date.format("%Y-%m-%d").to_string(),
        grid: GridElement {
            rows,
            cols,
            origin_x: transform.top_left_x,
            origin_y: transform.top_left_y,
            pixel_size: transform.pixel_width,
        },
        bands,
    };
    let xml = quick_xml::se::to_string(&manifest)
        .map_err(|e| CountError::XmlParsing(format!("Failed to write manifest: {}", e)))?;

    let mut zip = ZipWriter::new(File::create(path.as_ref())?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_NAME, options)?;
    zip.write_all(xml.as_bytes())?;

    let fill = 1u16 << qa_bits::FILL;
    zip.start_file(format!("{}.raw", QA_BAND), options)?;
    let qa_bytes: Vec<u8> = scene
        .qa
        .data
        .iter()
        .zip(scene.qa.valid.iter())
        .flat_map(|(&v, &ok)| (if ok { v & !fill } else { v | fill }).to_le_bytes())
        .collect();
    zip.write_all(&qa_bytes)?;

    for (name, band) in &scene.reflectance {
        zip.start_file(format!("{}.raw", name), options)?;
        let bytes: Vec<u8> = band
            .data
            .iter()
            .zip(band.valid.iter())
            .flat_map(|(&v, &ok)| (if ok { v } else { REFLECTANCE_NODATA }).to_le_bytes())
            .collect();
        zip.write_all(&bytes)?;
    }

    zip.finish()?;
    log::debug!("Wrote scene {} to {}", scene.id, path.as_ref().display());
    Ok(())
}

#[derive(Debug, Clone)]
struct ArchiveEntry {
    path: PathBuf,
    family: SensorFamily,
    date: NaiveDate,
    footprint: BoundingBox,
}

/// Catalog over a directory of scene archives.
///
/// Opening the catalog reads only manifests; band data is loaded for the
/// scenes a query returns.
#[derive(Debug, Clone)]
pub struct ArchiveCatalog {
    root: PathBuf,
    entries: Vec<ArchiveEntry>,
}

impl ArchiveCatalog {
    pub fn open<P: AsRef<Path>>(root: P) -> CountResult<Self> {
        let root = root.as_ref().to_path_buf();
        log::info!("Indexing scene archives in {}", root.display());

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("zip")))
            .collect();
        paths.sort();

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let manifest = SceneReader::open(&path)?.read_manifest()?;
            entries.push(ArchiveEntry {
                family: manifest.family()?,
                date: manifest.date()?,
                footprint: manifest.footprint(),
                path,
            });
        }

        log::info!("Indexed {} scene archives", entries.len());
        Ok(Self { root, entries })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SceneCatalog for ArchiveCatalog {
    fn query(&self, family: SensorFamily, filter: &CatalogFilter) -> CountResult<Vec<SceneHandle>> {
        let mut hits: Vec<&ArchiveEntry> = self
            .entries
            .iter()
            .filter(|e| {
                e.family == family
                    && filter.range.contains(e.date)
                    && filter.aoi.intersects_box(&e.footprint)
            })
            .collect();
        hits.sort_by_key(|e| e.date);

        hits.into_iter()
            .map(|e| -> CountResult<SceneHandle> {
                Ok(Arc::new(SceneReader::open(&e.path)?.read_scene()?))
            })
            .collect()
    }
}
