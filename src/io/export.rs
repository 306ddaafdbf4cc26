//! Export of evaluated count rasters and their display description

use crate::core::aggregate::{PixelType, StackedImage};
use crate::core::evaluate::{EvaluationRegion, MultiBandRaster, RasterData, RasterEvaluator};
use crate::core::pipeline::CountProduct;
use crate::types::{AggregationMode, CountError, CountResult, GeoTransform};
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const PRODUCT_MANIFEST_NAME: &str = "product.xml";

/// No-data marker of integer exports
pub const INT32_NODATA: i32 = i32::MIN;

/// Display stretch upper bound of monthly layers
pub const MONTHLY_STRETCH_MAX: f64 = 180.0;

/// Display stretch upper bound of yearly layers
pub const YEARLY_STRETCH_MAX: f64 = 28.0;

/// One export request: what to evaluate, where, and under which name
#[derive(Debug, Clone)]
pub struct ExportTask {
    pub image: StackedImage,
    pub description: String,
    pub region: EvaluationRegion,
}

impl ExportTask {
    pub fn from_product(product: &CountProduct) -> Self {
        Self {
            image: product.image.clone(),
            description: product.name.clone(),
            region: product.region.clone(),
        }
    }
}

/// What a sink produced
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReceipt {
    pub description: String,
    pub path: PathBuf,
    pub bands: Vec<String>,
    pub rows: usize,
    pub cols: usize,
}

/// Destination for export tasks
pub trait RasterSink {
    fn export(&self, task: &ExportTask) -> CountResult<ExportReceipt>;
}

/// Visualization hint for one band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayLayer {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@band")]
    pub band: String,
    #[serde(rename = "@min")]
    pub min: f64,
    #[serde(rename = "@max")]
    pub max: f64,
    #[serde(rename = "@shown")]
    pub shown: bool,
}

/// One hidden layer per band, with a fixed stretch per mode
pub fn display_layers(image: &StackedImage) -> Vec<DisplayLayer> {
    image
        .labels()
        .into_iter()
        .map(|label| {
            let (name, max) = match image.mode() {
                AggregationMode::Monthly => (label.clone(), MONTHLY_STRETCH_MAX),
                AggregationMode::Yearly => (format!("year{}", label), YEARLY_STRETCH_MAX),
            };
            DisplayLayer {
                name,
                band: label,
                min: 0.0,
                max,
                shown: false,
            }
        })
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "raster")]
struct ProductManifest {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@pixelType")]
    pixel_type: String,
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
    #[serde(rename = "band", default)]
    bands: Vec<BandEntry>,
    #[serde(rename = "layer", default)]
    layers: Vec<DisplayLayer>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BandEntry {
    #[serde(rename = "@label")]
    label: String,
    #[serde(rename = "@file")]
    file: String,
}

/// Writes `<description>.zip` archives into a directory
pub struct ArchiveExporter<E> {
    output_dir: PathBuf,
    evaluator: E,
}

impl<E: RasterEvaluator> ArchiveExporter<E> {
    pub fn new<P: AsRef<Path>>(output_dir: P, evaluator: E) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            evaluator,
        }
    }

    /// `~/clearcount` or the working directory if no home is known
    pub fn default_output_dir() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join("clearcount"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn write_archive<W: Write + std::io::Seek>(
        &self,
        writer: W,
        task: &ExportTask,
        raster: &MultiBandRaster,
    ) -> CountResult<()> {
        let (bands, rows, cols) = raster.dim();
        let bands_meta: Vec<BandEntry> = raster
            .labels
            .iter()
            .enumerate()
            .map(|(i, label)| BandEntry {
                label: label.clone(),
                file: format!("band_{:02}_{}.raw", i, label),
            })
            .collect();

        let manifest = ProductManifest {
            name: task.description.clone(),
            pixel_type: raster.pixel_type().to_string(),
            rows,
            cols,
            origin_x: raster.transform.top_left_x,
            origin_y: raster.transform.top_left_y,
            pixel_size: raster.transform.pixel_width,
            bands: bands_meta,
            layers: display_layers(&task.image),
        };
        let xml = quick_xml::se::to_string(&manifest)
            .map_err(|e| CountError::XmlParsing(format!("Failed to write product manifest: {}", e)))?;

        let mut zip = ZipWriter::new(writer);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file(PRODUCT_MANIFEST_NAME, options)?;
        zip.write_all(xml.as_bytes())?;

        for (b, entry) in manifest.bands.iter().enumerate().take(bands) {
            zip.start_file(entry.file.as_str(), options)?;
            let valid = raster.valid.index_axis(Axis(0), b);
            let bytes: Vec<u8> = match &raster.data {
                RasterData::Float64(data) => data
                    .index_axis(Axis(0), b)
                    .iter()
                    .zip(valid.iter())
                    .flat_map(|(&v, &ok)| (if ok { v } else { f64::NAN }).to_le_bytes())
                    .collect(),
                RasterData::Int32(data) => data
                    .index_axis(Axis(0), b)
                    .iter()
                    .zip(valid.iter())
                    .flat_map(|(&v, &ok)| (if ok { v } else { INT32_NODATA }).to_le_bytes())
                    .collect(),
            };
            zip.write_all(&bytes)?;
        }

        zip.finish()?;
        Ok(())
    }
}

impl<E: RasterEvaluator> RasterSink for ArchiveExporter<E> {
    fn export(&self, task: &ExportTask) -> CountResult<ExportReceipt> {
        log::info!(
            "Exporting {} ({} bands) to {}",
            task.description,
            task.image.len(),
            self.output_dir.display()
        );

        // Evaluation failures reach the caller unchanged
        let raster = self.evaluator.evaluate(&task.image, &task.region)?;

        std::fs::create_dir_all(&self.output_dir)?;
        let mut temp = tempfile::NamedTempFile::new_in(&self.output_dir)?;
        self.write_archive(temp.as_file_mut(), task, &raster)?;

        let path = self.output_dir.join(format!("{}.zip", task.description));
        temp.persist(&path).map_err(|e| CountError::Io(e.error))?;

        let (_, rows, cols) = raster.dim();
        log::info!("Wrote {} ({}x{})", path.display(), rows, cols);

        Ok(ExportReceipt {
            description: task.description.clone(),
            path,
            bands: raster.labels.clone(),
            rows,
            cols,
        })
    }
}

/// Read an archive written by [`ArchiveExporter`] back into memory
pub fn read_exported_raster<P: AsRef<Path>>(path: P) -> CountResult<(MultiBandRaster, Vec<DisplayLayer>)> {
    let mut archive = ZipArchive::new(File::open(path.as_ref())?)?;

    let mut xml = String::new();
    archive.by_name(PRODUCT_MANIFEST_NAME)?.read_to_string(&mut xml)?;
    let manifest: ProductManifest = quick_xml::de::from_str(&xml)
        .map_err(|e| CountError::XmlParsing(format!("Failed to parse product manifest: {}", e)))?;

    let pixel_type = match manifest.pixel_type.as_str() {
        "float64" => PixelType::Float64,
        "int32" => PixelType::Int32,
        other => {
            return Err(CountError::InvalidFormat(format!("Unknown pixel type: {}", other)));
        }
    };

    let shape = (manifest.bands.len(), manifest.rows, manifest.cols);
    let width = match pixel_type {
        PixelType::Float64 => 8,
        PixelType::Int32 => 4,
    };

    let band_bytes = manifest
        .rows
        .checked_mul(manifest.cols)
        .and_then(|n| n.checked_mul(width))
        .ok_or_else(|| {
            CountError::InvalidFormat(format!(
                "Raster of {} x {} pixels is too large",
                manifest.rows, manifest.cols
            ))
        })?;

    let mut bytes = Vec::new();
    for entry in &manifest.bands {
        let before = bytes.len();
        archive
            .by_name(&entry.file)?
            .take(band_bytes as u64 + 1)
            .read_to_end(&mut bytes)?;
        let read = bytes.len() - before;
        if read != band_bytes {
            return Err(CountError::InvalidFormat(format!(
                "Band {} has {} bytes, expected {}",
                entry.label, read, band_bytes
            )));
        }
    }

    let shape_error = |e: ndarray::ShapeError| CountError::InvalidFormat(format!("Shape error: {}", e));
    let (data, valid) = match pixel_type {
        PixelType::Float64 => {
            let values: Vec<f64> = bytes
                .chunks_exact(8)
                .map(|c| {
                    let mut word = [0u8; 8];
                    word.copy_from_slice(c);
                    f64::from_le_bytes(word)
                })
                .collect();
            let data = Array3::from_shape_vec(shape, values).map_err(shape_error)?;
            let valid = data.mapv(|v| !v.is_nan());
            (RasterData::Float64(data), valid)
        }
        PixelType::Int32 => {
            let values: Vec<i32> = bytes
                .chunks_exact(4)
                .map(|c| {
                    let mut word = [0u8; 4];
                    word.copy_from_slice(c);
                    i32::from_le_bytes(word)
                })
                .collect();
            let data = Array3::from_shape_vec(shape, values).map_err(shape_error)?;
            let valid = data.mapv(|v| v != INT32_NODATA);
            (RasterData::Int32(data), valid)
        }
    };

    let raster = MultiBandRaster {
        labels: manifest.bands.iter().map(|b| b.label.clone()).collect(),
        data,
        valid,
        transform: GeoTransform::north_up(manifest.origin_x, manifest.origin_y, manifest.pixel_size),
    };

    Ok((raster, manifest.layers))
}
