//! Evaluation of stacked count images
//!
//! [`RasterEvaluator`] is the seam to whatever engine materializes pixels.
//! [`LocalEvaluator`] does it in-process: every contributing scene's date
//! band (its `YYYYMMDD` code where usable, 0 elsewhere) is resampled
//! (nearest neighbour) onto the output grid and reduced per pixel, either
//! as count-distinct of the codes or as a count of non-zero codes.

use crate::core::aggregate::{PixelType, StackedImage};
use crate::core::harmonize::HarmonizedScene;
use crate::core::merge::{CountStrategy, PeriodCount};
use crate::types::{Aoi, CountError, CountResult, GeoTransform, MaskImage};
use ndarray::{Array2, Array3, Axis, Zip};

/// Where and how finely an image is evaluated
#[derive(Debug, Clone)]
pub struct EvaluationRegion {
    pub aoi: Aoi,
    /// Map units per output pixel
    pub scale: f64,
    /// Ceiling on output pixels per band
    pub max_pixels: u64,
}

/// North-up output grid covering a region's bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputGrid {
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
}

impl OutputGrid {
    /// Rows and columns needed to cover the AOI's bounding box, as floats
    fn extent(aoi: &Aoi, scale: f64) -> CountResult<(f64, f64)> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(CountError::Config(format!("Invalid scale: {}", scale)));
        }

        let bbox = aoi.bounding_box();
        let cols = (bbox.width() / scale).ceil().max(1.0);
        let rows = (bbox.height() / scale).ceil().max(1.0);
        if !cols.is_finite() || !rows.is_finite() {
            return Err(CountError::Config(format!(
                "AOI extent is not finite at scale {}",
                scale
            )));
        }

        Ok((rows, cols))
    }

    /// Pixel count of the covering grid, computed without allocating it
    pub fn required_pixels(aoi: &Aoi, scale: f64) -> CountResult<f64> {
        let (rows, cols) = Self::extent(aoi, scale)?;
        Ok(rows * cols)
    }

    pub fn covering(aoi: &Aoi, scale: f64) -> CountResult<Self> {
        let (rows, cols) = Self::extent(aoi, scale)?;
        if rows * cols > u64::MAX as f64 {
            return Err(CountError::Config(format!(
                "Grid of {} x {} pixels is too large",
                rows, cols
            )));
        }

        let bbox = aoi.bounding_box();
        Ok(Self {
            transform: GeoTransform::north_up(bbox.min_x, bbox.max_y, scale),
            rows: rows as usize,
            cols: cols as usize,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixel_count(&self) -> u64 {
        (self.rows as u64).saturating_mul(self.cols as u64)
    }
}

/// Materialized band values
#[derive(Debug, Clone, PartialEq)]
pub enum RasterData {
    Float64(Array3<f64>),
    Int32(Array3<i32>),
}

/// Evaluated multi-band raster (band x row x col)
#[derive(Debug, Clone, PartialEq)]
pub struct MultiBandRaster {
    pub labels: Vec<String>,
    pub data: RasterData,
    /// false = no-data
    pub valid: Array3<bool>,
    pub transform: GeoTransform,
}

impl MultiBandRaster {
    pub fn pixel_type(&self) -> PixelType {
        match self.data {
            RasterData::Float64(_) => PixelType::Float64,
            RasterData::Int32(_) => PixelType::Int32,
        }
    }

    /// (bands, rows, cols)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.valid.dim()
    }

    pub fn band_index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Pixel value, `None` where no-data
    pub fn value(&self, band: usize, row: usize, col: usize) -> Option<f64> {
        if !*self.valid.get((band, row, col))? {
            return None;
        }
        match &self.data {
            RasterData::Float64(data) => data.get((band, row, col)).copied(),
            RasterData::Int32(data) => data.get((band, row, col)).map(|&v| f64::from(v)),
        }
    }

    /// One band with no-data read as zero
    pub fn band_or_zero(&self, band: usize) -> Array2<f64> {
        let (_, rows, cols) = self.dim();
        Array2::from_shape_fn((rows, cols), |(r, c)| self.value(band, r, c).unwrap_or(0.0))
    }

    /// Number of pixels holding data in one band
    pub fn valid_count(&self, band: usize) -> usize {
        self.valid
            .index_axis(Axis(0), band)
            .iter()
            .filter(|&&v| v)
            .count()
    }
}

/// Materializes stacked images
pub trait RasterEvaluator {
    fn evaluate(&self, image: &StackedImage, region: &EvaluationRegion) -> CountResult<MultiBandRaster>;
}

/// In-process evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalEvaluator;

impl LocalEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Date band of one scene on the output grid; pixels it does not cover are 0
    fn resample_date_band(&self, scene: &HarmonizedScene, grid: &OutputGrid) -> CountResult<Array2<u32>> {
        let mut out = Array2::<u32>::zeros(grid.shape());

        let grid_box = grid.transform.footprint(grid.rows, grid.cols);
        if !scene.footprint().intersects(&grid_box) {
            return Ok(out);
        }

        let native = scene.date_band()?;
        let (rows, cols) = native.dim();
        let transform = scene.transform();

        for ((r, c), v) in out.indexed_iter_mut() {
            let (x, y) = grid.transform.pixel_center(r, c);
            if let Some((sr, sc)) = transform.world_to_pixel(x, y, rows, cols) {
                *v = native[[sr, sc]];
            }
        }

        Ok(out)
    }

    #[cfg(feature = "parallel")]
    fn date_bands(
        &self,
        scenes: &[&HarmonizedScene],
        grid: &OutputGrid,
    ) -> CountResult<Vec<Array2<u32>>> {
        use rayon::prelude::*;

        scenes
            .par_iter()
            .map(|scene| self.resample_date_band(scene, grid))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn date_bands(
        &self,
        scenes: &[&HarmonizedScene],
        grid: &OutputGrid,
    ) -> CountResult<Vec<Array2<u32>>> {
        scenes
            .iter()
            .map(|scene| self.resample_date_band(scene, grid))
            .collect()
    }

    /// Per-pixel count for one period; zero means no contribution
    pub fn count(&self, count: &PeriodCount, grid: &OutputGrid) -> CountResult<Array2<u32>> {
        let scenes = count.contributions();
        log::debug!(
            "Counting period {} ({}) from {} scenes",
            count.period(),
            count.strategy(),
            scenes.len()
        );

        let bands = self.date_bands(&scenes, grid)?;
        let mut counts = Array2::<u32>::zeros(grid.shape());

        match count.strategy() {
            CountStrategy::DistinctDates => {
                // Bands arrive in ascending code order, so a new code at a
                // pixel is a date not seen there before
                let mut last = Array2::<u32>::zeros(grid.shape());
                for band in &bands {
                    Zip::from(&mut counts)
                        .and(&mut last)
                        .and(band)
                        .for_each(|n, seen, &code| {
                            if code != 0 && code != *seen {
                                *n += 1;
                                *seen = code;
                            }
                        });
                }
            }
            CountStrategy::AllScenes => {
                for band in &bands {
                    Zip::from(&mut counts).and(band).for_each(|n, &code| {
                        if code != 0 {
                            *n += 1;
                        }
                    });
                }
            }
        }

        Ok(counts)
    }
}

impl RasterEvaluator for LocalEvaluator {
    fn evaluate(&self, image: &StackedImage, region: &EvaluationRegion) -> CountResult<MultiBandRaster> {
        // Checked in floating point, before the grid is allocated
        let required = OutputGrid::required_pixels(&region.aoi, region.scale)?;
        if required > region.max_pixels as f64 {
            return Err(CountError::External(format!(
                "Too many pixels in the region. Found {:.0}, but maxPixels allows only {}.",
                required, region.max_pixels
            )));
        }

        let grid = OutputGrid::covering(&region.aoi, region.scale)?;

        log::info!(
            "Evaluating {} bands on a {}x{} grid at scale {}",
            image.len(),
            grid.rows,
            grid.cols,
            region.scale
        );

        let inside_clip: Option<MaskImage> = image.clip().map(|clip| {
            Array2::from_shape_fn(grid.shape(), |(r, c)| {
                let (x, y) = grid.transform.pixel_center(r, c);
                clip.contains(x, y)
            })
        });

        let shape = (image.len(), grid.rows, grid.cols);
        let mut values = Array3::<f64>::zeros(shape);
        let mut valid = Array3::from_elem(shape, false);

        for (b, band) in image.bands().iter().enumerate() {
            let counts = self.count(&band.count, &grid)?;

            let mut band_values = values.index_axis_mut(Axis(0), b);
            let mut band_valid = valid.index_axis_mut(Axis(0), b);

            // Zero contributions is no-data, never a stored zero
            Zip::from(&mut band_values)
                .and(&mut band_valid)
                .and(&counts)
                .for_each(|v, ok, &n| {
                    *v = f64::from(n);
                    *ok = n > 0;
                });

            if let Some(inside) = &inside_clip {
                Zip::from(&mut band_valid)
                    .and(inside)
                    .for_each(|ok, &i| *ok = *ok && i);
            }

            log::debug!(
                "Band {}: {} pixels with observations",
                band.label,
                band_valid.iter().filter(|&&v| v).count()
            );
        }

        let data = match image.pixel_type() {
            PixelType::Float64 => RasterData::Float64(values),
            PixelType::Int32 => RasterData::Int32(coerce(&values)?),
        };

        Ok(MultiBandRaster {
            labels: image.labels(),
            data,
            valid,
            transform: grid.transform,
        })
    }
}

/// Truncating numeric conversion of a whole cube
pub fn coerce<T: num_traits::NumCast + Copy>(values: &Array3<f64>) -> CountResult<Array3<T>> {
    let converted: Option<Vec<T>> = values.iter().map(|&v| num_traits::cast(v.trunc())).collect();
    let converted = converted.ok_or_else(|| {
        CountError::Processing("Value out of range for integer output".to_string())
    })?;

    Array3::from_shape_vec(values.dim(), converted)
        .map_err(|e| CountError::Processing(format!("Shape error: {}", e)))
}
