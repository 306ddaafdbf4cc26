use chrono::{Datelike, NaiveDate};
use geo::{Area, BoundingRect, Coord, Intersects, LineString, Polygon, Rect};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Raw per-pixel quality flag word (`pixel_qa`)
pub type QaValue = u16;

/// Surface reflectance digital number
pub type ReflectanceValue = i16;

/// 2D quality-flag raster (rows x cols)
pub type QaImage = Array2<QaValue>;

/// 2D reflectance raster (rows x cols)
pub type ReflectanceImage = Array2<ReflectanceValue>;

/// 2D boolean mask (true = keep)
pub type MaskImage = Array2<bool>;

/// Name of the quality-flag band in every scene
pub const QA_BAND: &str = "pixel_qa";

/// Lowercase three-letter month labels, January first
pub const MONTH_LABELS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Landsat sensor families with a surface reflectance archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorFamily {
    /// Landsat 4 Thematic Mapper
    Lt04,
    /// Landsat 5 Thematic Mapper
    Lt05,
    /// Landsat 7 Enhanced Thematic Mapper Plus
    Le07,
    /// Landsat 8 Operational Land Imager
    Lc08,
}

impl SensorFamily {
    pub const ALL: [SensorFamily; 4] = [
        SensorFamily::Lt04,
        SensorFamily::Lt05,
        SensorFamily::Le07,
        SensorFamily::Lc08,
    ];

    /// Short sensor code used in product identifiers
    pub fn code(&self) -> &'static str {
        match self {
            SensorFamily::Lt04 => "LT04",
            SensorFamily::Lt05 => "LT05",
            SensorFamily::Le07 => "LE07",
            SensorFamily::Lc08 => "LC08",
        }
    }

    /// Surface reflectance collection identifier on the hosted catalog
    pub fn collection_id(&self) -> &'static str {
        match self {
            SensorFamily::Lt04 => "LANDSAT/LT04/C01/T1_SR",
            SensorFamily::Lt05 => "LANDSAT/LT05/C01/T1_SR",
            SensorFamily::Le07 => "LANDSAT/LE07/C01/T1_SR",
            SensorFamily::Lc08 => "LANDSAT/LC08/C01/T1_SR",
        }
    }

    /// True for OLI, whose quality word carries cirrus confidence bits
    pub fn is_oli(&self) -> bool {
        matches!(self, SensorFamily::Lc08)
    }

    /// Native near-infrared band name.
    ///
    /// OLI inserts a coastal/aerosol band at B1, which shifts NIR to B5.
    pub fn nir_band(&self) -> &'static str {
        if self.is_oli() {
            "B5"
        } else {
            "B4"
        }
    }

    /// Reflectance bands a scene of this family must carry
    pub fn required_bands(&self) -> &'static [&'static str] {
        if self.is_oli() {
            &["B5"]
        } else {
            &["B1", "B4"]
        }
    }
}

impl std::fmt::Display for SensorFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for SensorFamily {
    type Err = CountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LT04" | "LT4" => Ok(SensorFamily::Lt04),
            "LT05" | "LT5" => Ok(SensorFamily::Lt05),
            "LE07" | "LE7" => Ok(SensorFamily::Le07),
            "LC08" | "LC8" => Ok(SensorFamily::Lc08),
            _ => Err(CountError::InvalidFormat(format!("Unknown sensor: {}", s))),
        }
    }
}

/// Axis-aligned bounding box in projected map units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord { x: self.min_x, y: self.min_y },
            Coord { x: self.max_x, y: self.max_y },
        )
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up grid with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0
            && self.rotation_y == 0.0
            && self.pixel_width > 0.0
            && self.pixel_height < 0.0
    }

    /// Map coordinates of a pixel centre
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.top_left_x + (col as f64 + 0.5) * self.pixel_width,
            self.top_left_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Pixel containing a map coordinate, if it lies inside a `rows x cols` grid
    pub fn world_to_pixel(&self, x: f64, y: f64, rows: usize, cols: usize) -> Option<(usize, usize)> {
        let col = ((x - self.top_left_x) / self.pixel_width).floor();
        let row = ((y - self.top_left_y) / self.pixel_height).floor();

        if col < 0.0 || row < 0.0 || col >= cols as f64 || row >= rows as f64 {
            return None;
        }

        Some((row as usize, col as usize))
    }

    /// Extent covered by a `rows x cols` grid
    pub fn footprint(&self, rows: usize, cols: usize) -> BoundingBox {
        let x0 = self.top_left_x;
        let x1 = self.top_left_x + cols as f64 * self.pixel_width;
        let y0 = self.top_left_y;
        let y1 = self.top_left_y + rows as f64 * self.pixel_height;

        BoundingBox {
            min_x: x0.min(x1),
            max_x: x0.max(x1),
            min_y: y0.min(y1),
            max_y: y0.max(y1),
        }
    }
}

/// Area of interest: a simple polygon in the same projected units as the scenes
#[derive(Debug, Clone, PartialEq)]
pub struct Aoi {
    polygon: Polygon<f64>,
    bbox: BoundingBox,
}

impl Aoi {
    /// Build a polygon AOI. A repeated closing vertex is accepted and dropped.
    pub fn polygon(mut vertices: Vec<(f64, f64)>) -> CountResult<Self> {
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }

        if vertices.len() < 3 {
            return Err(CountError::Config(format!(
                "AOI polygon needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }

        if vertices.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(CountError::Config(
                "AOI polygon has non-finite coordinates".to_string(),
            ));
        }

        let polygon = Polygon::new(LineString::from(vertices), vec![]);
        let area = polygon.unsigned_area();
        if !area.is_finite() || area <= 0.0 {
            return Err(CountError::Config(format!("AOI polygon has invalid area: {}", area)));
        }

        let rect = polygon
            .bounding_rect()
            .ok_or_else(|| CountError::Config("AOI polygon is empty".to_string()))?;
        let bbox = BoundingBox {
            min_x: rect.min().x,
            max_x: rect.max().x,
            min_y: rect.min().y,
            max_y: rect.max().y,
        };

        Ok(Self { polygon, bbox })
    }

    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> CountResult<Self> {
        Self::polygon(vec![(min_x, max_y), (min_x, min_y), (max_x, min_y), (max_x, max_y)])
    }

    /// Exterior ring without the closing vertex
    pub fn vertices(&self) -> Vec<(f64, f64)> {
        let ring = self.polygon.exterior();
        let open = ring.0.len().saturating_sub(1);
        ring.0[..open].iter().map(|c| (c.x, c.y)).collect()
    }

    pub fn as_polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    pub fn area(&self) -> f64 {
        self.polygon.unsigned_area()
    }

    /// Point test, boundary included
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.polygon.intersects(&Coord { x, y })
    }

    /// Whether the polygon and a box share any area or boundary
    pub fn intersects_box(&self, bbox: &BoundingBox) -> bool {
        self.polygon.intersects(&bbox.to_rect())
    }
}

/// One raster band plus its per-pixel presence mask
#[derive(Debug, Clone, PartialEq)]
pub struct Band<T> {
    pub data: Array2<T>,
    pub valid: MaskImage,
}

impl<T: Copy> Band<T> {
    pub fn new(data: Array2<T>, valid: MaskImage) -> CountResult<Self> {
        if data.dim() != valid.dim() {
            return Err(CountError::InvalidFormat(format!(
                "Band data {:?} and validity {:?} dimensions differ",
                data.dim(),
                valid.dim()
            )));
        }
        Ok(Self { data, valid })
    }

    /// Band with every pixel present
    pub fn fully_valid(data: Array2<T>) -> Self {
        let valid = Array2::from_elem(data.dim(), true);
        Self { data, valid }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }
}

/// One sensor acquisition over one footprint
#[derive(Debug, Clone)]
pub struct Scene {
    pub id: String,
    pub family: SensorFamily,
    pub date: NaiveDate,
    pub transform: GeoTransform,
    pub qa: Band<QaValue>,
    pub reflectance: BTreeMap<String, Band<ReflectanceValue>>,
}

impl Scene {
    /// Assemble a scene, checking grid consistency and the family's required bands
    pub fn new(
        id: impl Into<String>,
        family: SensorFamily,
        date: NaiveDate,
        transform: GeoTransform,
        qa: Band<QaValue>,
        reflectance: BTreeMap<String, Band<ReflectanceValue>>,
    ) -> CountResult<Self> {
        let id = id.into();

        if !transform.is_north_up() {
            return Err(CountError::InvalidFormat(format!(
                "Scene {} is not on a north-up grid",
                id
            )));
        }

        let dim = qa.dim();
        if let Some((name, band)) = reflectance.iter().find(|(_, b)| b.dim() != dim) {
            return Err(CountError::InvalidFormat(format!(
                "Scene {}: band {} is {:?}, quality band is {:?}",
                id,
                name,
                band.dim(),
                dim
            )));
        }

        for required in family.required_bands() {
            if !reflectance.contains_key(*required) {
                return Err(CountError::InvalidFormat(format!(
                    "Scene {} ({}) is missing band {}",
                    id, family, required
                )));
            }
        }

        Ok(Self {
            id,
            family,
            date,
            transform,
            qa,
            reflectance,
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.qa.dim()
    }

    pub fn band(&self, name: &str) -> CountResult<&Band<ReflectanceValue>> {
        self.reflectance.get(name).ok_or_else(|| {
            CountError::Processing(format!("Scene {} has no band {}", self.id, name))
        })
    }

    pub fn footprint(&self) -> BoundingBox {
        let (rows, cols) = self.dim();
        self.transform.footprint(rows, cols)
    }
}

/// Packed `YYYYMMDD` code of a calendar date
pub fn date_code(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

/// Aggregation bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    /// Calendar month number, 1-12, across all selected years
    Month(u32),
    /// Calendar year
    Year(i32),
}

impl Period {
    pub fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            Period::Month(m) => date.month() == m,
            Period::Year(y) => date.year() == y,
        }
    }

    /// Band label: `jan`..`dec` or the four-digit year
    pub fn label(&self) -> CountResult<String> {
        match *self {
            Period::Month(m) => (m as usize)
                .checked_sub(1)
                .and_then(|i| MONTH_LABELS.get(i))
                .map(|s| s.to_string())
                .ok_or_else(|| CountError::Config(format!("Month {} is outside 1-12", m))),
            Period::Year(y) => Ok(format!("{:04}", y)),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Month(m) => write!(f, "month {}", m),
            Period::Year(y) => write!(f, "{}", y),
        }
    }
}

/// How periods are formed from the requested date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationMode {
    /// One band per calendar month, summed over all selected years
    Monthly,
    /// One band per calendar year
    Yearly,
}

impl AggregationMode {
    /// Export name prefix used when the caller does not choose one
    pub fn default_prefix(&self) -> &'static str {
        match self {
            AggregationMode::Monthly => "CountLandsatByMonth",
            AggregationMode::Yearly => "CountLandsatByYear",
        }
    }
}

impl std::fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationMode::Monthly => write!(f, "monthly"),
            AggregationMode::Yearly => write!(f, "yearly"),
        }
    }
}

impl FromStr for AggregationMode {
    type Err = CountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monthly" | "month" => Ok(AggregationMode::Monthly),
            "yearly" | "year" => Ok(AggregationMode::Yearly),
            _ => Err(CountError::Config(format!("Invalid aggregation mode: {}", s))),
        }
    }
}

/// Error types for observation counting
#[derive(Debug, thiserror::Error)]
pub enum CountError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    /// Failure reported by the evaluation platform, passed through unchanged
    #[error("{0}")]
    External(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),
}

/// Result type for counting operations
pub type CountResult<T> = Result<T, CountError>;
