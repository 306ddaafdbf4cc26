//! Scene sources and raster sinks on the local filesystem

pub mod catalog;
pub mod export;
pub mod scene_archive;

pub use catalog::{CatalogFilter, InMemoryCatalog, SceneCatalog};
pub use export::{
    display_layers, read_exported_raster, ArchiveExporter, DisplayLayer, ExportReceipt, ExportTask,
    RasterSink,
};
pub use scene_archive::{write_scene_archive, ArchiveCatalog, ProductId, SceneReader};
