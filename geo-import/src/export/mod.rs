//! Export GeoJSON

pub mod geojson;

pub use self::geojson::{export_dataset, write_feature_collection};
