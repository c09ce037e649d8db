pub mod cache;
pub mod carousel;
pub mod model;
pub mod query;
pub mod views;

pub use cache::{CatalogCache, CatalogHandle};
