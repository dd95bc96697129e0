//! Storage layer: the segment catalog and disk statistics

pub mod catalog;
pub mod probe;
pub mod reader;
pub mod schema;
pub mod writer;

pub use catalog::*;
pub use probe::*;
pub use reader::{CatalogReader, CatalogSummary, RecentSegment};
pub use writer::CatalogWriter;
