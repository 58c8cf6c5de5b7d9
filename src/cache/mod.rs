pub mod aggregate;
pub mod cluster;
pub mod metadata;

pub use aggregate::{AggregateCache, AggregateKind, REFRESH_PERIOD};
pub use metadata::DatasetCatalog;
