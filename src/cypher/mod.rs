pub mod builder;
pub mod explorer;

pub use builder::{quote_identifier, quote_string, Conditions};
