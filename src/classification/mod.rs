/// Metric classification table
pub mod table;

pub use table::{Classification, ClassificationTable};
