//! Ready-made workflow instantiations.

pub mod analysis;
pub mod query;

pub use analysis::AnalysisPipeline;
pub use query::{QueryPipeline, QueryRun};
