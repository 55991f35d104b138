//! digscan-core
//!
//! Extraction of Data Indirection Graphs (DIGs) from an SSA program
//! representation. The DIG tells a programmable prefetcher which allocation's
//! contents are used as indices or bounds into which other allocation.

pub mod analyzer;

pub use analyzer::config::AnalysisConfig;
pub use analyzer::dig::Dig;
pub use analyzer::error::DigError;
pub use analyzer::ir::Program;
pub use analyzer::pipeline::{AnalysisOutcome, DigPipeline};
