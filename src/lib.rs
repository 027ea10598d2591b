//! minbuild - minimum Windows build required by a PE binary
//!
//! A library for walking PE import tables, reading ECMA-335 compatibility
//! metadata and reducing a binary's imports to the lowest Windows build that
//! provides all of them.

pub mod analysis;
pub mod binary;
pub mod cli;
pub mod error;
pub mod logging;
pub mod metadata;

// Re-export main types for convenience
pub use analysis::{
    AnalysisResult, Analyzer, AnalyzerConfig, ApiSetTable, Classifier, Resolution, Signal,
    Verdict,
};
pub use binary::{BinaryAnalyzer, ImportList, ImportSymbol, PeImage, SymbolName};
pub use cli::{Args, CliApp, OutputFormat};
pub use error::{Error, Result};
pub use metadata::{load_api_map, ApiMap, PlatformRequirement};
