//! Binary analysis module
//!
//! This module loads PE images from disk, parses their headers and walks their
//! import directories. Everything here is hand-rolled on top of bounds-checked
//! reads; no OS loader is involved.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

pub mod common;
pub mod imports;
pub mod pe;
pub mod rva;

pub use common::{normalize_module, ImportList, ImportSource, ImportSymbol, SymbolName};
pub use imports::walk;
pub use pe::PeImage;
pub use rva::{ImageView, SectionEntry, SectionMap};

use crate::error::Error;

/// A parsed binary: header facts plus its imports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBinary {
    pub image: PeImage,
    pub imports: ImportList,
}

/// Loads PE binaries and extracts their imports
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryAnalyzer;

impl BinaryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze a binary file from a file path
    pub fn analyze_file<P: AsRef<Path>>(&self, file_path: P) -> Result<ParsedBinary> {
        let path = file_path.as_ref();
        if !path.is_file() {
            return Err(Error::BinaryNotFound(path.to_path_buf()).into());
        }

        let data = fs::read(path)
            .map_err(Error::from)
            .with_context(|| format!("Failed to read binary '{}'", path.display()))?;

        self.analyze_data(&data, &path.to_string_lossy())
            .with_context(|| format!("Failed to analyze '{}'", path.display()))
    }

    /// Analyze binary data directly
    pub fn analyze_data(&self, data: &[u8], file_path: &str) -> Result<ParsedBinary> {
        let image = PeImage::parse(data)?;
        let imports = walk(data, &image);

        debug!(
            path = file_path,
            imports = imports.len(),
            delay = imports.count_from(ImportSource::Delay),
            "walked import directories"
        );

        Ok(ParsedBinary { image, imports })
    }
}
