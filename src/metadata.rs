//! Compatibility metadata
//!
//! Loads an ECMA-335 metadata image (a `.winmd` file, a bare `BSJB` root, or
//! a text file pointing at either) and turns its P/Invoke declarations into an
//! [`ApiMap`].

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub mod api_map;
pub mod attributes;
pub mod cursor;
pub mod platform;
pub mod tables;

pub use api_map::{ApiEntry, ApiMap};
pub use attributes::{AttributeKind, AttributeResolver};
pub use cursor::{BlobCursor, BlobHeap, StringHeap};
pub use platform::{build_for_version, PlatformParser, PlatformRequirement};
pub use tables::{MetadataImage, MetadataRoot, TableStream};

use crate::binary::pe::{directory, PeImage};
use crate::error::Error;

/// Whether `data` is a metadata image, raw or PE-wrapped.
pub fn is_metadata_image(data: &[u8]) -> bool {
    data.starts_with(MetadataRoot::SIGNATURE) || data.starts_with(b"MZ")
}

/// Locate the metadata root inside `data`.
///
/// Raw roots are returned as they are; PE images are followed through the CLR
/// data directory and the CLI header's metadata directory.
pub fn locate_root(data: &[u8]) -> crate::error::Result<&[u8]> {
    if data.starts_with(MetadataRoot::SIGNATURE) {
        return Ok(data);
    }

    let image = PeImage::parse(data)
        .map_err(|e| Error::MalformedMetadata(format!("metadata PE wrapper: {e}")))?;
    let clr = image.directory(directory::CLR_RUNTIME);
    if !clr.is_present() {
        return Err(Error::MalformedMetadata(
            "PE image has no CLR header".to_string(),
        ));
    }

    let view = image.view(data);
    let cli_header = |offset: u32| {
        view.u32_at(clr.rva.saturating_add(offset))
            .map_err(|_| Error::MalformedMetadata("CLI header truncated".to_string()))
    };
    // CLI header: cb, runtime version, then the metadata directory
    let metadata_rva = cli_header(8)?;
    let metadata_size = cli_header(12)?;

    view.bytes_at(metadata_rva, metadata_size as usize)
        .map_err(|_| Error::MalformedMetadata("metadata directory out of bounds".to_string()))
}

/// Follow a pointer file: if `path` is not itself a metadata image, its first
/// non-blank line names the real one. Relative targets resolve against the
/// pointer file's directory.
pub fn resolve_metadata_path(path: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(Error::MetadataNotFound(path.to_path_buf()).into());
    }

    let read_err = || format!("Failed to read metadata '{}'", path.display());
    let mut magic = Vec::with_capacity(4);
    File::open(path)
        .and_then(|file| file.take(4).read_to_end(&mut magic))
        .map_err(Error::from)
        .with_context(read_err)?;
    if is_metadata_image(&magic) {
        return Ok(path.to_path_buf());
    }

    let data = fs::read(path).map_err(Error::from).with_context(read_err)?;
    let target = std::str::from_utf8(&data)
        .ok()
        .and_then(|text| text.lines().map(str::trim).find(|line| !line.is_empty()))
        .ok_or_else(|| {
            Error::MalformedMetadata(format!(
                "'{}' is neither metadata nor a pointer file",
                path.display()
            ))
        })?;

    let target = Path::new(target);
    let resolved = if target.is_relative() {
        path.parent().unwrap_or(Path::new(".")).join(target)
    } else {
        target.to_path_buf()
    };

    debug!(pointer = %path.display(), target = %resolved.display(), "following metadata pointer file");
    if !resolved.is_file() {
        return Err(Error::MetadataNotFound(resolved).into());
    }
    Ok(resolved)
}

/// Load a metadata file (through a pointer file if needed) and build its map.
pub fn load_api_map<P: AsRef<Path>>(path: P) -> Result<ApiMap> {
    let path = resolve_metadata_path(path.as_ref())?;
    let data = fs::read(&path)
        .map_err(Error::from)
        .with_context(|| format!("Failed to read metadata '{}'", path.display()))?;

    let map = api_map_from_bytes(&data)
        .with_context(|| format!("Failed to load metadata '{}'", path.display()))?;
    info!(path = %path.display(), keys = map.len(), "loaded compatibility metadata");
    Ok(map)
}

/// Build a map from metadata bytes, raw or PE-wrapped.
pub fn api_map_from_bytes(data: &[u8]) -> crate::error::Result<ApiMap> {
    let root = locate_root(data)?;
    let image = MetadataImage::parse(root)?;
    debug!(version = image.version, "parsed metadata root");
    ApiMap::from_metadata(&image)
}
