//! PE header parser
//!
//! Reads just enough of the DOS, COFF and optional headers to locate data
//! directories and translate RVAs. Anything wrong at this level is fatal for
//! the binary: a half-read header is never reported.

use super::rva::{read_u16, read_u32, read_u64, ImageView, SectionEntry, SectionMap};
use crate::error::{Error, Result};

/// Optional header magic for PE32 images.
pub const PE32_MAGIC: u16 = 0x10b;
/// Optional header magic for PE32+ images.
pub const PE32_PLUS_MAGIC: u16 = 0x20b;

/// Data directory indices used by the analyzer.
pub mod directory {
    pub const IMPORT: usize = 1;
    pub const DELAY_IMPORT: usize = 13;
    pub const CLR_RUNTIME: usize = 14;
}

const COFF_HEADER_SIZE: usize = 20;
const SECTION_HEADER_SIZE: usize = 40;
const MAX_DATA_DIRECTORIES: usize = 16;

/// One entry of the optional header's data directory array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    pub rva: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn is_present(&self) -> bool {
        self.rva != 0 && self.size != 0
    }
}

/// Parsed PE headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeImage {
    pub machine: u16,
    pub is_64: bool,
    pub image_base: u64,
    /// `MajorOperatingSystemVersion`, `MinorOperatingSystemVersion`
    pub os_version: (u16, u16),
    /// `MajorSubsystemVersion`, `MinorSubsystemVersion`
    pub subsystem_version: (u16, u16),
    pub subsystem: u16,
    pub data_directories: Vec<DataDirectory>,
    pub sections: SectionMap,
}

impl PeImage {
    /// Parse the headers of a PE image held in memory.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 64 || &data[0..2] != b"MZ" {
            return Err(Error::InvalidDosSignature);
        }

        let pe_offset = read_u32(data, 0x3C)? as usize;
        match data.get(pe_offset..pe_offset.saturating_add(4)) {
            Some(sig) if sig == b"PE\0\0" => {}
            _ => return Err(Error::InvalidPeSignature),
        }

        let coff = pe_offset + 4;
        let header = |offset: usize, what: &str| {
            read_u16(data, offset).map_err(|_| Error::MalformedPe(format!("{what} truncated")))
        };
        let machine = header(coff, "COFF header")?;
        let number_of_sections = header(coff + 2, "COFF header")? as usize;
        let size_of_optional_header = header(coff + 16, "COFF header")? as usize;

        let opt = coff + COFF_HEADER_SIZE;
        let magic = header(opt, "optional header")?;
        let (is_64, dirs_at) = match magic {
            PE32_MAGIC => (false, 96),
            PE32_PLUS_MAGIC => (true, 112),
            other => return Err(Error::InvalidOptionalHeaderMagic(other)),
        };

        if size_of_optional_header < dirs_at {
            return Err(Error::MalformedPe(format!(
                "optional header too small: {size_of_optional_header} bytes"
            )));
        }
        if opt + size_of_optional_header > data.len() {
            return Err(Error::MalformedPe("optional header truncated".to_string()));
        }

        // Everything below is inside the optional header, which is now known to
        // be in bounds.
        let image_base = if is_64 {
            read_u64(data, opt + 24)?
        } else {
            read_u32(data, opt + 28)? as u64
        };
        let os_version = (read_u16(data, opt + 40)?, read_u16(data, opt + 42)?);
        let subsystem_version = (read_u16(data, opt + 48)?, read_u16(data, opt + 50)?);
        let size_of_headers = read_u32(data, opt + 60)?;
        let subsystem = read_u16(data, opt + 68)?;
        let declared_dirs = read_u32(data, opt + dirs_at - 4)? as usize;

        let dir_count = declared_dirs
            .min(MAX_DATA_DIRECTORIES)
            .min((size_of_optional_header - dirs_at) / 8);
        let mut data_directories = Vec::with_capacity(dir_count);
        for i in 0..dir_count {
            let at = opt + dirs_at + i * 8;
            data_directories.push(DataDirectory {
                rva: read_u32(data, at)?,
                size: read_u32(data, at + 4)?,
            });
        }

        let section_table = opt + size_of_optional_header;
        let mut sections = Vec::with_capacity(number_of_sections);
        for i in 0..number_of_sections {
            let at = section_table + i * SECTION_HEADER_SIZE;
            if at + SECTION_HEADER_SIZE > data.len() {
                return Err(Error::MalformedPe(format!(
                    "section table truncated at section {i} of {number_of_sections}"
                )));
            }
            sections.push(SectionEntry {
                virtual_size: read_u32(data, at + 8)?,
                virtual_address: read_u32(data, at + 12)?,
                raw_size: read_u32(data, at + 16)?,
                pointer_to_raw_data: read_u32(data, at + 20)?,
            });
        }

        Ok(Self {
            machine,
            is_64,
            image_base,
            os_version,
            subsystem_version,
            subsystem,
            data_directories,
            sections: SectionMap::new(size_of_headers, sections),
        })
    }

    /// Data directory at `index`, or an empty one if the header declares fewer.
    pub fn directory(&self, index: usize) -> DataDirectory {
        self.data_directories
            .get(index)
            .copied()
            .unwrap_or_default()
    }

    /// Bounds-checked RVA view over `data`.
    pub fn view<'d>(&self, data: &'d [u8]) -> ImageView<'d, '_> {
        ImageView::new(data, &self.sections)
    }

    pub fn bitness(&self) -> u8 {
        if self.is_64 {
            64
        } else {
            32
        }
    }

    /// Architecture name from the COFF machine field
    pub fn architecture(&self) -> String {
        match self.machine {
            0x8664 => "x86_64".to_string(),
            0x014c => "i386".to_string(),
            0x01c0 => "ARM".to_string(),
            0xaa64 => "ARM64".to_string(),
            0x01c4 => "ARM (Windows RT)".to_string(),
            0xa641 => "ARM64EC".to_string(),
            other => format!("Unknown (0x{:x})", other),
        }
    }
}
