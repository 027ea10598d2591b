//! RVA to file offset resolution and bounds-checked reads
//!
//! Every read the import walker and the metadata reader perform goes through
//! [`ImageView`], so a garbage RVA fails one read instead of the whole scan.

use crate::error::{Error, Result};

/// One section header, reduced to what address translation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionEntry {
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub raw_size: u32,
    pub pointer_to_raw_data: u32,
}

impl SectionEntry {
    /// Whether `rva` falls inside this section's mapped range.
    pub fn contains(&self, rva: u32) -> bool {
        let extent = self.virtual_size.max(self.raw_size) as u64;
        let start = self.virtual_address as u64;
        let rva = rva as u64;
        rva >= start && rva < start + extent
    }
}

/// Ordered section table plus the size of the header region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionMap {
    header_size: u32,
    sections: Vec<SectionEntry>,
}

impl SectionMap {
    pub fn new(header_size: u32, sections: Vec<SectionEntry>) -> Self {
        Self {
            header_size,
            sections,
        }
    }

    pub fn header_size(&self) -> u32 {
        self.header_size
    }

    pub fn sections(&self) -> &[SectionEntry] {
        &self.sections
    }

    /// Translate an RVA to a file offset.
    ///
    /// Headers are not re-based, so an RVA below the header size is already a
    /// file offset. An RVA no section claims is returned unchanged; callers read
    /// through [`ImageView`] which bounds-checks the result.
    pub fn resolve(&self, rva: u32) -> usize {
        if rva < self.header_size {
            return rva as usize;
        }

        self.sections
            .iter()
            .find(|section| section.contains(rva))
            .map(|section| {
                (rva - section.virtual_address) as usize + section.pointer_to_raw_data as usize
            })
            .unwrap_or(rva as usize)
    }
}

/// Bounds-checked view of a file image addressed by RVA.
///
/// Slices borrow from the file bytes only, so they outlive the section map.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'d, 's> {
    data: &'d [u8],
    sections: &'s SectionMap,
}

impl<'d, 's> ImageView<'d, 's> {
    pub fn new(data: &'d [u8], sections: &'s SectionMap) -> Self {
        Self { data, sections }
    }

    pub fn data(&self) -> &'d [u8] {
        self.data
    }

    /// Read `len` bytes at an RVA.
    pub fn bytes_at(&self, rva: u32, len: usize) -> Result<&'d [u8]> {
        read_bytes(self.data, self.sections.resolve(rva), len)
    }

    pub fn u16_at(&self, rva: u32) -> Result<u16> {
        read_u16(self.data, self.sections.resolve(rva))
    }

    pub fn u32_at(&self, rva: u32) -> Result<u32> {
        read_u32(self.data, self.sections.resolve(rva))
    }

    pub fn u64_at(&self, rva: u32) -> Result<u64> {
        read_u64(self.data, self.sections.resolve(rva))
    }

    /// Read a NUL-terminated ASCII string at an RVA.
    pub fn cstr_at(&self, rva: u32) -> Result<String> {
        read_cstr(self.data, self.sections.resolve(rva))
    }
}

/// Read `len` bytes at a file offset.
pub fn read_bytes(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| Error::out_of_bounds(offset, data.len()))
}

pub fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    let bytes = read_bytes(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = read_bytes(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    let bytes = read_bytes(data, offset, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

/// Read a NUL-terminated string; a missing terminator is an out-of-bounds read.
pub fn read_cstr(data: &[u8], offset: usize) -> Result<String> {
    let tail = data
        .get(offset..)
        .ok_or_else(|| Error::out_of_bounds(offset, data.len()))?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::out_of_bounds(data.len(), data.len()))?;
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}
