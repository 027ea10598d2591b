//! Blob cursor for ECMA-335 heaps and custom attribute values

use crate::error::{Error, Result};

/// Forward-only reader over a byte slice.
#[derive(Debug, Clone)]
pub struct BlobCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlobCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::out_of_bounds(self.pos, self.data.len()))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Heap or table index: 2 or 4 bytes wide.
    pub fn read_index(&mut self, width: usize) -> Result<u32> {
        match width {
            2 => self.read_u16().map(u32::from),
            _ => self.read_u32(),
        }
    }

    /// Compressed unsigned integer (ECMA-335 II.23.2).
    pub fn read_compressed_u32(&mut self) -> Result<u32> {
        let first = self.read_u8()? as u32;
        if first & 0x80 == 0 {
            return Ok(first);
        }
        if first & 0xC0 == 0x80 {
            let second = self.read_u8()? as u32;
            return Ok(((first & 0x3F) << 8) | second);
        }
        if first & 0xE0 == 0xC0 {
            let rest = self.read_bytes(3)?;
            return Ok(((first & 0x1F) << 24)
                | ((rest[0] as u32) << 16)
                | ((rest[1] as u32) << 8)
                | rest[2] as u32);
        }
        Err(Error::MalformedMetadata(format!(
            "invalid compressed integer lead byte {first:#04x}"
        )))
    }

    /// SerString: compressed length then UTF-8, `0xFF` for null.
    pub fn read_ser_string(&mut self) -> Result<Option<String>> {
        if self.data.get(self.pos) == Some(&0xFF) {
            self.pos += 1;
            return Ok(None);
        }
        let len = self.read_compressed_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
    }
}

/// `#Strings` heap: NUL-terminated UTF-8 at an offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringHeap<'a> {
    data: &'a [u8],
}

impl<'a> StringHeap<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Read the string at `index`; out-of-range indexes read as empty.
    pub fn get(&self, index: u32) -> &'a str {
        let tail = match self.data.get(index as usize..) {
            Some(tail) => tail,
            None => return "",
        };
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        std::str::from_utf8(&tail[..end]).unwrap_or("")
    }
}

/// `#Blob` heap: compressed length prefix then the blob bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlobHeap<'a> {
    data: &'a [u8],
}

impl<'a> BlobHeap<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn get(&self, index: u32) -> Result<&'a [u8]> {
        let tail = self
            .data
            .get(index as usize..)
            .ok_or_else(|| Error::out_of_bounds(index as usize, self.data.len()))?;
        let mut cursor = BlobCursor::new(tail);
        let len = cursor.read_compressed_u32()? as usize;
        cursor.read_bytes(len)
    }
}
