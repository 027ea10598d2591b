//! ECMA-335 physical metadata layout
//!
//! Parses the metadata root (`BSJB`), its stream headers and the `#~` / `#-`
//! table stream. Row sizes depend on heap-size flags and on the row counts of
//! every referenced table, so the full schema of tables 0x00-0x2C is needed
//! even though only a handful of tables are read.

use super::cursor::{BlobCursor, BlobHeap, StringHeap};
use crate::error::{Error, Result};

/// Table ids (ECMA-335 II.22).
pub mod table {
    pub const MODULE: usize = 0x00;
    pub const TYPE_REF: usize = 0x01;
    pub const TYPE_DEF: usize = 0x02;
    pub const FIELD_PTR: usize = 0x03;
    pub const FIELD: usize = 0x04;
    pub const METHOD_PTR: usize = 0x05;
    pub const METHOD_DEF: usize = 0x06;
    pub const PARAM_PTR: usize = 0x07;
    pub const PARAM: usize = 0x08;
    pub const INTERFACE_IMPL: usize = 0x09;
    pub const MEMBER_REF: usize = 0x0A;
    pub const CONSTANT: usize = 0x0B;
    pub const CUSTOM_ATTRIBUTE: usize = 0x0C;
    pub const FIELD_MARSHAL: usize = 0x0D;
    pub const DECL_SECURITY: usize = 0x0E;
    pub const CLASS_LAYOUT: usize = 0x0F;
    pub const FIELD_LAYOUT: usize = 0x10;
    pub const STAND_ALONE_SIG: usize = 0x11;
    pub const EVENT_MAP: usize = 0x12;
    pub const EVENT_PTR: usize = 0x13;
    pub const EVENT: usize = 0x14;
    pub const PROPERTY_MAP: usize = 0x15;
    pub const PROPERTY_PTR: usize = 0x16;
    pub const PROPERTY: usize = 0x17;
    pub const METHOD_SEMANTICS: usize = 0x18;
    pub const METHOD_IMPL: usize = 0x19;
    pub const MODULE_REF: usize = 0x1A;
    pub const TYPE_SPEC: usize = 0x1B;
    pub const IMPL_MAP: usize = 0x1C;
    pub const FIELD_RVA: usize = 0x1D;
    pub const ENC_LOG: usize = 0x1E;
    pub const ENC_MAP: usize = 0x1F;
    pub const ASSEMBLY: usize = 0x20;
    pub const ASSEMBLY_PROCESSOR: usize = 0x21;
    pub const ASSEMBLY_OS: usize = 0x22;
    pub const ASSEMBLY_REF: usize = 0x23;
    pub const ASSEMBLY_REF_PROCESSOR: usize = 0x24;
    pub const ASSEMBLY_REF_OS: usize = 0x25;
    pub const FILE: usize = 0x26;
    pub const EXPORTED_TYPE: usize = 0x27;
    pub const MANIFEST_RESOURCE: usize = 0x28;
    pub const NESTED_CLASS: usize = 0x29;
    pub const GENERIC_PARAM: usize = 0x2A;
    pub const METHOD_SPEC: usize = 0x2B;
    pub const GENERIC_PARAM_CONSTRAINT: usize = 0x2C;
}

use table::*;

/// Coded index kinds (ECMA-335 II.24.2.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedIndex {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl CodedIndex {
    /// Tables by tag value; `None` marks an unused tag.
    fn tables(self) -> &'static [Option<usize>] {
        match self {
            CodedIndex::TypeDefOrRef => &[Some(TYPE_DEF), Some(TYPE_REF), Some(TYPE_SPEC)],
            CodedIndex::HasConstant => &[Some(FIELD), Some(PARAM), Some(PROPERTY)],
            CodedIndex::HasCustomAttribute => &[
                Some(METHOD_DEF),
                Some(FIELD),
                Some(TYPE_REF),
                Some(TYPE_DEF),
                Some(PARAM),
                Some(INTERFACE_IMPL),
                Some(MEMBER_REF),
                Some(MODULE),
                Some(DECL_SECURITY),
                Some(PROPERTY),
                Some(EVENT),
                Some(STAND_ALONE_SIG),
                Some(MODULE_REF),
                Some(TYPE_SPEC),
                Some(ASSEMBLY),
                Some(ASSEMBLY_REF),
                Some(FILE),
                Some(EXPORTED_TYPE),
                Some(MANIFEST_RESOURCE),
                Some(GENERIC_PARAM),
                Some(GENERIC_PARAM_CONSTRAINT),
                Some(METHOD_SPEC),
            ],
            CodedIndex::HasFieldMarshal => &[Some(FIELD), Some(PARAM)],
            CodedIndex::HasDeclSecurity => &[Some(TYPE_DEF), Some(METHOD_DEF), Some(ASSEMBLY)],
            CodedIndex::MemberRefParent => &[
                Some(TYPE_DEF),
                Some(TYPE_REF),
                Some(MODULE_REF),
                Some(METHOD_DEF),
                Some(TYPE_SPEC),
            ],
            CodedIndex::HasSemantics => &[Some(EVENT), Some(PROPERTY)],
            CodedIndex::MethodDefOrRef => &[Some(METHOD_DEF), Some(MEMBER_REF)],
            CodedIndex::MemberForwarded => &[Some(FIELD), Some(METHOD_DEF)],
            CodedIndex::Implementation => &[Some(FILE), Some(ASSEMBLY_REF), Some(EXPORTED_TYPE)],
            CodedIndex::CustomAttributeType => {
                &[None, None, Some(METHOD_DEF), Some(MEMBER_REF), None]
            }
            CodedIndex::ResolutionScope => &[
                Some(MODULE),
                Some(MODULE_REF),
                Some(ASSEMBLY_REF),
                Some(TYPE_REF),
            ],
            CodedIndex::TypeOrMethodDef => &[Some(TYPE_DEF), Some(METHOD_DEF)],
        }
    }

    fn tag_bits(self) -> u32 {
        match self {
            CodedIndex::HasCustomAttribute => 5,
            CodedIndex::MemberRefParent | CodedIndex::CustomAttributeType => 3,
            CodedIndex::TypeDefOrRef
            | CodedIndex::HasConstant
            | CodedIndex::HasDeclSecurity
            | CodedIndex::Implementation
            | CodedIndex::ResolutionScope => 2,
            CodedIndex::HasFieldMarshal
            | CodedIndex::HasSemantics
            | CodedIndex::MethodDefOrRef
            | CodedIndex::MemberForwarded
            | CodedIndex::TypeOrMethodDef => 1,
        }
    }

    /// Split a coded value into `(table, row)`. Row 0 is the null reference.
    pub fn decode(self, value: u32) -> Option<(usize, u32)> {
        let bits = self.tag_bits();
        let tag = (value & ((1 << bits) - 1)) as usize;
        let row = value >> bits;
        let table = (*self.tables().get(tag)?)?;
        Some((table, row))
    }

    /// Encode `(table, row)`; used by fixtures and tests.
    pub fn encode(self, table: usize, row: u32) -> Option<u32> {
        let tag = self.tables().iter().position(|t| *t == Some(table))? as u32;
        Some((row << self.tag_bits()) | tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Table(usize),
    Coded(CodedIndex),
}

use Column::*;

fn schema(table: usize) -> Option<&'static [Column]> {
    use CodedIndex as C;
    let columns: &'static [Column] = match table {
        MODULE => &[U16, Str, Guid, Guid, Guid],
        TYPE_REF => &[Coded(C::ResolutionScope), Str, Str],
        TYPE_DEF => &[
            U32,
            Str,
            Str,
            Coded(C::TypeDefOrRef),
            Table(FIELD),
            Table(METHOD_DEF),
        ],
        FIELD_PTR => &[Table(FIELD)],
        FIELD => &[U16, Str, Blob],
        METHOD_PTR => &[Table(METHOD_DEF)],
        METHOD_DEF => &[U32, U16, U16, Str, Blob, Table(PARAM)],
        PARAM_PTR => &[Table(PARAM)],
        PARAM => &[U16, U16, Str],
        INTERFACE_IMPL => &[Table(TYPE_DEF), Coded(C::TypeDefOrRef)],
        MEMBER_REF => &[Coded(C::MemberRefParent), Str, Blob],
        // Type is one byte plus one byte of padding
        CONSTANT => &[U16, Coded(C::HasConstant), Blob],
        CUSTOM_ATTRIBUTE => &[
            Coded(C::HasCustomAttribute),
            Coded(C::CustomAttributeType),
            Blob,
        ],
        FIELD_MARSHAL => &[Coded(C::HasFieldMarshal), Blob],
        DECL_SECURITY => &[U16, Coded(C::HasDeclSecurity), Blob],
        CLASS_LAYOUT => &[U16, U32, Table(TYPE_DEF)],
        FIELD_LAYOUT => &[U32, Table(FIELD)],
        STAND_ALONE_SIG => &[Blob],
        EVENT_MAP => &[Table(TYPE_DEF), Table(EVENT)],
        EVENT_PTR => &[Table(EVENT)],
        EVENT => &[U16, Str, Coded(C::TypeDefOrRef)],
        PROPERTY_MAP => &[Table(TYPE_DEF), Table(PROPERTY)],
        PROPERTY_PTR => &[Table(PROPERTY)],
        PROPERTY => &[U16, Str, Blob],
        METHOD_SEMANTICS => &[U16, Table(METHOD_DEF), Coded(C::HasSemantics)],
        METHOD_IMPL => &[
            Table(TYPE_DEF),
            Coded(C::MethodDefOrRef),
            Coded(C::MethodDefOrRef),
        ],
        MODULE_REF => &[Str],
        TYPE_SPEC => &[Blob],
        IMPL_MAP => &[U16, Coded(C::MemberForwarded), Str, Table(MODULE_REF)],
        FIELD_RVA => &[U32, Table(FIELD)],
        ENC_LOG => &[U32, U32],
        ENC_MAP => &[U32],
        ASSEMBLY => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        ASSEMBLY_PROCESSOR => &[U32],
        ASSEMBLY_OS => &[U32, U32, U32],
        ASSEMBLY_REF => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        ASSEMBLY_REF_PROCESSOR => &[U32, Table(ASSEMBLY_REF)],
        ASSEMBLY_REF_OS => &[U32, U32, U32, Table(ASSEMBLY_REF)],
        FILE => &[U32, Str, Blob],
        EXPORTED_TYPE => &[U32, U32, Str, Str, Coded(C::Implementation)],
        MANIFEST_RESOURCE => &[U32, U32, Str, Coded(C::Implementation)],
        NESTED_CLASS => &[Table(TYPE_DEF), Table(TYPE_DEF)],
        GENERIC_PARAM => &[U16, U16, Coded(C::TypeOrMethodDef), Str],
        METHOD_SPEC => &[Coded(C::MethodDefOrRef), Blob],
        GENERIC_PARAM_CONSTRAINT => &[Table(GENERIC_PARAM), Coded(C::TypeDefOrRef)],
        _ => return None,
    };
    Some(columns)
}

/// Streams located through the metadata root.
#[derive(Debug, Clone, Copy)]
pub struct MetadataRoot<'a> {
    pub version: &'a str,
    pub tables: &'a [u8],
    pub strings: &'a [u8],
    pub blobs: &'a [u8],
}

impl<'a> MetadataRoot<'a> {
    pub const SIGNATURE: &'static [u8; 4] = b"BSJB";

    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let malformed = |what: &str| Error::MalformedMetadata(what.to_string());

        if data.len() < 16 || &data[0..4] != Self::SIGNATURE {
            return Err(malformed("missing BSJB signature"));
        }

        let mut cursor = BlobCursor::new(data);
        cursor.read_bytes(12)?;
        let version_len = cursor.read_u32()? as usize;
        let version_raw = cursor
            .read_bytes(version_len)
            .map_err(|_| malformed("version string truncated"))?;
        let version_end = version_raw
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(version_raw.len());
        let version = std::str::from_utf8(&version_raw[..version_end]).unwrap_or("");

        let _flags = cursor.read_u16()?;
        let stream_count = cursor.read_u16()?;

        let mut tables = None;
        let mut strings: &[u8] = &[];
        let mut blobs: &[u8] = &[];

        for _ in 0..stream_count {
            let offset = cursor.read_u32()? as usize;
            let size = cursor.read_u32()? as usize;

            // Name: NUL-terminated, padded to a 4-byte boundary
            let name_start = cursor.position();
            let mut name_len = 0;
            while cursor.read_u8()? != 0 {
                name_len += 1;
            }
            let name = std::str::from_utf8(&data[name_start..name_start + name_len])
                .unwrap_or("");
            let padding = (4 - (cursor.position() - name_start) % 4) % 4;
            cursor.read_bytes(padding)?;

            let stream = offset
                .checked_add(size)
                .and_then(|end| data.get(offset..end))
                .ok_or_else(|| Error::MalformedMetadata(format!("stream {name} out of bounds")))?;

            match name {
                "#~" | "#-" => tables = Some(stream),
                "#Strings" => strings = stream,
                "#Blob" => blobs = stream,
                _ => {}
            }
        }

        Ok(Self {
            version,
            tables: tables.ok_or_else(|| malformed("no table stream"))?,
            strings,
            blobs,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct TableLayout {
    offset: usize,
    rows: u32,
    row_size: usize,
    /// `(offset in row, width)` per column
    columns: Vec<(usize, usize)>,
}

/// Decoded `#~` stream.
#[derive(Debug, Clone)]
pub struct TableStream<'a> {
    data: &'a [u8],
    layouts: Vec<TableLayout>,
}

impl<'a> TableStream<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut cursor = BlobCursor::new(data);
        cursor
            .read_bytes(6)
            .map_err(|_| Error::MalformedMetadata("table stream header truncated".into()))?;
        let heap_sizes = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let valid = u64::from(cursor.read_u32()?) | (u64::from(cursor.read_u32()?) << 32);
        let _sorted = cursor.read_bytes(8)?;

        let mut rows = [0u32; 64];
        for (id, count) in rows.iter_mut().enumerate() {
            if valid & (1u64 << id) != 0 {
                *count = cursor.read_u32()?;
            }
        }
        if heap_sizes & 0x40 != 0 {
            cursor.read_u32()?;
        }

        let str_width = if heap_sizes & 0x01 != 0 { 4 } else { 2 };
        let guid_width = if heap_sizes & 0x02 != 0 { 4 } else { 2 };
        let blob_width = if heap_sizes & 0x04 != 0 { 4 } else { 2 };

        let index_width = |table: usize| if rows[table] < 0x10000 { 2 } else { 4 };
        let coded_width = |coded: CodedIndex| {
            let max_rows = coded
                .tables()
                .iter()
                .flatten()
                .map(|&t| rows[t])
                .max()
                .unwrap_or(0);
            if max_rows < (1u32 << (16 - coded.tag_bits())) {
                2
            } else {
                4
            }
        };

        let mut layouts = vec![TableLayout::default(); 64];
        let mut offset = cursor.position();
        for id in 0..64 {
            if valid & (1u64 << id) == 0 {
                continue;
            }
            let columns = schema(id).ok_or_else(|| {
                Error::MalformedMetadata(format!("unsupported metadata table {id:#04x}"))
            })?;

            let mut layout = TableLayout {
                offset,
                rows: rows[id],
                ..TableLayout::default()
            };
            for column in columns {
                let width = match *column {
                    U16 => 2,
                    U32 => 4,
                    Str => str_width,
                    Guid => guid_width,
                    Blob => blob_width,
                    Table(t) => index_width(t),
                    Coded(c) => coded_width(c),
                };
                layout.columns.push((layout.row_size, width));
                layout.row_size += width;
            }

            offset = layout
                .row_size
                .checked_mul(layout.rows as usize)
                .and_then(|size| offset.checked_add(size))
                .filter(|&end| end <= data.len())
                .ok_or_else(|| {
                    Error::MalformedMetadata(format!("metadata table {id:#04x} truncated"))
                })?;
            layouts[id] = layout;
        }

        Ok(Self { data, layouts })
    }

    pub fn row_count(&self, table: usize) -> u32 {
        self.layouts.get(table).map(|l| l.rows).unwrap_or(0)
    }

    /// Follow a `*Ptr` indirection table when the stream has one.
    pub fn indirect(&self, ptr_table: usize, index: u32) -> u32 {
        if self.row_count(ptr_table) == 0 {
            return index;
        }
        self.row(ptr_table, index).map(|r| r.get(0)).unwrap_or(0)
    }

    /// Row `row` (1-based) of `table`.
    pub fn row(&self, table: usize, row: u32) -> Option<Row<'a, '_>> {
        let layout = self.layouts.get(table)?;
        if row == 0 || row > layout.rows {
            return None;
        }
        let start = layout.offset + (row as usize - 1) * layout.row_size;
        Some(Row {
            data: &self.data[start..start + layout.row_size],
            layout,
        })
    }

    /// All rows of a table in order.
    pub fn rows(&self, table: usize) -> impl Iterator<Item = (u32, Row<'a, '_>)> + '_ {
        (1..=self.row_count(table)).filter_map(move |r| self.row(table, r).map(|row| (r, row)))
    }
}

/// One table row; columns are read by position.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a, 's> {
    data: &'a [u8],
    layout: &'s TableLayout,
}

impl Row<'_, '_> {
    pub fn get(&self, column: usize) -> u32 {
        match self.layout.columns.get(column) {
            Some(&(at, 2)) => u16::from_le_bytes([self.data[at], self.data[at + 1]]) as u32,
            Some(&(at, _)) => u32::from_le_bytes([
                self.data[at],
                self.data[at + 1],
                self.data[at + 2],
                self.data[at + 3],
            ]),
            None => 0,
        }
    }
}

/// Parsed metadata: table stream plus the heaps it points into.
#[derive(Debug, Clone)]
pub struct MetadataImage<'a> {
    pub version: &'a str,
    pub tables: TableStream<'a>,
    pub strings: StringHeap<'a>,
    pub blobs: BlobHeap<'a>,
}

impl<'a> MetadataImage<'a> {
    /// Parse a metadata root (`BSJB`) and its streams.
    /// Reads past the end of a stream are reported as malformed metadata.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let parse = || -> Result<Self> {
            let root = MetadataRoot::parse(data)?;
            Ok(Self {
                version: root.version,
                tables: TableStream::parse(root.tables)?,
                strings: StringHeap::new(root.strings),
                blobs: BlobHeap::new(root.blobs),
            })
        };

        parse().map_err(|err| match err {
            Error::OffsetOutOfBounds { offset, size } => Error::MalformedMetadata(format!(
                "read past end of metadata at {offset:#x} (size {size})"
            )),
            other => other,
        })
    }

    /// MethodDef rows owned by each TypeDef, in table order.
    ///
    /// A TypeDef's method list runs up to the next TypeDef's list start, or to
    /// the end of the method table; MethodPtr indirection is applied when present.
    pub fn type_methods(&self) -> Vec<(u32, Vec<u32>)> {
        let tables = &self.tables;
        let list_len = match tables.row_count(METHOD_PTR) {
            0 => tables.row_count(METHOD_DEF),
            n => n,
        };

        let starts: Vec<u32> = tables
            .rows(TYPE_DEF)
            .map(|(_, row)| row.get(5))
            .collect();

        starts
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                let end = starts
                    .get(i + 1)
                    .copied()
                    .unwrap_or(list_len + 1)
                    .min(list_len + 1);
                let methods = (start.max(1)..end)
                    .map(|index| tables.indirect(METHOD_PTR, index))
                    .filter(|&method| method != 0)
                    .collect();
                (i as u32 + 1, methods)
            })
            .collect()
    }

    /// `(namespace, name)` of a TypeDef or TypeRef row.
    pub fn type_name(&self, table: usize, row: u32) -> Option<(&'a str, &'a str)> {
        match table {
            TYPE_DEF | TYPE_REF => {
                let row = self.tables.row(table, row)?;
                Some((self.strings.get(row.get(2)), self.strings.get(row.get(1))))
            }
            _ => None,
        }
    }
}
