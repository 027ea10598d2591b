//! Custom attribute recognition
//!
//! Attributes are identified by the name of the type that owns their
//! constructor. Only two are interesting here; everything else is `Other`.

use std::collections::HashMap;
use tracing::debug;

use super::cursor::BlobCursor;
use super::tables::{table, CodedIndex, MetadataImage};
use crate::error::{Error, Result};

const SUPPORTED_OS_PLATFORM: &str = "SupportedOSPlatformAttribute";
const DLL_IMPORT: &str = "DllImportAttribute";

/// Custom attribute prolog (ECMA-335 II.23.3).
const PROLOG: u16 = 0x0001;

// Named argument tags and element types (ECMA-335 II.23.1.16)
const NAMED_FIELD: u8 = 0x53;
const NAMED_PROPERTY: u8 = 0x54;
const ELEMENT_BOOLEAN: u8 = 0x02;
const ELEMENT_I4: u8 = 0x08;
const ELEMENT_U4: u8 = 0x09;
const ELEMENT_STRING: u8 = 0x0E;
const ELEMENT_ENUM: u8 = 0x55;

/// The attributes the map builder cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    /// `DllImportAttribute`: module plus an optional `EntryPoint` override
    NativeImport {
        module: String,
        entry_point: Option<String>,
    },
    /// `SupportedOSPlatformAttribute` with its platform string
    PlatformRequirement(String),
    Other,
}

/// Resolves attribute constructors to their owning type and decodes values.
#[derive(Debug)]
pub struct AttributeResolver<'m, 'a> {
    metadata: &'m MetadataImage<'a>,
    method_owner: HashMap<u32, u32>,
}

impl<'m, 'a> AttributeResolver<'m, 'a> {
    pub fn new(metadata: &'m MetadataImage<'a>) -> Self {
        let method_owner = metadata
            .type_methods()
            .into_iter()
            .flat_map(|(owner, methods)| methods.into_iter().map(move |m| (m, owner)))
            .collect();

        Self {
            metadata,
            method_owner,
        }
    }

    /// `(namespace, name)` of the type declaring the constructor `ctor`
    /// (a CustomAttributeType coded index).
    pub fn constructor_type(&self, ctor: u32) -> Option<(&'a str, &'a str)> {
        let (ctor_table, ctor_row) = CodedIndex::CustomAttributeType.decode(ctor)?;
        match ctor_table {
            table::METHOD_DEF => {
                let owner = *self.method_owner.get(&ctor_row)?;
                self.metadata.type_name(table::TYPE_DEF, owner)
            }
            table::MEMBER_REF => {
                let member = self.metadata.tables.row(table::MEMBER_REF, ctor_row)?;
                let (parent_table, parent_row) =
                    CodedIndex::MemberRefParent.decode(member.get(0))?;
                self.metadata.type_name(parent_table, parent_row)
            }
            _ => None,
        }
    }

    /// Classify a CustomAttribute by its constructor and value blob.
    pub fn classify(&self, ctor: u32, value: u32) -> AttributeKind {
        let Some((_, name)) = self.constructor_type(ctor) else {
            return AttributeKind::Other;
        };

        let kind = match name {
            SUPPORTED_OS_PLATFORM => self
                .decode(value)
                .map(|args| AttributeKind::PlatformRequirement(args.fixed.unwrap_or_default())),
            DLL_IMPORT => self.decode(value).map(|args| AttributeKind::NativeImport {
                module: args.fixed.unwrap_or_default(),
                entry_point: args.entry_point,
            }),
            _ => return AttributeKind::Other,
        };

        kind.unwrap_or_else(|err| {
            debug!(attribute = name, error = %err, "unreadable attribute value");
            AttributeKind::Other
        })
    }

    fn decode(&self, value: u32) -> Result<AttributeArgs> {
        let blob = self.metadata.blobs.get(value)?;
        AttributeArgs::parse(blob)
    }
}

/// Decoded value of a single-string-argument attribute.
#[derive(Debug, Default, PartialEq, Eq)]
struct AttributeArgs {
    fixed: Option<String>,
    entry_point: Option<String>,
}

impl AttributeArgs {
    fn parse(blob: &[u8]) -> Result<Self> {
        let mut cursor = BlobCursor::new(blob);
        let prolog = cursor.read_u16()?;
        if prolog != PROLOG {
            return Err(Error::MalformedMetadata(format!(
                "bad custom attribute prolog {prolog:#06x}"
            )));
        }

        let mut args = AttributeArgs {
            fixed: cursor.read_ser_string()?,
            ..Self::default()
        };

        // Named arguments are optional; stop quietly at anything unfamiliar.
        if cursor.remaining() < 2 {
            return Ok(args);
        }
        let named = cursor.read_u16()?;
        for _ in 0..named {
            match Self::named_arg(&mut cursor) {
                Ok(Some((name, value))) if name == "EntryPoint" => args.entry_point = value,
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
        Ok(args)
    }

    /// One named argument; `None` when its type is not understood.
    /// String values come back as `Some`, others are skipped as `None`.
    fn named_arg(cursor: &mut BlobCursor<'_>) -> Result<Option<(String, Option<String>)>> {
        let kind = cursor.read_u8()?;
        if kind != NAMED_FIELD && kind != NAMED_PROPERTY {
            return Ok(None);
        }

        let element = cursor.read_u8()?;
        if element == ELEMENT_ENUM {
            cursor.read_ser_string()?;
        }
        let name = cursor.read_ser_string()?.unwrap_or_default();

        let value = match element {
            ELEMENT_STRING => cursor.read_ser_string()?,
            ELEMENT_BOOLEAN => {
                cursor.read_u8()?;
                None
            }
            // Enums on DllImportAttribute are all int32-backed
            ELEMENT_I4 | ELEMENT_U4 | ELEMENT_ENUM => {
                cursor.read_u32()?;
                None
            }
            _ => return Ok(None),
        };
        Ok(Some((name, value)))
    }
}
