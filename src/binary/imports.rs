//! Import table walker
//!
//! Decodes the classic import directory and the delay-load import directory
//! into one deduplicated [`ImportList`].
//!
//! Truncation is part of the contract: an out-of-bounds read while decoding a
//! descriptor ends that directory, and every symbol decoded before the failing
//! read is kept. Nothing in here returns an error.

use super::common::{ImportList, ImportSource, ImportSymbol};
use super::pe::{directory, PeImage};
use super::rva::ImageView;
use crate::error::Result;
use tracing::debug;

const ORDINAL_FLAG_32: u64 = 0x8000_0000;
const ORDINAL_FLAG_64: u64 = 0x8000_0000_0000_0000;

/// IMAGE_IMPORT_DESCRIPTOR
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportDescriptor {
    pub original_first_thunk: u32,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name_rva: u32,
    pub first_thunk: u32,
}

impl ImportDescriptor {
    pub const SIZE: u32 = 20;

    pub fn read(view: &ImageView<'_, '_>, rva: u32) -> Result<Self> {
        let raw = view.bytes_at(rva, Self::SIZE as usize)?;
        let field = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Ok(Self {
            original_first_thunk: field(0),
            time_date_stamp: field(4),
            forwarder_chain: field(8),
            name_rva: field(12),
            first_thunk: field(16),
        })
    }

    pub fn is_null(&self) -> bool {
        *self == Self::default()
    }

    /// The import lookup table if present, otherwise the IAT.
    pub fn symbol_table_rva(&self) -> u32 {
        if self.original_first_thunk != 0 {
            self.original_first_thunk
        } else {
            self.first_thunk
        }
    }
}

/// IMAGE_DELAYLOAD_DESCRIPTOR
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelayLoadDescriptor {
    pub attributes: u32,
    pub dll_name_rva: u32,
    pub module_handle_rva: u32,
    pub import_address_table_rva: u32,
    pub import_name_table_rva: u32,
    pub bound_import_address_table_rva: u32,
    pub unload_information_table_rva: u32,
    pub time_date_stamp: u32,
}

impl DelayLoadDescriptor {
    pub const SIZE: u32 = 32;

    pub fn read(view: &ImageView<'_, '_>, rva: u32) -> Result<Self> {
        let raw = view.bytes_at(rva, Self::SIZE as usize)?;
        let field = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Ok(Self {
            attributes: field(0),
            dll_name_rva: field(4),
            module_handle_rva: field(8),
            import_address_table_rva: field(12),
            import_name_table_rva: field(16),
            bound_import_address_table_rva: field(20),
            unload_information_table_rva: field(24),
            time_date_stamp: field(28),
        })
    }

    pub fn is_null(&self) -> bool {
        *self == Self::default()
    }

    /// Pre-VC7 descriptors leave bit 0 clear and store virtual addresses.
    pub fn uses_rvas(&self) -> bool {
        self.attributes & 1 != 0
    }
}

/// How pointers inside a descriptor are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Addressing {
    Rva,
    Va { image_base: u64 },
}

impl Addressing {
    fn to_rva(self, value: u64) -> Option<u32> {
        match self {
            Addressing::Rva => u32::try_from(value).ok(),
            Addressing::Va { image_base } => value
                .checked_sub(image_base)
                .and_then(|rva| u32::try_from(rva).ok()),
        }
    }

    /// RVA of the hint/name record a thunk points at. PE32+ RVAs keep only
    /// the low 31 bits; VAs are rebased first, so the mask never cuts them.
    fn thunk_target(self, pointer: u64, is_64: bool) -> Option<u32> {
        match self {
            Addressing::Rva if is_64 => Some((pointer & 0x7FFF_FFFF) as u32),
            _ => self.to_rva(pointer),
        }
    }
}

/// One decoded thunk slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Thunk {
    Ordinal(u16),
    /// Pointer to a hint/name record, exactly as stored
    HintName(u64),
}

impl Thunk {
    /// Decode a non-zero thunk value.
    pub fn decode(value: u64, is_64: bool) -> Self {
        let flag = if is_64 { ORDINAL_FLAG_64 } else { ORDINAL_FLAG_32 };
        if value & flag != 0 {
            Thunk::Ordinal((value & 0xFFFF) as u16)
        } else {
            Thunk::HintName(value)
        }
    }
}

/// Walk both import directories of an image.
pub fn walk(data: &[u8], image: &PeImage) -> ImportList {
    let view = image.view(data);
    let mut imports = ImportList::new();
    walk_classic(&view, image, &mut imports);
    walk_delay(&view, image, &mut imports);
    imports
}

fn walk_classic(view: &ImageView<'_, '_>, image: &PeImage, out: &mut ImportList) {
    let dir = image.directory(directory::IMPORT);
    if !dir.is_present() {
        return;
    }

    let mut rva = dir.rva;
    loop {
        let descriptor = match ImportDescriptor::read(view, rva) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!(rva = format_args!("{:#x}", rva), error = %e, "import descriptor unreadable, ending table");
                return;
            }
        };
        if descriptor.is_null() {
            return;
        }

        let module = match read_module_name(view, descriptor.name_rva) {
            Some(module) => module,
            None => return,
        };

        let complete = read_thunks(
            view,
            descriptor.symbol_table_rva(),
            image.is_64,
            Addressing::Rva,
            &module,
            ImportSource::Classic,
            out,
        );
        if !complete {
            return;
        }

        rva = match rva.checked_add(ImportDescriptor::SIZE) {
            Some(next) => next,
            None => return,
        };
    }
}

fn walk_delay(view: &ImageView<'_, '_>, image: &PeImage, out: &mut ImportList) {
    let dir = image.directory(directory::DELAY_IMPORT);
    if !dir.is_present() {
        return;
    }

    let mut rva = dir.rva;
    loop {
        let descriptor = match DelayLoadDescriptor::read(view, rva) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!(rva = format_args!("{:#x}", rva), error = %e, "delay-load descriptor unreadable, ending table");
                return;
            }
        };
        if descriptor.is_null() {
            return;
        }

        let addressing = if descriptor.uses_rvas() {
            Addressing::Rva
        } else {
            Addressing::Va {
                image_base: image.image_base,
            }
        };

        let name_rva = addressing.to_rva(descriptor.dll_name_rva as u64).unwrap_or(0);
        let module = match read_module_name(view, name_rva) {
            Some(module) => module,
            None => return,
        };

        let int_rva = addressing
            .to_rva(descriptor.import_name_table_rva as u64)
            .unwrap_or(0);
        let complete = read_thunks(
            view,
            int_rva,
            image.is_64,
            addressing,
            &module,
            ImportSource::Delay,
            out,
        );
        if !complete {
            return;
        }

        rva = match rva.checked_add(DelayLoadDescriptor::SIZE) {
            Some(next) => next,
            None => return,
        };
    }
}

fn read_module_name(view: &ImageView<'_, '_>, name_rva: u32) -> Option<String> {
    if name_rva == 0 {
        debug!("descriptor without a module name, ending table");
        return None;
    }
    match view.cstr_at(name_rva) {
        Ok(name) => Some(name),
        Err(e) => {
            debug!(rva = format_args!("{:#x}", name_rva), error = %e, "module name unreadable, ending table");
            None
        }
    }
}

/// Decode one thunk array. Returns false if a read failed part-way.
fn read_thunks(
    view: &ImageView<'_, '_>,
    table_rva: u32,
    is_64: bool,
    addressing: Addressing,
    module: &str,
    source: ImportSource,
    out: &mut ImportList,
) -> bool {
    if table_rva == 0 {
        debug!(module, "descriptor has no symbol table");
        return true;
    }

    let width = if is_64 { 8 } else { 4 };
    let mut rva = table_rva;
    loop {
        let value = if is_64 {
            view.u64_at(rva)
        } else {
            view.u32_at(rva).map(u64::from)
        };
        let value = match value {
            Ok(value) => value,
            Err(e) => {
                debug!(module, error = %e, "thunk array truncated");
                return false;
            }
        };
        if value == 0 {
            return true;
        }

        match Thunk::decode(value, is_64) {
            Thunk::Ordinal(ordinal) => {
                out.push(ImportSymbol::ordinal(module, ordinal, source));
            }
            Thunk::HintName(pointer) => {
                let name = addressing
                    .thunk_target(pointer, is_64)
                    .and_then(|hint_rva| hint_rva.checked_add(2))
                    .ok_or(())
                    .and_then(|name_rva| view.cstr_at(name_rva).map_err(|_| ()));
                match name {
                    Ok(name) => {
                        out.push(ImportSymbol::named(module, &name, source));
                    }
                    Err(()) => {
                        debug!(module, pointer = format_args!("{:#x}", pointer), "hint/name record unreadable");
                        return false;
                    }
                }
            }
        }

        rva = match rva.checked_add(width) {
            Some(next) => next,
            None => return false,
        };
    }
}
