//! Hand-built PE and metadata fixtures shared by the integration tests.

#![allow(dead_code)]

use minbuild::metadata::tables::{table, CodedIndex};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// PE images
// ============================================================================

const FILE_HEADERS: usize = 0x200;
const SECTION_RVA: u32 = 0x1000;
const PE_OFFSET: usize = 0x80;
const OPTIONAL_HEADER: usize = PE_OFFSET + 4 + 20;
pub const IMAGE_BASE_32: u64 = 0x0040_0000;
pub const IMAGE_BASE_64: u64 = 0x1_4000_0000;

/// One slot of a thunk array.
#[derive(Debug, Clone)]
pub enum Thunk {
    Named(String),
    Ordinal(u16),
}

pub fn named(name: &str) -> Thunk {
    Thunk::Named(name.to_string())
}

#[derive(Debug, Clone)]
struct ModuleImports {
    module: String,
    thunks: Vec<Thunk>,
}

/// Where the builder placed things, for truncation tests.
#[derive(Debug, Clone, Copy)]
pub struct PeLayout {
    /// File offset of the classic import descriptor array
    pub import_descriptors: usize,
    pub delay_descriptors: usize,
}

/// Builds a single-section PE image with import, delay-import and CLR
/// directories. The section holds names and thunks first, then the CLR
/// payload, then delay descriptors, and the classic descriptors last.
#[derive(Debug, Clone)]
pub struct PeBuilder {
    is_64: bool,
    machine: u16,
    imports: Vec<ModuleImports>,
    delay_imports: Vec<ModuleImports>,
    delay_uses_va: bool,
    os_version: (u16, u16),
    subsystem_version: (u16, u16),
    clr_metadata: Option<Vec<u8>>,
}

impl PeBuilder {
    pub fn pe32_plus() -> Self {
        Self {
            is_64: true,
            machine: 0x8664,
            imports: Vec::new(),
            delay_imports: Vec::new(),
            delay_uses_va: false,
            os_version: (6, 0),
            subsystem_version: (6, 0),
            clr_metadata: None,
        }
    }

    pub fn pe32() -> Self {
        Self {
            is_64: false,
            machine: 0x014c,
            ..Self::pe32_plus()
        }
    }

    pub fn import(mut self, module: &str, thunks: Vec<Thunk>) -> Self {
        self.imports.push(ModuleImports {
            module: module.to_string(),
            thunks,
        });
        self
    }

    pub fn delay_import(mut self, module: &str, thunks: Vec<Thunk>) -> Self {
        self.delay_imports.push(ModuleImports {
            module: module.to_string(),
            thunks,
        });
        self
    }

    /// Old-style delay descriptors holding VAs instead of RVAs.
    pub fn delay_uses_va(mut self) -> Self {
        self.delay_uses_va = true;
        self
    }

    pub fn versions(mut self, os: (u16, u16), subsystem: (u16, u16)) -> Self {
        self.os_version = os;
        self.subsystem_version = subsystem;
        self
    }

    pub fn clr_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.clr_metadata = Some(metadata);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_with_layout().0
    }

    pub fn build_with_layout(&self) -> (Vec<u8>, PeLayout) {
        let image_base = if self.is_64 { IMAGE_BASE_64 } else { IMAGE_BASE_32 };
        let mut section = Section::default();

        let classic: Vec<(u32, u32)> = self
            .imports
            .iter()
            .map(|m| self.emit_module(&mut section, m, 0))
            .collect();

        let va_bias = if self.delay_uses_va { image_base } else { 0 };
        let delay: Vec<(u32, u32)> = self
            .delay_imports
            .iter()
            .map(|m| self.emit_module(&mut section, m, va_bias))
            .collect();

        let clr = self.clr_metadata.as_ref().map(|metadata| {
            section.align(4);
            let header_rva = section.rva();
            let metadata_rva = header_rva + 72;
            section.u32(72);
            section.u16(2);
            section.u16(5);
            section.u32(metadata_rva);
            section.u32(metadata.len() as u32);
            section.bytes(&[0u8; 72 - 16]);
            section.bytes(metadata);
            (header_rva, 72u32)
        });

        section.align(4);
        let delay_dir = (!delay.is_empty()).then(|| {
            let rva = section.rva();
            for &(name_rva, int_rva) in &delay {
                let to_field = |rva: u32| (rva as u64 + va_bias) as u32;
                section.u32(if self.delay_uses_va { 0 } else { 1 });
                section.u32(to_field(name_rva));
                section.u32(0);
                section.u32(to_field(int_rva));
                section.u32(to_field(int_rva));
                section.u32(0);
                section.u32(0);
                section.u32(0);
            }
            section.bytes(&[0u8; 32]);
            (rva, 32 * (delay.len() as u32 + 1))
        });

        let import_dir = (!classic.is_empty()).then(|| {
            let rva = section.rva();
            for &(name_rva, int_rva) in &classic {
                section.u32(int_rva);
                section.u32(0);
                section.u32(0);
                section.u32(name_rva);
                section.u32(int_rva);
            }
            section.bytes(&[0u8; 20]);
            (rva, 20 * (classic.len() as u32 + 1))
        });

        let to_offset = |rva: u32| (rva - SECTION_RVA) as usize + FILE_HEADERS;
        let layout = PeLayout {
            import_descriptors: import_dir.map_or(0, |(rva, _)| to_offset(rva)),
            delay_descriptors: delay_dir.map_or(0, |(rva, _)| to_offset(rva)),
        };

        let mut file = self.headers(image_base, section.data.len() as u32);
        let dirs_at = OPTIONAL_HEADER + if self.is_64 { 112 } else { 96 };
        for (index, dir) in [(1, import_dir), (13, delay_dir), (14, clr)] {
            if let Some((rva, size)) = dir {
                put_u32(&mut file, dirs_at + index * 8, rva);
                put_u32(&mut file, dirs_at + index * 8 + 4, size);
            }
        }
        file.extend_from_slice(&section.data);
        (file, layout)
    }

    /// Emit the module name, hint/name records and the thunk array.
    /// Returns `(name_rva, thunk_array_rva)`.
    fn emit_module(&self, section: &mut Section, m: &ModuleImports, va_bias: u64) -> (u32, u32) {
        let name_rva = section.rva();
        section.cstr(&m.module);

        let values: Vec<u64> = m
            .thunks
            .iter()
            .map(|thunk| match thunk {
                Thunk::Ordinal(ordinal) => {
                    let flag = if self.is_64 { 1u64 << 63 } else { 1u64 << 31 };
                    flag | *ordinal as u64
                }
                Thunk::Named(name) => {
                    section.align(2);
                    let hint_rva = section.rva();
                    section.u16(0);
                    section.cstr(name);
                    hint_rva as u64 + va_bias
                }
            })
            .collect();

        section.align(8);
        let thunks_rva = section.rva();
        for value in values.into_iter().chain(std::iter::once(0)) {
            if self.is_64 {
                section.bytes(&value.to_le_bytes());
            } else {
                section.u32(value as u32);
            }
        }
        (name_rva, thunks_rva)
    }

    fn headers(&self, image_base: u64, section_size: u32) -> Vec<u8> {
        let mut h = vec![0u8; FILE_HEADERS];
        h[0..2].copy_from_slice(b"MZ");
        put_u32(&mut h, 0x3C, PE_OFFSET as u32);
        h[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");

        let coff = PE_OFFSET + 4;
        let optional_size: u16 = if self.is_64 { 0xF0 } else { 0xE0 };
        put_u16(&mut h, coff, self.machine);
        put_u16(&mut h, coff + 2, 1);
        put_u16(&mut h, coff + 16, optional_size);
        put_u16(&mut h, coff + 18, 0x2022);

        let opt = OPTIONAL_HEADER;
        put_u16(&mut h, opt, if self.is_64 { 0x20b } else { 0x10b });
        if self.is_64 {
            h[opt + 24..opt + 32].copy_from_slice(&image_base.to_le_bytes());
        } else {
            put_u32(&mut h, opt + 28, image_base as u32);
        }
        put_u32(&mut h, opt + 32, 0x1000);
        put_u32(&mut h, opt + 36, 0x200);
        put_u16(&mut h, opt + 40, self.os_version.0);
        put_u16(&mut h, opt + 42, self.os_version.1);
        put_u16(&mut h, opt + 48, self.subsystem_version.0);
        put_u16(&mut h, opt + 50, self.subsystem_version.1);
        put_u32(&mut h, opt + 56, SECTION_RVA + section_size.next_multiple_of(0x1000));
        put_u32(&mut h, opt + 60, FILE_HEADERS as u32);
        put_u16(&mut h, opt + 68, 3);
        let count_at = opt + if self.is_64 { 108 } else { 92 };
        put_u32(&mut h, count_at, 16);

        let section_header = opt + optional_size as usize;
        h[section_header..section_header + 8].copy_from_slice(b".idata\0\0");
        put_u32(&mut h, section_header + 8, section_size);
        put_u32(&mut h, section_header + 12, SECTION_RVA);
        put_u32(&mut h, section_header + 16, section_size);
        put_u32(&mut h, section_header + 20, FILE_HEADERS as u32);
        put_u32(&mut h, section_header + 36, 0xC000_0040);
        h
    }
}

#[derive(Debug, Default)]
struct Section {
    data: Vec<u8>,
}

impl Section {
    fn rva(&self) -> u32 {
        SECTION_RVA + self.data.len() as u32
    }

    fn align(&mut self, to: usize) {
        while self.data.len() % to != 0 {
            self.data.push(0);
        }
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    fn u16(&mut self, value: u16) {
        self.bytes(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.bytes(&value.to_le_bytes());
    }

    fn cstr(&mut self, s: &str) {
        self.bytes(s.as_bytes());
        self.data.push(0);
    }
}

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

// ============================================================================
// ECMA-335 metadata
// ============================================================================

const METHOD_PUBLIC_STATIC: u16 = 0x0006 | 0x0010;
const METHOD_PINVOKE_IMPL: u16 = 0x2000;

/// Builds a minimal metadata root with `#~`, `#Strings` and `#Blob` streams.
///
/// Methods belong to the most recently begun type, mirroring how TypeDef
/// method lists are laid out.
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    strings: Vec<u8>,
    blobs: Vec<u8>,
    type_refs: Vec<[u16; 3]>,
    type_defs: Vec<(u32, [u16; 5])>,
    methods: Vec<(u16, u16, u16)>,
    member_refs: Vec<[u16; 3]>,
    custom_attributes: Vec<[u16; 3]>,
    module_refs: Vec<(String, u16)>,
    impl_maps: Vec<[u16; 4]>,
    signature: u16,
}

impl Default for MetadataBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            strings: vec![0],
            blobs: vec![0],
            type_refs: Vec::new(),
            type_defs: Vec::new(),
            methods: Vec::new(),
            member_refs: Vec::new(),
            custom_attributes: Vec::new(),
            module_refs: Vec::new(),
            impl_maps: Vec::new(),
            signature: 0,
        };
        builder.signature = builder.blob(&[0x00, 0x00, 0x01]);
        builder.begin_type("", "<Module>");
        builder
    }

    fn string(&mut self, s: &str) -> u16 {
        let index = self.strings.len() as u16;
        self.strings.extend_from_slice(s.as_bytes());
        self.strings.push(0);
        index
    }

    fn blob(&mut self, bytes: &[u8]) -> u16 {
        assert!(bytes.len() < 0x80, "fixture blobs use one-byte lengths");
        let index = self.blobs.len() as u16;
        self.blobs.push(bytes.len() as u8);
        self.blobs.extend_from_slice(bytes);
        index
    }

    /// Start a TypeDef; returns its row.
    pub fn begin_type(&mut self, namespace: &str, name: &str) -> u32 {
        let name = self.string(name);
        let namespace = self.string(namespace);
        let method_list = self.methods.len() as u16 + 1;
        self.type_defs
            .push((0x0010_0181, [name, namespace, 0, 1, method_list]));
        self.type_defs.len() as u32
    }

    /// Add a method to the current type; returns its MethodDef row.
    pub fn method(&mut self, name: &str, flags: u16) -> u32 {
        let name = self.string(name);
        self.methods.push((flags, name, self.signature));
        self.methods.len() as u32
    }

    /// Add a P/Invoke method with an ImplMap row. `import_name` is the
    /// entry-point override; `None` leaves it empty.
    pub fn pinvoke(&mut self, name: &str, module: &str, import_name: Option<&str>) -> u32 {
        let method = self.method(name, METHOD_PUBLIC_STATIC | METHOD_PINVOKE_IMPL);
        let scope = self.module_ref(module);
        let import = self.string(import_name.unwrap_or(""));
        let forwarded = CodedIndex::MemberForwarded
            .encode(table::METHOD_DEF, method)
            .unwrap() as u16;
        self.impl_maps.push([0x0100, forwarded, import, scope]);
        method
    }

    /// A plain static method (no P/Invoke).
    pub fn managed_method(&mut self, name: &str) -> u32 {
        self.method(name, METHOD_PUBLIC_STATIC)
    }

    fn module_ref(&mut self, module: &str) -> u16 {
        if let Some(i) = self.module_refs.iter().position(|(m, _)| m == module) {
            return i as u16 + 1;
        }
        let name = self.string(module);
        self.module_refs.push((module.to_string(), name));
        self.module_refs.len() as u16
    }

    /// Attribute constructor declared through a TypeRef + MemberRef.
    /// Returns the CustomAttributeType coded index.
    pub fn member_ref_constructor(&mut self, namespace: &str, name: &str) -> u32 {
        let type_name = self.string(name);
        let type_namespace = self.string(namespace);
        self.type_refs.push([0, type_name, type_namespace]);
        let type_ref = self.type_refs.len() as u32;

        let parent = CodedIndex::MemberRefParent
            .encode(table::TYPE_REF, type_ref)
            .unwrap() as u16;
        let ctor_name = self.string(".ctor");
        let signature = self.blob(&[0x20, 0x01, 0x01, 0x0E]);
        self.member_refs.push([parent, ctor_name, signature]);

        CodedIndex::CustomAttributeType
            .encode(table::MEMBER_REF, self.member_refs.len() as u32)
            .unwrap()
    }

    /// Attribute type defined in this image with its own `.ctor`.
    /// Begins a new type, so call it before or after a run of methods.
    pub fn method_def_constructor(&mut self, namespace: &str, name: &str) -> u32 {
        self.begin_type(namespace, name);
        let ctor = self.method(".ctor", 0x1886);
        CodedIndex::CustomAttributeType
            .encode(table::METHOD_DEF, ctor)
            .unwrap()
    }

    fn attribute(&mut self, method: u32, ctor: u32, value: Vec<u8>) {
        let parent = CodedIndex::HasCustomAttribute
            .encode(table::METHOD_DEF, method)
            .unwrap() as u16;
        let value = self.blob(&value);
        self.custom_attributes.push([parent, ctor as u16, value]);
    }

    /// Attach a single-string attribute (e.g. `SupportedOSPlatform`).
    pub fn string_attribute(&mut self, method: u32, ctor: u32, value: &str) {
        let mut blob = vec![0x01, 0x00];
        blob.extend(ser_string(value));
        blob.extend_from_slice(&[0x00, 0x00]);
        self.attribute(method, ctor, blob);
    }

    /// Attach a `DllImport`-style attribute with an optional `EntryPoint`.
    pub fn dll_import_attribute(
        &mut self,
        method: u32,
        ctor: u32,
        module: &str,
        entry_point: Option<&str>,
    ) {
        let mut blob = vec![0x01, 0x00];
        blob.extend(ser_string(module));
        match entry_point {
            Some(entry) => {
                blob.extend_from_slice(&1u16.to_le_bytes());
                blob.extend_from_slice(&[0x53, 0x0E]);
                blob.extend(ser_string("EntryPoint"));
                blob.extend(ser_string(entry));
            }
            None => blob.extend_from_slice(&[0x00, 0x00]),
        }
        self.attribute(method, ctor, blob);
    }

    pub fn build(&self) -> Vec<u8> {
        let tables = self.table_stream();
        let streams: [(&str, Vec<u8>); 3] = [
            ("#~", tables),
            ("#Strings", padded(self.strings.clone())),
            ("#Blob", padded(self.blobs.clone())),
        ];

        let version = b"v4.0.30319\0\0";
        let header_len = 16
            + version.len()
            + 4
            + streams
                .iter()
                .map(|(name, _)| 8 + (name.len() + 1).next_multiple_of(4))
                .sum::<usize>();

        let mut out = Vec::new();
        out.extend_from_slice(b"BSJB");
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(version.len() as u32).to_le_bytes());
        out.extend_from_slice(version);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(streams.len() as u16).to_le_bytes());

        let mut offset = header_len;
        for (name, data) in &streams {
            out.extend_from_slice(&(offset as u32).to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            let mut name_bytes = name.as_bytes().to_vec();
            name_bytes.push(0);
            out.extend(padded(name_bytes));
            offset += data.len();
        }
        assert_eq!(out.len(), header_len);

        for (_, data) in &streams {
            out.extend_from_slice(data);
        }
        out
    }

    fn table_stream(&self) -> Vec<u8> {
        let mut present: Vec<(usize, u32, Vec<u8>)> = Vec::new();
        let mut add = |id: usize, rows: usize, bytes: Vec<u8>| {
            if rows > 0 {
                present.push((id, rows as u32, bytes));
            }
        };

        // Module: generation, name, mvid, encid, encbaseid
        add(table::MODULE, 1, words(&[0, 0, 0, 0, 0]));
        add(
            table::TYPE_REF,
            self.type_refs.len(),
            self.type_refs.iter().flat_map(|r| words(r)).collect(),
        );
        add(
            table::TYPE_DEF,
            self.type_defs.len(),
            self.type_defs
                .iter()
                .flat_map(|(flags, cols)| {
                    let mut row = flags.to_le_bytes().to_vec();
                    row.extend(words(cols));
                    row
                })
                .collect(),
        );
        add(
            table::METHOD_DEF,
            self.methods.len(),
            self.methods
                .iter()
                .flat_map(|&(flags, name, signature)| {
                    let mut row = 0u32.to_le_bytes().to_vec();
                    row.extend(words(&[0, flags, name, signature, 1]));
                    row
                })
                .collect(),
        );
        add(
            table::MEMBER_REF,
            self.member_refs.len(),
            self.member_refs.iter().flat_map(|r| words(r)).collect(),
        );
        add(
            table::CUSTOM_ATTRIBUTE,
            self.custom_attributes.len(),
            self.custom_attributes.iter().flat_map(|r| words(r)).collect(),
        );
        add(
            table::MODULE_REF,
            self.module_refs.len(),
            self.module_refs.iter().flat_map(|(_, name)| words(&[*name])).collect(),
        );
        add(
            table::IMPL_MAP,
            self.impl_maps.len(),
            self.impl_maps.iter().flat_map(|r| words(r)).collect(),
        );

        let valid = present.iter().fold(0u64, |mask, (id, _, _)| mask | 1 << id);
        let mut out = Vec::new();
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&[2, 0, 0, 1]);
        out.extend_from_slice(&valid.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        for (_, rows, _) in &present {
            out.extend_from_slice(&rows.to_le_bytes());
        }
        for (_, _, bytes) in &present {
            out.extend_from_slice(bytes);
        }
        padded(out)
    }
}

fn ser_string(s: &str) -> Vec<u8> {
    let mut out = vec![s.len() as u8];
    out.extend_from_slice(s.as_bytes());
    out
}

fn words(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn padded(mut bytes: Vec<u8>) -> Vec<u8> {
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
}

// ============================================================================
// Shared scenario
// ============================================================================

pub const PLATFORM_NS: &str = "Windows.Win32.Foundation.Metadata";
pub const SUPPORTED_OS_PLATFORM: &str = "SupportedOSPlatformAttribute";

/// Metadata declaring a handful of kernel32/user32 APIs, using both
/// attribute constructor forms.
pub fn sample_metadata() -> Vec<u8> {
    let mut md = MetadataBuilder::new();
    let platform = md.member_ref_constructor(PLATFORM_NS, SUPPORTED_OS_PLATFORM);

    md.begin_type("Windows.Win32.System.Threading", "Apis");
    let sleep = md.pinvoke("Sleep", "KERNEL32.dll", None);
    let tick = md.pinvoke("GetTickCount64", "KERNEL32.dll", None);
    md.string_attribute(tick, platform, "windows6.0.6000");
    let describe = md.pinvoke("SetThreadDescription", "KERNEL32.dll", None);
    md.string_attribute(describe, platform, "windows10.0.14393");
    let create = md.pinvoke("CreateFileW", "KERNEL32.dll", None);
    md.string_attribute(create, platform, "windows5.1.2600");
    md.managed_method("NotNative");
    let _ = sleep;

    md.begin_type("Windows.Win32.UI.HiDpi", "Apis");
    let dpi = md.pinvoke("GetDpiForWindow", "USER32", None);
    md.string_attribute(dpi, platform, "windows10.0.14393");
    let aware = md.pinvoke("AreDpiAwarenessContextsEqual_Alias", "USER32", Some("AreDpiAwarenessContextsEqual"));
    md.string_attribute(aware, platform, "windows10.0.14393");

    md.begin_type("Windows.Win32.System.Com", "Apis");
    let modern = md.pinvoke("CoGetApartmentType", "OLE32.dll", None);
    md.string_attribute(modern, platform, "windows10.0.19041");

    md.build()
}

/// Write `bytes` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}
