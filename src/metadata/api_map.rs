//! `module!symbol` to minimum build map

use std::collections::HashMap;
use tracing::{debug, info};

use super::attributes::{AttributeKind, AttributeResolver};
use super::platform::{PlatformParser, PlatformRequirement};
use super::tables::{table, CodedIndex, MetadataImage};
use crate::binary::normalize_module;
use crate::error::Result;

/// MethodDef flag: the method is a P/Invoke declaration.
const PINVOKE_IMPL: u32 = 0x2000;

/// One declared API with its requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEntry {
    pub module: String,
    pub symbol: String,
    pub requirement: PlatformRequirement,
}

/// Case-insensitive map from `module!symbol` to the highest requirement seen.
///
/// Every entry is stored under all module-extension and A/W-suffix variants of
/// its key, and [`ApiMap::lookup`] probes the same variants, so insertions and
/// lookups stay symmetric.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiMap {
    entries: HashMap<String, ApiEntry>,
    declared: usize,
}

impl ApiMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a declared API. On collision the higher build wins; an equal
    /// build keeps the entry already present.
    pub fn insert(&mut self, module: &str, symbol: &str, requirement: PlatformRequirement) {
        self.declared += 1;
        for m in module_variants(module) {
            for s in symbol_variants(symbol) {
                let key = map_key(&m, s);
                let replace = self
                    .entries
                    .get(&key)
                    .map_or(true, |existing| requirement.build > existing.requirement.build);
                if replace {
                    self.entries.insert(
                        key,
                        ApiEntry {
                            module: module.to_string(),
                            symbol: symbol.to_string(),
                            requirement: requirement.clone(),
                        },
                    );
                }
            }
        }
    }

    /// Find a symbol: direct key, extension-toggled module, A/W-stripped
    /// symbol, then both toggled.
    pub fn lookup(&self, module: &str, symbol: &str) -> Option<&ApiEntry> {
        let modules = module_variants(module);
        let symbols = symbol_variants(symbol);
        symbols
            .iter()
            .flat_map(|s| modules.iter().map(move |m| map_key(m, s)))
            .find_map(|key| self.entries.get(&key))
    }

    /// Number of keys, variants included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of declarations inserted.
    pub fn declared(&self) -> usize {
        self.declared
    }

    /// Build the map from every P/Invoke method in a metadata image.
    pub fn from_metadata(metadata: &MetadataImage<'_>) -> Result<Self> {
        let parser = PlatformParser::new()?;
        let resolver = AttributeResolver::new(metadata);
        let tables = &metadata.tables;

        let mut attributes: HashMap<u32, Vec<AttributeKind>> = HashMap::new();
        for (_, row) in tables.rows(table::CUSTOM_ATTRIBUTE) {
            let Some((table::METHOD_DEF, method)) = CodedIndex::HasCustomAttribute.decode(row.get(0))
            else {
                continue;
            };
            let kind = resolver.classify(row.get(1), row.get(2));
            if kind != AttributeKind::Other {
                attributes.entry(method).or_default().push(kind);
            }
        }

        // ImplMap: method -> (module, import name)
        let mut impl_maps: HashMap<u32, (&str, &str)> = HashMap::new();
        for (_, row) in tables.rows(table::IMPL_MAP) {
            let Some((table::METHOD_DEF, method)) = CodedIndex::MemberForwarded.decode(row.get(1))
            else {
                continue;
            };
            let module = tables
                .row(table::MODULE_REF, row.get(3))
                .map(|r| metadata.strings.get(r.get(0)))
                .unwrap_or("");
            impl_maps.insert(method, (module, metadata.strings.get(row.get(2))));
        }

        let mut map = ApiMap::new();
        for (_, methods) in metadata.type_methods() {
            for method in methods {
                let Some(row) = tables.row(table::METHOD_DEF, method) else {
                    continue;
                };
                let flags = row.get(2);
                let name = metadata.strings.get(row.get(3));
                let attrs = attributes.get(&method).map(Vec::as_slice).unwrap_or(&[]);

                let Some((module, entry)) =
                    native_import(flags, name, impl_maps.get(&method).copied(), attrs)
                else {
                    continue;
                };
                if module.is_empty() {
                    debug!(method = name, "P/Invoke without a module");
                    continue;
                }

                let requirement = attrs
                    .iter()
                    .filter_map(|kind| match kind {
                        AttributeKind::PlatformRequirement(platform) => {
                            Some(parser.requirement(platform))
                        }
                        _ => None,
                    })
                    .fold(PlatformRequirement::none(), |best, req| {
                        if req.build > best.build {
                            req
                        } else {
                            best
                        }
                    });

                map.insert(&module, &entry, requirement);
            }
        }

        info!(
            declared = map.declared(),
            keys = map.len(),
            "built API map from metadata"
        );
        Ok(map)
    }
}

/// `(module, entry point)` of a P/Invoke method, from its ImplMap row or a
/// `DllImportAttribute`.
fn native_import(
    flags: u32,
    method_name: &str,
    impl_map: Option<(&str, &str)>,
    attrs: &[AttributeKind],
) -> Option<(String, String)> {
    let entry_or_name = |entry: &str| {
        if entry.is_empty() {
            method_name.to_string()
        } else {
            entry.to_string()
        }
    };

    if flags & PINVOKE_IMPL != 0 {
        if let Some((module, entry)) = impl_map {
            return Some((module.to_string(), entry_or_name(entry)));
        }
    }

    attrs.iter().find_map(|kind| match kind {
        AttributeKind::NativeImport {
            module,
            entry_point,
        } => Some((
            module.clone(),
            entry_or_name(entry_point.as_deref().unwrap_or("")),
        )),
        _ => None,
    })
}

/// `{as-given, with .dll | without .dll}`, normalized.
pub fn module_variants(module: &str) -> Vec<String> {
    let module = normalize_module(module);
    let toggled = match module.strip_suffix(".dll") {
        Some(stem) => stem.to_string(),
        None => format!("{module}.dll"),
    };
    vec![module, toggled]
}

/// `{as-given, without a trailing A/W}`.
pub fn symbol_variants(symbol: &str) -> Vec<&str> {
    let mut variants = vec![symbol];
    if let Some(stem) = strip_charset_suffix(symbol) {
        variants.push(stem);
    }
    variants
}

/// Strip a trailing uppercase `A` or `W` (ANSI/wide variants).
pub fn strip_charset_suffix(symbol: &str) -> Option<&str> {
    if symbol.len() > 1 && (symbol.ends_with('A') || symbol.ends_with('W')) {
        Some(&symbol[..symbol.len() - 1])
    } else {
        None
    }
}

fn map_key(module: &str, symbol: &str) -> String {
    format!("{}!{}", module, symbol).to_lowercase()
}
