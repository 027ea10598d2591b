//! Common types for imported symbols

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Name part of an import: a symbol name or a bare ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolName {
    Named(String),
    Ordinal(u16),
}

impl SymbolName {
    pub fn as_named(&self) -> Option<&str> {
        match self {
            SymbolName::Named(name) => Some(name),
            SymbolName::Ordinal(_) => None,
        }
    }

    pub fn is_ordinal(&self) -> bool {
        matches!(self, SymbolName::Ordinal(_))
    }
}

impl fmt::Display for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolName::Named(name) => write!(f, "{}", name),
            SymbolName::Ordinal(ordinal) => write!(f, "#{}", ordinal),
        }
    }
}

/// Which import directory a symbol came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportSource {
    Classic,
    Delay,
}

/// One external symbol a binary depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportSymbol {
    /// Module name as written in the binary
    pub module: String,
    pub name: SymbolName,
    pub source: ImportSource,
}

impl ImportSymbol {
    pub fn named(module: &str, name: &str, source: ImportSource) -> Self {
        Self {
            module: module.to_string(),
            name: SymbolName::Named(name.to_string()),
            source,
        }
    }

    pub fn ordinal(module: &str, ordinal: u16, source: ImportSource) -> Self {
        Self {
            module: module.to_string(),
            name: SymbolName::Ordinal(ordinal),
            source,
        }
    }

    /// Case-insensitive identity used for deduplication.
    fn dedup_key(&self) -> (String, String) {
        (
            normalize_module(&self.module),
            self.name.to_string().to_ascii_lowercase(),
        )
    }
}

impl fmt::Display for ImportSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.module, self.name)
    }
}

/// Deduplicated import list in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportList {
    symbols: Vec<ImportSymbol>,
    #[serde(skip)]
    seen: HashSet<(String, String)>,
}

impl ImportList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symbol unless an equivalent one is already present.
    /// Returns whether it was added.
    pub fn push(&mut self, symbol: ImportSymbol) -> bool {
        if self.seen.insert(symbol.dedup_key()) {
            self.symbols.push(symbol);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImportSymbol> {
        self.symbols.iter()
    }

    pub fn count_from(&self, source: ImportSource) -> usize {
        self.symbols.iter().filter(|s| s.source == source).count()
    }
}

impl FromIterator<ImportSymbol> for ImportList {
    fn from_iter<I: IntoIterator<Item = ImportSymbol>>(iter: I) -> Self {
        let mut list = ImportList::new();
        for symbol in iter {
            list.push(symbol);
        }
        list
    }
}

impl Extend<ImportSymbol> for ImportList {
    fn extend<I: IntoIterator<Item = ImportSymbol>>(&mut self, iter: I) {
        for symbol in iter {
            self.push(symbol);
        }
    }
}

impl<'a> IntoIterator for &'a ImportList {
    type Item = &'a ImportSymbol;
    type IntoIter = std::slice::Iter<'a, ImportSymbol>;

    fn into_iter(self) -> Self::IntoIter {
        self.symbols.iter()
    }
}

/// Trim and lowercase a module name.
pub fn normalize_module(module: &str) -> String {
    module.trim().to_ascii_lowercase()
}
