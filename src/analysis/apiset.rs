//! API-set alias fallback policy
//!
//! API-set modules (`api-ms-win-*`, `ext-ms-win-*`) are virtual names that the
//! loader forwards to a concrete DLL. Metadata usually declares the concrete
//! DLL, so a missed alias is retried against the likely hosts of its family.
//! The table is approximate and callers may replace it.

use crate::binary::normalize_module;

const ALIAS_PREFIXES: [&str; 2] = ["api-ms-win-", "ext-ms-win-"];

/// Whether a module name is an API-set alias.
pub fn is_api_set(module: &str) -> bool {
    alias_family(&normalize_module(module)).is_some()
}

/// The part of an alias after its `api-ms-win-` / `ext-ms-win-` prefix.
fn alias_family(module: &str) -> Option<&str> {
    ALIAS_PREFIXES
        .iter()
        .find_map(|prefix| module.strip_prefix(prefix))
}

/// Hosts to try for one alias family, e.g. `core` for `api-ms-win-core-*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSetRule {
    pub family: String,
    pub hosts: Vec<String>,
}

impl ApiSetRule {
    pub fn new(family: &str, hosts: &[&str]) -> Self {
        Self {
            family: family.to_ascii_lowercase(),
            hosts: hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
        }
    }

    fn matches(&self, family: &str) -> bool {
        family
            .strip_prefix(self.family.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('-'))
    }
}

/// Ordered alias-family to host-module table. The first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSetTable {
    rules: Vec<ApiSetRule>,
}

impl ApiSetTable {
    pub fn new(rules: Vec<ApiSetRule>) -> Self {
        Self { rules }
    }

    /// A table that never falls back.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, family: &str, hosts: &[&str]) -> Self {
        self.rules.push(ApiSetRule::new(family, hosts));
        self
    }

    pub fn rules(&self) -> &[ApiSetRule] {
        &self.rules
    }

    /// Candidate hosts for `module`; empty when it is not an alias or no
    /// rule covers its family.
    pub fn hosts(&self, module: &str) -> &[String] {
        let module = normalize_module(module);
        let Some(family) = alias_family(&module) else {
            return &[];
        };
        self.rules
            .iter()
            .find(|rule| rule.matches(family))
            .map(|rule| rule.hosts.as_slice())
            .unwrap_or(&[])
    }
}

impl Default for ApiSetTable {
    fn default() -> Self {
        Self::empty()
            .with_rule("core", &["kernel32.dll", "kernelbase.dll"])
            .with_rule("crt", &["ucrtbase.dll"])
            .with_rule("security", &["advapi32.dll", "sechost.dll"])
            .with_rule("service", &["advapi32.dll", "sechost.dll"])
            .with_rule("eventing", &["advapi32.dll"])
            .with_rule("shcore", &["shcore.dll"])
            .with_rule("ntuser", &["user32.dll"])
            .with_rule("gdi", &["gdi32.dll"])
            .with_rule("shell", &["shell32.dll", "shlwapi.dll"])
    }
}
