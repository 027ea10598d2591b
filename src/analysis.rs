//! Classification of imports against compatibility metadata
//!
//! Joins a binary's import list with an [`ApiMap`], widening API-set aliases
//! through an [`ApiSetTable`] as a last resort, and reduces the result to the
//! single minimum build the binary needs.

pub mod apiset;

pub use apiset::{is_api_set, ApiSetRule, ApiSetTable};

use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

use crate::binary::{normalize_module, BinaryAnalyzer, ImportList, ImportSource, PeImage};
use crate::metadata::{build_for_version, ApiEntry, ApiMap};

/// Reason reported when nothing raised the build above 0.
pub const UNKNOWN_REASON: &str = "unknown";

/// How a single import was matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'m> {
    Direct(&'m ApiEntry),
    /// Found only by retrying an API-set alias against a concrete host
    ApiSetFallback { host: String, entry: &'m ApiEntry },
    Miss,
}

impl<'m> Resolution<'m> {
    pub fn entry(&self) -> Option<&'m ApiEntry> {
        match self {
            Resolution::Direct(entry) | Resolution::ApiSetFallback { entry, .. } => Some(*entry),
            Resolution::Miss => None,
        }
    }

    pub fn build(&self) -> u32 {
        self.entry().map_or(0, |e| e.requirement.build)
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolution::ApiSetFallback { .. })
    }

    /// `module!symbol (platform)`, tagged when found through a fallback host.
    pub fn reason(&self, module: &str, symbol: &str) -> String {
        let Some(entry) = self.entry() else {
            return UNKNOWN_REASON.to_string();
        };

        let mut reason = format!("{}!{}", module, symbol);
        if !entry.requirement.platform.is_empty() {
            reason.push_str(&format!(" ({})", entry.requirement.platform));
        }
        if let Resolution::ApiSetFallback { host, .. } = self {
            reason.push_str(&format!(" via api-set fallback {}", host));
        }
        reason
    }
}

/// A minimum build and the reason for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub build: u32,
    pub reason: String,
}

impl Verdict {
    pub fn new(build: u32, reason: impl Into<String>) -> Self {
        Self {
            build,
            reason: reason.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(0, UNKNOWN_REASON)
    }
}

/// Which signal decided the final build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Api,
    Header,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Api => write!(f, "api"),
            Signal::Header => write!(f, "header"),
        }
    }
}

/// Import-derived verdict plus match counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiVerdict {
    pub verdict: Verdict,
    pub mapped_count: usize,
    pub fallback_count: usize,
}

/// Per-binary result; built once and serialized as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub binary_path: String,
    pub bitness: u8,
    pub architecture: String,
    pub import_count: usize,
    pub delay_import_count: usize,
    pub mapped_count: usize,
    pub fallback_count: usize,
    pub required_build: u32,
    pub required_reason: String,
    pub signal: Signal,
}

/// Analyzer settings.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerConfig {
    pub api_sets: ApiSetTable,
    /// Fold the optional header's OS/subsystem version into the verdict
    pub with_header: bool,
}

/// Matches imports against a read-only [`ApiMap`].
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'m> {
    map: &'m ApiMap,
    api_sets: &'m ApiSetTable,
}

impl<'m> Classifier<'m> {
    pub fn new(map: &'m ApiMap, api_sets: &'m ApiSetTable) -> Self {
        Self { map, api_sets }
    }

    /// Look up one named import, falling back to API-set hosts on a miss.
    pub fn resolve(&self, module: &str, symbol: &str) -> Resolution<'m> {
        let module = normalize_module(module);
        if let Some(entry) = self.map.lookup(&module, symbol) {
            return Resolution::Direct(entry);
        }

        for host in self.api_sets.hosts(&module) {
            if let Some(entry) = self.map.lookup(host, symbol) {
                debug!(module = %module, symbol, host = %host, "resolved through api-set fallback");
                return Resolution::ApiSetFallback {
                    host: host.clone(),
                    entry,
                };
            }
        }
        Resolution::Miss
    }

    /// Reduce an import list to the highest build any import requires.
    /// Ordinals are skipped; ties keep the first import in list order.
    pub fn api_verdict(&self, imports: &ImportList) -> ApiVerdict {
        let mut verdict = Verdict::unknown();
        let mut mapped_count = 0;
        let mut fallback_count = 0;

        for import in imports {
            let Some(symbol) = import.name.as_named() else {
                continue;
            };
            let resolution = self.resolve(&import.module, symbol);
            if resolution == Resolution::Miss {
                continue;
            }

            mapped_count += 1;
            if resolution.is_fallback() {
                fallback_count += 1;
            }
            if resolution.build() > verdict.build {
                verdict = Verdict::new(
                    resolution.build(),
                    resolution.reason(&import.module, symbol),
                );
            }
        }

        ApiVerdict {
            verdict,
            mapped_count,
            fallback_count,
        }
    }

    /// Classify a parsed binary; `header` adds the optional-header signal.
    pub fn classify(
        &self,
        binary_path: &str,
        image: &PeImage,
        imports: &ImportList,
        header: bool,
    ) -> AnalysisResult {
        let api = self.api_verdict(imports);
        let (verdict, signal) = if header {
            combine(api.verdict, Some(header_verdict(image)))
        } else {
            (api.verdict, Signal::Api)
        };

        AnalysisResult {
            binary_path: binary_path.to_string(),
            bitness: image.bitness(),
            architecture: image.architecture(),
            import_count: imports.len(),
            delay_import_count: imports.count_from(ImportSource::Delay),
            mapped_count: api.mapped_count,
            fallback_count: api.fallback_count,
            required_build: verdict.build,
            required_reason: verdict.reason,
            signal,
        }
    }
}

/// Minimum build implied by the optional header's OS and subsystem versions.
pub fn header_verdict(image: &PeImage) -> Verdict {
    let candidates = [
        ("os", image.os_version),
        ("subsystem", image.subsystem_version),
    ];

    candidates
        .iter()
        .map(|&(label, (major, minor))| {
            let build = build_for_version(major.into(), minor.into());
            (build, format!("{label} version {major}.{minor}"))
        })
        .fold(Verdict::unknown(), |best, (build, reason)| {
            if build > best.build {
                Verdict::new(build, reason)
            } else {
                best
            }
        })
}

/// Plain maximum of the API verdict and an optional header verdict.
/// The API signal wins ties. With a header verdict present the reason is
/// prefixed with the winning signal.
pub fn combine(api: Verdict, header: Option<Verdict>) -> (Verdict, Signal) {
    match header {
        None => (api, Signal::Api),
        Some(header) if header.build > api.build => (
            Verdict::new(header.build, format!("header: {}", header.reason)),
            Signal::Header,
        ),
        Some(_) => (
            Verdict::new(api.build, format!("api: {}", api.reason)),
            Signal::Api,
        ),
    }
}

/// Loads binaries and classifies them against one shared map.
#[derive(Debug)]
pub struct Analyzer<'m> {
    binary: BinaryAnalyzer,
    map: &'m ApiMap,
    config: AnalyzerConfig,
}

impl<'m> Analyzer<'m> {
    pub fn new(map: &'m ApiMap, config: AnalyzerConfig) -> Self {
        Self {
            binary: BinaryAnalyzer::new(),
            map,
            config,
        }
    }

    pub fn classifier(&self) -> Classifier<'_> {
        Classifier::new(self.map, &self.config.api_sets)
    }

    /// Load, walk and classify one binary.
    pub fn analyze_file<P: AsRef<Path>>(&self, path: P) -> Result<AnalysisResult> {
        let path = path.as_ref();
        let parsed = self.binary.analyze_file(path)?;
        let result = self.classifier().classify(
            &path.to_string_lossy(),
            &parsed.image,
            &parsed.imports,
            self.config.with_header,
        );

        info!(
            path = %path.display(),
            imports = result.import_count,
            mapped = result.mapped_count,
            build = result.required_build,
            "classified binary"
        );
        Ok(result)
    }

    /// Analyze several binaries in parallel; results keep input order.
    pub fn analyze_many<P: AsRef<Path> + Sync>(&self, paths: &[P]) -> Vec<Result<AnalysisResult>> {
        paths.par_iter().map(|p| self.analyze_file(p)).collect()
    }
}
