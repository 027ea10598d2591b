//! Platform strings to Windows build numbers

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Builds at or above this value are literal Windows 10/11 build numbers.
const LITERAL_BUILD_FLOOR: u32 = 10_000;

/// Minimum OS build attached to a declared API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRequirement {
    /// 0 means no recorded minimum
    pub build: u32,
    /// Platform string as written in the metadata, e.g. `windows10.0.19041`
    pub platform: String,
}

impl PlatformRequirement {
    pub fn new(build: u32, platform: &str) -> Self {
        Self {
            build,
            platform: platform.to_string(),
        }
    }

    /// No platform attribute: available since always.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Baseline build for a `major.minor` Windows version, 0 if unknown.
pub fn build_for_version(major: u32, minor: u32) -> u32 {
    match (major, minor) {
        (6, 0) => 6000,
        (6, 1) | (7, 0) => 7600,
        (6, 2) | (8, 0) => 9200,
        (6, 3) | (8, 1) => 9600,
        (10, 0) => 10240,
        _ => 0,
    }
}

/// Converts platform strings such as `windows8.1` into build numbers.
#[derive(Debug, Clone)]
pub struct PlatformParser {
    version_regex: Regex,
}

impl PlatformParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            version_regex: Regex::new(r"\d+(?:\.\d+)*")?,
        })
    }

    /// Build number for a platform string. Unparseable strings give 0.
    pub fn build(&self, platform: &str) -> u32 {
        let Some(version) = self.version_regex.find(platform) else {
            debug!(platform, "platform string has no version");
            return 0;
        };

        let segments: Vec<u32> = version
            .as_str()
            .split('.')
            .filter_map(|s| s.parse().ok())
            .collect();

        if let Some(literal) = segments
            .iter()
            .copied()
            .filter(|&s| s >= LITERAL_BUILD_FLOOR)
            .max()
        {
            return literal;
        }

        match segments.as_slice() {
            [major] => build_for_version(*major, 0),
            [major, minor, ..] => build_for_version(*major, *minor),
            [] => 0,
        }
    }

    pub fn requirement(&self, platform: &str) -> PlatformRequirement {
        PlatformRequirement::new(self.build(platform), platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_builds() {
        let parser = PlatformParser::new().unwrap();
        assert_eq!(parser.build("windows10.0.19041"), 19041);
        assert_eq!(parser.build("windows10.0.17763.0"), 17763);
        assert_eq!(parser.build("Windows10.0.22000"), 22000);
    }

    #[test]
    fn test_baseline_table() {
        let parser = PlatformParser::new().unwrap();
        assert_eq!(parser.build("windows6.0"), 6000);
        assert_eq!(parser.build("windows6.1"), 7600);
        assert_eq!(parser.build("windows6.2"), 9200);
        assert_eq!(parser.build("windows6.3"), 9600);
        assert_eq!(parser.build("windows10.0"), 10240);
        assert_eq!(parser.build("windows7.0"), 7600);
        assert_eq!(parser.build("windows8.0"), 9200);
        assert_eq!(parser.build("windows8.1"), 9600);
        assert_eq!(parser.build("windows8"), 9200);
        assert_eq!(parser.build("windows10"), 10240);
    }

    #[test]
    fn test_unparseable_is_zero() {
        let parser = PlatformParser::new().unwrap();
        assert_eq!(parser.build("windows"), 0);
        assert_eq!(parser.build(""), 0);
        assert_eq!(parser.build("windows5.1"), 0);
        assert_eq!(parser.build("windows99999999999999"), 0);

        let req = parser.requirement("linux");
        assert_eq!(req, PlatformRequirement::new(0, "linux"));
    }
}
