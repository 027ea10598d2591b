//! CLI argument parsing module
//!
//! This module defines the command-line interface for the minbuild tool.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Environment variable naming the default metadata file.
pub const METADATA_ENV: &str = "MINBUILD_METADATA";

/// minbuild - minimum Windows build required by a PE binary
#[derive(Parser, Debug)]
#[command(name = "minbuild")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Determine the minimum Windows build a PE binary requires")]
#[command(long_about = r#"
minbuild walks the import and delay-load tables of a PE binary and looks every
imported symbol up in Windows API compatibility metadata (for example
Windows.Win32.winmd). The highest minimum build among the matched imports is
the build the binary requires.

Examples:
  minbuild analyze --metadata Windows.Win32.winmd --binary app.exe
  minbuild analyze --metadata Windows.Win32.winmd --binary a.dll --binary b.dll --format csv
  minbuild analyze --metadata Windows.Win32.winmd --binary app.exe --json --with-header
  echo kernel32.dll,GetTickCount64 | minbuild lookup --metadata Windows.Win32.winmd
"#)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short = 'f', long = "format", global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,

    /// Suppress colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze binaries; without --binary, look up module,symbol lines from stdin
    Analyze {
        /// Compatibility metadata (.winmd, raw metadata, or a pointer file)
        #[arg(long, env = METADATA_ENV, value_name = "PATH")]
        metadata: PathBuf,

        /// Binary to analyze; repeat for several
        #[arg(long, value_name = "PATH")]
        binary: Vec<PathBuf>,

        /// Shorthand for --format json
        #[arg(long)]
        json: bool,

        /// Also derive a minimum build from the optional header versions
        #[arg(long)]
        with_header: bool,
    },

    /// Look up module,symbol lines and print module,symbol,minBuild,reason
    Lookup {
        /// Compatibility metadata (.winmd, raw metadata, or a pointer file)
        #[arg(long, env = METADATA_ENV, value_name = "PATH")]
        metadata: PathBuf,

        /// Input file; stdin when omitted
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,
    },
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed human-readable output (default)
    Pretty,
    /// key=value lines
    Text,
    /// One JSON record per line
    Json,
    /// CSV with a header line
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Pretty => write!(f, "pretty"),
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}
