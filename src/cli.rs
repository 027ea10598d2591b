//! CLI module for the minbuild tool
//!
//! This module provides the command-line interface functionality including
//! argument parsing, output formatting and the batch lookup mode.

pub mod args;
pub mod batch;
pub mod output;

pub use args::{Args, Commands, OutputFormat};
pub use batch::{csv_escape, run_batch, split_csv_line, BatchSummary};
pub use output::{Color, OutputFormatter};

use crate::analysis::{Analyzer, AnalyzerConfig, ApiSetTable, Classifier};
use crate::error::exit_code_for;
use crate::metadata::{load_api_map, ApiMap};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main CLI application runner
pub struct CliApp {
    args: Args,
}

impl CliApp {
    /// Create a new CLI application with parsed arguments
    pub fn new(args: Args) -> Self {
        Self { args }
    }

    /// Run the CLI application and return the process exit code
    pub fn run(&self) -> Result<i32> {
        match &self.args.command {
            Commands::Analyze {
                metadata,
                binary,
                json,
                with_header,
            } => {
                let format = if *json {
                    OutputFormat::Json
                } else {
                    self.args.format
                };
                self.run_analyze(metadata, binary, format, *with_header)
            }
            Commands::Lookup { metadata, input } => self.run_lookup(metadata, input.as_deref()),
        }
    }

    fn formatter(&self, format: OutputFormat) -> OutputFormatter {
        OutputFormatter::new(format, !self.args.no_color, self.args.verbose)
    }

    /// Run the analyze command; with no binaries this is batch lookup on stdin
    fn run_analyze(
        &self,
        metadata: &Path,
        binaries: &[PathBuf],
        format: OutputFormat,
        with_header: bool,
    ) -> Result<i32> {
        if binaries.is_empty() {
            return self.run_lookup(metadata, None);
        }

        let map = load_api_map(metadata)?;
        let config = AnalyzerConfig {
            with_header,
            ..AnalyzerConfig::default()
        };

        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        analyze_binaries(&map, config, binaries, &self.formatter(format), &mut stdout)
    }

    /// Run batch lookup over `input` or stdin
    fn run_lookup(&self, metadata: &Path, input: Option<&Path>) -> Result<i32> {
        let map = load_api_map(metadata)?;
        let api_sets = ApiSetTable::default();
        let classifier = Classifier::new(&map, &api_sets);

        let reader: Box<dyn BufRead> = match input {
            Some(path) => Box::new(BufReader::new(
                File::open(path)
                    .with_context(|| format!("Failed to open input '{}'", path.display()))?,
            )),
            None => Box::new(io::stdin().lock()),
        };

        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        let summary = run_batch(&classifier, reader, &mut stdout)?;
        info!(
            looked_up = summary.looked_up,
            skipped = summary.skipped,
            "batch lookup finished"
        );
        Ok(0)
    }
}

/// Analyze `binaries` in parallel and write every successful result.
///
/// Failures are reported on stderr without stopping the others; the exit code
/// is that of the first failing binary, or 0.
pub fn analyze_binaries<W: Write>(
    map: &ApiMap,
    config: AnalyzerConfig,
    binaries: &[PathBuf],
    formatter: &OutputFormatter,
    writer: &mut W,
) -> Result<i32> {
    let analyzer = Analyzer::new(map, config);

    let mut exit_code = 0;
    let mut results = Vec::with_capacity(binaries.len());
    for outcome in analyzer.analyze_many(binaries) {
        match outcome {
            Ok(result) => results.push(result),
            Err(err) => {
                eprintln!("Error: {:#}", err);
                if exit_code == 0 {
                    exit_code = exit_code_for(&err);
                }
            }
        }
    }

    formatter.write_analysis_results(writer, &results)?;
    writer.flush()?;
    Ok(exit_code)
}
