//! CLI output formatting module
//!
//! This module renders analysis results in the supported formats (pretty,
//! key=value text, single-line JSON, CSV).

use crate::analysis::AnalysisResult;
use crate::cli::args::OutputFormat;
use crate::cli::batch::csv_escape;
use anyhow::Result;
use colored::*;
use std::io::Write;

const CSV_HEADER: &str = "binary_path,bitness,architecture,import_count,delay_import_count,mapped_count,fallback_count,required_build,required_reason,signal";

/// Main output formatter that handles different formats
pub struct OutputFormatter {
    format: OutputFormat,
    use_color: bool,
    verbose: bool,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(format: OutputFormat, use_color: bool, verbose: bool) -> Self {
        Self {
            format,
            use_color,
            verbose,
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Format and write analysis results, one record per binary
    pub fn write_analysis_results<W: Write>(
        &self,
        writer: &mut W,
        results: &[AnalysisResult],
    ) -> Result<()> {
        if self.format == OutputFormat::Csv {
            writeln!(writer, "{}", CSV_HEADER)?;
        }

        for (i, result) in results.iter().enumerate() {
            match self.format {
                OutputFormat::Pretty => {
                    if i > 0 {
                        writeln!(writer)?;
                    }
                    self.write_pretty_output(writer, result)?;
                }
                OutputFormat::Text => {
                    if i > 0 {
                        writeln!(writer)?;
                    }
                    self.write_text_output(writer, result)?;
                }
                OutputFormat::Json => self.write_json_output(writer, result)?,
                OutputFormat::Csv => self.write_csv_row(writer, result)?,
            }
        }
        Ok(())
    }

    /// Write pretty-formatted output
    fn write_pretty_output<W: Write>(&self, writer: &mut W, result: &AnalysisResult) -> Result<()> {
        writeln!(
            writer,
            "{}",
            self.colorize("Minimum Windows Build", Color::Cyan)
        )?;
        writeln!(writer, "{}", "=".repeat(50))?;
        writeln!(writer, "Binary: {}", result.binary_path)?;
        writeln!(
            writer,
            "Architecture: {} ({}-bit)",
            result.architecture, result.bitness
        )?;
        writeln!(
            writer,
            "Imports: {} ({} delay-loaded)",
            result.import_count, result.delay_import_count
        )?;

        let mapped = format!("{}/{}", result.mapped_count, result.import_count);
        let mapped = if result.mapped_count < result.import_count {
            self.colorize(&mapped, Color::Yellow)
        } else {
            mapped
        };
        writeln!(writer, "Mapped: {}", mapped)?;
        if result.fallback_count > 0 {
            writeln!(
                writer,
                "  {} via api-set fallback",
                self.colorize(&result.fallback_count.to_string(), Color::Yellow)
            )?;
        }

        let build = if result.required_build == 0 {
            self.colorize("0 (no recorded minimum)", Color::Green)
        } else {
            self.colorize(&result.required_build.to_string(), Color::Red)
        };
        writeln!(writer, "Required build: {}", build)?;
        writeln!(writer, "Reason: {}", result.required_reason)?;

        if self.verbose {
            writeln!(
                writer,
                "Signal: {}",
                self.colorize(&result.signal.to_string(), Color::Blue)
            )?;
        }
        Ok(())
    }

    /// Write key=value lines
    fn write_text_output<W: Write>(&self, writer: &mut W, result: &AnalysisResult) -> Result<()> {
        writeln!(writer, "binary_path={}", result.binary_path)?;
        writeln!(writer, "bitness={}", result.bitness)?;
        writeln!(writer, "architecture={}", result.architecture)?;
        writeln!(writer, "import_count={}", result.import_count)?;
        writeln!(writer, "delay_import_count={}", result.delay_import_count)?;
        writeln!(writer, "mapped_count={}", result.mapped_count)?;
        writeln!(writer, "fallback_count={}", result.fallback_count)?;
        writeln!(writer, "required_build={}", result.required_build)?;
        writeln!(writer, "required_reason={}", result.required_reason)?;
        writeln!(writer, "signal={}", result.signal)?;
        Ok(())
    }

    /// Write a single-line JSON record
    fn write_json_output<W: Write>(&self, writer: &mut W, result: &AnalysisResult) -> Result<()> {
        writeln!(writer, "{}", serde_json::to_string(result)?)?;
        Ok(())
    }

    fn write_csv_row<W: Write>(&self, writer: &mut W, result: &AnalysisResult) -> Result<()> {
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{}",
            csv_escape(&result.binary_path),
            result.bitness,
            csv_escape(&result.architecture),
            result.import_count,
            result.delay_import_count,
            result.mapped_count,
            result.fallback_count,
            result.required_build,
            csv_escape(&result.required_reason),
            result.signal
        )?;
        Ok(())
    }

    /// Colorize text for terminal output
    pub fn colorize(&self, text: &str, color: Color) -> String {
        if self.use_color {
            match color {
                Color::Red => text.red().to_string(),
                Color::Green => text.green().to_string(),
                Color::Yellow => text.yellow().to_string(),
                Color::Blue => text.blue().to_string(),
                Color::Cyan => text.cyan().to_string(),
            }
        } else {
            text.to_string()
        }
    }
}

/// Color enumeration for output formatting
#[derive(Debug, Clone, Copy)]
pub enum Color {
    Red,
    Green,
    Yellow,
    Blue,
    Cyan,
}
