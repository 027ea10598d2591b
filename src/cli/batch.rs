//! Batch lookup mode: `module,symbol` lines in, CSV verdicts out

use anyhow::Result;
use std::borrow::Cow;
use std::io::{BufRead, Write};
use tracing::warn;

use crate::analysis::Classifier;

pub const BATCH_HEADER: &str = "module,symbol,minBuild,reason";

/// Counts for one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub looked_up: usize,
    pub skipped: usize,
}

/// Quote a CSV field when it contains a separator, quote or line break.
pub fn csv_escape(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Split one CSV line into fields. `None` on an unterminated quote.
pub fn split_csv_line(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match (quoted, c) {
            (true, '"') if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            (true, '"') => quoted = false,
            (false, '"') if field.trim().is_empty() => {
                field.clear();
                quoted = true;
            }
            (false, ',') => fields.push(std::mem::take(&mut field)),
            (_, c) => field.push(c),
        }
    }

    if quoted {
        return None;
    }
    fields.push(field);
    Some(fields)
}

/// One input line, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchLine {
    /// Blank line or `#` comment
    Skip,
    Malformed,
    Query { module: String, symbol: String },
}

pub fn parse_line(line: &str) -> BatchLine {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return BatchLine::Skip;
    }

    match split_csv_line(trimmed).as_deref() {
        Some([module, symbol]) if !module.trim().is_empty() && !symbol.trim().is_empty() => {
            BatchLine::Query {
                module: module.trim().to_string(),
                symbol: symbol.trim().to_string(),
            }
        }
        _ => BatchLine::Malformed,
    }
}

/// Look up every `module,symbol` line of `reader` and write one CSV row each,
/// after a header line. Malformed or non-UTF-8 lines are skipped with a
/// warning.
pub fn run_batch<R: BufRead, W: Write>(
    classifier: &Classifier<'_>,
    reader: R,
    writer: &mut W,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary::default();
    writeln!(writer, "{}", BATCH_HEADER)?;

    for (index, raw) in reader.split(b'\n').enumerate() {
        let raw = raw?;
        let line = match String::from_utf8(raw) {
            Ok(line) => line,
            Err(err) => {
                warn!(line = index + 1, error = %err.utf8_error(), "skipping non-UTF-8 lookup line");
                summary.skipped += 1;
                continue;
            }
        };
        let (module, symbol) = match parse_line(&line) {
            BatchLine::Skip => continue,
            BatchLine::Malformed => {
                warn!(line = index + 1, content = %line, "skipping malformed lookup line");
                summary.skipped += 1;
                continue;
            }
            BatchLine::Query { module, symbol } => (module, symbol),
        };

        let resolution = classifier.resolve(&module, &symbol);
        writeln!(
            writer,
            "{},{},{},{}",
            csv_escape(&module),
            csv_escape(&symbol),
            resolution.build(),
            csv_escape(&resolution.reason(&module, &symbol))
        )?;
        summary.looked_up += 1;
    }

    writer.flush()?;
    Ok(summary)
}
