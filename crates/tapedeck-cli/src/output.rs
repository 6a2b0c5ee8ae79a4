//! Output formatting for CLI

use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tapedeck_core::cache::CacheSpan;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

/// One row of `tapedeck cache list`
#[derive(Tabled)]
struct SpanRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Position")]
    position: u64,
    #[tabled(rename = "Length")]
    length: String,
    #[tabled(rename = "Cached at")]
    cached_at: String,
}

impl From<&CacheSpan> for SpanRow {
    fn from(span: &CacheSpan) -> Self {
        Self {
            key: span.id.key.clone(),
            position: span.id.position,
            length: human_bytes(span.length),
            cached_at: span.cached_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Render a value as pretty JSON
pub fn to_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

/// Render cached spans in the selected format
pub fn format_spans(spans: &[CacheSpan], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(&spans),
        OutputFormat::Table => {
            let rows: Vec<SpanRow> = spans.iter().map(SpanRow::from).collect();
            Table::new(rows).with(Style::rounded()).to_string()
        }
        OutputFormat::Text => spans
            .iter()
            .map(|span| format!("  {} {}", span.id, human_bytes(span.length)))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Format a byte count with a binary unit
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
