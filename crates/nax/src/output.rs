//! Output formatting: JSON, YAML, plain.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

use crate::cli::OutputFormat;

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a value found at `path`.
///
/// `plain` prints one `path=value` line per leaf, so it greps and cuts
/// cleanly; a scalar at the top is printed bare.
pub fn render_value(format: &OutputFormat, path: &str, value: &Value) -> String {
    match format {
        OutputFormat::Json => render_json_pretty(value),
        OutputFormat::JsonCompact => render_json_compact(value),
        OutputFormat::Yaml => render_yaml(value),
        OutputFormat::Plain => match value {
            Value::Object(map) if map.is_empty() => String::new(),
            Value::Object(_) => plain_lines(path, value).join("\n"),
            scalar => plain_scalar(scalar),
        },
    }
}

/// Render any serializable item through its JSON form.
pub fn render_single<T: Serialize>(format: &OutputFormat, data: &T) -> String {
    let value = serde_json::to_value(data).expect("serialization should not fail");
    render_value(format, "", &value)
}

/// Render one change event from `watch`.
pub fn render_change(format: &OutputFormat, path: &str, value: &Value) -> String {
    match format {
        OutputFormat::Plain => plain_lines(path, value).join("\n"),
        OutputFormat::Yaml => {
            render_yaml(&serde_json::json!([{ "path": path, "value": value }]))
        }
        // One event per line regardless of pretty/compact.
        OutputFormat::Json | OutputFormat::JsonCompact => {
            render_json_compact(&serde_json::json!({ "path": path, "value": value }))
        }
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_json_pretty<T: Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string_pretty(data).expect("serialization should not fail")
}

fn render_json_compact<T: Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string(data).expect("serialization should not fail")
}

fn render_yaml<T: Serialize + ?Sized>(data: &T) -> String {
    serde_yaml::to_string(data)
        .expect("serialization should not fail")
        .trim_end()
        .to_owned()
}

fn plain_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => render_json_compact(other),
    }
}

fn plain_lines(path: &str, value: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    collect_plain(path, value, &mut lines);
    lines
}

fn collect_plain(path: &str, value: &Value, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                collect_plain(&child_path, child, lines);
            }
        }
        leaf => lines.push(format!("{path}={}", plain_scalar(leaf))),
    }
}
