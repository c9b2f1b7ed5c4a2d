//! Small helpers shared across command handlers: JSON input parsing and
//! human-readable byte formatting.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Parses a metadata map from either an inline JSON object or an `@file.json`
/// reference, mirroring the `@file` convention used for instance specs.
pub fn parse_metadata(input: &str) -> Result<HashMap<String, String>> {
    let raw = if let Some(path) = input.strip_prefix('@') {
        fs::read_to_string(Path::new(path)).with_context(|| format!("reading {path}"))?
    } else {
        input.to_string()
    };
    serde_json::from_str(&raw).context("metadata must be a JSON object of string keys/values")
}

/// Formats a byte count as the nearest whole unit, e.g. `1536` -> `"1.5 KiB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
