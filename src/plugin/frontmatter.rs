//! Front-matter block at the top of a tool's source.
//!
//! ```text
//! """
//! title: Calculator
//! version: 0.1.0
//! """
//! { ...module body... }
//! ```

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use super::LoadError;

const DELIMITER: &str = "\"\"\"";

fn key_value_pattern() -> Result<&'static Regex, LoadError> {
    static PATTERN: OnceLock<Result<Regex, String>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^\s*([a-z_]+):\s*(.*?)\s*$").map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| LoadError::Frontmatter(e.clone()))
}

/// Splits `content` into its front-matter (lower-cased keys) and the module body.
///
/// Content that does not open with `"""` has no front-matter and is returned whole.
pub fn extract_frontmatter(content: &str) -> Result<(Map<String, Value>, &str), LoadError> {
    let mut frontmatter = Map::new();

    let trimmed = content.trim_start();
    if !trimmed.starts_with(DELIMITER) {
        return Ok((frontmatter, content));
    }

    let after_open = &trimmed[DELIMITER.len()..];
    let close = after_open
        .find(DELIMITER)
        .ok_or_else(|| LoadError::Frontmatter("front-matter block is not closed".to_string()))?;

    let pattern = key_value_pattern()?;
    for line in after_open[..close].lines() {
        if let Some(caps) = pattern.captures(line) {
            frontmatter.insert(caps[1].to_lowercase(), Value::String(caps[2].to_string()));
        }
    }

    let body = &after_open[close + DELIMITER.len()..];
    Ok((frontmatter, body))
}
