//! Pulling code and JSON out of free-form capability responses.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn fenced_block() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+\-]*)[ \t]*\r?\n(.*?)```")
            .expect("fence pattern compiles")
    })
}

/// All fenced blocks in order, as `(language, body)` with the language lowercased.
pub fn fenced_blocks(text: &str) -> Vec<(String, String)> {
    fenced_block()
        .captures_iter(text)
        .map(|captures| {
            (
                captures[1].to_ascii_lowercase(),
                captures[2].trim().to_string(),
            )
        })
        .collect()
}

/// Body of the first block tagged with one of `languages`, else of the first block.
pub fn extract_fenced(text: &str, languages: &[&str]) -> Option<String> {
    let blocks = fenced_blocks(text);
    blocks
        .iter()
        .find(|(language, _)| languages.contains(&language.as_str()))
        .or_else(|| blocks.first())
        .map(|(_, body)| body.clone())
}

/// Generated program text: a python block, any block, or the trimmed response.
pub fn extract_code_block(text: &str) -> String {
    extract_fenced(text, &["python", "py"]).unwrap_or_else(|| text.trim().to_string())
}

/// Generated query text. Without a fence, takes the lines from the first
/// `SELECT`/`WITH` line through the first line containing `;`.
pub fn extract_sql(text: &str) -> String {
    if let Some(block) = extract_fenced(text, &["sql"]) {
        return block;
    }

    let mut lines = Vec::new();
    for line in text.lines() {
        let lowered = line.trim().to_ascii_lowercase();
        if lines.is_empty() && !(lowered.starts_with("select") || lowered.starts_with("with")) {
            continue;
        }
        lines.push(line);
        if line.contains(';') {
            break;
        }
    }
    if lines.is_empty() {
        text.trim().to_string()
    } else {
        lines.join("\n").trim().to_string()
    }
}

/// Parses a JSON value from a response, tolerating fences and surrounding prose.
pub fn extract_json(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("response was empty".to_string());
    }
    if let Some(block) = extract_fenced(trimmed, &["json"]) {
        if let Ok(value) = serde_json::from_str(&block) {
            return Ok(value);
        }
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }
    Err(format!(
        "no json object found in response: {}",
        crate::shared::truncate_chars(trimmed, 120)
    ))
}
