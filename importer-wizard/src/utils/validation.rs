// Input validation utilities

use crate::error::{ImporterError, Result};
use url::Url;

pub const MIN_BATCH_SIZE: u32 = 1;
pub const MAX_BATCH_SIZE: u32 = 10_000;

/// Spreadsheet formats the backend can parse.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["csv", "xlsx", "xls"];

/// Require a non-blank value; `label` names the field in the message.
pub fn require(value: &str, label: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ImporterError::validation(format!("{} is required", label)));
    }
    Ok(())
}

/// Site URL must parse and use http or https.
pub fn validate_site_url(raw: &str) -> Result<Url> {
    let s = raw.trim();
    require(s, "Frappe URL")?;
    let url = Url::parse(s)
        .map_err(|_| ImporterError::validation(format!("Invalid URL: {}", s)))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(ImporterError::validation(
            "URL must start with http:// or https://",
        )),
    }
}

pub fn validate_batch_size(batch_size: u32) -> Result<()> {
    if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&batch_size) {
        return Err(ImporterError::validation(format!(
            "Batch size must be between {} and {}",
            MIN_BATCH_SIZE, MAX_BATCH_SIZE
        )));
    }
    Ok(())
}

/// Case-insensitive extension check.
pub fn has_supported_extension(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

/// Make a doctype safe to use as a file name stem (`Sales Invoice` -> `Sales_Invoice`).
pub fn sanitize_file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "template".to_string()
    } else {
        stem
    }
}
