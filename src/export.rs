use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::debug;

use crate::error::ChatError;

/// Write a completed answer as plain text, creating parent directories
pub fn export_text(path: &Path, text: &str) -> Result<PathBuf, ChatError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut contents = text.to_string();
    if !contents.ends_with('\n') {
        contents.push('\n');
    }
    fs::write(path, contents)?;

    debug!(path = %path.display(), bytes = text.len(), "answer exported");
    Ok(path.to_path_buf())
}

/// File name used when an export target is a directory
pub fn default_export_name(at: DateTime<Local>) -> String {
    format!("rassist-answer-{}.txt", at.format("%Y%m%d-%H%M%S"))
}

/// Resolve an export target: directories get a timestamped file name
pub fn resolve_export_path(target: &Path, at: DateTime<Local>) -> PathBuf {
    if target.is_dir() {
        target.join(default_export_name(at))
    } else {
        target.to_path_buf()
    }
}
