//! Common utilities shared across programs

use crate::csv_writer::TIMESTAMP_FORMAT;
use crate::error::{DaqError, Result};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// One line typed at the label prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelInput {
    Label(String),
    /// `exit` ends the program
    Exit,
    /// Nothing typed; ask again
    Blank,
}

/// Interpret a prompt line; only its first whitespace-separated word counts
pub fn parse_label_input(line: &str) -> LabelInput {
    match line.split_whitespace().next() {
        Some("exit") => LabelInput::Exit,
        Some(word) => LabelInput::Label(word.to_string()),
        None => LabelInput::Blank,
    }
}

/// Check that a label can be used inside file and folder names
pub fn validate_label(label: &str) -> Result<()> {
    if label.is_empty() {
        return Err(DaqError::InvalidParameter("label must not be empty".into()));
    }
    if label
        .chars()
        .any(|c| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control())
    {
        return Err(DaqError::InvalidParameter(format!(
            "label {:?} contains characters not allowed in file names",
            label
        )));
    }
    if label == "." || label == ".." {
        return Err(DaqError::InvalidParameter(format!("label {:?} is reserved", label)));
    }
    Ok(())
}

/// Per-run folder: `{root}/{YYYYMMDDHHMMSS}_{label}`
pub fn session_dir<P: AsRef<Path>>(root: P, started: NaiveDateTime, label: &str) -> PathBuf {
    root.as_ref()
        .join(format!("{}_{}", started.format(TIMESTAMP_FORMAT), label))
}
