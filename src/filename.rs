use std::path::{Path, PathBuf};

use chrono::{Datelike, Timelike};
use regex::{Captures, Regex};

use crate::email::Email;

pub const DEFAULT_SCHEMA: &str = "${YYYY}-${MM}-${DD}_${ATTACHMENT_NAME}";

const MAX_SUBJECT_CHARS: usize = 50;

/// Builds attachment filenames from a schema such as
/// `${YYYY}-${MM}-${DD}_${SUBJECT}_${ATTACHMENT_NAME}`.
///
/// Unknown placeholders are kept verbatim.
pub struct FilenameFactory {
    schema: String,
    placeholder: Regex,
    forbidden: Regex,
}

impl FilenameFactory {
    pub fn new(schema: &str) -> Self {
        let schema = if schema.trim().is_empty() { DEFAULT_SCHEMA } else { schema };
        FilenameFactory {
            schema: schema.to_string(),
            placeholder: Regex::new(r"\$\{([A-Za-z_]+)\}").expect("placeholder pattern is valid"),
            forbidden: Regex::new(r#"[\\/:*?"<>|\x00-\x1f]"#).expect("forbidden pattern is valid"),
        }
    }

    pub fn render(&self, email: &Email, attachment_name: &str) -> String {
        let timestamp = email.timestamp;
        let rendered = self.placeholder.replace_all(&self.schema, |caps: &Captures| {
            match &caps[1] {
                "YYYY" => format!("{:04}", timestamp.year()),
                "MM" => format!("{:02}", timestamp.month()),
                "DD" => format!("{:02}", timestamp.day()),
                "HH" => format!("{:02}", timestamp.hour()),
                "mm" => format!("{:02}", timestamp.minute()),
                "ID" => email.id().to_string(),
                "FROM" => email.from.clone(),
                "SUBJECT" => email.subject.chars().take(MAX_SUBJECT_CHARS).collect(),
                "ATTACHMENT_NAME" => attachment_name.to_string(),
                _ => caps[0].to_string(),
            }
        });
        let sanitized = self.forbidden.replace_all(rendered.trim(), "_").to_string();
        if sanitized.is_empty() {
            "attachment".to_string()
        } else {
            sanitized
        }
    }
}

/// First path in `directory` named `filename` that does not exist yet,
/// appending ` (n)` before the extension when needed.
pub fn unique_path(directory: &Path, filename: &str) -> PathBuf {
    let candidate = directory.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
        _ => (filename, String::new()),
    };
    (1..)
        .map(|n| directory.join(format!("{} ({}){}", stem, n, extension)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}
