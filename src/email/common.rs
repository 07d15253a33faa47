/// Common structures for emails under consideration
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// Metadata of one remote message, as returned by a search page.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMetadata {
    pub id: String,
    pub label_ids: Vec<String>,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub size_in_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailStatus {
    NotSelected,
    ToProcess,
    Processed,
    Failed,
}

/// One remote message and the local outcome of processing it.
#[derive(Debug, Clone)]
pub struct Email {
    id: String,
    pub label_ids: BTreeSet<String>,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub size_in_bytes: u64,
    status: EmailStatus,
    process_log: Option<String>,
    removed: bool,
}

impl Email {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> EmailStatus {
        self.status
    }

    pub fn process_log(&self) -> Option<&str> {
        self.process_log.as_deref()
    }

    /// True once the original message has been trashed or deleted remotely.
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn select(&mut self) {
        if self.status == EmailStatus::NotSelected {
            self.status = EmailStatus::ToProcess;
        }
    }

    pub fn deselect(&mut self) {
        if self.status == EmailStatus::ToProcess {
            self.status = EmailStatus::NotSelected;
        }
    }

    pub fn mark_processed(&mut self, new_id: Option<String>, added_labels: &[String], removed: bool) {
        if let Some(new_id) = new_id.filter(|id| !id.is_empty()) {
            self.id = new_id;
        }
        self.label_ids.extend(added_labels.iter().cloned());
        self.removed = removed;
        self.status = EmailStatus::Processed;
        self.process_log = None;
    }

    pub fn mark_failed(&mut self, log: impl Into<String>) {
        self.status = EmailStatus::Failed;
        self.process_log = Some(log.into());
    }
}

impl From<EmailMetadata> for Email {
    fn from(metadata: EmailMetadata) -> Self {
        Email {
            id: metadata.id,
            label_ids: metadata.label_ids.into_iter().collect(),
            from: metadata.from,
            to: metadata.to,
            subject: metadata.subject,
            timestamp: metadata.timestamp,
            size_in_bytes: metadata.size_in_bytes,
            status: EmailStatus::NotSelected,
            process_log: None,
            removed: false,
        }
    }
}

/// Result of processing a list of emails
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingResult {
    pub emails_processed: usize,
    pub emails_failed: usize,
}

impl ProcessingResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&mut self) {
        self.emails_processed += 1;
    }

    pub fn failure(&mut self) {
        self.emails_failed += 1;
    }
}
