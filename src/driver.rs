use std::sync::Arc;

use log::{error, info};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::attachment_parser::AttachmentStore;
use crate::email::{Email, EmailStatus, ProcessSettings, ProcessingResult};
use crate::error::TaskError;
use crate::mail_api::MailApi;
use crate::task::{LongTask, ProcessTask, SearchTask};

const BYTES_IN_MEGABYTE: u64 = 1024 * 1024;

/// Latest state of a search run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchProgress {
    pub current_batch: usize,
    pub total_batches: usize,
}

impl SearchProgress {
    pub fn status(&self) -> String {
        if self.total_batches == 0 {
            "no emails matched the query".to_string()
        } else {
            format!(
                "completed {} of {} batches, {}%",
                self.current_batch,
                self.total_batches,
                100 * self.current_batch.min(self.total_batches) / self.total_batches
            )
        }
    }
}

/// Latest state of a processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessProgress {
    pub emails_done: usize,
    pub emails_total: usize,
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub failed: usize,
}

impl ProcessProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.bytes_processed as f64 / self.total_bytes as f64
        }
    }

    pub fn status(&self) -> String {
        let percent = if self.total_bytes == 0 {
            0
        } else {
            100 * self.bytes_processed / self.total_bytes
        };
        format!(
            "processed {} of {}, {}MB / {}MB, {}% by size, {} failed",
            self.emails_done,
            self.emails_total,
            self.bytes_processed / BYTES_IN_MEGABYTE,
            self.total_bytes / BYTES_IN_MEGABYTE,
            percent,
            self.failed
        )
    }
}

/// Drive a search to exhaustion or cancellation and return the emails found
/// so far. A failed page aborts the search.
pub async fn run_search(
    mut task: SearchTask,
    cancel: &CancellationToken,
    progress: &watch::Sender<SearchProgress>,
) -> Result<Vec<Email>, TaskError> {
    let mut snapshot = SearchProgress {
        current_batch: 0,
        total_batches: task.step_count(),
    };
    progress.send_replace(snapshot);
    info!("Getting info about emails ({})...", snapshot.status());

    while !cancel.is_cancelled() && task.has_more_steps() {
        let step = task.take_step().await?;
        snapshot = SearchProgress {
            current_batch: step.current_batch,
            total_batches: step.total_batches,
        };
        progress.send_replace(snapshot);
        info!("Getting info about emails ({})...", snapshot.status());
    }

    if cancel.is_cancelled() {
        info!("Search stopped ({})", snapshot.status());
    } else {
        info!("Finished getting info about emails ({})", snapshot.status());
    }
    Ok(task.into_results())
}

/// Runs one `ProcessTask` per selected email, strictly one after another.
pub struct ProcessDriver {
    api: Arc<dyn MailApi>,
    store: Arc<dyn AttachmentStore>,
    settings: Arc<ProcessSettings>,
}

impl ProcessDriver {
    pub fn new(api: Arc<dyn MailApi>, store: Arc<dyn AttachmentStore>, settings: ProcessSettings) -> Self {
        ProcessDriver {
            api,
            store,
            settings: Arc::new(settings),
        }
    }

    /// Process every email in `TO_PROCESS` state.
    ///
    /// Cancellation is checked before each email; the email in flight always
    /// completes. A failing email is marked `FAILED` with its error and the
    /// loop moves on.
    pub async fn run(
        &self,
        emails: &mut [Email],
        cancel: &CancellationToken,
        progress: &watch::Sender<ProcessProgress>,
    ) -> ProcessingResult {
        let selected: Vec<usize> = emails
            .iter()
            .enumerate()
            .filter(|(_, email)| email.status() == EmailStatus::ToProcess)
            .map(|(index, _)| index)
            .collect();

        let mut snapshot = ProcessProgress {
            emails_total: selected.len(),
            total_bytes: selected.iter().map(|&i| emails[i].size_in_bytes).sum(),
            ..ProcessProgress::default()
        };
        progress.send_replace(snapshot);
        info!(
            "Processing {} emails with action '{}' and filename schema '{}'...",
            selected.len(),
            self.settings.action(),
            self.settings.filename_schema
        );

        let mut result = ProcessingResult::new();
        for index in selected {
            if cancel.is_cancelled() {
                break;
            }
            let email = &mut emails[index];
            info!("Processing email with subject '{}' ({})...", email.subject, snapshot.status());

            let mut task = ProcessTask::new(self.api.clone(), self.store.clone(), self.settings.clone(), email);
            match task.take_step().await {
                Ok(outcome) => {
                    if let Some(backup) = &outcome.backup_name {
                        info!("💾 Original of '{}' saved as {}", email.subject, backup);
                    }
                    email.mark_processed(outcome.new_id, &outcome.added_label_ids, outcome.removed);
                    snapshot.bytes_processed += email.size_in_bytes;
                    result.success();
                }
                Err(e) => {
                    error!("❌ Error processing email {}: {}", email.id(), e);
                    email.mark_failed(e.to_string());
                    snapshot.failed += 1;
                    result.failure();
                }
            }
            snapshot.emails_done += 1;
            progress.send_replace(snapshot);
        }

        if cancel.is_cancelled() {
            info!("Processing stopped ({})", snapshot.status());
        } else {
            info!("Processing completed ({})", snapshot.status());
        }
        result
    }
}
