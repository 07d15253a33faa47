use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use crate::attachment_parser::AttachmentStore;
use crate::email::{Email, ProcessSettings};
use crate::error::TaskError;
use crate::mail_api::MailApi;
use super::LongTask;

/// Outcome of processing one email.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessEmailResult {
    /// Set when the remote identifier changed.
    pub new_id: Option<String>,
    pub attachment_names: BTreeSet<String>,
    pub backup_name: Option<String>,
    pub added_label_ids: Vec<String>,
    pub removed: bool,
}

/// Applies the configured action to a single email.
///
/// Always exactly one step, so the driver can treat it like any other
/// `LongTask`.
pub struct ProcessTask {
    api: Arc<dyn MailApi>,
    store: Arc<dyn AttachmentStore>,
    settings: Arc<ProcessSettings>,
    email: Email,
    done: bool,
}

impl ProcessTask {
    pub fn new(
        api: Arc<dyn MailApi>,
        store: Arc<dyn AttachmentStore>,
        settings: Arc<ProcessSettings>,
        email: &Email,
    ) -> Self {
        ProcessTask {
            api,
            store,
            settings,
            email: email.clone(),
            done: false,
        }
    }

    async fn label(&self, id: &str, label_id: &Option<String>, result: &mut ProcessEmailResult) -> Result<String, TaskError> {
        let Some(label_id) = label_id else {
            return Ok(id.to_string());
        };
        debug!(
            "Adding label '{}' to email {}",
            self.settings.label_name(label_id).unwrap_or(label_id.as_str()),
            id
        );
        let new_id = self.api.add_labels(id, std::slice::from_ref(label_id)).await?;
        result.added_label_ids.push(label_id.clone());
        Ok(new_id)
    }

    async fn remove(&self, id: &str, result: &mut ProcessEmailResult) -> Result<String, TaskError> {
        let option = &self.settings.process_option;
        if option.permanently_remove {
            self.api.delete(id).await?;
            result.removed = true;
            info!("🗑️  Email {} permanently deleted", id);
            // Labels cannot be applied to a deleted message.
            return Ok(id.to_string());
        }
        let trashed_id = self.api.trash(id).await?;
        result.removed = true;
        info!("🗑️  Email {} moved to trash", id);
        self.label(&trashed_id, &option.removed_label_id, result).await
    }

    async fn run(&self) -> Result<ProcessEmailResult, TaskError> {
        let option = &self.settings.process_option;
        let action = option.action;
        let mut result = ProcessEmailResult::default();
        let mut id = self.email.id().to_string();

        let needs_raw = action.downloads() || option.backup;
        let raw = if needs_raw { Some(self.api.fetch_raw(&id).await?) } else { None };

        if let (true, Some(raw)) = (action.downloads(), raw.as_deref()) {
            // Extraction must succeed before anything is removed.
            result.attachment_names = self.store.extract(&self.email, raw, &self.settings)?;
        }
        if let (true, true, Some(raw)) = (action.removes(), option.backup, raw.as_deref()) {
            result.backup_name = Some(self.store.backup(&self.email, raw, &self.settings)?);
        }

        if action.downloads() {
            id = self.label(&id, &option.downloaded_label_id, &mut result).await?;
        }
        if action.removes() {
            id = self.remove(&id, &mut result).await?;
        }

        if id != self.email.id() {
            result.new_id = Some(id);
        }
        Ok(result)
    }
}

#[async_trait]
impl LongTask for ProcessTask {
    type Output = ProcessEmailResult;

    fn step_count(&self) -> usize {
        1
    }

    fn has_more_steps(&self) -> bool {
        !self.done
    }

    async fn take_step(&mut self) -> Result<ProcessEmailResult, TaskError> {
        if self.done {
            return Err(TaskError::IllegalState);
        }
        self.done = true;
        debug!("Processing email {} ({})", self.email.id(), self.settings.action());
        self.run().await
    }
}
