use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use crate::email::Email;
use crate::error::TaskError;
use crate::mail_api::{MailApi, SearchPage};
use super::LongTask;

/// Progress after one page of results has been decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchStep {
    pub current_batch: usize,
    /// Estimate, may change from one step to the next.
    pub total_batches: usize,
    pub emails_in_batch: usize,
}

/// Paginated retrieval of email metadata, one page per step.
///
/// The first page is requested by `start`, so a query without matches yields
/// a task that is exhausted from the beginning.
pub struct SearchTask {
    api: Arc<dyn MailApi>,
    query: String,
    page_size: u32,
    pending: Option<SearchPage>,
    next_page_token: Option<String>,
    current_batch: usize,
    total_batches: usize,
    results: Vec<Email>,
}

impl SearchTask {
    pub async fn start(api: Arc<dyn MailApi>, query: &str, page_size: u32) -> Result<Self, TaskError> {
        let page_size = page_size.max(1);
        info!("Searching for emails matching '{}'", query);

        let first = api.search(query, None, page_size).await?;
        let mut task = SearchTask {
            api,
            query: query.to_string(),
            page_size,
            pending: None,
            next_page_token: first.next_page_token.clone(),
            current_batch: 0,
            total_batches: 0,
            results: Vec::new(),
        };

        if first.items.is_empty() && first.next_page_token.is_none() {
            info!("No emails matched '{}'", query);
        } else {
            task.refine_estimate(first.estimated_total);
            task.pending = Some(first);
        }
        Ok(task)
    }

    pub fn current_batch(&self) -> usize {
        self.current_batch
    }

    pub fn results(&self) -> &[Email] {
        &self.results
    }

    pub fn into_results(self) -> Vec<Email> {
        self.results
    }

    fn refine_estimate(&mut self, estimated_total: u32) {
        let by_estimate = (estimated_total as usize).div_ceil(self.page_size as usize);
        let at_least = self.current_batch + usize::from(self.pending.is_some() || self.next_page_token.is_some());
        self.total_batches = by_estimate.max(at_least).max(1);
    }
}

#[async_trait]
impl LongTask for SearchTask {
    type Output = SearchStep;

    fn step_count(&self) -> usize {
        self.total_batches
    }

    fn has_more_steps(&self) -> bool {
        self.pending.is_some() || self.next_page_token.is_some()
    }

    async fn take_step(&mut self) -> Result<SearchStep, TaskError> {
        let page = match self.pending.take() {
            Some(page) => page,
            None => {
                let token = self.next_page_token.take().ok_or(TaskError::IllegalState)?;
                debug!("Requesting batch {} for '{}'", self.current_batch + 1, self.query);
                match self.api.search(&self.query, Some(&token), self.page_size).await {
                    Ok(page) => page,
                    Err(e) => {
                        // Keep the token so the state still reflects the unfinished search.
                        self.next_page_token = Some(token);
                        return Err(e.into());
                    }
                }
            }
        };

        let emails_in_batch = page.items.len();
        self.results.extend(page.items.into_iter().map(Email::from));
        self.current_batch += 1;
        self.next_page_token = page.next_page_token;

        if self.has_more_steps() {
            self.refine_estimate(page.estimated_total);
        } else {
            self.total_batches = self.current_batch;
        }

        debug!(
            "Batch {}/{} decoded: {} email(s), {} in total",
            self.current_batch, self.total_batches, emails_in_batch, self.results.len()
        );

        Ok(SearchStep {
            current_batch: self.current_batch,
            total_batches: self.total_batches,
            emails_in_batch,
        })
    }
}
