use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::email::EmailMetadata;
use crate::error::RemoteApiError;

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<EmailMetadata>,
    pub next_page_token: Option<String>,
    /// Approximate number of matches for the whole query, as reported by the server.
    pub estimated_total: u32,
}

/// Remote mail account operations used by the search and process tasks.
///
/// Modifying calls return the identifier of the message after the change,
/// which the server may have replaced.
#[async_trait]
pub trait MailApi: Send + Sync {
    async fn search(
        &self,
        query: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<SearchPage, RemoteApiError>;

    /// Full RFC 822 content of a message.
    async fn fetch_raw(&self, id: &str) -> Result<Vec<u8>, RemoteApiError>;

    async fn add_labels(&self, id: &str, label_ids: &[String]) -> Result<String, RemoteApiError>;

    /// Move a message to the trash (recoverable).
    async fn trash(&self, id: &str) -> Result<String, RemoteApiError>;

    /// Delete a message permanently.
    async fn delete(&self, id: &str) -> Result<(), RemoteApiError>;

    /// Label id → label name for the whole account.
    async fn list_labels(&self) -> Result<BTreeMap<String, String>, RemoteApiError>;

    async fn create_label(&self, name: &str) -> Result<String, RemoteApiError>;
}
