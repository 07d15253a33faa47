#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use unattach::attachment_parser::AttachmentStore;
use unattach::driver::ProcessProgress;
use unattach::email::{Action, Email, EmailMetadata, ProcessOption, ProcessSettings};
use unattach::error::{ExtractionError, RemoteApiError};
use unattach::mail_api::{MailApi, SearchPage};

pub fn metadata(id: &str, size_in_bytes: u64) -> EmailMetadata {
    EmailMetadata {
        id: id.to_string(),
        label_ids: vec!["INBOX".to_string()],
        from: "Alice <alice@example.com>".to_string(),
        to: "bob@example.com".to_string(),
        subject: format!("Report {}", id),
        timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap(),
        size_in_bytes,
    }
}

/// `count` emails `m1..=mN`, `size` bytes each, all selected.
pub fn selected_emails(count: usize, size: u64) -> Vec<Email> {
    (1..=count)
        .map(|i| {
            let mut email = Email::from(metadata(&format!("m{}", i), size * i as u64));
            email.select();
            email
        })
        .collect()
}

pub fn settings(action: Action) -> ProcessSettings {
    ProcessSettings {
        process_option: ProcessOption {
            action,
            process_embedded: true,
            backup: false,
            permanently_remove: false,
            downloaded_label_id: Some("Label_dl".to_string()),
            removed_label_id: Some("Label_rm".to_string()),
        },
        target_directory: PathBuf::from("unused"),
        filename_schema: unattach::filename::DEFAULT_SCHEMA.to_string(),
        add_metadata: false,
        id_to_label: BTreeMap::from([
            ("Label_dl".to_string(), "unattach/downloaded".to_string()),
            ("Label_rm".to_string(), "unattach/removed".to_string()),
        ]),
    }
}

/// In-memory mail account. Pages are addressed by `page-<index>` tokens.
#[derive(Default)]
pub struct FakeMailApi {
    pages: Vec<SearchPage>,
    pub failing_fetch_ids: HashSet<String>,
    pub failing_search_page: Option<usize>,
    /// Cancel this token during the Nth `fetch_raw` call (1-based).
    pub cancel_on_fetch: Option<(usize, CancellationToken)>,
    /// Cancel this token during the Nth `search` call (1-based).
    pub cancel_on_search: Option<(usize, CancellationToken)>,
    /// Each trash call takes this long.
    pub trash_delay: Option<Duration>,
    pub queries: Mutex<Vec<String>>,
    pub labels: Mutex<BTreeMap<String, String>>,
    pub search_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub trash_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub created_labels: Mutex<Vec<String>>,
    pub labeled: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeMailApi {
    /// Split `items` into pages of `page_size`, each reporting `estimated_total`.
    pub fn with_pages(items: Vec<EmailMetadata>, page_size: usize, estimated_total: u32) -> Self {
        let chunks: Vec<Vec<EmailMetadata>> = items.chunks(page_size.max(1)).map(<[_]>::to_vec).collect();
        let count = chunks.len();
        let pages = chunks
            .into_iter()
            .enumerate()
            .map(|(index, items)| SearchPage {
                items,
                next_page_token: (index + 1 < count).then(|| format!("page-{}", index + 1)),
                estimated_total,
            })
            .collect();
        FakeMailApi {
            pages,
            ..FakeMailApi::default()
        }
    }

    pub fn searches(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn trashes(&self) -> usize {
        self.trash_calls.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn searched_queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn label_calls(&self) -> Vec<(String, Vec<String>)> {
        self.labeled.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailApi for FakeMailApi {
    async fn search(
        &self,
        query: &str,
        page_token: Option<&str>,
        _page_size: u32,
    ) -> Result<SearchPage, RemoteApiError> {
        let call = self.search_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.queries.lock().unwrap().push(query.to_string());
        if let Some((nth, token)) = &self.cancel_on_search {
            if *nth == call {
                token.cancel();
            }
        }
        let index = match page_token {
            None => 0,
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|index| index.parse().ok())
                .ok_or_else(|| RemoteApiError::with_code(400, format!("bad page token {}", token)))?,
        };
        if self.failing_search_page == Some(index) {
            return Err(RemoteApiError::with_code(503, "backend unavailable"));
        }
        Ok(self.pages.get(index).cloned().unwrap_or_default())
    }

    async fn fetch_raw(&self, id: &str) -> Result<Vec<u8>, RemoteApiError> {
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((nth, token)) = &self.cancel_on_fetch {
            if *nth == call {
                token.cancel();
            }
        }
        if self.failing_fetch_ids.contains(id) {
            return Err(RemoteApiError::new(format!("fetch failed for {}", id)));
        }
        Ok(format!("Subject: {}\r\n\r\nbody", id).into_bytes())
    }

    async fn add_labels(&self, id: &str, label_ids: &[String]) -> Result<String, RemoteApiError> {
        self.labeled.lock().unwrap().push((id.to_string(), label_ids.to_vec()));
        Ok(id.to_string())
    }

    async fn trash(&self, id: &str) -> Result<String, RemoteApiError> {
        if let Some(delay) = self.trash_delay {
            tokio::time::sleep(delay).await;
        }
        self.trash_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}-trashed", id))
    }

    async fn delete(&self, _id: &str) -> Result<(), RemoteApiError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_labels(&self) -> Result<BTreeMap<String, String>, RemoteApiError> {
        Ok(self.labels.lock().unwrap().clone())
    }

    async fn create_label(&self, name: &str) -> Result<String, RemoteApiError> {
        let mut created = self.created_labels.lock().unwrap();
        created.push(name.to_string());
        let id = format!("Label_{}", created.len());
        self.labels.lock().unwrap().insert(id.clone(), name.to_string());
        Ok(id)
    }
}

/// Attachment store that writes nothing and can be told to fail.
#[derive(Default)]
pub struct FakeStore {
    pub fail_extraction: AtomicBool,
    pub extract_calls: AtomicUsize,
    pub backup_calls: AtomicUsize,
    /// Progress seen at the start of each extraction.
    pub observer: Option<watch::Receiver<ProcessProgress>>,
    pub observed: Mutex<Vec<ProcessProgress>>,
}

impl FakeStore {
    pub fn failing() -> Self {
        FakeStore {
            fail_extraction: AtomicBool::new(true),
            ..FakeStore::default()
        }
    }

    pub fn observing(progress: watch::Receiver<ProcessProgress>) -> Self {
        FakeStore {
            observer: Some(progress),
            ..FakeStore::default()
        }
    }

    pub fn extractions(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }
}

impl AttachmentStore for FakeStore {
    fn extract(
        &self,
        email: &Email,
        _raw: &[u8],
        _settings: &ProcessSettings,
    ) -> Result<BTreeSet<String>, ExtractionError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(observer) = &self.observer {
            self.observed.lock().unwrap().push(*observer.borrow());
        }
        if self.fail_extraction.load(Ordering::SeqCst) {
            return Err(ExtractionError::Unparseable(email.id().to_string()));
        }
        Ok(BTreeSet::from([format!("{}.pdf", email.id())]))
    }

    fn backup(&self, email: &Email, _raw: &[u8], _settings: &ProcessSettings) -> Result<String, ExtractionError> {
        self.backup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}.eml", email.id()))
    }
}
