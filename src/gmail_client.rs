use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use google_gmail1::api::{Label, Message, ModifyMessageRequest};
use google_gmail1::Gmail;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::config::GmailConfig;
use crate::email::EmailMetadata;
use crate::error::RemoteApiError;
use crate::mail_api::{MailApi, SearchPage};
use crate::oauth::{LoopbackFlowDelegate, LoopbackReceiver};

const USER_ID: &str = "me";
const GMAIL_MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
/// Needed by `messages.delete`; also covers everything the modify scope allows.
const FULL_MAIL_SCOPE: &str = "https://mail.google.com/";
/// Concurrent metadata requests while decoding one search page.
const METADATA_CONCURRENCY: usize = 8;

type Connector = HttpsConnector<HttpConnector>;

pub struct GmailClient {
    hub: Gmail<Connector>,
    scope: &'static str,
}

/// The single scope every call uses, so one consent at sign-in covers the whole run.
pub fn scope_for(permanently_remove: bool) -> &'static str {
    if permanently_remove {
        FULL_MAIL_SCOPE
    } else {
        GMAIL_MODIFY_SCOPE
    }
}

fn remote_error(operation: &str, error: google_gmail1::Error) -> RemoteApiError {
    let code = match &error {
        google_gmail1::Error::Failure(response) => Some(response.status().as_u16()),
        google_gmail1::Error::BadRequest(body) => body
            .pointer("/error/code")
            .and_then(serde_json::Value::as_u64)
            .and_then(|code| u16::try_from(code).ok()),
        _ => None,
    };
    let message = format!("{}: {}", operation, error);
    match code {
        Some(code) => RemoteApiError::with_code(code, message),
        None => RemoteApiError::new(message),
    }
}

impl GmailClient {
    /// Connect to Gmail, signing in through the browser when no cached token
    /// is usable. Permanent removal needs the full mail scope, which is then
    /// requested up front.
    pub async fn new(config: &GmailConfig, permanently_remove: bool) -> Result<Self> {
        info!("Connecting to Gmail API via OAuth2");
        let scope = scope_for(permanently_remove);

        let secret = yup_oauth2::read_application_secret(&config.credentials_path)
            .await
            .context("Unable to read OAuth2 client credentials file")?;

        let receiver = Arc::new(Mutex::new(LoopbackReceiver::new(
            config.oauth_host.clone(),
            config.oauth_port,
        )));
        let delegate = LoopbackFlowDelegate::start(receiver.clone())
            .await
            .context("Unable to start the OAuth loopback receiver")?;

        let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
            secret,
            yup_oauth2::InstalledFlowReturnMethod::Interactive,
        )
        .persist_tokens_to_disk(&config.token_cache_path)
        .flow_delegate(Box::new(delegate))
        .build()
        .await
        .context("Unable to create OAuth2 authenticator");

        // Forces the sign-in now; the receiver is stopped whatever the outcome.
        let signed_in = match &auth {
            Ok(auth) => auth
                .token(&[scope])
                .await
                .map(|_| ())
                .context("Gmail sign-in failed"),
            Err(_) => Ok(()),
        };
        if let Err(e) = receiver.lock().await.stop().await {
            warn!("Unable to stop the OAuth loopback receiver: {}", e);
        }
        let auth = auth?;
        signed_in?;

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .build();

        let client = hyper::Client::builder().build(connector);
        let hub = Gmail::new(client, auth);

        info!("✅ Gmail API connection established successfully (scope {})", scope);

        Ok(GmailClient { hub, scope })
    }

    pub async fn email_address(&self) -> Result<String> {
        let (_, profile) = self
            .hub
            .users()
            .get_profile(USER_ID)
            .add_scope(self.scope)
            .doit()
            .await
            .context("Unable to retrieve the Gmail profile")?;
        profile.email_address.context("Gmail profile has no email address")
    }

    async fn fetch_metadata(&self, message_id: &str) -> Result<EmailMetadata, RemoteApiError> {
        debug!("Retrieving email metadata for ID: {}", message_id);

        let (_, message) = self
            .hub
            .users()
            .messages_get(USER_ID, message_id)
            .format("metadata")
            .add_metadata_headers("From")
            .add_metadata_headers("To")
            .add_metadata_headers("Subject")
            .add_scope(self.scope)
            .doit()
            .await
            .map_err(|e| remote_error("messages.get", e))?;

        Ok(metadata_from_message(message_id, message))
    }
}

fn metadata_from_message(message_id: &str, message: Message) -> EmailMetadata {
    let mut from = String::from("Unknown sender");
    let mut to = String::new();
    let mut subject = String::from("No subject");

    if let Some(payload) = message.payload {
        for header in payload.headers.unwrap_or_default() {
            if let (Some(name), Some(value)) = (header.name, header.value) {
                match name.as_str() {
                    "From" => from = value,
                    "To" => to = value,
                    "Subject" => subject = value,
                    _ => {}
                }
            }
        }
    }

    let timestamp = message
        .internal_date
        .and_then(chrono::DateTime::from_timestamp_millis)
        .unwrap_or_else(|| {
            warn!("No date for email {}, using current date", message_id);
            chrono::Utc::now()
        });

    EmailMetadata {
        id: message.id.unwrap_or_else(|| message_id.to_string()),
        label_ids: message.label_ids.unwrap_or_default(),
        from,
        to,
        subject,
        timestamp,
        size_in_bytes: message.size_estimate.unwrap_or(0).max(0) as u64,
    }
}

#[async_trait]
impl MailApi for GmailClient {
    async fn search(
        &self,
        query: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<SearchPage, RemoteApiError> {
        debug!("Search criteria: {} (page token: {:?})", query, page_token);

        let mut call = self
            .hub
            .users()
            .messages_list(USER_ID)
            .q(query)
            .max_results(page_size)
            .add_scope(self.scope);
        if let Some(token) = page_token {
            call = call.page_token(token);
        }
        let (_, list) = call.doit().await.map_err(|e| remote_error("messages.list", e))?;

        let ids: Vec<String> = list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|msg| msg.id)
            .collect();

        let fetches: Vec<_> = ids.iter().map(|id| self.fetch_metadata(id)).collect();
        let items: Vec<EmailMetadata> = stream::iter(fetches)
            .buffered(METADATA_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(SearchPage {
            items,
            next_page_token: list.next_page_token.filter(|token| !token.is_empty()),
            estimated_total: list.result_size_estimate.unwrap_or(0),
        })
    }

    async fn fetch_raw(&self, id: &str) -> Result<Vec<u8>, RemoteApiError> {
        debug!("Complete email retrieval for ID: {}", id);

        let (_, message) = self
            .hub
            .users()
            .messages_get(USER_ID, id)
            .format("raw")
            .add_scope(self.scope)
            .doit()
            .await
            .map_err(|e| remote_error("messages.get", e))?;

        // Already decoded by the API client (RFC 822 bytes).
        let raw = message
            .raw
            .ok_or_else(|| RemoteApiError::new(format!("no raw content in email {}", id)))?;
        debug!("Email retrieved, size: {} bytes", raw.len());
        Ok(raw)
    }

    async fn add_labels(&self, id: &str, label_ids: &[String]) -> Result<String, RemoteApiError> {
        let request = ModifyMessageRequest {
            add_label_ids: Some(label_ids.to_vec()),
            ..ModifyMessageRequest::default()
        };
        let (_, message) = self
            .hub
            .users()
            .messages_modify(request, USER_ID, id)
            .add_scope(self.scope)
            .doit()
            .await
            .map_err(|e| remote_error("messages.modify", e))?;
        Ok(message.id.unwrap_or_else(|| id.to_string()))
    }

    async fn trash(&self, id: &str) -> Result<String, RemoteApiError> {
        let (_, message) = self
            .hub
            .users()
            .messages_trash(USER_ID, id)
            .add_scope(self.scope)
            .doit()
            .await
            .map_err(|e| remote_error("messages.trash", e))?;
        Ok(message.id.unwrap_or_else(|| id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteApiError> {
        // Asking for another scope mid-run would start a new browser consent.
        if self.scope != FULL_MAIL_SCOPE {
            return Err(RemoteApiError::new(format!(
                "cannot delete {}: permanent removal was not enabled at sign-in",
                id
            )));
        }
        self.hub
            .users()
            .messages_delete(USER_ID, id)
            .add_scope(self.scope)
            .doit()
            .await
            .map_err(|e| remote_error("messages.delete", e))?;
        Ok(())
    }

    async fn list_labels(&self) -> Result<BTreeMap<String, String>, RemoteApiError> {
        info!("Retrieving Gmail labels list");

        let (_, result) = self
            .hub
            .users()
            .labels_list(USER_ID)
            .add_scope(self.scope)
            .doit()
            .await
            .map_err(|e| remote_error("labels.list", e))?;

        Ok(result
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|label| Some((label.id?, label.name?)))
            .collect())
    }

    async fn create_label(&self, name: &str) -> Result<String, RemoteApiError> {
        let label = Label {
            name: Some(name.to_string()),
            label_list_visibility: Some("labelShow".to_string()),
            message_list_visibility: Some("show".to_string()),
            ..Label::default()
        };
        let (_, created) = self
            .hub
            .users()
            .labels_create(label, USER_ID)
            .add_scope(self.scope)
            .doit()
            .await
            .map_err(|e| remote_error("labels.create", e))?;
        created
            .id
            .ok_or_else(|| RemoteApiError::new(format!("label {} was created without an id", name)))
    }
}
