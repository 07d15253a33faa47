use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use mail_parser::{Message, MessageParser, MimeHeaders, PartType};
use serde::Serialize;

use crate::email::{Email, ProcessSettings};
use crate::error::ExtractionError;
use crate::filename::{unique_path, FilenameFactory};

/// Stores the attachments of a downloaded message.
pub trait AttachmentStore: Send + Sync {
    /// Write every attachment of `raw` under the target directory and return
    /// the names of the files written.
    fn extract(
        &self,
        email: &Email,
        raw: &[u8],
        settings: &ProcessSettings,
    ) -> Result<BTreeSet<String>, ExtractionError>;

    /// Keep a copy of the original message before it is removed.
    fn backup(&self, email: &Email, raw: &[u8], settings: &ProcessSettings) -> Result<String, ExtractionError>;
}

#[derive(Serialize)]
struct AttachmentMetadata<'a> {
    email_id: &'a str,
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    date: String,
    attachment: &'a str,
}

/// `AttachmentStore` writing plain files to the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileAttachmentStore;

impl FileAttachmentStore {
    pub fn new() -> Self {
        FileAttachmentStore
    }

    fn collect(
        &self,
        message: &Message,
        email: &Email,
        settings: &ProcessSettings,
        factory: &FilenameFactory,
        written: &mut BTreeSet<String>,
    ) -> Result<(), ExtractionError> {
        for (index, part) in message.attachments().enumerate() {
            if let PartType::Message(nested) = &part.body {
                if settings.process_option.process_embedded {
                    debug!("Descending into embedded message {}", index);
                    self.collect(nested, email, settings, factory, written)?;
                    continue;
                }
            }

            let original_name = match part.attachment_name() {
                Some(name) if !name.trim().is_empty() => name.to_string(),
                _ if matches!(part.body, PartType::Message(_)) => format!("message-{}.eml", index + 1),
                _ => format!("attachment-{}", index + 1),
            };
            let filename = factory.render(email, &original_name);
            let path = unique_path(&settings.target_directory, &filename);
            write_file(&path, part.contents())?;
            debug!("Attachment written: {} ({} bytes)", path.display(), part.contents().len());

            if settings.add_metadata {
                write_metadata(&path, email, &original_name)?;
            }
            if let Some(name) = path.file_name() {
                written.insert(name.to_string_lossy().into_owned());
            }
        }
        Ok(())
    }
}

impl AttachmentStore for FileAttachmentStore {
    fn extract(
        &self,
        email: &Email,
        raw: &[u8],
        settings: &ProcessSettings,
    ) -> Result<BTreeSet<String>, ExtractionError> {
        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| ExtractionError::Unparseable(email.id().to_string()))?;

        create_dir(&settings.target_directory)?;
        let factory = FilenameFactory::new(&settings.filename_schema);
        let mut written = BTreeSet::new();
        self.collect(&message, email, settings, &factory, &mut written)?;

        info!("📎 {} attachment(s) saved from email {}", written.len(), email.id());
        Ok(written)
    }

    fn backup(&self, email: &Email, raw: &[u8], settings: &ProcessSettings) -> Result<String, ExtractionError> {
        create_dir(&settings.target_directory)?;
        let filename = format!("{}_{}.eml", email.timestamp.format("%Y-%m-%d"), email.id());
        let path = unique_path(&settings.target_directory, &filename);
        write_file(&path, raw)?;
        debug!("Backup of email {} written to {}", email.id(), path.display());
        Ok(path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or(filename))
    }
}

fn create_dir(dir: &Path) -> Result<(), ExtractionError> {
    fs::create_dir_all(dir).map_err(|source| ExtractionError::Io {
        path: dir.display().to_string(),
        source,
    })
}

fn write_file(path: &Path, content: &[u8]) -> Result<(), ExtractionError> {
    fs::write(path, content).map_err(|source| ExtractionError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn write_metadata(path: &Path, email: &Email, attachment: &str) -> Result<(), ExtractionError> {
    let metadata = AttachmentMetadata {
        email_id: email.id(),
        from: &email.from,
        to: &email.to,
        subject: &email.subject,
        date: email.timestamp.to_rfc3339(),
        attachment,
    };
    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(".json");
    write_file(&PathBuf::from(sidecar), &serde_json::to_vec_pretty(&metadata)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::{Action, EmailMetadata, ProcessOption};
    use std::collections::BTreeMap;

    const RAW: &[u8] = b"From: alice@example.com\r\n\
To: bob@example.com\r\n\
Subject: Invoice\r\n\
Date: Thu, 07 Mar 2024 09:05:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain\r\n\
\r\n\
Please find the invoice attached.\r\n\
--XYZ\r\n\
Content-Type: text/csv; name=\"invoice.csv\"\r\n\
Content-Disposition: attachment; filename=\"invoice.csv\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
YSxiCjEsMgo=\r\n\
--XYZ--\r\n";

    fn settings(dir: &Path, add_metadata: bool) -> ProcessSettings {
        ProcessSettings {
            process_option: ProcessOption {
                action: Action::Download,
                process_embedded: true,
                backup: false,
                permanently_remove: false,
                downloaded_label_id: None,
                removed_label_id: None,
            },
            target_directory: dir.to_path_buf(),
            filename_schema: "${ID}_${ATTACHMENT_NAME}".to_string(),
            add_metadata,
            id_to_label: BTreeMap::new(),
        }
    }

    fn email() -> Email {
        Email::from(EmailMetadata {
            id: "abc".to_string(),
            label_ids: vec![],
            from: "alice@example.com".to_string(),
            to: "bob@example.com".to_string(),
            subject: "Invoice".to_string(),
            timestamp: chrono::Utc::now(),
            size_in_bytes: RAW.len() as u64,
        })
    }

    #[test]
    fn test_extract_writes_attachment_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let names = FileAttachmentStore::new()
            .extract(&email(), RAW, &settings(dir.path(), true))
            .unwrap();

        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["abc_invoice.csv".to_string()]);
        assert_eq!(fs::read(dir.path().join("abc_invoice.csv")).unwrap(), b"a,b\n1,2\n");
        let sidecar = fs::read_to_string(dir.path().join("abc_invoice.csv.json")).unwrap();
        assert!(sidecar.contains("\"subject\": \"Invoice\""));
    }

    #[test]
    fn test_backup_keeps_raw_message() {
        let dir = tempfile::tempdir().unwrap();
        let name = FileAttachmentStore::new()
            .backup(&email(), RAW, &settings(dir.path(), false))
            .unwrap();
        assert!(name.ends_with("_abc.eml"));
        assert_eq!(fs::read(dir.path().join(name)).unwrap(), RAW);
    }
}
