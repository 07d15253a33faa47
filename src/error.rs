use thiserror::Error;

/// Failure reported by the remote mail API (transport, auth, quota).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("remote API error{}: {message}", status_suffix(.code))]
pub struct RemoteApiError {
    pub code: Option<u16>,
    pub message: String,
}

impl RemoteApiError {
    pub fn new(message: impl Into<String>) -> Self {
        RemoteApiError {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: u16, message: impl Into<String>) -> Self {
        RemoteApiError {
            code: Some(code),
            message: message.into(),
        }
    }
}

fn status_suffix(code: &Option<u16>) -> String {
    code.map(|code| format!(" {}", code)).unwrap_or_default()
}

/// Failure of the attachment extraction / storage collaborator.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("unable to parse MIME message {0}")]
    Unparseable(String),
    #[error("unable to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to serialize metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Error raised by a single `take_step`.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    RemoteApi(#[from] RemoteApiError),
    #[error("attachment extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("take_step called on a task with no remaining steps")]
    IllegalState,
}

/// Errors of the loopback OAuth receiver.
#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("unable to bind loopback receiver on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("user authorization failed ({0})")]
    AuthorizationDenied(String),
    #[error("loopback receiver is not running")]
    NotStarted,
    #[error("loopback receiver stopped before a callback arrived")]
    CallbackLost,
    #[error("loopback server error: {0}")]
    Server(#[from] hyper::Error),
}
