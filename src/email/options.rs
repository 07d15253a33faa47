use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Action {
    Download,
    Remove,
    DownloadAndRemove,
}

impl Action {
    pub fn downloads(self) -> bool {
        matches!(self, Action::Download | Action::DownloadAndRemove)
    }

    pub fn removes(self) -> bool {
        matches!(self, Action::Remove | Action::DownloadAndRemove)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Download => "download",
            Action::Remove => "remove",
            Action::DownloadAndRemove => "download and remove",
        };
        f.write_str(name)
    }
}

/// What to do with each selected email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOption {
    pub action: Action,
    pub process_embedded: bool,
    pub backup: bool,
    pub permanently_remove: bool,
    /// `None` disables the label.
    pub downloaded_label_id: Option<String>,
    pub removed_label_id: Option<String>,
}

/// A `ProcessOption` plus everything needed to carry it out.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub process_option: ProcessOption,
    pub target_directory: PathBuf,
    pub filename_schema: String,
    pub add_metadata: bool,
    pub id_to_label: BTreeMap<String, String>,
}

impl ProcessSettings {
    pub fn action(&self) -> Action {
        self.process_option.action
    }

    pub fn label_name(&self, id: &str) -> Option<&str> {
        self.id_to_label.get(id).map(String::as_str)
    }
}
