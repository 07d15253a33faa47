use std::collections::BTreeMap;
use std::fmt;

use log::warn;

pub const DEFAULT_MIN_SIZE_MB: u32 = 1;

/// Gmail search run by each pass: either a free-form query, or the basic
/// search for large emails with attachments, optionally limited to labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    Custom(String),
    Basic { min_size_mb: u32, label_ids: Vec<String> },
}

impl SearchQuery {
    /// Query string for the API. Basic searches refer to labels by name, so
    /// the ids are looked up in the account's labels; unknown ids are skipped.
    pub fn resolve(&self, id_to_label: &BTreeMap<String, String>) -> String {
        let (min_size_mb, label_ids) = match self {
            SearchQuery::Custom(query) => return query.clone(),
            SearchQuery::Basic { min_size_mb, label_ids } => (min_size_mb, label_ids),
        };

        let mut query = format!("has:attachment size:{}m", min_size_mb);
        let names: Vec<String> = label_ids
            .iter()
            .filter_map(|id| match id_to_label.get(id) {
                Some(name) => Some(format!("label:\"{}\"", name)),
                None => {
                    warn!("Ignoring unknown label ID in search: {}", id);
                    None
                }
            })
            .collect();
        if !names.is_empty() {
            query.push_str(&format!(" {{{}}}", names.join(" ")));
        }
        query
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchQuery::Custom(query) => f.write_str(query),
            SearchQuery::Basic { min_size_mb, label_ids } if label_ids.is_empty() => {
                write!(f, "has:attachment size:{}m", min_size_mb)
            }
            SearchQuery::Basic { min_size_mb, label_ids } => write!(
                f,
                "has:attachment size:{}m in labels {}",
                min_size_mb,
                label_ids.join(", ")
            ),
        }
    }
}
