use std::collections::BTreeMap;

use log::{error, info};

use crate::error::RemoteApiError;
use crate::mail_api::MailApi;

pub const DEFAULT_DOWNLOADED_LABEL_NAME: &str = "unattach/downloaded";
pub const DEFAULT_REMOVED_LABEL_NAME: &str = "unattach/removed";

/// Configured label id meaning "do not apply a label".
pub const NO_LABEL: &str = "-";

/// Where a label to apply comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelChoice {
    Disabled,
    Id(String),
    Default,
}

impl LabelChoice {
    pub fn from_config(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(NO_LABEL) => LabelChoice::Disabled,
            Some(id) if !id.is_empty() => LabelChoice::Id(id.to_string()),
            _ => LabelChoice::Default,
        }
    }
}

/// Resolve the label to apply:
/// a configured id that exists remotely is used as is, otherwise an existing
/// label named `default_name`, otherwise a newly created one.
pub async fn get_or_create_label_id(
    api: &dyn MailApi,
    id_to_label: &mut BTreeMap<String, String>,
    choice: &LabelChoice,
    default_name: &str,
) -> Result<Option<String>, RemoteApiError> {
    if let LabelChoice::Id(id) = choice {
        if id_to_label.contains_key(id) {
            return Ok(Some(id.clone()));
        }
        error!("Couldn't find the configured label ID within the account's labels: {}", id);
    }
    if *choice == LabelChoice::Disabled {
        return Ok(None);
    }

    if let Some((id, _)) = id_to_label.iter().find(|(_, name)| name.as_str() == default_name) {
        return Ok(Some(id.clone()));
    }

    info!("Creating label {}...", default_name);
    let id = api.create_label(default_name).await?;
    id_to_label.insert(id.clone(), default_name.to_string());
    info!("✅ Label {} created ({})", default_name, id);
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_choice_from_config() {
        assert_eq!(LabelChoice::from_config(Some("-")), LabelChoice::Disabled);
        assert_eq!(LabelChoice::from_config(Some(" Label_7 ")), LabelChoice::Id("Label_7".to_string()));
        assert_eq!(LabelChoice::from_config(Some("")), LabelChoice::Default);
        assert_eq!(LabelChoice::from_config(None), LabelChoice::Default);
    }
}
