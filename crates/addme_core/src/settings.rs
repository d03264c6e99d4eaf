use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::GadgetError;

pub const DEFAULT_ERROR_REPORT_PAGE: &str = "Meta talk:AddMe";
pub const DEFAULT_ENTRY: &str = "default";

/// Wiki-hosted gadget options, keyed as they appear in the JSON page.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct GadgetConfig {
    /// Page the comment is posted to.
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub section_anchor: Option<String>,
    /// Sections nested deeper than this are ignored when matching the anchor.
    #[serde(default)]
    pub max_section_level: Option<u8>,
    /// Wikitext placed before the comment, e.g. a `{{support}}` template.
    #[serde(default)]
    pub prepend_content: Option<String>,
    #[serde(default)]
    pub remove_content_regex: Option<String>,
    #[serde(default)]
    pub edit_summary: Option<String>,
    #[serde(default)]
    pub error_report_page: Option<String>,
}

impl GadgetConfig {
    /// Parse the configuration page and overlay `default` then `project`.
    ///
    /// Keys present in a later entry replace earlier ones, including explicit nulls.
    pub fn from_document(title: &str, content: &str, project: &str) -> Result<Self, GadgetError> {
        let document: Value = serde_json::from_str(content).map_err(|_| unparsable(title))?;
        let Value::Object(entries) = document else {
            return Err(unparsable(title));
        };

        let mut merged = Map::new();
        for key in [DEFAULT_ENTRY, project] {
            match entries.get(key) {
                Some(Value::Object(options)) => {
                    merged.extend(options.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Some(_) => {
                    return Err(GadgetError::Configuration(format!(
                        "Entry '{key}' in [[{title}]] must be a JSON object"
                    )));
                }
                None if key == project => {
                    warn!(target: "addme", "No configuration for project '{project}' in [[{title}]]");
                }
                None => {}
            }
        }

        serde_json::from_value(Value::Object(merged)).map_err(|error| {
            GadgetError::Configuration(format!(
                "Invalid configuration for project '{project}' in [[{title}]]: {error}"
            ))
        })
    }

    pub fn section_anchor(&self) -> Option<&str> {
        self.section_anchor
            .as_deref()
            .filter(|anchor| !anchor.is_empty())
    }

    /// `None` and `0` both mean "no depth limit".
    pub fn max_section_level(&self) -> Option<u8> {
        self.max_section_level.filter(|level| *level > 0)
    }

    pub fn prepend_content(&self) -> &str {
        self.prepend_content.as_deref().unwrap_or("")
    }

    pub fn remove_content_regex(&self) -> Option<&str> {
        self.remove_content_regex
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
    }

    pub fn edit_summary(&self) -> &str {
        self.edit_summary.as_deref().unwrap_or("")
    }

    pub fn error_report_page(&self) -> &str {
        self.error_report_page
            .as_deref()
            .filter(|page| !page.trim().is_empty())
            .unwrap_or(DEFAULT_ERROR_REPORT_PAGE)
    }

    /// Configured page first, then the trigger's page, then the page being viewed.
    pub fn target_page(&self, trigger_page: Option<&str>, viewed_page: &str) -> String {
        [self.page.as_deref(), trigger_page]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|page| !page.is_empty())
            .unwrap_or(viewed_page)
            .to_string()
    }
}

pub(crate) fn unparsable(title: &str) -> GadgetError {
    GadgetError::Configuration(format!(
        "Unable to parse the configuration page [[{title}]]. There may have been a recent change that contains invalid JSON."
    ))
}
