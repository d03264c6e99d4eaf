use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::GadgetError;
use crate::settings::unparsable;

/// Interface messages for one project, after locale fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageCatalog {
    entries: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct MessagesDocument {
    #[serde(default)]
    messages: Map<String, Value>,
}

/// Extract `messages.<project>` from a messages page.
///
/// The page uses the wikitext content model so it can be translated, so the
/// JSON is only checked here. `Ok(None)` means the project has no entry.
pub fn parse_messages_page(
    title: &str,
    content: &str,
    project: &str,
) -> Result<Option<BTreeMap<String, String>>, GadgetError> {
    let mut document: MessagesDocument =
        serde_json::from_str(content).map_err(|_| unparsable(title))?;
    let Some(entry) = document.messages.remove(project) else {
        return Ok(None);
    };
    let Value::Object(entry) = entry else {
        return Err(GadgetError::Configuration(format!(
            "Messages for project '{project}' in [[{title}]] are not an object"
        )));
    };

    let mut messages = BTreeMap::new();
    for (key, value) in entry {
        match value {
            Value::String(text) => {
                messages.insert(key, text);
            }
            other => {
                warn!(target: "addme", title, key = %key, "ignoring non-string message value {other}");
            }
        }
    }
    Ok(Some(messages))
}

impl MessageCatalog {
    /// Locale entries win; the base language fills every gap.
    pub fn merge(
        base: BTreeMap<String, String>,
        localized: Option<BTreeMap<String, String>>,
    ) -> Self {
        let mut entries = base;
        if let Some(localized) = localized {
            entries.extend(localized);
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Result<&str, GadgetError> {
        self.entries
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| GadgetError::Configuration(format!("Missing interface message '{key}'")))
    }

    pub fn get_or<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.entries.get(key).map(String::as_str).unwrap_or(fallback)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{MessageCatalog, parse_messages_page};
    use crate::error::GadgetError;

    fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn locale_overrides_and_base_fills_gaps() {
        let catalog = MessageCatalog::merge(
            entries(&[("submit", "Submit"), ("cancel", "Cancel")]),
            Some(entries(&[("submit", "Envoyer")])),
        );
        assert_eq!(catalog.get("submit").expect("submit"), "Envoyer");
        assert_eq!(catalog.get("cancel").expect("cancel"), "Cancel");
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn missing_locale_yields_exactly_the_base_set() {
        let base = entries(&[("title", "Add your comment"), ("submit", "Submit")]);
        let catalog = MessageCatalog::merge(base.clone(), None);
        let merged: BTreeMap<String, String> = catalog
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        assert_eq!(merged, base);
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let catalog = MessageCatalog::default();
        assert!(catalog.is_empty());
        let error = catalog.get("title").expect_err("must fail");
        assert!(matches!(error, GadgetError::Configuration(_)));
        assert_eq!(catalog.get_or("title", "fallback"), "fallback");
    }

    #[test]
    fn parse_messages_page_selects_project() {
        let content = r#"{"messages": {"wishlist": {"submit": "Submit"}, "other": {"submit": "Go"}}}"#;
        let messages = parse_messages_page("Messages/en", content, "wishlist")
            .expect("parse")
            .expect("project present");
        assert_eq!(messages.get("submit").map(String::as_str), Some("Submit"));

        let absent = parse_messages_page("Messages/en", content, "missing").expect("parse");
        assert!(absent.is_none());
    }

    #[test]
    fn sibling_project_with_other_value_types_does_not_break_parsing() {
        let content = r#"{"messages": {"wishlist": {"submit": "Submit"}, "other": {"count": 3}, "legacy": null}}"#;
        let messages = parse_messages_page("Messages/en", content, "wishlist")
            .expect("parse")
            .expect("project present");
        assert_eq!(messages.get("submit").map(String::as_str), Some("Submit"));
    }

    #[test]
    fn non_string_values_in_project_entry_are_skipped() {
        let content = r#"{"messages": {"wishlist": {"submit": "Submit", "count": 3}}}"#;
        let messages = parse_messages_page("Messages/en", content, "wishlist")
            .expect("parse")
            .expect("project present");
        assert_eq!(messages.len(), 1);
        assert!(!messages.contains_key("count"));
    }

    #[test]
    fn project_entry_must_be_an_object() {
        let content = r#"{"messages": {"wishlist": "Submit"}}"#;
        let error = parse_messages_page("Messages/en", content, "wishlist").expect_err("must fail");
        assert!(matches!(error, GadgetError::Configuration(_)));
        assert!(error.to_string().contains("'wishlist'"));
    }

    #[test]
    fn parse_messages_page_rejects_invalid_json() {
        let error = parse_messages_page("Messages/de", "{\"messages\": ", "wishlist")
            .expect_err("must fail");
        assert!(error.to_string().contains("[[Messages/de]]"));
    }
}
