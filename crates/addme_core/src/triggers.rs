use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::GadgetError;

pub const TRIGGER_CLASS: &str = "addme-button";

static START_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<[A-Za-z][A-Za-z0-9-]*(\s[^>]*)?>").expect("BUG: invalid START_TAG regex literal")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("BUG: invalid ATTRIBUTE regex literal")
});

/// A rendered button that opens the comment form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Trigger {
    /// `data-addme-project`, selecting the configuration and message entries.
    pub project: Option<String>,
    /// `data-addme-page`, overriding the page the comment goes to.
    pub page: Option<String>,
}

impl Trigger {
    pub fn project(&self) -> Result<&str, GadgetError> {
        self.project
            .as_deref()
            .filter(|project| !project.is_empty())
            .ok_or(GadgetError::MissingProjectAttribute)
    }

    pub fn page(&self) -> Option<&str> {
        self.page.as_deref().filter(|page| !page.is_empty())
    }
}

/// Every element of `html` whose class list contains `addme-button`, in document order.
pub fn find_triggers(html: &str) -> Vec<Trigger> {
    START_TAG
        .captures_iter(html)
        .filter_map(|captures| captures.get(1))
        .filter_map(|attributes| trigger_from_attributes(attributes.as_str()))
        .collect()
}

fn trigger_from_attributes(raw: &str) -> Option<Trigger> {
    let mut is_trigger = false;
    let mut trigger = Trigger::default();
    for captures in ATTRIBUTE.captures_iter(raw) {
        let name = captures[1].to_ascii_lowercase();
        let value = captures
            .get(2)
            .or_else(|| captures.get(3))
            .or_else(|| captures.get(4))
            .map(|value| decode_entities(value.as_str()))
            .unwrap_or_default();
        match name.as_str() {
            "class" => is_trigger = value.split_whitespace().any(|class| class == TRIGGER_CLASS),
            "data-addme-project" => trigger.project = Some(value),
            "data-addme-page" => trigger.page = Some(value),
            _ => {}
        }
    }
    is_trigger.then_some(trigger)
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::{Trigger, find_triggers};
    use crate::error::GadgetError;

    #[test]
    fn finds_buttons_in_document_order() {
        let html = r#"<div class="mw-parser-output">
            <span class="mw-ui-button addme-button" data-addme-project="wishlist">Vote</span>
            <p class="addme-buttons">not a trigger</p>
            <a class='addme-button' data-addme-project='survey' data-addme-page="Survey/Talk &amp; notes">Comment</a>
        </div>"#;
        let triggers = find_triggers(html);
        assert_eq!(
            triggers,
            vec![
                Trigger {
                    project: Some("wishlist".to_string()),
                    page: None,
                },
                Trigger {
                    project: Some("survey".to_string()),
                    page: Some("Survey/Talk & notes".to_string()),
                },
            ]
        );
    }

    #[test]
    fn button_without_project_is_reported() {
        let triggers = find_triggers(r#"<button class="addme-button" data-addme-project="">Add</button>"#);
        assert_eq!(triggers.len(), 1);
        let error = triggers[0].project().expect_err("must fail");
        assert!(matches!(error, GadgetError::MissingProjectAttribute));
        assert_eq!(
            error.to_string(),
            "Button is missing the 'data-addme-project' attribute."
        );
    }

    #[test]
    fn empty_page_attribute_is_ignored() {
        let trigger = Trigger {
            project: Some("wishlist".to_string()),
            page: Some(String::new()),
        };
        assert_eq!(trigger.project().expect("project"), "wishlist");
        assert_eq!(trigger.page(), None);
    }

    #[test]
    fn page_without_buttons_has_no_triggers() {
        assert!(find_triggers("<p>Nothing here</p>").is_empty());
    }
}
