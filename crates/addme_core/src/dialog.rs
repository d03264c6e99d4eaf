use serde::Serialize;

use crate::error::GadgetError;
use crate::messages::MessageCatalog;

/// Labels of the comment form, resolved from the interface messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentDialog {
    pub title: String,
    pub submit_label: String,
    pub cancel_label: String,
    pub placeholder: String,
    pub description: String,
    pub watch_label: String,
    pub signature_note: String,
}

impl CommentDialog {
    pub fn from_messages(messages: &MessageCatalog) -> Result<Self, GadgetError> {
        let text = |key: &str| messages.get(key).map(ToString::to_string);
        Ok(Self {
            title: text("title")?,
            submit_label: text("submit")?,
            cancel_label: text("cancel")?,
            placeholder: text("placeholder-comment")?,
            description: text("description")?,
            watch_label: text("watch-page")?,
            signature_note: text("signature")?,
        })
    }

    /// Plain-text rendering used by terminal prompts.
    pub fn render_prompt(&self) -> String {
        format!(
            "{}\n{}\n{}\n[ ] {}\n({})\n{} / {}",
            self.title,
            self.description,
            self.signature_note,
            self.watch_label,
            self.placeholder,
            self.submit_label,
            self.cancel_label
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::CommentDialog;
    use crate::error::GadgetError;
    use crate::messages::MessageCatalog;

    fn catalog(skip: Option<&str>) -> MessageCatalog {
        let keys = [
            "title",
            "submit",
            "cancel",
            "placeholder-comment",
            "description",
            "watch-page",
            "signature",
        ];
        let entries: BTreeMap<String, String> = keys
            .iter()
            .filter(|key| Some(**key) != skip)
            .map(|key| (key.to_string(), format!("<{key}>")))
            .collect();
        MessageCatalog::merge(entries, None)
    }

    #[test]
    fn labels_come_from_messages() {
        let dialog = CommentDialog::from_messages(&catalog(None)).expect("dialog");
        assert_eq!(dialog.submit_label, "<submit>");
        assert_eq!(dialog.placeholder, "<placeholder-comment>");
        assert!(dialog.render_prompt().starts_with("<title>\n<description>"));
    }

    #[test]
    fn missing_label_is_a_configuration_error() {
        let error = CommentDialog::from_messages(&catalog(Some("watch-page"))).expect_err("must fail");
        assert!(matches!(error, GadgetError::Configuration(_)));
        assert!(error.to_string().contains("'watch-page'"));
    }
}
