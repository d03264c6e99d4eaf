use regex::Regex;

use crate::error::GadgetError;
use crate::settings::GadgetConfig;

/// Expanded by MediaWiki into the author's signature and a timestamp on save.
pub const SIGNATURE_TOKEN: &str = "~~~~";

/// Values collected from the comment form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentForm {
    pub text: String,
    pub watch: bool,
}

/// How raw form text becomes the appended wikitext.
#[derive(Debug, Clone)]
pub struct CommentRules {
    prepend: String,
    removal: Option<Regex>,
}

impl CommentRules {
    pub fn from_config(config: &GadgetConfig) -> Result<Self, GadgetError> {
        let removal = config
            .remove_content_regex()
            .map(|pattern| {
                Regex::new(pattern).map_err(|error| {
                    GadgetError::Configuration(format!(
                        "Invalid remove-content-regex '{pattern}': {error}\nLookaround (such as (?=...) or (?<!...)) and backreferences (such as \\1) are not supported; rewrite the pattern without them."
                    ))
                })
            })
            .transpose()?;
        Ok(Self {
            prepend: config.prepend_content().to_string(),
            removal,
        })
    }

    /// Drop typed signatures and unwanted content, then trim.
    pub fn clean(&self, raw: &str) -> String {
        let unsigned = raw.replace(SIGNATURE_TOKEN, "");
        let stripped = match &self.removal {
            Some(pattern) => pattern.replace_all(&unsigned, "").into_owned(),
            None => unsigned,
        };
        stripped.trim().to_string()
    }

    /// Text passed as `appendtext`: boilerplate, comment, signature.
    pub fn build_payload(&self, raw: &str) -> String {
        format!("\n{}{} {SIGNATURE_TOKEN}", self.prepend, self.clean(raw))
    }
}
