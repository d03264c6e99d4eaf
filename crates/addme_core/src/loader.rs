use tracing::{debug, warn};

use crate::api::{PageSource, WikiReadApi};
use crate::comment::CommentRules;
use crate::config::BASE_LANGUAGE;
use crate::error::GadgetError;
use crate::messages::{MessageCatalog, parse_messages_page};
use crate::settings::GadgetConfig;

/// Titles read in the single batched configuration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePages {
    pub config_page: String,
    pub base_messages_page: String,
    /// Absent when the user's language is the base language.
    pub local_messages_page: Option<String>,
    pub user_language: String,
}

impl SourcePages {
    pub fn new(config_page: &str, messages_page: &str, user_language: &str) -> Self {
        let language = user_language.trim();
        let language = if language.is_empty() {
            BASE_LANGUAGE
        } else {
            language
        };
        let local_messages_page =
            (language != BASE_LANGUAGE).then(|| format!("{messages_page}/{language}"));
        Self {
            config_page: config_page.to_string(),
            base_messages_page: format!("{messages_page}/{BASE_LANGUAGE}"),
            local_messages_page,
            user_language: language.to_string(),
        }
    }

    pub fn titles(&self) -> Vec<String> {
        let mut titles = vec![self.config_page.clone(), self.base_messages_page.clone()];
        titles.extend(self.local_messages_page.iter().cloned());
        titles
    }
}

/// Configuration, comment rules and messages for one project.
#[derive(Debug, Clone)]
pub struct LoadedGadget {
    pub project: String,
    pub config: GadgetConfig,
    pub rules: CommentRules,
    pub messages: MessageCatalog,
    pub warnings: Vec<String>,
}

pub fn load_gadget<A: WikiReadApi>(
    api: &mut A,
    pages: &SourcePages,
    project: &str,
) -> Result<LoadedGadget, GadgetError> {
    let sources = api.get_page_sources(&pages.titles()).map_err(|error| {
        GadgetError::Configuration(format!(
            "Unable to fetch [[{}]] and its messages: {error:#}",
            pages.config_page
        ))
    })?;
    debug!(target: "addme", project, pages = sources.len(), "fetched gadget configuration pages");

    let config_source = find_present(&sources, &pages.config_page).ok_or_else(|| {
        GadgetError::Configuration(format!(
            "Missing configuration page [[{}]]",
            pages.config_page
        ))
    })?;
    let config = GadgetConfig::from_document(
        &pages.config_page,
        config_source.content.as_deref().unwrap_or_default(),
        project,
    )?;
    let rules = CommentRules::from_config(&config)?;

    let base_source = find_present(&sources, &pages.base_messages_page).ok_or_else(|| {
        GadgetError::Configuration(format!(
            "Missing base language page [[{}]]",
            pages.base_messages_page
        ))
    })?;
    let base = parse_messages_page(
        &pages.base_messages_page,
        base_source.content.as_deref().unwrap_or_default(),
        project,
    )?
    .ok_or_else(|| {
        GadgetError::Configuration(format!(
            "No messages for project '{project}' in [[{}]]",
            pages.base_messages_page
        ))
    })?;

    let mut warnings = Vec::new();
    let localized = pages
        .local_messages_page
        .as_deref()
        .and_then(|title| load_localized(&sources, title, pages, project, &mut warnings));

    Ok(LoadedGadget {
        project: project.to_string(),
        config,
        rules,
        messages: MessageCatalog::merge(base, localized),
        warnings,
    })
}

/// Any problem with the localized page only degrades to the base language.
fn load_localized(
    sources: &[PageSource],
    title: &str,
    pages: &SourcePages,
    project: &str,
    warnings: &mut Vec<String>,
) -> Option<std::collections::BTreeMap<String, String>> {
    let outcome = match find_present(sources, title) {
        None => Err(format!(
            "Localization for '{}' missing at [[{title}]]",
            pages.user_language
        )),
        Some(source) => {
            match parse_messages_page(title, source.content.as_deref().unwrap_or_default(), project)
            {
                Ok(Some(messages)) => Ok(messages),
                Ok(None) => Err(format!(
                    "Localization for '{}' has no messages for project '{project}' at [[{title}]]",
                    pages.user_language
                )),
                Err(error) => Err(error.to_string()),
            }
        }
    };

    match outcome {
        Ok(messages) => Some(messages),
        Err(message) => {
            warn!(target: "addme", "{message}");
            warnings.push(message);
            None
        }
    }
}

fn find_present<'a>(sources: &'a [PageSource], title: &str) -> Option<&'a PageSource> {
    sources
        .iter()
        .find(|source| source.title == title)
        .filter(|source| !source.missing && source.content.is_some())
}
