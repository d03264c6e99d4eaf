use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::api::{AppendOutcome, AppendRequest, WikiWriteApi};
use crate::comment::CommentForm;
use crate::config::{AddMeConfig, article_url};
use crate::dialog::CommentDialog;
use crate::error::{ApiError, GadgetError, find_api_error};
use crate::loader::{LoadedGadget, SourcePages, load_gadget};
use crate::messages::MessageCatalog;
use crate::refresh::{PageView, RefreshContext, RefreshOutcome, refresh_content};
use crate::section::{Section, SectionListing, resolve_section};
use crate::settings::DEFAULT_ERROR_REPORT_PAGE;

/// Session-wide settings that do not depend on the project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GadgetSettings {
    pub sources: SourcePages,
    pub skin: Option<String>,
    pub wiki_url: Option<String>,
    pub article_path: String,
}

impl GadgetSettings {
    pub fn from_config(config: &AddMeConfig) -> Self {
        Self {
            sources: SourcePages::new(
                config.config_page(),
                config.messages_page(),
                &config.user_language(),
            ),
            skin: config.skin(),
            wiki_url: config.wiki_url(),
            article_path: config.article_path_owned(),
        }
    }

    fn article_url(&self, title: &str) -> Option<String> {
        article_url(self.wiki_url.as_deref()?, &self.article_path, title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub project: String,
    /// `data-addme-page` of the clicked button.
    pub trigger_page: Option<String>,
    pub form: CommentForm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReport {
    pub page: String,
    pub section: Section,
    pub payload: String,
    pub outcome: AppendOutcome,
    pub refresh: RefreshOutcome,
}

/// Live sections of a target page and the one a comment would go to.
#[derive(Debug, Clone, Serialize)]
pub struct SectionPreview {
    pub page: String,
    pub sections: Vec<Section>,
    pub timestamp: String,
    pub chosen: Option<Section>,
    pub problem: Option<String>,
}

/// One user's gadget session on one wiki.
///
/// Submissions take `&mut self`, so a session runs at most one chain at a time.
pub struct Gadget<A> {
    api: A,
    settings: GadgetSettings,
    loaded: BTreeMap<String, LoadedGadget>,
}

impl<A: WikiWriteApi> Gadget<A> {
    pub fn new(api: A, settings: GadgetSettings) -> Self {
        Self {
            api,
            settings,
            loaded: BTreeMap::new(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Fetch configuration and messages for `project` once per session.
    pub fn load(&mut self, project: &str) -> Result<&LoadedGadget, GadgetError> {
        match self.loaded.entry(project.to_string()) {
            Entry::Occupied(entry) => {
                debug!(target: "addme", project, "configuration already loaded");
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => {
                let loaded = load_gadget(&mut self.api, &self.settings.sources, project)?;
                Ok(entry.insert(loaded))
            }
        }
    }

    /// Where failures for `project` should be reported.
    pub fn report_page(&self, project: &str) -> &str {
        self.loaded
            .get(project)
            .map(|loaded| loaded.config.error_report_page())
            .unwrap_or(DEFAULT_ERROR_REPORT_PAGE)
    }

    pub fn target_page(
        &mut self,
        project: &str,
        trigger_page: Option<&str>,
        viewed_page: &str,
    ) -> Result<String, GadgetError> {
        let loaded = self.load(project)?;
        Ok(loaded.config.target_page(trigger_page, viewed_page))
    }

    pub fn open_dialog(&mut self, project: &str) -> Result<CommentDialog, GadgetError> {
        let loaded = self.load(project)?;
        CommentDialog::from_messages(&loaded.messages)
    }

    /// Read the section list and report what a submission would pick, without editing.
    pub fn preview_sections(
        &mut self,
        project: &str,
        page: &str,
    ) -> Result<SectionPreview, GadgetError> {
        self.load(project)?;
        let Self { api, loaded, .. } = self;
        let loaded = loaded_for(loaded, project)?;
        let SectionListing {
            sections,
            timestamp,
        } = api
            .get_sections(page)
            .map_err(|error| classify_failure(&error, page, &loaded.messages))?;

        let (chosen, problem) = match resolve_section(&sections, &loaded.config, page) {
            Ok(section) => (Some(section.clone()), None),
            Err(error) => (None, Some(error.to_string())),
        };
        Ok(SectionPreview {
            page: page.to_string(),
            sections,
            timestamp,
            chosen,
            problem,
        })
    }

    /// Append the comment, then reload the viewed page into `view`.
    ///
    /// The returned error is fatal unless [`GadgetError::is_recoverable`] says
    /// the form may be submitted again. A failed reload is not an error.
    pub fn submit(
        &mut self,
        request: &SubmitRequest,
        view: &mut PageView,
    ) -> Result<SubmitReport, GadgetError> {
        self.load(&request.project)?;
        let Self {
            api,
            settings,
            loaded,
        } = self;
        let loaded = loaded_for(loaded, &request.project)?;

        let page = loaded
            .config
            .target_page(request.trigger_page.as_deref(), &view.page);
        let payload = loaded.rules.build_payload(&request.form.text);
        debug!(target: "addme", project = %request.project, page = %page, "submitting comment");

        let listing = api
            .get_sections(&page)
            .map_err(|error| classify_failure(&error, &page, &loaded.messages))?;
        let section = resolve_section(&listing.sections, &loaded.config, &page)?.clone();

        let outcome = api
            .append_to_section(&AppendRequest {
                title: page.clone(),
                section: section.index,
                text: payload.clone(),
                summary: loaded.config.edit_summary().to_string(),
                start_timestamp: listing.timestamp,
                watch: request.form.watch,
            })
            .map_err(|error| classify_failure(&error, &page, &loaded.messages))?;
        info!(
            target: "addme",
            page = %page,
            section = section.index,
            revid = ?outcome.new_revision_id,
            "comment appended"
        );

        let fallback_url = settings
            .article_url(&page)
            .unwrap_or_else(|| page.clone());
        let refresh = refresh_content(
            api,
            view,
            &RefreshContext {
                language: &settings.sources.user_language,
                skin: settings.skin.as_deref(),
                feedback: loaded.messages.get_or("feedback", ""),
                fallback_url,
            },
        );

        Ok(SubmitReport {
            page,
            section,
            payload,
            outcome,
            refresh,
        })
    }
}

fn loaded_for<'a>(
    loaded: &'a BTreeMap<String, LoadedGadget>,
    project: &str,
) -> Result<&'a LoadedGadget, GadgetError> {
    loaded.get(project).ok_or_else(|| {
        GadgetError::Configuration(format!("Configuration for '{project}' is not loaded"))
    })
}

/// A missing page is fatal; any other API or transport failure may be retried by the user.
fn classify_failure(error: &anyhow::Error, page: &str, messages: &MessageCatalog) -> GadgetError {
    if find_api_error(error).is_some_and(ApiError::is_missing_title) {
        error!(target: "addme", "The page [[{page}]] is missing.");
        return GadgetError::MissingTitle {
            page: page.to_string(),
            message: messages.get_or("error-fatal", "The page is missing.").to_string(),
        };
    }
    error!(target: "addme", "There was an error when saving to [[{page}]]: {error:#}");
    GadgetError::SaveFailed {
        message: messages
            .get_or("error-save", "There was an error saving your comment.")
            .to_string(),
        detail: format!("{error:#}"),
    }
}
