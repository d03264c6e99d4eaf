use serde_json::Value;
use thiserror::Error;

pub const GADGET_NAME: &str = "AddMe";

/// An `error` object returned by the MediaWiki Action API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("MediaWiki API error [{code}]: {info}")]
pub struct ApiError {
    pub code: String,
    pub info: String,
}

impl ApiError {
    pub fn from_payload(error: &Value) -> Self {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        Self {
            code: code.to_string(),
            info: info.to_string(),
        }
    }

    pub fn is_missing_title(&self) -> bool {
        self.code == "missingtitle"
    }

    pub fn is_bad_token(&self) -> bool {
        self.code == "badtoken"
    }
}

/// The API error carried anywhere in an error chain, if any.
pub fn find_api_error(error: &anyhow::Error) -> Option<&ApiError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ApiError>())
}

#[derive(Debug, Error)]
pub enum GadgetError {
    /// Missing or unparsable configuration, base-language messages or local settings.
    #[error("{0}")]
    Configuration(String),

    #[error("Button is missing the 'data-addme-project' attribute.")]
    MissingProjectAttribute,

    #[error(
        "The \"{anchor}\" section is missing from [[{page}]]. Please correct this error or report this issue at [[{report_page}]]."
    )]
    SectionNotFound {
        anchor: String,
        page: String,
        report_page: String,
    },

    #[error(
        "[[{page}]] has no sections to add a comment to. Please correct this error or report this issue at [[{report_page}]]."
    )]
    NoSections { page: String, report_page: String },

    #[error("{message}")]
    MissingTitle { page: String, message: String },

    #[error("{message}")]
    SaveFailed { message: String, detail: String },
}

impl GadgetError {
    /// Only a generic save failure may be retried by reopening the form.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SaveFailed { .. })
    }
}

/// Text of the blocking alert shown for any user-visible failure.
pub fn render_alert(message: &str, report_page: &str) -> String {
    format!(
        "There was an error with the {GADGET_NAME} gadget: {message}\nPlease report this issue at [[{report_page}]]."
    )
}
