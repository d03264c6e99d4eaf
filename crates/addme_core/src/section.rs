use serde::Serialize;

use crate::error::GadgetError;
use crate::settings::GadgetConfig;

/// One heading of a page outline as reported by `action=parse&prop=sections`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub anchor: String,
    pub heading: String,
    /// Nesting depth in the table of contents (`toclevel`).
    pub level: u8,
    pub index: u32,
}

/// Section outline plus the server time it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionListing {
    pub sections: Vec<Section>,
    pub timestamp: String,
}

/// Pick the section a comment is appended to.
///
/// Without a configured anchor the last section wins. With one, the first
/// section carrying that anchor within `max-section-level` wins.
pub fn resolve_section<'a>(
    sections: &'a [Section],
    config: &GadgetConfig,
    page: &str,
) -> Result<&'a Section, GadgetError> {
    let Some(anchor) = config.section_anchor() else {
        return sections.last().ok_or_else(|| GadgetError::NoSections {
            page: page.to_string(),
            report_page: config.error_report_page().to_string(),
        });
    };

    let max_level = config.max_section_level();
    sections
        .iter()
        .find(|section| {
            section.anchor == anchor && max_level.is_none_or(|max| section.level <= max)
        })
        .ok_or_else(|| GadgetError::SectionNotFound {
            anchor: anchor.to_string(),
            page: page.to_string(),
            report_page: config.error_report_page().to_string(),
        })
}
