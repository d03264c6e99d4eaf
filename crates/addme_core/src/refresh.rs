use reqwest::Url;
use tracing::{debug, warn};

use crate::api::{RenderRequest, WikiReadApi};

const PARSER_OUTPUT_CLASS: &str = "mw-parser-output";

/// The rendered page the user is looking at, and the revision metadata derived from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageView {
    pub page: String,
    pub html: String,
    pub revision_id: Option<i64>,
    /// Link to the currently displayed revision (`oldid=`).
    pub permalink: Option<String>,
}

impl PageView {
    pub fn new(page: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed {
        revision_id: i64,
        /// Post-edit notification text.
        feedback: String,
    },
    /// The edit was saved but the content could not be re-rendered.
    Redirect { url: String },
}

pub struct RefreshContext<'a> {
    pub language: &'a str,
    pub skin: Option<&'a str>,
    pub feedback: &'a str,
    /// Where to send the user when the refresh fails.
    pub fallback_url: String,
}

/// Re-render the viewed page and swap it into `view`.
///
/// Never fails: a refresh error turns into a redirect to the page itself.
pub fn refresh_content<A: WikiReadApi>(
    api: &mut A,
    view: &mut PageView,
    context: &RefreshContext<'_>,
) -> RefreshOutcome {
    let request = RenderRequest {
        page: view.page.clone(),
        language: context.language.to_string(),
        skin: context.skin.map(ToString::to_string),
    };
    let rendered = match api.render_page(&request) {
        Ok(rendered) => rendered,
        Err(error) => {
            warn!(target: "addme", page = %view.page, "comment saved but reloading failed: {error:#}");
            return RefreshOutcome::Redirect {
                url: context.fallback_url.clone(),
            };
        }
    };

    view.html = splice_parser_output(&view.html, &rendered.html);
    view.revision_id = Some(rendered.revision_id);
    if let Some(permalink) = view.permalink.as_deref() {
        match set_oldid(permalink, rendered.revision_id) {
            Some(updated) => view.permalink = Some(updated),
            None => debug!(target: "addme", permalink, "permalink is not an absolute URL, left unchanged"),
        }
    }
    debug!(target: "addme", page = %view.page, revid = rendered.revision_id, "page content reloaded");

    RefreshOutcome::Refreshed {
        revision_id: rendered.revision_id,
        feedback: context.feedback.to_string(),
    }
}

/// Replace the first parser-output container of `existing` with `replacement`.
///
/// Without such a container the whole document is replaced.
pub fn splice_parser_output(existing: &str, replacement: &str) -> String {
    match parser_output_span(existing) {
        Some((start, end)) => {
            let mut spliced = String::with_capacity(existing.len() + replacement.len());
            spliced.push_str(&existing[..start]);
            spliced.push_str(replacement);
            spliced.push_str(&existing[end..]);
            spliced
        }
        None => replacement.to_string(),
    }
}

fn parser_output_span(html: &str) -> Option<(usize, usize)> {
    let mut start = None;
    let mut depth = 0usize;
    let mut index = 0usize;

    while index < html.len() {
        let at = index + html[index..].find('<')?;
        if is_tag_at(html, at, "<!--") {
            index = match html[at + 4..].find("-->") {
                Some(end) => at + 4 + end + 3,
                None => html.len(),
            };
            continue;
        }
        if is_tag_at(html, at, "<div") {
            let end = at + html[at..].find('>')?;
            match start {
                Some(_) => depth += 1,
                None if html[at..end].contains(PARSER_OUTPUT_CLASS) => {
                    start = Some(at);
                    depth = 1;
                }
                None => {}
            }
            index = end + 1;
            continue;
        }
        if is_tag_at(html, at, "</div") {
            let end = at + html[at..].find('>')?;
            if let Some(open) = start {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some((open, end + 1));
                }
            }
            index = end + 1;
            continue;
        }
        index = at + 1;
    }
    None
}

/// `prefix` starts at `at`, and for element names is not just the start of a longer name.
fn is_tag_at(html: &str, at: usize, prefix: &str) -> bool {
    let bytes = html.as_bytes();
    let end = at + prefix.len();
    if end > bytes.len() || !bytes[at..end].eq_ignore_ascii_case(prefix.as_bytes()) {
        return false;
    }
    prefix == "<!--"
        || bytes
            .get(end)
            .is_none_or(|&next| next.is_ascii_whitespace() || matches!(next, b'>' | b'/'))
}

/// Point a permalink URL at `revision_id`, keeping its other query parameters.
pub fn set_oldid(url: &str, revision_id: i64) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| key != "oldid")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("oldid", &revision_id.to_string());
    Some(parsed.into())
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::{PageView, RefreshContext, RefreshOutcome, refresh_content, set_oldid, splice_parser_output};
    use crate::api::{PageSource, RenderRequest, RenderedPage, WikiReadApi};
    use crate::section::SectionListing;

    struct RenderApi {
        result: Option<RenderedPage>,
        requests: Vec<RenderRequest>,
    }

    impl WikiReadApi for RenderApi {
        fn get_page_sources(&mut self, _titles: &[String]) -> anyhow::Result<Vec<PageSource>> {
            bail!("not used")
        }

        fn get_sections(&mut self, _title: &str) -> anyhow::Result<SectionListing> {
            bail!("not used")
        }

        fn render_page(&mut self, request: &RenderRequest) -> anyhow::Result<RenderedPage> {
            self.requests.push(request.clone());
            match &self.result {
                Some(page) => Ok(page.clone()),
                None => bail!("MediaWiki API request failed with HTTP 500"),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.len()
        }
    }

    fn context() -> RefreshContext<'static> {
        RefreshContext {
            language: "fr",
            skin: Some("vector-2022"),
            feedback: "Your comment was added.",
            fallback_url: "https://wiki.example/wiki/Survey/Proposal".to_string(),
        }
    }

    #[test]
    fn splice_replaces_only_the_parser_output() {
        let existing = r#"<header>h</header><div class="mw-parser-output"><div>old</div><p>x</p></div><footer>f</footer>"#;
        let spliced = splice_parser_output(existing, r#"<div class="mw-parser-output">new</div>"#);
        assert_eq!(
            spliced,
            r#"<header>h</header><div class="mw-parser-output">new</div><footer>f</footer>"#
        );
    }

    #[test]
    fn splice_ignores_divs_inside_comments() {
        let existing = concat!(
            r#"<div class="mw-parser-output"><p>old</p><!-- </div> stray <div> -->"#,
            r#"<div class="note">n</div></div><div id="catlinks">c</div>"#,
        );
        let spliced = splice_parser_output(existing, "<p>new</p>");
        assert_eq!(spliced, r#"<p>new</p><div id="catlinks">c</div>"#);
    }

    #[test]
    fn splice_skips_containers_mentioned_only_in_comments() {
        let existing = r#"<!-- <div class="mw-parser-output"> --><div class="mw-parser-output">old</div><footer>f</footer>"#;
        let spliced = splice_parser_output(existing, "<p>new</p>");
        assert_eq!(spliced, "<!-- <div class=\"mw-parser-output\"> --><p>new</p><footer>f</footer>");
    }

    #[test]
    fn splice_without_container_replaces_everything() {
        assert_eq!(splice_parser_output("<p>old</p>", "<p>new</p>"), "<p>new</p>");
        assert_eq!(splice_parser_output("", "<p>new</p>"), "<p>new</p>");
    }

    #[test]
    fn oldid_is_replaced_and_other_parameters_kept() {
        let updated = set_oldid("https://wiki.example/w/index.php?title=Foo&oldid=10", 42)
            .expect("absolute url");
        assert_eq!(updated, "https://wiki.example/w/index.php?title=Foo&oldid=42");
        assert_eq!(set_oldid("/w/index.php?oldid=1", 2), None);
    }

    #[test]
    fn successful_refresh_updates_view() {
        let mut api = RenderApi {
            result: Some(RenderedPage {
                title: "Survey".to_string(),
                revision_id: 77,
                html: r#"<div class="mw-parser-output">fresh</div>"#.to_string(),
            }),
            requests: Vec::new(),
        };
        let mut view = PageView {
            page: "Survey".to_string(),
            html: r#"<main><div class="mw-parser-output">stale</div></main>"#.to_string(),
            revision_id: Some(70),
            permalink: Some("https://wiki.example/w/index.php?title=Survey&oldid=70".to_string()),
        };

        let outcome = refresh_content(&mut api, &mut view, &context());

        assert_eq!(
            outcome,
            RefreshOutcome::Refreshed {
                revision_id: 77,
                feedback: "Your comment was added.".to_string(),
            }
        );
        assert_eq!(view.html, r#"<main><div class="mw-parser-output">fresh</div></main>"#);
        assert_eq!(view.revision_id, Some(77));
        assert_eq!(
            view.permalink.as_deref(),
            Some("https://wiki.example/w/index.php?title=Survey&oldid=77")
        );
        assert_eq!(api.requests[0].language, "fr");
        assert_eq!(api.requests[0].skin.as_deref(), Some("vector-2022"));
    }

    #[test]
    fn failed_refresh_redirects_and_leaves_view_alone() {
        let mut api = RenderApi {
            result: None,
            requests: Vec::new(),
        };
        let mut view = PageView::new("Survey");
        view.html = "<p>stale</p>".to_string();

        let outcome = refresh_content(&mut api, &mut view, &context());

        assert_eq!(
            outcome,
            RefreshOutcome::Redirect {
                url: "https://wiki.example/wiki/Survey/Proposal".to_string(),
            }
        );
        assert_eq!(view.html, "<p>stale</p>");
        assert_eq!(view.revision_id, None);
    }
}
