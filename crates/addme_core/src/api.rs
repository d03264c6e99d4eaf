use std::collections::BTreeMap;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::AddMeConfig;
use crate::error::{ApiError, find_api_error};
use crate::section::{Section, SectionListing};

/// Latest revision of a page requested in a batched read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSource {
    /// Title as it was requested, before server-side normalization.
    pub title: String,
    pub missing: bool,
    pub content_model: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    pub title: String,
    pub section: u32,
    pub text: String,
    pub summary: String,
    /// Server time the section list was read at; the edit fails if the page was deleted since.
    pub start_timestamp: String,
    pub watch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub new_revision_id: Option<i64>,
    pub no_change: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub page: String,
    pub language: String,
    pub skin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub title: String,
    pub revision_id: i64,
    pub html: String,
}

pub trait WikiReadApi {
    fn get_page_sources(&mut self, titles: &[String]) -> Result<Vec<PageSource>>;
    fn get_sections(&mut self, title: &str) -> Result<SectionListing>;
    fn render_page(&mut self, request: &RenderRequest) -> Result<RenderedPage>;
    fn request_count(&self) -> usize;
}

pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn append_to_section(&mut self, request: &AppendRequest) -> Result<AppendOutcome>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &AddMeConfig) -> Self {
        Self {
            api_url: config.api_url_owned().unwrap_or_default(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 0),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!("WIKI_API_URL is not configured (set it in the environment or [wiki].api_url)");
        }
        Url::parse(&config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;
        let pairs = request_pairs(params);

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit(false);
            let response = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, false);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, false);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn request_json_post(&mut self, params: &[(&str, String)], is_write: bool) -> Result<Value> {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let pairs = request_pairs(params);

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            let response = self
                .client
                .post(&self.config.api_url)
                .header("User-Agent", self.config.user_agent.clone())
                .form(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        debug!(target: "addme", attempt, is_write, "retrying MediaWiki API request");
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    fn post_edit(&mut self, request: &AppendRequest) -> Result<Value> {
        let token = self.ensure_csrf_token()?;
        self.request_json_post(
            &[
                ("action", "edit".to_string()),
                ("title", request.title.clone()),
                ("section", request.section.to_string()),
                ("summary", request.summary.clone()),
                ("starttimestamp", request.start_timestamp.clone()),
                ("nocreate", "1".to_string()),
                ("watchlist", watchlist_value(request.watch).to_string()),
                ("appendtext", request.text.clone()),
                ("token", token),
            ],
            true,
        )
    }
}

impl WikiReadApi for MediaWikiClient {
    fn get_page_sources(&mut self, titles: &[String]) -> Result<Vec<PageSource>> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("prop", "revisions".to_string()),
            ("titles", titles.join("|")),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode page content API response")?;
        Ok(page_sources_from_query(parsed.query))
    }

    fn get_sections(&mut self, title: &str) -> Result<SectionListing> {
        let response = self.request_json_get(&[
            ("action", "parse".to_string()),
            ("prop", "sections".to_string()),
            ("page", title.to_string()),
            ("curtimestamp", "1".to_string()),
            ("uselang", crate::config::BASE_LANGUAGE.to_string()),
        ])?;
        let parsed: SectionsResponse =
            serde_json::from_value(response).context("failed to decode sections API response")?;
        Ok(section_listing_from_response(parsed))
    }

    fn render_page(&mut self, request: &RenderRequest) -> Result<RenderedPage> {
        let response = self.request_json_get(&[
            ("action", "parse".to_string()),
            ("prop", "text|revid".to_string()),
            ("page", request.page.clone()),
            ("uselang", request.language.clone()),
            ("useskin", request.skin.clone().unwrap_or_default()),
        ])?;
        let parsed: RenderResponse =
            serde_json::from_value(response).context("failed to decode parse API response")?;
        Ok(RenderedPage {
            title: parsed.parse.title,
            revision_id: parsed.parse.revid,
            html: parsed.parse.text,
        })
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiWriteApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn append_to_section(&mut self, request: &AppendRequest) -> Result<AppendOutcome> {
        let response = send_with_token_refresh(
            self,
            |client| client.csrf_token = None,
            |client| client.post_edit(request),
        )?;
        let parsed: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        append_outcome_from_edit(&request.title, parsed)
    }
}

/// Send a token-bearing request, re-sending it once after an expired token.
///
/// Any other failure, or a second `badtoken`, is returned as is.
fn send_with_token_refresh<S, T>(
    state: &mut S,
    clear_token: impl FnOnce(&mut S),
    mut send: impl FnMut(&mut S) -> Result<T>,
) -> Result<T> {
    match send(state) {
        Err(error) if find_api_error(&error).is_some_and(ApiError::is_bad_token) => {
            warn!(target: "addme", "edit token expired, fetching a new one");
            clear_token(state);
            send(state)
        }
        other => other,
    }
}

pub fn watchlist_value(watch: bool) -> &'static str {
    if watch { "watch" } else { "nochange" }
}

fn request_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        return Err(ApiError::from_payload(error).into());
    }
    Ok(payload)
}

fn page_sources_from_query(query: QueryPayload) -> Vec<PageSource> {
    let mut requested_by_served = BTreeMap::new();
    for rename in query.normalized {
        requested_by_served.insert(rename.to, rename.from);
    }

    query
        .pages
        .into_iter()
        .map(|page| {
            let slot = page
                .revisions
                .into_iter()
                .next()
                .and_then(|revision| revision.slots)
                .and_then(|slots| slots.main);
            let title = requested_by_served
                .get(&page.title)
                .cloned()
                .unwrap_or(page.title);
            PageSource {
                title,
                missing: page.missing || page.invalid,
                content_model: slot.as_ref().and_then(|slot| slot.contentmodel.clone()),
                content: slot.and_then(|slot| slot.content),
            }
        })
        .collect()
}

fn section_listing_from_response(response: SectionsResponse) -> SectionListing {
    let sections = response
        .parse
        .sections
        .into_iter()
        .filter_map(|item| match item.index.parse::<u32>() {
            Ok(index) => Some(Section {
                anchor: item.anchor,
                heading: item.line,
                level: item.toclevel,
                index,
            }),
            Err(_) => {
                debug!(target: "addme", index = %item.index, anchor = %item.anchor, "skipping transcluded section");
                None
            }
        })
        .collect();
    SectionListing {
        sections,
        timestamp: response.curtimestamp.unwrap_or_default(),
    }
}

fn append_outcome_from_edit(title: &str, response: EditResponse) -> Result<AppendOutcome> {
    let edit = response
        .edit
        .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
    if edit.result.as_deref() != Some("Success") {
        bail!(
            "MediaWiki edit failed for {}: {}",
            title,
            edit.result.unwrap_or_else(|| "unknown".to_string())
        );
    }
    Ok(AppendOutcome {
        new_revision_id: edit.newrevid,
        no_change: edit.nochange,
    })
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    normalized: Vec<NormalizedTitle>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct NormalizedTitle {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    contentmodel: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SectionsResponse {
    curtimestamp: Option<String>,
    parse: SectionsPayload,
}

#[derive(Debug, Deserialize)]
struct SectionsPayload {
    #[serde(default)]
    sections: Vec<SectionItem>,
}

#[derive(Debug, Deserialize)]
struct SectionItem {
    toclevel: u8,
    #[serde(default)]
    line: String,
    index: String,
    anchor: String,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    parse: RenderPayload,
}

#[derive(Debug, Deserialize)]
struct RenderPayload {
    title: String,
    revid: i64,
    text: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
    newrevid: Option<i64>,
    #[serde(default)]
    nochange: bool,
}
