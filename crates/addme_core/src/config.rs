use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "addme/0.2";
pub const DEFAULT_ARTICLE_PATH: &str = "/wiki/$1";
pub const DEFAULT_CONFIG_PAGE: &str = "User:MusikAnimal/AddMe-config";
pub const DEFAULT_MESSAGES_PAGE: &str = "User:MusikAnimal/AddMe-messages";
pub const BASE_LANGUAGE: &str = "en";

/// Characters a page title keeps verbatim in an article path.
const WIKI_TITLE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b';')
    .remove(b'@')
    .remove(b'$')
    .remove(b',')
    .remove(b'/')
    .remove(b':');

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AddMeConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub gadget: GadgetSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub url: Option<String>,
    pub api_url: Option<String>,
    pub article_path: Option<String>,
    pub user_agent: Option<String>,
}

/// Where the wiki-hosted gadget configuration lives and how it is presented.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct GadgetSection {
    pub config_page: Option<String>,
    pub messages_page: Option<String>,
    pub user_language: Option<String>,
    pub skin: Option<String>,
}

impl AddMeConfig {
    /// Resolve the wiki API URL with owned return: env > config > None.
    pub fn api_url_owned(&self) -> Option<String> {
        env_override("WIKI_API_URL").or_else(|| self.wiki.api_url.clone())
    }

    /// Resolve the wiki base URL: env WIKI_URL > config > derived from api_url.
    pub fn wiki_url(&self) -> Option<String> {
        if let Some(value) = env_override("WIKI_URL") {
            return Some(value);
        }
        if let Some(ref url) = self.wiki.url {
            return Some(url.clone());
        }
        self.api_url_owned().and_then(|api| derive_wiki_url(&api))
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn article_path(&self) -> &str {
        self.wiki
            .article_path
            .as_deref()
            .unwrap_or(DEFAULT_ARTICLE_PATH)
    }

    /// Resolve article path with env override (owned).
    pub fn article_path_owned(&self) -> String {
        env_override("WIKI_ARTICLE_PATH").unwrap_or_else(|| self.article_path().to_string())
    }

    pub fn config_page(&self) -> &str {
        self.gadget
            .config_page
            .as_deref()
            .unwrap_or(DEFAULT_CONFIG_PAGE)
    }

    pub fn messages_page(&self) -> &str {
        self.gadget
            .messages_page
            .as_deref()
            .unwrap_or(DEFAULT_MESSAGES_PAGE)
    }

    /// Resolve interface language: env ADDME_USER_LANGUAGE > config > BASE_LANGUAGE.
    pub fn user_language(&self) -> String {
        env_override("ADDME_USER_LANGUAGE")
            .or_else(|| self.gadget.user_language.clone())
            .unwrap_or_else(|| BASE_LANGUAGE.to_string())
    }

    pub fn skin(&self) -> Option<String> {
        self.gadget
            .skin
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    }
}

/// Load and parse an AddMeConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<AddMeConfig> {
    if !config_path.exists() {
        return Ok(AddMeConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: AddMeConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Derive wiki base URL from an API URL by stripping `/api.php` or `/w/api.php`.
pub fn derive_wiki_url(api_url: &str) -> Option<String> {
    let trimmed = api_url.trim();
    let stripped = trimmed
        .strip_suffix("/w/api.php")
        .or_else(|| trimmed.strip_suffix("/api.php"))
        .unwrap_or(trimmed);
    let result = stripped.trim_end_matches('/').to_string();
    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

/// Absolute URL for viewing `title`, encoded like `mw.util.wikiUrlencode`.
pub fn article_url(wiki_url: &str, article_path: &str, title: &str) -> Option<String> {
    let underscored = title.trim().replace(' ', "_");
    if underscored.is_empty() {
        return None;
    }
    let encoded = utf8_percent_encode(&underscored, WIKI_TITLE).to_string();
    let path = if article_path.contains("$1") {
        article_path.replace("$1", &encoded)
    } else {
        format!("{}/{encoded}", article_path.trim_end_matches('/'))
    };
    let raw = format!("{}{path}", wiki_url.trim_end_matches('/'));
    Url::parse(&raw).ok().map(String::from)
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_no_urls() {
        let config = AddMeConfig::default();
        assert!(config.wiki.url.is_none());
        assert!(config.wiki.api_url.is_none());
        assert!(config.gadget.config_page.is_none());
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert!(config.wiki.url.is_none());
        assert_eq!(config.config_page(), DEFAULT_CONFIG_PAGE);
        assert_eq!(config.messages_page(), DEFAULT_MESSAGES_PAGE);
    }

    #[test]
    fn load_config_parses_wiki_and_gadget_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[wiki]
url = "https://meta.example.org"
api_url = "https://meta.example.org/w/api.php"
article_path = "/wiki/$1"
user_agent = "test-agent/1.0"

[gadget]
config_page = "MediaWiki:Gadget-AddMe-config.json"
messages_page = "MediaWiki:Gadget-AddMe-messages"
user_language = "fr"
skin = "vector-2022"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.wiki.url.as_deref(), Some("https://meta.example.org"));
        assert_eq!(
            config.wiki.api_url.as_deref(),
            Some("https://meta.example.org/w/api.php")
        );
        assert_eq!(config.wiki.user_agent.as_deref(), Some("test-agent/1.0"));
        assert_eq!(config.config_page(), "MediaWiki:Gadget-AddMe-config.json");
        assert_eq!(config.messages_page(), "MediaWiki:Gadget-AddMe-messages");
        assert_eq!(config.gadget.user_language.as_deref(), Some("fr"));
        assert_eq!(config.skin().as_deref(), Some("vector-2022"));
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[paths]\nproject_root = \"/foo\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.wiki.url.is_none());
        assert!(config.skin().is_none());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wiki\nurl = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn derive_wiki_url_strips_api_php() {
        assert_eq!(
            derive_wiki_url("https://wiki.example.org/api.php"),
            Some("https://wiki.example.org".to_string())
        );
        assert_eq!(
            derive_wiki_url("https://wiki.example.org/w/api.php"),
            Some("https://wiki.example.org".to_string())
        );
        assert_eq!(derive_wiki_url("   "), None);
    }

    #[test]
    fn article_url_substitutes_and_encodes_title() {
        assert_eq!(
            article_url(
                "https://meta.example.org",
                "/wiki/$1",
                "Community Wishlist Survey/Proposal"
            )
            .as_deref(),
            Some("https://meta.example.org/wiki/Community_Wishlist_Survey/Proposal")
        );
        assert_eq!(
            article_url("https://meta.example.org/", "/$1", "Café").as_deref(),
            Some("https://meta.example.org/Caf%C3%A9")
        );
        assert_eq!(article_url("https://meta.example.org", "/wiki/$1", " "), None);
    }

    #[test]
    fn article_url_escapes_query_and_reserved_characters() {
        let url = article_url("https://meta.example.org", "/wiki/$1", "Survey/Is this useful?")
            .expect("url");
        assert_eq!(url, "https://meta.example.org/wiki/Survey/Is_this_useful%3F");
        let parsed = reqwest::Url::parse(&url).expect("parse");
        assert_eq!(parsed.query(), None);

        assert_eq!(
            article_url("https://meta.example.org", "/wiki/$1", "A&B+C 100%").as_deref(),
            Some("https://meta.example.org/wiki/A%26B%2BC_100%25")
        );
        assert_eq!(
            article_url("https://meta.example.org", "/wiki/$1", "Meta talk:AddMe (old)").as_deref(),
            Some("https://meta.example.org/wiki/Meta_talk:AddMe_(old)")
        );
    }

    #[test]
    fn skin_ignores_blank_values() {
        let config = AddMeConfig {
            gadget: GadgetSection {
                skin: Some("  ".to_string()),
                ..GadgetSection::default()
            },
            ..AddMeConfig::default()
        };
        assert!(config.skin().is_none());
    }
}
