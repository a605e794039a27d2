//! Context connectors and their trigger table.
//!
//! A connector turns free text into zero or more snippets to inject into the
//! prompt. Which connectors fire, and with what query, is decided by the
//! data in [`ConnectorRules`]; the connectors themselves only search.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// Longest query ever sent to a connector, in characters.
pub const MAX_QUERY_CHARS: usize = 128;

static WEATHER_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)weather (?:in|for|at)?\s*([a-zA-Z\s]+)").expect("valid weather regex")
});

static PRICE_SUBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)price of\s*([a-zA-Z]+)").expect("valid price regex"));

/// Words removed from free text before it is used as a search query.
pub const STOP_WORDS: &[&str] = &[
    "search", "the", "youtube", "for", "find", "me", "watch", "video", "videos", "on", "about",
    "play", "spotify", "song", "track", "music", "listen", "to", "channel", "playlist", "album",
    "artist", "github", "repo", "repository", "code", "issue", "pr", "unsplash", "stock", "photo",
    "picture", "image", "news", "weather", "wiki", "wikipedia", "price", "cost", "crypto",
];

/// The built-in connectors, in trigger order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorKind {
    YouTube,
    Spotify,
    GitHub,
    Unsplash,
    HackerNews,
    Weather,
    Wikipedia,
    CoinGecko,
}

impl ConnectorKind {
    /// Name shown in the injected block so the model can cite it.
    pub fn label(&self) -> &'static str {
        match self {
            Self::YouTube => "YouTube",
            Self::Spotify => "Spotify",
            Self::GitHub => "GitHub",
            Self::Unsplash => "Unsplash",
            Self::HackerNews => "Hacker News",
            Self::Weather => "Weather",
            Self::Wikipedia => "Wikipedia",
            Self::CoinGecko => "CoinGecko",
        }
    }

    /// Instruction line placed before the snippets.
    pub fn header(&self) -> &'static str {
        match self {
            Self::YouTube => {
                "I found the following YouTube results. Please present them to the user:"
            }
            Self::Spotify => {
                "I found the following Spotify results. Please present them to the user:"
            }
            Self::GitHub => {
                "I found the following GitHub results. Please summarize or present them:"
            }
            Self::Unsplash => {
                "I found the following stock photos. Display them to the user with credits:"
            }
            Self::HackerNews => "Top tech stories:",
            Self::Weather => "Current weather report:",
            Self::Wikipedia => "I found this info on Wikipedia:",
            Self::CoinGecko => "Current market price:",
        }
    }
}

impl std::fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Render one connector's results as a prompt block.
pub fn format_block(kind: ConnectorKind, snippets: &[String]) -> String {
    format!(
        "\n\n[System ({} Connector)]: {}\n{}",
        kind.label(),
        kind.header(),
        snippets.join("\n")
    )
}

/// A source of context snippets.
#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> ConnectorKind;

    /// Whether the connector's prerequisites (credentials, opt-in) are met.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Search for snippets. An empty result means nothing relevant.
    async fn search(&self, query: &str) -> Result<Vec<String>, ConnectorError>;
}

/// Phrase that activates a connector, matched against lowercased text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Substring anywhere in the text.
    Contains(&'static str),
    /// Whole whitespace-separated word.
    Word(&'static str),
    /// Text begins with the phrase.
    StartsWith(&'static str),
}

impl Trigger {
    fn matches(&self, lower: &str) -> bool {
        match self {
            Self::Contains(phrase) => lower.contains(phrase),
            Self::Word(word) => lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|w| w == *word),
            Self::StartsWith(phrase) => lower.starts_with(phrase),
        }
    }
}

/// How a connector's query is derived from the raw text.
#[derive(Debug, Clone)]
pub enum QueryRule {
    /// Raw text minus [`STOP_WORDS`].
    StopWords,
    /// First capture group of a case-insensitive pattern.
    Capture(Regex),
    /// Hacker News feed name: `new` when asked for new stories, else `top`.
    NewsFeed,
}

/// One row of the trigger table.
#[derive(Debug, Clone)]
pub struct ConnectorRule {
    pub kind: ConnectorKind,
    pub triggers: Vec<Trigger>,
    pub query: QueryRule,
    /// Queries this short or shorter are not worth sending.
    pub min_query_chars: usize,
}

impl ConnectorRule {
    pub fn is_triggered(&self, lower: &str) -> bool {
        self.triggers.iter().any(|t| t.matches(lower))
    }

    /// Extract the bounded query, or `None` when nothing usable remains.
    pub fn extract_query(&self, raw: &str) -> Option<String> {
        let query = match &self.query {
            QueryRule::StopWords => strip_stop_words(raw),
            QueryRule::Capture(pattern) => pattern
                .captures(raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())?,
            QueryRule::NewsFeed => {
                let lower = raw.to_lowercase();
                let wants_new = lower
                    .split(|c: char| !c.is_alphanumeric())
                    .any(|w| w == "new" || w == "newest" || w == "latest");
                if wants_new { "new" } else { "top" }.to_string()
            }
        };

        let query = bound_query(&query);
        (query.chars().count() > self.min_query_chars).then_some(query)
    }
}

/// Remove stop words, keeping the original casing of the rest.
pub fn strip_stop_words(raw: &str) -> String {
    raw.split_whitespace()
        .filter(|w| !STOP_WORDS.contains(&w.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trim and cap a query at [`MAX_QUERY_CHARS`] characters.
pub fn bound_query(query: &str) -> String {
    query.trim().chars().take(MAX_QUERY_CHARS).collect::<String>().trim_end().to_string()
}

/// The trigger table, in evaluation order.
#[derive(Debug, Clone)]
pub struct ConnectorRules {
    rules: Vec<ConnectorRule>,
}

impl Default for ConnectorRules {
    fn default() -> Self {
        use Trigger::*;

        let rules = vec![
            ConnectorRule {
                kind: ConnectorKind::YouTube,
                triggers: vec![
                    Contains("youtube"),
                    Contains("video"),
                    Contains("watch"),
                    Contains("channel"),
                ],
                query: QueryRule::StopWords,
                min_query_chars: 1,
            },
            ConnectorRule {
                kind: ConnectorKind::Spotify,
                triggers: vec![
                    Contains("spotify"),
                    Contains("song"),
                    Contains("music"),
                    Contains("play"),
                    Contains("artist"),
                    Contains("album"),
                ],
                query: QueryRule::StopWords,
                min_query_chars: 1,
            },
            ConnectorRule {
                kind: ConnectorKind::GitHub,
                triggers: vec![
                    Contains("github"),
                    Contains("repo"),
                    Contains("issue"),
                    Word("pr"),
                ],
                query: QueryRule::StopWords,
                min_query_chars: 1,
            },
            ConnectorRule {
                kind: ConnectorKind::Unsplash,
                triggers: vec![
                    Contains("unsplash"),
                    Contains("stock photo"),
                    Contains("wallpaper"),
                    Contains("picture of"),
                ],
                query: QueryRule::StopWords,
                min_query_chars: 1,
            },
            ConnectorRule {
                kind: ConnectorKind::HackerNews,
                triggers: vec![Contains("hacker news"), Contains("tech news")],
                query: QueryRule::NewsFeed,
                min_query_chars: 0,
            },
            ConnectorRule {
                kind: ConnectorKind::Weather,
                triggers: vec![Contains("weather")],
                query: QueryRule::Capture(WEATHER_LOCATION.clone()),
                min_query_chars: 0,
            },
            ConnectorRule {
                kind: ConnectorKind::Wikipedia,
                triggers: vec![
                    Contains("wiki"),
                    StartsWith("what is"),
                    StartsWith("who is"),
                ],
                query: QueryRule::StopWords,
                min_query_chars: 2,
            },
            ConnectorRule {
                kind: ConnectorKind::CoinGecko,
                triggers: vec![Contains("price of"), Contains("crypto")],
                query: QueryRule::Capture(PRICE_SUBJECT.clone()),
                min_query_chars: 0,
            },
        ];

        Self { rules }
    }
}

impl ConnectorRules {
    pub fn new(rules: Vec<ConnectorRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ConnectorRule] {
        &self.rules
    }

    /// Rules triggered by `raw`, in table order, with their queries.
    pub fn triggered(&self, raw: &str) -> Vec<(ConnectorKind, String)> {
        let lower = raw.to_lowercase();
        self.rules
            .iter()
            .filter(|rule| rule.is_triggered(&lower))
            .filter_map(|rule| rule.extract_query(raw).map(|q| (rule.kind, q)))
            .collect()
    }
}
