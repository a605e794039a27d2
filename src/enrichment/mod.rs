//! Enrichment pipeline.
//!
//! Turns raw user input into the prompt that is actually sent, plus an
//! optional model override. A recognized slash command takes the command
//! path; anything else takes the connector path, where triggered
//! connectors append context blocks. The two paths never combine.

pub mod commands;
pub mod connectors;
pub mod sources;

use std::sync::Arc;

pub use commands::{CommandAction, CommandCategory, CommandDef, CommandOutcome, CommandTable};
pub use connectors::{Connector, ConnectorKind, ConnectorRule, ConnectorRules, QueryRule, Trigger};
pub use sources::{
    CoinGeckoConnector, GitHubConnector, HackerNewsConnector, SpotifyConnector, UnsplashConnector,
    WeatherConnector, WikipediaConnector, YouTubeConnector,
};

use crate::config::ConnectorSettings;

/// Output of [`Enricher::enrich`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub prompt: String,
    /// Models to target instead of the user's selection.
    pub model_override: Option<Vec<String>>,
    pub force_grounding: bool,
    /// Name of the command applied, if any.
    pub command: Option<String>,
    /// Connectors whose blocks were appended, in order.
    pub connectors_used: Vec<ConnectorKind>,
    /// A command was typed without the input it needs; show this instead
    /// of sending anything.
    pub usage_hint: Option<String>,
}

impl Enrichment {
    /// Raw text passed through untouched.
    pub fn passthrough(raw: &str) -> Self {
        Self {
            prompt: raw.to_string(),
            model_override: None,
            force_grounding: false,
            command: None,
            connectors_used: Vec::new(),
            usage_hint: None,
        }
    }
}

/// Runs the command table and the connector table over user input.
pub struct Enricher {
    commands: CommandTable,
    rules: ConnectorRules,
    connectors: Vec<Arc<dyn Connector>>,
}

impl Default for Enricher {
    fn default() -> Self {
        Self::new(CommandTable::default(), ConnectorRules::default())
    }
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("commands", &self.commands.commands().len())
            .field("rules", &self.rules.rules().len())
            .field(
                "connectors",
                &self.connectors.iter().map(|c| c.kind()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Enricher {
    /// An enricher with the given tables and no connectors registered.
    pub fn new(commands: CommandTable, rules: ConnectorRules) -> Self {
        Self {
            commands,
            rules,
            connectors: Vec::new(),
        }
    }

    /// Default tables and every HTTP connector.
    pub fn from_settings(settings: &ConnectorSettings) -> Self {
        Self::default()
            .with_connector(Arc::new(YouTubeConnector::new(
                settings.youtube_api_key.clone(),
            )))
            .with_connector(Arc::new(SpotifyConnector::new(
                settings.spotify_access_token.clone(),
            )))
            .with_connector(Arc::new(GitHubConnector::new(
                settings.github_enabled,
                settings.github_token.clone(),
            )))
            .with_connector(Arc::new(UnsplashConnector::new(
                settings.unsplash_access_key.clone(),
            )))
            .with_connector(Arc::new(HackerNewsConnector::default()))
            .with_connector(Arc::new(WeatherConnector::default()))
            .with_connector(Arc::new(WikipediaConnector::default()))
            .with_connector(Arc::new(CoinGeckoConnector::default()))
    }

    /// Register a connector. A later connector of the same kind replaces
    /// the earlier one.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        let kind = connector.kind();
        self.connectors.retain(|c| c.kind() != kind);
        self.connectors.push(connector);
        self
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    fn connector(&self, kind: ConnectorKind) -> Option<&Arc<dyn Connector>> {
        self.connectors.iter().find(|c| c.kind() == kind)
    }

    /// Enrich one turn of user input. Never fails: connector errors are
    /// logged and that connector contributes nothing.
    pub async fn enrich(&self, raw: &str) -> Enrichment {
        if let Some(outcome) = self.commands.apply(raw) {
            tracing::debug!(command = %outcome.command, "Applied command");
            return Enrichment {
                prompt: outcome.prompt,
                model_override: outcome.model_override,
                force_grounding: outcome.force_grounding,
                command: Some(outcome.command),
                connectors_used: Vec::new(),
                usage_hint: outcome.usage_hint,
            };
        }

        let mut enrichment = Enrichment::passthrough(raw);

        for (kind, query) in self.rules.triggered(raw) {
            let Some(connector) = self.connector(kind) else {
                continue;
            };
            if !connector.is_enabled() {
                tracing::debug!(connector = %kind, "Connector triggered but not enabled");
                continue;
            }

            match connector.search(&query).await {
                Ok(snippets) if snippets.is_empty() => {
                    tracing::debug!(connector = %kind, "Connector returned no results");
                }
                Ok(snippets) => {
                    tracing::info!(connector = %kind, results = snippets.len(), "Connector added context");
                    enrichment
                        .prompt
                        .push_str(&connectors::format_block(kind, &snippets));
                    enrichment.connectors_used.push(kind);
                }
                Err(e) => {
                    tracing::warn!(connector = %kind, error = %e, "Connector failed, skipping");
                }
            }
        }

        enrichment
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::ConnectorError;
    use crate::llm::catalog::IMAGE_MODEL;

    struct FakeConnector {
        kind: ConnectorKind,
        enabled: bool,
        result: Result<Vec<String>, String>,
        queries: Mutex<Vec<String>>,
    }

    impl FakeConnector {
        fn new(kind: ConnectorKind, result: Result<Vec<String>, String>) -> Self {
            Self {
                kind,
                enabled: true,
                result,
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        fn kind(&self) -> ConnectorKind {
            self.kind
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn search(&self, query: &str) -> Result<Vec<String>, ConnectorError> {
            self.queries.lock().unwrap().push(query.to_string());
            self.result
                .clone()
                .map_err(|reason| ConnectorError::RequestFailed {
                    connector: self.kind.label().to_string(),
                    reason,
                })
        }
    }

    #[tokio::test]
    async fn test_command_path_skips_connectors() {
        let weather = Arc::new(FakeConnector::new(
            ConnectorKind::Weather,
            Ok(vec!["sunny".to_string()]),
        ));
        let enricher = Enricher::default().with_connector(weather.clone());

        let enrichment = enricher.enrich("/image weather in Cairo").await;
        assert_eq!(enrichment.prompt, "weather in Cairo");
        assert_eq!(enrichment.model_override, Some(vec![IMAGE_MODEL.to_string()]));
        assert_eq!(enrichment.command.as_deref(), Some("image"));
        assert!(weather.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connector_block_appended() {
        let weather = Arc::new(FakeConnector::new(
            ConnectorKind::Weather,
            Ok(vec!["Location: Cairo, Egypt".to_string()]),
        ));
        let enricher = Enricher::default().with_connector(weather.clone());

        let enrichment = enricher.enrich("what's the weather in Cairo").await;
        assert_eq!(
            enrichment.prompt,
            "what's the weather in Cairo\n\n[System (Weather Connector)]: Current weather report:\nLocation: Cairo, Egypt"
        );
        assert_eq!(enrichment.connectors_used, vec![ConnectorKind::Weather]);
        assert_eq!(*weather.queries.lock().unwrap(), vec!["Cairo".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_connector_leaves_prompt_unchanged() {
        let weather = Arc::new(FakeConnector::new(
            ConnectorKind::Weather,
            Err("connection refused".to_string()),
        ));
        let enricher = Enricher::default().with_connector(weather);

        let enrichment = enricher.enrich("what's the weather in Cairo").await;
        assert_eq!(enrichment, Enrichment::passthrough("what's the weather in Cairo"));
    }

    #[tokio::test]
    async fn test_disabled_connector_not_called() {
        let mut youtube = FakeConnector::new(ConnectorKind::YouTube, Ok(vec!["x".to_string()]));
        youtube.enabled = false;
        let youtube = Arc::new(youtube);
        let enricher = Enricher::default().with_connector(youtube.clone());

        let enrichment = enricher.enrich("youtube rust talks").await;
        assert_eq!(enrichment.prompt, "youtube rust talks");
        assert!(youtube.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_music_request_asks_spotify() {
        let spotify = Arc::new(FakeConnector::new(
            ConnectorKind::Spotify,
            Ok(vec!["Tracks:".to_string(), "- One More Time by Daft Punk".to_string()]),
        ));
        let enricher = Enricher::default().with_connector(spotify.clone());

        let enrichment = enricher.enrich("play some Daft Punk").await;
        assert_eq!(
            enrichment.prompt,
            "play some Daft Punk\n\n[System (Spotify Connector)]: I found the following Spotify results. \
             Please present them to the user:\nTracks:\n- One More Time by Daft Punk"
        );
        assert_eq!(*spotify.queries.lock().unwrap(), vec!["some Daft Punk".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_results_add_no_block() {
        let wiki = Arc::new(FakeConnector::new(ConnectorKind::Wikipedia, Ok(Vec::new())));
        let enricher = Enricher::default().with_connector(wiki.clone());

        let enrichment = enricher.enrich("who is Ada Lovelace").await;
        assert_eq!(enrichment.prompt, "who is Ada Lovelace");
        assert_eq!(wiki.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blocks_follow_trigger_order() {
        let enricher = Enricher::default()
            .with_connector(Arc::new(FakeConnector::new(
                ConnectorKind::Wikipedia,
                Ok(vec!["wiki hit".to_string()]),
            )))
            .with_connector(Arc::new(FakeConnector::new(
                ConnectorKind::CoinGecko,
                Ok(vec!["BTC: USD $1".to_string()]),
            )));

        let enrichment = enricher.enrich("what is the price of btc").await;
        assert_eq!(
            enrichment.connectors_used,
            vec![ConnectorKind::Wikipedia, ConnectorKind::CoinGecko]
        );
        let wiki_at = enrichment.prompt.find("Wikipedia Connector").unwrap();
        let coin_at = enrichment.prompt.find("CoinGecko Connector").unwrap();
        assert!(wiki_at < coin_at);
    }

    #[tokio::test]
    async fn test_unknown_command_takes_connector_path() {
        let enricher = Enricher::default();
        let enrichment = enricher.enrich("/nope hello").await;
        assert_eq!(enrichment, Enrichment::passthrough("/nope hello"));
    }

    #[test]
    fn test_from_settings_registers_all_connectors() {
        let enricher = Enricher::from_settings(&ConnectorSettings::default());
        assert_eq!(enricher.connectors.len(), 8);
        assert!(!enricher.connector(ConnectorKind::YouTube).unwrap().is_enabled());
        assert!(!enricher.connector(ConnectorKind::Spotify).unwrap().is_enabled());
        assert!(!enricher.connector(ConnectorKind::GitHub).unwrap().is_enabled());
        assert!(enricher.connector(ConnectorKind::Weather).unwrap().is_enabled());
    }
}
