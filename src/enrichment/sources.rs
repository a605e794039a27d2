//! HTTP-backed connectors.
//!
//! Each connector owns its base URL so tests can point it at a local
//! server. Response bodies are parsed into typed structs and rendered as
//! markdown snippets.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::enrichment::connectors::{Connector, ConnectorKind};
use crate::error::ConnectorError;

/// Client shared by the connectors: short timeout, no retries.
fn connector_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(concat!("omnichat/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

async fn get_json<T: DeserializeOwned>(
    kind: ConnectorKind,
    request: reqwest::RequestBuilder,
) -> Result<T, ConnectorError> {
    let response = request
        .send()
        .await
        .map_err(|e| ConnectorError::RequestFailed {
            connector: kind.label().to_string(),
            reason: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ConnectorError::RequestFailed {
            connector: kind.label().to_string(),
            reason: format!("HTTP {}", status),
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ConnectorError::InvalidResponse {
            connector: kind.label().to_string(),
            reason: e.to_string(),
        })
}

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

fn enc(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

// ── YouTube ────────────────────────────────────────────────────────────

/// YouTube Data API search. Requires an API key.
#[derive(Debug, Clone)]
pub struct YouTubeConnector {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
}

impl YouTubeConnector {
    pub fn new(api_key: Option<SecretString>) -> Self {
        Self {
            client: connector_client(),
            api_key,
            base_url: "https://www.googleapis.com/youtube/v3".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Connector for YouTubeConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::YouTube
    }

    fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, ConnectorError> {
        let Some(key) = &self.api_key else {
            return Err(ConnectorError::NotConfigured {
                connector: self.kind().label().to_string(),
            });
        };
        let url = format!(
            "{}/search?part=snippet&maxResults=5&type=video,channel,playlist&q={}&key={}",
            self.base_url,
            enc(query),
            enc(key.expose_secret())
        );
        let response: YouTubeSearch = get_json(self.kind(), self.client.get(url)).await?;
        Ok(youtube_snippets(response))
    }
}

#[derive(Debug, Deserialize)]
struct YouTubeSearch {
    #[serde(default)]
    items: Vec<YouTubeItem>,
}

#[derive(Debug, Deserialize)]
struct YouTubeItem {
    id: YouTubeId,
    snippet: YouTubeSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YouTubeId {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    video_id: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    playlist_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YouTubeSnippet {
    title: String,
    #[serde(default)]
    channel_title: String,
}

fn youtube_snippets(response: YouTubeSearch) -> Vec<String> {
    response
        .items
        .into_iter()
        .map(|item| {
            let kind = item
                .id
                .kind
                .as_deref()
                .and_then(|k| k.split('#').nth(1))
                .unwrap_or("video")
                .to_string();
            let link = match kind.as_str() {
                "channel" => item
                    .id
                    .channel_id
                    .map(|id| format!("https://www.youtube.com/channel/{}", id)),
                "playlist" => item
                    .id
                    .playlist_id
                    .map(|id| format!("https://www.youtube.com/playlist?list={}", id)),
                _ => item
                    .id
                    .video_id
                    .map(|id| format!("https://www.youtube.com/watch?v={}", id)),
            }
            .unwrap_or_default();
            format!(
                "- [{}] {} by {} ({})",
                kind.to_uppercase(),
                item.snippet.title,
                item.snippet.channel_title,
                link
            )
        })
        .collect()
}

// ── Spotify ────────────────────────────────────────────────────────────

/// Spotify catalog search. Requires a user access token obtained elsewhere.
#[derive(Debug, Clone)]
pub struct SpotifyConnector {
    client: reqwest::Client,
    access_token: Option<SecretString>,
    base_url: String,
}

impl SpotifyConnector {
    pub fn new(access_token: Option<SecretString>) -> Self {
        Self {
            client: connector_client(),
            access_token,
            base_url: "https://api.spotify.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Connector for SpotifyConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Spotify
    }

    fn is_enabled(&self) -> bool {
        self.access_token.is_some()
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, ConnectorError> {
        let Some(token) = &self.access_token else {
            return Err(ConnectorError::NotConfigured {
                connector: self.kind().label().to_string(),
            });
        };
        let url = format!(
            "{}/v1/search?q={}&type=track,artist,album,playlist&limit=3",
            self.base_url,
            enc(query)
        );
        let request = self.client.get(url).bearer_auth(token.expose_secret());
        let response: SpotifySearch = get_json(self.kind(), request).await?;
        Ok(spotify_snippets(response))
    }
}

#[derive(Debug, Deserialize)]
struct SpotifySearch {
    #[serde(default)]
    tracks: Option<SpotifyPage<SpotifyTrack>>,
    #[serde(default)]
    artists: Option<SpotifyPage<SpotifyArtist>>,
    #[serde(default)]
    playlists: Option<SpotifyPage<SpotifyPlaylist>>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct SpotifyPage<T> {
    // Playlist pages may contain nulls.
    #[serde(default)]
    items: Vec<Option<T>>,
}

impl<T> SpotifyPage<T> {
    fn into_items(page: Option<Self>) -> Vec<T> {
        page.map(|p| p.items.into_iter().flatten().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct SpotifyUrls {
    #[serde(default)]
    spotify: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    external_urls: SpotifyUrls,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
    #[serde(default)]
    external_urls: Option<SpotifyUrls>,
}

#[derive(Debug, Deserialize)]
struct SpotifyOwner {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyPlaylist {
    name: String,
    owner: SpotifyOwner,
    external_urls: SpotifyUrls,
}

/// Grouped under `Tracks:`, `Artists:` and `Playlists:` headings; empty
/// groups are left out.
fn spotify_snippets(response: SpotifySearch) -> Vec<String> {
    let mut lines = Vec::new();

    let tracks = SpotifyPage::into_items(response.tracks);
    if !tracks.is_empty() {
        lines.push("Tracks:".to_string());
        lines.extend(tracks.into_iter().map(|track| {
            let artist = track.artists.first().map(|a| a.name.as_str()).unwrap_or("Unknown");
            format!(
                "- {} by {} (Link: {})",
                track.name, artist, track.external_urls.spotify
            )
        }));
    }

    let artists = SpotifyPage::into_items(response.artists);
    if !artists.is_empty() {
        lines.push("Artists:".to_string());
        lines.extend(artists.into_iter().map(|artist| {
            let link = artist.external_urls.map(|u| u.spotify).unwrap_or_default();
            format!("- {} (Link: {})", artist.name, link)
        }));
    }

    let playlists = SpotifyPage::into_items(response.playlists);
    if !playlists.is_empty() {
        lines.push("Playlists:".to_string());
        lines.extend(playlists.into_iter().map(|playlist| {
            format!(
                "- {} by {} (Link: {})",
                playlist.name,
                playlist.owner.display_name.as_deref().unwrap_or("Unknown"),
                playlist.external_urls.spotify
            )
        }));
    }

    lines
}

// ── GitHub ─────────────────────────────────────────────────────────────

/// GitHub search. Must be switched on; a token raises rate limits.
#[derive(Debug, Clone)]
pub struct GitHubConnector {
    client: reqwest::Client,
    enabled: bool,
    token: Option<SecretString>,
    base_url: String,
}

impl GitHubConnector {
    pub fn new(enabled: bool, token: Option<SecretString>) -> Self {
        Self {
            client: connector_client(),
            enabled,
            token,
            base_url: "https://api.github.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Connector for GitHubConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::GitHub
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, ConnectorError> {
        let scope = if query.to_lowercase().contains("issue") {
            "issues"
        } else {
            "repositories"
        };
        let url = format!(
            "{}/search/{}?q={}&per_page=3",
            self.base_url,
            scope,
            enc(query)
        );
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {}", token.expose_secret()));
        }
        let response: GitHubSearch = get_json(self.kind(), request).await?;
        Ok(github_snippets(response))
    }
}

#[derive(Debug, Deserialize)]
struct GitHubSearch {
    #[serde(default)]
    items: Vec<GitHubItem>,
}

#[derive(Debug, Deserialize)]
struct GitHubItem {
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

fn github_snippets(response: GitHubSearch) -> Vec<String> {
    response
        .items
        .into_iter()
        .map(|item| {
            let name = item.full_name.or(item.title).unwrap_or_default();
            let description: String = item
                .description
                .unwrap_or_default()
                .chars()
                .take(100)
                .collect();
            format!(
                "- [Repo/Issue] {} ({}) - {}...",
                name,
                item.html_url.unwrap_or_default(),
                description
            )
        })
        .collect()
}

// ── Unsplash ───────────────────────────────────────────────────────────

/// Unsplash photo search. Requires an access key.
#[derive(Debug, Clone)]
pub struct UnsplashConnector {
    client: reqwest::Client,
    access_key: Option<SecretString>,
    base_url: String,
}

impl UnsplashConnector {
    pub fn new(access_key: Option<SecretString>) -> Self {
        Self {
            client: connector_client(),
            access_key,
            base_url: "https://api.unsplash.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Connector for UnsplashConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Unsplash
    }

    fn is_enabled(&self) -> bool {
        self.access_key.is_some()
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, ConnectorError> {
        let Some(key) = &self.access_key else {
            return Err(ConnectorError::NotConfigured {
                connector: self.kind().label().to_string(),
            });
        };
        let url = format!(
            "{}/search/photos?query={}&per_page=5",
            self.base_url,
            enc(query)
        );
        let request = self
            .client
            .get(url)
            .header("Authorization", format!("Client-ID {}", key.expose_secret()));
        let response: UnsplashSearch = get_json(self.kind(), request).await?;
        Ok(unsplash_snippets(response))
    }
}

#[derive(Debug, Deserialize)]
struct UnsplashSearch {
    #[serde(default)]
    results: Vec<UnsplashPhoto>,
}

#[derive(Debug, Deserialize)]
struct UnsplashPhoto {
    #[serde(default)]
    alt_description: Option<String>,
    urls: UnsplashUrls,
    user: UnsplashUser,
}

#[derive(Debug, Deserialize)]
struct UnsplashUrls {
    regular: String,
}

#[derive(Debug, Deserialize)]
struct UnsplashUser {
    name: String,
    links: UnsplashLinks,
}

#[derive(Debug, Deserialize)]
struct UnsplashLinks {
    html: String,
}

fn unsplash_snippets(response: UnsplashSearch) -> Vec<String> {
    response
        .results
        .into_iter()
        .map(|photo| {
            format!(
                "![{}]({})\n*Photo by [{}]({}) on Unsplash*\n",
                photo.alt_description.as_deref().unwrap_or("Image"),
                photo.urls.regular,
                photo.user.name,
                photo.user.links.html
            )
        })
        .collect()
}

// ── Hacker News ────────────────────────────────────────────────────────

/// Hacker News top or new stories. The query names the feed.
#[derive(Debug, Clone)]
pub struct HackerNewsConnector {
    client: reqwest::Client,
    base_url: String,
    limit: usize,
}

impl Default for HackerNewsConnector {
    fn default() -> Self {
        Self {
            client: connector_client(),
            base_url: "https://hacker-news.firebaseio.com/v0".to_string(),
            limit: 5,
        }
    }
}

impl HackerNewsConnector {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Connector for HackerNewsConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::HackerNews
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, ConnectorError> {
        let feed = if query == "new" { "newstories" } else { "topstories" };
        let ids: Vec<u64> = get_json(
            self.kind(),
            self.client.get(format!("{}/{}.json", self.base_url, feed)),
        )
        .await?;

        let fetches = ids.into_iter().take(self.limit).map(|id| {
            let request = self.client.get(format!("{}/item/{}.json", self.base_url, id));
            get_json::<HackerNewsItem>(self.kind(), request)
        });
        let stories = futures::future::join_all(fetches).await;

        Ok(stories
            .into_iter()
            .filter_map(Result::ok)
            .map(|item| {
                format!(
                    "- {} (Score: {}, By: {}) - {}",
                    item.title,
                    item.score,
                    item.by,
                    item.url.unwrap_or_default()
                )
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct HackerNewsItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    by: String,
    #[serde(default)]
    url: Option<String>,
}

// ── Weather ────────────────────────────────────────────────────────────

/// Open-Meteo geocoding and forecast. No credentials needed.
#[derive(Debug, Clone)]
pub struct WeatherConnector {
    client: reqwest::Client,
    geocoding_url: String,
    forecast_url: String,
}

impl Default for WeatherConnector {
    fn default() -> Self {
        Self {
            client: connector_client(),
            geocoding_url: "https://geocoding-api.open-meteo.com/v1".to_string(),
            forecast_url: "https://api.open-meteo.com/v1".to_string(),
        }
    }
}

impl WeatherConnector {
    /// Serve both geocoding and forecast from one base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        self.geocoding_url = base.clone();
        self.forecast_url = base;
        self
    }
}

#[async_trait]
impl Connector for WeatherConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Weather
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, ConnectorError> {
        let url = format!(
            "{}/search?name={}&count=1&language=en&format=json",
            self.geocoding_url,
            enc(query)
        );
        let geo: Geocoding = get_json(self.kind(), self.client.get(url)).await?;
        let Some(place) = geo.results.into_iter().next() else {
            return Ok(Vec::new());
        };

        let url = format!(
            "{}/forecast?latitude={}&longitude={}&current=temperature_2m,wind_speed_10m&daily=temperature_2m_max,temperature_2m_min&timezone=auto",
            self.forecast_url, place.latitude, place.longitude
        );
        let forecast: Forecast = get_json(self.kind(), self.client.get(url)).await?;
        Ok(weather_snippets(&place, &forecast))
    }
}

#[derive(Debug, Deserialize)]
struct Geocoding {
    #[serde(default)]
    results: Vec<Place>,
}

#[derive(Debug, Deserialize)]
struct Place {
    name: String,
    #[serde(default)]
    country: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct Forecast {
    current: CurrentWeather,
    daily: DailyWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature_2m: f64,
    wind_speed_10m: f64,
}

#[derive(Debug, Deserialize)]
struct DailyWeather {
    #[serde(default)]
    temperature_2m_max: Vec<f64>,
    #[serde(default)]
    temperature_2m_min: Vec<f64>,
}

fn weather_snippets(place: &Place, forecast: &Forecast) -> Vec<String> {
    let mut lines = vec![
        format!("Location: {}, {}", place.name, place.country),
        format!(
            "Current: {}°C, Wind: {}km/h",
            forecast.current.temperature_2m, forecast.current.wind_speed_10m
        ),
    ];
    if let (Some(max), Some(min)) = (
        forecast.daily.temperature_2m_max.first(),
        forecast.daily.temperature_2m_min.first(),
    ) {
        lines.push(format!("Forecast Max: {}°C, Min: {}°C", max, min));
    }
    lines
}

// ── Wikipedia ──────────────────────────────────────────────────────────

/// Wikipedia full-text search.
#[derive(Debug, Clone)]
pub struct WikipediaConnector {
    client: reqwest::Client,
    base_url: String,
}

impl Default for WikipediaConnector {
    fn default() -> Self {
        Self {
            client: connector_client(),
            base_url: "https://en.wikipedia.org".to_string(),
        }
    }
}

impl WikipediaConnector {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Connector for WikipediaConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Wikipedia
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, ConnectorError> {
        let url = format!(
            "{}/w/api.php?action=query&format=json&list=search&srsearch={}&srlimit=3",
            self.base_url,
            enc(query)
        );
        let response: WikipediaSearch = get_json(self.kind(), self.client.get(url)).await?;
        Ok(self.snippets(response))
    }
}

impl WikipediaConnector {
    fn snippets(&self, response: WikipediaSearch) -> Vec<String> {
        response
            .query
            .map(|q| q.search)
            .unwrap_or_default()
            .into_iter()
            .map(|hit| {
                format!(
                    "- **{}**: {} ([Link](https://en.wikipedia.org/wiki/{}))",
                    hit.title,
                    HTML_TAG.replace_all(&hit.snippet, ""),
                    enc(&hit.title.replace(' ', "_"))
                )
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct WikipediaSearch {
    #[serde(default)]
    query: Option<WikipediaQuery>,
}

#[derive(Debug, Deserialize)]
struct WikipediaQuery {
    #[serde(default)]
    search: Vec<WikipediaHit>,
}

#[derive(Debug, Deserialize)]
struct WikipediaHit {
    title: String,
    #[serde(default)]
    snippet: String,
}

// ── CoinGecko ──────────────────────────────────────────────────────────

/// CoinGecko spot prices in USD and EUR.
#[derive(Debug, Clone)]
pub struct CoinGeckoConnector {
    client: reqwest::Client,
    base_url: String,
}

impl Default for CoinGeckoConnector {
    fn default() -> Self {
        Self {
            client: connector_client(),
            base_url: "https://api.coingecko.com/api/v3".to_string(),
        }
    }
}

impl CoinGeckoConnector {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Map common ticker symbols to CoinGecko ids.
pub fn coin_id(symbol: &str) -> String {
    let lower = symbol.to_lowercase();
    match lower.as_str() {
        "btc" => "bitcoin".to_string(),
        "eth" => "ethereum".to_string(),
        "sol" => "solana".to_string(),
        "doge" => "dogecoin".to_string(),
        _ => lower,
    }
}

#[async_trait]
impl Connector for CoinGeckoConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::CoinGecko
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, ConnectorError> {
        let id = coin_id(query);
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd,eur&include_24hr_change=true",
            self.base_url,
            enc(&id)
        );
        let mut prices: std::collections::HashMap<String, CoinPrice> =
            get_json(self.kind(), self.client.get(url)).await?;

        Ok(prices
            .remove(&id)
            .map(|p| {
                vec![format!(
                    "{}: USD ${}, EUR €{} (24h Change: {:.2}%)",
                    query.to_uppercase(),
                    p.usd,
                    p.eur,
                    p.usd_24h_change
                )]
            })
            .unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct CoinPrice {
    usd: f64,
    #[serde(default)]
    eur: f64,
    #[serde(default)]
    usd_24h_change: f64,
}
