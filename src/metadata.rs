use anyhow::Context as AnyhowContext;
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;

/// TikTok exposes no duration through oEmbed; embeds are assumed short.
const TIKTOK_DURATION_SECS: f64 = 20.0;
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

pub const YOUTUBE_CONTENT_TYPE: &str = "video/youtube";
pub const INNERTUBE_PLAYER_URL: &str = "https://www.youtube.com/youtubei/v1/player";
const INNERTUBE_CLIENT_VERSION: &str = "2.20240726.00.00";

static TIKTOK_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bhttps?://(?:m|www|vm)\.tiktok\.com/(?:.*\b(?:(?:usr|v|embed|user|video)/|\?shareId=|&item_id=)(\d+)|([^/]+))",
    )
    // Constant pattern, exercised by test_tiktok_ids.
    .expect("valid tiktok regex")
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentMetadata {
    pub content_type: Option<String>,
    pub duration_secs: Option<f64>,
    pub is_short: Option<bool>,
}

/// Looks up what a link or attachment points at. Never fails: unknown
/// content comes back empty and the guild's default duration applies.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> ContentMetadata;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoDetails {
    pub duration_secs: f64,
    pub is_short: Option<bool>,
}

/// Video platform details that cannot be read from the URL.
#[async_trait]
pub trait VideoLookup: Send + Sync {
    async fn youtube(&self, video_id: &str) -> anyhow::Result<VideoDetails>;
}

/// Key-less YouTube lookup through the Innertube player endpoint the web
/// player itself calls.
pub struct InnertubeClient {
    http: reqwest::Client,
    endpoint: String,
}

impl InnertubeClient {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    video_details: Option<PlayerVideoDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerVideoDetails {
    length_seconds: String,
}

impl PlayerResponse {
    fn into_details(self) -> anyhow::Result<VideoDetails> {
        let details = self
            .video_details
            .context("player response has no videoDetails")?;
        let duration_secs: f64 = details
            .length_seconds
            .parse()
            .with_context(|| format!("bad lengthSeconds {:?}", details.length_seconds))?;
        Ok(VideoDetails {
            duration_secs,
            is_short: None,
        })
    }
}

#[async_trait]
impl VideoLookup for InnertubeClient {
    async fn youtube(&self, video_id: &str) -> anyhow::Result<VideoDetails> {
        let body = json!({
            "context": {
                "client": {
                    "clientName": "WEB",
                    "clientVersion": INNERTUBE_CLIENT_VERSION,
                    "hl": "en",
                }
            },
            "videoId": video_id,
        });

        let response: PlayerResponse = self
            .http
            .post(&self.endpoint)
            .query(&[("prettyPrint", "false")])
            .json(&body)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await?
            .error_for_status()
            .context("Innertube rejected the request")?
            .json()
            .await?;

        response.into_details()
    }
}

pub struct HttpMetadataResolver {
    http: reqwest::Client,
    videos: Arc<dyn VideoLookup>,
}

impl HttpMetadataResolver {
    pub fn new(http: reqwest::Client) -> Self {
        let videos = Arc::new(InnertubeClient::new(http.clone(), INNERTUBE_PLAYER_URL));
        Self { http, videos }
    }

    pub fn with_video_lookup(mut self, videos: Arc<dyn VideoLookup>) -> Self {
        self.videos = videos;
        self
    }

    async fn fill_youtube(&self, url: &str, metadata: &mut ContentMetadata) {
        let Some(video_id) = youtube_video_id(url) else {
            return;
        };
        match self.videos.youtube(&video_id).await {
            Ok(details) => {
                // Live streams report 0.
                metadata.duration_secs = Some(details.duration_secs).filter(|d| *d > 0.0);
                if details.is_short.is_some() {
                    metadata.is_short = details.is_short;
                }
            }
            Err(e) => debug!("YouTube lookup failed for {}: {:#}", video_id, e),
        }
    }

    /// `Content-Type` from a HEAD request, then from a GET for servers that
    /// refuse HEAD, then from the first bytes of the body.
    async fn fetch_content_type(&self, url: &str) -> Option<String> {
        match self.http.head(url).timeout(LOOKUP_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => {
                if let Some(content_type) = header_content_type(&response) {
                    return Some(content_type);
                }
            }
            Ok(response) => debug!("HEAD {} returned {}", url, response.status()),
            Err(e) => debug!("HEAD {} failed: {}", url, e),
        }

        let mut response = match self
            .http
            .get(url)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(response) => response,
            Err(e) => {
                debug!("Metadata lookup failed for {}: {}", url, e);
                return None;
            }
        };
        if let Some(content_type) = header_content_type(&response) {
            return Some(content_type);
        }

        match response.chunk().await {
            Ok(Some(head)) => sniff_content_type(&head).map(str::to_string),
            _ => None,
        }
    }
}

#[async_trait]
impl MetadataResolver for HttpMetadataResolver {
    async fn resolve(&self, url: &str) -> ContentMetadata {
        if let Some(mut known) = classify_embed(url) {
            if known.content_type.as_deref() == Some(YOUTUBE_CONTENT_TYPE) {
                self.fill_youtube(url, &mut known).await;
            }
            return known;
        }

        let content_type = match guess_from_extension(url) {
            Some(guessed) => Some(guessed),
            None => self.fetch_content_type(url).await,
        };

        ContentMetadata {
            content_type,
            ..Default::default()
        }
    }
}

/// Platform embeds recognized from the URL alone. YouTube durations are
/// left for [`VideoLookup`].
pub fn classify_embed(url: &str) -> Option<ContentMetadata> {
    if tiktok_id(url).is_some() {
        return Some(ContentMetadata {
            content_type: Some("embed/tiktok".to_string()),
            duration_secs: Some(TIKTOK_DURATION_SECS),
            is_short: Some(true),
        });
    }

    if is_youtube(url) {
        return Some(ContentMetadata {
            content_type: Some(YOUTUBE_CONTENT_TYPE.to_string()),
            duration_secs: None,
            is_short: Some(url.contains("/shorts/")),
        });
    }

    None
}

pub fn tiktok_id(url: &str) -> Option<String> {
    let captures = TIKTOK_URL.captures(url)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str().to_string())
}

fn youtube_host(url: &Url) -> Option<&str> {
    let host = url.host_str()?;
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .unwrap_or(host);
    matches!(host, "youtube.com" | "music.youtube.com" | "youtu.be").then_some(host)
}

fn is_youtube(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .is_some_and(|parsed| youtube_host(&parsed).is_some())
}

pub fn youtube_video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let mut segments = parsed.path_segments()?;
    let id = match youtube_host(&parsed)? {
        "youtu.be" => segments.next()?.to_string(),
        _ => match segments.next()? {
            "watch" => parsed
                .query_pairs()
                .find(|(key, _)| key == "v")?
                .1
                .into_owned(),
            "shorts" | "embed" | "live" | "v" => segments.next()?.to_string(),
            _ => return None,
        },
    };
    (!id.is_empty()).then_some(id)
}

/// MIME type from the URL path's extension, ignoring query strings.
pub fn guess_from_extension(url: &str) -> Option<String> {
    let path = Url::parse(url).ok()?.path().to_string();
    let file_name = path.rsplit('/').next()?;
    if !file_name.contains('.') {
        return None;
    }
    mime_guess::from_path(file_name)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

/// Generic binary types say nothing useful; the body is sniffed instead.
fn header_content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
        .filter(|value| !value.is_empty() && value != "application/octet-stream")
}

/// Media type from magic bytes, for the formats an overlay can play.
pub fn sniff_content_type(head: &[u8]) -> Option<&'static str> {
    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some("image/png");
    }
    if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if head.starts_with(b"RIFF") && head.len() >= 12 {
        return match &head[8..12] {
            b"WEBP" => Some("image/webp"),
            b"WAVE" => Some("audio/wav"),
            _ => None,
        };
    }
    if head.len() >= 8 && &head[4..8] == b"ftyp" {
        return Some("video/mp4");
    }
    if head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("video/webm");
    }
    if head.starts_with(b"OggS") {
        return Some("audio/ogg");
    }
    if head.starts_with(b"ID3") || (head.len() >= 2 && head[0] == 0xFF && head[1] & 0xE0 == 0xE0) {
        return Some("audio/mpeg");
    }
    None
}
