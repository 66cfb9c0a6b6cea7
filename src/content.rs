use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("display event needs at least one of text, url or media")]
    Empty,
    #[error("invalid {field} url `{value}`")]
    InvalidUrl { field: &'static str, value: String },
    #[error("malformed content payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Payload of a display event as handed to the overlay client.
///
/// Stored as opaque JSON on the queue row and parsed back into this shape
/// when the entry is dispatched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_content_type: Option<String>,
    /// Effective seconds, already clamped by the guild's duration policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_full: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_is_short: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_image: Option<String>,
}

impl ContentDescriptor {
    pub fn with_text(mut self, text: Option<String>) -> Self {
        self.text = text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        self
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        self
    }

    pub fn with_media(mut self, media: Option<String>, content_type: Option<String>) -> Self {
        self.media = media;
        self.media_content_type = content_type;
        self
    }

    pub fn with_author(mut self, name: impl Into<String>, image: Option<String>) -> Self {
        self.author = Some(name.into());
        self.author_image = image;
        self
    }

    /// The URL metadata should be resolved against: the attachment wins over a link.
    pub fn source_url(&self) -> Option<&str> {
        self.media.as_deref().or(self.url.as_deref())
    }

    pub fn validate(&self) -> Result<(), ContentError> {
        if self.text.is_none() && self.url.is_none() && self.media.is_none() {
            return Err(ContentError::Empty);
        }
        check_url("url", self.url.as_deref())?;
        check_url("media", self.media.as_deref())?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ContentError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ContentError> {
        Ok(serde_json::from_str(raw)?)
    }
}

fn check_url(field: &'static str, value: Option<&str>) -> Result<(), ContentError> {
    let Some(value) = value else {
        return Ok(());
    };
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ContentError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}
