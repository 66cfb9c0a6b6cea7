use anyhow::Context as AnyhowContext;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TTS_URL: &str = "https://translate.google.com/translate_tts";

/// Longest text the endpoint accepts per request.
const MAX_CHUNK_CHARS: usize = 100;
/// The endpoint returns 32 kbit/s MP3.
const MP3_BYTES_PER_SEC: f64 = 32_000.0 / 8.0;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct TtsClient {
    http: reqwest::Client,
    endpoint: String,
    language: String,
}

impl TtsClient {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            language: language.into(),
        }
    }

    /// Speaks `text` and returns the MP3 bytes. Long text is fetched in
    /// chunks; MP3 frames concatenate cleanly.
    pub async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        let chunks = split_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            anyhow::bail!("nothing to say");
        }

        let total = chunks.len().to_string();
        let mut audio = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let idx = idx.to_string();
            let textlen = chunk.chars().count().to_string();
            let bytes = self
                .http
                .get(&self.endpoint)
                .query(&[
                    ("ie", "UTF-8"),
                    ("client", "tw-ob"),
                    ("tl", self.language.as_str()),
                    ("q", chunk.as_str()),
                    ("idx", idx.as_str()),
                    ("total", total.as_str()),
                    ("textlen", textlen.as_str()),
                ])
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?
                .error_for_status()
                .context("TTS endpoint rejected the request")?
                .bytes()
                .await?;
            audio.extend_from_slice(&bytes);
        }

        debug!(
            "TTS: synthesized {} chunk(s), {} bytes",
            chunks.len(),
            audio.len()
        );
        Ok(audio)
    }
}

/// Playback length of a synthesized clip, from its size.
pub fn estimate_duration_secs(mp3_len: usize) -> f64 {
    mp3_len as f64 / MP3_BYTES_PER_SEC
}

/// Splits on whitespace into chunks of at most `max_chars` characters.
/// Words longer than the limit are cut.
fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: String = word.to_string();
        while word.chars().count() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let head: String = word.chars().take(max_chars).collect();
            word = word.chars().skip(max_chars).collect();
            chunks.push(head);
        }
        if word.is_empty() {
            continue;
        }

        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_short_text() {
        assert_eq!(split_text("  hello   world ", 100), vec!["hello world"]);
        assert!(split_text("   ", 100).is_empty());
    }

    #[test]
    fn test_split_respects_limit() {
        let text = "one two three four five six";
        let chunks = split_text(text, 9);
        assert_eq!(chunks, vec!["one two", "three", "four five", "six"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 9));
    }

    #[test]
    fn test_split_cuts_long_words() {
        let chunks = split_text("ab abcdefgh", 3);
        assert_eq!(chunks, vec!["ab", "abc", "def", "gh"]);
    }

    #[test]
    fn test_duration_estimate() {
        assert_eq!(estimate_duration_secs(16_000), 4.0);
        assert_eq!(estimate_duration_secs(0), 0.0);
    }
}
