//! YouTube Data API v3 source discovery
//!
//! Channels may be configured by id (`UC...`) or by handle (`@name`);
//! anything that is not a channel id is resolved through a channel search
//! first.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::SourceDiscovery;

const YOUTUBE_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Debug, Deserialize)]
struct SearchItemId {
    kind: String,
    #[serde(rename = "videoId")]
    video_id: Option<String>,
    #[serde(rename = "channelId")]
    channel_id: Option<String>,
}

/// YouTube Data API client
pub struct YoutubeDataClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl YoutubeDataClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: YOUTUBE_API_BASE_URL.to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn search(&self, params: &[(&str, &str)]) -> Result<SearchResponse> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .context("YouTube search request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("YouTube API error {}: {}", status.as_u16(), body));
        }

        response
            .json::<SearchResponse>()
            .await
            .context("Failed to parse YouTube search response")
    }

    /// Resolve a handle (`@name` or bare name) to a channel id
    pub async fn resolve_channel_id(&self, source_ref: &str) -> Result<String> {
        if is_channel_id(source_ref) {
            return Ok(source_ref.to_string());
        }

        let handle = source_ref.trim_start_matches('@');
        let response = self
            .search(&[("part", "snippet"), ("q", handle), ("type", "channel"), ("maxResults", "1")])
            .await?;

        response
            .items
            .into_iter()
            .find_map(|item| item.id.channel_id)
            .ok_or_else(|| anyhow!("No channel found for handle {}", source_ref))
    }
}

#[async_trait]
impl SourceDiscovery for YoutubeDataClient {
    async fn list_recent(&self, source_ref: &str, max_results: u32) -> Result<Vec<String>> {
        let channel_id = self.resolve_channel_id(source_ref).await?;
        let max_results = max_results.to_string();

        let response = self
            .search(&[
                ("part", "snippet"),
                ("channelId", channel_id.as_str()),
                ("order", "date"),
                ("type", "video"),
                ("maxResults", max_results.as_str()),
            ])
            .await?;

        let ids: Vec<String> = response
            .items
            .into_iter()
            .filter(|item| item.id.kind == "youtube#video")
            .filter_map(|item| item.id.video_id)
            .collect();
        debug!(source_ref, channel_id = %channel_id, found = ids.len(), "Listed recent uploads");
        Ok(ids)
    }
}

fn is_channel_id(value: &str) -> bool {
    value.starts_with("UC") && value.len() == 24 && value.chars().all(is_id_char)
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Extract a video id from a watch/short/embed/live URL or a bare id
pub fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    const MARKERS: [&str; 5] = ["watch?v=", "youtu.be/", "/embed/", "/v/", "/live/"];
    let candidate = if input.contains("://") || input.contains("youtube.com") || input.contains("youtu.be") {
        MARKERS.iter().find_map(|marker| {
            let start = input.find(marker)? + marker.len();
            let id: String = input[start..].chars().take_while(|c| is_id_char(*c)).collect();
            Some(id)
        })?
    } else {
        input.to_string()
    };

    if !candidate.is_empty() && candidate.chars().all(is_id_char) {
        Some(candidate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_video_id_from_urls() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(extract_video_id("https://youtu.be/abc123").as_deref(), Some("abc123"));
        assert_eq!(
            extract_video_id("https://www.youtube.com/live/XyZ_9-1?si=q").as_deref(),
            Some("XyZ_9-1")
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/embed/abc123").as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn test_extract_video_id_bare_and_invalid() {
        assert_eq!(extract_video_id(" abc123 ").as_deref(), Some("abc123"));
        assert_eq!(extract_video_id("not an id"), None);
        assert_eq!(extract_video_id("https://example.com/page"), None);
        assert_eq!(extract_video_id(""), None);
    }

    #[test]
    fn test_channel_id_detection() {
        assert!(is_channel_id("UCabcdefghijklmnopqrstuv"));
        assert!(!is_channel_id("@somechannel"));
        assert!(!is_channel_id("UCshort"));
    }
}
