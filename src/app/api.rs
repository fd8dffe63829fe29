use std::env;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tracing::debug;

use crate::http::{self, CONNECT_TIMEOUT, READ_TIMEOUT};

pub(crate) const DEFAULT_API_BASE: &str = "https://shivraapi.my.id/otd";

/// Everything playback needs from the API, validated at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamSource {
    pub(crate) url: String,
    pub(crate) content_id: String,
    pub(crate) episode_number: u32,
    pub(crate) title: String,
}

impl StreamSource {
    /// Web players cannot be handed to mpv.
    pub(crate) fn is_embed(&self) -> bool {
        self.url.contains("/embed/")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EpisodeSelector {
    Latest,
    Number(u32),
}

impl EpisodeSelector {
    pub(crate) fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }
        raw.parse::<u32>()
            .map(Self::Number)
            .map_err(|_| anyhow!("episode must be a number or `latest`, got `{raw}`"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EpisodeListing {
    pub(crate) number: u32,
    pub(crate) episode_id: String,
    pub(crate) title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AnimeDetail {
    pub(crate) title: String,
    pub(crate) episodes: Vec<EpisodeListing>,
}

pub(crate) struct ApiClient {
    base: String,
}

impl ApiClient {
    pub(crate) fn from_env() -> Self {
        let base = env::var("ANICHI_API_BASE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self::new(base)
    }

    pub(crate) fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn resolve_stream(
        &self,
        slug: &str,
        selector: EpisodeSelector,
    ) -> Result<StreamSource> {
        let detail = self.anime(slug)?;
        let episode = select_episode(&detail.episodes, selector)
            .ok_or_else(|| anyhow!("episode {} not found for `{slug}`", describe(selector)))?;
        let url = self.default_stream_url(&episode.episode_id)?;

        let title = if detail.title.is_empty() {
            episode.title.clone()
        } else {
            detail.title
        };
        Ok(StreamSource {
            url,
            content_id: slug.to_string(),
            episode_number: episode.number,
            title,
        })
    }

    fn anime(&self, slug: &str) -> Result<AnimeDetail> {
        let raw = self
            .get(&format!("anime/{}", path_segment(slug)))
            .with_context(|| format!("failed to fetch details for `{slug}`"))?;
        parse_anime_detail(&raw)
    }

    fn default_stream_url(&self, episode_id: &str) -> Result<String> {
        let raw = self
            .get(&format!("episode/{}", path_segment(episode_id)))
            .with_context(|| format!("failed to fetch episode `{episode_id}`"))?;
        parse_stream_url(&raw)
    }

    fn get(&self, path: &str) -> Result<String> {
        let url = format!("{}/{path}", self.base);
        debug!(%url, "api request");
        http::get_text(&url, CONNECT_TIMEOUT, READ_TIMEOUT).map_err(|err| anyhow!(err))
    }
}

/// Percent-encodes everything outside the RFC 3986 unreserved set, so a slug
/// cannot add path segments or a query.
pub(crate) fn path_segment(raw: &str) -> String {
    // `.` and `..` would be resolved as relative segments.
    let dots_only = raw.bytes().all(|byte| byte == b'.');
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        let unreserved = byte.is_ascii_alphanumeric()
            || matches!(byte, b'-' | b'_' | b'~')
            || (byte == b'.' && !dots_only);
        if unreserved {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

pub(crate) fn parse_anime_detail(raw: &str) -> Result<AnimeDetail> {
    let parsed: Value = serde_json::from_str(raw).context("anime response is not JSON")?;
    let Some(list) = parsed
        .pointer("/data/episodeList")
        .and_then(Value::as_array)
    else {
        bail!("anime response has no episode list");
    };

    let title = parsed
        .pointer("/data/title")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    let episodes = list.iter().filter_map(parse_episode_listing).collect();
    Ok(AnimeDetail { title, episodes })
}

fn parse_episode_listing(item: &Value) -> Option<EpisodeListing> {
    let number = ["eps", "episode"]
        .iter()
        .find_map(|key| item.get(*key).and_then(episode_number))?;
    let episode_id = item.get("episodeId")?.as_str()?.trim();
    if episode_id.is_empty() {
        return None;
    }
    let title = item
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    Some(EpisodeListing {
        number,
        episode_id: episode_id.to_string(),
        title,
    })
}

/// Numbers sometimes arrive as strings.
fn episode_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn parse_stream_url(raw: &str) -> Result<String> {
    let parsed: Value = serde_json::from_str(raw).context("episode response is not JSON")?;
    parsed
        .pointer("/data/defaultStreamingUrl")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("episode response has no stream URL"))
}

/// The API lists episodes newest first.
pub(crate) fn select_episode(
    episodes: &[EpisodeListing],
    selector: EpisodeSelector,
) -> Option<&EpisodeListing> {
    match selector {
        EpisodeSelector::Latest => episodes.first(),
        EpisodeSelector::Number(number) => episodes.iter().find(|ep| ep.number == number),
    }
}

fn describe(selector: EpisodeSelector) -> String {
    match selector {
        EpisodeSelector::Latest => "latest".to_string(),
        EpisodeSelector::Number(number) => number.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL: &str = r#"{
        "status": "success",
        "data": {
            "title": "Sousou no Frieren",
            "episodeList": [
                {"title": "Frieren Episode 28", "eps": 28, "episodeId": "snf-episode-28"},
                {"title": "Frieren Episode 27", "eps": "27", "episodeId": "snf-episode-27"},
                {"title": "broken", "eps": 26},
                {"title": "Frieren Episode 1", "episode": 1, "episodeId": "snf-episode-1"}
            ]
        }
    }"#;

    #[test]
    fn parses_episode_list_and_skips_incomplete_items() {
        let detail = parse_anime_detail(DETAIL).expect("detail should parse");
        assert_eq!(detail.title, "Sousou no Frieren");
        let numbers: Vec<u32> = detail.episodes.iter().map(|ep| ep.number).collect();
        assert_eq!(numbers, vec![28, 27, 1]);
    }

    #[test]
    fn latest_is_first_listed_episode() {
        let detail = parse_anime_detail(DETAIL).expect("detail should parse");
        let latest = select_episode(&detail.episodes, EpisodeSelector::Latest).expect("latest");
        assert_eq!(latest.episode_id, "snf-episode-28");
        let first = select_episode(&detail.episodes, EpisodeSelector::Number(1)).expect("ep 1");
        assert_eq!(first.episode_id, "snf-episode-1");
        assert!(select_episode(&detail.episodes, EpisodeSelector::Number(99)).is_none());
    }

    #[test]
    fn missing_episode_list_is_an_error() {
        assert!(parse_anime_detail(r#"{"data":{"title":"x"}}"#).is_err());
        assert!(parse_anime_detail("<html>").is_err());
    }

    #[test]
    fn stream_url_must_be_present_and_non_empty() {
        assert_eq!(
            parse_stream_url(r#"{"data":{"defaultStreamingUrl":" https://cdn.test/a.m3u8 "}}"#)
                .expect("url"),
            "https://cdn.test/a.m3u8"
        );
        assert!(parse_stream_url(r#"{"data":{"defaultStreamingUrl":""}}"#).is_err());
        assert!(parse_stream_url(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn selector_accepts_numbers_and_latest() {
        assert_eq!(
            EpisodeSelector::parse("Latest").expect("latest"),
            EpisodeSelector::Latest
        );
        assert_eq!(
            EpisodeSelector::parse(" 12 ").expect("12"),
            EpisodeSelector::Number(12)
        );
        assert!(EpisodeSelector::parse("twelve").is_err());
    }

    #[test]
    fn embed_urls_are_detected() {
        let mut source = StreamSource {
            url: "https://desustream.example/embed/abc".to_string(),
            content_id: "x".to_string(),
            episode_number: 1,
            title: String::new(),
        };
        assert!(source.is_embed());
        source.url = "https://cdn.example/abc.m3u8".to_string();
        assert!(!source.is_embed());
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        assert_eq!(
            ApiClient::new("http://localhost:3000/otd/").base,
            "http://localhost:3000/otd"
        );
    }

    #[test]
    fn path_segments_are_percent_encoded() {
        assert_eq!(path_segment("snf-sub-indo_2.0~x"), "snf-sub-indo_2.0~x");
        assert_eq!(path_segment("../admin?x=1#y"), "..%2Fadmin%3Fx%3D1%23y");
        assert_eq!(path_segment("a b/c"), "a%20b%2Fc");
        assert_eq!(path_segment("café"), "caf%C3%A9");
        assert_eq!(path_segment(".."), "%2E%2E");
    }
}
