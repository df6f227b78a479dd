// Last resort: scrape the channel's /streams page
// YouTube ships the whole page model as `var ytInitialData = {...};` - dig the live tiles out of it

use super::transport::{HttpRequest, Transport, BROWSER_USER_AGENT};
use super::{ResolverStrategy, StreamCandidate, Tier};
use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{info, warn};

static INITIAL_DATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)var ytInitialData\s*=\s*(\{.*?\});\s*</script>").expect("static regex")
});

pub struct ScrapeTier {
    page_url: String,
}

impl ScrapeTier {
    pub fn new(page_url: &str) -> Self {
        Self {
            page_url: page_url.to_string(),
        }
    }

    fn request(&self) -> HttpRequest {
        HttpRequest::get(&self.page_url)
            .header("User-Agent", BROWSER_USER_AGENT)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.5")
    }
}

#[async_trait]
impl ResolverStrategy for ScrapeTier {
    fn tier(&self) -> Tier {
        Tier::Scrape
    }

    async fn fetch(&self, transport: &dyn Transport) -> Result<Vec<StreamCandidate>> {
        info!("Scanning for live streams by scraping {}", self.page_url);

        let response = transport.get(self.request()).await?;
        if !response.is_success() {
            return Err(Error::transport(format!("streams page returned HTTP {}", response.status)));
        }

        let candidates = parse_streams_page(&response.body)?;
        info!("Found {} live streams on the page", candidates.len());
        Ok(candidates)
    }
}

pub fn parse_streams_page(html: &str) -> Result<Vec<StreamCandidate>> {
    let blob = INITIAL_DATA
        .captures(html)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| Error::parse("ytInitialData not found in page html"))?;

    let data: Value = serde_json::from_str(blob.as_str())?;
    Ok(live_videos(&data))
}

/// Tiles under the first tab that has a rich grid, filtered to LIVE NOW ones
fn live_videos(data: &Value) -> Vec<StreamCandidate> {
    let Some(tabs) = data
        .pointer("/contents/twoColumnBrowseResultsRenderer/tabs")
        .and_then(Value::as_array)
    else {
        warn!("ytInitialData has no tabs");
        return Vec::new();
    };

    let grid = tabs.iter().find_map(|tab| tab.pointer("/tabRenderer/content/richGridRenderer"));
    let Some(grid) = grid else {
        warn!("No rich grid in any tab");
        return Vec::new();
    };

    grid.get("contents")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.pointer("/richItemRenderer/content/videoRenderer"))
        .filter(|video| is_live_now(video))
        .filter_map(to_candidate)
        .collect()
}

fn is_live_now(video: &Value) -> bool {
    video
        .get("badges")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|badge| badge.get("metadataBadgeRenderer"))
        .any(|badge| {
            badge.get("style").and_then(Value::as_str) == Some("BADGE_STYLE_TYPE_LIVE_NOW")
                || badge.get("label").and_then(Value::as_str) == Some("LIVE")
        })
}

fn to_candidate(video: &Value) -> Option<StreamCandidate> {
    let external_id = video.get("videoId").and_then(Value::as_str)?.to_string();
    let title = video
        .pointer("/title/runs/0/text")
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string();
    let thumbnail = video
        .pointer("/thumbnail/thumbnails/0/url")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(StreamCandidate {
        external_id,
        title,
        is_live: true,
        thumbnail,
    })
}
