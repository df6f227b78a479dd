// Stream discovery - finds what the channel is broadcasting right now
// Three tiers tried one after another: Data API (needs a key) -> RSS feed -> page scrape
// Never parallel, that just burns quota faster

pub mod api;       // YouTube Data API search, with quota retry
pub mod feed;      // channel RSS feed
pub mod scrape;    // ytInitialData blob on the /streams page
pub mod transport; // the HTTP seam

pub use api::ApiTier;
pub use feed::FeedTier;
pub use scrape::ScrapeTier;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

use crate::error::Result;
use crate::stations::StationRecord;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

pub const LOFI_GIRL_CHANNEL_ID: &str = "UCSJ4gkVC6NrvII8umztf0Ow";
pub const LOFI_GIRL_STREAMS_URL: &str = "https://www.youtube.com/@LofiGirl/streams";

/// Most entries any single tier hands back
pub const MAX_CANDIDATES: usize = 10;

/// A stream some tier found. Only lives until it becomes a StationRecord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCandidate {
    pub external_id: String,
    pub title: String,
    pub is_live: bool,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Api,
    Feed,
    Scrape,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Api => "api",
            Tier::Feed => "feed",
            Tier::Scrape => "scrape",
        };
        f.write_str(name)
    }
}

/// One way of asking the platform what's live
#[async_trait]
pub trait ResolverStrategy: Send + Sync {
    fn tier(&self) -> Tier;

    /// Whether results carry a trustworthy live flag to filter on.
    /// Only the API does; feed/scrape results are taken as they come.
    fn applies_live_filter(&self) -> bool {
        false
    }

    async fn fetch(&self, transport: &dyn Transport) -> Result<Vec<StreamCandidate>>;
}

pub struct SourceResolver {
    transport: Arc<dyn Transport>,
    channel_id: String,
    streams_url: String,
}

impl SourceResolver {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            channel_id: LOFI_GIRL_CHANNEL_ID.to_string(),
            streams_url: LOFI_GIRL_STREAMS_URL.to_string(),
        }
    }

    pub fn with_channel(
        mut self,
        channel_id: impl Into<String>,
        streams_url: impl Into<String>,
    ) -> Self {
        self.channel_id = channel_id.into();
        self.streams_url = streams_url.into();
        self
    }

    /// Tiers in the order they'll be tried for this key (or lack of one)
    pub fn plan(&self, api_key: Option<&str>) -> Vec<Box<dyn ResolverStrategy>> {
        let mut plan: Vec<Box<dyn ResolverStrategy>> = Vec::with_capacity(3);
        if let Some(key) = api_key {
            plan.push(Box::new(ApiTier::new(&self.channel_id, key)));
        }
        plan.push(Box::new(FeedTier::new(&self.channel_id)));
        plan.push(Box::new(ScrapeTier::new(&self.streams_url)));
        plan
    }

    /// Walk the tiers until one answers. The first tier that answers has the final say,
    /// even when it found nothing live. Empty vec means nothing is live (or every tier failed).
    pub async fn resolve(&self, api_key: Option<&str>) -> Vec<StationRecord> {
        let api_key = api_key.map(str::trim).filter(|k| !k.is_empty());
        info!("Starting stream scan for channel {}", self.channel_id);

        for strategy in self.plan(api_key) {
            let tier = strategy.tier();
            match self.run_tier(strategy.as_ref()).await {
                Ok(candidates) => {
                    let stations = candidates_to_stations(&candidates);
                    info!("{} tier found {} streams", tier, stations.len());
                    return stations;
                }
                Err(e) => {
                    warn!("{} tier failed: {}", tier, e.redacted(api_key));
                }
            }
        }

        warn!("All discovery tiers failed, no streams found");
        Vec::new()
    }

    /// resolve(), but gives up with an empty list as soon as `cancel` completes.
    /// Never returns a partial set.
    pub async fn resolve_until<F>(&self, api_key: Option<&str>, cancel: F) -> Vec<StationRecord>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                info!("Stream scan cancelled");
                Vec::new()
            }
            stations = self.resolve(api_key) => stations,
        }
    }

    async fn run_tier(&self, strategy: &dyn ResolverStrategy) -> Result<Vec<StreamCandidate>> {
        let mut candidates = strategy.fetch(self.transport.as_ref()).await?;

        if strategy.applies_live_filter() {
            candidates.retain(|c| c.is_live);
        }
        Ok(candidates)
    }
}

/// Numbering is positional, so the same list always gives live-1, live-2, ...
pub fn candidates_to_stations(candidates: &[StreamCandidate]) -> Vec<StationRecord> {
    candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| candidate_to_station(candidate, index))
        .collect()
}

/// `index` is 0-based; ids are 1-based
pub fn candidate_to_station(candidate: &StreamCandidate, index: usize) -> StationRecord {
    let genre = genre_for_title(&candidate.title);
    let title = candidate.title.trim();
    let description = if title.is_empty() {
        format!("🔴 LIVE: {genre}")
    } else {
        format!("🔴 LIVE: {title}")
    };

    StationRecord {
        id: format!("live-{}", index + 1),
        name: candidate.title.clone(),
        source_uri: format!("https://www.youtube.com/watch?v={}", candidate.external_id),
        description,
        genre: genre.to_string(),
    }
}

pub fn genre_for_title(title: &str) -> &'static str {
    let title = title.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| title.contains(w));

    if has(&["hip hop", "beats"]) {
        "lofi-hip-hop"
    } else if has(&["jazz"]) {
        "lofi-jazz"
    } else if has(&["sleep", "calm"]) {
        "lofi-sleep"
    } else if has(&["study", "focus"]) {
        "lofi-study"
    } else {
        "lofi"
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;
    use std::time::Duration;

    const API: &str = "https://www.googleapis.com/youtube/v3/search";
    const FEED: &str = "https://www.youtube.com/feeds/videos.xml";
    const SCRAPE: &str = "https://www.youtube.com/@LofiGirl/streams";

    fn candidate(id: &str, title: &str) -> StreamCandidate {
        StreamCandidate {
            external_id: id.to_string(),
            title: title.to_string(),
            is_live: true,
            thumbnail: None,
        }
    }

    fn api_body(items: &[(&str, &str, &str)]) -> String {
        let items: Vec<_> = items
            .iter()
            .map(|(id, title, live)| {
                serde_json::json!({
                    "id": { "videoId": id },
                    "snippet": {
                        "title": title,
                        "liveBroadcastContent": live,
                        "thumbnails": {
                            "high": { "url": format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg") }
                        }
                    }
                })
            })
            .collect();
        serde_json::json!({ "items": items }).to_string()
    }

    fn quota_body() -> String {
        serde_json::json!({
            "error": {
                "code": 403,
                "message": "The request cannot be completed because you have exceeded your quota.",
                "errors": [{ "reason": "quotaExceeded", "domain": "youtube.quota" }]
            }
        })
        .to_string()
    }

    fn feed_body(entries: &[(&str, &str)]) -> String {
        let entries: String = entries
            .iter()
            .map(|(id, title)| {
                format!(
                    "<entry><id>yt:video:{id}</id><yt:videoId>{id}</yt:videoId>\
                     <title>{title}</title></entry>"
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns="http://www.w3.org/2005/Atom">
{entries}</feed>"#
        )
    }

    fn scrape_body() -> String {
        let data = serde_json::json!({
            "contents": { "twoColumnBrowseResultsRenderer": { "tabs": [
                { "tabRenderer": { "content": { "richGridRenderer": { "contents": [
                    { "richItemRenderer": { "content": { "videoRenderer": {
                        "videoId": "scraped1",
                        "title": {
                            "runs": [{ "text": "lofi hip hop radio - beats to relax/study to" }]
                        },
                        "badges": [{ "metadataBadgeRenderer": {
                            "style": "BADGE_STYLE_TYPE_LIVE_NOW",
                            "label": "LIVE"
                        } }]
                    }}}}
                ]}}}}
            ]}}
        });
        format!("<html><script>var ytInitialData = {data};</script></html>")
    }

    #[test]
    fn test_ids_follow_input_order() {
        let candidates = vec![
            candidate("a", "one"),
            candidate("b", "two"),
            candidate("c", "three"),
        ];
        let first = candidates_to_stations(&candidates);
        let second = candidates_to_stations(&candidates);

        let ids: Vec<_> = first.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["live-1", "live-2", "live-3"]);
        assert_eq!(first, second);
        assert_eq!(first[1].source_uri, "https://www.youtube.com/watch?v=b");
    }

    #[test]
    fn test_genre_keywords() {
        assert_eq!(genre_for_title("lofi HIP HOP radio"), "lofi-hip-hop");
        assert_eq!(genre_for_title("Chill Beats"), "lofi-hip-hop");
        assert_eq!(genre_for_title("Jazz lofi"), "lofi-jazz");
        assert_eq!(genre_for_title("sleepy lofi"), "lofi-sleep");
        assert_eq!(genre_for_title("calm vibes"), "lofi-sleep");
        assert_eq!(genre_for_title("deep FOCUS"), "lofi-study");
        assert_eq!(genre_for_title("synthwave radio"), "lofi");
        // first matching bucket wins
        assert_eq!(genre_for_title("jazz beats to sleep to"), "lofi-hip-hop");
    }

    #[test]
    fn test_description_falls_back_to_genre() {
        let station = candidate_to_station(&candidate("x", "  "), 0);
        assert_eq!(station.description, "🔴 LIVE: lofi");

        let station = candidate_to_station(&candidate("x", "jazz radio"), 4);
        assert_eq!(station.id, "live-5");
        assert_eq!(station.description, "🔴 LIVE: jazz radio");
        assert_eq!(station.genre, "lofi-jazz");
    }

    #[test]
    fn test_plan_order() {
        let resolver = SourceResolver::new(Arc::new(ScriptedTransport::new()));
        let tiers: Vec<_> = resolver.plan(Some("k")).iter().map(|s| s.tier()).collect();
        assert_eq!(tiers, vec![Tier::Api, Tier::Feed, Tier::Scrape]);

        let tiers: Vec<_> = resolver.plan(None).iter().map(|s| s.tier()).collect();
        assert_eq!(tiers, vec![Tier::Feed, Tier::Scrape]);

        let filters: Vec<_> = resolver
            .plan(Some("k"))
            .iter()
            .map(|s| s.applies_live_filter())
            .collect();
        assert_eq!(filters, vec![true, false, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_only_keeps_live_items() {
        let transport = Arc::new(
            ScriptedTransport::new().respond(
                API,
                200,
                api_body(&[
                    ("live1", "lofi jazz", "live"),
                    ("old1", "upcoming thing", "upcoming"),
                    ("live2", "study radio", "live"),
                ]),
            ),
        );
        let resolver = SourceResolver::new(transport.clone());

        let stations = resolver.resolve(Some("key123")).await;
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].source_uri, "https://www.youtube.com/watch?v=live1");
        assert_eq!(stations[1].id, "live-2");
        assert_eq!(stations[1].genre, "lofi-study");
        assert_eq!(transport.calls_to(FEED), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_retries_then_succeeds() {
        for k in 0..3usize {
            let mut script = ScriptedTransport::new();
            for _ in 0..k {
                script = script.respond(API, 403, quota_body());
            }
            let body = api_body(&[("v1", "lofi radio", "live")]);
            let transport = Arc::new(script.respond(API, 200, body));
            let resolver = SourceResolver::new(transport.clone());

            let started = tokio::time::Instant::now();
            let stations = resolver.resolve(Some("key123")).await;
            let waited = started.elapsed();

            assert_eq!(stations.len(), 1, "k={k}");
            assert_eq!(transport.calls_to(API), k + 1);
            assert_eq!(transport.calls_to(FEED), 0);

            // 2s then 4s, only the first k of them
            let expected: u64 = [2000u64, 4000, 8000].iter().take(k).sum();
            assert!(waited >= Duration::from_millis(expected), "k={k} waited {waited:?}");
            assert!(waited < Duration::from_millis(expected + 500), "k={k} waited {waited:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion_falls_to_feed_once() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(API, 403, quota_body())
                .respond(API, 403, quota_body())
                .respond(API, 403, quota_body())
                .respond(FEED, 200, feed_body(&[("f1", "lofi hip hop radio")])),
        );
        let resolver = SourceResolver::new(transport.clone());

        let stations = resolver.resolve(Some("key123")).await;
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].source_uri, "https://www.youtube.com/watch?v=f1");
        assert_eq!(transport.calls_to(API), 3);
        assert_eq!(transport.calls_to(FEED), 1);
        assert_eq!(transport.calls_to(SCRAPE), 0);
    }

    #[tokio::test]
    async fn test_other_api_error_falls_through_immediately() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(
                    API,
                    400,
                    r#"{"error":{"code":400,"message":"API key not valid",
                        "errors":[{"reason":"badRequest"}]}}"#,
                )
                .respond(FEED, 200, feed_body(&[("f1", "one")])),
        );
        let resolver = SourceResolver::new(transport.clone());

        let stations = resolver.resolve(Some("key123")).await;
        assert_eq!(stations.len(), 1);
        assert_eq!(transport.calls_to(API), 1);
    }

    #[tokio::test]
    async fn test_no_key_feed_before_scrape() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(FEED, 200, feed_body(&[("f1", "one"), ("f2", "two")]))
                .respond(SCRAPE, 200, scrape_body()),
        );
        let resolver = SourceResolver::new(transport.clone());

        let stations = resolver.resolve(None).await;
        assert_eq!(stations.len(), 2);
        assert_eq!(transport.calls_to(API), 0);
        assert_eq!(transport.calls_to(SCRAPE), 0);
        assert!(transport.calls()[0].url.starts_with(FEED));
    }

    #[tokio::test]
    async fn test_feed_failure_falls_to_scrape() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .fail(FEED, "connection reset")
                .respond(SCRAPE, 200, scrape_body()),
        );
        let resolver = SourceResolver::new(transport.clone());

        let stations = resolver.resolve(None).await;
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].id, "live-1");
        assert_eq!(stations[0].genre, "lofi-hip-hop");

        let urls: Vec<_> = transport.calls().into_iter().map(|r| r.url).collect();
        assert!(urls[0].starts_with(FEED));
        assert!(urls[1].starts_with(SCRAPE));
    }

    #[tokio::test]
    async fn test_everything_fails_gives_empty() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(API, 500, "oops")
                .respond(FEED, 200, "<html>not a feed</html>")
                .respond(SCRAPE, 200, "<html>no data here</html>"),
        );
        let resolver = SourceResolver::new(transport.clone());

        let stations = resolver.resolve(Some("key123")).await;
        assert!(stations.is_empty());
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_blank_key_treated_as_missing() {
        let transport =
            Arc::new(ScriptedTransport::new().respond(FEED, 200, feed_body(&[("f1", "one")])));
        let resolver = SourceResolver::new(transport.clone());

        let stations = resolver.resolve(Some("   ")).await;
        assert_eq!(stations.len(), 1);
        assert_eq!(transport.calls_to(API), 0);
    }

    #[tokio::test]
    async fn test_cancelled_resolve_is_empty() {
        let transport =
            Arc::new(ScriptedTransport::new().respond(FEED, 200, feed_body(&[("f1", "one")])));
        let resolver = SourceResolver::new(transport);

        let stations = resolver.resolve_until(None, std::future::ready(())).await;
        assert!(stations.is_empty());
    }

    #[tokio::test]
    async fn test_api_answer_without_live_items_ends_scan() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(API, 200, api_body(&[("old1", "yesterday upload", "none")]))
                .respond(FEED, 200, feed_body(&[("f1", "yesterday upload")]))
                .respond(SCRAPE, 200, scrape_body()),
        );
        let resolver = SourceResolver::new(transport.clone());

        let stations = resolver.resolve(Some("key123")).await;
        assert!(stations.is_empty());
        assert_eq!(transport.calls_to(API), 1);
        assert_eq!(transport.calls_to(FEED), 0);
        assert_eq!(transport.calls_to(SCRAPE), 0);
    }

    #[tokio::test]
    async fn test_empty_feed_ends_scan() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(FEED, 200, feed_body(&[]))
                .respond(SCRAPE, 200, scrape_body()),
        );
        let resolver = SourceResolver::new(transport.clone());

        assert!(resolver.resolve(None).await.is_empty());
        assert_eq!(transport.calls_to(SCRAPE), 0);
    }

    /// Collects formatted log output so tests can look at what got logged
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_logged_tier_failures_mask_the_key() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let transport = Arc::new(
            ScriptedTransport::new()
                .fail(API, "upstream rejected AIzaSecret42")
                .respond(FEED, 200, feed_body(&[("f1", "one")])),
        );
        let resolver = SourceResolver::new(transport);

        let stations = resolver.resolve(Some("AIzaSecret42")).await;
        assert_eq!(stations.len(), 1);

        let text = logs.text();
        assert!(text.contains("api tier failed"), "logs: {text}");
        assert!(text.contains("[REDACTED]"), "logs: {text}");
        assert!(!text.contains("AIzaSecret42"), "logs: {text}");
    }
}
