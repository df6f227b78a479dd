// YouTube Data API v3 tier - the only one that knows for sure what's live
// Quota errors get a few spaced-out retries, anything else fails the tier right away

use super::transport::{HttpRequest, HttpResponse, Transport};
use super::{ResolverStrategy, StreamCandidate, Tier, MAX_CANDIDATES};
use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

pub const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/search";

/// Error reasons YouTube uses for "slow down"
const QUOTA_REASONS: &[&str] = &["quotaExceeded", "rateLimitExceeded", "userRateLimitExceeded"];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct SearchItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(rename = "liveBroadcastContent", default)]
    live_broadcast_content: String,
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorReason {
    #[serde(default)]
    reason: String,
}

pub struct ApiTier {
    channel_id: String,
    api_key: String,
    endpoint: String,
    policy: BackoffPolicy,
}

impl ApiTier {
    pub fn new(channel_id: &str, api_key: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            api_key: api_key.to_string(),
            endpoint: SEARCH_ENDPOINT.to_string(),
            policy: BackoffPolicy::quota(),
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn request(&self) -> HttpRequest {
        HttpRequest::get(&self.endpoint)
            .query("part", "snippet")
            .query("channelId", &self.channel_id)
            .query("eventType", "live")
            .query("type", "video")
            .query("key", &self.api_key)
            .query("maxResults", MAX_CANDIDATES.to_string())
    }

    async fn search_once(&self, transport: &dyn Transport) -> Result<Vec<StreamCandidate>> {
        let response = transport.get(self.request()).await?;
        let parsed = classify(response)?;

        Ok(parsed
            .items
            .into_iter()
            .filter_map(|item| {
                let external_id = item.id.video_id?;
                Some(StreamCandidate {
                    external_id,
                    title: item.snippet.title,
                    is_live: item.snippet.live_broadcast_content == "live",
                    thumbnail: item.snippet.thumbnails.and_then(|t| t.high).map(|t| t.url),
                })
            })
            .collect())
    }
}

#[async_trait]
impl ResolverStrategy for ApiTier {
    fn tier(&self) -> Tier {
        Tier::Api
    }

    fn applies_live_filter(&self) -> bool {
        true
    }

    async fn fetch(&self, transport: &dyn Transport) -> Result<Vec<StreamCandidate>> {
        info!("Scanning for live streams using the YouTube Data API");
        let mut attempt = 1;

        loop {
            match self.search_once(transport).await {
                Ok(candidates) => {
                    debug!("API returned {} results on attempt {}", candidates.len(), attempt);
                    return Ok(candidates);
                }
                Err(Error::QuotaExceeded(msg)) => {
                    let retry = self
                        .policy
                        .delay_for(attempt)
                        .filter(|_| attempt < self.policy.max_attempts());

                    let Some(delay) = retry else {
                        return Err(Error::QuotaExceeded(format!(
                            "still limited after {attempt} attempts: {msg}"
                        )));
                    };

                    warn!(
                        "API quota exceeded (attempt {}/{}), retrying in {:?}",
                        attempt,
                        self.policy.max_attempts(),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// 2xx -> parsed body, quota statuses -> QuotaExceeded, the rest -> Transport
fn classify(response: HttpResponse) -> Result<SearchResponse> {
    if response.is_success() {
        return Ok(serde_json::from_str(&response.body)?);
    }

    let detail = serde_json::from_str::<ApiErrorBody>(&response.body).ok().map(|b| b.error);
    let message = detail
        .as_ref()
        .map(|d| d.message.clone())
        .unwrap_or_default();
    let quota_reason = detail
        .iter()
        .flat_map(|d| d.errors.iter())
        .any(|e| QUOTA_REASONS.contains(&e.reason.as_str()));

    if (response.status == 403 && quota_reason) || response.status == 429 {
        return Err(Error::QuotaExceeded(message));
    }

    Err(Error::transport(format!("HTTP {}: {}", response.status, message)))
}

#[cfg(test)]
mod tests {
    use super::super::testing::ScriptedTransport;
    use super::*;

    fn quota(reason: &str) -> String {
        serde_json::json!({
            "error": { "code": 403, "message": "slow down", "errors": [{ "reason": reason }] }
        })
        .to_string()
    }

    #[test]
    fn test_classify_quota() {
        let err = classify(HttpResponse { status: 403, body: quota("quotaExceeded") }).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));

        let err = classify(HttpResponse { status: 429, body: String::new() }).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));
    }

    #[test]
    fn test_classify_forbidden_without_quota_reason() {
        let err = classify(HttpResponse { status: 403, body: quota("forbidden") }).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        let err = classify(HttpResponse { status: 500, body: "<html>".into() }).unwrap_err();
        assert_eq!(err.to_string(), "transport error: HTTP 500: ");
    }

    #[test]
    fn test_classify_bad_json_is_parse_error() {
        let err = classify(HttpResponse { status: 200, body: "{not json".into() }).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn test_request_shape_and_mapping() {
        let body = r#"{"items":[
            {"id":{"kind":"youtube#channel"},
             "snippet":{"title":"the channel","liveBroadcastContent":"none"}},
            {"id":{"videoId":"abc"},
             "snippet":{"title":"lofi hip hop radio","liveBroadcastContent":"live",
             "thumbnails":{"high":{"url":"https://i.ytimg.com/vi/abc/hq.jpg"}}}}
        ]}"#;
        let transport = ScriptedTransport::new().respond(SEARCH_ENDPOINT, 200, body);
        let tier = ApiTier::new("chan", "secret");

        let candidates = tier.fetch(&transport).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].external_id, "abc");
        assert!(candidates[0].is_live);
        assert_eq!(candidates[0].thumbnail.as_deref(), Some("https://i.ytimg.com/vi/abc/hq.jpg"));

        let request = &transport.calls()[0];
        let param = |k: &str| request.query.iter().find(|(n, _)| n == k).map(|(_, v)| v.as_str());
        assert_eq!(param("channelId"), Some("chan"));
        assert_eq!(param("eventType"), Some("live"));
        assert_eq!(param("type"), Some("video"));
        assert_eq!(param("key"), Some("secret"));
        assert_eq!(param("maxResults"), Some("10"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_quota_errors() {
        let transport = ScriptedTransport::new()
            .respond(SEARCH_ENDPOINT, 403, quota("quotaExceeded"))
            .respond(SEARCH_ENDPOINT, 403, quota("quotaExceeded"))
            .respond(SEARCH_ENDPOINT, 403, quota("quotaExceeded"))
            .respond(SEARCH_ENDPOINT, 200, r#"{"items":[]}"#);
        let tier = ApiTier::new("chan", "secret");

        let err = tier.fetch(&transport).await.unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_transport_error_not_retried() {
        let transport = ScriptedTransport::new()
            .fail(SEARCH_ENDPOINT, "dns failure")
            .respond(SEARCH_ENDPOINT, 200, r#"{"items":[]}"#);
        let tier = ApiTier::new("chan", "secret");

        assert!(matches!(tier.fetch(&transport).await, Err(Error::Transport(_))));
        assert_eq!(transport.calls().len(), 1);
    }
}
