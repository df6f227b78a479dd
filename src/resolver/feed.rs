// Channel RSS (Atom) feed tier - no key needed, no scraping
// The feed has no live marker, so whatever it lists is taken as a candidate

use super::transport::{HttpRequest, Transport, BROWSER_USER_AGENT};
use super::{ResolverStrategy, StreamCandidate, Tier, MAX_CANDIDATES};
use crate::error::{Error, Result};
use async_trait::async_trait;
use quick_xml::escape::unescape;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::info;

pub const FEED_ENDPOINT: &str = "https://www.youtube.com/feeds/videos.xml";

pub struct FeedTier {
    channel_id: String,
}

impl FeedTier {
    pub fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
        }
    }
}

#[async_trait]
impl ResolverStrategy for FeedTier {
    fn tier(&self) -> Tier {
        Tier::Feed
    }

    async fn fetch(&self, transport: &dyn Transport) -> Result<Vec<StreamCandidate>> {
        info!("Scanning for streams using the channel RSS feed");

        let request = HttpRequest::get(FEED_ENDPOINT)
            .query("channel_id", &self.channel_id)
            .header("User-Agent", BROWSER_USER_AGENT);
        let response = transport.get(request).await?;
        if !response.is_success() {
            return Err(Error::transport(format!("feed returned HTTP {}", response.status)));
        }

        let candidates = parse_feed(&response.body, MAX_CANDIDATES)?;
        info!("Found {} recent videos in the feed", candidates.len());
        Ok(candidates)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    VideoId,
    Title,
}

/// Pull (videoId, title) out of each <entry>, first `limit` only
pub fn parse_feed(xml: &str, limit: usize) -> Result<Vec<StreamCandidate>> {
    let mut reader = Reader::from_str(xml);
    let mut candidates = Vec::new();

    let mut saw_root = false;
    let mut in_entry = false;
    let mut field: Option<Field> = None;
    let mut video_id = String::new();
    let mut title = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| {
                Error::parse(format!("feed xml at byte {}: {e}", reader.buffer_position()))
            })?;

        match event {
            Event::Start(e) => {
                let name = e.name();
                if !saw_root {
                    if name.as_ref() != b"feed" {
                        return Err(Error::parse("feed document has no <feed> root"));
                    }
                    saw_root = true;
                    continue;
                }
                match name.as_ref() {
                    b"entry" => {
                        in_entry = true;
                        video_id.clear();
                        title.clear();
                    }
                    b"yt:videoId" if in_entry => field = Some(Field::VideoId),
                    b"title" if in_entry => field = Some(Field::Title),
                    _ => field = None,
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"entry" if in_entry => {
                    in_entry = false;
                    let id = video_id.trim();
                    if id.is_empty() {
                        return Err(Error::parse("feed entry without a video id"));
                    }
                    candidates.push(StreamCandidate {
                        external_id: id.to_string(),
                        title: title.trim().to_string(),
                        is_live: false,
                        thumbnail: None,
                    });
                    if candidates.len() >= limit {
                        break;
                    }
                }
                _ => field = None,
            },
            Event::Text(e) => {
                let raw = e
                    .decode()
                    .map_err(|err| Error::parse(format!("feed text encoding: {err}")))?;
                push_text(field, &mut video_id, &mut title, &decode_entities(&raw));
            }
            Event::GeneralRef(e) => {
                let name = String::from_utf8_lossy(&e);
                push_text(field, &mut video_id, &mut title, &decode_entities(&format!("&{name};")));
            }
            Event::CData(e) => {
                push_text(field, &mut video_id, &mut title, &String::from_utf8_lossy(&e));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(Error::parse("empty feed document"));
    }
    Ok(candidates)
}

fn push_text(field: Option<Field>, video_id: &mut String, title: &mut String, text: &str) {
    match field {
        Some(Field::VideoId) => video_id.push_str(text),
        Some(Field::Title) => title.push_str(text),
        None => {}
    }
}

/// XML entities plus numeric refs; unknown names are left as written
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    match unescape(text) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => text.to_string(),
    }
}
