use crate::core::cache::MediaCache;
use crate::core::walk::{walk_values, Walk};
use crate::models::media::MediaCollection;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::resolve::force_original_quality;

pub const ENVELOPE_SOURCE: &str = "feedgrab:injector";
pub const ENVELOPE_KIND: &str = "feedgrab:graphql";

// Timeline operations whose responses carry tweet payloads. Anything else on
// the GraphQL endpoint is account plumbing and gets dropped unread.
static GRAPHQL_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"/graphql/[^/]+/(TweetDetail|TweetResultByRestId|UserTweets|UserMedia|HomeTimeline|HomeLatestTimeline|UserTweetsAndReplies|UserHighlightsTweets|UserArticlesTweets|Bookmarks|Likes|CommunitiesExploreTimeline|ListLatestTweetsTimeline|SearchTimeline)$",
    )
    .unwrap()
});

pub fn is_graphql_path(path: &str) -> bool {
    GRAPHQL_PATH_RE.is_match(path)
}

// Fills the cache from one intercepted response envelope and returns the
// tweet ids whose media changed, in discovery order.
pub fn ingest_message(cache: &mut MediaCache, message: &Value) -> Vec<String> {
    if message.get("source").and_then(Value::as_str) != Some(ENVELOPE_SOURCE) {
        return Vec::new();
    }
    if message.get("type").and_then(Value::as_str) != Some(ENVELOPE_KIND) {
        return Vec::new();
    }
    let Some(path) = message.pointer("/detail/path").and_then(Value::as_str) else {
        return Vec::new();
    };
    if !is_graphql_path(path) {
        return Vec::new();
    }
    let Some(body) = message.pointer("/detail/body").and_then(Value::as_str) else {
        return Vec::new();
    };
    if body.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(body) {
        Ok(payload) => ingest_payload(cache, &payload),
        Err(error) => {
            tracing::debug!("[x] payload GraphQL inválido: {error}");
            Vec::new()
        }
    }
}

// Tweet nodes hide at wildly different depths depending on the timeline
// operation, so the whole payload is walked instead of chasing result paths.
fn ingest_payload(cache: &mut MediaCache, payload: &Value) -> Vec<String> {
    let mut changed = Vec::new();
    walk_values(payload, &mut |node| {
        let Some(media) = node
            .pointer("/legacy/extended_entities/media")
            .and_then(Value::as_array)
        else {
            return Walk::Continue;
        };
        if media.is_empty() {
            return Walk::Continue;
        }
        let Some(tweet_id) = tweet_id_of_node(node) else {
            return Walk::Continue;
        };
        let collection = normalize_media(media);
        if collection.is_empty() {
            return Walk::Continue;
        }
        cache.insert(&tweet_id, collection);
        if !changed.contains(&tweet_id) {
            changed.push(tweet_id);
        }
        Walk::Continue
    });
    changed
}

fn tweet_id_of_node(node: &Value) -> Option<String> {
    ["rest_id", "tweet_id", "tweetId"]
        .iter()
        .find_map(|key| node.get(*key).and_then(id_string))
        .or_else(|| node.pointer("/legacy/id_str").and_then(id_string))
        .or_else(|| node.pointer("/legacy/conversation_id_str").and_then(id_string))
}

// Ids arrive as strings in legacy fields and occasionally as bare numbers in
// newer ones.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn normalize_media(media: &[Value]) -> MediaCollection {
    let mut collection = MediaCollection::default();
    for item in media {
        if item.get("type").and_then(Value::as_str) == Some("photo") {
            let url = item
                .get("media_url_https")
                .and_then(Value::as_str)
                .or_else(|| item.get("media_url").and_then(Value::as_str));
            if let Some(url) = url {
                collection.push_image(force_original_quality(url));
            }
            continue;
        }
        let Some(variants) = item
            .pointer("/video_info/variants")
            .and_then(Value::as_array)
        else {
            continue;
        };
        let best = variants
            .iter()
            .filter(|v| v.get("content_type").and_then(Value::as_str) == Some("video/mp4"))
            .max_by_key(|v| v.get("bitrate").and_then(Value::as_i64).unwrap_or(0));
        if let Some(url) = best.and_then(|v| v.get("url")).and_then(Value::as_str) {
            collection.push_video(url);
        }
    }
    collection
}
