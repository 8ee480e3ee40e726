use crate::core::cache::MediaCache;
use crate::dom::{DomTree, NodeId};
use crate::models::media::{MediaCollection, MediaType};
use regex::Regex;
use std::sync::LazyLock;

static STATUS_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"status/(\d+)").unwrap());
static EXTENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.([a-zA-Z0-9]+)$").unwrap());

// The CDN serves a downscaled rendition unless name=orig is requested.
pub fn force_original_quality(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return url.to_string();
    };
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(name, _)| name != "name")
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    {
        let mut pairs = parsed.query_pairs_mut();
        pairs.clear();
        for (name, value) in &kept {
            pairs.append_pair(name, value);
        }
        pairs.append_pair("name", "orig");
    }
    parsed.to_string()
}

pub fn tweet_id_of(tree: &DomTree, article: NodeId) -> Option<String> {
    let anchor = tree.find_descendant(article, |node| {
        node.tag == "a" && node.attr("href").is_some_and(|href| href.contains("/status/"))
    })?;
    let href = tree.attr(anchor, "href")?;
    STATUS_ID_RE
        .captures(href)
        .map(|caps| caps[1].to_string())
}

// DOM fallback for tweets whose payload never crossed the interceptor. Quoted
// tweets are handled separately so their media lands once, preferring cached
// originals over whatever rendition the quote embed shows.
pub fn extract_media_from_dom(
    tree: &DomTree,
    article: NodeId,
    cache: &mut MediaCache,
) -> MediaCollection {
    let nested = tree.descendants_with_tag(article, "article");
    let mut collection = MediaCollection::default();
    collect_dom_media(tree, article, &nested, &mut collection);

    for &quoted in &nested {
        let cached = tweet_id_of(tree, quoted).and_then(|id| cache.get(&id).cloned());
        match cached {
            Some(media) => {
                for item in media.iter() {
                    match item.media_type {
                        MediaType::Image => collection.push_image(item.url.clone()),
                        MediaType::Video => collection.push_video(item.url.clone()),
                    }
                }
            }
            None => collect_dom_media(tree, quoted, &[], &mut collection),
        }
    }
    collection
}

fn collect_dom_media(
    tree: &DomTree,
    root: NodeId,
    exclude: &[NodeId],
    collection: &mut MediaCollection,
) {
    let excluded = |id: NodeId| exclude.iter().any(|&n| tree.contains(n, id));

    for img in tree.descendants_with_tag(root, "img") {
        if excluded(img) {
            continue;
        }
        let Some(src) = tree.attr(img, "src") else {
            continue;
        };
        if !src.contains("pbs.twimg.com/media") {
            continue;
        }
        collection.push_image(force_original_quality(src));
    }
    for video in tree.descendants_with_tag(root, "video") {
        if excluded(video) {
            continue;
        }
        // blob: sources are MediaSource-backed and useless outside the page.
        if let Some(src) = video_src(tree, video) {
            if !src.starts_with("blob:") {
                collection.push_video(src);
            }
        }
    }
}

fn video_src(tree: &DomTree, video: NodeId) -> Option<String> {
    tree.video(video)
        .and_then(|state| state.src.clone())
        .filter(|src| !src.is_empty())
        .or_else(|| {
            tree.attr(video, "src")
                .filter(|src| !src.is_empty())
                .map(str::to_string)
        })
}

pub fn build_filename(
    tweet_id: Option<&str>,
    url: &str,
    media_type: MediaType,
    index: usize,
) -> String {
    let base = tweet_id.unwrap_or("twitter-media");
    let kind = match media_type {
        MediaType::Image => "image",
        MediaType::Video => "video",
    };
    let extension = infer_extension(url, media_type);
    format!("twitter_media/{base}-{kind}-{}.{extension}", index + 1)
}

fn infer_extension(url: &str, media_type: MediaType) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        if let Some(caps) = EXTENSION_RE.captures(parsed.path()) {
            return caps[1].to_string();
        }
    }
    match media_type {
        MediaType::Video => "mp4".to_string(),
        MediaType::Image => "jpg".to_string(),
    }
}
