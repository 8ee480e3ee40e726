use crate::dom::{DomTree, NodeId};
use crate::error::ResolveError;
use regex::Regex;
use std::sync::LazyLock;

use super::api::InstagramApi;
use super::scan::{find_shortcode, is_post_route, is_stories_route};

static STORIES_USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/stories/([^/]+)").unwrap());

// Everything the resolver needs, captured in one pass under the tree lock so
// the async part never touches the mirror.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaProbe {
    pub username: Option<String>,
    pub element_src: Option<String>,
    pub shortcode: Option<String>,
}

pub fn username_from_stories_path(path: &str) -> Option<String> {
    STORIES_USERNAME_RE
        .captures(path)
        .map(|caps| caps[1].to_string())
}

pub fn probe(tree: &DomTree, video: NodeId, container: NodeId) -> MediaProbe {
    let stories = is_stories_route(&tree.path);
    let username = if stories {
        username_from_stories_path(&tree.path)
    } else {
        None
    };
    let shortcode = if stories {
        None
    } else {
        let mut code = find_shortcode(tree, container);
        if code.is_none() && is_post_route(&tree.path) {
            code = find_shortcode(tree, video);
        }
        code
    };
    MediaProbe {
        username,
        element_src: element_media_url(tree, video),
        shortcode,
    }
}

// First direct URL the element exposes. MediaSource streams surface as
// blob:/data: and are useless for a download, so they are skipped.
fn element_media_url(tree: &DomTree, video: NodeId) -> Option<String> {
    let mut candidates: Vec<String> = Vec::new();
    if let Some(state) = tree.video(video) {
        if let Some(src) = &state.current_src {
            candidates.push(src.clone());
        }
        if let Some(src) = &state.src {
            candidates.push(src.clone());
        }
    }
    if let Some(src) = tree.attr(video, "src") {
        candidates.push(src.to_string());
    }
    for source in tree.descendants_with_tag(video, "source") {
        if let Some(src) = tree.attr(source, "src") {
            candidates.push(src.to_string());
        }
    }
    candidates
        .into_iter()
        .find(|url| !url.is_empty() && !url.starts_with("blob:") && !url.starts_with("data:"))
}

// Story API, element src, post API, in that order. A failing story lookup
// degrades to the next step; a failing post lookup is terminal because it is
// the last resort.
pub async fn resolve_media_url(
    api: &InstagramApi,
    probe: &MediaProbe,
) -> Result<String, ResolveError> {
    if let Some(username) = &probe.username {
        match api.story_video_url(username).await {
            Ok(Some(url)) => return Ok(url),
            Ok(None) => {}
            Err(error) => {
                tracing::debug!("[instagram] consulta de story falhou: {error:#}");
            }
        }
    }

    if let Some(url) = &probe.element_src {
        return Ok(url.clone());
    }

    if let Some(shortcode) = &probe.shortcode {
        match api.post_video_url(shortcode).await {
            Ok(Some(url)) => return Ok(url),
            Ok(None) => {}
            Err(error) => {
                return Err(ResolveError::ResolutionFailed(error.to_string()));
            }
        }
    }

    Err(ResolveError::NoMediaFound)
}
