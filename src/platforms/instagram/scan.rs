use crate::dom::feed::PageHandle;
use crate::dom::{DomTree, Node, NodeId, PositionKind};
use regex::Regex;
use std::sync::LazyLock;

use super::shortcode::shortcode_from_path;

pub const PROCESSED_ATTR: &str = "data-fg-processed";
pub const KIND_ATTR: &str = "data-fg-kind";
pub const KIND_POST: &str = "post";
pub const KIND_STORY: &str = "story";

// The general scanner tolerates more chrome around the video than the
// story-specific rescan does.
pub const SCANNER_STORY_COVERAGE: f64 = 0.75;
pub const STORY_SCAN_COVERAGE: f64 = 0.90;
pub const STORY_ANCESTOR_COVERAGE: f64 = 0.60;

const PERMALINK_HOP_LIMIT: usize = 20;
const STORY_CLASS_KEYWORDS: [&str; 4] = ["story", "stories", "viewer", "modal"];

static POST_ROUTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(p|reel|reels)/").unwrap());
static POST_SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/(reel|reels|p)/").unwrap());

pub fn is_stories_route(path: &str) -> bool {
    path.starts_with("/stories/")
}

pub fn is_post_route(path: &str) -> bool {
    path.starts_with("/reels/") || path.starts_with("/direct/") || POST_ROUTE_RE.is_match(path)
}

fn mentions_post_segment(path: &str) -> bool {
    POST_SEGMENT_RE.is_match(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Post { shortcode: Option<String> },
    Story,
}

// Route first, then a reachable permalink, then geometry. Ambiguity falls
// back to Post so a feed video never gets a floating story toolbar.
pub fn classify(tree: &DomTree, video: NodeId, story_coverage: f64) -> Verdict {
    if is_stories_route(&tree.path) {
        return Verdict::Story;
    }
    if is_post_route(&tree.path) {
        return Verdict::Post { shortcode: None };
    }

    if let Some(container) = tree.parent(video) {
        if let Some(anchor) = permalink_anchor(tree, container) {
            let shortcode = tree.attr(anchor, "href").and_then(shortcode_from_path);
            return Verdict::Post { shortcode };
        }
    }

    let rect = match tree.node(video) {
        Some(node) => node.rect,
        None => return Verdict::Post { shortcode: None },
    };
    if rect.width <= 0.0 || rect.height <= 0.0 {
        return Verdict::Post { shortcode: None };
    }

    let mut story_like = has_story_ancestor(tree, video);
    if !story_like {
        let (w, h) = tree.coverage(video);
        story_like = w > story_coverage || h > story_coverage;
    }

    // Reel permalinks opened from profiles keep story-sized geometry. Only an
    // explicit dialog ancestor outranks the route here.
    if story_like
        && mentions_post_segment(&tree.path)
        && !has_explicit_dialog_ancestor(tree, video)
    {
        story_like = false;
    }

    if story_like {
        Verdict::Story
    } else {
        Verdict::Post { shortcode: None }
    }
}

fn permalink_node(node: &Node) -> bool {
    node.tag == "a"
        && node
            .attr("href")
            .is_some_and(|href| is_permalink_href(href) && shortcode_from_path(href).is_some())
}

fn is_permalink_href(href: &str) -> bool {
    href.starts_with("/p/") || href.starts_with("/reel/") || href.starts_with("/reels/")
}

// Looks for a post permalink in the root's subtree, then in ancestor
// subtrees up to a hop limit, then along the ancestor chain itself.
pub fn permalink_anchor(tree: &DomTree, root: NodeId) -> Option<NodeId> {
    if let Some(anchor) = tree.find_descendant(root, permalink_node) {
        return Some(anchor);
    }
    let mut parent = tree.parent(root);
    for _ in 0..PERMALINK_HOP_LIMIT {
        let Some(cur) = parent else { break };
        if cur == tree.body() {
            break;
        }
        if let Some(anchor) = tree.find_descendant(cur, permalink_node) {
            return Some(anchor);
        }
        parent = tree.parent(cur);
    }
    tree.closest(root, permalink_node)
}

// Shortcode for a download: the route wins over any anchor on screen.
pub fn find_shortcode(tree: &DomTree, root: NodeId) -> Option<String> {
    if let Some(code) = shortcode_from_path(&tree.path) {
        return Some(code);
    }
    permalink_anchor(tree, root)
        .and_then(|anchor| tree.attr(anchor, "href"))
        .and_then(shortcode_from_path)
}

fn has_story_ancestor(tree: &DomTree, video: NodeId) -> bool {
    for ancestor in tree.ancestors(video) {
        if ancestor == tree.body() {
            break;
        }
        let Some(node) = tree.node(ancestor) else {
            break;
        };
        if node.attr("role").is_some_and(|r| r.eq_ignore_ascii_case("dialog"))
            || node.attr("aria-modal") == Some("true")
        {
            return true;
        }
        if let Some(class) = node.attr("class") {
            let class = class.to_lowercase();
            if STORY_CLASS_KEYWORDS.iter().any(|k| class.contains(k)) {
                return true;
            }
        }
        if matches!(node.position(), PositionKind::Fixed | PositionKind::Sticky) {
            let (w, h) = tree.coverage(ancestor);
            if w > STORY_ANCESTOR_COVERAGE || h > STORY_ANCESTOR_COVERAGE {
                return true;
            }
        }
    }
    false
}

fn has_explicit_dialog_ancestor(tree: &DomTree, video: NodeId) -> bool {
    for ancestor in tree.ancestors(video) {
        if ancestor == tree.body() {
            break;
        }
        let Some(node) = tree.node(ancestor) else {
            break;
        };
        if node.attr("role").is_some_and(|r| r.eq_ignore_ascii_case("dialog"))
            || node.attr("aria-modal") == Some("true")
        {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostCandidate {
    pub video: NodeId,
    pub container: NodeId,
}

// One pass over every <video> in the mirror. Story-like videos get marked so
// the toolbar scan can claim them; post-like ones come back as candidates
// for control injection.
pub fn scan_videos(page: &PageHandle) -> Vec<PostCandidate> {
    let (to_mark, candidates) = page.with(|tree| {
        let mut to_mark = Vec::new();
        let mut candidates = Vec::new();
        for video in tree.descendants_with_tag(tree.body(), "video") {
            if tree.attr(video, PROCESSED_ATTR) == Some("1") {
                continue;
            }
            let container = tree.parent(video);
            if container.and_then(|c| tree.attr(c, KIND_ATTR)) == Some(KIND_STORY) {
                continue;
            }
            match classify(tree, video, SCANNER_STORY_COVERAGE) {
                Verdict::Story => to_mark.push((video, container)),
                Verdict::Post { .. } => {
                    if let Some(container) = container {
                        candidates.push(PostCandidate { video, container });
                    }
                }
            }
        }
        (to_mark, candidates)
    });

    for (video, container) in to_mark {
        page.set_attr(video, PROCESSED_ATTR, "1");
        if let Some(container) = container {
            page.set_attr(container, KIND_ATTR, KIND_STORY);
        }
    }
    candidates
}
