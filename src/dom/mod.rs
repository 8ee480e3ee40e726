use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod feed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionKind {
    Static,
    Relative,
    Absolute,
    Fixed,
    Sticky,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoState {
    pub current_src: Option<String>,
    pub src: Option<String>,
    pub paused: bool,
    pub muted: bool,
    pub volume: f64,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub playback_rate: f64,
}

impl Default for VideoState {
    fn default() -> Self {
        Self {
            current_src: None,
            src: None,
            paused: true,
            muted: false,
            volume: 1.0,
            current_time: 0.0,
            duration: None,
            playback_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub tag: String,
    pub attrs: HashMap<String, String>,
    pub styles: HashMap<String, String>,
    pub classes: Vec<String>,
    pub text: String,
    pub rect: Rect,
    pub video: Option<VideoState>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn style(&self, name: &str) -> Option<&str> {
        self.styles.get(name).map(String::as_str)
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.iter().any(|c| c == name)
    }

    pub fn position(&self) -> PositionKind {
        match self.style("position") {
            Some("relative") => PositionKind::Relative,
            Some("absolute") => PositionKind::Absolute,
            Some("fixed") => PositionKind::Fixed,
            Some("sticky") => PositionKind::Sticky,
            _ => PositionKind::Static,
        }
    }

    pub fn is_video(&self) -> bool {
        self.tag == "video"
    }
}

// Mirror of the hosting page's document: an arena of nodes plus the viewport
// metrics and current route. Removal only detaches; slots are never reused
// within a page session, so NodeIds stay stable.
#[derive(Debug)]
pub struct DomTree {
    nodes: Vec<Node>,
    root: NodeId,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub path: String,
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DomTree {
    pub fn new() -> Self {
        let body = Node {
            tag: "body".to_string(),
            ..Node::default()
        };
        Self {
            nodes: vec![body],
            root: NodeId(0),
            viewport_width: 0.0,
            viewport_height: 0.0,
            path: "/".to_string(),
        }
    }

    pub fn from_html(html: &str) -> Self {
        let mut tree = Self::new();
        let document = Html::parse_document(html);
        let body_selector = Selector::parse("body").unwrap();
        if let Some(body) = document.select(&body_selector).next() {
            for (name, value) in body.value().attrs() {
                tree.set_attr(tree.root, name, value);
            }
            let root = tree.root;
            tree.ingest_children(body, root);
        }
        tree
    }

    fn ingest_children(&mut self, element: ElementRef<'_>, parent: NodeId) {
        let mut text = String::new();
        for child in element.children() {
            if let Some(fragment) = child.value().as_text() {
                text.push_str(fragment);
            } else if let Some(child_element) = ElementRef::wrap(child) {
                let id = self.ingest_element(child_element, parent);
                self.ingest_children(child_element, id);
            }
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.nodes[parent.0].text = trimmed.to_string();
        }
    }

    fn ingest_element(&mut self, element: ElementRef<'_>, parent: NodeId) -> NodeId {
        let id = self.create_element(element.value().name());
        for (name, value) in element.value().attrs() {
            self.set_attr(id, name, value);
        }
        self.append(parent, id);
        id
    }

    pub fn body(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|n| n.tag.as_str())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id).and_then(|n| n.attr(name))
    }

    pub fn video(&self, id: NodeId) -> Option<&VideoState> {
        self.node(id).and_then(|n| n.video.as_ref())
    }

    pub fn video_mut(&mut self, id: NodeId) -> Option<&mut VideoState> {
        self.node_mut(id).and_then(|n| n.video.as_mut())
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut node = Node {
            tag: tag.to_string(),
            ..Node::default()
        };
        if node.tag == "video" {
            node.video = Some(VideoState::default());
        }
        self.nodes.push(node);
        id
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        if self.node(parent).is_none() || self.node(child).is_none() || parent == child {
            return;
        }
        // Appending an ancestor under its own descendant would cycle.
        if self.contains(child, parent) {
            return;
        }
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub fn remove(&mut self, id: NodeId) {
        self.detach(id);
    }

    fn detach(&mut self, id: NodeId) {
        let parent = match self.nodes.get(id.0).and_then(|n| n.parent) {
            Some(parent) => parent,
            None => return,
        };
        if let Some(parent_node) = self.nodes.get_mut(parent.0) {
            parent_node.children.retain(|&c| c != id);
        }
        self.nodes[id.0].parent = None;
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            if name == "class" {
                node.classes = value.split_whitespace().map(str::to_string).collect();
            }
            node.attrs.insert(name.to_string(), value.to_string());
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            if name == "class" {
                node.classes.clear();
            }
            node.attrs.remove(name);
        }
    }

    pub fn set_style(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.styles.insert(name.to_string(), value.to_string());
        }
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.text = text.to_string();
        }
    }

    pub fn set_rect(&mut self, id: NodeId, rect: Rect) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.rect = rect;
        }
    }

    pub fn set_video_state(&mut self, id: NodeId, state: VideoState) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.video = Some(state);
        }
    }

    pub fn set_viewport(&mut self, width: f64, height: f64) {
        self.viewport_width = width;
        self.viewport_height = height;
    }

    pub fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&cur| self.parent(cur))
    }

    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = match self.node(id) {
            Some(node) => node.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(cur) = stack.pop() {
            out.push(cur);
            if let Some(node) = self.node(cur) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn descendants_with_tag(&self, id: NodeId, tag: &str) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|&d| self.tag(d) == Some(tag))
            .collect()
    }

    pub fn find_descendant(
        &self,
        id: NodeId,
        predicate: impl Fn(&Node) -> bool,
    ) -> Option<NodeId> {
        let mut stack: Vec<NodeId> = match self.node(id) {
            Some(node) => node.children.iter().rev().copied().collect(),
            None => return None,
        };
        while let Some(cur) = stack.pop() {
            if let Some(node) = self.node(cur) {
                if predicate(node) {
                    return Some(cur);
                }
                stack.extend(node.children.iter().rev().copied());
            }
        }
        None
    }

    pub fn closest(&self, id: NodeId, predicate: impl Fn(&Node) -> bool) -> Option<NodeId> {
        let mut cur = Some(id);
        while let Some(candidate) = cur {
            let node = self.node(candidate)?;
            if predicate(node) {
                return Some(candidate);
            }
            cur = node.parent;
        }
        None
    }

    pub fn contains(&self, container: NodeId, target: NodeId) -> bool {
        container == target || self.ancestors(target).any(|a| a == container)
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        id == self.root || self.ancestors(id).any(|a| a == self.root)
    }

    // Fraction of each viewport axis covered by the node's rect. Missing
    // geometry reads as zero coverage, never an error.
    pub fn coverage(&self, id: NodeId) -> (f64, f64) {
        let rect = match self.node(id) {
            Some(node) => node.rect,
            None => return (0.0, 0.0),
        };
        let width = if self.viewport_width > 0.0 {
            rect.width / self.viewport_width
        } else {
            0.0
        };
        let height = if self.viewport_height > 0.0 {
            rect.height / self.viewport_height
        } else {
            0.0
        };
        (width, height)
    }
}
