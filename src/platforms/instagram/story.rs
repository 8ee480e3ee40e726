use crate::core::bridge::DownloadBridge;
use crate::dom::feed::{Icon, MediaEvent, PageHandle};
use crate::dom::NodeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::api::InstagramApi;
use super::resolve;
use super::scan::{
    classify, is_stories_route, Verdict, KIND_ATTR, KIND_STORY, PROCESSED_ATTR,
    STORY_SCAN_COVERAGE,
};

pub const STORY_TOOLBAR_CLASS: &str = "fg-story-toolbar";
pub const STORY_BTN_CLASS: &str = "fg-story-btn";

const EDGE_MARGIN: f64 = 8.0;
const VIDEO_INSET: f64 = 12.0;

// Natural toolbar footprint before the page reports real geometry: two 34px
// buttons, 8px gap, 6px padding each side.
const TOOLBAR_FALLBACK_WIDTH: f64 = 88.0;
const TOOLBAR_FALLBACK_HEIGHT: f64 = 46.0;

#[derive(Clone)]
struct ActiveToolbar {
    video: NodeId,
    container: Option<NodeId>,
    toolbar: NodeId,
    play_btn: NodeId,
    download_btn: NodeId,
    busy: Arc<AtomicBool>,
}

// At most one floating toolbar per page, pinned to whichever video currently
// reads as a story. The stories viewer replaces its <video> on every segment
// advance, so the toolbar follows the candidate rather than a fixed node.
pub struct StoryToolbar {
    page: PageHandle,
    bridge: DownloadBridge,
    api: InstagramApi,
    active: Option<ActiveToolbar>,
}

impl StoryToolbar {
    pub fn new(page: PageHandle, bridge: DownloadBridge, api: InstagramApi) -> Self {
        Self {
            page,
            bridge,
            api,
            active: None,
        }
    }

    pub fn scan(&mut self) {
        let stale = match &self.active {
            Some(active) => !self.page.with(|tree| tree.is_connected(active.video)),
            None => false,
        };
        if stale {
            self.detach();
        }

        let candidate = self.page.with(|tree| {
            tree.descendants_with_tag(tree.body(), "video")
                .into_iter()
                .find(|&video| {
                    let processed = tree.attr(video, PROCESSED_ATTR) == Some("1");
                    let story_marked = tree
                        .parent(video)
                        .and_then(|container| tree.attr(container, KIND_ATTR))
                        == Some(KIND_STORY);
                    if processed && !story_marked {
                        return false;
                    }
                    classify(tree, video, STORY_SCAN_COVERAGE) == Verdict::Story
                })
        });

        // No candidate is not a teardown signal: an attached toolbar stays
        // bound until its video leaves the document or an idle rescan runs.
        if let Some(video) = candidate {
            if self.active.as_ref().map(|a| a.video) != Some(video) {
                self.attach(video);
            }
        }
    }

    fn attach(&mut self, video: NodeId) {
        self.detach();
        let page = &self.page;
        let (container, paused) = page.with(|tree| {
            (
                tree.parent(video),
                tree.video(video).map(|s| s.paused).unwrap_or(true),
            )
        });

        let toolbar = page.create_element("div");
        page.set_attr(toolbar, "class", STORY_TOOLBAR_CLASS);
        page.set_style(toolbar, "position", "fixed");
        page.set_style(toolbar, "z-index", "2147483647");
        page.set_style(toolbar, "pointer-events", "auto");
        page.set_style(toolbar, "display", "flex");
        page.set_style(toolbar, "gap", "8px");
        page.set_style(toolbar, "padding", "6px");
        page.set_style(toolbar, "border-radius", "8px");
        page.set_style(toolbar, "background", "rgba(0,0,0,0.45)");
        page.set_style(toolbar, "align-items", "center");
        page.set_style(toolbar, "box-shadow", "0 6px 20px rgba(0,0,0,0.5)");

        let play_btn = self.build_button(toolbar, "Play/Pause");
        page.set_icon(play_btn, if paused { Icon::Play } else { Icon::Pause });
        let download_btn = self.build_button(toolbar, "Baixar story");
        page.set_icon(download_btn, Icon::Download);

        let body = page.with(|tree| tree.body());
        page.append(body, toolbar);

        page.set_attr(video, PROCESSED_ATTR, "1");
        if let Some(container) = container {
            page.set_attr(container, KIND_ATTR, KIND_STORY);
        }

        self.active = Some(ActiveToolbar {
            video,
            container,
            toolbar,
            play_btn,
            download_btn,
            busy: Arc::new(AtomicBool::new(false)),
        });
        self.reposition();
    }

    fn build_button(&self, toolbar: NodeId, title: &str) -> NodeId {
        let page = &self.page;
        let button = page.create_element("button");
        page.set_attr(button, "class", STORY_BTN_CLASS);
        page.set_attr(button, "title", title);
        page.set_style(button, "background", "transparent");
        page.set_style(button, "border", "none");
        page.set_style(button, "color", "#fff");
        page.set_style(button, "width", "34px");
        page.set_style(button, "height", "34px");
        page.set_style(button, "display", "flex");
        page.set_style(button, "align-items", "center");
        page.set_style(button, "justify-content", "center");
        page.set_style(button, "cursor", "pointer");
        page.append(toolbar, button);
        button
    }

    pub fn detach(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.page.remove(active.toolbar);
        self.page.remove_attr(active.video, PROCESSED_ATTR);
        if let Some(container) = active.container {
            self.page.remove_attr(container, KIND_ATTR);
        }
    }

    // The stories viewer keeps its media column at a fixed offset from the
    // right edge; everywhere else the toolbar hugs the video's top-right
    // corner, clamped to the viewport.
    pub fn reposition(&self) {
        let Some(active) = &self.active else {
            return;
        };
        let (on_stories, video_rect, toolbar_rect, vw, vh) = self.page.with(|tree| {
            (
                is_stories_route(&tree.path),
                tree.node(active.video).map(|n| n.rect).unwrap_or_default(),
                tree.node(active.toolbar).map(|n| n.rect).unwrap_or_default(),
                tree.viewport_width,
                tree.viewport_height,
            )
        });

        let page = &self.page;
        if on_stories {
            page.set_style(active.toolbar, "right", "580px");
            page.set_style(active.toolbar, "top", "16px");
            page.set_style(active.toolbar, "left", "auto");
            page.set_style(active.toolbar, "bottom", "auto");
        } else {
            let tw = if toolbar_rect.width > 0.0 {
                toolbar_rect.width
            } else {
                TOOLBAR_FALLBACK_WIDTH
            };
            let th = if toolbar_rect.height > 0.0 {
                toolbar_rect.height
            } else {
                TOOLBAR_FALLBACK_HEIGHT
            };
            let left = (video_rect.x + video_rect.width - tw - VIDEO_INSET)
                .min(vw - tw - EDGE_MARGIN)
                .max(EDGE_MARGIN);
            let top = (video_rect.y + VIDEO_INSET)
                .min(vh - th - EDGE_MARGIN)
                .max(EDGE_MARGIN);
            page.set_style(active.toolbar, "left", &format!("{left}px"));
            page.set_style(active.toolbar, "top", &format!("{top}px"));
            page.set_style(active.toolbar, "right", "auto");
            page.set_style(active.toolbar, "bottom", "auto");
        }
        page.set_style(active.toolbar, "display", "flex");
        page.set_style(active.toolbar, "visibility", "visible");
        page.set_style(active.toolbar, "opacity", "1");
    }

    pub fn on_click(&mut self, node: NodeId) {
        let Some(active) = self.active.clone() else {
            return;
        };
        if node == active.play_btn {
            let paused = self
                .page
                .with(|t| t.video(active.video).map(|s| s.paused).unwrap_or(true));
            if paused {
                self.page.play(active.video);
                self.page.set_icon(active.play_btn, Icon::Pause);
            } else {
                self.page.pause(active.video);
                self.page.set_icon(active.play_btn, Icon::Play);
            }
        } else if node == active.download_btn {
            self.start_download();
        }
    }

    pub fn on_media(&self, video: NodeId, event: MediaEvent) {
        let Some(active) = &self.active else {
            return;
        };
        if active.video != video {
            return;
        }
        match event {
            MediaEvent::Play => self.page.set_icon(active.play_btn, Icon::Pause),
            MediaEvent::Pause | MediaEvent::Ended => {
                self.page.set_icon(active.play_btn, Icon::Play)
            }
            _ => {}
        }
    }

    pub fn start_download(&self) -> Option<JoinHandle<()>> {
        let active = self.active.as_ref()?;
        if active.busy.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.page.set_icon(active.download_btn, Icon::Loading);

        let probe = self.page.with(|tree| {
            let container = active.container.unwrap_or_else(|| tree.body());
            resolve::probe(tree, active.video, container)
        });
        let page = self.page.clone();
        let api = self.api.clone();
        let bridge = self.bridge.clone();
        let active = active.clone();
        Some(tokio::spawn(async move {
            let outcome = resolve::resolve_media_url(&api, &probe).await;
            let connected = page.with(|tree| tree.is_connected(active.toolbar));
            match outcome {
                Ok(url) => {
                    tokio::spawn(async move {
                        bridge.download_final(&url).await;
                    });
                    if connected {
                        page.set_icon(active.download_btn, Icon::Download);
                    }
                }
                Err(error) => {
                    tracing::warn!("[instagram] falha no download do story: {error:#}");
                    if connected {
                        page.set_icon(active.download_btn, Icon::Download);
                        page.alert(&format!("Não foi possível baixar o story: {error}"));
                    }
                }
            }
            active.busy.store(false, Ordering::SeqCst);
        }))
    }

    pub fn on_reposition_tick(&self) {
        if self.active.is_some() {
            self.reposition();
        }
    }

    // The stories viewer mounts its video a beat after the route settles, so
    // an idle toolbar keeps probing while the route says stories.
    pub fn on_rescan_tick(&mut self) {
        if self.active.is_some() {
            return;
        }
        if !self.page.with(|tree| is_stories_route(&tree.path)) {
            return;
        }
        self.scan();
    }
}
