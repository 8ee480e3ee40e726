use crate::core::bridge::DownloadBridge;
use crate::dom::feed::{Icon, MediaEvent, PageHandle};
use crate::dom::{NodeId, PositionKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::api::InstagramApi;
use super::resolve;
use super::scan::{scan_videos, PostCandidate, KIND_ATTR, KIND_POST, KIND_STORY, PROCESSED_ATTR};

pub const MASTER_CONTROLS_CLASS: &str = "fg-master-controls";
pub const MASTER_BTN_CLASS: &str = "fg-master-btn";
pub const BOTTOM_PANEL_CLASS: &str = "fg-bottom-panel";
pub const ICON_CLASS: &str = "fg-icon-svg";
pub const TIME_TEXT_CLASS: &str = "fg-time-text";
pub const HOVER_BOX_CLASS: &str = "fg-hover-box";

const SUCCESS_TINT: &str = "#28a745";
const ERROR_TINT: &str = "#dc3545";
const INDICATOR_DELAY: Duration = Duration::from_millis(500);
const TINT_HOLD: Duration = Duration::from_millis(1500);
const VOLUME_WHEEL_STEP: f64 = 0.05;

const AUDIO_LABEL_KEYWORDS: [&str; 4] = ["ses", "audio", "mute", "voice"];

#[derive(Debug, Clone)]
pub struct PrefState {
    pub wants_audio: bool,
    pub volume_level: f64,
    pub dragging_volume: bool,
}

impl Default for PrefState {
    fn default() -> Self {
        Self {
            wants_audio: true,
            volume_level: 1.0,
            dragging_volume: false,
        }
    }
}

// Audio intent shared by every panel on the page. Instagram keeps resetting
// videos to muted; this is what the resync handler restores from.
#[derive(Clone, Default)]
pub struct UiPrefs {
    state: Arc<Mutex<PrefState>>,
}

impl UiPrefs {
    pub fn snapshot(&self) -> PrefState {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut PrefState) -> R) -> R {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

#[derive(Clone)]
pub struct PanelBinding {
    pub container: NodeId,
    pub video: NodeId,
    pub speed_btn: NodeId,
    pub download_btn: NodeId,
    pub fullscreen_btn: NodeId,
    pub play_btn: NodeId,
    pub seek_slider: NodeId,
    pub time_label: NodeId,
    pub volume_icon: NodeId,
    pub volume_slider: NodeId,
    pub busy: Arc<AtomicBool>,
}

impl PanelBinding {
    fn widgets(&self) -> [NodeId; 7] {
        [
            self.speed_btn,
            self.download_btn,
            self.fullscreen_btn,
            self.play_btn,
            self.seek_slider,
            self.volume_icon,
            self.volume_slider,
        ]
    }
}

pub struct PostControls {
    page: PageHandle,
    bridge: DownloadBridge,
    api: InstagramApi,
    prefs: UiPrefs,
    bindings: HashMap<NodeId, PanelBinding>,
    widget_index: HashMap<NodeId, NodeId>,
    fullscreen: Option<NodeId>,
}

impl PostControls {
    pub fn new(page: PageHandle, bridge: DownloadBridge, api: InstagramApi, prefs: UiPrefs) -> Self {
        Self {
            page,
            bridge,
            api,
            prefs,
            bindings: HashMap::new(),
            widget_index: HashMap::new(),
            fullscreen: None,
        }
    }

    pub fn process_batch(&mut self) {
        for candidate in scan_videos(&self.page) {
            self.inject(candidate);
        }
    }

    pub fn inject(&mut self, candidate: PostCandidate) {
        let PostCandidate { video, container } = candidate;
        let (is_story, has_panel, is_static) = self.page.with(|tree| {
            (
                tree.attr(container, KIND_ATTR) == Some(KIND_STORY),
                tree.find_descendant(container, |n| n.has_class(MASTER_CONTROLS_CLASS))
                    .is_some(),
                tree.node(container)
                    .map(|n| n.position() == PositionKind::Static)
                    .unwrap_or(true),
            )
        });
        if is_story {
            return;
        }

        if is_static {
            self.page.set_style(container, "position", "relative");
        }
        self.page.add_class(container, HOVER_BOX_CLASS);
        hide_native_overlays(&self.page, container);

        if !has_panel {
            let prefs = self.prefs.snapshot();
            if prefs.wants_audio {
                self.page.set_muted(video, false);
                self.page.set_volume(video, prefs.volume_level);
            }
            let binding = self.build_panels(container, video);
            for widget in binding.widgets() {
                self.widget_index.insert(widget, video);
            }
            self.bindings.insert(video, binding);
        }

        self.page.set_attr(video, PROCESSED_ATTR, "1");
        self.page.set_attr(container, KIND_ATTR, KIND_POST);
    }

    fn build_panels(&self, container: NodeId, video: NodeId) -> PanelBinding {
        let page = &self.page;
        let paused = page.with(|t| t.video(video).map(|s| s.paused).unwrap_or(true));

        let panel = page.create_element("div");
        page.set_attr(panel, "class", MASTER_CONTROLS_CLASS);

        let speed_btn = page.create_element("button");
        page.set_attr(speed_btn, "class", MASTER_BTN_CLASS);
        page.set_text(speed_btn, "1x");

        let download_btn = page.create_element("div");
        page.set_attr(download_btn, "class", MASTER_BTN_CLASS);
        page.set_style(download_btn, "padding", "0");
        page.set_style(download_btn, "width", "30px");
        page.set_style(download_btn, "justify-content", "center");
        page.set_icon(download_btn, Icon::Download);

        let fullscreen_btn = page.create_element("div");
        page.set_attr(fullscreen_btn, "class", MASTER_BTN_CLASS);
        page.set_style(fullscreen_btn, "padding", "0");
        page.set_style(fullscreen_btn, "width", "30px");
        page.set_style(fullscreen_btn, "justify-content", "center");
        page.set_icon(
            fullscreen_btn,
            if self.fullscreen.is_some() {
                Icon::FullscreenExit
            } else {
                Icon::FullscreenEnter
            },
        );

        page.append(panel, speed_btn);
        page.append(panel, download_btn);
        page.append(panel, fullscreen_btn);
        page.append(container, panel);

        let bottom = page.create_element("div");
        page.set_attr(bottom, "class", BOTTOM_PANEL_CLASS);

        let play_btn = page.create_element("div");
        page.set_attr(play_btn, "class", ICON_CLASS);
        page.set_icon(play_btn, if paused { Icon::Play } else { Icon::Pause });

        let seek_slider = page.create_element("input");
        page.set_attr(seek_slider, "type", "range");
        page.set_attr(seek_slider, "id", "seek-slider");
        page.set_attr(seek_slider, "min", "0");
        page.set_attr(seek_slider, "max", "100");
        page.set_value(seek_slider, "0");

        let time_label = page.create_element("span");
        page.set_attr(time_label, "class", TIME_TEXT_CLASS);
        page.set_text(time_label, "00:00 / 00:00");

        let volume_icon = page.create_element("div");
        page.set_attr(volume_icon, "class", ICON_CLASS);
        page.set_style(volume_icon, "width", "20px");

        let volume_slider = page.create_element("input");
        page.set_attr(volume_slider, "type", "range");
        page.set_attr(volume_slider, "id", "volume-slider");
        page.set_attr(volume_slider, "min", "0");
        page.set_attr(volume_slider, "max", "1");
        page.set_attr(volume_slider, "step", "0.05");

        page.append(bottom, play_btn);
        page.append(bottom, seek_slider);
        page.append(bottom, time_label);
        page.append(bottom, volume_icon);
        page.append(bottom, volume_slider);
        page.append(container, bottom);

        let binding = PanelBinding {
            container,
            video,
            speed_btn,
            download_btn,
            fullscreen_btn,
            play_btn,
            seek_slider,
            time_label,
            volume_icon,
            volume_slider,
            busy: Arc::new(AtomicBool::new(false)),
        };
        self.sync_volume_widgets(&binding);
        binding
    }

    pub fn on_click(&mut self, widget: NodeId) {
        let Some(&video) = self.widget_index.get(&widget) else {
            return;
        };
        let Some(binding) = self.bindings.get(&video).cloned() else {
            return;
        };
        if widget == binding.speed_btn {
            self.cycle_speed(&binding);
        } else if widget == binding.play_btn {
            self.toggle_play(&binding);
        } else if widget == binding.volume_icon {
            self.toggle_audio(&binding);
        } else if widget == binding.download_btn {
            self.start_download(&binding);
        } else if widget == binding.fullscreen_btn {
            self.toggle_fullscreen(&binding);
        }
    }

    pub fn on_slider(&mut self, widget: NodeId, value: f64) {
        let Some(&video) = self.widget_index.get(&widget) else {
            return;
        };
        let Some(binding) = self.bindings.get(&video).cloned() else {
            return;
        };
        if widget == binding.seek_slider {
            self.page.set_current_time(binding.video, value);
        } else if widget == binding.volume_slider {
            self.apply_volume(&binding, value);
        }
    }

    pub fn on_wheel(&mut self, widget: NodeId, delta_y: f64) {
        let Some(&video) = self.widget_index.get(&widget) else {
            return;
        };
        let Some(binding) = self.bindings.get(&video).cloned() else {
            return;
        };
        if widget != binding.volume_slider {
            return;
        }
        let current = self
            .page
            .with(|t| t.attr(widget, "value").and_then(|v| v.parse::<f64>().ok()))
            .unwrap_or(0.0);
        let next = if delta_y < 0.0 {
            (current + VOLUME_WHEEL_STEP).min(1.0)
        } else if delta_y > 0.0 {
            (current - VOLUME_WHEEL_STEP).max(0.0)
        } else {
            current
        };
        self.apply_volume(&binding, next);
    }

    pub fn on_pointer(&mut self, widget: NodeId, down: bool) {
        let Some(&video) = self.widget_index.get(&widget) else {
            return;
        };
        let Some(binding) = self.bindings.get(&video) else {
            return;
        };
        if widget == binding.volume_slider {
            self.prefs.update(|p| p.dragging_volume = down);
        }
    }

    pub fn on_media(&mut self, video: NodeId, event: MediaEvent) {
        let Some(binding) = self.bindings.get(&video).cloned() else {
            return;
        };
        match event {
            MediaEvent::Play => self.page.set_icon(binding.play_btn, Icon::Pause),
            MediaEvent::Pause | MediaEvent::Ended => {
                self.page.set_icon(binding.play_btn, Icon::Play)
            }
            MediaEvent::TimeUpdate => self.sync_progress(&binding),
            MediaEvent::VolumeChange => self.resync_volume(&binding),
        }
    }

    pub fn on_fullscreen(&mut self, element: Option<NodeId>) {
        self.fullscreen = element;
        let icon = if element.is_some() {
            Icon::FullscreenExit
        } else {
            Icon::FullscreenEnter
        };
        for binding in self.bindings.values() {
            self.page.set_icon(binding.fullscreen_btn, icon);
            if element.is_none() {
                self.page.set_style(binding.container, "display", "");
                self.page.set_style(binding.container, "align-items", "");
                self.page.set_style(binding.container, "justify-content", "");
                self.page.set_style(binding.container, "background", "");
            }
        }
    }

    fn cycle_speed(&self, binding: &PanelBinding) {
        let rate = self
            .page
            .with(|t| t.video(binding.video).map(|s| s.playback_rate))
            .unwrap_or(1.0);
        let next = if rate == 1.0 {
            1.5
        } else if rate == 1.5 {
            2.0
        } else {
            1.0
        };
        self.page.set_playback_rate(binding.video, next);
        self.page.set_text(binding.speed_btn, &format!("{next}x"));
    }

    fn toggle_play(&self, binding: &PanelBinding) {
        let paused = self
            .page
            .with(|t| t.video(binding.video).map(|s| s.paused).unwrap_or(true));
        if paused {
            let level = self.prefs.snapshot().volume_level;
            self.page.play(binding.video);
            self.page.set_muted(binding.video, false);
            self.page.set_volume(binding.video, level);
            self.prefs.update(|p| p.wants_audio = true);
        } else {
            self.page.pause(binding.video);
        }
    }

    fn toggle_audio(&self, binding: &PanelBinding) {
        let prefs = self.prefs.update(|p| {
            p.wants_audio = !p.wants_audio;
            p.clone()
        });
        if prefs.wants_audio {
            let level = if prefs.volume_level > 0.0 {
                prefs.volume_level
            } else {
                0.5
            };
            self.page.set_muted(binding.video, false);
            self.page.set_volume(binding.video, level);
        } else {
            self.page.set_muted(binding.video, true);
        }
        self.sync_volume_widgets(binding);
    }

    fn apply_volume(&self, binding: &PanelBinding, value: f64) {
        if value > 0.0 {
            self.prefs.update(|p| {
                p.wants_audio = true;
                p.volume_level = value;
            });
            self.page.set_muted(binding.video, false);
            self.page.set_volume(binding.video, value);
        } else {
            self.prefs.update(|p| p.wants_audio = false);
            self.page.set_muted(binding.video, true);
        }
        self.sync_volume_widgets(binding);
    }

    fn sync_volume_widgets(&self, binding: &PanelBinding) {
        let prefs = self.prefs.snapshot();
        self.page.set_icon(
            binding.volume_icon,
            if prefs.wants_audio {
                Icon::VolumeUp
            } else {
                Icon::VolumeMute
            },
        );
        let value = if prefs.wants_audio {
            prefs.volume_level
        } else {
            0.0
        };
        self.page.set_value(binding.volume_slider, &format!("{value}"));
    }

    fn sync_progress(&self, binding: &PanelBinding) {
        let Some(state) = self.page.with(|t| t.video(binding.video).cloned()) else {
            return;
        };
        let Some(duration) = state.duration.filter(|d| d.is_finite()) else {
            return;
        };
        self.page
            .set_attr(binding.seek_slider, "max", &format!("{duration}"));
        self.page
            .set_value(binding.seek_slider, &format!("{}", state.current_time));
        let text = format!(
            "{} / {}",
            format_time(state.current_time),
            format_time(duration)
        );
        self.page.set_text(binding.time_label, &text);
    }

    // Instagram mutes videos behind our back on visibility changes and feed
    // swaps. Reassert the user's intent unless a drag is in flight.
    fn resync_volume(&self, binding: &PanelBinding) {
        let prefs = self.prefs.snapshot();
        if prefs.dragging_volume || !prefs.wants_audio {
            return;
        }
        let Some(state) = self.page.with(|t| t.video(binding.video).cloned()) else {
            return;
        };
        if state.muted || state.volume == 0.0 {
            self.page.set_muted(binding.video, false);
            self.page.set_volume(binding.video, prefs.volume_level);
        }
    }

    fn toggle_fullscreen(&self, binding: &PanelBinding) {
        if self.fullscreen.is_some() {
            self.page.exit_fullscreen();
        } else {
            self.page.request_fullscreen(binding.container);
            self.page.set_style(binding.container, "display", "flex");
            self.page.set_style(binding.container, "align-items", "center");
            self.page
                .set_style(binding.container, "justify-content", "center");
            self.page.set_style(binding.container, "background", "#000");
        }
    }

    pub fn start_download(&self, binding: &PanelBinding) -> Option<JoinHandle<()>> {
        if binding.busy.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.page.set_icon(binding.download_btn, Icon::Loading);

        let probe = self
            .page
            .with(|tree| resolve::probe(tree, binding.video, binding.container));
        let page = self.page.clone();
        let api = self.api.clone();
        let bridge = self.bridge.clone();
        let binding = binding.clone();
        Some(tokio::spawn(async move {
            let outcome = resolve::resolve_media_url(&api, &probe).await;
            let connected = page.with(|tree| tree.is_connected(binding.video));
            match outcome {
                Ok(url) => {
                    tokio::spawn(async move {
                        bridge.download_final(&url).await;
                    });
                    if connected {
                        tokio::time::sleep(INDICATOR_DELAY).await;
                        page.set_icon(binding.download_btn, Icon::Download);
                        page.set_style(binding.download_btn, "background-color", SUCCESS_TINT);
                        tokio::time::sleep(TINT_HOLD).await;
                        page.set_style(binding.download_btn, "background-color", "");
                    }
                }
                Err(error) => {
                    tracing::warn!("[instagram] download do post falhou: {error}");
                    if connected {
                        page.set_icon(binding.download_btn, Icon::Download);
                        page.set_style(binding.download_btn, "background-color", ERROR_TINT);
                        page.alert(&error.to_string());
                        tokio::time::sleep(TINT_HOLD).await;
                        page.set_style(binding.download_btn, "background-color", "");
                    }
                }
            }
            binding.busy.store(false, Ordering::SeqCst);
        }))
    }
}

// Instagram's own audio toggles fight with the injected panel, so every
// managed container gets them hidden.
pub fn hide_native_overlays(page: &PageHandle, container: NodeId) {
    let targets = page.with(|tree| {
        tree.descendants(container)
            .into_iter()
            .filter(|&id| {
                let Some(node) = tree.node(id) else {
                    return false;
                };
                let button_like = node.tag == "button"
                    || (node.tag == "div" && node.attr("role") == Some("button"));
                if !button_like {
                    return false;
                }
                let ours = tree.closest(id, |n| {
                    n.has_class(MASTER_CONTROLS_CLASS) || n.has_class(BOTTOM_PANEL_CLASS)
                });
                if ours.is_some() {
                    return false;
                }
                let label = node
                    .attr("aria-label")
                    .map(str::to_lowercase)
                    .unwrap_or_default();
                AUDIO_LABEL_KEYWORDS.iter().any(|k| label.contains(k))
            })
            .collect::<Vec<_>>()
    });
    for id in targets {
        page.set_style(id, "display", "none");
    }
}

pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() {
        return "00:00".to_string();
    }
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bridge::{
        MemoryDownloadSink, MemoryHistoryStore, MemorySettingsStore, SinkCall,
    };
    use crate::dom::feed::PageCommand;
    use crate::dom::{DomTree, Rect, VideoState};
    use crate::platforms::PageSession;
    use tokio::sync::mpsc;

    fn setup() -> (
        PostControls,
        PageHandle,
        Arc<MemoryDownloadSink>,
        mpsc::UnboundedReceiver<PageCommand>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tree = Arc::new(Mutex::new(DomTree::new()));
        let page = PageHandle::new(tree, tx);
        let sink = Arc::new(MemoryDownloadSink::default());
        let (bridge_tx, _bridge_rx) = mpsc::unbounded_channel();
        let bridge = DownloadBridge::new(
            Arc::new(MemorySettingsStore::default()),
            Arc::new(MemoryHistoryStore::default()),
            sink.clone(),
            reqwest::Client::new(),
            bridge_tx,
        );
        let api = InstagramApi::new(reqwest::Client::new(), PageSession::default());
        let controls = PostControls::new(page.clone(), bridge, api, UiPrefs::default());
        (controls, page, sink, rx)
    }

    fn feed_post(page: &PageHandle) -> (NodeId, NodeId) {
        page.update(|tree| {
            tree.set_viewport(1000.0, 800.0);
            tree.set_path("/");
        });
        let body = page.with(|t| t.body());
        let container = page.create_element("div");
        page.append(body, container);
        let video = page.create_element("video");
        page.append(container, video);
        page.update(|t| t.set_rect(video, Rect::new(100.0, 100.0, 400.0, 300.0)));
        let anchor = page.create_element("a");
        page.set_attr(anchor, "href", "/p/Fix123/");
        page.append(container, anchor);
        (container, video)
    }

    fn binding_of(controls: &PostControls, video: NodeId) -> PanelBinding {
        controls.bindings.get(&video).cloned().unwrap()
    }

    #[test]
    fn inject_builds_both_panels() {
        let (mut controls, page, _sink, _rx) = setup();
        let (container, video) = feed_post(&page);
        controls.process_batch();

        page.with(|tree| {
            let node = tree.node(container).unwrap();
            assert_eq!(node.style("position"), Some("relative"));
            assert!(node.has_class(HOVER_BOX_CLASS));

            let panel = tree
                .find_descendant(container, |n| n.has_class(MASTER_CONTROLS_CLASS))
                .unwrap();
            assert_eq!(tree.node(panel).unwrap().children.len(), 3);

            let bottom = tree
                .find_descendant(container, |n| n.has_class(BOTTOM_PANEL_CLASS))
                .unwrap();
            assert_eq!(tree.node(bottom).unwrap().children.len(), 5);

            assert_eq!(tree.attr(video, PROCESSED_ATTR), Some("1"));
            assert_eq!(tree.attr(container, KIND_ATTR), Some(KIND_POST));

            // default intent is audible
            let state = tree.video(video).unwrap();
            assert!(!state.muted);
            assert!((state.volume - 1.0).abs() < 1e-9);
        });

        let binding = binding_of(&controls, video);
        page.with(|tree| {
            assert_eq!(tree.node(binding.speed_btn).unwrap().text, "1x");
            assert_eq!(tree.attr(binding.download_btn, "data-fg-icon"), Some("download"));
            assert_eq!(tree.attr(binding.seek_slider, "id"), Some("seek-slider"));
            assert_eq!(tree.attr(binding.volume_slider, "id"), Some("volume-slider"));
            assert_eq!(tree.attr(binding.volume_slider, "value"), Some("1"));
            assert_eq!(tree.attr(binding.volume_icon, "data-fg-icon"), Some("volume-up"));
            assert_eq!(tree.node(binding.time_label).unwrap().text, "00:00 / 00:00");
        });
    }

    #[test]
    fn second_batch_does_not_duplicate_panels() {
        let (mut controls, page, _sink, _rx) = setup();
        let (container, _) = feed_post(&page);
        controls.process_batch();
        controls.process_batch();

        let panels = page.with(|tree| {
            tree.descendants(container)
                .into_iter()
                .filter(|&id| {
                    tree.node(id)
                        .map(|n| n.has_class(MASTER_CONTROLS_CLASS))
                        .unwrap_or(false)
                })
                .count()
        });
        assert_eq!(panels, 1);
        assert_eq!(controls.bindings.len(), 1);
    }

    #[test]
    fn story_tagged_container_is_left_alone() {
        let (mut controls, page, _sink, _rx) = setup();
        let (container, video) = feed_post(&page);
        page.set_attr(container, KIND_ATTR, KIND_STORY);

        controls.inject(PostCandidate { video, container });
        assert!(controls.bindings.is_empty());
        assert!(page.with(|tree| tree
            .find_descendant(container, |n| n.has_class(MASTER_CONTROLS_CLASS))
            .is_none()));
    }

    #[test]
    fn audio_toggles_on_native_overlays_are_hidden() {
        let (mut controls, page, _sink, _rx) = setup();
        let (container, _) = feed_post(&page);
        let mute_btn = page.create_element("button");
        page.set_attr(mute_btn, "aria-label", "Audio is muted");
        page.append(container, mute_btn);
        let like_btn = page.create_element("button");
        page.set_attr(like_btn, "aria-label", "Curtir");
        page.append(container, like_btn);
        let fake_btn = page.create_element("div");
        page.set_attr(fake_btn, "role", "button");
        page.set_attr(fake_btn, "aria-label", "Ses seviyesi");
        page.append(container, fake_btn);

        controls.process_batch();

        page.with(|tree| {
            assert_eq!(tree.node(mute_btn).unwrap().style("display"), Some("none"));
            assert_eq!(tree.node(fake_btn).unwrap().style("display"), Some("none"));
            assert_eq!(tree.node(like_btn).unwrap().style("display"), None);
            // the injected panel buttons stay visible
            let binding = tree
                .find_descendant(container, |n| n.has_class(MASTER_BTN_CLASS))
                .unwrap();
            assert_eq!(tree.node(binding).unwrap().style("display"), None);
        });
    }

    #[test]
    fn speed_button_cycles_rates() {
        let (mut controls, page, _sink, _rx) = setup();
        let (_, video) = feed_post(&page);
        controls.process_batch();
        let binding = binding_of(&controls, video);

        for (expected_rate, expected_label) in [(1.5, "1.5x"), (2.0, "2x"), (1.0, "1x")] {
            controls.on_click(binding.speed_btn);
            page.with(|tree| {
                let rate = tree.video(video).unwrap().playback_rate;
                assert!((rate - expected_rate).abs() < 1e-9);
                assert_eq!(tree.node(binding.speed_btn).unwrap().text, expected_label);
            });
        }
    }

    #[test]
    fn play_click_unmutes_and_records_intent() {
        let (mut controls, page, _sink, _rx) = setup();
        let (_, video) = feed_post(&page);
        controls.prefs.update(|p| {
            p.wants_audio = false;
            p.volume_level = 0.4;
        });
        controls.process_batch();
        let binding = binding_of(&controls, video);
        page.update(|t| {
            if let Some(state) = t.video_mut(video) {
                state.muted = true;
            }
        });

        controls.on_click(binding.play_btn);

        page.with(|tree| {
            let state = tree.video(video).unwrap();
            assert!(!state.paused);
            assert!(!state.muted);
            assert!((state.volume - 0.4).abs() < 1e-9);
        });
        assert!(controls.prefs.snapshot().wants_audio);

        controls.on_click(binding.play_btn);
        assert!(page.with(|t| t.video(video).unwrap().paused));
    }

    #[test]
    fn volume_slider_input_drives_state() {
        let (mut controls, page, _sink, _rx) = setup();
        let (_, video) = feed_post(&page);
        controls.process_batch();
        let binding = binding_of(&controls, video);

        controls.on_slider(binding.volume_slider, 0.3);
        page.with(|tree| {
            let state = tree.video(video).unwrap();
            assert!(!state.muted);
            assert!((state.volume - 0.3).abs() < 1e-9);
            assert_eq!(tree.attr(binding.volume_slider, "value"), Some("0.3"));
            assert_eq!(tree.attr(binding.volume_icon, "data-fg-icon"), Some("volume-up"));
        });
        let prefs = controls.prefs.snapshot();
        assert!(prefs.wants_audio);
        assert!((prefs.volume_level - 0.3).abs() < 1e-9);

        controls.on_slider(binding.volume_slider, 0.0);
        page.with(|tree| {
            assert!(tree.video(video).unwrap().muted);
            assert_eq!(tree.attr(binding.volume_slider, "value"), Some("0"));
            assert_eq!(
                tree.attr(binding.volume_icon, "data-fg-icon"),
                Some("volume-mute")
            );
        });
        let prefs = controls.prefs.snapshot();
        assert!(!prefs.wants_audio);
        // the remembered level survives muting through the slider
        assert!((prefs.volume_level - 0.3).abs() < 1e-9);
    }

    #[test]
    fn wheel_steps_and_clamps_volume() {
        let (mut controls, page, _sink, _rx) = setup();
        let (_, video) = feed_post(&page);
        controls.process_batch();
        let binding = binding_of(&controls, video);

        controls.on_slider(binding.volume_slider, 0.5);
        controls.on_wheel(binding.volume_slider, -1.0);
        let level = controls.prefs.snapshot().volume_level;
        assert!((level - 0.55).abs() < 1e-9);

        controls.on_slider(binding.volume_slider, 0.98);
        controls.on_wheel(binding.volume_slider, -1.0);
        assert!((controls.prefs.snapshot().volume_level - 1.0).abs() < 1e-9);

        controls.on_slider(binding.volume_slider, 0.03);
        controls.on_wheel(binding.volume_slider, 1.0);
        // stepping below zero mutes instead of going negative
        assert!(!controls.prefs.snapshot().wants_audio);
        assert!(page.with(|t| t.video(video).unwrap().muted));
    }

    #[test]
    fn volume_change_reasserts_intent() {
        let (mut controls, page, _sink, _rx) = setup();
        let (_, video) = feed_post(&page);
        controls.process_batch();
        controls.prefs.update(|p| p.volume_level = 0.8);

        // the page mutes the video on its own
        page.update(|t| {
            if let Some(state) = t.video_mut(video) {
                state.muted = true;
                state.volume = 0.0;
            }
        });
        controls.on_media(video, MediaEvent::VolumeChange);

        page.with(|tree| {
            let state = tree.video(video).unwrap();
            assert!(!state.muted);
            assert!((state.volume - 0.8).abs() < 1e-9);
        });
    }

    #[test]
    fn resync_skipped_while_dragging() {
        let (mut controls, page, _sink, _rx) = setup();
        let (_, video) = feed_post(&page);
        controls.process_batch();
        let binding = binding_of(&controls, video);

        controls.on_pointer(binding.volume_slider, true);
        page.update(|t| {
            if let Some(state) = t.video_mut(video) {
                state.muted = true;
            }
        });
        controls.on_media(video, MediaEvent::VolumeChange);
        assert!(page.with(|t| t.video(video).unwrap().muted));

        controls.on_pointer(binding.volume_slider, false);
        controls.on_media(video, MediaEvent::VolumeChange);
        assert!(!page.with(|t| t.video(video).unwrap().muted));
    }

    #[test]
    fn resync_respects_muted_intent() {
        let (mut controls, page, _sink, _rx) = setup();
        let (_, video) = feed_post(&page);
        controls.process_batch();
        let binding = binding_of(&controls, video);
        controls.on_slider(binding.volume_slider, 0.0);

        // the page sets the video's volume on its own while the desired state
        // is muted; the resync must leave it alone
        page.update(|t| {
            if let Some(state) = t.video_mut(video) {
                state.volume = 0.3;
            }
        });
        controls.on_media(video, MediaEvent::VolumeChange);
        page.with(|tree| {
            let state = tree.video(video).unwrap();
            assert!(state.muted);
            assert!((state.volume - 0.3).abs() < 1e-9);
        });
    }

    #[test]
    fn mute_toggle_falls_back_to_half_volume() {
        let (mut controls, page, _sink, _rx) = setup();
        let (_, video) = feed_post(&page);
        controls.process_batch();
        let binding = binding_of(&controls, video);
        controls.prefs.update(|p| {
            p.wants_audio = false;
            p.volume_level = 0.0;
        });

        controls.on_click(binding.volume_icon);
        page.with(|tree| {
            let state = tree.video(video).unwrap();
            assert!(!state.muted);
            assert!((state.volume - 0.5).abs() < 1e-9);
        });

        controls.on_click(binding.volume_icon);
        assert!(page.with(|t| t.video(video).unwrap().muted));
    }

    #[test]
    fn timeupdate_syncs_seek_and_label() {
        let (mut controls, page, _sink, _rx) = setup();
        let (_, video) = feed_post(&page);
        controls.process_batch();
        let binding = binding_of(&controls, video);

        page.update(|t| {
            t.set_video_state(
                video,
                VideoState {
                    current_time: 75.5,
                    duration: Some(200.0),
                    ..VideoState::default()
                },
            )
        });
        controls.on_media(video, MediaEvent::TimeUpdate);

        page.with(|tree| {
            assert_eq!(tree.attr(binding.seek_slider, "max"), Some("200"));
            assert_eq!(tree.attr(binding.seek_slider, "value"), Some("75.5"));
            assert_eq!(tree.node(binding.time_label).unwrap().text, "01:15 / 03:20");
        });
    }

    #[test]
    fn timeupdate_without_duration_is_ignored() {
        let (mut controls, page, _sink, _rx) = setup();
        let (_, video) = feed_post(&page);
        controls.process_batch();
        let binding = binding_of(&controls, video);

        controls.on_media(video, MediaEvent::TimeUpdate);
        page.with(|tree| {
            assert_eq!(tree.attr(binding.seek_slider, "max"), Some("100"));
            assert_eq!(tree.node(binding.time_label).unwrap().text, "00:00 / 00:00");
        });
    }

    #[test]
    fn fullscreen_toggle_styles_and_reverts() {
        let (mut controls, page, _sink, mut rx) = setup();
        let (container, video) = feed_post(&page);
        controls.process_batch();
        let binding = binding_of(&controls, video);
        while rx.try_recv().is_ok() {}

        controls.on_click(binding.fullscreen_btn);
        let mut requested = false;
        while let Ok(command) = rx.try_recv() {
            if command == (PageCommand::RequestFullscreen { node: container }) {
                requested = true;
            }
        }
        assert!(requested);
        page.with(|tree| {
            let node = tree.node(container).unwrap();
            assert_eq!(node.style("display"), Some("flex"));
            assert_eq!(node.style("background"), Some("#000"));
        });

        controls.on_fullscreen(Some(container));
        page.with(|tree| {
            assert_eq!(
                tree.attr(binding.fullscreen_btn, "data-fg-icon"),
                Some("fullscreen-exit")
            );
        });

        controls.on_click(binding.fullscreen_btn);
        let mut exited = false;
        while let Ok(command) = rx.try_recv() {
            if command == PageCommand::ExitFullscreen {
                exited = true;
            }
        }
        assert!(exited);

        controls.on_fullscreen(None);
        page.with(|tree| {
            let node = tree.node(container).unwrap();
            assert_eq!(node.style("display"), Some(""));
            assert_eq!(node.style("background"), Some(""));
            assert_eq!(
                tree.attr(binding.fullscreen_btn, "data-fg-icon"),
                Some("fullscreen-enter")
            );
        });
    }

    #[test]
    fn format_time_cases() {
        assert_eq!(format_time(0.0), "00:00");
        assert_eq!(format_time(75.0), "01:15");
        assert_eq!(format_time(75.9), "01:15");
        assert_eq!(format_time(3661.0), "61:01");
        assert_eq!(format_time(f64::NAN), "00:00");
        assert_eq!(format_time(f64::INFINITY), "00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn download_dispatches_element_source() {
        let (mut controls, page, sink, _rx) = setup();
        let (_, video) = feed_post(&page);
        // unsupported scheme: the final fetch fails instantly and the bridge
        // falls back to handing the URL to the sink
        page.update(|t| {
            t.set_video_state(
                video,
                VideoState {
                    current_src: Some("ftp://cdn.example/clip.mp4".into()),
                    ..VideoState::default()
                },
            )
        });
        controls.process_batch();
        let binding = binding_of(&controls, video);

        let handle = controls.start_download(&binding).unwrap();
        handle.await.unwrap();

        assert!(!binding.busy.load(Ordering::SeqCst));
        page.with(|tree| {
            assert_eq!(tree.attr(binding.download_btn, "data-fg-icon"), Some("download"));
            assert_eq!(
                tree.node(binding.download_btn).unwrap().style("background-color"),
                Some("")
            );
        });

        for _ in 0..100 {
            if !sink.calls.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let calls = sink.calls.lock().await;
        assert_eq!(
            calls[0],
            SinkCall::Url {
                url: "ftp://cdn.example/clip.mp4".into(),
                filename: "clip.mp4".into(),
                save_as: true,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn download_without_media_alerts() {
        let (mut controls, page, sink, mut rx) = setup();
        let (container, video) = feed_post(&page);
        // drop the permalink so nothing resolves
        let anchor = page.with(|t| {
            t.find_descendant(container, |n| n.tag == "a").unwrap()
        });
        page.remove(anchor);
        controls.process_batch();
        let binding = binding_of(&controls, video);
        while rx.try_recv().is_ok() {}

        let handle = controls.start_download(&binding).unwrap();
        handle.await.unwrap();

        let mut alert = None;
        while let Ok(command) = rx.try_recv() {
            if let PageCommand::Alert { message } = command {
                alert = Some(message);
            }
        }
        assert_eq!(
            alert.as_deref(),
            Some("Nenhuma mídia para download encontrada")
        );
        assert!(sink.calls.lock().await.is_empty());
        assert!(!binding.busy.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn download_busy_guard_blocks_reentry() {
        let (mut controls, page, _sink, mut rx) = setup();
        let (_, video) = feed_post(&page);
        controls.process_batch();
        let binding = binding_of(&controls, video);
        while rx.try_recv().is_ok() {}

        binding.busy.store(true, Ordering::SeqCst);
        assert!(controls.start_download(&binding).is_none());
        assert!(rx.try_recv().is_err());
    }
}
