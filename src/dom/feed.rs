use crate::dom::{DomTree, NodeId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaEvent {
    Play,
    Pause,
    VolumeChange,
    TimeUpdate,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PageEvent {
    Mutated {
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
        attributes: Vec<NodeId>,
    },
    Media {
        node: NodeId,
        event: MediaEvent,
    },
    Click {
        node: NodeId,
    },
    SliderInput {
        node: NodeId,
        value: f64,
    },
    Wheel {
        node: NodeId,
        delta_y: f64,
    },
    PointerDown {
        node: NodeId,
    },
    PointerUp {
        node: NodeId,
    },
    FullscreenChanged {
        node: Option<NodeId>,
    },
    RouteChanged {
        path: String,
    },
    ViewportChanged,
    PageMessage {
        message: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Icon {
    Play,
    Pause,
    Download,
    Loading,
    VolumeUp,
    VolumeMute,
    FullscreenEnter,
    FullscreenExit,
}

impl Icon {
    pub fn as_str(self) -> &'static str {
        match self {
            Icon::Play => "play",
            Icon::Pause => "pause",
            Icon::Download => "download",
            Icon::Loading => "loading",
            Icon::VolumeUp => "volume-up",
            Icon::VolumeMute => "volume-mute",
            Icon::FullscreenEnter => "fullscreen-enter",
            Icon::FullscreenExit => "fullscreen-exit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PageCommand {
    CreateElement { node: NodeId, tag: String },
    Append { parent: NodeId, child: NodeId },
    Remove { node: NodeId },
    SetAttr { node: NodeId, name: String, value: String },
    RemoveAttr { node: NodeId, name: String },
    SetStyle { node: NodeId, name: String, value: String },
    SetText { node: NodeId, text: String },
    SetIcon { node: NodeId, icon: Icon },
    SetValue { node: NodeId, value: String },
    Play { node: NodeId },
    Pause { node: NodeId },
    SetMuted { node: NodeId, muted: bool },
    SetVolume { node: NodeId, volume: f64 },
    SetCurrentTime { node: NodeId, seconds: f64 },
    SetPlaybackRate { node: NodeId, rate: f64 },
    RequestFullscreen { node: NodeId },
    ExitFullscreen,
    Activate { node: NodeId },
    Notify { message: String },
    Alert { message: String },
}

// Engine-side facade over the shared mirror plus the outbound command
// channel. Mutators update the mirror before emitting, so handlers always
// observe their own writes. Read with `with`, never from inside another
// `with`/`update` closure: the mutex is not reentrant.
#[derive(Clone)]
pub struct PageHandle {
    tree: Arc<Mutex<DomTree>>,
    commands: UnboundedSender<PageCommand>,
}

impl PageHandle {
    pub fn new(tree: Arc<Mutex<DomTree>>, commands: UnboundedSender<PageCommand>) -> Self {
        Self { tree, commands }
    }

    pub fn with<R>(&self, f: impl FnOnce(&DomTree) -> R) -> R {
        let guard = self
            .tree
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    // Mirror-only mutation, no command emitted. Producer side: apply the
    // page's own change to the mirror before dispatching the event for it.
    pub fn update<R>(&self, f: impl FnOnce(&mut DomTree) -> R) -> R {
        let mut guard = self
            .tree
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn send(&self, command: PageCommand) {
        let _ = self.commands.send(command);
    }

    pub fn create_element(&self, tag: &str) -> NodeId {
        let node = self.update(|tree| tree.create_element(tag));
        self.send(PageCommand::CreateElement {
            node,
            tag: tag.to_string(),
        });
        node
    }

    pub fn append(&self, parent: NodeId, child: NodeId) {
        self.update(|tree| tree.append(parent, child));
        self.send(PageCommand::Append { parent, child });
    }

    pub fn remove(&self, node: NodeId) {
        self.update(|tree| tree.remove(node));
        self.send(PageCommand::Remove { node });
    }

    pub fn set_attr(&self, node: NodeId, name: &str, value: &str) {
        self.update(|tree| tree.set_attr(node, name, value));
        self.send(PageCommand::SetAttr {
            node,
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    pub fn remove_attr(&self, node: NodeId, name: &str) {
        self.update(|tree| tree.remove_attr(node, name));
        self.send(PageCommand::RemoveAttr {
            node,
            name: name.to_string(),
        });
    }

    // Class toggles go through the class attribute so the mirror stays the
    // single source of truth for membership checks.
    pub fn add_class(&self, node: NodeId, class: &str) {
        let current = self.with(|tree| tree.attr(node, "class").unwrap_or_default().to_string());
        if current.split_whitespace().any(|c| c == class) {
            return;
        }
        let value = if current.is_empty() {
            class.to_string()
        } else {
            format!("{current} {class}")
        };
        self.set_attr(node, "class", &value);
    }

    pub fn remove_class(&self, node: NodeId, class: &str) {
        let current = self.with(|tree| tree.attr(node, "class").unwrap_or_default().to_string());
        if !current.split_whitespace().any(|c| c == class) {
            return;
        }
        let value = current
            .split_whitespace()
            .filter(|c| *c != class)
            .collect::<Vec<_>>()
            .join(" ");
        self.set_attr(node, "class", &value);
    }

    pub fn set_style(&self, node: NodeId, name: &str, value: &str) {
        self.update(|tree| tree.set_style(node, name, value));
        self.send(PageCommand::SetStyle {
            node,
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    pub fn set_text(&self, node: NodeId, text: &str) {
        self.update(|tree| tree.set_text(node, text));
        self.send(PageCommand::SetText {
            node,
            text: text.to_string(),
        });
    }

    pub fn set_icon(&self, node: NodeId, icon: Icon) {
        self.update(|tree| tree.set_attr(node, "data-fg-icon", icon.as_str()));
        self.send(PageCommand::SetIcon { node, icon });
    }

    pub fn set_value(&self, node: NodeId, value: &str) {
        self.update(|tree| tree.set_attr(node, "value", value));
        self.send(PageCommand::SetValue {
            node,
            value: value.to_string(),
        });
    }

    pub fn play(&self, node: NodeId) {
        self.update(|tree| {
            if let Some(video) = tree.video_mut(node) {
                video.paused = false;
            }
        });
        self.send(PageCommand::Play { node });
    }

    pub fn pause(&self, node: NodeId) {
        self.update(|tree| {
            if let Some(video) = tree.video_mut(node) {
                video.paused = true;
            }
        });
        self.send(PageCommand::Pause { node });
    }

    pub fn set_muted(&self, node: NodeId, muted: bool) {
        self.update(|tree| {
            if let Some(video) = tree.video_mut(node) {
                video.muted = muted;
            }
        });
        self.send(PageCommand::SetMuted { node, muted });
    }

    pub fn set_volume(&self, node: NodeId, volume: f64) {
        self.update(|tree| {
            if let Some(video) = tree.video_mut(node) {
                video.volume = volume;
            }
        });
        self.send(PageCommand::SetVolume { node, volume });
    }

    pub fn set_current_time(&self, node: NodeId, seconds: f64) {
        self.update(|tree| {
            if let Some(video) = tree.video_mut(node) {
                video.current_time = seconds;
            }
        });
        self.send(PageCommand::SetCurrentTime { node, seconds });
    }

    pub fn set_playback_rate(&self, node: NodeId, rate: f64) {
        self.update(|tree| {
            if let Some(video) = tree.video_mut(node) {
                video.playback_rate = rate;
            }
        });
        self.send(PageCommand::SetPlaybackRate { node, rate });
    }

    pub fn request_fullscreen(&self, node: NodeId) {
        self.send(PageCommand::RequestFullscreen { node });
    }

    pub fn exit_fullscreen(&self) {
        self.send(PageCommand::ExitFullscreen);
    }

    pub fn activate(&self, node: NodeId) {
        self.send(PageCommand::Activate { node });
    }

    pub fn notify(&self, message: &str) {
        self.send(PageCommand::Notify {
            message: message.to_string(),
        });
    }

    pub fn alert(&self, message: &str) {
        self.send(PageCommand::Alert {
            message: message.to_string(),
        });
    }
}
