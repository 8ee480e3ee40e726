use crate::core::bridge::{BridgeEvent, BridgeRequest, DownloadBridge};
use crate::core::cache::MediaCache;
use crate::dom::feed::{Icon, PageEvent, PageHandle};
use crate::dom::{DomTree, NodeId};
use crate::models::media::DownloadItem;
use crate::models::settings::BridgeSettings;
use crate::platforms::{PagePlatform, PlatformContext};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

mod intercept;
mod resolve;

use resolve::{build_filename, extract_media_from_dom, tweet_id_of};

const BUTTON_FLAG: &str = "data-fg-downloader";
const DOWNLOAD_BTN_CLASS: &str = "fg-download-btn";
const TOAST_CLASS: &str = "fg-toast";
const TOAST_DURATION: Duration = Duration::from_secs(3);

pub struct XPlatform;

#[async_trait]
impl PagePlatform for XPlatform {
    fn name(&self) -> &str {
        "x"
    }

    fn can_handle(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        match parsed.host_str() {
            Some(host) => {
                host == "x.com"
                    || host == "twitter.com"
                    || host.ends_with(".x.com")
                    || host.ends_with(".twitter.com")
            }
            None => false,
        }
    }

    async fn run(
        &self,
        ctx: PlatformContext,
        mut events: UnboundedReceiver<PageEvent>,
    ) -> anyhow::Result<()> {
        let PlatformContext {
            page,
            bridge,
            mut bridge_events,
            ..
        } = ctx;
        let settings = bridge.settings().await;
        let mut timeline = Timeline::new(page, bridge, settings);

        timeline.process_batch();

        let mut bridge_alive = true;
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        PageEvent::Mutated { .. } | PageEvent::RouteChanged { .. } => {
                            timeline.process_batch();
                        }
                        PageEvent::Click { node } => timeline.on_click(node),
                        PageEvent::PageMessage { message } => {
                            timeline.on_page_message(&message);
                        }
                        _ => {}
                    }
                }
                bridge_event = bridge_events.recv(), if bridge_alive => {
                    match bridge_event {
                        Some(BridgeEvent::SettingsChanged { settings }) => {
                            timeline.on_settings_changed(settings);
                        }
                        // start-download failures already come back in the
                        // reply, so the broadcast adds nothing here.
                        Some(BridgeEvent::DownloadFailed { .. }) => {}
                        None => bridge_alive = false,
                    }
                }
            }
        }
        Ok(())
    }
}

// One download button per tweet article. Media comes from the GraphQL cache
// when the interceptor saw the tweet, from the DOM otherwise. Button bindings
// are kept across detach: the timeline recycles article nodes on scroll.
struct Timeline {
    page: PageHandle,
    bridge: DownloadBridge,
    cache: MediaCache,
    settings: BridgeSettings,
    buttons: HashMap<NodeId, NodeId>,
    toast: Toast,
}

impl Timeline {
    fn new(page: PageHandle, bridge: DownloadBridge, settings: BridgeSettings) -> Self {
        let toast = Toast::new(page.clone());
        Self {
            page,
            bridge,
            cache: MediaCache::new(),
            settings,
            buttons: HashMap::new(),
            toast,
        }
    }

    fn process_batch(&mut self) {
        let articles = self
            .page
            .with(|tree| tree.descendants_with_tag(tree.body(), "article"));
        for article in articles {
            self.process_article(article);
        }
    }

    fn process_article(&mut self, article: NodeId) {
        self.reveal_sensitive(article);

        let flagged = self
            .page
            .with(|tree| tree.attr(article, BUTTON_FLAG) == Some("true"));
        if flagged {
            let has_button = self.page.with(|tree| {
                tree.find_descendant(article, |node| node.has_class(DOWNLOAD_BTN_CLASS))
                    .is_some()
            });
            if has_button {
                return;
            }
            // rerendered article kept the flag but lost the button
            self.page.remove_attr(article, BUTTON_FLAG);
        }

        let tweet_id = self.page.with(|tree| tweet_id_of(tree, article));
        let has_media = self.page.with(|tree| {
            tree.descendants_with_tag(article, "img").iter().any(|&img| {
                tree.attr(img, "src")
                    .is_some_and(|src| src.contains("pbs.twimg.com/media"))
            }) || !tree.descendants_with_tag(article, "video").is_empty()
        }) || tweet_id
            .as_deref()
            .is_some_and(|id| self.cache.contains(id));
        if !has_media {
            return;
        }

        // Quoted tweets and placeholders have no action bar; the next
        // mutation batch retries once it mounts.
        let Some(group) = self.page.with(|tree| action_group(tree, article)) else {
            return;
        };

        let button = self.page.create_element("button");
        self.page.set_attr(button, "class", DOWNLOAD_BTN_CLASS);
        self.page.set_attr(button, "type", "button");
        self.page.set_attr(button, "aria-label", "Baixar mídia");
        self.page.set_icon(button, Icon::Download);
        self.page.append(group, button);
        self.page.set_attr(article, BUTTON_FLAG, "true");
        self.buttons.insert(button, article);
    }

    fn reveal_sensitive(&self, article: NodeId) {
        if !self.settings.auto_reveal_sensitive {
            return;
        }
        let (warnings, blurred) = self.page.with(|tree| {
            let warnings: Vec<(NodeId, Option<NodeId>)> = tree
                .descendants(article)
                .into_iter()
                .filter(|&id| is_sensitive_warning(tree, id))
                .map(|id| {
                    let button = if tree.tag(id) == Some("button") {
                        Some(id)
                    } else {
                        tree.find_descendant(id, |node| node.tag == "button")
                    };
                    (id, button)
                })
                .collect();
            let blurred: Vec<NodeId> = tree
                .descendants(article)
                .into_iter()
                .filter(|&id| {
                    tree.node(id)
                        .and_then(|node| node.style("filter"))
                        .is_some_and(|filter| filter.contains("blur"))
                })
                .collect();
            (warnings, blurred)
        });
        for (warning, button) in warnings {
            if let Some(button) = button {
                self.page.activate(button);
            }
            self.page.set_style(warning, "display", "none");
        }
        for node in blurred {
            self.page.set_style(node, "filter", "none");
        }
    }

    fn on_click(&mut self, node: NodeId) {
        let Some(&article) = self.buttons.get(&node) else {
            return;
        };
        let busy = self.page.with(|tree| tree.attr(node, "disabled").is_some());
        if busy {
            return;
        }
        self.start_download(node, article);
    }

    fn start_download(&mut self, button: NodeId, article: NodeId) -> Option<JoinHandle<()>> {
        self.page.set_attr(button, "disabled", "true");
        self.page.add_class(button, "is-busy");

        let tweet_id = self
            .page
            .with(|tree| tweet_id_of(tree, article))
            .unwrap_or_else(|| format!("tweet-{}", Utc::now().timestamp_millis()));

        let collection = match self.cache.get(&tweet_id).cloned() {
            Some(collection) => collection,
            None => self
                .page
                .with(|tree| extract_media_from_dom(tree, article, &mut self.cache)),
        };
        if collection.is_empty() {
            self.toast
                .show("Nenhuma mídia para download encontrada neste tweet.");
            self.page.remove_attr(button, "disabled");
            self.page.remove_class(button, "is-busy");
            return None;
        }

        let items: Vec<DownloadItem> = collection
            .iter()
            .enumerate()
            .map(|(index, item)| DownloadItem {
                url: item.url.clone(),
                media_type: item.media_type,
                filename: build_filename(Some(&tweet_id), &item.url, item.media_type, index),
            })
            .collect();

        let page = self.page.clone();
        let bridge = self.bridge.clone();
        let toast = self.toast.clone();
        Some(tokio::spawn(async move {
            let reply = bridge
                .handle(BridgeRequest::StartDownload {
                    tweet_id: Some(tweet_id),
                    items,
                })
                .await;
            if reply.ok {
                toast.show("Baixando mídia.");
            } else {
                toast.show("Erro ao iniciar o download.");
            }
            page.remove_attr(button, "disabled");
            page.remove_class(button, "is-busy");
        }))
    }

    fn on_page_message(&mut self, message: &Value) {
        for tweet_id in intercept::ingest_message(&mut self.cache, message) {
            self.refresh_articles(&tweet_id);
        }
    }

    // Re-runs injection for articles that showed this tweet before its media
    // was known.
    fn refresh_articles(&mut self, tweet_id: &str) {
        let needle = format!("/status/{tweet_id}");
        let articles: Vec<NodeId> = self.page.with(|tree| {
            let mut found = Vec::new();
            for anchor in tree.descendants_with_tag(tree.body(), "a") {
                if !tree
                    .attr(anchor, "href")
                    .is_some_and(|href| href.contains(&needle))
                {
                    continue;
                }
                let Some(article) = tree.closest(anchor, |node| node.tag == "article") else {
                    continue;
                };
                if tree
                    .find_descendant(article, |node| node.has_class(DOWNLOAD_BTN_CLASS))
                    .is_some()
                {
                    continue;
                }
                if !found.contains(&article) {
                    found.push(article);
                }
            }
            found
        });
        for article in articles {
            self.page.remove_attr(article, BUTTON_FLAG);
            self.process_article(article);
        }
    }

    fn on_settings_changed(&mut self, settings: BridgeSettings) {
        self.settings = settings;
    }
}

fn is_sensitive_warning(tree: &DomTree, id: NodeId) -> bool {
    let Some(node) = tree.node(id) else {
        return false;
    };
    matches!(
        node.attr("data-testid"),
        Some("sensitiveMediaWarning")
            | Some("sensitive_media_interstitial")
            | Some("confirmationSheetConfirm")
    ) || node.attr("aria-label") == Some("Sensitive content")
}

// The tweet's reply/retweet/like bar. Nested quotes can bring extra groups
// along, so ambiguity is settled by looking for the action buttons.
fn action_group(tree: &DomTree, article: NodeId) -> Option<NodeId> {
    let groups: Vec<NodeId> = tree
        .descendants(article)
        .into_iter()
        .filter(|&id| {
            tree.node(id)
                .is_some_and(|node| node.tag == "div" && node.attr("role") == Some("group"))
        })
        .collect();
    match groups.len() {
        0 => None,
        1 => Some(groups[0]),
        _ => groups
            .iter()
            .copied()
            .find(|&group| has_action_buttons(tree, group))
            .or(Some(groups[0])),
    }
}

fn has_action_buttons(tree: &DomTree, group: NodeId) -> bool {
    tree.find_descendant(group, |node| {
        if node.tag != "button" {
            return false;
        }
        let testid = node.attr("data-testid").unwrap_or_default();
        let label = node.attr("aria-label").unwrap_or_default();
        testid.contains("reply")
            || testid.contains("like")
            || testid.contains("retweet")
            || label.contains("Reply")
            || label.contains("Like")
    })
    .is_some()
}

// Single notification element per page. A newer message restarts the clock,
// so the hide timer only fires for the epoch that armed it.
#[derive(Clone)]
struct Toast {
    page: PageHandle,
    node: Arc<Mutex<Option<NodeId>>>,
    epoch: Arc<AtomicU64>,
}

impl Toast {
    fn new(page: PageHandle) -> Self {
        Self {
            page,
            node: Arc::new(Mutex::new(None)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    fn show(&self, message: &str) {
        let node = self.ensure_node();
        self.page.set_text(node, message);
        self.page.add_class(node, "is-visible");
        let shown = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let toast = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TOAST_DURATION).await;
            if toast.epoch.load(Ordering::SeqCst) == shown {
                toast.page.remove_class(node, "is-visible");
            }
        });
    }

    fn ensure_node(&self) -> NodeId {
        let mut guard = self
            .node
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(node) = *guard {
            if self.page.with(|tree| tree.is_connected(node)) {
                return node;
            }
        }
        let node = self.page.create_element("div");
        self.page.set_attr(node, "class", TOAST_CLASS);
        let body = self.page.with(|tree| tree.body());
        self.page.append(body, node);
        *guard = Some(node);
        node
    }
}
