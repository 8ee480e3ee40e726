use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

pub mod core;
pub mod dom;
pub mod error;
pub mod models;
pub mod platforms;

use crate::core::bridge::{
    DownloadBridge, DownloadSink, HistoryStore, MemoryDownloadSink, MemoryHistoryStore,
    MemorySettingsStore, SettingsStore,
};
use crate::core::http;
use crate::core::registry::PlatformRegistry;
use crate::dom::feed::{PageCommand, PageEvent, PageHandle};
use crate::dom::DomTree;
use crate::platforms::instagram::InstagramPlatform;
use crate::platforms::x::XPlatform;
use crate::platforms::{PageSession, PlatformContext};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}

pub struct Engine {
    registry: PlatformRegistry,
    settings: Arc<dyn SettingsStore>,
    history: Arc<dyn HistoryStore>,
    sink: Arc<dyn DownloadSink>,
    client: reqwest::Client,
}

impl Engine {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        history: Arc<dyn HistoryStore>,
        sink: Arc<dyn DownloadSink>,
    ) -> Self {
        let mut registry = PlatformRegistry::new();
        registry.register(Arc::new(InstagramPlatform));
        registry.register(Arc::new(XPlatform));
        Self {
            registry,
            settings,
            history,
            sink,
            client: http::build_client(),
        }
    }

    pub fn with_memory_stores() -> Self {
        Self::new(
            Arc::new(MemorySettingsStore::default()),
            Arc::new(MemoryHistoryStore::default()),
            Arc::new(MemoryDownloadSink::default()),
        )
    }

    // Wires one page pipeline: mirror, channels, bridge and the platform task.
    // The pipeline ends when the caller drops the event sender.
    pub fn open_page(&self, url: &str, session: PageSession) -> anyhow::Result<PageConnection> {
        let platform = self
            .registry
            .find_platform(url)
            .ok_or_else(|| anyhow::anyhow!("Site não suportado: {url}"))?;
        tracing::debug!("[engine] abrindo {url} na plataforma {}", platform.name());

        let mut tree = DomTree::new();
        if let Ok(parsed) = url::Url::parse(url) {
            tree.set_path(parsed.path());
        }
        let tree = Arc::new(Mutex::new(tree));
        let (command_tx, commands) = mpsc::unbounded_channel();
        let page = PageHandle::new(tree, command_tx);

        let (events, event_rx) = mpsc::unbounded_channel();
        let (bridge_feed, bridge_events) = mpsc::unbounded_channel();
        let bridge = DownloadBridge::new(
            self.settings.clone(),
            self.history.clone(),
            self.sink.clone(),
            self.client.clone(),
            bridge_feed,
        );
        let ctx = PlatformContext {
            page: page.clone(),
            bridge: bridge.clone(),
            session,
            client: self.client.clone(),
            bridge_events,
        };

        let name = platform.name().to_string();
        let task = tokio::spawn(async move {
            if let Err(error) = platform.run(ctx, event_rx).await {
                tracing::error!("[engine] pipeline {name} terminou com erro: {error:#}");
            }
        });

        Ok(PageConnection {
            page,
            events,
            commands,
            bridge,
            task,
        })
    }
}

impl std::fmt::Debug for PageConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageConnection").finish_non_exhaustive()
    }
}

pub struct PageConnection {
    pub page: PageHandle,
    pub events: UnboundedSender<PageEvent>,
    pub commands: UnboundedReceiver<PageCommand>,
    pub bridge: DownloadBridge,
    pub task: JoinHandle<()>,
}
