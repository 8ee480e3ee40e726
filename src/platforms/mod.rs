use crate::core::bridge::{BridgeEvent, DownloadBridge};
use crate::dom::feed::{PageEvent, PageHandle};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

pub mod instagram;
pub mod x;

// Credentials and tokens captured from the hosting page, forwarded on every
// private API request.
#[derive(Debug, Clone, Default)]
pub struct PageSession {
    pub cookie: String,
    pub csrf_token: String,
    pub www_claim: String,
}

pub struct PlatformContext {
    pub page: PageHandle,
    pub bridge: DownloadBridge,
    pub session: PageSession,
    pub client: reqwest::Client,
    pub bridge_events: UnboundedReceiver<BridgeEvent>,
}

#[async_trait]
pub trait PagePlatform: Send + Sync {
    fn name(&self) -> &str;
    fn can_handle(&self, url: &str) -> bool;
    async fn run(
        &self,
        ctx: PlatformContext,
        events: UnboundedReceiver<PageEvent>,
    ) -> anyhow::Result<()>;
}
