use crate::core::bridge::BridgeEvent;
use crate::dom::feed::PageEvent;
use crate::platforms::{PagePlatform, PlatformContext};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

mod api;
mod controls;
mod resolve;
mod scan;
mod shortcode;
mod story;

use api::InstagramApi;
use controls::{PostControls, UiPrefs};
use story::StoryToolbar;

const REPOSITION_INTERVAL: Duration = Duration::from_millis(500);
const RESCAN_INTERVAL: Duration = Duration::from_millis(1500);

pub struct InstagramPlatform;

#[async_trait]
impl PagePlatform for InstagramPlatform {
    fn name(&self) -> &str {
        "instagram"
    }

    fn can_handle(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        match parsed.host_str() {
            Some(host) => host == "instagram.com" || host.ends_with(".instagram.com"),
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
            session,
            client,
            mut bridge_events,
        } = ctx;
        let api = InstagramApi::new(client, session);
        let mut controls = PostControls::new(
            page.clone(),
            bridge.clone(),
            api.clone(),
            UiPrefs::default(),
        );
        let mut story = StoryToolbar::new(page.clone(), bridge, api);

        controls.process_batch();
        story.scan();

        let mut reposition = tokio::time::interval(REPOSITION_INTERVAL);
        let mut rescan = tokio::time::interval(RESCAN_INTERVAL);
        let mut bridge_alive = true;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        PageEvent::Mutated { .. } | PageEvent::RouteChanged { .. } => {
                            controls.process_batch();
                            story.scan();
                        }
                        PageEvent::Media { node, event } => {
                            controls.on_media(node, event);
                            story.on_media(node, event);
                        }
                        PageEvent::Click { node } => {
                            story.on_click(node);
                            controls.on_click(node);
                        }
                        PageEvent::SliderInput { node, value } => controls.on_slider(node, value),
                        PageEvent::Wheel { node, delta_y } => controls.on_wheel(node, delta_y),
                        PageEvent::PointerDown { node } => controls.on_pointer(node, true),
                        PageEvent::PointerUp { node } => controls.on_pointer(node, false),
                        PageEvent::FullscreenChanged { node } => controls.on_fullscreen(node),
                        PageEvent::ViewportChanged => story.reposition(),
                        PageEvent::PageMessage { .. } => {}
                    }
                }
                bridge_event = bridge_events.recv(), if bridge_alive => {
                    match bridge_event {
                        Some(BridgeEvent::DownloadFailed { message }) => {
                            page.alert(&format!("Falha no download: {message}"));
                        }
                        Some(BridgeEvent::SettingsChanged { .. }) => {}
                        None => bridge_alive = false,
                    }
                }
                _ = reposition.tick() => story.on_reposition_tick(),
                _ = rescan.tick() => story.on_rescan_tick(),
            }
        }
        Ok(())
    }
}
