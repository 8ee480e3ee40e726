use crate::platforms::PagePlatform;
use std::sync::Arc;

pub struct PlatformRegistry {
    platforms: Vec<Arc<dyn PagePlatform>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self {
            platforms: Vec::new(),
        }
    }

    pub fn register(&mut self, platform: Arc<dyn PagePlatform>) {
        self.platforms.push(platform);
    }

    pub fn find_platform(&self, url: &str) -> Option<Arc<dyn PagePlatform>> {
        self.platforms.iter().find(|p| p.can_handle(url)).cloned()
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}
