use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    pub auto_reveal_sensitive: bool,
    pub use_aria2: bool,
    pub aria2_url: String,
    pub aria2_secret: String,
    pub prefer_aria2_for_videos: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            auto_reveal_sensitive: true,
            use_aria2: false,
            aria2_url: "http://127.0.0.1:6800/jsonrpc".into(),
            aria2_secret: String::new(),
            prefer_aria2_for_videos: false,
        }
    }
}
