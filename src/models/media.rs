use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub url: String,
    pub media_type: MediaType,
}

// Per-list dedup: the first occurrence of a URL wins within its list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaCollection {
    pub images: Vec<MediaItem>,
    pub videos: Vec<MediaItem>,
}

impl MediaCollection {
    pub fn push_image(&mut self, url: impl Into<String>) {
        let url = url.into();
        if !self.images.iter().any(|item| item.url == url) {
            self.images.push(MediaItem {
                url,
                media_type: MediaType::Image,
            });
        }
    }

    pub fn push_video(&mut self, url: impl Into<String>) {
        let url = url.into();
        if !self.videos.iter().any(|item| item.url == url) {
            self.videos.push(MediaItem {
                url,
                media_type: MediaType::Video,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.videos.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len() + self.videos.len()
    }

    // Images first, then videos, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &MediaItem> {
        self.images.iter().chain(self.videos.iter())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadItem {
    pub url: String,
    pub media_type: MediaType,
    pub filename: String,
}
