use crate::platforms::PageSession;
use anyhow::{anyhow, Result};
use serde_json::Value;

use super::shortcode::shortcode_to_media_id;

const IG_BASE_URL: &str = "https://www.instagram.com";
const IG_APP_ID: &str = "936619743392459";

// Private web API client. Every request rides the credentials captured from
// the hosting page, otherwise Instagram answers with login walls.
#[derive(Clone)]
pub struct InstagramApi {
    client: reqwest::Client,
    session: PageSession,
}

impl InstagramApi {
    pub fn new(client: reqwest::Client, session: PageSession) -> Self {
        Self { client, session }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("Cookie", &self.session.cookie)
            .header("x-csrftoken", &self.session.csrf_token)
            .header("x-ig-app-id", IG_APP_ID)
            .header("x-ig-www-claim", &self.session.www_claim)
            .header("x-requested-with", "XMLHttpRequest")
            .header("Referer", format!("{IG_BASE_URL}/"))
    }

    pub async fn user_id_by_username(&self, username: &str) -> Result<String> {
        let url = format!(
            "{IG_BASE_URL}/api/v1/users/web_profile_info/?username={}",
            urlencoding::encode(username)
        );
        let response = self.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Instagram API retornou HTTP {}",
                response.status().as_u16()
            ));
        }
        let payload: Value = response.json().await?;
        payload
            .pointer("/data/user/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Perfil sem id de usuário"))
    }

    // First video of the user's current story reel, straight from the feed
    // endpoint the web client itself uses.
    pub async fn story_video_url(&self, username: &str) -> Result<Option<String>> {
        let user_id = self.user_id_by_username(username).await?;
        let url = format!(
            "{IG_BASE_URL}/api/v1/feed/reels_media/?reel_ids={}",
            urlencoding::encode(&user_id)
        );
        let response = self.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Instagram API retornou HTTP {}",
                response.status().as_u16()
            ));
        }
        let payload: Value = response.json().await?;
        Ok(story_url_from_reels(&payload, &user_id))
    }

    pub async fn post_video_url(&self, shortcode: &str) -> Result<Option<String>> {
        let media_id = shortcode_to_media_id(shortcode)
            .ok_or_else(|| anyhow!("Shortcode inválido: {shortcode}"))?;
        let url = format!("{IG_BASE_URL}/api/v1/media/{media_id}/info/");
        let response = self.get(&url).send().await?;
        // HTTP 400 here means the shortcode conversion produced an id the
        // endpoint does not recognize.
        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "Instagram API retornou HTTP {}",
                response.status().as_u16()
            ));
        }
        let payload: Value = response.json().await?;
        Ok(payload.pointer("/items/0").and_then(pick_video_url))
    }
}

// media_type 1 is the photo sentinel; anything else carrying video_versions
// is downloadable video.
fn video_url_from_item(item: &Value) -> Option<String> {
    if item.get("media_type").and_then(Value::as_i64) == Some(1) {
        return None;
    }
    item.pointer("/video_versions/0/url")
        .and_then(Value::as_str)
        .map(str::to_string)
}

// Carousel sub-items first, in order, then the top-level item.
pub fn pick_video_url(item: &Value) -> Option<String> {
    if let Some(entries) = item.get("carousel_media").and_then(Value::as_array) {
        if let Some(url) = entries.iter().find_map(video_url_from_item) {
            return Some(url);
        }
    }
    video_url_from_item(item)
}

pub fn story_url_from_reels(payload: &Value, user_id: &str) -> Option<String> {
    payload
        .pointer(&format!("/reels/{user_id}/items"))
        .and_then(Value::as_array)?
        .iter()
        .find_map(video_url_from_item)
}
