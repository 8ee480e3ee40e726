use regex::Regex;
use std::sync::LazyLock;

const SHORTCODE_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

static PERMALINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(?:p|reel|reels)/([A-Za-z0-9_-]+)").unwrap());

// Base64-style shortcode to the numeric media id the info endpoint expects.
// Characters outside the alphabet or an overflowing value mean the input was
// never a shortcode.
pub fn shortcode_to_media_id(shortcode: &str) -> Option<String> {
    let mut id: u128 = 0;
    for ch in shortcode.chars() {
        let index = SHORTCODE_ALPHABET.find(ch)? as u128;
        id = id.checked_mul(64)?.checked_add(index)?;
    }
    Some(id.to_string())
}

pub fn shortcode_from_path(path: &str) -> Option<String> {
    PERMALINK_RE
        .captures(path)
        .map(|caps| caps[1].to_string())
}
