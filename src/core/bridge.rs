use crate::error::ResolveError;
use crate::models::history::{DownloadMethod, HistoryEntry, MAX_HISTORY};
use crate::models::media::{DownloadItem, MediaType};
use crate::models::settings::BridgeSettings;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const FINAL_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<BridgeSettings>;
    async fn save(&self, settings: &BridgeSettings) -> Result<()>;
}

// Newest first, capped at MAX_HISTORY by the implementation.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn all(&self) -> Result<Vec<HistoryEntry>>;
    async fn push(&self, entry: HistoryEntry) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

// Hands downloads to the hosting environment. Implementations return an
// opaque reference id (browser download id, file path, ...).
#[async_trait]
pub trait DownloadSink: Send + Sync {
    async fn download_url(&self, url: &str, filename: &str, save_as: bool) -> Result<String>;
    async fn save_bytes(&self, bytes: Vec<u8>, filename: &str, save_as: bool) -> Result<String>;
}

#[derive(Default)]
pub struct MemorySettingsStore {
    settings: Mutex<BridgeSettings>,
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<BridgeSettings> {
        Ok(self.settings.lock().await.clone())
    }

    async fn save(&self, settings: &BridgeSettings) -> Result<()> {
        *self.settings.lock().await = settings.clone();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<Vec<HistoryEntry>>,
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn all(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn push(&self, entry: HistoryEntry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(0, entry);
        entries.truncate(MAX_HISTORY);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().await.clear();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Url {
        url: String,
        filename: String,
        save_as: bool,
    },
    Bytes {
        len: usize,
        filename: String,
        save_as: bool,
    },
}

#[derive(Default)]
pub struct MemoryDownloadSink {
    pub calls: Mutex<Vec<SinkCall>>,
}

#[async_trait]
impl DownloadSink for MemoryDownloadSink {
    async fn download_url(&self, url: &str, filename: &str, save_as: bool) -> Result<String> {
        let mut calls = self.calls.lock().await;
        calls.push(SinkCall::Url {
            url: url.to_string(),
            filename: filename.to_string(),
            save_as,
        });
        Ok(format!("dl-{}", calls.len()))
    }

    async fn save_bytes(&self, bytes: Vec<u8>, filename: &str, save_as: bool) -> Result<String> {
        let mut calls = self.calls.lock().await;
        calls.push(SinkCall::Bytes {
            len: bytes.len(),
            filename: filename.to_string(),
            save_as,
        });
        Ok(format!("dl-{}", calls.len()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BridgeRequest {
    #[serde(rename = "get-settings")]
    GetSettings,
    #[serde(rename = "save-settings")]
    SaveSettings { settings: Value },
    #[serde(rename = "get-history")]
    GetHistory,
    #[serde(rename = "clear-history")]
    ClearHistory,
    #[serde(rename = "start-download", rename_all = "camelCase")]
    StartDownload {
        tweet_id: Option<String>,
        items: Vec<DownloadItem>,
    },
    #[serde(rename = "download_final")]
    DownloadFinal { url: String },
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BridgeReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<BridgeSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeReply {
    fn done() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    DownloadFailed { message: String },
    SettingsChanged { settings: BridgeSettings },
}

#[derive(Clone)]
pub struct DownloadBridge {
    settings: Arc<dyn SettingsStore>,
    history: Arc<dyn HistoryStore>,
    sink: Arc<dyn DownloadSink>,
    client: reqwest::Client,
    events: UnboundedSender<BridgeEvent>,
}

impl DownloadBridge {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        history: Arc<dyn HistoryStore>,
        sink: Arc<dyn DownloadSink>,
        client: reqwest::Client,
        events: UnboundedSender<BridgeEvent>,
    ) -> Self {
        Self {
            settings,
            history,
            sink,
            client,
            events,
        }
    }

    pub async fn handle_json(&self, message: Value) -> BridgeReply {
        match serde_json::from_value::<BridgeRequest>(message) {
            Ok(request) => self.handle(request).await,
            Err(error) => BridgeReply::failed(format!("Mensagem inválida: {error}")),
        }
    }

    pub async fn handle(&self, request: BridgeRequest) -> BridgeReply {
        match request {
            BridgeRequest::GetSettings => match self.settings.load().await {
                Ok(settings) => BridgeReply {
                    settings: Some(settings),
                    ..BridgeReply::done()
                },
                Err(error) => BridgeReply::failed(error.to_string()),
            },
            BridgeRequest::SaveSettings { settings: patch } => {
                match self.save_settings(patch).await {
                    Ok(settings) => BridgeReply {
                        settings: Some(settings),
                        ..BridgeReply::done()
                    },
                    Err(error) => BridgeReply::failed(error.to_string()),
                }
            }
            BridgeRequest::GetHistory => match self.history.all().await {
                Ok(history) => BridgeReply {
                    history: Some(history),
                    ..BridgeReply::done()
                },
                Err(error) => BridgeReply::failed(error.to_string()),
            },
            BridgeRequest::ClearHistory => match self.history.clear().await {
                Ok(()) => BridgeReply::done(),
                Err(error) => BridgeReply::failed(error.to_string()),
            },
            BridgeRequest::StartDownload { tweet_id, items } => {
                match self.start_download(tweet_id, items).await {
                    Ok(results) => BridgeReply {
                        result: Some(Value::Array(results)),
                        ..BridgeReply::done()
                    },
                    Err(error) => BridgeReply::failed(error.to_string()),
                }
            }
            BridgeRequest::DownloadFinal { url } => {
                let bridge = self.clone();
                tokio::spawn(async move {
                    bridge.download_final(&url).await;
                });
                BridgeReply::done()
            }
        }
    }

    pub async fn settings(&self) -> BridgeSettings {
        self.settings.load().await.unwrap_or_default()
    }

    async fn save_settings(&self, patch: Value) -> Result<BridgeSettings> {
        let current = self.settings.load().await.unwrap_or_default();
        let mut merged = serde_json::to_value(&current)?;
        merge_json(&mut merged, &patch);
        let settings: BridgeSettings = serde_json::from_value(merged)?;
        self.settings.save(&settings).await?;
        let _ = self.events.send(BridgeEvent::SettingsChanged {
            settings: settings.clone(),
        });
        Ok(settings)
    }

    async fn start_download(
        &self,
        tweet_id: Option<String>,
        items: Vec<DownloadItem>,
    ) -> Result<Vec<Value>> {
        if items.is_empty() {
            anyhow::bail!("Nenhum item para download");
        }
        let settings = self.settings.load().await.unwrap_or_default();
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let (method, reference_id) = if wants_aria2(&settings, item.media_type) {
                let gid = self.aria2_add_uri(&settings, &item).await?;
                (DownloadMethod::Aria2, gid)
            } else {
                let id = self
                    .sink
                    .download_url(&item.url, &item.filename, false)
                    .await?;
                (DownloadMethod::Browser, id)
            };
            let entry = HistoryEntry::new(
                tweet_id.clone(),
                &item.url,
                &item.filename,
                method,
                "twitter",
                Some(reference_id.clone()),
            );
            if let Err(error) = self.history.push(entry).await {
                tracing::warn!("[bridge] failed to record history: {error:#}");
            }
            results.push(json!({ "method": method, "referenceId": reference_id }));
        }
        Ok(results)
    }

    async fn aria2_add_uri(&self, settings: &BridgeSettings, item: &DownloadItem) -> Result<String> {
        let request = build_aria2_request(settings, &item.url, &item.filename);
        let response = self
            .client
            .post(&settings.aria2_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ResolveError::DownloadDispatchFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ResolveError::DownloadDispatchFailed(format!(
                "aria2 retornou HTTP {}",
                response.status().as_u16()
            ))
            .into());
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ResolveError::DownloadDispatchFailed(e.to_string()))?;
        Ok(parse_aria2_reply(&payload)?)
    }

    // Fire-and-forget path used for single Instagram media. Failures are
    // surfaced as events, never as errors to the caller.
    pub async fn download_final(&self, url: &str) {
        if let Err(error) = self.download_final_inner(url).await {
            tracing::warn!("[bridge] download_final failed: {error:#}");
            let _ = self.events.send(BridgeEvent::DownloadFailed {
                message: error.to_string(),
            });
        }
    }

    async fn download_final_inner(&self, url: &str) -> Result<()> {
        if url.starts_with("blob:") || url.starts_with("data:") {
            return Err(ResolveError::UnsupportedUrlScheme("blob_or_data_url".into()).into());
        }
        let filename = final_filename(url);
        let reference_id = match self.fetch_with_deadline(url).await {
            Ok(bytes) => self.sink.save_bytes(bytes, &filename, true).await?,
            Err(error) => {
                tracing::debug!("[bridge] fetch failed, falling back to sink url: {error:#}");
                self.sink.download_url(url, &filename, true).await?
            }
        };
        let entry = HistoryEntry::new(
            None,
            url,
            &filename,
            DownloadMethod::Browser,
            "instagram",
            Some(reference_id),
        );
        if let Err(error) = self.history.push(entry).await {
            tracing::warn!("[bridge] failed to record history: {error:#}");
        }
        Ok(())
    }

    async fn fetch_with_deadline(&self, url: &str) -> Result<Vec<u8>> {
        let cancel = CancellationToken::new();
        let deadline = cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(FINAL_FETCH_TIMEOUT).await;
            deadline.cancel();
        });
        let result = self.fetch_streaming(url, &cancel).await;
        timer.abort();
        result
    }

    async fn fetch_streaming(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let request = self
            .client
            .get(url)
            .header("Referer", "https://www.instagram.com/");
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ResolveError::NetworkTimeout.into()),
            sent = request.send() => sent?.error_for_status()?,
        };
        let mut stream = response.bytes_stream();
        let mut bytes = Vec::new();
        loop {
            // The deadline must also interrupt a chunk that never arrives,
            // not just the initial send.
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(ResolveError::NetworkTimeout.into()),
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(chunk) => bytes.extend_from_slice(&chunk?),
                None => break,
            }
        }
        Ok(bytes)
    }
}

pub fn wants_aria2(settings: &BridgeSettings, media_type: MediaType) -> bool {
    settings.use_aria2 && (!settings.prefer_aria2_for_videos || media_type == MediaType::Video)
}

pub fn build_aria2_request(settings: &BridgeSettings, url: &str, filename: &str) -> Value {
    let basename = filename.rsplit('/').next().unwrap_or(filename);
    let mut params = Vec::new();
    if !settings.aria2_secret.is_empty() {
        params.push(json!(format!("token:{}", settings.aria2_secret)));
    }
    params.push(json!([url]));
    params.push(json!({ "out": basename }));
    json!({
        "jsonrpc": "2.0",
        "id": format!("fg-{}", Utc::now().timestamp_millis()),
        "method": "aria2.addUri",
        "params": params,
    })
}

pub fn parse_aria2_reply(payload: &Value) -> Result<String, ResolveError> {
    if let Some(error) = payload.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("erro desconhecido");
        return Err(ResolveError::DownloadDispatchFailed(message.to_string()));
    }
    payload
        .get("result")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ResolveError::DownloadDispatchFailed("resposta sem gid".to_string()))
}

// Basename when the URL path carries an extension, generated name otherwise.
pub fn final_filename(url: &str) -> String {
    let basename = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.last().map(str::to_string))
        })
        .unwrap_or_default();
    if !basename.is_empty() && basename.contains('.') {
        return sanitize_filename::sanitize(&basename);
    }
    let is_video =
        url.contains(".mp4") || url.contains("video") || url.contains("video_versions");
    let stamp = Utc::now().timestamp_millis();
    if is_video {
        format!("insta_video_{stamp}.mp4")
    } else {
        format!("insta_photo_{stamp}.jpg")
    }
}

fn merge_json(base: &mut Value, patch: &Value) {
    if let (Some(base_obj), Some(patch_obj)) = (base.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_obj {
            if value.is_object() && base_obj.get(key).is_some_and(|v| v.is_object()) {
                merge_json(base_obj.get_mut(key).unwrap(), value);
            } else {
                base_obj.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn bridge() -> (
        DownloadBridge,
        Arc<MemoryDownloadSink>,
        Arc<MemoryHistoryStore>,
        Arc<MemorySettingsStore>,
        mpsc::UnboundedReceiver<BridgeEvent>,
    ) {
        let settings = Arc::new(MemorySettingsStore::default());
        let history = Arc::new(MemoryHistoryStore::default());
        let sink = Arc::new(MemoryDownloadSink::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = DownloadBridge::new(
            settings.clone(),
            history.clone(),
            sink.clone(),
            reqwest::Client::new(),
            tx,
        );
        (bridge, sink, history, settings, rx)
    }

    fn video_item(url: &str, filename: &str) -> DownloadItem {
        DownloadItem {
            url: url.to_string(),
            media_type: MediaType::Video,
            filename: filename.to_string(),
        }
    }

    #[test]
    fn aria2_request_shape_with_secret() {
        let settings = BridgeSettings {
            aria2_secret: "s3cret".into(),
            ..BridgeSettings::default()
        };
        let request =
            build_aria2_request(&settings, "https://v.example/x.mp4", "twitter_media/a-video-1.mp4");
        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["method"], "aria2.addUri");
        assert!(request["id"].as_str().unwrap().starts_with("fg-"));
        let params = request["params"].as_array().unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params[0], "token:s3cret");
        assert_eq!(params[1], json!(["https://v.example/x.mp4"]));
        assert_eq!(params[2], json!({ "out": "a-video-1.mp4" }));
    }

    #[test]
    fn aria2_request_shape_without_secret() {
        let settings = BridgeSettings::default();
        let request = build_aria2_request(&settings, "https://v.example/x.mp4", "x.mp4");
        let params = request["params"].as_array().unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], json!(["https://v.example/x.mp4"]));
    }

    #[test]
    fn aria2_reply_gid() {
        let gid = parse_aria2_reply(&json!({ "result": "2089b05ecca3d829" })).unwrap();
        assert_eq!(gid, "2089b05ecca3d829");
    }

    #[test]
    fn aria2_reply_error_message() {
        let error =
            parse_aria2_reply(&json!({ "error": { "code": 1, "message": "Unauthorized" } }))
                .unwrap_err();
        assert!(error.to_string().contains("Unauthorized"));
    }

    #[test]
    fn wants_aria2_routing() {
        let mut settings = BridgeSettings {
            use_aria2: true,
            ..BridgeSettings::default()
        };
        assert!(wants_aria2(&settings, MediaType::Image));
        assert!(wants_aria2(&settings, MediaType::Video));

        settings.prefer_aria2_for_videos = true;
        assert!(!wants_aria2(&settings, MediaType::Image));
        assert!(wants_aria2(&settings, MediaType::Video));

        settings.use_aria2 = false;
        assert!(!wants_aria2(&settings, MediaType::Video));
    }

    #[test]
    fn final_filename_keeps_basename_with_extension() {
        assert_eq!(
            final_filename("https://scontent.cdninstagram.com/v/t50/clip.mp4?efg=1&oh=2"),
            "clip.mp4"
        );
    }

    #[test]
    fn final_filename_generates_video_name() {
        let name = final_filename("https://scontent.cdninstagram.com/video_versions/abc");
        assert!(name.starts_with("insta_video_"));
        assert!(name.ends_with(".mp4"));
    }

    #[test]
    fn final_filename_generates_photo_name() {
        let name = final_filename("https://scontent.cdninstagram.com/t51/photo");
        assert!(name.starts_with("insta_photo_"));
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn merge_json_nested_objects() {
        let mut base = json!({ "a": { "b": 1, "c": 2 }, "d": 3 });
        merge_json(&mut base, &json!({ "a": { "c": 9 }, "e": [1, 2] }));
        assert_eq!(base, json!({ "a": { "b": 1, "c": 9 }, "d": 3, "e": [1, 2] }));
    }

    #[test]
    fn merge_json_arrays_replace() {
        let mut base = json!({ "a": [1, 2, 3] });
        merge_json(&mut base, &json!({ "a": [4] }));
        assert_eq!(base, json!({ "a": [4] }));
    }

    #[tokio::test]
    async fn save_settings_partial_merge() {
        let (bridge, _sink, _history, settings, _rx) = bridge();
        let reply = bridge
            .handle_json(json!({
                "type": "save-settings",
                "payload": { "settings": { "useAria2": true } }
            }))
            .await;
        assert!(reply.ok);
        let saved = reply.settings.unwrap();
        assert!(saved.use_aria2);
        assert!(saved.auto_reveal_sensitive);
        assert!(settings.load().await.unwrap().use_aria2);
    }

    #[tokio::test]
    async fn save_settings_broadcasts_change() {
        let (bridge, _sink, _history, _settings, mut rx) = bridge();
        bridge
            .handle_json(json!({
                "type": "save-settings",
                "payload": { "settings": { "autoRevealSensitive": false } }
            }))
            .await;
        match rx.try_recv().unwrap() {
            BridgeEvent::SettingsChanged { settings } => {
                assert!(!settings.auto_reveal_sensitive);
                assert!(!settings.use_aria2);
            }
            other => panic!("evento inesperado: {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_download_records_history_and_dispatches() {
        let (bridge, sink, history, _settings, _rx) = bridge();
        let reply = bridge
            .handle(BridgeRequest::StartDownload {
                tweet_id: Some("42".into()),
                items: vec![
                    video_item("https://video.twimg.com/a.mp4", "twitter_media/42-video-1.mp4"),
                    DownloadItem {
                        url: "https://pbs.twimg.com/media/b.jpg".into(),
                        media_type: MediaType::Image,
                        filename: "twitter_media/42-image-1.jpg".into(),
                    },
                ],
            })
            .await;

        assert!(reply.ok);
        let results = reply.result.unwrap();
        assert_eq!(results.as_array().unwrap().len(), 2);
        assert_eq!(results[0]["method"], "browser");
        assert!(results[0]["referenceId"].is_string());

        let calls = sink.calls.lock().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            SinkCall::Url {
                url: "https://video.twimg.com/a.mp4".into(),
                filename: "twitter_media/42-video-1.mp4".into(),
                save_as: false,
            }
        );

        let entries = history.all().await.unwrap();
        assert_eq!(entries.len(), 2);
        // Newest first.
        assert_eq!(entries[0].filename, "twitter_media/42-image-1.jpg");
        assert_eq!(entries[0].tweet_id.as_deref(), Some("42"));
        assert_eq!(entries[0].source, "twitter");
    }

    #[tokio::test]
    async fn start_download_rejects_empty_items() {
        let (bridge, sink, _history, _settings, _rx) = bridge();
        let reply = bridge
            .handle(BridgeRequest::StartDownload {
                tweet_id: None,
                items: vec![],
            })
            .await;
        assert!(!reply.ok);
        assert!(sink.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn history_capped_at_max() {
        let store = MemoryHistoryStore::default();
        for i in 0..(MAX_HISTORY + 10) {
            store
                .push(HistoryEntry::new(
                    None,
                    format!("https://example.com/{i}"),
                    format!("{i}.jpg"),
                    DownloadMethod::Browser,
                    "twitter",
                    None,
                ))
                .await
                .unwrap();
        }
        let entries = store.all().await.unwrap();
        assert_eq!(entries.len(), MAX_HISTORY);
        assert!(entries[0].url.ends_with(&format!("/{}", MAX_HISTORY + 9)));
    }

    #[tokio::test]
    async fn download_final_rejects_blob_urls() {
        let (bridge, sink, _history, _settings, mut rx) = bridge();
        bridge.download_final("blob:https://www.instagram.com/abc").await;

        assert!(sink.calls.lock().await.is_empty());
        match rx.try_recv().unwrap() {
            BridgeEvent::DownloadFailed { message } => {
                assert!(message.contains("blob_or_data_url"));
            }
            other => panic!("evento inesperado: {other:?}"),
        }
    }

    #[tokio::test]
    async fn download_final_falls_back_to_sink_url() {
        // An unsupported scheme makes the fetch fail before any network IO,
        // which exercises the direct-sink fallback.
        let (bridge, sink, history, _settings, mut rx) = bridge();
        bridge.download_final("ftp://host/clip.mp4").await;

        let calls = sink.calls.lock().await;
        assert_eq!(
            *calls,
            vec![SinkCall::Url {
                url: "ftp://host/clip.mp4".into(),
                filename: "clip.mp4".into(),
                save_as: true,
            }]
        );
        assert!(rx.try_recv().is_err());

        let entries = history.all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, "instagram");
    }

    #[tokio::test(start_paused = true)]
    async fn download_final_times_out_on_stalled_body() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // A server that sends headers plus a sliver of body and then goes
        // silent. The deadline must cut the fetch short instead of waiting
        // on the client's own timeout, and the fallback must still run.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000000\r\n\r\nparcial")
                .await;
            std::future::pending::<()>().await;
        });

        let (bridge, sink, history, _settings, mut rx) = bridge();
        let url = format!("http://{addr}/clip.mp4");
        bridge.download_final(&url).await;
        server.abort();

        let calls = sink.calls.lock().await;
        assert_eq!(
            *calls,
            vec![SinkCall::Url {
                url: url.clone(),
                filename: "clip.mp4".into(),
                save_as: true,
            }]
        );
        assert!(rx.try_recv().is_err());

        let entries = history.all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, url);
        assert_eq!(entries[0].source, "instagram");
    }

    #[tokio::test]
    async fn clear_history() {
        let (bridge, _sink, history, _settings, _rx) = bridge();
        history
            .push(HistoryEntry::new(
                None,
                "https://example.com/a.jpg",
                "a.jpg",
                DownloadMethod::Browser,
                "twitter",
                None,
            ))
            .await
            .unwrap();

        let reply = bridge.handle(BridgeRequest::ClearHistory).await;
        assert!(reply.ok);
        assert!(history.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_message_is_rejected() {
        let (bridge, _sink, _history, _settings, _rx) = bridge();
        let reply = bridge.handle_json(json!({ "type": "drop-tables" })).await;
        assert!(!reply.ok);
        assert!(reply.error.is_some());
    }
}
