use std::process::Stdio;
use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use tokio::process::Command;

use crate::errors::ResolutionError;
use crate::extractor::http::HttpFetch;
use crate::extractor::{StreamDescriptor, StreamKind, VideoExtractor, VideoMetadata};

/// Extraction collaborator backed by the yt-dlp executable. One
/// `--dump-json` invocation per resolved URL; the returned format list
/// is mapped onto stream descriptors whose fetch capability is a plain
/// HTTP GET of the already-resolved media URL.
pub struct YtDlpExtractor {
    ytdlp_path: String,
    client: Client,
}

impl YtDlpExtractor {
    pub fn new(ytdlp_path: String, client: Client) -> Self {
        Self { ytdlp_path, client }
    }
}

#[derive(Debug, Deserialize)]
struct RawVideoInfo {
    title: String,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    view_count: Option<u64>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: String,
    #[serde(default)]
    ext: String,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    abr: Option<f64>,
    #[serde(default)]
    filesize: Option<u64>,
    #[serde(default)]
    filesize_approx: Option<f64>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
}

fn codec_present(codec: &Option<String>) -> bool {
    codec.as_deref().map_or(false, |c| !c.is_empty() && c != "none")
}

impl YtDlpExtractor {
    fn descriptor_from_format(&self, format: RawFormat) -> Option<StreamDescriptor> {
        let url = format.url?;
        // HLS/DASH manifest formats cannot be fetched with a plain GET.
        if let Some(protocol) = &format.protocol {
            if protocol.contains("m3u8") || protocol.contains("dash") {
                return None;
            }
        }

        let has_video = codec_present(&format.vcodec);
        let has_audio = codec_present(&format.acodec);
        let (kind, quality) = if has_video {
            (StreamKind::Video, format!("{}p", format.height?))
        } else if has_audio {
            let quality = format
                .abr
                .filter(|abr| *abr > 0.0)
                .map(|abr| format!("{}kbps", abr.round() as u64))
                .unwrap_or_default();
            (StreamKind::Audio, quality)
        } else {
            // Storyboards and other non-media formats.
            return None;
        };

        let filesize = format
            .filesize
            .or_else(|| format.filesize_approx.map(|s| s as u64))
            .unwrap_or(0);

        let codec = match kind {
            StreamKind::Video => format.vcodec.unwrap_or_default(),
            StreamKind::Audio => format.acodec.unwrap_or_default(),
        };

        Some(StreamDescriptor {
            id: format.format_id,
            kind,
            container: format.ext,
            quality,
            codec,
            filesize,
            is_progressive: has_video && has_audio,
            fetch: Arc::new(HttpFetch::new(self.client.clone(), url)),
        })
    }
}

#[async_trait::async_trait]
impl VideoExtractor for YtDlpExtractor {
    async fn resolve(&self, url: &str) -> std::result::Result<VideoMetadata, ResolutionError> {
        let parsed = url::Url::parse(url).map_err(|e| ResolutionError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ResolutionError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        log::info!("🔍 [EXTRACT] Resolving URL: {}", url);
        let output = Command::new(&self.ytdlp_path)
            .args(["--dump-json", "--no-warnings", "--no-playlist", url])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ResolutionError::Network(format!("failed to run {}: {}", self.ytdlp_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::error!("❌ [EXTRACT] yt-dlp failed: {}", stderr.trim());
            return Err(ResolutionError::Unavailable(stderr.trim().to_string()));
        }

        let info: RawVideoInfo = serde_json::from_slice(&output.stdout)
            .map_err(|e| ResolutionError::Malformed(e.to_string()))?;
        log::info!("✅ [EXTRACT] Resolved video: {}", info.title);

        let streams: Vec<StreamDescriptor> = info
            .formats
            .into_iter()
            .filter_map(|f| self.descriptor_from_format(f))
            .collect();
        log::info!("📊 [EXTRACT] {} fetchable stream variants", streams.len());

        Ok(VideoMetadata {
            title: info.title,
            author: info.uploader.or(info.channel).unwrap_or_else(|| "Unknown".to_string()),
            duration_seconds: info.duration.map(|d| d as u64).unwrap_or(0),
            view_count: info.view_count.unwrap_or(0),
            streams,
        })
    }
}
