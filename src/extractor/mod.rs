pub mod http;
pub mod ytdlp;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::errors::{DownloadError, ResolutionError};

/// Chunked byte stream handed out by a fetch capability.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Opaque capability for pulling the bytes of one encoded stream.
/// Owned by the extraction collaborator; the downloader only drives it.
#[async_trait]
pub trait StreamFetch: Send + Sync {
    async fn open(&self) -> std::result::Result<ByteStream, DownloadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

/// One encoded variant of a video, immutable once obtained from the
/// extraction collaborator.
///
/// `quality` is a resolution label ("1080p") for video streams and a
/// bitrate label ("128kbps") for audio streams; it is empty when the
/// extractor reports no bitrate at all.
#[derive(Clone)]
pub struct StreamDescriptor {
    pub id: String,
    pub kind: StreamKind,
    pub container: String,
    pub quality: String,
    pub codec: String,
    pub filesize: u64,
    pub is_progressive: bool,
    pub fetch: Arc<dyn StreamFetch>,
}

impl fmt::Debug for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDescriptor")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("container", &self.container)
            .field("quality", &self.quality)
            .field("codec", &self.codec)
            .field("filesize", &self.filesize)
            .field("is_progressive", &self.is_progressive)
            .finish()
    }
}

impl StreamDescriptor {
    /// Numeric value embedded in the quality label: 1080 for "1080p",
    /// 128 for "128kbps". None when the label carries no digits.
    pub fn quality_value(&self) -> Option<u64> {
        crate::utils::digit_value(&self.quality)
    }

    /// Rounded bitrate for audio streams, None when unreported.
    pub fn bitrate(&self) -> Option<u64> {
        match self.kind {
            StreamKind::Audio => self.quality_value(),
            StreamKind::Video => None,
        }
    }
}

/// Metadata for one resolved video plus its raw stream descriptors.
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    pub title: String,
    pub author: String,
    pub duration_seconds: u64,
    pub view_count: u64,
    pub streams: Vec<StreamDescriptor>,
}

/// The site-specific extraction collaborator. Given a URL it returns
/// video metadata and the list of available stream variants, or a
/// `ResolutionError` the orchestrator treats as fatal to the session.
#[async_trait]
pub trait VideoExtractor: Send + Sync {
    async fn resolve(&self, url: &str) -> std::result::Result<VideoMetadata, ResolutionError>;
}
