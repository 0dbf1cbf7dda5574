//! Shared helpers for unit tests: in-memory fetch capabilities and
//! descriptor builders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};

use crate::errors::DownloadError;
use crate::extractor::{ByteStream, StreamDescriptor, StreamFetch, VideoExtractor, VideoMetadata};
use crate::extractor::StreamKind;
use crate::progress::CancelFlag;

/// Serves a fixed sequence of chunks from memory. With `fail_after`
/// set, the stream yields that many chunks and then an IO error.
pub struct StubFetch {
    chunks: Vec<Vec<u8>>,
    fail_after: Option<usize>,
}

impl StubFetch {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            fail_after: None,
        }
    }

    pub fn failing_after(chunks: Vec<Vec<u8>>, fail_after: usize) -> Self {
        Self {
            chunks,
            fail_after: Some(fail_after),
        }
    }
}

#[async_trait]
impl StreamFetch for StubFetch {
    async fn open(&self) -> Result<ByteStream, DownloadError> {
        let mut items: Vec<std::io::Result<Bytes>> = Vec::new();
        for (i, chunk) in self.chunks.iter().enumerate() {
            if Some(i) == self.fail_after {
                items.push(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "stub source failure",
                )));
                break;
            }
            items.push(Ok(Bytes::from(chunk.clone())));
        }
        if self.fail_after == Some(self.chunks.len()) {
            items.push(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "stub source failure",
            )));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Trips the shared cancel flag after yielding `cancel_after` chunks,
/// simulating a user interrupt mid-transfer.
pub struct CancellingFetch {
    chunks: Vec<Vec<u8>>,
    cancel_after: usize,
    flag: CancelFlag,
}

impl CancellingFetch {
    pub fn new(chunks: Vec<Vec<u8>>, cancel_after: usize, flag: CancelFlag) -> Self {
        Self {
            chunks,
            cancel_after,
            flag,
        }
    }
}

#[async_trait]
impl StreamFetch for CancellingFetch {
    async fn open(&self) -> Result<ByteStream, DownloadError> {
        let flag = self.flag.clone();
        let cancel_after = self.cancel_after;
        let served = Arc::new(AtomicUsize::new(0));
        let chunks: Vec<std::io::Result<Bytes>> = self
            .chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.clone())))
            .collect();
        let stream = stream::iter(chunks).map({
            let served = served.clone();
            move |item| {
                if served.fetch_add(1, Ordering::SeqCst) + 1 >= cancel_after {
                    flag.cancel();
                }
                item
            }
        });
        Ok(Box::pin(stream))
    }
}

pub fn descriptor(
    id: &str,
    kind: StreamKind,
    container: &str,
    quality: &str,
    filesize: u64,
    is_progressive: bool,
    fetch: Arc<dyn StreamFetch>,
) -> StreamDescriptor {
    StreamDescriptor {
        id: id.to_string(),
        kind,
        container: container.to_string(),
        quality: quality.to_string(),
        codec: String::new(),
        filesize,
        is_progressive,
        fetch,
    }
}

pub fn video_desc(quality: &str, container: &str, filesize: u64, is_progressive: bool) -> StreamDescriptor {
    descriptor(
        &format!("v-{}-{}-{}", quality, container, filesize),
        StreamKind::Video,
        container,
        quality,
        filesize,
        is_progressive,
        Arc::new(StubFetch::new(vec![vec![0u8; 16]])),
    )
}

pub fn audio_desc(quality: &str, filesize: u64) -> StreamDescriptor {
    descriptor(
        &format!("a-{}-{}", quality, filesize),
        StreamKind::Audio,
        "m4a",
        quality,
        filesize,
        false,
        Arc::new(StubFetch::new(vec![vec![0u8; 16]])),
    )
}

/// Extractor returning canned metadata, for orchestrator tests.
pub struct StubExtractor {
    pub metadata: VideoMetadata,
}

#[async_trait]
impl VideoExtractor for StubExtractor {
    async fn resolve(&self, _url: &str) -> Result<VideoMetadata, crate::errors::ResolutionError> {
        Ok(self.metadata.clone())
    }
}
