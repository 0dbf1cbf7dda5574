use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::StreamExt;
use log::{debug, info};
use tokio::io::AsyncWriteExt;

use crate::errors::DownloadError;
use crate::extractor::StreamDescriptor;
use crate::progress::CancelFlag;

/// One in-flight transfer. Owned exclusively by the downloader; the
/// destination temp file never survives a failed or cancelled job.
#[derive(Debug)]
struct DownloadJob {
    dest: PathBuf,
    bytes_expected: u64,
    bytes_done: u64,
}

/// Retrieves stream bytes to local temporary storage in chunks,
/// reporting a byte delta per chunk and honoring cooperative
/// cancellation at chunk granularity.
pub struct Downloader {
    cancel: CancelFlag,
}

impl Downloader {
    pub fn new(cancel: CancelFlag) -> Self {
        Self { cancel }
    }

    /// Stream one descriptor to `dest`. `on_progress` receives the byte
    /// count of every written chunk. On any non-success outcome the
    /// partially written file is removed before returning.
    pub async fn fetch<F>(
        &self,
        descriptor: &StreamDescriptor,
        dest: &Path,
        mut on_progress: F,
    ) -> Result<(), DownloadError>
    where
        F: FnMut(u64) + Send,
    {
        info!(
            "📥 Downloading stream {} ({}) to {:?}",
            descriptor.id, descriptor.quality, dest
        );
        let result = self.transfer(descriptor, dest, &mut on_progress).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn transfer<F>(
        &self,
        descriptor: &StreamDescriptor,
        dest: &Path,
        on_progress: &mut F,
    ) -> Result<(), DownloadError>
    where
        F: FnMut(u64) + Send,
    {
        let mut job = DownloadJob {
            dest: dest.to_path_buf(),
            bytes_expected: descriptor.filesize,
            bytes_done: 0,
        };

        let mut stream = descriptor.fetch.open().await?;
        let mut file = tokio::fs::File::create(&job.dest).await?;

        while let Some(chunk) = stream.next().await {
            if self.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let chunk = chunk.map_err(|e| DownloadError::SourceFailure(e.to_string()))?;
            file.write_all(&chunk).await?;
            job.bytes_done += chunk.len() as u64;
            on_progress(chunk.len() as u64);
        }
        file.flush().await?;

        debug!(
            "Transfer complete: {} of {} expected bytes",
            job.bytes_done, job.bytes_expected
        );
        Ok(())
    }

    /// Fetch an adaptive video/audio pair concurrently. Combined
    /// progress is the sum of bytes done across both jobs over the sum
    /// of their expected totals, capped at the total. When either side
    /// fails or is cancelled, both temp files are removed and
    /// cancellation takes precedence over the other side's error.
    pub async fn fetch_pair<F>(
        &self,
        video: &StreamDescriptor,
        video_dest: &Path,
        audio: &StreamDescriptor,
        audio_dest: &Path,
        on_progress: F,
    ) -> Result<(), DownloadError>
    where
        F: Fn(u64, u64) + Send + Sync,
    {
        let total = video.filesize.saturating_add(audio.filesize);
        let done = AtomicU64::new(0);
        let report = |delta: u64| {
            let so_far = done.fetch_add(delta, Ordering::Relaxed) + delta;
            on_progress(so_far.min(total), total);
        };

        let (video_result, audio_result) = tokio::join!(
            self.fetch(video, video_dest, |delta| report(delta)),
            self.fetch(audio, audio_dest, |delta| report(delta)),
        );

        let first_error = match (video_result, audio_result) {
            (Ok(()), Ok(())) => return Ok(()),
            (Err(video_err), Err(audio_err)) => {
                if matches!(audio_err, DownloadError::Cancelled) {
                    audio_err
                } else {
                    video_err
                }
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => e,
        };

        // The surviving half of the pair is useless on its own.
        let _ = tokio::fs::remove_file(video_dest).await;
        let _ = tokio::fs::remove_file(audio_dest).await;
        Err(first_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::StreamKind;
    use crate::testutil::{descriptor, CancellingFetch, StubFetch};
    use std::sync::Arc;
    use std::sync::Mutex;

    fn chunked(sizes: &[usize]) -> Vec<Vec<u8>> {
        sizes.iter().map(|n| vec![0xabu8; *n]).collect()
    }

    #[tokio::test]
    async fn fetch_writes_all_chunks_and_reports_deltas() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("video_temp.mp4");
        let desc = descriptor(
            "v1",
            StreamKind::Video,
            "mp4",
            "720p",
            48,
            true,
            Arc::new(StubFetch::new(chunked(&[16, 16, 16]))),
        );

        let downloader = Downloader::new(CancelFlag::new());
        let deltas = Mutex::new(Vec::new());
        downloader
            .fetch(&desc, &dest, |d| deltas.lock().unwrap().push(d))
            .await
            .expect("fetch succeeds");

        assert_eq!(*deltas.lock().unwrap(), vec![16, 16, 16]);
        assert_eq!(std::fs::metadata(&dest).expect("file exists").len(), 48);
    }

    #[tokio::test]
    async fn cancellation_aborts_and_removes_partial_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("video_temp.mp4");
        let flag = CancelFlag::new();
        let desc = descriptor(
            "v1",
            StreamKind::Video,
            "mp4",
            "720p",
            160,
            true,
            Arc::new(CancellingFetch::new(chunked(&[16; 10]), 2, flag.clone())),
        );

        let downloader = Downloader::new(flag);
        let result = downloader.fetch(&desc, &dest, |_| {}).await;

        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn source_failure_removes_partial_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("audio_temp.m4a");
        let desc = descriptor(
            "a1",
            StreamKind::Audio,
            "m4a",
            "128kbps",
            64,
            false,
            Arc::new(StubFetch::failing_after(chunked(&[16, 16]), 1)),
        );

        let downloader = Downloader::new(CancelFlag::new());
        let result = downloader.fetch(&desc, &dest, |_| {}).await;

        assert!(matches!(result, Err(DownloadError::SourceFailure(_))));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn pair_progress_sums_both_jobs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let video_dest = dir.path().join("video_temp.mp4");
        let audio_dest = dir.path().join("audio_temp.m4a");
        let video = descriptor(
            "v1",
            StreamKind::Video,
            "mp4",
            "1080p",
            64,
            false,
            Arc::new(StubFetch::new(chunked(&[32, 32]))),
        );
        let audio = descriptor(
            "a1",
            StreamKind::Audio,
            "m4a",
            "128kbps",
            32,
            false,
            Arc::new(StubFetch::new(chunked(&[32]))),
        );

        let downloader = Downloader::new(CancelFlag::new());
        let seen = Mutex::new(Vec::new());
        downloader
            .fetch_pair(&video, &video_dest, &audio, &audio_dest, |done, total| {
                seen.lock().unwrap().push((done, total));
            })
            .await
            .expect("pair fetch succeeds");

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        // Monotone summed byte counts against the combined total.
        let mut last = 0;
        for (done, total) in seen.iter() {
            assert_eq!(*total, 96);
            assert!(*done >= last);
            assert!(*done <= *total);
            last = *done;
        }
        assert_eq!(last, 96);
        assert!(video_dest.exists());
        assert!(audio_dest.exists());
    }

    #[tokio::test]
    async fn pair_failure_removes_both_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let video_dest = dir.path().join("video_temp.mp4");
        let audio_dest = dir.path().join("audio_temp.m4a");
        let video = descriptor(
            "v1",
            StreamKind::Video,
            "mp4",
            "1080p",
            64,
            false,
            Arc::new(StubFetch::new(chunked(&[32, 32]))),
        );
        let audio = descriptor(
            "a1",
            StreamKind::Audio,
            "m4a",
            "128kbps",
            32,
            false,
            Arc::new(StubFetch::failing_after(chunked(&[16, 16]), 1)),
        );

        let downloader = Downloader::new(CancelFlag::new());
        let result = downloader
            .fetch_pair(&video, &video_dest, &audio, &audio_dest, |_, _| {})
            .await;

        assert!(matches!(result, Err(DownloadError::SourceFailure(_))));
        assert!(!video_dest.exists());
        assert!(!audio_dest.exists());
    }
}
