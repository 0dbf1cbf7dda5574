use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::mpsc::UnboundedSender;

use crate::catalog::{build_menu, SelectableOption, StreamMenu};
use crate::downloader::Downloader;
use crate::errors::{AppError, DownloadError, MenuError, Result};
use crate::extractor::{StreamKind, VideoExtractor, VideoMetadata};
use crate::processing::MediaProcessor;
use crate::progress::{CancelFlag, ProgressTracker};
use crate::utils::{ensure_dir_exists, sanitize_filename};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    CatalogReady,
    Selected,
    Downloading,
    Processing,
    Done,
    Failed,
    Cancelled,
}

/// Typed events emitted by the session worker and consumed by the
/// front end's event loop. No cross-thread field mutation anywhere.
#[derive(Debug)]
pub enum SessionEvent {
    Stage(SessionState),
    DownloadProgress {
        percent: u8,
        bytes_done: u64,
        bytes_total: u64,
    },
    /// None while the processing total is unknown (indeterminate).
    ProcessingProgress { percent: Option<u8> },
    Finished(SessionOutcome),
}

#[derive(Debug)]
pub enum SessionOutcome {
    Done {
        path: PathBuf,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    },
    Failed(AppError),
    Cancelled,
}

/// Top-level state machine sequencing catalog lookup, selection,
/// download(s), processing and final placement. The orchestrator is the
/// only component that decides session-level outcome (Failed vs
/// Cancelled vs re-prompt).
pub struct DownloadOrchestrator {
    extractor: Arc<dyn VideoExtractor>,
    download_dir: PathBuf,
    ffmpeg_path: String,
    ffprobe_path: String,
    verbose: bool,
    cancel: CancelFlag,
    /// The temp directory is exclusive to one active session; a new one
    /// must not start until the previous session's cleanup finished.
    session_active: Arc<AtomicBool>,
    state: SessionState,
    metadata: Option<VideoMetadata>,
    menu: Option<StreamMenu>,
}

impl DownloadOrchestrator {
    pub fn new(
        extractor: Arc<dyn VideoExtractor>,
        download_dir: PathBuf,
        ffmpeg_path: String,
        ffprobe_path: String,
        verbose: bool,
    ) -> Self {
        Self {
            extractor,
            download_dir,
            ffmpeg_path,
            ffprobe_path,
            verbose,
            cancel: CancelFlag::new(),
            session_active: Arc::new(AtomicBool::new(false)),
            state: SessionState::Idle,
            metadata: None,
            menu: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn metadata(&self) -> Option<&VideoMetadata> {
        self.metadata.as_ref()
    }

    pub fn menu(&self) -> Option<&StreamMenu> {
        self.menu.as_ref()
    }

    /// Idle -> CatalogReady. On failure the state stays Idle and the
    /// error propagates to the caller.
    pub async fn load(&mut self, url: &str) -> Result<()> {
        let metadata = self.extractor.resolve(url).await?;
        let menu = build_menu(&metadata.streams, self.verbose);
        if menu.is_empty() {
            return Err(MenuError::EmptyCatalog.into());
        }
        self.metadata = Some(metadata);
        self.menu = Some(menu);
        self.state = SessionState::CatalogReady;
        Ok(())
    }

    /// CatalogReady -> Selected. An out-of-range index is rejected and
    /// the state stays CatalogReady so the front end can re-prompt.
    pub fn select(&mut self, index: usize) -> std::result::Result<SelectableOption, MenuError> {
        let menu = self
            .menu
            .as_ref()
            .ok_or_else(|| MenuError::InvalidSelection("no catalog loaded".to_string()))?;
        match menu.get(index) {
            Some(option) => {
                self.state = SessionState::Selected;
                Ok(option.clone())
            }
            None => Err(MenuError::InvalidSelection(format!(
                "{} is not between 1 and {}",
                index,
                menu.len()
            ))),
        }
    }

    /// Drive one full session for the given selection, emitting events
    /// until a terminal outcome. Refuses to start while a previous
    /// session has not finished its cleanup.
    pub async fn run(&mut self, selection: SelectableOption, events: UnboundedSender<SessionEvent>) {
        if self.session_active.swap(true, Ordering::SeqCst) {
            let _ = events.send(SessionEvent::Finished(SessionOutcome::Failed(
                AppError::Config("a download session is already active".to_string()),
            )));
            return;
        }

        let started = Utc::now();
        let result = self.drive(&selection, &events).await;

        let outcome = match result {
            Ok(path) => {
                self.set_stage(SessionState::Done, &events);
                SessionOutcome::Done {
                    path,
                    started,
                    finished: Utc::now(),
                }
            }
            Err(e) if e.is_cancellation() || self.cancel.is_cancelled() => {
                self.sweep_session_temps().await;
                self.set_stage(SessionState::Cancelled, &events);
                SessionOutcome::Cancelled
            }
            Err(e) => {
                self.sweep_session_temps().await;
                self.set_stage(SessionState::Failed, &events);
                SessionOutcome::Failed(e)
            }
        };

        self.session_active.store(false, Ordering::SeqCst);
        let _ = events.send(SessionEvent::Finished(outcome));
    }

    async fn drive(
        &mut self,
        selection: &SelectableOption,
        events: &UnboundedSender<SessionEvent>,
    ) -> Result<PathBuf> {
        let metadata = self
            .metadata
            .clone()
            .ok_or_else(|| MenuError::InvalidSelection("no catalog loaded".to_string()))?;
        ensure_dir_exists(&self.download_dir).await?;

        let safe_title = sanitize_filename(&metadata.title);
        let downloader = Downloader::new(self.cancel.clone());
        let processor = MediaProcessor::new(&self.ffmpeg_path, &self.ffprobe_path, self.cancel.clone())
            .with_verbose(self.verbose);

        self.set_stage(SessionState::Downloading, events);

        match selection {
            // Adaptive video: separate best-audio track, then remux.
            SelectableOption::Direct(descriptor)
                if descriptor.kind == StreamKind::Video && !descriptor.is_progressive =>
            {
                let best_audio = self
                    .menu
                    .as_ref()
                    .and_then(|menu| menu.best_audio.clone())
                    .ok_or_else(|| {
                        AppError::Download(DownloadError::SourceFailure(
                            "no audio track available to merge".to_string(),
                        ))
                    })?;

                let video_temp = self.download_dir.join(format!(
                    "{}_video_temp.{}",
                    safe_title, descriptor.container
                ));
                let audio_temp = self.download_dir.join(format!(
                    "{}_audio_temp.{}",
                    safe_title, best_audio.container
                ));
                let output = self.download_dir.join(format!(
                    "{}_{}.{}",
                    safe_title, descriptor.quality, descriptor.container
                ));

                info!(
                    "📥 Downloading video and audio separately for best quality ({} + {})",
                    descriptor.quality,
                    if best_audio.quality.is_empty() { "audio" } else { &best_audio.quality }
                );
                downloader
                    .fetch_pair(descriptor, &video_temp, &best_audio, &audio_temp, |done, total| {
                        let percent = if total == 0 {
                            0
                        } else {
                            (done.saturating_mul(100) / total).min(100) as u8
                        };
                        let _ = events.send(SessionEvent::DownloadProgress {
                            percent,
                            bytes_done: done,
                            bytes_total: total,
                        });
                    })
                    .await?;

                self.set_stage(SessionState::Processing, events);
                processor
                    .remux(&video_temp, &audio_temp, &output, |percent| {
                        let _ = events.send(SessionEvent::ProcessingProgress { percent });
                    })
                    .await?;
                Ok(output)
            }

            // Progressive video or a raw audio container: plain download,
            // promoted from the temp path on completion.
            SelectableOption::Direct(descriptor) => {
                let filename = match descriptor.kind {
                    StreamKind::Video => format!(
                        "{}_{}.{}",
                        safe_title, descriptor.quality, descriptor.container
                    ),
                    StreamKind::Audio => {
                        format!("{}_audio.{}", safe_title, descriptor.container)
                    }
                };
                let temp = self
                    .download_dir
                    .join(format!("{}_temp.{}", safe_title, descriptor.container));
                let output = self.download_dir.join(filename);

                self.fetch_single(&downloader, descriptor, &temp, events).await?;
                tokio::fs::rename(&temp, &output).await?;
                Ok(output)
            }

            // Virtual conversion: download the source, then transcode.
            SelectableOption::Virtual(virtual_option) => {
                let temp = self.download_dir.join(format!(
                    "{}_temp.{}",
                    safe_title, virtual_option.source.container
                ));
                let output = self.download_dir.join(format!(
                    "{}_audio.{}",
                    safe_title,
                    virtual_option.target.extension()
                ));

                self.fetch_single(&downloader, &virtual_option.source, &temp, events)
                    .await?;

                self.set_stage(SessionState::Processing, events);
                processor
                    .transcode_audio(&temp, &output, virtual_option.target, |percent| {
                        let _ = events.send(SessionEvent::ProcessingProgress { percent });
                    })
                    .await?;
                Ok(output)
            }
        }
    }

    async fn fetch_single(
        &self,
        downloader: &Downloader,
        descriptor: &crate::extractor::StreamDescriptor,
        temp: &Path,
        events: &UnboundedSender<SessionEvent>,
    ) -> Result<()> {
        let mut tracker = ProgressTracker::new(self.cancel.clone());
        tracker.reset(descriptor.filesize);
        let mut bytes_done = 0u64;
        let bytes_total = descriptor.filesize;

        downloader
            .fetch(descriptor, temp, |delta| {
                tracker.advance(delta);
                bytes_done += delta;
                let _ = events.send(SessionEvent::DownloadProgress {
                    percent: tracker.percent(),
                    bytes_done,
                    bytes_total,
                });
            })
            .await?;

        // Reported sizes are approximate; snap to 100 on completion.
        tracker.complete();
        let _ = events.send(SessionEvent::DownloadProgress {
            percent: tracker.percent(),
            bytes_done,
            bytes_total,
        });
        Ok(())
    }

    fn set_stage(&mut self, state: SessionState, events: &UnboundedSender<SessionEvent>) {
        self.state = state;
        let _ = events.send(SessionEvent::Stage(state));
    }

    /// Defensive sweep for anything matching this session's temp naming
    /// convention, so the download directory is clean in every terminal
    /// state.
    async fn sweep_session_temps(&self) {
        let Some(metadata) = &self.metadata else {
            return;
        };
        let prefix = sanitize_filename(&metadata.title);
        let Ok(mut entries) = tokio::fs::read_dir(&self.download_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) && name.contains("_temp.") {
                warn!("Removing leftover temp file: {}", name);
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
    }
}
