use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{info, warn};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::catalog::AudioTarget;
use crate::errors::ProcessError;
use crate::progress::{CancelFlag, ProgressTracker};

/// Which key of the tool's progress channel carries the unit counter
/// for the running mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgressKey {
    /// `frame=<n>` lines, against a total frame count.
    Frames,
    /// `out_time_ms=<n>` lines (microseconds despite the name), against
    /// the input duration.
    OutTime,
}

/// Removes temp artifacts when the processing scope ends, success or
/// failure. Missing files are ignored.
struct TempCleanup {
    paths: Vec<PathBuf>,
}

impl TempCleanup {
    fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl Drop for TempCleanup {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn parse_progress_units(line: &str, key: ProgressKey) -> Option<u64> {
    let (name, value) = line.split_once('=')?;
    match (key, name.trim()) {
        (ProgressKey::Frames, "frame") => value.trim().parse().ok(),
        (ProgressKey::OutTime, "out_time_ms") => value.trim().parse().ok(),
        _ => None,
    }
}

/// `r_frame_rate` comes as a fraction like "30000/1001", occasionally a
/// bare integer.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let pattern = Regex::new(r"^(\d+)(?:/(\d+))?$").ok()?;
    let captures = pattern.captures(raw.trim())?;
    let numerator: f64 = captures.get(1)?.as_str().parse().ok()?;
    let denominator: f64 = match captures.get(2) {
        Some(d) => d.as_str().parse().ok()?,
        None => 1.0,
    };
    if denominator == 0.0 {
        return None;
    }
    Some(numerator / denominator)
}

/// Frame-count estimate from the probe's duration and frame-rate lines,
/// which may arrive in either order. Frame rates are fractions or bare
/// integers; durations always carry a decimal point.
fn estimate_frames(raw: &str) -> Option<u64> {
    let mut duration: Option<f64> = None;
    let mut fps: Option<f64> = None;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.contains('/') {
            fps = fps.or_else(|| parse_frame_rate(line));
        } else if !line.contains('.') && fps.is_none() {
            fps = parse_frame_rate(line);
        } else if duration.is_none() {
            duration = line.parse().ok();
        }
    }
    Some((duration? * fps?) as u64)
}

/// Tool output is staged next to the destination and only promoted on
/// confirmed success, so no partial file ever lands at the final path.
fn staging_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let ext = output
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("tmp");
    output.with_file_name(format!("{}_out_temp.{}", stem, ext))
}

/// Invokes the external media tool (ffmpeg/ffprobe) to merge or
/// transcode downloaded streams, deriving real-time progress from the
/// tool's own progress channel. Temporary input files are removed after
/// the tool terminates regardless of outcome.
pub struct MediaProcessor {
    ffmpeg: String,
    ffprobe: String,
    cancel: CancelFlag,
    verbose: bool,
}

impl MediaProcessor {
    pub fn new(ffmpeg: &str, ffprobe: &str, cancel: CancelFlag) -> Self {
        Self {
            ffmpeg: ffmpeg.to_string(),
            ffprobe: ffprobe.to_string(),
            cancel,
            verbose: false,
        }
    }

    /// In verbose mode the tool's own diagnostics stream to the console
    /// instead of the parsed progress channel.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Merge an adaptive video/audio pair into one container, copying
    /// the video codec stream and encoding audio to AAC. `on_progress`
    /// receives percentages, or `None` while the total frame count is
    /// unknown (indeterminate, spinner territory).
    pub async fn remux<F>(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        on_progress: F,
    ) -> Result<(), ProcessError>
    where
        F: FnMut(Option<u8>) + Send,
    {
        let staging = staging_path(output);
        let _cleanup = TempCleanup::new(vec![
            video.to_path_buf(),
            audio.to_path_buf(),
            staging.clone(),
        ]);

        info!("🔄 Merging video and audio into {:?}", output);
        let total_frames = self.probe_total_frames(video).await;
        if total_frames.is_none() {
            warn!("Total frame count unavailable, progress will be indeterminate");
        }

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-c:v", "copy", "-c:a", "aac"]);
        self.run_tool(cmd, &staging, total_frames, ProgressKey::Frames, on_progress)
            .await?;

        tokio::fs::rename(&staging, output).await?;
        Ok(())
    }

    /// Convert a downloaded audio stream into the target container.
    /// MP3 uses high-quality VBR, AAC a fixed 192kbps.
    pub async fn transcode_audio<F>(
        &self,
        input: &Path,
        output: &Path,
        target: AudioTarget,
        on_progress: F,
    ) -> Result<(), ProcessError>
    where
        F: FnMut(Option<u8>) + Send,
    {
        let staging = staging_path(output);
        let _cleanup = TempCleanup::new(vec![input.to_path_buf(), staging.clone()]);

        info!("🎵 Converting audio to {} at {:?}", target.label(), output);
        let total_us = self.probe_duration_us(input).await;
        if total_us.is_none() {
            warn!("Input duration unavailable, progress will be indeterminate");
        }

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-i").arg(input);
        match target {
            AudioTarget::Mp3 => cmd.args(["-codec:a", "libmp3lame", "-q:a", "2"]),
            AudioTarget::Aac => cmd.args(["-c:a", "aac", "-b:a", "192k"]),
        };
        self.run_tool(cmd, &staging, total_us, ProgressKey::OutTime, on_progress)
            .await?;

        tokio::fs::rename(&staging, output).await?;
        Ok(())
    }

    async fn run_tool<F>(
        &self,
        mut cmd: Command,
        staging: &Path,
        total_units: Option<u64>,
        key: ProgressKey,
        mut on_progress: F,
    ) -> Result<(), ProcessError>
    where
        F: FnMut(Option<u8>) + Send,
    {
        if self.verbose {
            // Diagnostics go straight to the console; no progress channel.
            cmd.arg(staging)
                .arg("-y")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::inherit());
            let mut child = cmd
                .spawn()
                .map_err(|e| ProcessError::ToolUnavailable(e.to_string()))?;
            let status = self.supervise(&mut child).await?;
            return if status.success() {
                Ok(())
            } else {
                Err(ProcessError::ToolFailed(status.code().unwrap_or(-1)))
            };
        }

        cmd.args(["-progress", "pipe:1"])
            .arg(staging)
            .arg("-y")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd
            .spawn()
            .map_err(|e| ProcessError::ToolUnavailable(e.to_string()))?;

        // The progress channel is read on its own task and forwarded as
        // discrete unit counts over a bounded channel, decoupled from
        // this control flow.
        let (tx, mut rx) = mpsc::channel::<u64>(32);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(units) = parse_progress_units(&line, key) {
                        if tx.send(units).await.is_err() {
                            break;
                        }
                    }
                }
            });
        } else {
            drop(tx);
        }

        let mut tracker = ProgressTracker::new(self.cancel.clone());
        tracker.reset(total_units.unwrap_or(0));
        let mut last_units = 0u64;
        let mut poll = tokio::time::interval(Duration::from_millis(200));

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(units) => {
                        // The tool reports cumulative counters.
                        tracker.advance(units.saturating_sub(last_units));
                        last_units = last_units.max(units);
                        on_progress(total_units.map(|_| tracker.percent()));
                    }
                    None => break,
                },
                _ = poll.tick() => {
                    if self.cancel.is_cancelled() {
                        let _ = child.kill().await;
                        let _ = child.wait().await;
                        return Err(ProcessError::Cancelled);
                    }
                }
            }
        }

        let status = self.supervise(&mut child).await?;
        if status.success() {
            on_progress(Some(100));
            Ok(())
        } else {
            Err(ProcessError::ToolFailed(status.code().unwrap_or(-1)))
        }
    }

    /// Wait for the tool while honoring cancellation: a tripped flag
    /// kills the child instead of letting it run to completion.
    async fn supervise(&self, child: &mut Child) -> Result<std::process::ExitStatus, ProcessError> {
        let mut poll = tokio::time::interval(Duration::from_millis(200));
        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status?;
                    if self.cancel.is_cancelled() {
                        return Err(ProcessError::Cancelled);
                    }
                    return Ok(status);
                }
                _ = poll.tick() => {
                    if self.cancel.is_cancelled() {
                        let _ = child.kill().await;
                        let _ = child.wait().await;
                        return Err(ProcessError::Cancelled);
                    }
                }
            }
        }
    }

    /// Exact frame count when the container reports one, otherwise an
    /// estimate from duration and frame rate. None means indeterminate.
    async fn probe_total_frames(&self, video: &Path) -> Option<u64> {
        let out = self
            .probe(
                &[
                    "-v",
                    "error",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "stream=nb_frames",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ],
                video,
            )
            .await?;
        if let Ok(frames) = out.trim().parse::<u64>() {
            return Some(frames);
        }

        let out = self
            .probe(
                &[
                    "-v",
                    "error",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "stream=duration,r_frame_rate",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ],
                video,
            )
            .await?;
        estimate_frames(&out)
    }

    async fn probe_duration_us(&self, input: &Path) -> Option<u64> {
        let out = self
            .probe(
                &[
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ],
                input,
            )
            .await?;
        let seconds: f64 = out.trim().parse().ok()?;
        Some((seconds * 1_000_000.0) as u64)
    }

    async fn probe(&self, args: &[&str], input: &Path) -> Option<String> {
        let output = Command::new(&self.ffprobe)
            .args(args)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8(output.stdout).ok()
    }
}
