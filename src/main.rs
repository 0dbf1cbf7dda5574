mod catalog;
mod config;
mod downloader;
mod errors;
mod extractor;
mod processing;
mod progress;
mod session;
#[cfg(test)]
mod testutil;
mod utils;

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::catalog::{SelectableOption, StreamMenu};
use crate::config::AppConfig;
use crate::errors::Result;
use crate::extractor::{http, ytdlp::YtDlpExtractor, StreamKind, VideoMetadata};
use crate::session::{DownloadOrchestrator, SessionEvent, SessionOutcome, SessionState};
use crate::utils::{format_count, format_duration, format_file_size, open_file_explorer};

#[derive(Parser, Debug)]
#[command(name = "tubedl", about = "Download YouTube videos", version)]
struct Args {
    /// YouTube video URL
    url: String,

    /// Show detailed information about streams and processing
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Info
        } else {
            log::LevelFilter::Warn
        })
        .init();

    match run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("\n❌ {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<i32> {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Failed to load configuration, using defaults: {}", e);
            AppConfig::default()
        }
    };

    let client = http::build_client()?;
    let extractor = Arc::new(YtDlpExtractor::new(config.ytdlp_path.clone(), client));
    let mut orchestrator = DownloadOrchestrator::new(
        extractor,
        config.download_path.clone(),
        config.ffmpeg_path.clone(),
        config.ffprobe_path.clone(),
        args.verbose,
    );

    println!("\n📡 Getting video information...");
    orchestrator.load(&args.url).await?;

    if let Some(metadata) = orchestrator.metadata() {
        print_video_info(metadata);
    }
    if let Some(menu) = orchestrator.menu() {
        print_stream_options(menu, args.verbose);
    }

    let Some(selection) = prompt_selection(&mut orchestrator).await? else {
        println!("\n🛑 Download cancelled by user.");
        return Ok(0);
    };
    print_selection_summary(&selection, args.verbose);

    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = tokio::spawn(async move {
        orchestrator.run(selection, tx).await;
    });

    let outcome = consume_events(&mut rx).await;
    let _ = worker.await;

    match outcome {
        Some(SessionOutcome::Done { path, started, finished }) => {
            let elapsed = (finished - started).num_seconds();
            info!("Session finished in {}s", elapsed);
            println!("\n✨ Download completed!");
            println!("📁 Saved to: {}", path.display());
            println!("\n🗂️  Opening downloads folder...");
            if let Some(folder) = path.parent() {
                open_file_explorer(folder);
            }
            Ok(0)
        }
        Some(SessionOutcome::Cancelled) => {
            println!("\n🛑 Download cancelled by user.");
            Ok(0)
        }
        Some(SessionOutcome::Failed(e)) => {
            eprintln!("\n❌ {}", e);
            Ok(1)
        }
        None => {
            eprintln!("\n❌ Download session ended unexpectedly");
            Ok(1)
        }
    }
}

/// Numbered-menu prompt; out-of-range and non-numeric input re-prompt
/// without advancing the session. Returns None on end of input.
async fn prompt_selection(
    orchestrator: &mut DownloadOrchestrator,
) -> Result<Option<SelectableOption>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n🎯 Choose the format number you want to download: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            return Ok(None);
        };
        match line.trim().parse::<usize>() {
            Ok(index) => match orchestrator.select(index) {
                Ok(selection) => return Ok(Some(selection)),
                Err(_) => println!("❌ Invalid number. Try again."),
            },
            Err(_) => println!("❌ Please enter a valid number."),
        }
    }
}

async fn consume_events(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> Option<SessionOutcome> {
    let mut download_bar: Option<ProgressBar> = None;
    let mut processing_bar: Option<ProgressBar> = None;

    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Stage(SessionState::Downloading) => {
                println!("\n🚀 Starting download...");
            }
            SessionEvent::Stage(SessionState::Processing) => {
                if let Some(bar) = download_bar.take() {
                    bar.finish();
                }
                println!("\n🔄 Processing files. This might take a few minutes...");
            }
            SessionEvent::Stage(_) => {}
            SessionEvent::DownloadProgress {
                bytes_done,
                bytes_total,
                ..
            } => {
                let bar = download_bar.get_or_insert_with(|| {
                    let bar = ProgressBar::new(bytes_total.max(1));
                    bar.set_style(
                        ProgressStyle::with_template(
                            "📹 {percent:>3}%|{bar:30}| {bytes}/{total_bytes}",
                        )
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                    );
                    bar
                });
                bar.set_position(bytes_done);
            }
            SessionEvent::ProcessingProgress { percent } => match percent {
                Some(percent) => {
                    let bar = processing_bar.get_or_insert_with(|| {
                        let bar = ProgressBar::new(100);
                        bar.set_style(
                            ProgressStyle::with_template("🎬 {percent:>3}%|{bar:30}| {elapsed}")
                                .unwrap_or_else(|_| ProgressStyle::default_bar()),
                        );
                        bar
                    });
                    bar.set_position(percent as u64);
                }
                None => {
                    let bar = processing_bar.get_or_insert_with(|| {
                        let bar = ProgressBar::new_spinner();
                        bar.set_message("🎬 Processing...");
                        bar
                    });
                    bar.tick();
                }
            },
            SessionEvent::Finished(outcome) => {
                if let Some(bar) = download_bar.take() {
                    bar.finish_and_clear();
                }
                if let Some(bar) = processing_bar.take() {
                    bar.finish_and_clear();
                }
                return Some(outcome);
            }
        }
    }
    None
}

fn print_video_info(metadata: &VideoMetadata) {
    println!("\n{}", "=".repeat(80));
    println!("Title: {}", metadata.title);
    println!("Channel: {}", metadata.author);
    println!("Duration: {}", format_duration(metadata.duration_seconds));
    println!("Views: {}", format_count(metadata.view_count));
    println!("{}", "=".repeat(80));
}

fn print_stream_options(menu: &StreamMenu, verbose: bool) {
    println!("\nAvailable formats:");

    let separator_length = if verbose { 70 } else { 50 };
    println!("{}", "-".repeat(separator_length));
    if verbose {
        println!(
            "{:<3} {:<12} {:<10} {:<8} {:<10} {:<10}",
            "#", "Type", "Quality", "Format", "Codec", "Size"
        );
    } else {
        println!(
            "{:<3} {:<12} {:<10} {:<8} {:<10}",
            "#", "Type", "Quality", "Format", "Size"
        );
    }
    println!("{}", "-".repeat(separator_length));

    for (pos, option) in menu.video.iter().enumerate() {
        let index = pos + 1;
        let quality = menu.video_quality_label(pos);
        if let SelectableOption::Direct(descriptor) = option {
            let size = format_file_size(descriptor.filesize);
            if verbose {
                println!(
                    "{:<3} {:<12} {:<10} {:<8} {:<10} {:<10}",
                    index, "Video", quality, descriptor.container, descriptor.codec, size
                );
            } else {
                println!(
                    "{:<3} {:<12} {:<10} {:<8} {:<10}",
                    index, "Video", quality, descriptor.container, size
                );
            }
        }
    }

    let audio_start = menu.video.len() + 1;
    for (pos, option) in menu.audio.iter().enumerate() {
        let index = audio_start + pos;
        let quality = menu.audio_quality_label(pos);
        let (container, codec, size) = match option {
            SelectableOption::Direct(descriptor) => (
                descriptor.container.clone(),
                descriptor.codec.clone(),
                format_file_size(descriptor.filesize),
            ),
            SelectableOption::Virtual(virtual_option) => (
                virtual_option.target.extension().to_string(),
                virtual_option.target.label().to_string(),
                format_file_size(virtual_option.filesize),
            ),
        };
        if verbose {
            println!(
                "{:<3} {:<12} {:<10} {:<8} {:<10} {:<10}",
                index, "Audio only", quality, container, codec, size
            );
        } else {
            println!(
                "{:<3} {:<12} {:<10} {:<8} {:<10}",
                index, "Audio only", quality, container, size
            );
        }
    }

    println!("{}", "-".repeat(separator_length));
}

fn print_selection_summary(selection: &SelectableOption, verbose: bool) {
    match selection {
        SelectableOption::Direct(descriptor) => {
            match descriptor.kind {
                StreamKind::Video => println!("\n🎥 Selected quality: {}", descriptor.quality),
                StreamKind::Audio => println!("\n🎵 Selected quality: {}", descriptor.quality),
            }
            if verbose {
                println!("ℹ️  Container: {}", descriptor.container);
            }
            println!("📦 File size: {}", format_file_size(descriptor.filesize));
        }
        SelectableOption::Virtual(virtual_option) => {
            println!("\n🎵 Selected quality: {}", virtual_option.bitrate_label);
            println!("ℹ️  Format: {}", virtual_option.target.label().to_uppercase());
            println!("📦 File size: {}", format_file_size(virtual_option.filesize));
        }
    }
}
