//! mixsplitr - split a DJ mix into identified, tagged tracks
//!
//! Subcommands:
//! - `split`: detect, identify and write tracks in one go
//! - `preview`: detect and identify, save the plan to the preview cache
//! - `apply`: write the tracks planned by `preview`
//! - `clear-cache`: discard the preview cache
//!
//! Settings resolve as CLI > `MIXSPLITR_*` environment > config file > default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mixsplitr::config::{resolve_mode, resolve_run_config, ConfigOverrides, RunConfig, RunMode};
use mixsplitr::types::{Decision, OutputStatus};
use mixsplitr::workflow::preview_cache;
use mixsplitr::workflow::track_assembler::unidentified_label;
use mixsplitr::workflow::{apply, preview, run_with, RunReport};
use mixsplitr_common::config::{load_config, TomlConfig, CONFIG_ENV_VAR};
use mixsplitr_common::credentials::CredentialOverrides;
use mixsplitr_common::events::{EventBus, MixEvent, SegmentPhase};
use mixsplitr_common::human_time::{format_clock, format_elapsed};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mixsplitr")]
#[command(about = "Split DJ mixes into identified, tagged tracks")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/mixsplitr/config.toml)
    #[arg(short, long, global = true, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split, identify and write tracks
    Split {
        /// Mix to split
        input: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Identify without writing audio and save the plan to the preview cache
    Preview {
        input: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Write the tracks planned by the last preview
    Apply {
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Delete the preview cache
    ClearCache {
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args, Debug, Default)]
struct OutputArgs {
    /// Output library directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Preview cache file (default: <output-dir>/mixsplitr_cache.json)
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Put identified tracks in per-artist folders
    #[arg(long)]
    artist_folders: Option<bool>,

    /// Leave tracks already in the library untouched
    #[arg(long)]
    skip_existing: bool,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// split_only, auto_tracklist, musicbrainz_only or acr_plus_musicbrainz
    #[arg(short, long)]
    mode: Option<RunMode>,

    /// Silence threshold in dBFS
    #[arg(long, allow_hyphen_values = true)]
    silence_threshold_db: Option<f64>,

    /// Minimum silence length (seconds) to split on
    #[arg(long)]
    min_silence_duration: Option<f64>,

    /// Minimum track length (seconds)
    #[arg(long)]
    min_segment_length: Option<f64>,

    /// Upper bound on the number of tracks
    #[arg(long)]
    max_segments: Option<usize>,

    /// Confidence at which a match is accepted without asking other providers
    #[arg(long)]
    accept_threshold: Option<f64>,

    /// Segments identified in parallel
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-call provider timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Retries per provider call on network errors
    #[arg(long)]
    retries: Option<u32>,

    #[arg(long)]
    acrcloud_host: Option<String>,
    #[arg(long)]
    acrcloud_access_key: Option<String>,
    #[arg(long)]
    acrcloud_access_secret: Option<String>,
    #[arg(long)]
    acoustid_key: Option<String>,
    #[arg(long)]
    lastfm_key: Option<String>,

    #[command(flatten)]
    output: OutputArgs,
}

impl OutputArgs {
    fn apply_to(&self, overrides: &mut ConfigOverrides) {
        overrides.output_dir = self.output_dir.clone();
        overrides.artist_folders = self.artist_folders;
        overrides.skip_existing = self.skip_existing.then_some(true);
    }

    fn cache_file(&self, config: &RunConfig) -> PathBuf {
        self.cache
            .clone()
            .unwrap_or_else(|| preview_cache::cache_path(&config.output_dir))
    }
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides {
            mode: self.mode,
            silence_threshold_db: self.silence_threshold_db,
            min_silence_duration: self.min_silence_duration,
            min_segment_length: self.min_segment_length,
            max_segments: self.max_segments,
            accept_confidence_threshold: self.accept_threshold,
            max_concurrent_identifications: self.concurrency,
            provider_timeout_seconds: self.timeout,
            retry_count: self.retries,
            credentials: CredentialOverrides {
                acrcloud_host: self.acrcloud_host.clone(),
                acrcloud_access_key: self.acrcloud_access_key.clone(),
                acrcloud_access_secret: self.acrcloud_access_secret.clone(),
                acoustid_api_key: self.acoustid_key.clone(),
                lastfm_api_key: self.lastfm_key.clone(),
            },
            ..Default::default()
        };
        self.output.apply_to(&mut overrides);
        overrides
    }
}

fn init_tracing(toml: &TomlConfig) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(toml.logging.effective_level())),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let toml = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&toml);
    info!(version = env!("CARGO_PKG_VERSION"), "mixsplitr starting");

    match cli.command {
        Command::Split { input, run } => {
            let overrides = run.overrides();
            let mode = resolve_mode(&overrides, &toml).context("Invalid run mode")?;
            let config = resolve_run_config(&overrides, &toml);
            let (events, cancel) = start_run_services();

            let report = run_with(&input, mode, &config, events, cancel)
                .await
                .with_context(|| format!("Failed to split {}", input.display()))?;
            print_report(&report, "Written");
        }
        Command::Preview { input, run } => {
            let overrides = run.overrides();
            let mode = resolve_mode(&overrides, &toml).context("Invalid run mode")?;
            let config = resolve_run_config(&overrides, &toml);
            let cache_file = run.output.cache_file(&config);
            let (events, cancel) = start_run_services();

            let report = preview(&input, mode, &config, &cache_file, events, cancel)
                .await
                .with_context(|| format!("Failed to preview {}", input.display()))?;
            print_report(&report, "Planned");
            println!("Preview saved to {}", cache_file.display());
            println!("Edit it to correct any track, then run `mixsplitr apply`.");
        }
        Command::Apply { output } => {
            let mut overrides = ConfigOverrides::default();
            output.apply_to(&mut overrides);
            let config = resolve_run_config(&overrides, &toml);
            let cache_file = output.cache_file(&config);
            let (events, _cancel) = start_run_services();

            let report = apply(&cache_file, &config, events)
                .await
                .with_context(|| format!("Failed to apply {}", cache_file.display()))?;
            print_report(&report, "Written");
        }
        Command::ClearCache { output } => {
            let mut overrides = ConfigOverrides::default();
            output.apply_to(&mut overrides);
            let config = resolve_run_config(&overrides, &toml);
            clear_cache(&output.cache_file(&config))?;
        }
    }

    Ok(())
}

fn clear_cache(path: &Path) -> Result<()> {
    if preview_cache::clear(path).context("Failed to remove preview cache")? {
        println!("Removed {}", path.display());
    } else {
        println!("No preview cache at {}", path.display());
    }
    Ok(())
}

/// Event bus with a progress printer attached, and a Ctrl-C cancel token
fn start_run_services() -> (EventBus, CancellationToken) {
    let events = EventBus::default();
    let cancel = CancellationToken::new();

    let mut rx = events.subscribe();
    tokio::spawn(async move {
        let mut total = 0;
        while let Ok(event) = rx.recv().await {
            match event {
                MixEvent::BoundariesDetected { segment_count, .. } => total = segment_count,
                MixEvent::SegmentProgress {
                    segment_index,
                    phase: phase @ (SegmentPhase::Accepted | SegmentPhase::Unidentified | SegmentPhase::WriteFailed),
                    provider,
                    ..
                } => {
                    let via = provider.map(|p| format!(" ({})", p)).unwrap_or_default();
                    eprintln!("[{}/{}] {:?}{}", segment_index + 1, total, phase, via);
                }
                MixEvent::RunCompleted { .. } => break,
                _ => {}
            }
        }
    });

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Ctrl-C received; finishing in-flight segments");
                on_signal.cancel();
            }
            Err(e) => warn!(error = %e, "Ctrl-C handler unavailable"),
        }
    });

    (events, cancel)
}

fn print_report(report: &RunReport, done_label: &str) {
    println!();
    println!("{:<4} {:<9} {:<16} {:<13} Output", "#", "Start", "Status", "Source");
    println!("{}", "-".repeat(80));

    for (track, result) in report.tracks.iter().zip(&report.results) {
        let status = match (&track.status, &result.decision) {
            (OutputStatus::Failed { .. }, _) => "failed".to_string(),
            (OutputStatus::SkippedExisting, _) => "in library".to_string(),
            (_, Decision::Identified { .. }) => "identified".to_string(),
            (_, Decision::Unidentified { reason }) => unidentified_label(reason).to_string(),
        };
        let source = track.source.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        let name = track
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!(
            "{:<4} {:<9} {:<16} {:<13} {}",
            track.segment_index + 1,
            format_clock(track.start_seconds),
            status,
            source,
            name
        );
        if let OutputStatus::Failed { error } = &track.status {
            println!("     {}", error);
        }
    }

    println!("{}", "-".repeat(80));
    let done = report
        .tracks
        .iter()
        .filter(|t| matches!(t.status, OutputStatus::Written | OutputStatus::Planned))
        .count();
    println!(
        "{} tracks from {} of audio: {} identified, {} unidentified, {} {}, {} skipped, {} failed ({})",
        report.tracks.len(),
        format_clock(report.duration_seconds),
        report.identified(),
        report.unidentified(),
        done,
        done_label.to_lowercase(),
        report.skipped(),
        report.failed(),
        format_elapsed(report.elapsed)
    );
    if report.no_boundaries_found {
        println!("No usable silence found; the mix was kept as a single track.");
    }
    if report.cancelled {
        println!("Run cancelled; remaining segments were left unidentified.");
    }
}
