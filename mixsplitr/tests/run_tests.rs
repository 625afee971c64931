//! End-to-end runs in split-only mode (no network)

mod helpers;

use helpers::{generate_mix_wav, MixConfig};
use mixsplitr::config::{RunConfig, RunMode};
use mixsplitr::types::{Decision, OutputStatus, UnidentifiedReason};
use mixsplitr::workflow::{apply, preview, preview_cache, run, run_with};
use mixsplitr::RunError;
use mixsplitr_common::events::{EventBus, MixEvent};
use std::path::Path;
use tokio_util::sync::CancellationToken;

fn split_config(output_dir: &Path) -> RunConfig {
    let mut config = RunConfig {
        output_dir: output_dir.to_path_buf(),
        fetch_artwork: false,
        enrich_metadata: false,
        ..Default::default()
    };
    config.detection.min_silence_duration = 1.0;
    config
}

#[tokio::test]
async fn test_split_only_run_writes_every_segment() {
    let dir = tempfile::tempdir().unwrap();
    let input = generate_mix_wav(&dir.path().join("mix.wav"), &MixConfig::three_track_mix()).unwrap();
    let out = dir.path().join("library");

    let tracks = run(&input, RunMode::SplitOnly, &split_config(&out)).await.unwrap();

    assert_eq!(tracks.len(), 3);
    assert!(tracks.iter().all(|t| t.is_written() && !t.identified));
    let names: Vec<String> = tracks
        .iter()
        .map(|t| t.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec!["Track 01 (00-00).wav", "Track 02 (00-45).wav", "Track 03 (01-45).wav"]
    );

    let total_frames: u32 = tracks
        .iter()
        .map(|t| hound::WavReader::open(&t.path).unwrap().duration())
        .sum();
    assert_eq!(total_frames, 180 * 8000);
}

#[tokio::test]
async fn test_run_reports_progress_events() {
    let dir = tempfile::tempdir().unwrap();
    let input = generate_mix_wav(&dir.path().join("mix.wav"), &MixConfig::three_track_mix()).unwrap();
    let events = EventBus::new(1024);
    let mut rx = events.subscribe();

    let report = run_with(
        &input,
        RunMode::SplitOnly,
        &split_config(&dir.path().join("out")),
        events,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.tracks.len(), 3);
    assert_eq!(report.written(), 3);
    assert!(!report.no_boundaries_found);

    let mut received = Vec::new();
    while let Ok(event) = rx.try_recv() {
        received.push(event);
    }
    assert!(matches!(received.first(), Some(MixEvent::RunStarted { .. })));
    assert!(received
        .iter()
        .any(|e| matches!(e, MixEvent::BoundariesDetected { segment_count: 3, .. })));
    assert!(matches!(
        received.last(),
        Some(MixEvent::RunCompleted { tracks: 3, failed: 0, .. })
    ));
}

#[tokio::test]
async fn test_short_input_kept_whole() {
    let dir = tempfile::tempdir().unwrap();
    let input = generate_mix_wav(&dir.path().join("mix.wav"), &MixConfig::three_track_mix()).unwrap();
    let mut config = split_config(&dir.path().join("out"));
    config.single_track_below_seconds = Some(600.0);

    let tracks = run(&input, RunMode::SplitOnly, &config).await.unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].end_seconds, 180.0);
}

#[tokio::test]
async fn test_undecodable_input_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("not_audio.wav");
    std::fs::write(&input, b"definitely not a RIFF file").unwrap();

    let result = run(&input, RunMode::SplitOnly, &split_config(&dir.path().join("out"))).await;
    assert!(matches!(result, Err(RunError::Decode(_))));
    assert!(!dir.path().join("out").exists());
}

#[tokio::test]
async fn test_invalid_config_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let input = generate_mix_wav(&dir.path().join("mix.wav"), &MixConfig::default()).unwrap();
    let mut config = split_config(&dir.path().join("out"));
    config.max_concurrent_identifications = 0;

    let result = run(&input, RunMode::SplitOnly, &config).await;
    assert!(matches!(result, Err(RunError::Config(_))));
}

#[tokio::test]
async fn test_preview_then_apply() {
    let dir = tempfile::tempdir().unwrap();
    let input = generate_mix_wav(&dir.path().join("mix.wav"), &MixConfig::three_track_mix()).unwrap();
    let out = dir.path().join("library");
    let config = split_config(&out);
    let cache_file = preview_cache::cache_path(&out);

    let planned = preview(
        &input,
        RunMode::SplitOnly,
        &config,
        &cache_file,
        EventBus::default(),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(planned.tracks.len(), 3);
    assert!(planned.tracks.iter().all(|t| t.status == OutputStatus::Planned));
    assert!(planned.tracks.iter().all(|t| !t.path.exists()));

    let cache = preview_cache::load(&cache_file).unwrap();
    assert_eq!(cache.tracks.len(), 3);
    assert!(matches!(
        cache.tracks[0].result.decision,
        Decision::Unidentified {
            reason: UnidentifiedReason::SplitOnly
        }
    ));

    let applied = apply(&cache_file, &config, EventBus::default()).await.unwrap();
    assert_eq!(applied.written(), 3);
    let planned_paths: Vec<_> = planned.tracks.iter().map(|t| t.path.clone()).collect();
    let written_paths: Vec<_> = applied.tracks.iter().map(|t| t.path.clone()).collect();
    assert_eq!(planned_paths, written_paths);

    assert!(preview_cache::clear(&cache_file).unwrap());
}

#[tokio::test]
async fn test_apply_without_preview_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = split_config(dir.path());
    let result = apply(&preview_cache::cache_path(dir.path()), &config, EventBus::default()).await;
    assert!(matches!(result, Err(RunError::Cache(_))));
}
