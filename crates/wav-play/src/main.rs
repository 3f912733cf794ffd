//! wav-play — a small CLI that plays WAV files through the streaming engine.
//!
//! Each file gets its own stream slot and CPAL sink; all of them play
//! concurrently. Ctrl-C, or every stream finishing, shuts the engine down.

mod cli;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wav_stream::playback::{CpalBackend, CpalSinkConfig};
use wav_stream::{Engine, EngineConfig};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match &args.cmd {
        cli::Command::Devices => {
            let host = cpal::default_host();
            wav_stream::device::list_devices(&host)
        }
        cli::Command::Play {
            paths,
            looped,
            volume,
        } => play(&args, paths, *looped, *volume),
    }
}

fn play(args: &cli::Args, paths: &[std::path::PathBuf], looped: bool, volume: i32) -> Result<()> {
    anyhow::ensure!(!paths.is_empty(), "no files to play");

    let backend = CpalBackend::new(CpalSinkConfig {
        device: args.device.clone(),
        max_request: args.max_request,
        ..CpalSinkConfig::default()
    });
    let engine = Engine::start(backend, EngineConfig {
        poll_interval: Duration::from_millis(args.poll_interval_ms.max(1)),
    })
    .context("start engine")?;

    let mut streams = Vec::with_capacity(paths.len());
    for path in paths {
        let id = engine
            .create_from_file(path, looped)
            .with_context(|| format!("open {}", path.display()))?;
        engine.set_volume(id, volume);
        engine.play(id);
        tracing::info!(path = %path.display(), looped, "playing");
        streams.push(id);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_handler = interrupted.clone();
    let _ = ctrlc::set_handler(move || {
        interrupted_handler.store(true, Ordering::Release);
    });

    // Give the poller a tick to move the streams out of Ready, then wait for
    // them all to finish (looped streams only end on Ctrl-C).
    std::thread::sleep(Duration::from_millis(args.poll_interval_ms.max(1) * 2));
    while !interrupted.load(Ordering::Acquire)
        && streams.iter().any(|id| engine.is_playing(*id))
    {
        std::thread::sleep(Duration::from_millis(100));
    }

    engine.shutdown();
    Ok(())
}
