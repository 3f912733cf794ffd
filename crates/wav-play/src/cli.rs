use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "wav-play", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Refill request size in bytes (per-stream staging buffer size)
    #[arg(long, default_value_t = 0x10000)]
    pub max_request: usize,

    /// Poller tick interval in milliseconds
    #[arg(long, default_value_t = 20)]
    pub poll_interval_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play one or more WAV files concurrently
    Play {
        /// Paths to WAV files (or raw CDDA `.raw` sidecars)
        paths: Vec<PathBuf>,

        /// Restart each stream from the payload start when it runs out
        #[arg(long)]
        looped: bool,

        /// Initial volume, 0-255
        #[arg(long, default_value_t = 240)]
        volume: i32,
    },

    /// List output devices and exit
    Devices,
}
