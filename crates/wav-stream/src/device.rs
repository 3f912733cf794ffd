//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for listing output devices and selecting either
//! the default device or a device by substring match.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device matching `needle` (case-insensitive), or the
/// default device.
///
/// Returns an error if no suitable device is found.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose an output config for the payload sample rate.
///
/// Prefers an exact rate match; otherwise the nearest supported rate (no
/// resampling happens downstream, so a mismatch shifts pitch and is logged by
/// the caller). Lower `sample_format_rank` wins among equal rates.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();
    if ranges.is_empty() {
        return Err(anyhow!("No supported output configs"));
    }

    let mut best: Option<(u32, u8, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = clamp_rate(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_rate, b_rank, _)) => {
                is_better_candidate(rate, rank, target_rate, *b_rate, *b_rank)
            }
        };
        if replace {
            best = Some((rate, rank, range.with_sample_rate(rate)));
        }
    }

    Ok(best.unwrap().2)
}

fn clamp_rate(min: u32, max: u32, target: u32) -> u32 {
    if target < min {
        min
    } else if target > max {
        max
    } else {
        target
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(rate: u32, rank: u8, target: u32, best_rate: u32, best_rank: u8) -> bool {
    let dist = rate.abs_diff(target);
    let best_dist = best_rate.abs_diff(target);
    if dist != best_dist {
        dist < best_dist
    } else {
        rank < best_rank
    }
}

/// Log available output devices for the current host.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
