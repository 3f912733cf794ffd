//! CPAL-backed hardware sink.
//!
//! Each sink owns a bounded interleaved byte ring. `poll` tops the ring up in
//! whole-frame requests through the refill protocol; `start` spawns a
//! dedicated output thread that builds the CPAL stream (streams never cross
//! threads) and converts payload bytes to the device sample format inside the
//! real-time callback, with the volume gain applied from an atomic so
//! `set_volume` is safe from any thread. Underruns are filled with silence.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::device;
use crate::sink::{ChannelMode, PayloadWidth, PollOutcome, RefillSource, Sink, SinkBackend};

/// Tuning for the CPAL sink backend.
#[derive(Clone, Debug)]
pub struct CpalSinkConfig {
    /// Output device substring match; `None` picks the host default.
    pub device: Option<String>,

    /// Upper bound on one refill request, in bytes. Scratch buffers and the
    /// ring are sized from this.
    pub max_request: usize,

    /// Ring capacity, in multiples of `max_request`. Larger rides out slower
    /// poll ticks at the cost of latency.
    pub ring_quanta: usize,
}

impl Default for CpalSinkConfig {
    fn default() -> Self {
        Self {
            device: None,
            max_request: 0x10000,
            ring_quanta: 4,
        }
    }
}

/// Concurrent streams the backend hands out. Mirrors the stream-channel
/// budget of the hardware this engine was modeled on.
const MAX_STREAMS: usize = 4;

/// Scratch alignment requested from slots. CPAL itself has no requirement;
/// this matches the DMA alignment of the modeled hardware and costs nothing.
const BUFFER_ALIGN: usize = 32;

pub struct CpalBackend {
    config: CpalSinkConfig,
}

impl CpalBackend {
    pub fn new(config: CpalSinkConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }
}

impl SinkBackend for CpalBackend {
    fn create_sink(&self) -> Result<Arc<dyn Sink>> {
        if self.config.max_request == 0 {
            bail!("max_request must be nonzero");
        }
        Ok(Arc::new(CpalSink {
            shared: Arc::new(Shared {
                ring: Mutex::new(RingState {
                    buf: VecDeque::new(),
                    format: None,
                }),
                gain: AtomicU8::new(255),
            }),
            worker: Mutex::new(None),
            device: self.config.device.clone(),
            max_request: self.config.max_request,
            capacity: self.config.max_request * self.config.ring_quanta.max(2),
        }))
    }

    fn max_streams(&self) -> usize {
        MAX_STREAMS
    }

    fn max_request(&self) -> usize {
        self.config.max_request
    }

    fn buffer_align(&self) -> usize {
        BUFFER_ALIGN
    }
}

#[derive(Clone, Copy)]
struct ActiveFormat {
    channels: u16,
    width: PayloadWidth,
}

struct RingState {
    buf: VecDeque<u8>,
    /// Set while started; `None` means the sink is stopped and `poll` idles.
    format: Option<ActiveFormat>,
}

struct Shared {
    ring: Mutex<RingState>,
    /// Volume 0..=255, read by the audio callback every buffer.
    gain: AtomicU8,
}

struct Worker {
    stop_tx: crossbeam_channel::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct CpalSink {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    device: Option<String>,
    max_request: usize,
    capacity: usize,
}

impl Sink for CpalSink {
    fn start(&self, sample_rate: u32, channels: ChannelMode, width: PayloadWidth) -> Result<()> {
        if width == PayloadWidth::Adpcm4 {
            bail!("ADPCM payloads need a hardware decoder this backend does not have");
        }
        self.stop();

        {
            let mut state = self.shared.ring.lock().unwrap();
            state.buf.clear();
            state.format = Some(ActiveFormat {
                channels: channels.count(),
                width,
            });
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let shared = self.shared.clone();
        let needle = self.device.clone();

        let handle = std::thread::Builder::new()
            .name("cpal-sink".into())
            .spawn(move || {
                let stream = match build_device_stream(&shared, needle.as_deref(), sample_rate) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Hold the stream alive until told to stop.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("spawn cpal-sink thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *self.worker.lock().unwrap() = Some(Worker { stop_tx, handle });
                tracing::debug!(rate_hz = sample_rate, ch = channels.count(), "sink started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                self.shared.ring.lock().unwrap().format = None;
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                self.shared.ring.lock().unwrap().format = None;
                Err(anyhow!("cpal-sink thread died before reporting readiness"))
            }
        }
    }

    fn stop(&self) {
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.stop_tx.send(());
            let _ = worker.handle.join();
        }
        let mut state = self.shared.ring.lock().unwrap();
        state.buf.clear();
        state.format = None;
    }

    fn poll(&self, feeder: &mut dyn RefillSource) -> PollOutcome {
        let mut fed = false;
        loop {
            // Compute the request without holding the ring lock across the
            // refill, so the audio callback is never blocked on source I/O.
            let want = {
                let state = self.shared.ring.lock().unwrap();
                let Some(format) = state.format else {
                    return PollOutcome::Idle;
                };
                let frame = frame_bytes(format);
                let want = self.max_request / frame * frame;
                if want == 0 || self.capacity - state.buf.len() < want {
                    break;
                }
                want
            };
            match feeder.refill(want) {
                Some(bytes) => {
                    let short = bytes.len() < want;
                    self.shared.ring.lock().unwrap().buf.extend(bytes);
                    fed = true;
                    if short {
                        break;
                    }
                }
                None => return PollOutcome::Finished,
            }
        }
        if fed { PollOutcome::Fed } else { PollOutcome::Idle }
    }

    fn set_volume(&self, volume: u8) {
        self.shared.gain.store(volume, Ordering::Relaxed);
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn frame_bytes(format: ActiveFormat) -> usize {
    let per_sample = match format.width {
        PayloadWidth::Pcm16 => 2,
        PayloadWidth::Pcm8 => 1,
        // Rejected at start.
        PayloadWidth::Adpcm4 => 1,
    };
    usize::from(format.channels) * per_sample
}

/// Pick a device and build the output stream for it, dispatching on the
/// device sample format.
fn build_device_stream(
    shared: &Arc<Shared>,
    needle: Option<&str>,
    sample_rate: u32,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, needle)?;
    let supported = device::pick_output_config(&device, sample_rate)?;
    let config: cpal::StreamConfig = supported.clone().into();
    if config.sample_rate != sample_rate {
        tracing::warn!(
            payload_rate_hz = sample_rate,
            device_rate_hz = config.sample_rate,
            "device does not support the payload rate; playing at device rate"
        );
    }

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, shared),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, shared),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }?;
    stream.play().context("start output stream")?;
    Ok(stream)
}

/// Type-specialized stream builder. The callback drains the byte ring one
/// payload frame per output frame, converts to `f32`, applies the gain, maps
/// channels, and converts to the device sample format.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<Shared>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let shared_cb = shared.clone();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let gain = f32::from(shared_cb.gain.load(Ordering::Relaxed)) / 255.0;
            let mut state = shared_cb.ring.lock().unwrap();
            let format = state.format;

            let frames = data.len() / channels_out;
            let mut frame_out = [0f32; 2];
            for frame in 0..frames {
                let have = format
                    .is_some_and(|f| pop_frame(&mut state.buf, f, &mut frame_out));
                if !have {
                    // Underrun or stopped sink: the rest is silence.
                    for idx in (frame * channels_out)..data.len() {
                        data[idx] = <T as cpal::Sample>::from_sample::<f32>(0.0);
                    }
                    break;
                }
                for ch in 0..channels_out {
                    let sample = frame_out[ch.min(1)] * gain;
                    data[frame * channels_out + ch] =
                        <T as cpal::Sample>::from_sample::<f32>(sample);
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Pop one payload frame off the ring as up-to-stereo `f32`. Mono payloads
/// are duplicated to both outputs. Returns `false` when a whole frame is not
/// available.
fn pop_frame(buf: &mut VecDeque<u8>, format: ActiveFormat, out: &mut [f32; 2]) -> bool {
    let channels = usize::from(format.channels);
    if buf.len() < frame_bytes(format) {
        return false;
    }
    for ch in 0..channels.min(2) {
        out[ch] = match format.width {
            PayloadWidth::Pcm16 => {
                let lo = buf.pop_front().unwrap_or(0);
                let hi = buf.pop_front().unwrap_or(0);
                f32::from(i16::from_le_bytes([lo, hi])) / 32_768.0
            }
            PayloadWidth::Pcm8 | PayloadWidth::Adpcm4 => {
                // WAV 8-bit PCM is unsigned, midpoint 128.
                let b = buf.pop_front().unwrap_or(128);
                (f32::from(b) - 128.0) / 128.0
            }
        };
    }
    if channels == 1 {
        out[1] = out[0];
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_frame_decodes_pcm16_stereo() {
        let mut buf: VecDeque<u8> = VecDeque::new();
        buf.extend(i16::MAX.to_le_bytes());
        buf.extend(i16::MIN.to_le_bytes());
        let format = ActiveFormat {
            channels: 2,
            width: PayloadWidth::Pcm16,
        };
        let mut out = [0f32; 2];
        assert!(pop_frame(&mut buf, format, &mut out));
        assert!((out[0] - (32_767.0 / 32_768.0)).abs() < 1e-6);
        assert!((out[1] + 1.0).abs() < 1e-6);
        assert!(buf.is_empty());
    }

    #[test]
    fn pop_frame_duplicates_mono_pcm8() {
        let mut buf: VecDeque<u8> = VecDeque::from(vec![255u8]);
        let format = ActiveFormat {
            channels: 1,
            width: PayloadWidth::Pcm8,
        };
        let mut out = [0f32; 2];
        assert!(pop_frame(&mut buf, format, &mut out));
        assert_eq!(out[0], out[1]);
        assert!(out[0] > 0.99);
    }

    #[test]
    fn pop_frame_refuses_partial_frames() {
        let mut buf: VecDeque<u8> = VecDeque::from(vec![0u8; 3]);
        let format = ActiveFormat {
            channels: 2,
            width: PayloadWidth::Pcm16,
        };
        let mut out = [0f32; 2];
        assert!(!pop_frame(&mut buf, format, &mut out));
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn adpcm_start_is_rejected() {
        let backend = CpalBackend::new(CpalSinkConfig::default());
        let sink = backend.create_sink().unwrap();
        assert!(
            sink.start(44_100, ChannelMode::Stereo, PayloadWidth::Adpcm4)
                .is_err()
        );
    }

    #[test]
    fn poll_is_idle_while_stopped() {
        let backend = CpalBackend::new(CpalSinkConfig::default());
        let sink = backend.create_sink().unwrap();
        struct NeverAsked;
        impl RefillSource for NeverAsked {
            fn refill(&mut self, _want: usize) -> Option<&[u8]> {
                panic!("stopped sink must not pull refills");
            }
        }
        assert_eq!(sink.poll(&mut NeverAsked), PollOutcome::Idle);
    }

    #[test]
    fn backend_reports_hardware_shaped_limits() {
        let backend = CpalBackend::new(CpalSinkConfig::default());
        assert_eq!(backend.max_streams(), 4);
        assert_eq!(backend.max_request(), 0x10000);
        assert_eq!(backend.buffer_align(), 32);
    }
}
