//! Audio output backends.
//!
//! An [`AudioOutput`] opens a mono stream at the turn's sample rate and
//! drives a [`Renderer`] until the returned [`OutputStream`] is closed:
//!
//! * [`CpalOutput`]: real output device; the renderer runs inside the cpal
//!   callback, resampled when the device only runs at its own mix rate.
//! * [`WavFileOutput`]: writes rendered audio to a 32-bit float WAV file.
//! * [`StreamingOutput`]: forwards rendered PCM as [`OutputEvent`]s over a
//!   channel, for remote clients.
//!
//! The two offline backends pull from the renderer on a plain thread and
//! write only the samples that carry audio, never underrun padding.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::audio::buffer::Renderer;
use crate::audio::resample::StreamResampler;

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors that prevent an output stream from starting.
#[derive(Debug, Clone, Error)]
pub enum PlaybackError {
    #[error("no output device found: {0}")]
    NoDevice(String),

    #[error("failed to open audio output: {0}")]
    DeviceOpen(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Parameters for opening an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputParams {
    pub sample_rate: u32,
    /// Preferred samples per device request.
    pub block_size: usize,
}

/// A running output stream.  Closing stops it and releases the device.
pub trait OutputStream {
    /// How long the output needs to play what it already holds once the
    /// renderer has drained.  Closing earlier cuts that audio off.
    fn play_out(&self) -> Duration;

    fn close(self: Box<Self>);
}

/// Factory for output streams, shared across turns.
pub trait AudioOutput: Send + Sync {
    fn open(
        &self,
        params: OutputParams,
        renderer: Renderer,
    ) -> Result<Box<dyn OutputStream>, PlaybackError>;
}

// Compile-time assertion: Box<dyn AudioOutput> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn AudioOutput>) {}
};

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

/// Plays through a cpal output device.
///
/// Mono configs are preferred; otherwise the mono signal is duplicated into
/// every channel.  A device with no f32 config at the turn's rate is opened
/// at its default rate and the audio is resampled in the callback.
pub struct CpalOutput {
    device_name: Option<String>,
}

impl CpalOutput {
    /// `device_name` selects an output device by exact name; `None` uses
    /// the host default.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    fn device(&self, host: &cpal::Host) -> Result<cpal::Device, PlaybackError> {
        match &self.device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| PlaybackError::DeviceOpen(e.to_string()))?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| PlaybackError::NoDevice(name.clone())),
            None => host
                .default_output_device()
                .ok_or_else(|| PlaybackError::NoDevice("default".into())),
        }
    }
}

/// A device stream shape: channel count and rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeviceConfig {
    channels: u16,
    sample_rate: u32,
}

/// One supported output config range as the device reports it.
#[derive(Debug, Clone, Copy)]
struct ConfigRange {
    format: SampleFormat,
    channels: u16,
    min_rate: u32,
    max_rate: u32,
}

/// Pick how to open the device for audio at `rate`.
///
/// In order: the fewest-channel f32 config that covers `rate`; the device's
/// default config if it is f32; the fewest-channel f32 config at the rate
/// nearest `rate`.  The last two resample.
fn choose_config(
    ranges: &[ConfigRange],
    default: Option<(SampleFormat, DeviceConfig)>,
    rate: u32,
) -> Result<DeviceConfig, PlaybackError> {
    let f32_ranges = || {
        ranges
            .iter()
            .filter(|r| r.format == SampleFormat::F32 && r.channels > 0)
    };

    if let Some(exact) = f32_ranges()
        .filter(|r| r.min_rate <= rate && r.max_rate >= rate)
        .min_by_key(|r| r.channels)
    {
        return Ok(DeviceConfig {
            channels: exact.channels,
            sample_rate: rate,
        });
    }

    if let Some((SampleFormat::F32, config)) = default {
        if config.channels > 0 && config.sample_rate > 0 {
            return Ok(config);
        }
    }

    f32_ranges()
        .min_by_key(|r| (r.channels, rate.clamp(r.min_rate, r.max_rate).abs_diff(rate)))
        .map(|r| DeviceConfig {
            channels: r.channels,
            sample_rate: rate.clamp(r.min_rate, r.max_rate),
        })
        .ok_or_else(|| PlaybackError::DeviceOpen("device has no f32 output config".into()))
}

fn device_configs(
    device: &cpal::Device,
) -> Result<(Vec<ConfigRange>, Option<(SampleFormat, DeviceConfig)>), PlaybackError> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| PlaybackError::DeviceOpen(e.to_string()))?
        .map(|c| ConfigRange {
            format: c.sample_format(),
            channels: c.channels(),
            min_rate: c.min_sample_rate().0,
            max_rate: c.max_sample_rate().0,
        })
        .collect();
    let default = device.default_output_config().ok().map(|c| {
        (
            c.sample_format(),
            DeviceConfig {
                channels: c.channels(),
                sample_rate: c.sample_rate().0,
            },
        )
    });
    Ok((ranges, default))
}

/// Device buffering seen from inside the callback.
#[derive(Debug, Default)]
struct PlayoutClock {
    max_frames: AtomicUsize,
    latency_us: AtomicU64,
}

impl PlayoutClock {
    fn observe(&self, frames: usize, latency: Option<Duration>) {
        self.max_frames.fetch_max(frames, Ordering::Relaxed);
        if let Some(latency) = latency {
            self.latency_us
                .fetch_max(latency.as_micros() as u64, Ordering::Relaxed);
        }
    }

    /// Two of the largest blocks seen (at least `requested`) plus the
    /// reported output latency.
    fn play_out(&self, requested: usize, rate: u32) -> Duration {
        let frames = self.max_frames.load(Ordering::Relaxed).max(requested) as u64;
        let blocks_us = 2 * frames * 1_000_000 / rate.max(1) as u64;
        Duration::from_micros(blocks_us + self.latency_us.load(Ordering::Relaxed))
    }
}

struct CpalStream {
    stream: cpal::Stream,
    clock: Arc<PlayoutClock>,
    /// Requested frames per callback, at the device rate.
    block: usize,
    device_rate: u32,
}

impl OutputStream for CpalStream {
    fn play_out(&self) -> Duration {
        self.clock.play_out(self.block, self.device_rate)
    }

    fn close(self: Box<Self>) {
        if let Err(e) = self.stream.pause() {
            log::debug!("audio: pause on close failed: {e}");
        }
    }
}

impl AudioOutput for CpalOutput {
    fn open(
        &self,
        params: OutputParams,
        renderer: Renderer,
    ) -> Result<Box<dyn OutputStream>, PlaybackError> {
        let host = cpal::default_host();
        let device = self.device(&host)?;
        let (ranges, default) = device_configs(&device)?;
        let chosen = choose_config(&ranges, default, params.sample_rate)?;
        if chosen.sample_rate != params.sample_rate {
            log::warn!(
                "audio: device does not play {} Hz, resampling to {} Hz",
                params.sample_rate,
                chosen.sample_rate
            );
        }
        let block = (params.block_size as u64 * chosen.sample_rate as u64
            / params.sample_rate.max(1) as u64)
            .max(1) as usize;

        let fixed = StreamConfig {
            channels: chosen.channels,
            sample_rate: SampleRate(chosen.sample_rate),
            buffer_size: BufferSize::Fixed(block as u32),
        };

        // The renderer moves into whichever callback is built, so it sits in
        // a shared slot the first attempt can hand back on failure.
        let slot = Arc::new(std::sync::Mutex::new(Some(renderer)));
        let clock = Arc::new(PlayoutClock::default());
        let callback = CallbackParts {
            slot,
            clock: Arc::clone(&clock),
            source_rate: params.sample_rate,
        };
        let stream = match build_stream(&device, &fixed, callback.clone()) {
            Ok(stream) => stream,
            Err(e) => {
                log::debug!("audio: fixed block size rejected ({e}), using device default");
                let fallback = StreamConfig {
                    buffer_size: BufferSize::Default,
                    ..fixed
                };
                build_stream(&device, &fallback, callback)
                    .map_err(|e| PlaybackError::DeviceOpen(e.to_string()))?
            }
        };

        stream
            .play()
            .map_err(|e| PlaybackError::DeviceOpen(e.to_string()))?;

        log::info!(
            "audio: playing on {:?} at {} Hz, {} channel(s)",
            device.name().unwrap_or_default(),
            chosen.sample_rate,
            chosen.channels
        );
        Ok(Box::new(CpalStream {
            stream,
            clock,
            block,
            device_rate: chosen.sample_rate,
        }))
    }
}

/// What each callback attempt shares with `open`.
#[derive(Clone)]
struct CallbackParts {
    slot: Arc<std::sync::Mutex<Option<Renderer>>>,
    clock: Arc<PlayoutClock>,
    source_rate: u32,
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    parts: CallbackParts,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let CallbackParts {
        slot,
        clock,
        source_rate,
    } = parts;
    let channels = (config.channels as usize).max(1);
    let device_rate = config.sample_rate.0;
    let mut resampler =
        (device_rate != source_rate).then(|| StreamResampler::new(source_rate, device_rate));
    let mut renderer: Option<Renderer> = None;
    let mut mono: Vec<f32> = Vec::new();
    let mut source: Vec<f32> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            let ts = info.timestamp();
            clock.observe(frames, ts.playback.duration_since(&ts.callback));

            if renderer.is_none() {
                // First callback only; the slot is uncontended by then.
                if let Ok(mut guard) = slot.try_lock() {
                    renderer = guard.take();
                }
            }
            let Some(r) = renderer.as_mut() else {
                data.fill(0.0);
                return;
            };

            if channels == 1 && resampler.is_none() {
                r.render(data);
                return;
            }
            if mono.len() < frames {
                mono.resize(frames, 0.0);
            }
            match resampler.as_mut() {
                Some(rs) => {
                    let need = rs.source_len(frames);
                    if source.len() < need {
                        source.resize(need, 0.0);
                    }
                    r.render(&mut source[..need]);
                    rs.process(&source[..need], &mut mono[..frames]);
                }
                None => {
                    r.render(&mut mono[..frames]);
                }
            }
            for (frame, &sample) in data.chunks_mut(channels).zip(&mono[..frames]) {
                frame.fill(sample);
            }
        },
        |err: cpal::StreamError| {
            log::error!("audio: output stream error: {err}");
        },
        None,
    )
}

// ---------------------------------------------------------------------------
// Offline driver
// ---------------------------------------------------------------------------

/// Destination for audio pulled by the offline driver.
trait OfflineSink: Send + 'static {
    fn write(&mut self, samples: &[f32]);
    fn finish(self);
}

/// Pulls blocks from the renderer on its own thread until drained or closed.
struct OfflineStream {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

const OFFLINE_IDLE: Duration = Duration::from_millis(5);

fn spawn_offline<S: OfflineSink>(
    block_size: usize,
    mut renderer: Renderer,
    mut sink: S,
) -> OfflineStream {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);

    let handle = std::thread::spawn(move || {
        let mut block = vec![0.0f32; block_size.max(1)];
        while !stop_flag.load(Ordering::Acquire) {
            let status = renderer.render(&mut block);
            if status.filled > 0 {
                sink.write(&block[..status.filled]);
            }
            if status.drained {
                break;
            }
            if status.filled == 0 {
                std::thread::sleep(OFFLINE_IDLE);
            }
        }
        sink.finish();
    });

    OfflineStream {
        stop,
        handle: Some(handle),
    }
}

impl OutputStream for OfflineStream {
    /// The driver writes straight to its sink, so nothing is left in flight.
    fn play_out(&self) -> Duration {
        Duration::ZERO
    }

    fn close(mut self: Box<Self>) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("audio: offline output thread panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// WavFileOutput
// ---------------------------------------------------------------------------

/// Writes each turn's audio to a WAV file, replacing any previous content.
pub struct WavFileOutput {
    path: PathBuf,
}

impl WavFileOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

struct WavSink {
    writer: hound::WavWriter<std::io::BufWriter<std::fs::File>>,
    failed: bool,
}

impl OfflineSink for WavSink {
    fn write(&mut self, samples: &[f32]) {
        if self.failed {
            return;
        }
        for &s in samples {
            if let Err(e) = self.writer.write_sample(s) {
                log::error!("audio: WAV write failed: {e}");
                self.failed = true;
                return;
            }
        }
    }

    fn finish(self) {
        if let Err(e) = self.writer.finalize() {
            log::error!("audio: WAV finalize failed: {e}");
        }
    }
}

impl AudioOutput for WavFileOutput {
    fn open(
        &self,
        params: OutputParams,
        renderer: Renderer,
    ) -> Result<Box<dyn OutputStream>, PlaybackError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: params.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer = hound::WavWriter::create(&self.path, spec).map_err(|e| {
            PlaybackError::DeviceOpen(format!("{}: {e}", self.path.display()))
        })?;

        log::info!("audio: writing {} Hz WAV to {}", params.sample_rate, self.path.display());
        let sink = WavSink {
            writer,
            failed: false,
        };
        Ok(Box::new(spawn_offline(params.block_size, renderer, sink)))
    }
}

// ---------------------------------------------------------------------------
// StreamingOutput
// ---------------------------------------------------------------------------

/// PCM events emitted by [`StreamingOutput`], one `Start`/`End` pair per turn.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    Start { sample_rate: u32 },
    Samples(Vec<f32>),
    End,
}

/// Forwards rendered audio over an unbounded channel.
///
/// If the receiver is dropped, audio is rendered and discarded so the
/// pipeline still drains.
pub struct StreamingOutput {
    tx: UnboundedSender<OutputEvent>,
}

impl StreamingOutput {
    pub fn new() -> (Self, UnboundedReceiver<OutputEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }
}

struct ChannelSink {
    tx: UnboundedSender<OutputEvent>,
}

impl OfflineSink for ChannelSink {
    fn write(&mut self, samples: &[f32]) {
        let _ = self.tx.send(OutputEvent::Samples(samples.to_vec()));
    }

    fn finish(self) {
        let _ = self.tx.send(OutputEvent::End);
    }
}

impl AudioOutput for StreamingOutput {
    fn open(
        &self,
        params: OutputParams,
        renderer: Renderer,
    ) -> Result<Box<dyn OutputStream>, PlaybackError> {
        let _ = self.tx.send(OutputEvent::Start {
            sample_rate: params.sample_rate,
        });
        let sink = ChannelSink {
            tx: self.tx.clone(),
        };
        Ok(Box::new(spawn_offline(params.block_size, renderer, sink)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
