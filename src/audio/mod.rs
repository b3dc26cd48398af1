//! Audio side of the pipeline: frames → rolling buffer → output device.
//!
//! # Pipeline
//!
//! ```text
//! Waveform → resample (if rate drifted) → slice_frames → AudioFrame (sync_channel)
//!          → feeder → PlaybackBuffer → Renderer → AudioOutput (cpal / WAV / events)
//! ```
//!
//! The [`SampleRateLatch`] carries the turn's sample rate from the synthesis
//! stage to the playback stage before the output is opened.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use voice_assistant::audio::{AudioOutput, CpalOutput, OutputParams, PlaybackBuffer};
//!
//! let shared = PlaybackBuffer::new(48_000);
//! let output = CpalOutput::new(None);
//! let stream = output
//!     .open(OutputParams { sample_rate: 24_000, block_size: 1024 }, shared.renderer())
//!     .unwrap();
//!
//! shared.push(&vec![0.0_f32; 24_000]); // 1 s of silence
//! shared.finish();
//! while !shared.is_drained() {
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! std::thread::sleep(stream.play_out());
//! stream.close();
//! ```

pub mod buffer;
pub mod frame;
pub mod latch;
pub mod output;
pub mod resample;

pub use buffer::{PlaybackBuffer, RenderStatus, Renderer, RollingBuffer};
pub use frame::{slice_frames, AudioFrame};
pub use latch::SampleRateLatch;
pub use output::{
    AudioOutput, CpalOutput, OutputEvent, OutputParams, OutputStream, PlaybackError,
    StreamingOutput, WavFileOutput,
};
pub use resample::{downmix_to_mono, resample, StreamResampler};
