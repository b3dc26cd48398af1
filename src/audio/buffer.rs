//! Rolling playback buffer shared between the feeder and the device callback.
//!
//! [`RollingBuffer`] is a fixed-capacity FIFO of `f32` samples.  Unlike a
//! recording ring it never overwrites: a push accepts only as many samples as
//! there is room for, and the caller keeps the rest for later.
//!
//! [`PlaybackBuffer`] wraps it for cross-thread use.  The playback stage's
//! feeder loop pushes into it; the [`Renderer`] handed to the output backend
//! pops from it inside the real-time callback using `try_lock` only, so the
//! callback never waits on the feeder.
//!
//! ```text
//! audio channel ─▶ feeder ─push─▶ PlaybackBuffer ─pop─▶ Renderer ─▶ device
//!                  (may block)                          (never blocks)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

// ---------------------------------------------------------------------------
// RollingBuffer
// ---------------------------------------------------------------------------

/// A fixed-capacity FIFO of samples.
///
/// # Example
///
/// ```rust
/// use voice_assistant::audio::RollingBuffer;
///
/// let mut buf = RollingBuffer::new(4);
/// assert_eq!(buf.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]), 4); // 5.0 rejected
/// let mut out = [0.0; 2];
/// assert_eq!(buf.pop_into(&mut out), 2);
/// assert_eq!(out, [1.0, 2.0]);
/// ```
pub struct RollingBuffer {
    buf: Vec<f32>,
    capacity: usize,
    /// Index of the oldest stored sample.
    read_pos: usize,
    /// Number of valid samples currently stored (≤ `capacity`).
    len: usize,
}

impl RollingBuffer {
    /// Create a buffer holding up to `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: vec![0.0; capacity],
            capacity,
            read_pos: 0,
            len: 0,
        }
    }

    /// Append as much of `data` as fits and return how many were taken.
    pub fn push_slice(&mut self, data: &[f32]) -> usize {
        let take = data.len().min(self.free());
        let mut write_pos = (self.read_pos + self.len) % self.capacity;
        for &sample in &data[..take] {
            self.buf[write_pos] = sample;
            write_pos = (write_pos + 1) % self.capacity;
        }
        self.len += take;
        take
    }

    /// Move the oldest samples into `out` and return how many were written.
    /// The rest of `out` is left untouched.
    pub fn pop_into(&mut self, out: &mut [f32]) -> usize {
        let take = out.len().min(self.len);
        for slot in &mut out[..take] {
            *slot = self.buf[self.read_pos];
            self.read_pos = (self.read_pos + 1) % self.capacity;
        }
        self.len -= take;
        take
    }

    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Room left before a push starts rejecting samples.
    pub fn free(&self) -> usize {
        self.capacity - self.len
    }
}

// ---------------------------------------------------------------------------
// PlaybackBuffer
// ---------------------------------------------------------------------------

/// Shared state between the feeder and the [`Renderer`].
pub struct PlaybackBuffer {
    samples: Mutex<RollingBuffer>,
    /// No more samples will be pushed.
    finished: AtomicBool,
    /// Finished and every pushed sample has been rendered.
    drained: AtomicBool,
    underruns: AtomicUsize,
    rendered: AtomicU64,
}

impl PlaybackBuffer {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(RollingBuffer::new(capacity)),
            finished: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            underruns: AtomicUsize::new(0),
            rendered: AtomicU64::new(0),
        })
    }

    /// Push as much of `data` as fits; blocks only on the mutex.
    pub fn push(&self, data: &[f32]) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_slice(data)
    }

    /// Mark the end of input.  Pushes after this are still accepted but the
    /// renderer may already have reported drained.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    /// Device callbacks that could not be filled completely before the end.
    pub fn underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Total samples handed to the device so far.
    pub fn rendered(&self) -> u64 {
        self.rendered.load(Ordering::Relaxed)
    }

    pub fn buffered(&self) -> usize {
        self.samples.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn renderer(self: &Arc<Self>) -> Renderer {
        Renderer {
            shared: Arc::clone(self),
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Result of one [`Renderer::render`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStatus {
    /// Leading samples of the block that carry audio; the rest is silence.
    pub filled: usize,
    /// Input is finished and nothing is left to render.
    pub drained: bool,
}

/// Consumer side of a [`PlaybackBuffer`], owned by the output backend.
pub struct Renderer {
    shared: Arc<PlaybackBuffer>,
}

impl Renderer {
    /// Fill `out` with buffered samples, padding the tail with silence.
    ///
    /// Never blocks: if the feeder holds the lock the whole block is silence
    /// and counts as an underrun.
    pub fn render(&mut self, out: &mut [f32]) -> RenderStatus {
        let shared = &self.shared;

        // Read `finished` under the lock so every push it covers is visible.
        let (filled, finished_and_empty) = match shared.samples.try_lock() {
            Ok(mut buf) => {
                let finished = shared.is_finished();
                let filled = buf.pop_into(out);
                (filled, finished && buf.is_empty())
            }
            Err(TryLockError::Poisoned(p)) => {
                let mut buf = p.into_inner();
                let finished = shared.is_finished();
                let filled = buf.pop_into(out);
                (filled, finished && buf.is_empty())
            }
            Err(TryLockError::WouldBlock) => (0, false),
        };

        out[filled..].fill(0.0);
        shared.rendered.fetch_add(filled as u64, Ordering::Relaxed);

        if finished_and_empty {
            shared.drained.store(true, Ordering::Release);
        } else if filled < out.len() {
            shared.underruns.fetch_add(1, Ordering::Relaxed);
        }

        RenderStatus {
            filled,
            drained: finished_and_empty,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
