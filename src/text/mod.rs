//! Reply text handling: sentence segmentation and the streaming consumer
//! that feeds the synthesis stage.
//!
//! ```text
//! ChatChunk stream ─▶ TextStreamConsumer ─▶ Segmenter ─▶ SentenceMessage (mpsc)
//! ```

pub mod cancel;
pub mod segment;
pub mod stream;

pub use cancel::{CancelHandle, CancelToken};
pub use segment::{segment, Segmenter, Sentence, DEFAULT_SEARCH_RADIUS};
pub use stream::{SentenceMessage, StreamReport, TextStreamConsumer};
