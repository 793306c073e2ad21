//! Text-to-speech pipeline stages
//!
//! Chunking, synthesis backends, bounded-concurrency fetch and ordered
//! playback. The [`crate::reader`] controller wires them together.

pub mod backend;
pub mod chunking;
pub mod cloud;
pub mod fetch;
pub mod local;
pub mod playback;
pub mod system;

pub use backend::{Backend, BackendKind, SynthesisBackend, VoiceParams, clamp_rate};
pub use chunking::{Chunk, chunk_text};
pub use cloud::CloudEngine;
pub use fetch::{FetchStage, ReorderBuffer, SynthesisResult};
pub use local::LocalEngine;
pub use playback::{AudioSink, PlaybackReport, play_in_order};
pub use system::{CommandSpeech, SystemSpeech};
