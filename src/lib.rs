//! Beacon Reader - Read-aloud pipeline for long-form text
//!
//! Turns articles into speech through one of three backends:
//! - System speech (an espeak-compatible command that speaks whole articles)
//! - A local neural engine reached over HTTP
//! - A cloud speech API (`OpenAI`, ElevenLabs)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 ReaderHandle                         │
//! │   submit  │  stop  │  set_rate  │  pause_or_resume  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ commands          ▲ state / progress
//! ┌────────────────────▼───────────────────┴────────────┐
//! │                 Reader (controller)                  │
//! │   article queue  │  backend  │  run cancellation     │
//! └────────────────────┬────────────────────────────────┘
//!                      │ per article
//! ┌────────────────────▼────────────────────────────────┐
//! │   Chunker  →  Fetch (N in flight, reordered)  →      │
//! │   Playback (one clip at a time on the AudioSink)     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod reader;
pub mod tts;

pub use audio::Speaker;
pub use config::{CloudProvider, Config};
pub use error::{Error, Result};
pub use reader::{PipelineState, Reader, ReaderHandle, ReaderOptions};
pub use tts::{
    AudioSink, Backend, BackendKind, Chunk, CloudEngine, CommandSpeech, FetchStage, LocalEngine,
    SynthesisBackend, SynthesisResult, SystemSpeech, VoiceParams, chunk_text,
};
