//! Audio decoding and speaker output

mod control;
pub mod decode;
pub mod speaker;

pub use decode::{DecodedAudio, decode_audio, resample, samples_to_wav, sine_tone};
pub use speaker::Speaker;
