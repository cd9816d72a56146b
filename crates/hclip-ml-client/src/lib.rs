//! HTTP clients for the ML services used by the pipeline.
//!
//! - `transcription`: OpenAI-compatible speech-to-text server (word timestamps)
//! - `analysis`: Gemini key point extraction

pub mod analysis;
pub mod error;
mod retry;
pub mod transcription;

pub use analysis::{parse_key_points, AnalysisClient, AnalysisConfig, AnalysisRequest};
pub use error::{MlError, MlResult};
pub use transcription::{TranscriptionClient, TranscriptionConfig};
