use groove_shared::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed pitch, non-positive duration, bpm out of range.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ModelError),
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
    /// The audio device or stream could not be created or started.
    #[error("audio resource unavailable: {0:#}")]
    ResourceUnavailable(anyhow::Error),
    /// Recovered locally by falling back to WAV.
    #[error("encoder unavailable: {0}")]
    EncoderUnavailable(String),
    #[error("export failed: {0:#}")]
    ExportFailure(anyhow::Error),
}
