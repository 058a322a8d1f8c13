use thiserror::Error;

/// Input rejected at the boundary between the editor layer and the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("unrecognized pitch name {0:?}")]
    InvalidPitch(String),
    #[error("note duration must be positive, got {0}")]
    InvalidDuration(f64),
    #[error("note start must be a non-negative step, got {0}")]
    InvalidStart(f64),
    #[error("bpm {0} outside {min}..={max}", min = crate::MIN_BPM, max = crate::MAX_BPM)]
    BpmOutOfRange(f64),
    #[error("drum pattern length must be positive")]
    EmptyPattern,
}

/// Validate a tempo value coming from the editor.
pub fn validate_bpm(bpm: f64) -> Result<f64, ModelError> {
    if bpm.is_finite() && (crate::MIN_BPM..=crate::MAX_BPM).contains(&bpm) {
        Ok(bpm)
    } else {
        Err(ModelError::BpmOutOfRange(bpm))
    }
}
