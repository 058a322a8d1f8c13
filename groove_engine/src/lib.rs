pub mod commands;
pub mod config;
pub mod delay;
pub mod drums;
pub mod engine; // AudioEngine lives here
pub mod error;
pub mod events;
pub mod export;
pub mod graph;
pub mod mixer;
pub mod nodes;
pub mod scheduler;
pub mod session;
pub mod synth;
pub mod timebase;

// Re-exports
pub use commands::EngineCommand;
pub use config::EngineConfig;
pub use drums::DrumMachine;
pub use engine::AudioEngine;
pub use error::EngineError;
pub use export::{AudioExporter, ExportBitDepth, ExportConfig, ExportFormat, ExportOutcome};
pub use scheduler::{PlayState, Scheduler};
pub use session::PlaybackSession;
pub use synth::{NoteRequest, Synthesizer};
