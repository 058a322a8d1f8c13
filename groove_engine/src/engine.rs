use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use arc_swap::ArcSwap;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{unbounded, Sender};
use groove_shared::error::validate_bpm;
use groove_shared::project::audible_tracks;
use groove_shared::{DrumKind, ModelError, PitchClass, Track};
use uuid::Uuid;

use crate::commands::EngineCommand;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::session::PlaybackSession;

/// Frames the callback can render without reallocating its scratch buffer.
const MAX_BLOCK_FRAMES: usize = 4096;

/// Live playback on the default output device.
///
/// The audio callback owns a [`PlaybackSession`]. The editor talks to it through
/// commands, publishes track snapshots, and polls transport state from atomics.
pub struct AudioEngine {
    _stream: cpal::Stream,
    command_tx: Sender<EngineCommand>,
    tracks: Arc<ArcSwap<Vec<Track>>>,
    is_playing: Arc<AtomicBool>,
    playhead_bits: Arc<AtomicU64>,
    bpm_bits: Arc<AtomicU64>,
    pub sample_rate: u32,
}

impl AudioEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| {
                EngineError::ResourceUnavailable(anyhow!("No output device available"))
            })?;
        let supported = device
            .default_output_config()
            .map_err(|e| EngineError::ResourceUnavailable(e.into()))?;

        let sample_rate = supported.sample_rate();
        let channels = supported.channels() as usize;
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.into();
        log::info!("[AudioEngine] Using config: {:?}", stream_config);

        let session_config = EngineConfig { sample_rate, ..config };
        let mut session = PlaybackSession::new(&session_config)?;

        let (command_tx, command_rx) = unbounded::<EngineCommand>();
        let tracks = Arc::new(ArcSwap::from_pointee(Vec::<Track>::new()));
        let is_playing = Arc::new(AtomicBool::new(false));
        let playhead_bits = Arc::new(AtomicU64::new(0.0f64.to_bits()));
        let bpm_bits = Arc::new(AtomicU64::new(session_config.bpm.to_bits()));

        let tracks_cb = tracks.clone();
        let play_flag = is_playing.clone();
        let playhead_cb = playhead_bits.clone();
        let bpm_cb = bpm_bits.clone();
        let mut scratch = vec![0.0f32; MAX_BLOCK_FRAMES * 2];

        let err_fn = |err: cpal::StreamError| {
            let s = err.to_string();
            if !s.contains("underrun") && !s.contains("overrun") {
                log::error!("[AudioEngine] Stream error: {}", s);
            }
        };

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let snapshot = tracks_cb.load();
                        let tracks = snapshot.as_slice();

                        while let Ok(cmd) = command_rx.try_recv() {
                            if let Err(e) = session.handle_command(cmd, tracks) {
                                log::warn!("[AudioEngine] Command rejected: {}", e);
                            }
                        }

                        let frames = data.len() / channels;
                        if scratch.len() < frames * 2 {
                            scratch.resize(frames * 2, 0.0);
                        }
                        let block = &mut scratch[..frames * 2];
                        session.process_block(block, tracks);

                        let frames_out = data.chunks_exact_mut(channels);
                        for (out, stereo) in frames_out.zip(block.chunks_exact(2)) {
                            match out {
                                [mono] => *mono = (stereo[0] + stereo[1]) * 0.5,
                                [left, right, rest @ ..] => {
                                    *left = stereo[0];
                                    *right = stereo[1];
                                    rest.fill(0.0);
                                }
                                [] => {}
                            }
                        }

                        let transport = session.transport();
                        play_flag.store(transport.is_playing, Ordering::Relaxed);
                        playhead_cb.store(transport.playhead_steps.to_bits(), Ordering::Relaxed);
                        bpm_cb.store(transport.bpm.to_bits(), Ordering::Relaxed);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| EngineError::ResourceUnavailable(e.into()))?,
            other => {
                return Err(EngineError::ResourceUnavailable(anyhow!(
                    "Unsupported sample format {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| EngineError::ResourceUnavailable(e.into()))?;
        log::info!("[AudioEngine] Started at {} Hz, {} channels", sample_rate, channels);

        Ok(Self {
            _stream: stream,
            command_tx,
            tracks,
            is_playing,
            playhead_bits,
            bpm_bits,
            sample_rate,
        })
    }

    fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.command_tx
            .send(command)
            .map_err(|_| EngineError::ResourceUnavailable(anyhow!("audio stream has shut down")))
    }

    /// Publish the editor's tracks. Solo is resolved here, so the callback only
    /// ever sees the tracks that should be heard.
    pub fn set_tracks(&self, tracks: &[Track]) {
        self.tracks.store(Arc::new(audible_tracks(tracks)));
    }

    pub fn play(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Play)
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Pause)
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Stop)
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<(), EngineError> {
        let bpm = validate_bpm(bpm)?;
        self.send(EngineCommand::SetBpm(bpm))
    }

    pub fn set_measures(&self, measures: u32) -> Result<(), EngineError> {
        if measures == 0 {
            return Err(EngineError::InvalidConfig("at least one measure is required".into()));
        }
        self.send(EngineCommand::SetMeasures(measures))
    }

    pub fn set_master_volume(&self, volume: f32) -> Result<(), EngineError> {
        self.send(EngineCommand::SetMasterVolume(volume))
    }

    /// Audition a note by name, e.g. `"F#"` in octave 3.
    pub fn preview_note(
        &self,
        track_id: Uuid,
        pitch: &str,
        octave: i32,
        velocity: f32,
        duration_seconds: f64,
    ) -> Result<(), EngineError> {
        let pitch: PitchClass = pitch.parse()?;
        if !(duration_seconds.is_finite() && duration_seconds > 0.0) {
            return Err(ModelError::InvalidDuration(duration_seconds).into());
        }
        self.send(EngineCommand::PreviewNote {
            track_id,
            pitch,
            octave,
            velocity,
            duration_seconds,
        })
    }

    pub fn stop_note(&self, track_id: Uuid, pitch: &str, octave: i32) -> Result<(), EngineError> {
        let pitch: PitchClass = pitch.parse()?;
        self.send(EngineCommand::StopNote { track_id, pitch, octave })
    }

    pub fn preview_drum(
        &self,
        track_id: Uuid,
        kind: DrumKind,
        velocity: f32,
    ) -> Result<(), EngineError> {
        self.send(EngineCommand::PreviewDrum { track_id, kind, velocity })
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Relaxed)
    }

    pub fn playhead_steps(&self) -> f64 {
        f64::from_bits(self.playhead_bits.load(Ordering::Relaxed))
    }

    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm_bits.load(Ordering::Relaxed))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
