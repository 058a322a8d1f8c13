//! Offline export.
//! Renders the tracks to a PCM buffer with the same voices and timing the live
//! engine uses, then encodes it as WAV or MP3.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use groove_shared::error::validate_bpm;
use groove_shared::project::{audible_tracks, max_steps};
use groove_shared::{Track, CHANNEL_COUNT, STEPS_PER_MEASURE};
use rayon::prelude::*;
use tempfile::NamedTempFile;

use crate::drums::DrumMachine;
use crate::error::EngineError;
use crate::events::{content_end, derive_events};
use crate::graph::AudioGraph;
use crate::session::Dispatch;
use crate::synth::Synthesizer;
use crate::timebase::{seconds_to_frames, Timeline};

/// Frames rendered per graph pass.
const RENDER_BLOCK_FRAMES: usize = 1024;

/// Size of the canonical PCM header this module writes.
pub const WAV_HEADER_LEN: usize = 44;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportBitDepth {
    Int16,
    Int24,
}

impl ExportBitDepth {
    pub fn bits(self) -> u16 {
        match self {
            ExportBitDepth::Int16 => 16,
            ExportBitDepth::Int24 => 24,
        }
    }

    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Wav,
    Mp3,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Wav => "wav",
            ExportFormat::Mp3 => "mp3",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub sample_rate: u32,
    pub bit_depth: ExportBitDepth,
    pub format: ExportFormat,
    /// Upper bound on the exported length.
    pub measures: u32,
    pub dither: bool, // TPDF dither when quantizing
    /// Encoder executable, looked up on PATH when not absolute.
    pub mp3_encoder: PathBuf,
    pub mp3_bitrate_kbps: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            bit_depth: ExportBitDepth::Int16,
            format: ExportFormat::Wav,
            measures: 8,
            dither: true,
            mp3_encoder: PathBuf::from("lame"),
            mp3_bitrate_kbps: 128,
        }
    }
}

/// What an export actually produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub format: ExportFormat,
    /// Set when the requested format could not be produced and a fallback was written.
    pub warning: Option<String>,
    pub duration_seconds: f64,
    pub frames: usize,
}

pub struct AudioExporter {
    config: ExportConfig,
    drums: Arc<DrumMachine>,
}

impl AudioExporter {
    pub fn new(config: ExportConfig) -> Result<Self, EngineError> {
        if config.sample_rate == 0 {
            return Err(EngineError::InvalidConfig("sample rate must be positive".into()));
        }
        if config.measures == 0 {
            return Err(EngineError::InvalidConfig("at least one measure is required".into()));
        }
        if config.mp3_bitrate_kbps == 0 {
            return Err(EngineError::InvalidConfig("mp3 bitrate must be positive".into()));
        }
        let drums = Arc::new(DrumMachine::new(config.sample_rate));
        Ok(Self { config, drums })
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Length of the export in measures: one measure past the last note end,
    /// the full bound when a drum pattern loops, a single measure when silent.
    pub fn render_measures(&self, tracks: &[Track]) -> u32 {
        let bound = self.config.measures;
        let mut last_end = 0.0f64;
        for track in tracks.iter().filter(|t| !t.muted) {
            match content_end(track) {
                None => return bound,
                Some(end) => last_end = last_end.max(end),
            }
        }
        if last_end <= 0.0 {
            return 1;
        }
        let measures = (last_end / STEPS_PER_MEASURE as f64).ceil() as u32;
        let measures = measures.saturating_add(1);
        measures.min(bound)
    }

    /// Render the audible tracks to interleaved stereo at the export sample rate.
    pub fn render(&self, tracks: &[Track], bpm: f64) -> Result<Vec<f32>, EngineError> {
        let bpm = validate_bpm(bpm)?;
        let tracks = audible_tracks(tracks);

        let measures = self.render_measures(&tracks);
        let steps = max_steps(measures);
        let timeline = Timeline::new(bpm, 0.0);
        let total_frames =
            seconds_to_frames(timeline.time_of(steps), self.config.sample_rate) as usize;
        log::debug!(
            "[Export] Rendering {} tracks, {} measures ({} frames @ {} Hz)",
            tracks.len(),
            measures,
            total_frames,
            self.config.sample_rate
        );

        let stems: Vec<Vec<f32>> = tracks
            .par_iter()
            .filter(|t| !t.muted)
            .map(|track| self.render_track(track, &timeline, steps, total_frames))
            .collect();

        let mut mix = vec![0.0f32; total_frames * CHANNEL_COUNT];
        for stem in &stems {
            for (out, sample) in mix.iter_mut().zip(stem) {
                *out += sample;
            }
        }
        Ok(mix)
    }

    fn render_track(
        &self,
        track: &Track,
        timeline: &Timeline,
        steps: f64,
        total_frames: usize,
    ) -> Vec<f32> {
        let mut graph = AudioGraph::new(self.config.sample_rate);
        graph.sync_tracks(std::slice::from_ref(track));

        let synth = Synthesizer::new();
        let mut sink = Dispatch {
            graph: &mut graph,
            synth: &synth,
            drums: &self.drums,
        };
        derive_events(track, 0.0..steps, timeline, &mut sink);

        let mut out = vec![0.0f32; total_frames * CHANNEL_COUNT];
        for block in out.chunks_mut(RENDER_BLOCK_FRAMES * CHANNEL_COUNT) {
            graph.render(block);
        }
        out
    }

    /// Render and write to `path`. The file only appears once it is complete.
    ///
    /// MP3 needs the external encoder; when it is missing a WAV is written next
    /// to the requested path instead and the outcome carries a warning.
    pub fn export(
        &self,
        tracks: &[Track],
        bpm: f64,
        path: &Path,
    ) -> Result<ExportOutcome, EngineError> {
        let samples = self.render(tracks, bpm)?;
        let frames = samples.len() / CHANNEL_COUNT;
        let duration_seconds = frames as f64 / self.config.sample_rate as f64;
        let outcome = |path: PathBuf, format, warning| ExportOutcome {
            path,
            format,
            warning,
            duration_seconds,
            frames,
        };

        match self.config.format {
            ExportFormat::Wav => {
                self.write_wav_file(&samples, path)?;
                log::info!("[Export] Wrote {} ({:.2}s)", path.display(), duration_seconds);
                Ok(outcome(path.to_path_buf(), ExportFormat::Wav, None))
            }
            ExportFormat::Mp3 => match self.write_mp3_file(&samples, path) {
                Ok(()) => {
                    log::info!("[Export] Wrote {} ({:.2}s)", path.display(), duration_seconds);
                    Ok(outcome(path.to_path_buf(), ExportFormat::Mp3, None))
                }
                Err(EngineError::EncoderUnavailable(reason)) => {
                    let fallback = path.with_extension(ExportFormat::Wav.extension());
                    let warning = format!(
                        "MP3 encoder unavailable ({}); saved WAV to {}",
                        reason,
                        fallback.display()
                    );
                    log::warn!("[Export] {}", warning);
                    self.write_wav_file(&samples, &fallback)?;
                    Ok(outcome(fallback, ExportFormat::Wav, Some(warning)))
                }
                Err(e) => Err(e),
            },
        }
    }

    fn write_wav_file(&self, samples: &[f32], path: &Path) -> Result<(), EngineError> {
        let config = &self.config;
        persist_with(path, |w| {
            write_wav(w, samples, config.sample_rate, config.bit_depth, config.dither)
        })
        .map_err(EngineError::ExportFailure)
    }

    fn write_mp3_file(&self, samples: &[f32], path: &Path) -> Result<(), EngineError> {
        let temp_dir = tempfile::tempdir()
            .context("failed to create temporary export directory")
            .map_err(EngineError::ExportFailure)?;
        let temp_wav = temp_dir.path().join("groove_export.wav");
        // The encoder reads 16-bit input everywhere
        let sample_rate = self.config.sample_rate;
        let wav_bytes = encode_wav(samples, sample_rate, ExportBitDepth::Int16, self.config.dither)
            .context("encoding intermediate wav")
            .map_err(EngineError::ExportFailure)?;
        fs::write(&temp_wav, wav_bytes)
            .with_context(|| format!("writing {}", temp_wav.display()))
            .map_err(EngineError::ExportFailure)?;

        let target = temp_file_beside(path).map_err(EngineError::ExportFailure)?;
        let encoder = &self.config.mp3_encoder;
        let status = Command::new(encoder)
            .arg("--silent")
            .arg("-b")
            .arg(self.config.mp3_bitrate_kbps.to_string())
            .arg(&temp_wav)
            .arg(target.path())
            .status();

        match status {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(EngineError::EncoderUnavailable(format!("{} not found", encoder.display())))
            }
            Err(e) => Err(EngineError::ExportFailure(
                anyhow!(e).context(format!("failed to spawn {}", encoder.display())),
            )),
            Ok(status) if !status.success() => Err(EngineError::ExportFailure(anyhow!(
                "{} exited with status {} while exporting mp3",
                encoder.display(),
                status
            ))),
            Ok(_) => {
                target
                    .persist(path)
                    .with_context(|| format!("failed to move mp3 into {}", path.display()))
                    .map_err(EngineError::ExportFailure)?;
                Ok(())
            }
        }
    }
}

fn temp_file_beside(path: &Path) -> anyhow::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temporary file in {}", dir.display()))
}

/// Write through a temporary file in the target directory and move it into
/// place once `write` succeeds.
fn persist_with<F>(path: &Path, write: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut BufWriter<&mut fs::File>) -> io::Result<()>,
{
    let mut temp = temp_file_beside(path)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        write(&mut writer).with_context(|| format!("failed to write {}", path.display()))?;
        writer.flush()?;
    }
    temp.persist(path)
        .with_context(|| format!("failed to move export into {}", path.display()))?;
    Ok(())
}

/// Encode interleaved stereo samples as a complete WAV file in memory.
pub fn encode_wav(
    samples: &[f32],
    sample_rate: u32,
    bit_depth: ExportBitDepth,
    dither: bool,
) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(WAV_HEADER_LEN + samples.len() * bit_depth.bytes());
    write_wav(&mut bytes, samples, sample_rate, bit_depth, dither)?;
    Ok(bytes)
}

/// Canonical 44-byte RIFF/WAVE header followed by little-endian integer PCM.
pub fn write_wav<W: Write>(
    writer: &mut W,
    samples: &[f32], // Interleaved stereo
    sample_rate: u32,
    bit_depth: ExportBitDepth,
    dither: bool,
) -> io::Result<()> {
    let channels = CHANNEL_COUNT as u16;
    let bytes_per_sample = bit_depth.bytes();
    let data_len = u32::try_from(samples.len() * bytes_per_sample)
        .ok()
        .filter(|len| *len <= u32::MAX - 36)
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "audio too long for a WAV file")
        })?;
    let block_align = channels * bytes_per_sample as u16;

    writer.write_all(b"RIFF")?;
    writer.write_all(&(36 + data_len).to_le_bytes())?;
    writer.write_all(b"WAVE")?;
    writer.write_all(b"fmt ")?;
    writer.write_all(&16u32.to_le_bytes())?;
    writer.write_all(&1u16.to_le_bytes())?; // PCM
    writer.write_all(&channels.to_le_bytes())?;
    writer.write_all(&sample_rate.to_le_bytes())?;
    writer.write_all(&(sample_rate * block_align as u32).to_le_bytes())?;
    writer.write_all(&block_align.to_le_bytes())?;
    writer.write_all(&bit_depth.bits().to_le_bytes())?;
    writer.write_all(b"data")?;
    writer.write_all(&data_len.to_le_bytes())?;

    let bits = bit_depth.bits() as u32;
    let scale = (1i64 << (bits - 1)) as f32 - 1.0;
    // Two independent generators keep the channels' dither decorrelated
    let mut dither_left: u32 = 0xDEADBEEF;
    let mut dither_right: u32 = 0xCAFEBABE;

    for (i, &sample) in samples.iter().enumerate() {
        let mut s = if sample.is_finite() { sample } else { 0.0 };
        if dither {
            let state = if i % 2 == 0 { &mut dither_left } else { &mut dither_right };
            s += tpdf_dither(state, bits);
        }
        let quantized = (s * scale).round().clamp(-(scale + 1.0), scale) as i32;
        match bit_depth {
            ExportBitDepth::Int16 => writer.write_all(&(quantized as i16).to_le_bytes())?,
            ExportBitDepth::Int24 => writer.write_all(&quantized.to_le_bytes()[..3])?,
        }
    }
    Ok(())
}

/// Triangular dither of about one LSB at the target bit depth.
#[inline]
fn tpdf_dither(state: &mut u32, bits: u32) -> f32 {
    let r1 = lcg_next(state);
    let r2 = lcg_next(state);
    let lsb = 1.0 / (1u64 << (bits - 1)) as f32;
    (r1 - r2) * lsb * 0.5
}

#[inline]
fn lcg_next(state: &mut u32) -> f32 {
    *state = state.wrapping_mul(1103515245).wrapping_add(12345);
    (*state as f32) / (u32::MAX as f32) * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use groove_shared::{DrumPattern, Note, PitchClass, TrackKind};

    fn exporter(measures: u32) -> AudioExporter {
        AudioExporter::new(ExportConfig {
            sample_rate: 8_000,
            measures,
            ..ExportConfig::default()
        })
        .unwrap()
    }

    fn note_track(start: f64, duration: f64) -> Track {
        let mut track = Track::new(TrackKind::Synth);
        track.notes.push(Note::new(PitchClass::C, 4, start, duration, 1.0).unwrap());
        track
    }

    #[test]
    fn header_is_canonical_pcm() {
        let bytes = encode_wav(&[0.0; 8], 44_100, ExportBitDepth::Int16, false).unwrap();
        assert_eq!(bytes.len(), WAV_HEADER_LEN + 16);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 36 + 16);
        assert_eq!(&bytes[8..16], b"WAVEfmt ");
        assert_eq!(u16::from_le_bytes([bytes[20], bytes[21]]), 1);
        assert_eq!(u16::from_le_bytes([bytes[22], bytes[23]]), 2);
        assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 44_100);
        assert_eq!(u32::from_le_bytes(bytes[28..32].try_into().unwrap()), 44_100 * 4);
        assert_eq!(u16::from_le_bytes([bytes[32], bytes[33]]), 4);
        assert_eq!(u16::from_le_bytes([bytes[34], bytes[35]]), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 16);
    }

    #[test]
    fn samples_are_packed_little_endian() {
        let bytes =
            encode_wav(&[1.0, -1.0, 0.5, -2.0], 48_000, ExportBitDepth::Int24, false).unwrap();
        assert_eq!(bytes.len(), WAV_HEADER_LEN + 4 * 3);
        assert_eq!(u16::from_le_bytes([bytes[34], bytes[35]]), 24);
        let data = &bytes[WAV_HEADER_LEN..];
        assert_eq!(&data[0..3], &[0xFF, 0xFF, 0x7F]);
        assert_eq!(&data[3..6], &[0x01, 0x00, 0x80]);
        assert_eq!(&data[6..9], &[0x00, 0x00, 0x40]);
        // Out-of-range input clips to full scale
        assert_eq!(&data[9..12], &[0x00, 0x00, 0x80]);

        let bytes = encode_wav(&[1.0, -2.0], 48_000, ExportBitDepth::Int16, false).unwrap();
        assert_eq!(&bytes[WAV_HEADER_LEN..], &[0xFF, 0x7F, 0x00, 0x80]);
    }

    #[test]
    fn dither_stays_within_an_lsb() {
        let bytes = encode_wav(&[0.0; 512], 44_100, ExportBitDepth::Int16, true).unwrap();
        let data = &bytes[WAV_HEADER_LEN..];
        for pair in data.chunks_exact(2) {
            assert!(i16::from_le_bytes([pair[0], pair[1]]).abs() <= 1);
        }
    }

    #[test]
    fn length_follows_last_note_end() {
        let exporter = exporter(8);
        assert_eq!(exporter.render_measures(&[note_track(0.0, 4.0)]), 2);
        assert_eq!(exporter.render_measures(&[note_track(12.0, 4.0)]), 2);
        assert_eq!(exporter.render_measures(&[note_track(12.0, 5.0)]), 3);
        assert_eq!(exporter.render_measures(&[note_track(100.0, 60.0)]), 8);
        assert_eq!(exporter.render_measures(&[]), 1);
    }

    #[test]
    fn drum_pattern_fills_the_bound() {
        let mut drums = Track::new(TrackKind::Drum);
        let mut pattern = DrumPattern::new(16).unwrap();
        pattern.steps[0].kick = true;
        drums.drum_pattern = Some(pattern);

        let exporter = exporter(4);
        assert_eq!(exporter.render_measures(&[note_track(0.0, 1.0), drums.clone()]), 4);

        drums.muted = true;
        assert_eq!(exporter.render_measures(&[note_track(0.0, 1.0), drums]), 2);
    }

    #[test]
    fn rendered_length_matches_measures() {
        let exporter = exporter(8);
        let samples = exporter.render(&[note_track(0.0, 4.0)], 120.0).unwrap();
        // 2 measures at 120 bpm = 4 s
        assert_eq!(samples.len(), 4 * 8_000 * 2);
        assert!(samples.iter().any(|s| s.abs() > 0.0));
    }

    #[test]
    fn soloed_track_excludes_the_rest() {
        let exporter = exporter(8);
        let quiet = note_track(0.0, 4.0);
        let mut loud = note_track(0.0, 4.0);
        loud.soloed = true;
        loud.volume = 0.0;

        let samples = exporter.render(&[quiet, loud], 120.0).unwrap();
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn invalid_bpm_is_rejected_before_rendering() {
        let result = exporter(8).render(&[note_track(0.0, 4.0)], 5_000.0);
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }
}
