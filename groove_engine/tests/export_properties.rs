use std::fs;
use std::path::PathBuf;

use groove_engine::{
    AudioExporter, EngineConfig, ExportBitDepth, ExportConfig, ExportFormat, PlaybackSession,
};
use groove_shared::{DrumPattern, Note, PitchClass, SynthSettings, Track, TrackKind, Waveform};

const SR: u32 = 44_100;

fn exporter(config: ExportConfig) -> AudioExporter {
    AudioExporter::new(config).unwrap()
}

fn saw_a4(duration_steps: f64) -> Track {
    let mut track = Track::new(TrackKind::Synth);
    track.volume = 1.0;
    track.synth_settings = Some(SynthSettings {
        waveform: Waveform::Sawtooth,
        filter_cutoff_hz: 12_000.0,
        filter_q: 0.707,
        ..SynthSettings::default()
    });
    track
        .notes
        .push(Note::new(PitchClass::A, 4, 0.0, duration_steps, 1.0).unwrap());
    track
}

fn four_on_the_floor() -> Track {
    let mut track = Track::new(TrackKind::Drum);
    let mut pattern = DrumPattern::new(16).unwrap();
    for i in (0..16).step_by(4) {
        pattern.steps[i].kick = true;
    }
    for i in (2..16).step_by(4) {
        pattern.steps[i].closed_hat = true;
    }
    track.drum_pattern = Some(pattern);
    track
}

fn energy(samples: &[f32]) -> f64 {
    samples.iter().map(|&s| (s as f64) * (s as f64)).sum()
}

fn frame(seconds: f64) -> usize {
    (seconds * SR as f64).round() as usize * 2
}

#[test]
fn single_note_exports_two_measures() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one_note.wav");

    let outcome = exporter(ExportConfig::default())
        .export(&[saw_a4(4.0)], 120.0, &path)
        .unwrap();
    assert_eq!(outcome.path, path);
    assert_eq!(outcome.format, ExportFormat::Wav);
    assert!(outcome.warning.is_none());
    assert_eq!(outcome.duration_seconds, 4.0);

    let reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, SR);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.duration(), 4 * SR);
    assert_eq!(fs::metadata(&path).unwrap().len(), 44 + 4 * SR as u64 * 4);
}

#[test]
fn identical_input_gives_identical_files() {
    let dir = tempfile::tempdir().unwrap();
    let tracks = vec![saw_a4(6.0), four_on_the_floor()];
    let exporter = exporter(ExportConfig {
        measures: 2,
        ..ExportConfig::default()
    });

    let first = dir.path().join("first.wav");
    let second = dir.path().join("second.wav");
    exporter.export(&tracks, 128.0, &first).unwrap();
    exporter.export(&tracks, 128.0, &second).unwrap();
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}

#[test]
fn sawtooth_note_sounds_at_pitch_for_its_duration() {
    let samples = exporter(ExportConfig::default())
        .render(&[saw_a4(4.0)], 120.0)
        .unwrap();

    assert!(energy(&samples[..frame(0.5)]) > 0.0);
    // Note lasts 0.5 s; the default release is 0.2 s
    assert!(energy(&samples[frame(0.7)..]) < 1e-9);

    let left: Vec<f32> = samples[frame(0.1)..frame(0.4)].iter().step_by(2).copied().collect();
    let rising = left.windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count();
    let hz = rising as f64 / 0.3;
    assert!((hz - 440.0).abs() < 440.0 * 0.03, "measured {hz} Hz");
}

#[test]
fn one_step_notes_are_audible_with_default_settings() {
    let mut track = Track::new(TrackKind::Synth);
    for i in 0..8 {
        track
            .notes
            .push(Note::new(PitchClass::A, 4, i as f64 * 2.0, 1.0, 1.0).unwrap());
    }
    let samples = exporter(ExportConfig::default()).render(&[track], 120.0).unwrap();

    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.01, "peak {peak}");
    for i in 0..8 {
        let onset = i as f64 * 0.25;
        assert!(energy(&samples[frame(onset)..frame(onset + 0.125)]) > 0.0);
    }
}

#[test]
fn twenty_four_bit_export_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deep.wav");
    exporter(ExportConfig {
        bit_depth: ExportBitDepth::Int24,
        ..ExportConfig::default()
    })
    .export(&[saw_a4(2.0)], 120.0, &path)
    .unwrap();

    let mut reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().bits_per_sample, 24);
    let peak = reader
        .samples::<i32>()
        .map(|s| s.unwrap().abs())
        .max()
        .unwrap();
    assert!(peak > 1 << 16 && peak < 1 << 23);
}

#[test]
fn missing_mp3_encoder_falls_back_to_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song.mp3");
    let outcome = exporter(ExportConfig {
        format: ExportFormat::Mp3,
        mp3_encoder: PathBuf::from("/nonexistent/groove-test-encoder"),
        ..ExportConfig::default()
    })
    .export(&[saw_a4(4.0)], 120.0, &path)
    .unwrap();

    assert_eq!(outcome.format, ExportFormat::Wav);
    assert_eq!(outcome.path, dir.path().join("song.wav"));
    assert!(outcome.warning.as_deref().unwrap_or_default().contains("encoder"));
    assert!(!path.exists());
    assert!(hound::WavReader::open(&outcome.path).is_ok());
}

#[test]
fn export_leaves_only_the_finished_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clean.wav");
    exporter(ExportConfig::default())
        .export(&[four_on_the_floor()], 140.0, &path)
        .unwrap();

    let entries: Vec<PathBuf> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries, vec![path]);
}

#[test]
fn live_and_offline_render_the_same_audio() {
    let tracks = vec![saw_a4(3.0), four_on_the_floor()];
    let offline = exporter(ExportConfig::default()).render(&tracks, 120.0).unwrap();

    let mut session = PlaybackSession::new(&EngineConfig::default()).unwrap();
    session.play();
    let mut live = Vec::new();
    let mut block = vec![0.0f32; 512 * 2];
    while live.len() < frame(1.0) {
        session.process_block(&mut block, &tracks);
        live.extend_from_slice(&block);
    }

    assert_eq!(&live[..frame(1.0)], &offline[..frame(1.0)]);
}
