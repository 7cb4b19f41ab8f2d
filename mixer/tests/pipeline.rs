use std::{
    f32::consts::TAU,
    fs,
    path::Path,
    sync::Arc,
};

use catalog::{StemCatalog, StemId};
use mixer::{generate, MixConfig, MixError, MixtureOrchestrator};
use process::BeatTracker;

const SAMPLE_RATE: u32 = 44_100;

fn write_wav(path: &Path, samples: &[f32]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &sample in samples {
        writer
            .write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .unwrap();
    }
    writer.finalize().unwrap();
}

/// Decaying hits at `bpm`, the first one at `offset` seconds. A zero
/// `pitch` gives noise-like clicks, otherwise a decaying tone per beat.
fn beats(bpm: f64, offset: f64, pitch: f32, seconds: f64) -> Vec<f32> {
    let len = (seconds * SAMPLE_RATE as f64) as usize;
    let hit_len = if pitch > 0.0 { 8_000 } else { 400 };
    let mut samples = vec![0.0f32; len];
    let mut t = offset;
    while t < seconds {
        let start = (t * SAMPLE_RATE as f64) as usize;
        for i in 0..hit_len.min(len - start) {
            let decay = (-(i as f32) / (hit_len as f32 / 5.0)).exp();
            let carrier = if pitch > 0.0 {
                (TAU * pitch * i as f32 / SAMPLE_RATE as f32).sin()
            } else if i % 3 == 0 {
                1.0
            } else {
                -0.5
            };
            samples[start + i] += 0.8 * decay * carrier;
        }
        t += 60.0 / bpm;
    }
    samples
}

fn add_stem(
    dir: &Path,
    name: &str,
    tempo: f64,
    sound_class: &str,
    instrument: Option<&str>,
    audio: &[f32],
) {
    write_wav(&dir.join(format!("{name}.wav")), audio);
    let document = serde_json::json!({
        "stem_name": name,
        "tempo": tempo,
        "sound_class": sound_class,
        "instrument_name": instrument,
        "key": null,
    });
    fs::write(dir.join(format!("{name}.json")), document.to_string()).unwrap();
}

fn base_config(data_home: &Path, output: &Path) -> MixConfig {
    MixConfig {
        data_home: data_home.to_path_buf(),
        output_dir: Some(output.to_path_buf()),
        sample_rate: SAMPLE_RATE,
        duration: 5.0,
        n_mixtures: 1,
        n_stems: 3,
        n_percussive: 2,
        n_harmonic: 1,
        seed: Some(2024),
        max_attempts: 20,
        ..Default::default()
    }
}

/// First sample above a small floor.
struct FirstLoud;

impl BeatTracker for FirstLoud {
    fn first_downbeat(&self, samples: &[f32], sample_rate: u32) -> Option<f64> {
        samples
            .iter()
            .position(|s| s.abs() > 0.05)
            .map(|i| i as f64 / sample_rate as f64)
    }
}

#[test]
fn three_compatible_stems_make_one_mixture() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    add_stem(data.path(), "drum_a", 78.0, "percussive", Some("drumA"), &beats(78.0, 0.2, 0.0, 8.0));
    add_stem(data.path(), "drum_b", 80.0, "percussive", Some("drumB"), &beats(80.0, 0.45, 0.0, 8.0));
    add_stem(data.path(), "bass", 79.0, "harmonic", Some("bass"), &beats(79.0, 0.3, 55.0, 8.0));

    let report = generate(base_config(data.path(), out.path())).unwrap();
    assert_eq!(report.mixtures.len(), 1);

    let mixture = &report.mixtures[0];
    let mut stems: Vec<&str> = mixture.stems.iter().map(StemId::as_str).collect();
    stems.sort();
    assert_eq!(stems, ["bass", "drum_a", "drum_b"]);

    let mut files: Vec<String> = fs::read_dir(&mixture.dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, ["mixture.wav", "stem1.wav", "stem2.wav", "stem3.wav"]);

    for file in &files {
        let reader = hound::WavReader::open(mixture.dir.join(file)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.duration(), 5 * SAMPLE_RATE);
    }
}

#[test]
fn undersized_bin_starves_after_the_retry_cap() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    add_stem(data.path(), "drum", 78.0, "percussive", Some("drum"), &beats(78.0, 0.2, 0.0, 6.0));
    add_stem(data.path(), "bass", 79.0, "harmonic", Some("bass"), &beats(79.0, 0.3, 55.0, 6.0));

    match generate(base_config(data.path(), out.path())) {
        Err(MixError::CorpusStarvation { attempts, reason }) => {
            assert_eq!(attempts, 20);
            assert!(reason.contains("1 percussive stems, 2 requested"), "{reason}");
        }
        other => panic!("expected corpus starvation, got {other:?}"),
    }
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn shared_instrument_is_never_mixed() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    add_stem(data.path(), "riff_a", 100.0, "harmonic", Some("guitar"), &beats(100.0, 0.1, 220.0, 6.0));
    add_stem(data.path(), "riff_b", 97.0, "harmonic", Some("guitar"), &beats(97.0, 0.1, 330.0, 6.0));

    let config = MixConfig {
        n_stems: 2,
        n_percussive: 0,
        n_harmonic: 2,
        ..base_config(data.path(), out.path())
    };
    match generate(config) {
        Err(MixError::CorpusStarvation { reason, .. }) => {
            assert!(reason.contains("guitar"), "{reason}")
        }
        other => panic!("expected corpus starvation, got {other:?}"),
    }
}

#[test]
fn same_seed_draws_the_same_mixtures() {
    let data = tempfile::tempdir().unwrap();
    for (i, tempo) in [98.0, 99.0, 100.0, 118.0, 119.0, 120.0].into_iter().enumerate() {
        let class = if i % 2 == 0 { "percussive" } else { "harmonic" };
        let pitch = if i % 2 == 0 { 0.0 } else { 110.0 };
        let name = format!("stem{i}");
        let instrument = format!("instrument{i}");
        add_stem(data.path(), &name, tempo, class, Some(&instrument), &beats(tempo, 0.1, pitch, 3.0));
    }
    let catalog = Arc::new(StemCatalog::load_dir(data.path()).unwrap());

    let run = || {
        let out = tempfile::tempdir().unwrap();
        let config = MixConfig {
            duration: 1.0,
            n_mixtures: 4,
            n_stems: 2,
            n_percussive: 1,
            n_harmonic: 1,
            seed: Some(9),
            ..base_config(data.path(), out.path())
        };
        let report = MixtureOrchestrator::new(catalog.clone(), config)
            .unwrap()
            .with_beat_tracker(Arc::new(FirstLoud))
            .run()
            .unwrap();
        report
            .mixtures
            .into_iter()
            .map(|mixture| mixture.stems)
            .collect::<Vec<_>>()
    };

    let first = run();
    assert_eq!(first.len(), 4);
    assert_eq!(first, run());
}
