//! One-shot enhancement: decode, run the pipeline, write the result

use std::path::Path;

use serde::Serialize;

use super::export::{export_stages, write_wav, ExportedStage};
use super::import::decode_file;
use crate::audio_clean::{EnhanceOptions, Pipeline, StageKind};
use crate::audio_util::Signal;
use crate::error::EnhanceError;

/// Summary of one applied stage
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub stage: StageKind,
    /// Peak sample value on the 16-bit scale
    pub peak: f32,
}

/// Result of an enhancement operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhanceResult {
    pub output_path: String,
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub stages: Vec<StageSummary>,
    /// Per-stage files, when a stages directory was requested
    pub exported: Vec<ExportedStage>,
}

/// Enhance `source` into a 16-bit WAV at `output`.
///
/// With `stages_dir`, the original and every completed stage output are
/// exported there as well, including after a failed run.
pub fn enhance_file(
    source: &Path,
    output: &Path,
    options: &EnhanceOptions,
    stages_dir: Option<&Path>,
) -> Result<EnhanceResult, EnhanceError> {
    let decoded = decode_file(source, options.downmix_to_mono)?;
    let mut pipeline = Pipeline::new();
    enhance_signal(&mut pipeline, decoded.signal, output, options, stages_dir)
}

/// Run `pipeline` over an already decoded signal and write the result.
pub fn enhance_signal(
    pipeline: &mut Pipeline,
    signal: Signal,
    output: &Path,
    options: &EnhanceOptions,
    stages_dir: Option<&Path>,
) -> Result<EnhanceResult, EnhanceError> {
    let run = pipeline.run(signal, options).map(|_| ());

    let exported = match stages_dir {
        Some(dir) => export_stages(pipeline, dir)?,
        None => Vec::new(),
    };
    run?;

    let final_signal = pipeline
        .final_output()
        .ok_or_else(|| EnhanceError::InvalidSignal("pipeline produced no output".into()))?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_wav(final_signal, output)?;

    let stages = pipeline
        .outputs()
        .iter()
        .map(|o| StageSummary {
            stage: o.stage,
            peak: o.signal.peak(),
        })
        .collect();

    Ok(EnhanceResult {
        output_path: output.to_string_lossy().to_string(),
        duration: final_signal.duration_secs(),
        sample_rate: final_signal.sample_rate(),
        channels: final_signal.channels(),
        stages,
        exported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::export::read_wav;

    fn tone() -> Signal {
        let samples: Vec<f32> = (0..4410)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
            .collect();
        Signal::from_normalized(&samples, 44100, 1).unwrap()
    }

    #[test]
    fn test_enhance_file_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.wav");
        let output = dir.path().join("out").join("enhanced.wav");
        write_wav(&tone(), &source).unwrap();

        let options = EnhanceOptions {
            compression_enabled: true,
            ..EnhanceOptions::default()
        };
        let result = enhance_file(&source, &output, &options, None).unwrap();

        assert_eq!(result.sample_rate, 44100);
        assert!((result.duration - 0.1).abs() < 1e-9);
        let kinds: Vec<StageKind> = result.stages.iter().map(|s| s.stage).collect();
        assert_eq!(kinds, vec![StageKind::Equalization, StageKind::Compression]);
        assert!(result.exported.is_empty());
        assert_eq!(read_wav(&output).unwrap().frames(), 4410);
    }

    #[test]
    fn test_failed_run_still_exports_completed_stages() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("enhanced.wav");
        let stages_dir = dir.path().join("stages");
        let options = EnhanceOptions {
            noise_reduction_enabled: true,
            compression_enabled: true,
            compression_ratio: 0.25,
            ..EnhanceOptions::default()
        };

        let mut pipeline = Pipeline::new();
        let err = enhance_signal(&mut pipeline, tone(), &output, &options, Some(&stages_dir))
            .unwrap_err();

        assert!(matches!(err, EnhanceError::Stage(ref f) if f.stage == StageKind::Compression));
        assert!(err.is_invalid_parameter());
        assert!(!output.exists());
        assert!(stages_dir.join("original_audio.wav").exists());
        assert!(stages_dir.join("noisereduction_audio.wav").exists());
        assert!(stages_dir.join("equalized_audio.wav").exists());
        assert!(!stages_dir.join("compressed_audio.wav").exists());
    }
}
