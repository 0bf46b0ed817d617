use std::path::{Path, PathBuf};

use hound::{WavSpec, WavWriter};
use serde::Serialize;

use crate::audio_clean::{Pipeline, StageKind};
use crate::audio_util::{clip_and_cast, Signal};
use crate::error::EnhanceError;

/// File stem of the exported unprocessed input
pub const ORIGINAL_STEM: &str = "original_audio";

/// A file written by [`export_stages`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedStage {
    /// `None` for the original input
    pub stage: Option<StageKind>,
    pub path: PathBuf,
}

/// Write `signal` as 16-bit PCM WAVE, saturating out-of-range samples.
pub fn write_wav(signal: &Signal, path: &Path) -> Result<(), EnhanceError> {
    let spec = WavSpec {
        channels: signal.channels(),
        sample_rate: signal.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for sample in clip_and_cast(signal.samples()) {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    log::info!(
        "Wrote {} ({} frames, {} Hz, {} ch)",
        path.display(),
        signal.frames(),
        signal.sample_rate(),
        signal.channels()
    );
    Ok(())
}

/// Read a 16-bit PCM WAVE file into the 16-bit sample domain.
pub fn read_wav(path: &Path) -> Result<Signal, EnhanceError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(EnhanceError::Decode(format!(
            "{} is not 16-bit PCM ({:?}, {} bits)",
            path.display(),
            spec.sample_format,
            spec.bits_per_sample
        )));
    }

    let samples = reader
        .into_samples::<i16>()
        .map(|s| s.map(f32::from))
        .collect::<Result<Vec<f32>, _>>()?;

    Signal::new(samples, spec.sample_rate, spec.channels)
}

/// Export the original and every completed stage of the last run into `dir`.
///
/// Works after a failed run too, writing whatever stages completed.
pub fn export_stages(pipeline: &Pipeline, dir: &Path) -> Result<Vec<ExportedStage>, EnhanceError> {
    std::fs::create_dir_all(dir)?;

    let mut exported = Vec::new();

    if let Some(original) = pipeline.original() {
        let path = dir.join(format!("{}.wav", ORIGINAL_STEM));
        write_wav(original, &path)?;
        exported.push(ExportedStage { stage: None, path });
    }

    for output in pipeline.outputs() {
        let path = dir.join(format!("{}.wav", output.stage.file_stem()));
        write_wav(&output.signal, &path)?;
        exported.push(ExportedStage {
            stage: Some(output.stage),
            path,
        });
    }

    log::info!("Exported {} stage files to {}", exported.len(), dir.display());
    Ok(exported)
}
