//! Enhancement pipeline orchestration
//!
//! Runs the enabled stages in canonical order, threading each stage's output
//! into the next and keeping every intermediate result for inspection/export.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::compressor::{compress, CompressorSettings};
use super::filters::{BandLimiter, Equalizer};
use super::spectral::{suppress, NoiseEstimator, SpectralGate};
use crate::audio_util::{FrameFormat, Signal};
use crate::error::EnhanceError;

/// Enhancement options, one field per user-facing control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnhanceOptions {
    /// Enable the fixed 500 Hz - 8 kHz band-limiting filters
    pub noise_reduction_enabled: bool,

    /// Enable spectral de-reverberation
    pub de_reverb_enabled: bool,
    /// De-reverb intensity (0-1)
    pub de_reverb_intensity: f32,

    /// Equalization low cutoff (Hz)
    pub eq_low_cutoff: f32,
    /// Equalization high cutoff (Hz)
    pub eq_high_cutoff: f32,

    /// Enable dynamic range compression
    pub compression_enabled: bool,
    /// Compression threshold (-50 to 0 dB)
    pub compression_threshold_db: f32,
    /// Compression ratio (1-10)
    pub compression_ratio: f32,

    /// Mix decoded audio down to a single channel before processing
    pub downmix_to_mono: bool,
}

impl Default for EnhanceOptions {
    fn default() -> Self {
        Self {
            noise_reduction_enabled: false,
            de_reverb_enabled: false,
            de_reverb_intensity: 0.2,
            eq_low_cutoff: Equalizer::DEFAULT_LOW_HZ as f32,
            eq_high_cutoff: Equalizer::DEFAULT_HIGH_HZ as f32,
            compression_enabled: false,
            compression_threshold_db: -25.0,
            compression_ratio: 3.5,
            downmix_to_mono: true,
        }
    }
}

/// Pipeline stages in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageKind {
    NoiseReduction,
    DeReverb,
    Equalization,
    Compression,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::NoiseReduction,
        StageKind::DeReverb,
        StageKind::Equalization,
        StageKind::Compression,
    ];

    /// File stem used when a stage output is exported
    pub fn file_stem(&self) -> &'static str {
        match self {
            StageKind::NoiseReduction => "noisereduction_audio",
            StageKind::DeReverb => "de_reverb_audio",
            StageKind::Equalization => "equalized_audio",
            StageKind::Compression => "compressed_audio",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::NoiseReduction => "noise reduction",
            StageKind::DeReverb => "de-reverberation",
            StageKind::Equalization => "equalization",
            StageKind::Compression => "compression",
        };
        f.write_str(name)
    }
}

/// Parameters of one stage invocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageParams {
    NoiseReduction,
    DeReverb { intensity: f32 },
    Equalization { low_hz: f32, high_hz: f32 },
    Compression(CompressorSettings),
}

impl StageParams {
    pub fn kind(&self) -> StageKind {
        match self {
            StageParams::NoiseReduction => StageKind::NoiseReduction,
            StageParams::DeReverb { .. } => StageKind::DeReverb,
            StageParams::Equalization { .. } => StageKind::Equalization,
            StageParams::Compression(_) => StageKind::Compression,
        }
    }
}

/// One entry of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagePlan {
    pub params: StageParams,
    pub enabled: bool,
}

impl StagePlan {
    pub fn kind(&self) -> StageKind {
        self.params.kind()
    }
}

impl EnhanceOptions {
    /// Ordered stage list for one run. Equalization is always enabled.
    pub fn plan(&self) -> Vec<StagePlan> {
        vec![
            StagePlan {
                params: StageParams::NoiseReduction,
                enabled: self.noise_reduction_enabled,
            },
            StagePlan {
                params: StageParams::DeReverb {
                    intensity: self.de_reverb_intensity,
                },
                enabled: self.de_reverb_enabled,
            },
            StagePlan {
                params: StageParams::Equalization {
                    low_hz: self.eq_low_cutoff,
                    high_hz: self.eq_high_cutoff,
                },
                enabled: true,
            },
            StagePlan {
                params: StageParams::Compression(CompressorSettings::new(
                    self.compression_threshold_db,
                    self.compression_ratio,
                )),
                enabled: self.compression_enabled,
            },
        ]
    }
}

/// Output of a completed stage
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub stage: StageKind,
    pub signal: Signal,
}

/// Error of a pipeline run, naming the stage that aborted it
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageFailure {
    pub stage: StageKind,
    #[source]
    pub source: EnhanceError,
}

/// Where the orchestrator is in its run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running(StageKind),
    Complete,
    Failed(StageKind),
}

/// Owns the estimator and the buffers of the most recent run
pub struct Pipeline {
    estimator: Box<dyn NoiseEstimator>,
    state: RunState,
    original: Option<Signal>,
    outputs: Vec<StageOutput>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_estimator(Box::new(SpectralGate::default()))
    }

    /// Use a different noise estimator for the de-reverberation stage
    pub fn with_estimator(estimator: Box<dyn NoiseEstimator>) -> Self {
        Self {
            estimator,
            state: RunState::Idle,
            original: None,
            outputs: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Drop the previous run's buffers
    pub fn reset(&mut self) {
        self.state = RunState::Idle;
        self.original = None;
        self.outputs.clear();
    }

    /// Run every enabled stage of `options` over `original`.
    ///
    /// Stages run strictly in order. The first failing stage aborts the run;
    /// outputs of stages that completed before it stay available through
    /// [`Pipeline::outputs`], but no final buffer is published.
    pub fn run(&mut self, original: Signal, options: &EnhanceOptions) -> Result<&Signal, StageFailure> {
        self.run_plan(original, &options.plan())
    }

    /// The final buffer is the last enabled stage's output, or the original
    /// when no stage is enabled.
    fn run_plan(&mut self, original: Signal, plan: &[StagePlan]) -> Result<&Signal, StageFailure> {
        self.reset();

        log::info!(
            "Enhancing {:.2}s of audio ({} Hz, {} ch)",
            original.duration_secs(),
            original.sample_rate(),
            original.channels()
        );

        // Compression repacks integer frames with the original's metadata
        let frame_format = original.frame_format();
        let mut current = original.clone();

        for plan in plan.iter().filter(|p| p.enabled) {
            let stage = plan.kind();
            self.state = RunState::Running(stage);

            let output = match self.run_stage(&plan.params, &current, frame_format) {
                Ok(output) => output,
                Err(source) => {
                    log::warn!("{} stage failed: {}", stage, source);
                    self.state = RunState::Failed(stage);
                    self.original = Some(original);
                    return Err(StageFailure { stage, source });
                }
            };

            log::debug!(
                "{} stage produced {} samples (peak {:.1})",
                stage,
                output.samples().len(),
                output.peak()
            );

            current = output.clone();
            self.outputs.push(StageOutput {
                stage,
                signal: output,
            });
        }

        self.state = RunState::Complete;
        log::info!("Enhancement complete: {} stages applied", self.outputs.len());

        let original = self.original.insert(original);
        Ok(match self.outputs.last() {
            Some(output) => &output.signal,
            None => original,
        })
    }

    fn run_stage(
        &self,
        params: &StageParams,
        input: &Signal,
        frame_format: FrameFormat,
    ) -> Result<Signal, EnhanceError> {
        match *params {
            StageParams::NoiseReduction => BandLimiter::new(input.sample_rate())?.process(input),
            StageParams::DeReverb { intensity } => suppress(self.estimator.as_ref(), input, intensity),
            StageParams::Equalization { low_hz, high_hz } => {
                Equalizer::new(input.sample_rate(), low_hz as f64, high_hz as f64)?.process(input)
            }
            StageParams::Compression(settings) => {
                let packed = input.to_pcm(frame_format);
                let compressed = compress(&packed, &settings)?;
                Signal::from_pcm(&compressed)
            }
        }
    }

    /// Signal the most recent run started from
    pub fn original(&self) -> Option<&Signal> {
        self.original.as_ref()
    }

    /// Completed stage outputs of the most recent run, in execution order
    pub fn outputs(&self) -> &[StageOutput] {
        &self.outputs
    }

    pub fn output(&self, stage: StageKind) -> Option<&Signal> {
        self.outputs
            .iter()
            .find(|o| o.stage == stage)
            .map(|o| &o.signal)
    }

    /// Final buffer, only once a run has completed
    pub fn final_output(&self) -> Option<&Signal> {
        match self.state {
            RunState::Complete => self
                .outputs
                .last()
                .map(|o| &o.signal)
                .or(self.original.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(sample_rate: u32, len: usize) -> Signal {
        let samples: Vec<f32> = (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / sample_rate as f32).sin())
            .collect();
        Signal::from_normalized(&samples, sample_rate, 1).unwrap()
    }

    #[test]
    fn test_default_options() {
        let options = EnhanceOptions::default();
        assert!(!options.noise_reduction_enabled);
        assert!(!options.de_reverb_enabled);
        assert!(!options.compression_enabled);
        assert_eq!(options.de_reverb_intensity, 0.2);
        assert_eq!(options.eq_low_cutoff, 100.0);
        assert_eq!(options.eq_high_cutoff, 10000.0);
        assert_eq!(options.compression_threshold_db, -25.0);
        assert_eq!(options.compression_ratio, 3.5);
    }

    #[test]
    fn test_plan_is_canonical_and_always_equalizes() {
        let plan = EnhanceOptions::default().plan();
        let kinds: Vec<StageKind> = plan.iter().map(StagePlan::kind).collect();
        assert_eq!(kinds, StageKind::ALL.to_vec());

        let enabled: Vec<StageKind> = plan.iter().filter(|p| p.enabled).map(StagePlan::kind).collect();
        assert_eq!(enabled, vec![StageKind::Equalization]);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: EnhanceOptions =
            serde_json::from_str(r#"{"deReverbEnabled": true, "compressionRatio": 5.0}"#).unwrap();
        assert!(options.de_reverb_enabled);
        assert_eq!(options.compression_ratio, 5.0);
        assert_eq!(options.eq_high_cutoff, 10000.0);
    }

    #[test]
    fn test_equalization_only_run_starts_from_original() {
        let mut pipeline = Pipeline::new();
        let result = pipeline.run(sine(44100, 4410), &EnhanceOptions::default());
        assert!(result.is_ok());

        assert_eq!(pipeline.state(), RunState::Complete);
        assert_eq!(pipeline.outputs().len(), 1);
        assert_eq!(pipeline.outputs()[0].stage, StageKind::Equalization);
        assert!(pipeline.original().is_some());
    }

    #[test]
    fn test_run_with_every_stage_disabled_returns_original() {
        let plan: Vec<StagePlan> = EnhanceOptions::default()
            .plan()
            .into_iter()
            .map(|p| StagePlan { enabled: false, ..p })
            .collect();
        let original = sine(44100, 441);

        let mut pipeline = Pipeline::new();
        let result = pipeline.run_plan(original.clone(), &plan).unwrap();
        assert_eq!(result, &original);

        assert_eq!(pipeline.state(), RunState::Complete);
        assert!(pipeline.outputs().is_empty());
        assert_eq!(pipeline.final_output(), Some(&original));
    }

    #[test]
    fn test_all_stages_run_in_order() {
        let options = EnhanceOptions {
            noise_reduction_enabled: true,
            de_reverb_enabled: true,
            compression_enabled: true,
            ..EnhanceOptions::default()
        };

        let mut pipeline = Pipeline::new();
        let final_len = pipeline.run(sine(44100, 8820), &options).unwrap().frames();
        assert_eq!(final_len, 8820);

        let stages: Vec<StageKind> = pipeline.outputs().iter().map(|o| o.stage).collect();
        assert_eq!(stages, StageKind::ALL.to_vec());
    }

    #[test]
    fn test_failure_keeps_completed_outputs() {
        let options = EnhanceOptions {
            noise_reduction_enabled: true,
            compression_enabled: true,
            compression_ratio: 0.5,
            ..EnhanceOptions::default()
        };

        let mut pipeline = Pipeline::new();
        let failure = pipeline.run(sine(44100, 4410), &options).unwrap_err();

        assert_eq!(failure.stage, StageKind::Compression);
        assert!(failure.source.is_invalid_parameter());
        assert_eq!(pipeline.state(), RunState::Failed(StageKind::Compression));
        assert!(pipeline.final_output().is_none());
        assert!(pipeline.original().is_some());
        assert!(pipeline.output(StageKind::NoiseReduction).is_some());
        assert!(pipeline.output(StageKind::Equalization).is_some());
        assert!(pipeline.output(StageKind::Compression).is_none());
    }

    #[test]
    fn test_equalizer_above_nyquist_aborts_before_later_stages() {
        let options = EnhanceOptions {
            compression_enabled: true,
            ..EnhanceOptions::default()
        };

        // 10 kHz high cutoff is above the 8 kHz Nyquist of a 16 kHz signal
        let mut pipeline = Pipeline::new();
        let failure = pipeline.run(sine(16000, 1600), &options).unwrap_err();

        assert_eq!(failure.stage, StageKind::Equalization);
        assert!(pipeline.outputs().is_empty());
    }

    #[test]
    fn test_new_run_discards_previous_buffers() {
        let mut pipeline = Pipeline::new();
        let options = EnhanceOptions {
            noise_reduction_enabled: true,
            ..EnhanceOptions::default()
        };
        pipeline.run(sine(44100, 4410), &options).unwrap();
        assert_eq!(pipeline.outputs().len(), 2);

        pipeline.run(sine(44100, 2205), &EnhanceOptions::default()).unwrap();
        assert_eq!(pipeline.outputs().len(), 1);
        assert_eq!(pipeline.original().map(Signal::frames), Some(2205));

        pipeline.reset();
        assert_eq!(pipeline.state(), RunState::Idle);
        assert!(pipeline.outputs().is_empty());
    }

    #[test]
    fn test_failure_names_stage_and_parameter() {
        let options = EnhanceOptions {
            de_reverb_enabled: true,
            de_reverb_intensity: 1.5,
            ..EnhanceOptions::default()
        };
        let mut pipeline = Pipeline::new();
        let failure = pipeline.run(sine(44100, 2048), &options).unwrap_err();

        let message = failure.to_string();
        assert!(message.contains("de-reverberation"), "{}", message);
        assert!(message.contains("prop_decrease"), "{}", message);
    }
}
