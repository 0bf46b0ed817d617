//! In-memory PCM signals and the conversions between sample domains
//!
//! Pipeline signals hold `f32` samples on the signed 16-bit scale
//! ([-32768, 32767]) so filter output can overshoot before it is saturated.
//! Packed `i16` buffers are only built where a stage needs integer frames.

use crate::error::EnhanceError;

/// Full-scale value used when normalizing 16-bit samples to [-1, 1]
pub const PCM16_NORMALIZE: f32 = 32768.0;
/// Scale applied when converting normalized floats back to 16-bit
pub const PCM16_SCALE: f32 = 32767.0;

/// Saturate arbitrary float samples to the i16 range, then cast.
///
/// Filtering and gain stages can overshoot; this never wraps.
pub fn clip_and_cast(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            if s.is_nan() {
                0
            } else {
                s.clamp(i16::MIN as f32, i16::MAX as f32) as i16
            }
        })
        .collect()
}

/// Scale 16-bit domain samples into roughly [-1, 1]
pub fn to_normalized(samples: &[f32]) -> Vec<f32> {
    samples.iter().map(|&s| s / PCM16_NORMALIZE).collect()
}

/// Scale normalized samples to the 16-bit domain, rounding to the nearest
/// representable integer value.
pub fn from_normalized(samples: &[f32]) -> Vec<f32> {
    samples
        .iter()
        .map(|&s| {
            let scaled = (s * PCM16_SCALE).round();
            if scaled.is_nan() {
                0.0
            } else {
                scaled.clamp(i16::MIN as f32, i16::MAX as f32)
            }
        })
        .collect()
}

/// Frame metadata of a packed integer buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub frame_rate: u32,
    /// Bytes per sample
    pub sample_width: u16,
    pub channels: u16,
}

impl FrameFormat {
    pub fn pcm16(frame_rate: u32, channels: u16) -> Self {
        Self {
            frame_rate,
            sample_width: 2,
            channels,
        }
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.sample_width * 8
    }

    /// Largest magnitude a sample of this width can reach
    pub fn max_possible_amplitude(&self) -> f64 {
        2f64.powi(self.bits_per_sample() as i32) / 2.0
    }
}

/// Packed 16-bit PCM frames (interleaved when multi-channel)
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<i16>,
    pub format: FrameFormat,
}

impl PcmBuffer {
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }
}

/// A PCM waveform at a fixed sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl Signal {
    /// Build a signal from 16-bit domain samples (interleaved if `channels > 1`)
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self, EnhanceError> {
        if samples.is_empty() {
            return Err(EnhanceError::InvalidSignal("signal has no samples".into()));
        }
        if sample_rate == 0 {
            return Err(EnhanceError::InvalidSignal("sample rate must be positive".into()));
        }
        if channels == 0 {
            return Err(EnhanceError::InvalidSignal("channel count must be positive".into()));
        }
        if samples.len() % channels as usize != 0 {
            return Err(EnhanceError::InvalidSignal(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }

        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self, EnhanceError> {
        Self::new(samples, sample_rate, 1)
    }

    /// Build a signal from normalized [-1, 1] samples, as decoders produce them
    pub fn from_normalized(
        samples: &[f32],
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, EnhanceError> {
        Self::new(from_normalized(samples), sample_rate, channels)
    }

    /// Unpack integer frames into a signal
    pub fn from_pcm(pcm: &PcmBuffer) -> Result<Self, EnhanceError> {
        Self::new(
            pcm.samples.iter().map(|&s| s as f32).collect(),
            pcm.format.frame_rate,
            pcm.format.channels,
        )
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn nyquist(&self) -> f64 {
        self.sample_rate as f64 / 2.0
    }

    /// Largest absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    /// Samples scaled into roughly [-1, 1]
    pub fn to_normalized(&self) -> Vec<f32> {
        to_normalized(&self.samples)
    }

    /// Saturating conversion to packed frames with the given metadata
    pub fn to_pcm(&self, format: FrameFormat) -> PcmBuffer {
        PcmBuffer {
            samples: clip_and_cast(&self.samples),
            format,
        }
    }

    /// Frame metadata for packing this signal as 16-bit PCM
    pub fn frame_format(&self) -> FrameFormat {
        FrameFormat::pcm16(self.sample_rate, self.channels)
    }

    /// Deinterleave a single channel
    pub fn channel(&self, index: usize) -> Vec<f32> {
        self.samples
            .iter()
            .skip(index)
            .step_by(self.channels as usize)
            .copied()
            .collect()
    }

    /// Apply `f` to each channel independently and reassemble the result.
    ///
    /// `f` must return as many samples as it was given.
    pub fn map_channels<F>(&self, mut f: F) -> Result<Signal, EnhanceError>
    where
        F: FnMut(&[f32]) -> Result<Vec<f32>, EnhanceError>,
    {
        if self.channels == 1 {
            let out = f(&self.samples)?;
            return self.with_samples(out);
        }

        let channels = self.channels as usize;
        let frames = self.frames();
        let mut interleaved = vec![0.0f32; self.samples.len()];

        for ch in 0..channels {
            let processed = f(&self.channel(ch))?;
            if processed.len() != frames {
                return Err(EnhanceError::InvalidSignal(format!(
                    "channel {} changed length from {} to {}",
                    ch,
                    frames,
                    processed.len()
                )));
            }
            for (frame, sample) in processed.into_iter().enumerate() {
                interleaved[frame * channels + ch] = sample;
            }
        }

        self.with_samples(interleaved)
    }

    /// New signal with the same rate and layout but different samples
    pub fn with_samples(&self, samples: Vec<f32>) -> Result<Signal, EnhanceError> {
        if samples.len() != self.samples.len() {
            return Err(EnhanceError::InvalidSignal(format!(
                "expected {} samples, got {}",
                self.samples.len(),
                samples.len()
            )));
        }
        Signal::new(samples, self.sample_rate, self.channels)
    }

    /// Average all channels into one
    pub fn downmix(&self) -> Signal {
        if self.channels == 1 {
            return self.clone();
        }

        let channels = self.channels as usize;
        let mono: Vec<f32> = self
            .samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        Signal {
            samples: mono,
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }
}
