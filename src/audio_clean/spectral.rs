//! Spectral gating noise and reverb suppression
//!
//! The estimator sits behind [`NoiseEstimator`] so any denoiser that maps a
//! normalized signal to a normalized signal of the same length can be swapped in.

use std::sync::Arc;

use realfft::num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::audio_util::{clip_and_cast, to_normalized, Signal, PCM16_SCALE};
use crate::error::EnhanceError;

/// Parameters handed to a noise estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateParams {
    /// Estimate one noise profile for the whole signal instead of tracking it over time
    pub stationary: bool,
    /// How much of the estimated noise to remove (0 = none, 1 = all)
    pub prop_decrease: f32,
}

/// Anything that can attenuate noise in a normalized mono signal
pub trait NoiseEstimator {
    /// Returns a signal of the same length as `samples`
    fn reduce_noise(
        &self,
        samples: &[f32],
        sample_rate: u32,
        params: &GateParams,
    ) -> Result<Vec<f32>, EnhanceError>;
}

/// Spectral gate over an STFT.
///
/// Non-stationary mode compares each bin against its own slow-moving average,
/// so diffuse tails and steady backgrounds are gated while onsets pass.
/// Stationary mode thresholds each bin at its mean plus a multiple of its
/// standard deviation (in dB) over the whole signal. Fully deterministic.
#[derive(Debug, Clone)]
pub struct SpectralGate {
    pub n_fft: usize,
    pub hop_size: usize,
    pub time_constant_s: f32,
    pub freq_mask_smooth_hz: f32,
    pub time_mask_smooth_ms: f32,
    pub thresh_n_mult_nonstationary: f32,
    pub sigmoid_slope_nonstationary: f32,
    pub n_std_thresh_stationary: f32,
}

impl Default for SpectralGate {
    fn default() -> Self {
        Self {
            n_fft: 1024,
            hop_size: 256,
            time_constant_s: 2.0,
            freq_mask_smooth_hz: 500.0,
            time_mask_smooth_ms: 50.0,
            thresh_n_mult_nonstationary: 2.0,
            sigmoid_slope_nonstationary: 10.0,
            n_std_thresh_stationary: 1.5,
        }
    }
}

/// FFT plans and window shared by one gating pass
struct StftPlan {
    n_fft: usize,
    hop_size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    window: Vec<f32>,
}

impl StftPlan {
    fn new(n_fft: usize, hop_size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(n_fft);
        let inverse = planner.plan_fft_inverse(n_fft);

        // Periodic Hann window
        let window = (0..n_fft)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_fft as f32).cos()))
            .collect();

        Self {
            n_fft,
            hop_size,
            forward,
            inverse,
            window,
        }
    }

    /// Centre-pad by half a frame (reflecting where the signal is long
    /// enough), then zero-pad the tail onto a whole number of hops.
    fn pad(&self, samples: &[f32]) -> (Vec<f32>, usize) {
        let half = self.n_fft / 2;
        let n = samples.len();
        let mut padded = Vec::with_capacity(n + self.n_fft + self.hop_size);

        if n > half {
            padded.extend((1..=half).rev().map(|i| samples[i]));
            padded.extend_from_slice(samples);
            padded.extend((1..=half).map(|i| samples[n - 1 - i]));
        } else {
            padded.resize(half, 0.0);
            padded.extend_from_slice(samples);
            padded.resize(padded.len() + half, 0.0);
        }

        let excess = (padded.len() - self.n_fft) % self.hop_size;
        if excess != 0 {
            padded.resize(padded.len() + self.hop_size - excess, 0.0);
        }

        (padded, half)
    }

    fn analyze(&self, padded: &[f32]) -> Result<Vec<Vec<Complex32>>, EnhanceError> {
        let frame_count = 1 + (padded.len() - self.n_fft) / self.hop_size;
        let mut frames = Vec::with_capacity(frame_count);

        for f in 0..frame_count {
            let start = f * self.hop_size;
            let mut buffer: Vec<f32> = padded[start..start + self.n_fft]
                .iter()
                .zip(&self.window)
                .map(|(s, w)| s * w)
                .collect();

            let mut spectrum = self.forward.make_output_vec();
            self.forward
                .process(&mut buffer, &mut spectrum)
                .map_err(|e| EnhanceError::Spectral(format!("forward FFT failed: {}", e)))?;
            frames.push(spectrum);
        }

        Ok(frames)
    }

    /// Weighted overlap-add back to the time domain
    fn synthesize(&self, frames: Vec<Vec<Complex32>>, padded_len: usize) -> Result<Vec<f32>, EnhanceError> {
        let mut output = vec![0.0f32; padded_len];
        let mut window_sum = vec![0.0f32; padded_len];
        let norm = 1.0 / self.n_fft as f32;

        for (f, mut spectrum) in frames.into_iter().enumerate() {
            let start = f * self.hop_size;

            // DC and Nyquist bins must be purely real for the inverse transform
            if let Some(first) = spectrum.first_mut() {
                first.im = 0.0;
            }
            if let Some(last) = spectrum.last_mut() {
                last.im = 0.0;
            }

            let mut time_buffer = self.inverse.make_output_vec();
            self.inverse
                .process(&mut spectrum, &mut time_buffer)
                .map_err(|e| EnhanceError::Spectral(format!("inverse FFT failed: {}", e)))?;

            for (i, sample) in time_buffer.iter().enumerate() {
                output[start + i] += sample * norm * self.window[i];
                window_sum[start + i] += self.window[i] * self.window[i];
            }
        }

        for (sample, weight) in output.iter_mut().zip(&window_sum) {
            if *weight > 1e-8 {
                *sample /= weight;
            }
        }

        Ok(output)
    }
}

impl SpectralGate {
    /// Slow per-bin envelope: forward-backward one-pole smoother across frames
    fn smooth_over_time(&self, magnitudes: &[Vec<f32>], sample_rate: u32) -> Vec<Vec<f32>> {
        let t_frames = self.time_constant_s * sample_rate as f32 / self.hop_size as f32;
        let b = ((1.0 + 4.0 * t_frames * t_frames).sqrt() - 1.0) / (2.0 * t_frames * t_frames);

        let frame_count = magnitudes.len();
        let bins = magnitudes.first().map_or(0, Vec::len);
        let mut smoothed = vec![vec![0.0f32; bins]; frame_count];

        for bin in 0..bins {
            let mut state = magnitudes[0][bin];
            for f in 0..frame_count {
                state = b * magnitudes[f][bin] + (1.0 - b) * state;
                smoothed[f][bin] = state;
            }
            for f in (0..frame_count).rev() {
                state = b * smoothed[f][bin] + (1.0 - b) * state;
                smoothed[f][bin] = state;
            }
        }

        smoothed
    }

    fn nonstationary_mask(&self, magnitudes: &[Vec<f32>], sample_rate: u32) -> Vec<Vec<f32>> {
        let smoothed = self.smooth_over_time(magnitudes, sample_rate);

        magnitudes
            .iter()
            .zip(&smoothed)
            .map(|(frame, smooth)| {
                frame
                    .iter()
                    .zip(smooth)
                    .map(|(&mag, &avg)| {
                        let above = (mag - avg) / avg.max(1e-10);
                        sigmoid(above - self.thresh_n_mult_nonstationary, self.sigmoid_slope_nonstationary)
                    })
                    .collect()
            })
            .collect()
    }

    fn stationary_mask(&self, magnitudes: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let db = amplitude_to_db(magnitudes);
        let frame_count = db.len() as f32;
        let bins = db.first().map_or(0, Vec::len);

        let thresholds: Vec<f32> = (0..bins)
            .map(|bin| {
                let mean = db.iter().map(|frame| frame[bin]).sum::<f32>() / frame_count;
                let variance = db.iter().map(|frame| (frame[bin] - mean).powi(2)).sum::<f32>() / frame_count;
                mean + variance.sqrt() * self.n_std_thresh_stationary
            })
            .collect();

        db.iter()
            .map(|frame| {
                frame
                    .iter()
                    .zip(&thresholds)
                    .map(|(&value, &threshold)| if value > threshold { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect()
    }

    /// Triangular smoothing across frequency and time ("same"-size, zero-padded)
    fn smooth_mask(&self, mask: &mut [Vec<f32>], sample_rate: u32) {
        let bin_hz = sample_rate as f32 / (self.n_fft / 2) as f32;
        let frame_ms = self.hop_size as f32 / sample_rate as f32 * 1000.0;
        let n_grad_freq = (self.freq_mask_smooth_hz / bin_hz) as usize;
        let n_grad_time = (self.time_mask_smooth_ms / frame_ms) as usize;

        if n_grad_freq > 0 {
            let kernel = triangle(n_grad_freq);
            for frame in mask.iter_mut() {
                *frame = convolve_same(frame, &kernel);
            }
        }

        if n_grad_time > 0 {
            let kernel = triangle(n_grad_time);
            let bins = mask.first().map_or(0, Vec::len);
            for bin in 0..bins {
                let column: Vec<f32> = mask.iter().map(|frame| frame[bin]).collect();
                for (frame, value) in mask.iter_mut().zip(convolve_same(&column, &kernel)) {
                    frame[bin] = value;
                }
            }
        }
    }
}

impl NoiseEstimator for SpectralGate {
    fn reduce_noise(
        &self,
        samples: &[f32],
        sample_rate: u32,
        params: &GateParams,
    ) -> Result<Vec<f32>, EnhanceError> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        if self.n_fft < 2 || self.hop_size == 0 || self.hop_size > self.n_fft {
            return Err(EnhanceError::Spectral(format!(
                "unusable STFT geometry: n_fft {}, hop {}",
                self.n_fft, self.hop_size
            )));
        }

        let plan = StftPlan::new(self.n_fft, self.hop_size);
        let (padded, offset) = plan.pad(samples);
        let mut frames = plan.analyze(&padded)?;

        let magnitudes: Vec<Vec<f32>> = frames
            .iter()
            .map(|frame| frame.iter().map(|c| c.norm()).collect())
            .collect();

        let mut mask = if params.stationary {
            self.stationary_mask(&magnitudes)
        } else {
            self.nonstationary_mask(&magnitudes, sample_rate)
        };
        self.smooth_mask(&mut mask, sample_rate);

        let keep = 1.0 - params.prop_decrease;
        for (frame, gains) in frames.iter_mut().zip(&mask) {
            for (bin, gain) in frame.iter_mut().zip(gains) {
                *bin *= gain * params.prop_decrease + keep;
            }
        }

        let output = plan.synthesize(frames, padded.len())?;
        Ok(output[offset..offset + samples.len()].to_vec())
    }
}

fn sigmoid(x: f32, slope: f32) -> f32 {
    1.0 / (1.0 + (-x * slope).exp())
}

/// Magnitudes to dB, floored 80 dB below the loudest bin
fn amplitude_to_db(magnitudes: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let mut db: Vec<Vec<f32>> = magnitudes
        .iter()
        .map(|frame| frame.iter().map(|&m| 20.0 * m.max(1e-10).log10()).collect())
        .collect();

    let ceiling = db
        .iter()
        .flat_map(|frame| frame.iter().copied())
        .fold(f32::NEG_INFINITY, f32::max);
    let floor = ceiling - 80.0;

    for value in db.iter_mut().flat_map(|frame| frame.iter_mut()) {
        *value = value.max(floor);
    }
    db
}

/// Normalized triangle of width `2n + 1` peaking at the centre
fn triangle(n: usize) -> Vec<f32> {
    let weights: Vec<f32> = (0..=2 * n)
        .map(|k| 1.0 - (k as f32 - n as f32).abs() / (n as f32 + 1.0))
        .collect();
    let total: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

fn convolve_same(input: &[f32], kernel: &[f32]) -> Vec<f32> {
    let half = kernel.len() / 2;
    (0..input.len())
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let j = (i + half).checked_sub(k)?;
                    input.get(j).map(|x| x * w)
                })
                .sum()
        })
        .collect()
}

/// De-reverberation / noise suppression stage.
///
/// Input is in the 16-bit domain; the estimator sees normalized floats and
/// its output is scaled by 32767, then clipped and truncated to 16-bit.
pub fn suppress(
    estimator: &dyn NoiseEstimator,
    signal: &Signal,
    intensity: f32,
) -> Result<Signal, EnhanceError> {
    if !(0.0..=1.0).contains(&intensity) {
        return Err(EnhanceError::invalid(
            "prop_decrease",
            intensity,
            "must be between 0 and 1",
        ));
    }

    let params = GateParams {
        stationary: false,
        prop_decrease: intensity,
    };

    signal.map_channels(|channel| {
        let normalized = to_normalized(channel);
        let reduced = estimator.reduce_noise(&normalized, signal.sample_rate(), &params)?;
        if reduced.len() != normalized.len() {
            return Err(EnhanceError::Spectral(format!(
                "estimator returned {} samples for {} input samples",
                reduced.len(),
                normalized.len()
            )));
        }
        let scaled: Vec<f32> = reduced.iter().map(|s| s * PCM16_SCALE).collect();
        Ok(clip_and_cast(&scaled).into_iter().map(f32::from).collect())
    })
}
