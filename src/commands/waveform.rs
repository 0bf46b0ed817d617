//! Rendering data for before/after views: min/max waveform buckets and a
//! power spectrogram.

use std::f64::consts::PI;

use realfft::RealFftPlanner;
use serde::Serialize;

use crate::audio_util::Signal;
use crate::error::EnhanceError;

const SPECTROGRAM_NPERSEG: usize = 256;
const SPECTROGRAM_TUKEY_ALPHA: f64 = 0.25;
/// Floor applied before taking the log of a power value
const POWER_FLOOR: f64 = 1e-20;

/// Reduce a signal to `bucket_count` (min, max) pairs of normalized
/// amplitude, flattened as `[min0, max0, min1, max1, ...]`.
///
/// Multi-channel signals are mixed to mono first.
pub fn extract_waveform(signal: &Signal, bucket_count: usize) -> Vec<f32> {
    if bucket_count == 0 {
        return Vec::new();
    }

    let mono_samples = signal.downmix().to_normalized();

    let samples_per_bucket = (mono_samples.len() / bucket_count).max(1);
    let mut waveform: Vec<f32> = Vec::with_capacity(bucket_count * 2);

    for i in 0..bucket_count {
        let start = i * samples_per_bucket;
        let end = ((i + 1) * samples_per_bucket).min(mono_samples.len());

        if start >= mono_samples.len() {
            waveform.push(0.0);
            waveform.push(0.0);
            continue;
        }

        let (min, max) = mono_samples[start..end]
            .iter()
            .fold((0.0f32, 0.0f32), |(lo, hi), &s| (lo.min(s), hi.max(s)));

        waveform.push(min);
        waveform.push(max);
    }

    waveform
}

/// One-sided power spectral density over time
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Spectrogram {
    /// Bin centre frequencies in Hz
    pub frequencies: Vec<f32>,
    /// Segment centre times in seconds
    pub times: Vec<f32>,
    /// `power_db[bin][segment]`, 10*log10 of the PSD of normalized samples
    pub power_db: Vec<Vec<f32>>,
}

/// Periodic Tukey window of length `m`
fn tukey(m: usize, alpha: f64) -> Vec<f64> {
    // The periodic window is the symmetric one of length m + 1, truncated
    let n_sym = m + 1;
    let span = alpha * (n_sym - 1) as f64;
    let width = (span / 2.0).floor() as usize;

    (0..m)
        .map(|n| {
            let x = n as f64;
            if n <= width {
                0.5 * (1.0 + (PI * (-1.0 + 2.0 * x / span)).cos())
            } else if n < n_sym - width - 1 {
                1.0
            } else {
                0.5 * (1.0 + (PI * (-2.0 / alpha + 1.0 + 2.0 * x / span)).cos())
            }
        })
        .collect()
}

/// Short-time PSD of the mono mix: 256-sample Tukey(0.25) segments with an
/// eighth overlap, mean removed per segment, density scaling.
pub fn spectrogram(signal: &Signal) -> Result<Spectrogram, EnhanceError> {
    let samples: Vec<f64> = signal
        .downmix()
        .to_normalized()
        .into_iter()
        .map(f64::from)
        .collect();
    if samples.len() < 2 {
        return Err(EnhanceError::InvalidSignal(
            "at least two samples are needed for a spectrogram".into(),
        ));
    }

    let fs = signal.sample_rate() as f64;
    let nperseg = SPECTROGRAM_NPERSEG.min(samples.len());
    let noverlap = nperseg / 8;
    let step = nperseg - noverlap;
    let segments = (samples.len() - nperseg) / step + 1;
    let bins = nperseg / 2 + 1;

    let window = tukey(nperseg, SPECTROGRAM_TUKEY_ALPHA);
    let scale = 1.0 / (fs * window.iter().map(|w| w * w).sum::<f64>());

    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(nperseg);
    let mut buffer = fft.make_input_vec();
    let mut spectrum = fft.make_output_vec();

    let mut power_db = vec![Vec::with_capacity(segments); bins];
    let mut times = Vec::with_capacity(segments);

    for seg in 0..segments {
        let start = seg * step;
        let frame = &samples[start..start + nperseg];
        let mean = frame.iter().sum::<f64>() / nperseg as f64;

        for ((b, &x), &w) in buffer.iter_mut().zip(frame).zip(&window) {
            *b = (x - mean) * w;
        }
        fft.process(&mut buffer, &mut spectrum)
            .map_err(|e| EnhanceError::Spectral(format!("spectrogram FFT failed: {}", e)))?;

        for (k, bin) in spectrum.iter().enumerate() {
            let mut power = bin.norm_sqr() * scale;
            // Fold negative frequencies in, except DC and an even-length Nyquist
            let unpaired = k == 0 || (nperseg % 2 == 0 && k == bins - 1);
            if !unpaired {
                power *= 2.0;
            }
            power_db[k].push((10.0 * power.max(POWER_FLOOR).log10()) as f32);
        }

        times.push(((start + nperseg / 2) as f64 / fs) as f32);
    }

    let frequencies = (0..bins)
        .map(|k| (k as f64 * fs / nperseg as f64) as f32)
        .collect();

    Ok(Spectrogram {
        frequencies,
        times,
        power_db,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_buckets_hold_min_max() {
        let samples = vec![0.0, 16384.0, -8192.0, 0.0, 32767.0, -32768.0];
        let signal = Signal::mono(samples, 8000).unwrap();

        let waveform = extract_waveform(&signal, 3);
        assert_eq!(waveform.len(), 6);
        assert_eq!(waveform[0], 0.0);
        assert_eq!(waveform[1], 0.5);
        assert_eq!(waveform[2], -0.25);
        assert_eq!(waveform[3], 0.0);
        assert_eq!(waveform[5], 32767.0 / 32768.0);
        assert_eq!(waveform[4], -1.0);
    }

    #[test]
    fn test_waveform_pads_when_buckets_exceed_samples() {
        let signal = Signal::mono(vec![1000.0, -1000.0], 8000).unwrap();
        let waveform = extract_waveform(&signal, 4);
        assert_eq!(waveform.len(), 8);
        assert_eq!(&waveform[4..], &[0.0, 0.0, 0.0, 0.0]);
        assert!(extract_waveform(&signal, 0).is_empty());
    }

    #[test]
    fn test_tukey_shape() {
        let w = tukey(256, 0.25);
        assert_eq!(w.len(), 256);
        assert!(w[0].abs() < 1e-12);
        assert_eq!(w[128], 1.0);
        assert!(w[10] < w[20]);
        assert!(w[250] < w[240]);
    }

    #[test]
    fn test_spectrogram_peaks_at_tone_bin() {
        let sample_rate = 8000;
        let samples: Vec<f32> = (0..4000)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / sample_rate as f32).sin())
            .collect();
        let signal = Signal::from_normalized(&samples, sample_rate, 1).unwrap();

        let spec = spectrogram(&signal).unwrap();
        assert_eq!(spec.frequencies.len(), 129);
        assert_eq!(spec.times.len(), 17);
        assert!((spec.times[0] - 0.016).abs() < 1e-6);
        assert_eq!(spec.frequencies[32], 1000.0);

        for seg in 0..spec.times.len() {
            let loudest = (0..spec.frequencies.len())
                .max_by(|&a, &b| spec.power_db[a][seg].total_cmp(&spec.power_db[b][seg]))
                .unwrap();
            assert_eq!(loudest, 32);
        }
    }

    #[test]
    fn test_spectrogram_rejects_single_sample() {
        let signal = Signal::mono(vec![1.0], 8000).unwrap();
        assert!(spectrogram(&signal).is_err());
    }
}
