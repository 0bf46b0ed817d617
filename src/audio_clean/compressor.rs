//! Dynamic range compression on packed 16-bit frames
//!
//! Level is the RMS of the attack window preceding each frame. Gain
//! reduction ramps toward `(1 - 1/ratio)` of the dB excess over threshold at
//! attack speed and relaxes at release speed.

use crate::audio_util::PcmBuffer;
use crate::error::EnhanceError;

/// Compressor parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorSettings {
    /// Threshold in dBFS (must be <= 0)
    pub threshold_db: f32,
    /// Compression ratio (must be >= 1)
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold_db: -25.0,
            ratio: 3.5,
            attack_ms: 5.0,
            release_ms: 50.0,
        }
    }
}

impl CompressorSettings {
    pub fn new(threshold_db: f32, ratio: f32) -> Self {
        Self {
            threshold_db,
            ratio,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), EnhanceError> {
        if !(self.ratio >= 1.0) || !self.ratio.is_finite() {
            return Err(EnhanceError::invalid("ratio", self.ratio, "must be at least 1.0"));
        }
        if !(self.threshold_db <= 0.0) || !self.threshold_db.is_finite() {
            return Err(EnhanceError::invalid(
                "threshold_db",
                self.threshold_db,
                "must be a finite level at or below 0 dBFS",
            ));
        }
        if !(self.attack_ms > 0.0) || !(self.release_ms > 0.0) {
            return Err(EnhanceError::invalid(
                "attack_ms",
                self.attack_ms.min(self.release_ms),
                "attack and release must be positive",
            ));
        }
        Ok(())
    }
}

fn db_to_lin(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Compress `pcm`; output has the same length and frame format.
pub fn compress(pcm: &PcmBuffer, settings: &CompressorSettings) -> Result<PcmBuffer, EnhanceError> {
    settings.validate()?;

    let format = pcm.format;
    let channels = format.channels.max(1) as usize;
    let frame_count = pcm.frame_count();
    let frame_rate = format.frame_rate as f64;

    let threshold_rms = format.max_possible_amplitude() * db_to_lin(settings.threshold_db as f64);
    let ratio = settings.ratio as f64;

    let attack_frames = settings.attack_ms as f64 * frame_rate / 1000.0;
    let release_frames = settings.release_ms as f64 * frame_rate / 1000.0;
    let look_frames = attack_frames as usize;

    let mut output = Vec::with_capacity(pcm.samples.len());
    let mut attenuation = 0.0f64;
    // Sum of squares over the trailing window [i - look_frames, i)
    let mut window_energy = 0.0f64;

    for i in 0..frame_count {
        let window_start = i.saturating_sub(look_frames);
        let window_len = (i - window_start) * channels;

        let rms = if window_len == 0 {
            0.0
        } else {
            (window_energy / window_len as f64).sqrt().floor()
        };

        let db_over = if rms == 0.0 {
            0.0
        } else {
            (20.0 * (rms / threshold_rms).log10()).max(0.0)
        };

        let max_attenuation = (1.0 - 1.0 / ratio) * db_over;
        if rms > threshold_rms && attenuation <= max_attenuation {
            attenuation = (attenuation + max_attenuation / attack_frames).min(max_attenuation);
        } else {
            attenuation = (attenuation - max_attenuation / release_frames).max(0.0);
        }

        let frame = &pcm.samples[i * channels..(i + 1) * channels];
        if attenuation != 0.0 {
            let gain = db_to_lin(-attenuation);
            output.extend(frame.iter().map(|&s| {
                (s as f64 * gain)
                    .clamp(i16::MIN as f64, i16::MAX as f64)
                    .floor() as i16
            }));
        } else {
            output.extend_from_slice(frame);
        }

        // Slide the window forward to cover frame i
        window_energy += frame.iter().map(|&s| (s as f64).powi(2)).sum::<f64>();
        if i >= look_frames {
            let leaving = i - look_frames;
            let dropped = &pcm.samples[leaving * channels..(leaving + 1) * channels];
            window_energy -= dropped.iter().map(|&s| (s as f64).powi(2)).sum::<f64>();
            window_energy = window_energy.max(0.0);
        }
    }

    log::debug!(
        "Compressed {} frames (threshold {} dB, ratio {})",
        frame_count,
        settings.threshold_db,
        settings.ratio
    );

    Ok(PcmBuffer {
        samples: output,
        format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_util::FrameFormat;

    fn sine_pcm(amplitude: f32, len: usize) -> PcmBuffer {
        let samples = (0..len)
            .map(|i| (amplitude * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 44100.0).sin()).round() as i16)
            .collect();
        PcmBuffer {
            samples,
            format: FrameFormat::pcm16(44100, 1),
        }
    }

    fn peak(pcm: &PcmBuffer) -> i32 {
        pcm.samples.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0)
    }

    #[test]
    fn test_ratio_below_one_is_rejected() {
        let pcm = sine_pcm(10000.0, 100);
        let err = compress(&pcm, &CompressorSettings::new(-25.0, 0.5)).unwrap_err();
        assert!(err.is_invalid_parameter());
    }

    #[test]
    fn test_positive_threshold_is_rejected() {
        let pcm = sine_pcm(10000.0, 100);
        assert!(compress(&pcm, &CompressorSettings::new(3.0, 2.0)).is_err());
        assert!(compress(&pcm, &CompressorSettings::new(f32::NAN, 2.0)).is_err());
    }

    #[test]
    fn test_unity_ratio_is_identity() {
        let pcm = sine_pcm(30000.0, 4410);
        let out = compress(&pcm, &CompressorSettings::new(-40.0, 1.0)).unwrap();
        assert_eq!(out, pcm);
    }

    #[test]
    fn test_loud_signal_peak_is_reduced() {
        let pcm = sine_pcm(16000.0, 44100);
        let out = compress(&pcm, &CompressorSettings::new(-25.0, 3.5)).unwrap();

        assert_eq!(out.samples.len(), pcm.samples.len());
        assert!(peak(&out) < peak(&pcm));

        // After the attack settles the tone sits well below its input level
        let settled = PcmBuffer {
            samples: out.samples[22050..].to_vec(),
            format: out.format,
        };
        assert!(peak(&settled) < 12000);
    }

    #[test]
    fn test_quiet_signal_passes_untouched() {
        let pcm = sine_pcm(500.0, 4410);
        let out = compress(&pcm, &CompressorSettings::new(-25.0, 4.0)).unwrap();
        assert_eq!(out, pcm);
    }

    #[test]
    fn test_stereo_frames_share_gain() {
        let mono = sine_pcm(20000.0, 4410);
        let samples: Vec<i16> = mono.samples.iter().flat_map(|&s| [s, s]).collect();
        let stereo = PcmBuffer {
            samples,
            format: FrameFormat::pcm16(44100, 2),
        };

        let out = compress(&stereo, &CompressorSettings::new(-20.0, 4.0)).unwrap();
        assert_eq!(out.frame_count(), 4410);
        for frame in out.samples.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }
}
