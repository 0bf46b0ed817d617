use proptest::prelude::*;

use clip_enhance::audio_clean::compressor::{compress, CompressorSettings};
use clip_enhance::audio_clean::filters::{apply, design, Band, Equalizer};
use clip_enhance::audio_util::{clip_and_cast, from_normalized, to_normalized, FrameFormat, PcmBuffer};
use clip_enhance::Signal;

fn sine_pcm(amplitude: f32, len: usize) -> PcmBuffer {
    let samples = (0..len)
        .map(|i| (amplitude * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 44100.0).sin()).round() as i16)
        .collect();
    PcmBuffer {
        samples,
        format: FrameFormat::pcm16(44100, 1),
    }
}

fn peak(samples: &[i16]) -> i32 {
    samples.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn filtering_preserves_length(
        samples in prop::collection::vec(-40000.0f32..40000.0, 1..3000),
        highpass_hz in 20.0f64..5000.0,
        lowpass_hz in 5000.0f64..21000.0,
    ) {
        let signal = Signal::mono(samples, 44100).unwrap();
        let highpass = design(3, Band::Highpass { cutoff_hz: highpass_hz }, 44100).unwrap();
        let lowpass = design(3, Band::Lowpass { cutoff_hz: lowpass_hz }, 44100).unwrap();

        let filtered = apply(&apply(&signal, &highpass).unwrap(), &lowpass).unwrap();
        prop_assert_eq!(filtered.samples().len(), signal.samples().len());
        prop_assert!(filtered.samples().iter().all(|s| s.is_finite()));
    }

    #[test]
    fn clip_and_cast_saturates_any_magnitude(
        samples in prop::collection::vec(-1.0f32..1.0, 1..500),
        factor in 1.0f32..1.0e6,
    ) {
        let scaled: Vec<f32> = samples.iter().map(|s| s * 32768.0 * factor).collect();
        let packed = clip_and_cast(&scaled);

        prop_assert_eq!(packed.len(), scaled.len());
        for (&x, &y) in scaled.iter().zip(&packed) {
            if x >= 32767.0 {
                prop_assert_eq!(y, i16::MAX);
            } else if x <= -32768.0 {
                prop_assert_eq!(y, i16::MIN);
            } else {
                prop_assert!((x - y as f32).abs() < 1.0);
            }
        }
    }

    #[test]
    fn normalized_round_trip_within_one_lsb(samples in prop::collection::vec(any::<i16>(), 1..500)) {
        let original: Vec<f32> = samples.iter().map(|&s| s as f32).collect();
        let restored = from_normalized(&to_normalized(&original));
        for (a, b) in original.iter().zip(&restored) {
            prop_assert!((a - b).abs() <= 1.0);
        }
    }

    #[test]
    fn equalizer_rejects_inverted_band(low in 20.0f64..20000.0, gap in 0.0f64..5000.0) {
        let high = (low - gap).max(1.0);
        prop_assert!(Equalizer::new(44100, low, high).is_err());
    }

    #[test]
    fn unity_ratio_is_identity(
        samples in prop::collection::vec(any::<i16>(), 1..2000),
        threshold in -50.0f32..0.0,
    ) {
        let pcm = PcmBuffer { samples, format: FrameFormat::pcm16(44100, 1) };
        let out = compress(&pcm, &CompressorSettings::new(threshold, 1.0)).unwrap();
        prop_assert_eq!(out, pcm);
    }

    #[test]
    fn compression_reduces_peak_above_threshold(
        amplitude in 8000.0f32..32000.0,
        ratio in 1.5f32..10.0,
        threshold in -40.0f32..-20.0,
    ) {
        let pcm = sine_pcm(amplitude, 4410);
        let out = compress(&pcm, &CompressorSettings::new(threshold, ratio)).unwrap();

        prop_assert_eq!(out.samples.len(), pcm.samples.len());
        prop_assert!(peak(&out.samples) < peak(&pcm.samples));
    }
}
