//! Butterworth IIR filters applied zero-phase (forward then backward)
//!
//! Designs go through the analog prototype, pre-warping and the bilinear
//! transform, and come out as cascaded second-order sections so higher
//! orders stay numerically stable.

use std::f64::consts::PI;

use biquad::Coefficients;
use realfft::num_complex::Complex64;

use crate::audio_util::Signal;
use crate::error::EnhanceError;

/// Highest Butterworth order accepted by [`design`]
pub const MAX_ORDER: usize = 8;

/// Pass band of a filter design
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Band {
    Highpass { cutoff_hz: f64 },
    Lowpass { cutoff_hz: f64 },
    Bandpass { low_hz: f64, high_hz: f64 },
}

/// Designed filter as a cascade of second-order sections
#[derive(Debug, Clone)]
pub struct FilterCoefficients {
    band: Band,
    order: usize,
    sections: Vec<Coefficients<f64>>,
}

/// Design a Butterworth filter.
///
/// Cutoffs are normalized as `hz / (0.5 * sample_rate)` and must land
/// strictly inside (0, 1). A bandpass design has twice the requested order.
pub fn design(order: usize, band: Band, sample_rate: u32) -> Result<FilterCoefficients, EnhanceError> {
    if order == 0 || order > MAX_ORDER {
        return Err(EnhanceError::invalid(
            "order",
            order as f64,
            format!("must be between 1 and {}", MAX_ORDER),
        ));
    }
    if sample_rate == 0 {
        return Err(EnhanceError::invalid("sample_rate", 0.0, "must be positive"));
    }

    let prototype = butterworth_prototype(order);
    let one = Complex64::new(1.0, 0.0);

    let (zeros, poles, gain) = match band {
        Band::Lowpass { cutoff_hz } => {
            let wo = prewarp(normalize("cutoff", cutoff_hz, sample_rate)?);
            let poles = prototype.iter().map(|p| p * wo).collect();
            (Vec::new(), poles, wo.powi(order as i32))
        }
        Band::Highpass { cutoff_hz } => {
            let wo = prewarp(normalize("cutoff", cutoff_hz, sample_rate)?);
            let poles = prototype.iter().map(|p| wo / p).collect();
            let gain = (one / prototype.iter().fold(one, |acc, p| acc * -p)).re;
            (vec![Complex64::new(0.0, 0.0); order], poles, gain)
        }
        Band::Bandpass { low_hz, high_hz } => {
            let low = normalize("low_cutoff", low_hz, sample_rate)?;
            let high = normalize("high_cutoff", high_hz, sample_rate)?;
            if low >= high {
                return Err(EnhanceError::invalid(
                    "low_cutoff",
                    low_hz,
                    format!("must be below the high cutoff ({} Hz)", high_hz),
                ));
            }

            let (w1, w2) = (prewarp(low), prewarp(high));
            let bandwidth = w2 - w1;
            let center = (w1 * w2).sqrt();

            let mut poles = Vec::with_capacity(order * 2);
            for p in &prototype {
                let scaled = p * (bandwidth / 2.0);
                let offset = (scaled * scaled - center * center).sqrt();
                poles.push(scaled + offset);
                poles.push(scaled - offset);
            }
            (
                vec![Complex64::new(0.0, 0.0); order],
                poles,
                bandwidth.powi(order as i32),
            )
        }
    };

    let (zeros, poles, gain) = bilinear(&zeros, &poles, gain);

    Ok(FilterCoefficients {
        band,
        order,
        sections: to_sections(&zeros, &poles, gain),
    })
}

/// Filter every channel of `signal` forward and backward.
///
/// Output length always equals input length.
pub fn apply(signal: &Signal, coefficients: &FilterCoefficients) -> Result<Signal, EnhanceError> {
    signal.map_channels(|channel| Ok(coefficients.filtfilt(channel)))
}

fn normalize(name: &'static str, hz: f64, sample_rate: u32) -> Result<f64, EnhanceError> {
    let nyquist = 0.5 * sample_rate as f64;
    let normalized = hz / nyquist;
    if !(normalized > 0.0 && normalized < 1.0) {
        return Err(EnhanceError::invalid(
            name,
            hz,
            format!(
                "must lie strictly between 0 and the Nyquist frequency ({} Hz)",
                nyquist
            ),
        ));
    }
    Ok(normalized)
}

/// Analog frequency for a normalized digital cutoff (sample rate fixed at 2)
fn prewarp(normalized: f64) -> f64 {
    4.0 * (PI * normalized / 2.0).tan()
}

/// Unit-cutoff analog Butterworth poles, all in the left half-plane
fn butterworth_prototype(order: usize) -> Vec<Complex64> {
    let n = order as i64;
    (0..n)
        .map(|k| {
            let m = -n + 1 + 2 * k;
            -Complex64::from_polar(1.0, PI * m as f64 / (2 * n) as f64)
        })
        .collect()
}

fn bilinear(zeros: &[Complex64], poles: &[Complex64], gain: f64) -> (Vec<Complex64>, Vec<Complex64>, f64) {
    let fs2 = Complex64::new(4.0, 0.0);
    let one = Complex64::new(1.0, 0.0);

    let mut digital_zeros: Vec<Complex64> = zeros.iter().map(|z| (fs2 + z) / (fs2 - z)).collect();
    let digital_poles: Vec<Complex64> = poles.iter().map(|p| (fs2 + p) / (fs2 - p)).collect();

    // Zeros at infinity land on Nyquist
    digital_zeros.resize(poles.len(), Complex64::new(-1.0, 0.0));

    let numerator = zeros.iter().fold(one, |acc, z| acc * (fs2 - z));
    let denominator = poles.iter().fold(one, |acc, p| acc * (fs2 - p));

    (digital_zeros, digital_poles, gain * (numerator / denominator).re)
}

/// Group conjugate pole pairs (and leftover real poles) into biquads.
///
/// Butterworth zeros only ever sit at z = 1 or z = -1, so they are handed
/// out alternately to keep every section balanced.
fn to_sections(zeros: &[Complex64], poles: &[Complex64], gain: f64) -> Vec<Coefficients<f64>> {
    const IMAG_EPS: f64 = 1e-10;

    let mut denominators: Vec<(f64, f64, bool)> = poles
        .iter()
        .filter(|p| p.im > IMAG_EPS)
        .map(|p| (-2.0 * p.re, p.norm_sqr(), true))
        .collect();

    let mut real_poles: Vec<f64> = poles
        .iter()
        .filter(|p| p.im.abs() <= IMAG_EPS)
        .map(|p| p.re)
        .collect();
    real_poles.sort_by(|a, b| a.total_cmp(b));

    for pair in real_poles.chunks(2) {
        match *pair {
            [p1, p2] => denominators.push((-(p1 + p2), p1 * p2, true)),
            [p] => denominators.push((-p, 0.0, false)),
            _ => {}
        }
    }

    let mut positive = zeros.iter().filter(|z| z.re > 0.0).count();
    let mut negative = zeros.len() - positive;
    let mut next_zero = move || {
        if positive > 0 && positive >= negative {
            positive -= 1;
            1.0
        } else if negative > 0 {
            negative -= 1;
            -1.0
        } else {
            0.0
        }
    };

    let mut sections: Vec<Coefficients<f64>> = denominators
        .into_iter()
        .map(|(a1, a2, second_order)| {
            let (b1, b2) = if second_order {
                let (z1, z2) = (next_zero(), next_zero());
                (-(z1 + z2), z1 * z2)
            } else {
                (-next_zero(), 0.0)
            };
            Coefficients {
                a1,
                a2,
                b0: 1.0,
                b1,
                b2,
            }
        })
        .collect();

    if let Some(first) = sections.first_mut() {
        first.b0 *= gain;
        first.b1 *= gain;
        first.b2 *= gain;
    }

    sections
}

impl FilterCoefficients {
    pub fn band(&self) -> Band {
        self.band
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn sections(&self) -> &[Coefficients<f64>] {
        &self.sections
    }

    /// Edge padding used by the zero-phase pass
    fn pad_len(&self) -> usize {
        let b2_zero = self.sections.iter().filter(|c| c.b2 == 0.0).count();
        let a2_zero = self.sections.iter().filter(|c| c.a2 == 0.0).count();
        let taps = 2 * self.sections.len() + 1 - b2_zero.min(a2_zero);
        3 * taps
    }

    /// Per-section state that makes a unit step look like it has always been
    /// present, so the filter starts without a transient.
    fn steady_state(&self) -> Vec<[f64; 2]> {
        let mut scale = 1.0;
        self.sections
            .iter()
            .map(|c| {
                let dc_gain = (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2);
                let s2 = c.b2 - c.a2 * dc_gain;
                let s1 = c.b1 - c.a1 * dc_gain + s2;
                let state = [scale * s1, scale * s2];
                scale *= dc_gain;
                state
            })
            .collect()
    }

    /// One causal pass through all sections (transposed direct form II)
    fn run(&self, input: &[f64], initial: &[[f64; 2]], x0: f64) -> Vec<f64> {
        let mut state: Vec<[f64; 2]> = initial.iter().map(|s| [s[0] * x0, s[1] * x0]).collect();

        input
            .iter()
            .map(|&x| {
                self.sections
                    .iter()
                    .zip(state.iter_mut())
                    .fold(x, |acc, (c, s)| {
                        let y = c.b0 * acc + s[0];
                        s[0] = c.b1 * acc - c.a1 * y + s[1];
                        s[1] = c.b2 * acc - c.a2 * y;
                        y
                    })
            })
            .collect()
    }

    /// Zero-phase filtering of one channel.
    ///
    /// The input is extended at both ends by odd reflection before the
    /// forward and backward passes; edge samples are still less accurate.
    pub fn filtfilt(&self, samples: &[f32]) -> Vec<f32> {
        let n = samples.len();
        if n == 0 {
            return Vec::new();
        }

        let wanted = self.pad_len();
        let pad = wanted.min(n - 1);
        if pad < wanted {
            log::warn!("Signal of {} samples shorter than filter padding {}, using {}", n, wanted, pad);
        }

        let x: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
        let (first, last) = (x[0], x[n - 1]);

        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - x[i]));
        extended.extend_from_slice(&x);
        extended.extend((1..=pad).map(|i| 2.0 * last - x[n - 1 - i]));

        let initial = self.steady_state();

        let mut forward = self.run(&extended, &initial, extended[0]);
        forward.reverse();
        let mut backward = self.run(&forward, &initial, forward[0]);
        backward.reverse();

        backward[pad..pad + n].iter().map(|&y| y as f32).collect()
    }
}

/// Fixed voice-band carve-out: 3rd-order high-pass at 500 Hz followed by a
/// 3rd-order low-pass at 8 kHz.
pub struct BandLimiter {
    highpass: FilterCoefficients,
    lowpass: FilterCoefficients,
}

impl BandLimiter {
    pub const ORDER: usize = 3;
    pub const HIGHPASS_HZ: f64 = 500.0;
    pub const LOWPASS_HZ: f64 = 8000.0;

    pub fn new(sample_rate: u32) -> Result<Self, EnhanceError> {
        let highpass = design(
            Self::ORDER,
            Band::Highpass {
                cutoff_hz: Self::HIGHPASS_HZ,
            },
            sample_rate,
        )?;
        let lowpass = design(
            Self::ORDER,
            Band::Lowpass {
                cutoff_hz: Self::LOWPASS_HZ,
            },
            sample_rate,
        )?;

        Ok(Self { highpass, lowpass })
    }

    /// High-pass then low-pass, each zero-phase
    pub fn process(&self, signal: &Signal) -> Result<Signal, EnhanceError> {
        let highpassed = apply(signal, &self.highpass)?;
        apply(&highpassed, &self.lowpass)
    }
}

/// Two-cutoff equalizer built from a 2nd-order Butterworth bandpass
pub struct Equalizer {
    filter: FilterCoefficients,
}

impl Equalizer {
    pub const ORDER: usize = 2;
    pub const DEFAULT_LOW_HZ: f64 = 100.0;
    pub const DEFAULT_HIGH_HZ: f64 = 10000.0;

    /// Requires `0 < low_hz < high_hz < sample_rate / 2`
    pub fn new(sample_rate: u32, low_hz: f64, high_hz: f64) -> Result<Self, EnhanceError> {
        let filter = design(Self::ORDER, Band::Bandpass { low_hz, high_hz }, sample_rate)?;
        Ok(Self { filter })
    }

    pub fn process(&self, signal: &Signal) -> Result<Signal, EnhanceError> {
        apply(signal, &self.filter)
    }
}
