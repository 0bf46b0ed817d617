use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use clip_enhance::commands::enhance::enhance_signal;
use clip_enhance::commands::import::decode_file;
use clip_enhance::commands::settings::{load_options, save_options};
use clip_enhance::commands::waveform::{extract_waveform, spectrogram};
use clip_enhance::{EnhanceOptions, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "clip-enhance")]
#[command(version)]
#[command(about = "Clean up speech recordings: band-limit, de-reverb, equalize and compress.")]
struct Args {
    /// Audio or video file to enhance
    input: PathBuf,

    #[arg(short, long, default_value = "enhanced_audio.wav", help = "Output WAV path")]
    output: PathBuf,

    #[arg(long, help = "Load enhancement options from a JSON file")]
    options: Option<PathBuf>,

    #[arg(long, help = "Apply the 500 Hz - 8 kHz band-limiting filters")]
    noise_reduction: bool,
    #[arg(long, help = "Apply spectral de-reverberation")]
    de_reverb: bool,
    #[arg(long, help = "De-reverb intensity (0-1)")]
    intensity: Option<f32>,
    #[arg(long, help = "Equalizer low cutoff in Hz")]
    eq_low: Option<f32>,
    #[arg(long, help = "Equalizer high cutoff in Hz")]
    eq_high: Option<f32>,
    #[arg(long, help = "Apply dynamic range compression")]
    compress: bool,
    #[arg(long, allow_hyphen_values = true, help = "Compression threshold in dBFS")]
    threshold: Option<f32>,
    #[arg(long, help = "Compression ratio")]
    ratio: Option<f32>,
    #[arg(long, help = "Process every channel instead of mixing to mono")]
    keep_channels: bool,

    #[arg(long, help = "Directory to export the original and each stage output")]
    stages_dir: Option<PathBuf>,
    #[arg(long, help = "Write before/after waveform buckets as JSON")]
    waveform: Option<PathBuf>,
    #[arg(long, default_value_t = 1000, help = "Waveform bucket count")]
    buckets: usize,
    #[arg(long, help = "Write before/after spectrograms as JSON")]
    spectrogram: Option<PathBuf>,
    #[arg(long, help = "Save the effective options as JSON")]
    save_options: Option<PathBuf>,
}

impl Args {
    fn enhance_options(&self) -> EnhanceOptions {
        let mut options = match &self.options {
            Some(path) => load_options(path),
            None => EnhanceOptions::default(),
        };

        options.noise_reduction_enabled |= self.noise_reduction;
        options.de_reverb_enabled |= self.de_reverb;
        options.compression_enabled |= self.compress;
        if self.keep_channels {
            options.downmix_to_mono = false;
        }
        if let Some(intensity) = self.intensity {
            options.de_reverb_intensity = intensity;
        }
        if let Some(low) = self.eq_low {
            options.eq_low_cutoff = low;
        }
        if let Some(high) = self.eq_high {
            options.eq_high_cutoff = high;
        }
        if let Some(threshold) = self.threshold {
            options.compression_threshold_db = threshold;
        }
        if let Some(ratio) = self.ratio {
            options.compression_ratio = ratio;
        }
        options
    }
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    let content = serde_json::to_string(value)?;
    std::fs::write(path, content).with_context(|| format!("failed to write '{}'", path.display()))
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    info!("clip-enhance v{}", env!("CARGO_PKG_VERSION"));
    info!("Args: {:?}", args);

    let options = args.enhance_options();
    if let Some(path) = &args.save_options {
        save_options(path, &options)
            .with_context(|| format!("failed to save options to '{}'", path.display()))?;
    }

    let decoded = decode_file(&args.input, options.downmix_to_mono)
        .with_context(|| format!("failed to decode '{}'", args.input.display()))?;

    let mut pipeline = Pipeline::new();
    let result = enhance_signal(
        &mut pipeline,
        decoded.signal,
        &args.output,
        &options,
        args.stages_dir.as_deref(),
    )
    .context("enhancement failed")?;

    let original = pipeline.original().context("no original signal")?;
    let enhanced = pipeline.final_output().context("no enhanced output")?;

    if let Some(path) = &args.waveform {
        write_json(
            path,
            &serde_json::json!({
                "original": extract_waveform(original, args.buckets),
                "enhanced": extract_waveform(enhanced, args.buckets),
            }),
        )?;
    }

    if let Some(path) = &args.spectrogram {
        write_json(
            path,
            &serde_json::json!({
                "original": spectrogram(original)?,
                "enhanced": spectrogram(enhanced)?,
            }),
        )?;
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
