//! Decoding uploaded media into pipeline signals

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio_util::Signal;
use crate::error::EnhanceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMetadata {
    pub duration: f64,
    pub sample_rate: u32,
    /// Channel count of the source stream (before any downmix)
    pub channels: u32,
    pub bit_depth: u32,
    pub format: String,
}

/// A decoded file ready for the pipeline
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub signal: Signal,
    pub metadata: AudioMetadata,
}

/// Decode the first audio track of `path` (audio files or audio-in-video
/// containers). Samples land in the 16-bit domain; with `downmix_to_mono`
/// all channels are averaged into one.
pub fn decode_file(path: &Path, downmix_to_mono: bool) -> Result<DecodedAudio, EnhanceError> {
    let file = File::open(path)
        .map_err(|e| EnhanceError::Decode(format!("Failed to open {}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let format_opts = FormatOptions::default();
    let metadata_opts = MetadataOptions::default();
    let decoder_opts = DecoderOptions::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .map_err(|e| EnhanceError::Decode(format!("Failed to probe format: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| EnhanceError::Decode("No audio tracks found".into()))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let bit_depth = codec_params.bits_per_sample.unwrap_or(16);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &decoder_opts)
        .map_err(|e| EnhanceError::Decode(format!("Failed to create decoder: {}", e)))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut skipped_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(symphonia::core::errors::Error::ResetRequired) => break,
            Err(e) => return Err(EnhanceError::Decode(format!("Error reading packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                skipped_packets += 1;
                log::warn!("Skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(EnhanceError::Decode(format!("Decoder failed: {}", e))),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count();

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(sample_buf.samples());
    }

    if interleaved.is_empty() || channels == 0 || sample_rate == 0 {
        return Err(EnhanceError::Decode(format!(
            "No audio decoded from {}",
            path.display()
        )));
    }
    if skipped_packets > 0 {
        log::warn!("{} packets could not be decoded and were skipped", skipped_packets);
    }

    let channel_count = u16::try_from(channels)
        .map_err(|_| EnhanceError::Decode(format!("Unsupported channel count {}", channels)))?;
    let decoded = Signal::from_normalized(&interleaved, sample_rate, channel_count)?;

    let metadata = AudioMetadata {
        duration: decoded.duration_secs(),
        sample_rate,
        channels: channels as u32,
        bit_depth,
        format: path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("unknown")
            .to_uppercase(),
    };

    log::info!(
        "Decoded {}: {:.2}s, {} Hz, {} ch",
        path.display(),
        metadata.duration,
        sample_rate,
        channels
    );

    let signal = if downmix_to_mono { decoded.downmix() } else { decoded };

    Ok(DecodedAudio { signal, metadata })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_pcm16(path: &Path, channels: u16, frames: &[i16]) {
        let spec = WavSpec {
            channels,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in frames {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_decode_wav_into_16_bit_domain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<i16> = (0..2205).map(|i| ((i % 200) as i16 - 100) * 300).collect();
        write_pcm16(&path, 1, &samples);

        let decoded = decode_file(&path, true).unwrap();
        assert_eq!(decoded.metadata.sample_rate, 22050);
        assert_eq!(decoded.metadata.channels, 1);
        assert_eq!(decoded.signal.frames(), samples.len());
        for (a, b) in samples.iter().zip(decoded.signal.samples()) {
            assert!((*a as f32 - b).abs() <= 1.0);
        }
    }

    #[test]
    fn test_decode_stereo_downmix_and_keep() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let frames: Vec<i16> = (0..1000).flat_map(|_| [8000i16, 0]).collect();
        write_pcm16(&path, 2, &frames);

        let mono = decode_file(&path, true).unwrap();
        assert_eq!(mono.signal.channels(), 1);
        assert_eq!(mono.metadata.channels, 2);
        assert!(mono.signal.samples().iter().all(|s| (s - 4000.0).abs() <= 1.0));

        let stereo = decode_file(&path, false).unwrap();
        assert_eq!(stereo.signal.channels(), 2);
        assert_eq!(stereo.signal.frames(), 1000);
    }

    #[test]
    fn test_garbage_input_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not a RIFF stream").unwrap();

        let err = decode_file(&path, true).unwrap_err();
        assert!(matches!(err, EnhanceError::Decode(_)));
    }

    #[test]
    fn test_missing_file_is_a_decode_error() {
        let err = decode_file(Path::new("/nonexistent/input.mp3"), true).unwrap_err();
        assert!(matches!(err, EnhanceError::Decode(_)));
    }
}
