//! # WAV Payload Decoding
//!
//! Parses a WAV container out of a request payload and normalizes it for the
//! model: samples become f32 in [-1.0, 1.0], channels are downmixed to mono,
//! and everything is resampled to 16 kHz. Anything that cannot be read this
//! way comes back as a [`DecodeError`], never a panic; the caller turns that
//! into an empty-string reply.

use crate::error::DecodeError;
use std::io::Cursor;

/// Sample rate the acoustic model expects.
pub const MODEL_SAMPLE_RATE: u32 = 16_000;

/// Decode one request payload into mono 16 kHz f32 samples.
pub fn decode_wav_payload(payload: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::EmptyAudio);
    }

    let mut reader = Cursor::new(payload);
    let (header, data) = wav::read(&mut reader)
        .map_err(|e| DecodeError::InvalidFormat(format!("not a readable WAV clip: {}", e)))?;

    if header.channel_count == 0 {
        return Err(DecodeError::InvalidFormat(
            "WAV header declares zero channels".to_string(),
        ));
    }

    let samples = normalize(data)?;
    let mono = downmix(&samples, header.channel_count as usize);
    if mono.is_empty() {
        return Err(DecodeError::EmptyAudio);
    }

    Ok(resample(&mono, header.sampling_rate, MODEL_SAMPLE_RATE))
}

/// Convert whatever bit depth the container carries to f32 in [-1.0, 1.0].
fn normalize(data: wav::BitDepth) -> Result<Vec<f32>, DecodeError> {
    let samples = match data {
        // 8-bit WAV is unsigned with a 128 midpoint.
        wav::BitDepth::Eight(s) => s.iter().map(|&v| (v as f32 - 128.0) / 128.0).collect(),
        wav::BitDepth::Sixteen(s) => s.iter().map(|&v| v as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(s) => s.iter().map(|&v| v as f32 / 8_388_608.0).collect(),
        wav::BitDepth::ThirtyTwoFloat(s) => s,
        wav::BitDepth::Empty => Vec::new(),
    };

    if samples.is_empty() {
        return Err(DecodeError::EmptyAudio);
    }

    Ok(samples)
}

/// Average interleaved channels down to one.
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampler.
///
/// Speech models tolerate this fine; the fidelity loss against a windowed-sinc
/// resampler is inaudible next to telephony-grade source audio.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64 / ratio).round() as usize).max(1);
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx];
            let b = samples[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an in-memory WAV clip from 16-bit samples.
    fn wav_bytes(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, channels, sample_rate, 16);
        let mut out = Cursor::new(Vec::new());
        wav::write(header, &wav::BitDepth::Sixteen(samples.to_vec()), &mut out).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_mono_16k_passthrough() {
        let payload = wav_bytes(1, 16_000, &[0, 16384, -16384, 32767]);
        let pcm = decode_wav_payload(&payload).unwrap();
        assert_eq!(pcm.len(), 4);
        assert!((pcm[1] - 0.5).abs() < 1e-3);
        assert!((pcm[2] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_stereo_downmix_averages_channels() {
        // L = 1000, R = 3000 on every frame; the mix should sit at 2000.
        let payload = wav_bytes(2, 16_000, &[1000, 3000, 1000, 3000]);
        let pcm = decode_wav_payload(&payload).unwrap();
        assert_eq!(pcm.len(), 2);
        for sample in pcm {
            assert!((sample - 2000.0 / 32768.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_resample_8k_doubles_sample_count() {
        let samples: Vec<i16> = (0..800).map(|i| (i % 100) as i16 * 100).collect();
        let payload = wav_bytes(1, 8_000, &samples);
        let pcm = decode_wav_payload(&payload).unwrap();
        // 800 samples at 8 kHz cover 100ms, which is 1600 samples at 16 kHz.
        assert!((pcm.len() as i64 - 1600).abs() <= 2);
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(
            decode_wav_payload(&[]),
            Err(DecodeError::EmptyAudio)
        ));
    }

    #[test]
    fn test_garbage_payload_rejected() {
        let garbage = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01, 0x02, 0x03];
        assert!(matches!(
            decode_wav_payload(&garbage),
            Err(DecodeError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_truncated_container_rejected() {
        let mut payload = wav_bytes(1, 16_000, &[1, 2, 3, 4, 5, 6, 7, 8]);
        payload.truncate(20);
        assert!(decode_wav_payload(&payload).is_err());
    }

    #[test]
    fn test_headers_without_samples_rejected() {
        let payload = wav_bytes(1, 16_000, &[]);
        assert!(decode_wav_payload(&payload).is_err());
    }
}
