//! PCM conversion helpers shared by the microphone path and playback

/// Convert any cpal sample type to f32 in [-1.0, 1.0].
pub fn sample_to_f32<T>(sample: T) -> f32
where
    T: cpal::Sample,
    f32: cpal::FromSample<T>,
{
    <f32 as cpal::Sample>::from_sample(sample)
}

pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Average interleaved frames down to a single channel.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Little-endian PCM16 bytes.
pub fn pcm16_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|&s| s.to_le_bytes()).collect()
}

/// Resample PCM16 audio from `source_rate` to `target_rate`.
///
/// Integer down-ratios (48kHz → 16kHz) average each group of samples;
/// any other ratio falls back to linear interpolation.
pub fn resample(samples: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
    if target_rate == 0 || source_rate == 0 {
        log::warn!(
            "Invalid sample rate (source: {}, target: {}), returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    if source_rate == target_rate {
        return samples.to_vec();
    }

    if source_rate > target_rate && source_rate % target_rate == 0 {
        let ratio = (source_rate / target_rate) as usize;
        return samples
            .chunks(ratio)
            .map(|chunk| {
                // i64 prevents overflow with large chunks
                let sum: i64 = chunk.iter().map(|&s| s as i64).sum();
                (sum / chunk.len() as i64) as i16
            })
            .collect();
    }

    resample_linear(samples, source_rate, target_rate)
}

fn resample_linear(samples: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
    if samples.is_empty() {
        return Vec::new();
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = pos - idx as f64;
            let a = samples[idx.min(last)] as f64;
            let b = samples[(idx + 1).min(last)] as f64;
            (a + (b - a) * frac).round() as i16
        })
        .collect()
}

/// Linear resample of float audio, used when a decoded buffer's rate differs
/// from the output device rate.
pub fn resample_f32(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if samples.is_empty() || source_rate == 0 || target_rate == 0 || source_rate == target_rate {
        return samples.to_vec();
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(last)];
            let b = samples[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-1.0), -i16::MAX);
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
    }

    #[test]
    fn test_sample_to_f32_from_i16() {
        assert_eq!(sample_to_f32(0i16), 0.0);
        assert!((sample_to_f32(i16::MIN) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix_to_mono(&[0.5, -0.5, 1.0, 0.0], 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn test_pcm16_little_endian() {
        assert_eq!(pcm16_le_bytes(&[0x1234, 0x5678]), vec![0x34, 0x12, 0x78, 0x56]);
    }

    #[test]
    fn test_resample_integer_ratio_averages() {
        // 48kHz → 16kHz (3:1)
        let input = vec![100i16, 200, 300, 400, 500, 600];
        assert_eq!(resample(&input, 48000, 16000), vec![200, 500]);
    }

    #[test]
    fn test_resample_same_rate() {
        let input = vec![100i16, 200, 300];
        assert_eq!(resample(&input, 16000, 16000), input);
    }

    #[test]
    fn test_resample_non_integer_ratio_is_linear() {
        // 44.1kHz → 16kHz
        let input = vec![1000i16; 441];
        let output = resample(&input, 44100, 16000);
        assert_eq!(output.len(), 160);
        assert!(output.iter().all(|&s| s == 1000));
    }

    #[test]
    fn test_resample_zero_rate_returns_original() {
        let input = vec![100i16, 200, 300];
        assert_eq!(resample(&input, 48000, 0), input);
        assert_eq!(resample(&input, 0, 16000), input);
    }

    #[test]
    fn test_resample_f32_upsample_doubles_length() {
        let output = resample_f32(&[0.0, 1.0], 24000, 48000);
        assert_eq!(output.len(), 4);
        assert_eq!(output[0], 0.0);
        assert!((output[1] - 0.5).abs() < 1e-6);
    }
}
