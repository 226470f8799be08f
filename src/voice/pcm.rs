//! PCM16 little-endian wire codec

/// Bytes per encoded sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Quantize one float sample to a signed 16-bit integer
///
/// The input is clamped to [-1, 1]. Negative values scale by 32768 and
/// non-negative values by 32767, so both extremes land exactly on
/// `i16::MIN` / `i16::MAX` without wrapping.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_sample(sample: f32) -> i16 {
    // NaN clamps to NaN; treat it as silence
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32768.0).round() as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

/// Recover a float in [-1, 1) from a 16-bit sample
#[must_use]
pub fn decode_sample(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Encode samples as PCM16 little-endian bytes
#[must_use]
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        out.extend_from_slice(&encode_sample(sample).to_le_bytes());
    }
    out
}

/// Decode PCM16 little-endian bytes into float samples
///
/// A trailing odd byte cannot form a sample and is ignored.
#[must_use]
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| decode_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extremes_map_to_integer_limits() {
        assert_eq!(encode_sample(1.0), i16::MAX);
        assert_eq!(encode_sample(-1.0), i16::MIN);
        assert_eq!(encode_sample(0.0), 0);
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        assert_eq!(encode_sample(3.5), i16::MAX);
        assert_eq!(encode_sample(-7.0), i16::MIN);
        assert_eq!(encode_sample(f32::NAN), 0);
    }

    #[test]
    fn little_endian_layout() {
        let bytes = encode_pcm16(&[1.0, -1.0]);
        assert_eq!(bytes, vec![0xFF, 0x7F, 0x00, 0x80]);
    }

    #[test]
    fn decode_ignores_trailing_byte() {
        let samples = decode_pcm16(&[0x00, 0x40, 0x01]);
        assert_eq!(samples, vec![0.5]);
    }

    #[test]
    fn decode_range() {
        assert!((decode_sample(i16::MIN) + 1.0).abs() < f32::EPSILON);
        assert!(decode_sample(i16::MAX) < 1.0);
    }
}
