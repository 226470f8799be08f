//! Capture-side sample rate conversion
//!
//! Stateless linear interpolation applied to each capture block on its own.
//! Nothing is carried between blocks, so the sample straddling a block seam
//! is interpolated against the block's own last sample rather than the next
//! block's first one.

use std::borrow::Cow;

/// Number of output samples produced for `input_len` samples
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn converted_len(input_len: usize, source_rate: u32, target_rate: u32) -> usize {
    if source_rate == 0 || target_rate == 0 {
        return 0;
    }
    (input_len as f64 * f64::from(target_rate) / f64::from(source_rate)).round() as usize
}

/// Convert a block from `source_rate` to `target_rate`
///
/// Produces `round(N * target / source)` samples. Each output sample is a
/// linear blend of the two source samples around its fractional position.
/// Equal rates return the input unchanged without copying; a zero rate
/// yields an empty block.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn convert_rate(samples: &[f32], source_rate: u32, target_rate: u32) -> Cow<'_, [f32]> {
    if source_rate == target_rate {
        return Cow::Borrowed(samples);
    }

    let out_len = converted_len(samples.len(), source_rate, target_rate);
    if samples.is_empty() || out_len == 0 {
        return Cow::Owned(Vec::new());
    }

    let step = f64::from(source_rate) / f64::from(target_rate);
    let last = samples.len() - 1;

    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * step;
        let idx = (pos.floor() as usize).min(last);
        let frac = (pos - idx as f64).clamp(0.0, 1.0) as f32;

        let a = samples[idx];
        let b = samples[(idx + 1).min(last)];
        out.push((b - a).mul_add(frac, a));
    }

    Cow::Owned(out)
}
