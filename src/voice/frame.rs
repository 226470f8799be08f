//! Protocol-rate audio frames

use std::time::Duration;

/// Sample rate of every frame on the wire (mono)
pub const PROTOCOL_SAMPLE_RATE: u32 = 24_000;

/// An immutable block of mono samples at [`PROTOCOL_SAMPLE_RATE`]
///
/// Frames are moved, never cloned: a captured frame is consumed by the
/// transport, a received frame by the playback queue.
#[derive(Debug, PartialEq)]
pub struct AudioFrame {
    samples: Box<[f32]>,
}

impl AudioFrame {
    /// Wrap protocol-rate samples
    #[must_use]
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
        }
    }

    /// Samples in playback order
    #[must_use]
    pub const fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples
    #[must_use]
    pub const fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame carries no audio
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration at the protocol rate
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(PROTOCOL_SAMPLE_RATE))
    }

    /// Take ownership of the samples
    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_at_protocol_rate() {
        let frame = AudioFrame::new(vec![0.0; 2400]);
        assert_eq!(frame.len(), 2400);
        assert_eq!(frame.duration(), Duration::from_millis(100));
    }

    #[test]
    fn empty_frame() {
        let frame = AudioFrame::new(Vec::new());
        assert!(frame.is_empty());
        assert_eq!(frame.duration(), Duration::ZERO);
    }
}
