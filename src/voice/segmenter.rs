//! Utterance segmentation
//!
//! Splits the 24 kHz capture stream into utterances using RMS energy, so the
//! cloud recognizer only uploads audio that contains speech.

/// Minimum RMS energy treated as speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum speech length worth transcribing (0.3 s at 24 kHz)
const MIN_SPEECH_SAMPLES: usize = 7_200;

/// Trailing silence that ends an utterance (0.5 s at 24 kHz)
const SILENCE_SAMPLES: usize = 12_000;

/// Longest utterance before it is cut (15 s at 24 kHz)
const MAX_UTTERANCE_SAMPLES: usize = 360_000;

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Speech heard, accumulating
    Speaking,
}

/// Energy-based utterance segmenter
#[derive(Debug)]
pub struct UtteranceSegmenter {
    state: SegmenterState,
    buffer: Vec<f32>,
    silence: usize,
}

impl Default for UtteranceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl UtteranceSegmenter {
    /// Create an idle segmenter
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SegmenterState::Idle,
            buffer: Vec::new(),
            silence: 0,
        }
    }

    /// Feed samples; returns a finished utterance when one completes
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = rms_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Speaking;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.silence = 0;
                    tracing::trace!(energy, "speech started");
                }
                None
            }
            SegmenterState::Speaking => {
                self.buffer.extend_from_slice(samples);
                if is_speech {
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                if self.buffer.len() >= MAX_UTTERANCE_SAMPLES {
                    tracing::debug!(samples = self.buffer.len(), "utterance cut at maximum length");
                    return Some(self.take());
                }

                if self.silence > SILENCE_SAMPLES {
                    if self.buffer.len() - self.silence > MIN_SPEECH_SAMPLES {
                        tracing::debug!(samples = self.buffer.len(), "utterance complete");
                        return Some(self.take());
                    }
                    tracing::trace!("speech too short, discarding");
                    self.reset();
                }
                None
            }
        }
    }

    /// Drop any partial utterance
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.buffer.clear();
        self.silence = 0;
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    fn take(&mut self) -> Vec<f32> {
        let utterance = std::mem::take(&mut self.buffer);
        self.reset();
        utterance
    }
}

/// RMS energy of a block
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
