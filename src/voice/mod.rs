//! Voice processing module
//!
//! Client-side real-time audio pipeline: capture and rate conversion,
//! PCM16 framing, ordered playback, turn state and the optional local
//! recognition fallback.

mod capture;
mod frame;
pub mod pcm;
mod playback;
mod recognition;
pub mod resample;
mod segmenter;
mod state;
mod stt;

pub use capture::{
    AudioCapture, CaptureSink, CpalMicrophone, DEFAULT_BLOCK_SIZE, MicInfo, Microphone,
    MicrophoneConstraints, RawBlock,
};
pub use frame::{AudioFrame, PROTOCOL_SAMPLE_RATE};
pub use playback::{
    AudioOutput, CpalSpeaker, NowPlaying, PlaybackDone, PlaybackItem, PlaybackQueue,
    resample_for_device,
};
pub use recognition::{
    DEFAULT_RESTART_DELAY, LocalRecognitionFallback, NullRecognizer, RecognitionEvent,
    RecognitionSink, SpeechRecognizer,
};
pub use segmenter::{SegmenterState, UtteranceSegmenter, rms_energy};
pub use state::{Transition, TurnState, TurnStateMachine, UnknownState};
pub use stt::{CloudRecognizer, SpeechToText, SttProvider, classify_status, samples_to_wav};
