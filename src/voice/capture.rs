//! Audio capture from microphone
//!
//! The microphone pushes device-rate blocks into the event loop. The
//! [`AudioCapture`] source converts them to the protocol rate and hands them
//! on only while armed; disarming keeps the device open.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use super::frame::{AudioFrame, PROTOCOL_SAMPLE_RATE};
use super::pcm::decode_sample;
use super::resample::convert_rate;
use crate::error::MicError;
use crate::events::{Emitter, VoiceEvent};

/// Default capture block size in frames (~170 ms at 24 kHz)
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// A block of mono samples at the device rate
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    /// Mono samples
    pub samples: Vec<f32>,
    /// Device sample rate
    pub sample_rate: u32,
}

/// Processing requested from the input device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicrophoneConstraints {
    /// Request acoustic echo cancellation
    pub echo_cancellation: bool,
    /// Request noise suppression
    pub noise_suppression: bool,
    /// Frames per delivered block
    pub block_size: usize,
}

impl Default for MicrophoneConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Details of an opened input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicInfo {
    /// Device name
    pub device: String,
    /// Native sample rate
    pub sample_rate: u32,
    /// Native channel count (blocks are already downmixed)
    pub channels: u16,
}

/// Where a microphone delivers its blocks
///
/// Cheap to clone and safe to move onto an audio thread.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    emitter: Emitter,
}

impl CaptureSink {
    /// Deliver into the given session's event queue
    #[must_use]
    pub const fn new(emitter: Emitter) -> Self {
        Self { emitter }
    }

    /// Push one block; never blocks
    pub fn deliver(&self, samples: Vec<f32>, sample_rate: u32) -> bool {
        self.emitter.emit(VoiceEvent::Capture(RawBlock {
            samples,
            sample_rate,
        }))
    }

    /// Report a stream failure
    pub fn error(&self, message: impl Into<String>) {
        self.emitter.emit(VoiceEvent::CaptureError(message.into()));
    }
}

/// A push-based input device
///
/// Implementations invoke the sink once per fixed-size block for as long as
/// the device is open.
pub trait Microphone {
    /// Acquire the device and start the stream immediately
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if access is refused or
    /// `DeviceUnavailable` if there is no usable input device
    fn open(
        &mut self,
        constraints: &MicrophoneConstraints,
        sink: CaptureSink,
    ) -> Result<MicInfo, MicError>;

    /// Stop the stream and release the device
    fn close(&mut self);
}

/// The capture source: exclusive owner of the microphone handle
pub struct AudioCapture {
    mic: Box<dyn Microphone>,
    constraints: MicrophoneConstraints,
    info: Option<MicInfo>,
    armed: bool,
}

impl AudioCapture {
    /// Wrap a microphone; nothing is opened yet
    #[must_use]
    pub fn new(mic: Box<dyn Microphone>, constraints: MicrophoneConstraints) -> Self {
        Self {
            mic,
            constraints,
            info: None,
            armed: false,
        }
    }

    /// Open the device, starting in the disarmed state
    ///
    /// Opening an already open source returns the existing device info.
    ///
    /// # Errors
    ///
    /// Returns the microphone's [`MicError`] when the device cannot be acquired
    pub fn open(&mut self, sink: CaptureSink) -> Result<&MicInfo, MicError> {
        let info = match self.info.take() {
            Some(info) => info,
            None => {
                let info = self.mic.open(&self.constraints, sink).inspect_err(|e| {
                    tracing::warn!(error = %e, "failed to open microphone");
                })?;
                tracing::info!(
                    device = %info.device,
                    sample_rate = info.sample_rate,
                    channels = info.channels,
                    echo_cancellation = self.constraints.echo_cancellation,
                    noise_suppression = self.constraints.noise_suppression,
                    "microphone opened"
                );
                info
            }
        };
        Ok(&*self.info.insert(info))
    }

    /// Start forwarding captured blocks
    pub fn arm(&mut self) {
        if self.info.is_some() && !self.armed {
            self.armed = true;
            tracing::debug!("capture armed");
        }
    }

    /// Stop forwarding; the device stays open
    pub fn disarm(&mut self) {
        if self.armed {
            self.armed = false;
            tracing::debug!("capture disarmed");
        }
    }

    /// Release the device; safe to call repeatedly
    pub fn close(&mut self) {
        self.armed = false;
        if self.info.take().is_some() {
            self.mic.close();
            tracing::info!("microphone released");
        }
    }

    /// Convert a raw block to a protocol-rate frame
    ///
    /// Returns `None` while disarmed or closed, so nothing leaves the source
    /// unless it is armed.
    #[must_use]
    pub fn process(&self, block: RawBlock) -> Option<AudioFrame> {
        if !self.armed || block.samples.is_empty() {
            return None;
        }
        let converted = convert_rate(&block.samples, block.sample_rate, PROTOCOL_SAMPLE_RATE);
        Some(AudioFrame::new(converted.into_owned()))
    }

    /// Whether blocks are being forwarded
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether the device is held
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.info.is_some()
    }

    /// Info about the open device
    #[must_use]
    pub const fn info(&self) -> Option<&MicInfo> {
        self.info.as_ref()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// Captures from the default input device with cpal
#[derive(Default)]
pub struct CpalMicrophone {
    stream: Option<Stream>,
}

impl CpalMicrophone {
    /// Create an unopened microphone
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Microphone for CpalMicrophone {
    fn open(
        &mut self,
        constraints: &MicrophoneConstraints,
        sink: CaptureSink,
    ) -> Result<MicInfo, MicError> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| MicError::DeviceUnavailable("no input device available".to_string()))?;

        let supported = device
            .default_input_config()
            .map_err(|e| classify_device_error(&e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let format = supported.sample_format();
        let config: StreamConfig = supported.into();

        // Echo cancellation and noise suppression come from the OS input chain
        tracing::debug!(
            echo_cancellation = constraints.echo_cancellation,
            noise_suppression = constraints.noise_suppression,
            "input processing left to the host audio stack"
        );

        let mut blocks = BlockAccumulator::new(
            constraints.block_size,
            channels,
            sample_rate,
            sink.clone(),
        );
        let error_sink = sink;
        let on_error = move |err: cpal::StreamError| {
            tracing::error!(error = %err, "audio capture error");
            error_sink.error(err.to_string());
        };

        let stream = match format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    blocks.push(data.iter().copied());
                },
                on_error,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    blocks.push(data.iter().map(|&s| decode_sample(s)));
                },
                on_error,
                None,
            ),
            other => {
                return Err(MicError::DeviceUnavailable(format!(
                    "unsupported input sample format {other:?}"
                )));
            }
        }
        .map_err(|e| classify_device_error(&e.to_string()))?;

        stream
            .play()
            .map_err(|e| classify_device_error(&e.to_string()))?;
        self.stream = Some(stream);

        Ok(MicInfo {
            device: device.name().unwrap_or_default(),
            sample_rate,
            channels,
        })
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

/// Map a backend error message onto the capture error taxonomy
fn classify_device_error(message: &str) -> MicError {
    let lower = message.to_lowercase();
    if lower.contains("permission")
        || lower.contains("denied")
        || lower.contains("not authorized")
        || lower.contains("not permitted")
    {
        MicError::PermissionDenied(message.to_string())
    } else {
        MicError::DeviceUnavailable(message.to_string())
    }
}

/// Downmixes interleaved samples and cuts them into fixed-size blocks
struct BlockAccumulator {
    block_size: usize,
    channels: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    sink: CaptureSink,
}

impl BlockAccumulator {
    fn new(block_size: usize, channels: u16, sample_rate: u32, sink: CaptureSink) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            channels: usize::from(channels.max(1)),
            sample_rate,
            pending: Vec::with_capacity(block_size),
            sink,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn push(&mut self, interleaved: impl Iterator<Item = f32>) {
        let mut frame_sum = 0.0;
        let mut in_frame = 0;
        for sample in interleaved {
            frame_sum += sample;
            in_frame += 1;
            if in_frame == self.channels {
                self.pending.push(frame_sum / self.channels as f32);
                frame_sum = 0.0;
                in_frame = 0;
                if self.pending.len() == self.block_size {
                    let block = std::mem::replace(
                        &mut self.pending,
                        Vec::with_capacity(self.block_size),
                    );
                    self.sink.deliver(block, self.sample_rate);
                }
            }
        }
    }
}
