//! Audio playback to speakers
//!
//! [`PlaybackQueue`] serializes decoded frames: one item plays at a time, in
//! arrival order, and a new arrival never interrupts the item in progress.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use super::frame::{AudioFrame, PROTOCOL_SAMPLE_RATE};
use crate::{Error, Result};

type Notify = Arc<dyn Fn(u64) + Send + Sync>;

/// Completion token for one playback item
///
/// The output reports completion by calling [`PlaybackDone::finish`] or by
/// dropping the token. Either way the queue is notified exactly once.
pub struct PlaybackDone {
    seq: u64,
    notify: Notify,
}

impl PlaybackDone {
    /// Sequence number of the item this token belongs to
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Report that the item has finished playing
    pub fn finish(self) {}
}

impl Drop for PlaybackDone {
    fn drop(&mut self) {
        (self.notify)(self.seq);
    }
}

impl std::fmt::Debug for PlaybackDone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackDone").field("seq", &self.seq).finish()
    }
}

/// A speaker that plays one buffer at a time
pub trait AudioOutput {
    /// Start playing protocol-rate samples
    ///
    /// `done` must be finished or dropped once the samples have played.
    ///
    /// # Errors
    ///
    /// Returns error if the output cannot accept the buffer; the token is
    /// dropped in that case, so the queue still advances
    fn play(&mut self, samples: Vec<f32>, done: PlaybackDone) -> Result<()>;
}

/// A queued frame and its enqueue order
#[derive(Debug)]
pub struct PlaybackItem {
    /// Enqueue order, starting at 0
    pub seq: u64,
    /// Decoded audio
    pub frame: AudioFrame,
}

/// The item currently handed to the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NowPlaying {
    /// Enqueue order of the item
    pub seq: u64,
    /// Number of samples in the item
    pub samples: usize,
}

/// Strict FIFO, non-overlapping playback
pub struct PlaybackQueue {
    output: Box<dyn AudioOutput>,
    notify: Notify,
    pending: VecDeque<PlaybackItem>,
    playing: Option<NowPlaying>,
    next_seq: u64,
}

impl PlaybackQueue {
    /// Create an idle queue
    ///
    /// `notify` receives the sequence number of each finished item and must
    /// route it back to [`PlaybackQueue::on_finished`].
    pub fn new(output: Box<dyn AudioOutput>, notify: impl Fn(u64) + Send + Sync + 'static) -> Self {
        Self {
            output,
            notify: Arc::new(notify),
            pending: VecDeque::new(),
            playing: None,
            next_seq: 0,
        }
    }

    /// Append a frame; starts playback immediately when idle
    pub fn enqueue(&mut self, frame: AudioFrame) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::trace!(seq, samples = frame.len(), "playback enqueued");
        self.pending.push_back(PlaybackItem { seq, frame });

        if self.playing.is_none() {
            self.start_next();
        }
        seq
    }

    /// Item `seq` finished; start the next one or go idle
    pub fn on_finished(&mut self, seq: u64) {
        match self.playing {
            Some(now) if now.seq == seq => {
                self.playing = None;
                self.start_next();
            }
            _ => tracing::debug!(seq, "ignoring completion for an item that is not playing"),
        }
    }

    /// Item currently playing
    #[must_use]
    pub const fn now_playing(&self) -> Option<NowPlaying> {
        self.playing
    }

    /// Items waiting behind the current one
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Nothing playing and nothing waiting
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.playing.is_none() && self.pending.is_empty()
    }

    fn start_next(&mut self) {
        let Some(item) = self.pending.pop_front() else {
            tracing::trace!("playback idle");
            return;
        };

        self.playing = Some(NowPlaying {
            seq: item.seq,
            samples: item.frame.len(),
        });
        let done = PlaybackDone {
            seq: item.seq,
            notify: Arc::clone(&self.notify),
        };

        // On failure the token is dropped and its completion advances the queue
        if let Err(e) = self.output.play(item.frame.into_samples(), done) {
            tracing::warn!(seq = item.seq, error = %e, "playback failed");
        }
    }
}

/// Time the output is given to drain its last buffer after the speaker is dropped
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How long before a buffer runs dry its completion is reported
///
/// The next item then lands in the device queue behind the tail of the
/// current one instead of after a gap of silence.
const COMPLETION_LEAD: Duration = Duration::from_millis(50);

struct Job {
    samples: Vec<f32>,
    done: PlaybackDone,
}

struct Cursor {
    samples: Vec<f32>,
    pos: usize,
    done: Option<PlaybackDone>,
}

type SharedJobs = Arc<Mutex<VecDeque<Cursor>>>;

/// Plays to the default output device with cpal
///
/// The stream lives on its own thread. Dropping the speaker lets the buffer
/// in flight finish before the stream is closed.
pub struct CpalSpeaker {
    jobs: std_mpsc::Sender<Job>,
    device_rate: u32,
}

impl CpalSpeaker {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device or stream configuration is usable
    pub fn new() -> Result<Self> {
        let (jobs_tx, jobs_rx) = std_mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<std::result::Result<u32, String>>(1);

        std::thread::Builder::new()
            .name("compita-playback".to_string())
            .spawn(move || run_output(&jobs_rx, &ready_tx))?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| Error::Audio("playback thread exited during startup".to_string()))?
            .map_err(Error::Audio)?;

        Ok(Self {
            jobs: jobs_tx,
            device_rate,
        })
    }

    /// Sample rate the device runs at
    #[must_use]
    pub const fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

impl AudioOutput for CpalSpeaker {
    fn play(&mut self, samples: Vec<f32>, done: PlaybackDone) -> Result<()> {
        let samples = resample_for_device(samples, self.device_rate)?;
        self.jobs
            .send(Job { samples, done })
            .map_err(|_| Error::Audio("playback thread exited".to_string()))
    }
}

/// Body of the playback thread
fn run_output(
    jobs: &std_mpsc::Receiver<Job>,
    ready: &std_mpsc::SyncSender<std::result::Result<u32, String>>,
) {
    let shared: SharedJobs = Arc::new(Mutex::new(VecDeque::new()));

    let (stream, rate) = match open_output_stream(Arc::clone(&shared)) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(rate));

    while let Ok(job) = jobs.recv() {
        match shared.lock() {
            Ok(mut queue) => queue.push_back(Cursor {
                samples: job.samples,
                pos: 0,
                done: Some(job.done),
            }),
            Err(_) => tracing::error!("playback state poisoned, dropping buffer"),
        }
    }

    let deadline = Instant::now() + remaining(&shared, rate) + DRAIN_GRACE;
    while !is_drained(&shared) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    tracing::debug!("playback stream closed");
}

fn open_output_stream(shared: SharedJobs) -> Result<(Stream, u32)> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    // Prefer a native protocol-rate config (mono, then stereo) to skip resampling
    let native = [1u16, 2].into_iter().find_map(|channels| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(PROTOCOL_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PROTOCOL_SAMPLE_RATE)
        })
    });

    let config: StreamConfig = match native {
        Some(supported) => supported
            .with_sample_rate(SampleRate(PROTOCOL_SAMPLE_RATE))
            .config(),
        None => device
            .default_output_config()
            .map_err(|e| Error::Audio(e.to_string()))?
            .config(),
    };

    let channels = usize::from(config.channels.max(1));
    let rate = config.sample_rate.0;
    let lead = lead_samples(rate);

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = rate,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut queue) = shared.lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(channels) {
                    frame.fill(next_sample(&mut queue, lead));
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok((stream, rate))
}

fn lead_samples(rate: u32) -> usize {
    let samples = u128::from(rate) * COMPLETION_LEAD.as_millis() / 1000;
    usize::try_from(samples).unwrap_or(usize::MAX)
}

/// Pull the next output sample, retiring finished buffers
///
/// A buffer's completion fires once `lead` samples or fewer are left in it,
/// so the following buffer is queued before this one runs out. Buffers still
/// play strictly one after another.
fn next_sample(queue: &mut VecDeque<Cursor>, lead: usize) -> f32 {
    while let Some(cursor) = queue.front_mut() {
        if let Some(&sample) = cursor.samples.get(cursor.pos) {
            cursor.pos += 1;
            if cursor.samples.len() - cursor.pos <= lead {
                cursor.done.take();
            }
            return sample;
        }
        // empty buffers complete here
        queue.pop_front();
    }
    0.0
}

fn is_drained(shared: &SharedJobs) -> bool {
    shared.lock().map_or(true, |queue| queue.is_empty())
}

fn remaining(shared: &SharedJobs, rate: u32) -> Duration {
    let samples: usize = shared.lock().map_or(0, |queue| {
        queue.iter().map(|c| c.samples.len() - c.pos).sum()
    });
    Duration::from_millis((samples as u64 * 1000) / u64::from(rate.max(1)))
}

/// Resample a protocol-rate buffer for a device running at `device_rate`
///
/// Each buffer is resampled on its own; the resampler is rebuilt per call.
///
/// # Errors
///
/// Returns error if the resampler rejects the rate pair
pub fn resample_for_device(samples: Vec<f32>, device_rate: u32) -> Result<Vec<f32>> {
    if device_rate == PROTOCOL_SAMPLE_RATE || samples.is_empty() {
        return Ok(samples);
    }

    let ratio = f64::from(device_rate) / f64::from(PROTOCOL_SAMPLE_RATE);
    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, samples.len(), 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let output = resampler
        .process(&[samples.as_slice()], None)
        .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;

    Ok(output.into_iter().next().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorded {
        started: Vec<(u64, usize)>,
        tokens: Vec<PlaybackDone>,
        overlap: bool,
    }

    struct RecordingOutput {
        log: Arc<Mutex<Recorded>>,
    }

    impl AudioOutput for RecordingOutput {
        fn play(&mut self, samples: Vec<f32>, done: PlaybackDone) -> Result<()> {
            let mut log = self.log.lock().unwrap();
            if !log.tokens.is_empty() {
                log.overlap = true;
            }
            log.started.push((done.seq(), samples.len()));
            log.tokens.push(done);
            Ok(())
        }
    }

    struct FailingOutput;

    impl AudioOutput for FailingOutput {
        fn play(&mut self, _samples: Vec<f32>, _done: PlaybackDone) -> Result<()> {
            Err(Error::Audio("device gone".to_string()))
        }
    }

    fn queue() -> (PlaybackQueue, Arc<Mutex<Recorded>>, Arc<Mutex<Vec<u64>>>) {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let finished = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&finished);
        let queue = PlaybackQueue::new(
            Box::new(RecordingOutput {
                log: Arc::clone(&log),
            }),
            move |seq| sink.lock().unwrap().push(seq),
        );
        (queue, log, finished)
    }

    /// Let the output finish whatever it is playing and report back to the queue
    fn finish_current(
        queue: &mut PlaybackQueue,
        log: &Arc<Mutex<Recorded>>,
        finished: &Arc<Mutex<Vec<u64>>>,
    ) {
        let token = log.lock().unwrap().tokens.pop().unwrap();
        token.finish();
        let seq = finished.lock().unwrap().pop().unwrap();
        queue.on_finished(seq);
    }

    fn frame(len: usize) -> AudioFrame {
        AudioFrame::new(vec![0.1; len])
    }

    #[test]
    fn plays_in_fifo_order_without_overlap() {
        let (mut queue, log, finished) = queue();
        queue.enqueue(frame(10));
        queue.enqueue(frame(20));
        queue.enqueue(frame(30));

        // only the head started
        assert_eq!(log.lock().unwrap().started, vec![(0, 10)]);
        assert_eq!(queue.pending(), 2);

        finish_current(&mut queue, &log, &finished);
        finish_current(&mut queue, &log, &finished);
        finish_current(&mut queue, &log, &finished);

        let log = log.lock().unwrap();
        assert_eq!(log.started, vec![(0, 10), (1, 20), (2, 30)]);
        assert!(!log.overlap);
        assert!(queue.is_idle());
    }

    #[test]
    fn enqueue_during_playback_does_not_preempt() {
        let (mut queue, log, finished) = queue();
        queue.enqueue(frame(10));
        queue.enqueue(frame(5));

        assert_eq!(queue.now_playing(), Some(NowPlaying { seq: 0, samples: 10 }));
        assert_eq!(log.lock().unwrap().started.len(), 1);

        finish_current(&mut queue, &log, &finished);
        assert_eq!(queue.now_playing(), Some(NowPlaying { seq: 1, samples: 5 }));
    }

    #[test]
    fn stale_completion_is_ignored() {
        let (mut queue, log, _) = queue();
        queue.enqueue(frame(10));
        queue.enqueue(frame(10));
        queue.on_finished(1);
        assert_eq!(queue.now_playing().unwrap().seq, 0);
        assert_eq!(log.lock().unwrap().started.len(), 1);
    }

    #[test]
    fn failed_play_still_reports_completion() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&finished);
        let mut queue = PlaybackQueue::new(Box::new(FailingOutput), move |seq| {
            sink.lock().unwrap().push(seq);
        });

        queue.enqueue(frame(10));
        assert_eq!(*finished.lock().unwrap(), vec![0]);

        queue.on_finished(0);
        assert!(queue.is_idle());
    }

    #[test]
    fn dropped_token_notifies_once() {
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let token = PlaybackDone {
            seq: 4,
            notify: Arc::new(move |_| *counter.lock().unwrap() += 1),
        };
        drop(token);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn cursor_retires_finished_buffers() {
        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notified);
        let notify: Notify = Arc::new(move |seq| sink.lock().unwrap().push(seq));

        let mut queue = VecDeque::new();
        queue.push_back(cursor(vec![0.5, 0.5], 0, &notify));
        queue.push_back(cursor(vec![0.25], 1, &notify));

        assert!((next_sample(&mut queue, 0) - 0.5).abs() < f32::EPSILON);
        assert!(notified.lock().unwrap().is_empty());
        assert!((next_sample(&mut queue, 0) - 0.5).abs() < f32::EPSILON);
        assert_eq!(*notified.lock().unwrap(), vec![0]);
        assert!((next_sample(&mut queue, 0) - 0.25).abs() < f32::EPSILON);
        assert_eq!(*notified.lock().unwrap(), vec![0, 1]);
        assert!(next_sample(&mut queue, 0).abs() < f32::EPSILON);
        assert_eq!(queue.len(), 0);
    }

    fn cursor(samples: Vec<f32>, seq: u64, notify: &Notify) -> Cursor {
        Cursor {
            samples,
            pos: 0,
            done: Some(PlaybackDone {
                seq,
                notify: Arc::clone(notify),
            }),
        }
    }

    #[test]
    fn completion_fires_ahead_of_the_tail() {
        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notified);
        let notify: Notify = Arc::new(move |seq| sink.lock().unwrap().push(seq));

        let mut queue = VecDeque::new();
        queue.push_back(cursor(vec![0.1, 0.2, 0.3, 0.4, 0.5], 0, &notify));

        next_sample(&mut queue, 2);
        next_sample(&mut queue, 2);
        assert!(notified.lock().unwrap().is_empty());
        next_sample(&mut queue, 2);
        assert_eq!(*notified.lock().unwrap(), vec![0]);

        // the next buffer queues behind the tail, which still plays out in order
        queue.push_back(cursor(vec![0.9], 1, &notify));
        assert!((next_sample(&mut queue, 2) - 0.4).abs() < f32::EPSILON);
        assert!((next_sample(&mut queue, 2) - 0.5).abs() < f32::EPSILON);
        assert!((next_sample(&mut queue, 2) - 0.9).abs() < f32::EPSILON);
        assert_eq!(*notified.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn lead_scales_with_device_rate() {
        assert_eq!(lead_samples(24_000), 1200);
        assert_eq!(lead_samples(48_000), 2400);
    }

    #[test]
    fn resample_passthrough_at_protocol_rate() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_for_device(samples.clone(), 24_000).unwrap(), samples);
    }

    #[test]
    fn resample_to_device_rate_scales_length() {
        let samples = vec![0.0; 2400];
        let out = resample_for_device(samples, 48_000).unwrap();
        // allow for the interpolator's edge handling
        assert!((4700..=4800).contains(&out.len()), "got {}", out.len());
    }
}
