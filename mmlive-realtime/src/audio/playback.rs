//! Decoding and gapless sequential playback of model audio.
//!
//! Inbound PCM is wrapped in a WAV container so every [`AudioQueueEntry`] is
//! independently decodable. A sequencer task owns the FIFO and plays one entry
//! at a time through an [`AudioOutput`]; entry N+1 never starts before entry N
//! finished or was stopped.

use super::{AudioFormat, pcm16_from_le_bytes, pcm16_to_float, rms};
use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How often the visualizer tap publishes a frame.
pub const VISUALIZER_INTERVAL: Duration = Duration::from_millis(50);

/// Samples per visualizer frame.
pub const VISUALIZER_WINDOW: usize = 512;

/// A queued piece of model audio, stored as a complete WAV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioQueueEntry {
    /// WAV-encoded audio.
    pub payload: Bytes,
    /// Mime type of the original PCM.
    pub mime_type: String,
}

impl AudioQueueEntry {
    /// Wrap raw little-endian PCM16 described by `mime_type`.
    pub fn from_pcm(pcm: &[u8], mime_type: &str) -> Result<Self> {
        let format = AudioFormat::from_mime_type(mime_type)?;
        Ok(Self { payload: Bytes::from(wrap_pcm_wav(pcm, format)?), mime_type: mime_type.to_string() })
    }

    /// Decode into a playable buffer.
    pub fn decode(&self) -> Result<PlaybackBuffer> {
        decode_wav(&self.payload)
    }
}

/// Decoded mono audio ready for an output.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    /// Playing time of the buffer.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    fn apply_gain(&mut self, gain: f32) {
        if (gain - 1.0).abs() > f32::EPSILON {
            self.samples.iter_mut().for_each(|s| *s = (*s * gain).clamp(-1.0, 1.0));
        }
    }

    fn window_at(&self, elapsed: Duration) -> &[f32] {
        let start = (elapsed.as_secs_f64() * self.sample_rate as f64) as usize;
        let start = start.min(self.samples.len());
        let end = (start + VISUALIZER_WINDOW).min(self.samples.len());
        &self.samples[start..end]
    }
}

/// Wrap raw PCM16 in a minimal mono WAV container.
pub fn wrap_pcm_wav(pcm: &[u8], format: AudioFormat) -> Result<Vec<u8>> {
    let samples = pcm16_from_le_bytes(pcm)?;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| RealtimeError::audio(format!("WAV header: {}", e)))?;
        for sample in samples {
            writer.write_sample(sample).map_err(|e| RealtimeError::audio(format!("WAV write: {}", e)))?;
        }
        writer.finalize().map_err(|e| RealtimeError::audio(format!("WAV finalize: {}", e)))?;
    }
    Ok(cursor.into_inner())
}

/// Decode a 16-bit PCM WAV file, downmixing to mono.
pub fn decode_wav(bytes: &[u8]) -> Result<PlaybackBuffer> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| RealtimeError::playback(format!("invalid WAV: {}", e)))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(RealtimeError::playback(format!(
            "unsupported WAV sample format {:?}/{} bits",
            spec.sample_format, spec.bits_per_sample
        )));
    }
    let raw = reader
        .into_samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RealtimeError::playback(format!("WAV samples: {}", e)))?;
    let channels = usize::from(spec.channels.max(1));
    let samples = raw
        .chunks(channels)
        .map(|frame| frame.iter().copied().map(pcm16_to_float).sum::<f32>() / frame.len() as f32)
        .collect();
    Ok(PlaybackBuffer { samples, sample_rate: spec.sample_rate })
}

/// Audio sink driven by the sequencer.
#[async_trait]
pub trait AudioOutput: Send + Sync + 'static {
    /// Play `buffer`, completing when the last sample was played.
    ///
    /// Dropping the returned future must halt playback.
    async fn play(&self, buffer: Arc<PlaybackBuffer>) -> Result<()>;
}

/// Output that produces no sound but keeps real-time pacing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentOutput;

#[async_trait]
impl AudioOutput for SilentOutput {
    async fn play(&self, buffer: Arc<PlaybackBuffer>) -> Result<()> {
        tokio::time::sleep(buffer.duration()).await;
        Ok(())
    }
}

/// Samples handed from an [`AudioOutput`] to a device callback.
///
/// The samples of an entry and its completion signal are loaded together, so a
/// callback holding the lock sees either both or neither.
#[derive(Debug, Default)]
pub struct SampleFeed {
    queue: VecDeque<f32>,
    done: Option<oneshot::Sender<()>>,
}

impl SampleFeed {
    /// Queue an entry; `done` fires once its last sample was rendered.
    pub fn load(&mut self, samples: impl IntoIterator<Item = f32>, done: oneshot::Sender<()>) {
        self.queue.extend(samples);
        self.done = Some(done);
    }

    /// Drop the current entry without signalling completion.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.done = None;
    }

    /// Samples not rendered yet.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Render `frames` samples through `write`, padding with silence.
    pub fn render(&mut self, frames: usize, mut write: impl FnMut(f32)) {
        for _ in 0..frames {
            write(self.queue.pop_front().unwrap_or(0.0));
        }
        if self.queue.is_empty() {
            if let Some(done) = self.done.take() {
                let _ = done.send(());
            }
        }
    }
}

/// Sequencer notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Entry `index` started playing.
    Started { index: u64, duration: Duration },
    /// Entry `index` played to the end.
    Finished { index: u64 },
    /// Entry `index` could not be decoded or played and was skipped.
    Failed { index: u64, error: String },
    /// Playback was stopped; `discarded` entries (including the playing one) were dropped.
    Stopped { discarded: usize },
    /// The queue ran empty.
    Drained,
}

/// Analysis tap snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisualizerFrame {
    /// RMS level of `samples`.
    pub rms: f32,
    /// Samples currently being played.
    pub samples: Vec<f32>,
}

#[derive(Debug)]
enum PlaybackCommand {
    Enqueue(AudioQueueEntry),
    Stop,
    SetVolume(f32),
}

/// Handle to a running playback sequencer.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    commands: mpsc::UnboundedSender<PlaybackCommand>,
    events: broadcast::Sender<PlaybackEvent>,
    visualizer: watch::Receiver<VisualizerFrame>,
    cancel: CancellationToken,
}

impl PlaybackHandle {
    /// Start a sequencer task playing through `output`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(output: Arc<dyn AudioOutput>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let (tap, visualizer) = watch::channel(VisualizerFrame::default());
        let cancel = CancellationToken::new();
        let sequencer = Sequencer {
            output,
            queue: VecDeque::new(),
            volume: 1.0,
            next_index: 0,
            events: events.clone(),
            tap: Arc::new(tap),
        };
        tokio::spawn(sequencer.run(rx, cancel.clone()));
        Self { commands, events, visualizer, cancel }
    }

    /// Wrap raw PCM and queue it.
    pub fn enqueue_pcm(&self, pcm: &[u8], mime_type: &str) -> Result<()> {
        self.enqueue(AudioQueueEntry::from_pcm(pcm, mime_type)?)
    }

    /// Queue an entry behind everything already queued.
    pub fn enqueue(&self, entry: AudioQueueEntry) -> Result<()> {
        self.command(PlaybackCommand::Enqueue(entry))
    }

    /// Halt the current entry and clear the queue.
    pub fn stop(&self) -> Result<()> {
        self.command(PlaybackCommand::Stop)
    }

    /// Set the gain applied to entries decoded from now on.
    pub fn set_volume(&self, gain: f32) -> Result<()> {
        self.command(PlaybackCommand::SetVolume(gain.max(0.0)))
    }

    /// Subscribe to sequencer notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Visualizer tap.
    pub fn visualizer(&self) -> watch::Receiver<VisualizerFrame> {
        self.visualizer.clone()
    }

    /// Stop the sequencer task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn command(&self, command: PlaybackCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RealtimeError::playback("playback sequencer has shut down"))
    }
}

type PlayFuture = BoxFuture<'static, Result<()>>;

struct Sequencer {
    output: Arc<dyn AudioOutput>,
    queue: VecDeque<AudioQueueEntry>,
    volume: f32,
    next_index: u64,
    events: broadcast::Sender<PlaybackEvent>,
    tap: Arc<watch::Sender<VisualizerFrame>>,
}

impl Sequencer {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<PlaybackCommand>, cancel: CancellationToken) {
        let mut current: Option<(u64, PlayFuture)> = None;
        loop {
            if current.is_none() {
                current = self.start_next();
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(PlaybackCommand::Enqueue(entry)) => self.queue.push_back(entry),
                    Some(PlaybackCommand::Stop) => {
                        let discarded = self.queue.len() + usize::from(current.is_some());
                        self.queue.clear();
                        current = None;
                        self.tap.send_replace(VisualizerFrame::default());
                        debug!(discarded, "Playback stopped");
                        let _ = self.events.send(PlaybackEvent::Stopped { discarded });
                    }
                    Some(PlaybackCommand::SetVolume(gain)) => self.volume = gain,
                    None => break,
                },
                (index, result) = playing(&mut current), if current.is_some() => {
                    current = None;
                    let event = match result {
                        Ok(()) => PlaybackEvent::Finished { index },
                        Err(e) => {
                            warn!(index, error = %e, "Playback failed, skipping entry");
                            PlaybackEvent::Failed { index, error: e.to_string() }
                        }
                    };
                    let _ = self.events.send(event);
                    if self.queue.is_empty() {
                        self.tap.send_replace(VisualizerFrame::default());
                        let _ = self.events.send(PlaybackEvent::Drained);
                    }
                }
            }
        }
    }

    fn start_next(&mut self) -> Option<(u64, PlayFuture)> {
        while let Some(entry) = self.queue.pop_front() {
            let index = self.next_index;
            self.next_index += 1;
            match entry.decode() {
                Ok(mut buffer) => {
                    buffer.apply_gain(self.volume);
                    let buffer = Arc::new(buffer);
                    let _ = self.events.send(PlaybackEvent::Started { index, duration: buffer.duration() });
                    let future = play_with_tap(self.output.clone(), buffer, self.tap.clone());
                    return Some((index, Box::pin(future)));
                }
                Err(e) => {
                    warn!(index, mime_type = %entry.mime_type, error = %e, "Dropping undecodable audio entry");
                    let _ = self.events.send(PlaybackEvent::Failed { index, error: e.to_string() });
                }
            }
        }
        None
    }
}

async fn playing(current: &mut Option<(u64, PlayFuture)>) -> (u64, Result<()>) {
    match current {
        Some((index, future)) => (*index, future.await),
        None => std::future::pending().await,
    }
}

async fn play_with_tap(
    output: Arc<dyn AudioOutput>,
    buffer: Arc<PlaybackBuffer>,
    tap: Arc<watch::Sender<VisualizerFrame>>,
) -> Result<()> {
    let started = Instant::now();
    let play = output.play(buffer.clone());
    tokio::pin!(play);
    let mut ticker = tokio::time::interval(VISUALIZER_INTERVAL);
    loop {
        tokio::select! {
            result = &mut play => return result,
            _ = ticker.tick() => {
                let samples = buffer.window_at(started.elapsed()).to_vec();
                tap.send_replace(VisualizerFrame { rms: rms(&samples), samples });
            }
        }
    }
}
