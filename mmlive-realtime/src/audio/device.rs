//! Desktop microphone capture and speaker output through `cpal`.
//!
//! `cpal::Stream` is not `Send` on every platform, so each stream lives on a
//! dedicated thread for its whole life and talks to the rest of the crate
//! through channels and shared buffers.

use super::encoder::{PcmEncoder, resample_linear};
use super::playback::{AudioOutput, PlaybackBuffer, SampleFeed};
use super::rms;
use crate::error::{RealtimeError, Result};
use crate::protocol::MediaChunk;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const PARK_INTERVAL: Duration = Duration::from_millis(50);

/// Output of the capture pipeline.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// Encoded PCM16 chunk ready for `realtimeInput`.
    Chunk(MediaChunk),
    /// RMS level of the last captured buffer.
    Volume(f32),
}

/// Records the default input device and encodes it for the session.
#[derive(Debug)]
pub struct MicrophoneRecorder {
    input_rate: u32,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneRecorder {
    /// Start capturing. Events are dropped when `events` is full rather than
    /// blocking the audio callback.
    pub fn start(events: mpsc::Sender<CaptureEvent>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let stop_thread = stop.clone();

        let thread = std::thread::Builder::new()
            .name("mmlive-capture".to_string())
            .spawn(move || {
                let stream = match open_input(events) {
                    Ok((stream, rate)) => {
                        let _ = init_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                while !stop_thread.load(Ordering::Relaxed) {
                    std::thread::park_timeout(PARK_INTERVAL);
                }
                drop(stream);
            })
            .map_err(|e| RealtimeError::capture(format!("failed to spawn capture thread: {}", e)))?;

        let input_rate = init_rx
            .recv()
            .map_err(|_| RealtimeError::capture("capture thread exited during init"))??;
        tracing::info!(input_rate, "Microphone capture started");
        Ok(Self { input_rate, stop, thread: Some(thread) })
    }

    /// Native rate of the input device.
    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Stop capturing and release the device.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

impl Drop for MicrophoneRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_input(events: mpsc::Sender<CaptureEvent>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| RealtimeError::capture("no default input device"))?;
    let config = device
        .default_input_config()
        .map_err(|e| RealtimeError::capture(format!("no default input config: {}", e)))?;
    let rate = config.sample_rate().0;
    let channels = usize::from(config.channels()).max(1);
    let encoder = PcmEncoder::new(rate)?;
    let stream_config: cpal::StreamConfig = config.clone().into();

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_input::<f32>(&device, &stream_config, channels, encoder, events)?,
        cpal::SampleFormat::I16 => build_input::<i16>(&device, &stream_config, channels, encoder, events)?,
        cpal::SampleFormat::U16 => build_input::<u16>(&device, &stream_config, channels, encoder, events)?,
        other => return Err(RealtimeError::capture(format!("unsupported sample format: {other:?}"))),
    };
    stream.play().map_err(|e| RealtimeError::capture(format!("failed to start input stream: {}", e)))?;
    Ok((stream, rate))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    mut encoder: PcmEncoder,
    events: mpsc::Sender<CaptureEvent>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut mono: Vec<f32> = Vec::with_capacity(4096);
    device
        .build_input_stream(
            config,
            move |data: &[T], _| {
                mono.clear();
                mono.extend(
                    data.chunks(channels)
                        .map(|frame| frame.iter().map(|s| f32::from_sample(*s)).sum::<f32>() / frame.len() as f32),
                );
                let _ = events.try_send(CaptureEvent::Volume(rms(&mono)));
                encoder.process(&mono, |chunk| {
                    if events.try_send(CaptureEvent::Chunk(chunk)).is_err() {
                        tracing::warn!("Capture channel full, dropping audio chunk");
                    }
                });
            },
            |err| tracing::warn!("cpal input stream error: {err}"),
            None,
        )
        .map_err(|e| RealtimeError::capture(format!("failed to open input stream: {}", e)))
}

/// [`AudioOutput`] playing on the default output device.
pub struct CpalOutput {
    shared: Arc<Mutex<SampleFeed>>,
    output_rate: u32,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CpalOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalOutput").field("output_rate", &self.output_rate).finish_non_exhaustive()
    }
}

impl CpalOutput {
    /// Open the default output device.
    pub fn new() -> Result<Self> {
        let shared = Arc::new(Mutex::new(SampleFeed::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let (shared_thread, stop_thread) = (shared.clone(), stop.clone());

        let thread = std::thread::Builder::new()
            .name("mmlive-playback".to_string())
            .spawn(move || {
                let stream = match open_output(shared_thread) {
                    Ok((stream, rate)) => {
                        let _ = init_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                while !stop_thread.load(Ordering::Relaxed) {
                    std::thread::park_timeout(PARK_INTERVAL);
                }
                drop(stream);
            })
            .map_err(|e| RealtimeError::playback(format!("failed to spawn playback thread: {}", e)))?;

        let output_rate = init_rx
            .recv()
            .map_err(|_| RealtimeError::playback("playback thread exited during init"))??;
        tracing::info!(output_rate, "Speaker output opened");
        Ok(Self { shared, output_rate, stop, thread: Some(thread) })
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

/// Clears the device queue when a play future is dropped mid-entry.
struct HaltOnDrop {
    shared: Arc<Mutex<SampleFeed>>,
    armed: bool,
}

impl Drop for HaltOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.shared.lock().clear();
        }
    }
}

#[async_trait]
impl AudioOutput for CpalOutput {
    async fn play(&self, buffer: Arc<PlaybackBuffer>) -> Result<()> {
        let samples = resample_linear(&buffer.samples, buffer.sample_rate, self.output_rate);
        let (done_tx, done_rx) = oneshot::channel();
        self.shared.lock().load(samples, done_tx);
        let mut guard = HaltOnDrop { shared: self.shared.clone(), armed: true };

        let result = done_rx.await.map_err(|_| RealtimeError::playback("output device stopped"));
        guard.armed = false;
        result
    }
}

fn open_output(shared: Arc<Mutex<SampleFeed>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| RealtimeError::playback("no default output device"))?;
    let config = device
        .default_output_config()
        .map_err(|e| RealtimeError::playback(format!("no default output config: {}", e)))?;
    let rate = config.sample_rate().0;
    let channels = usize::from(config.channels()).max(1);
    let stream_config: cpal::StreamConfig = config.clone().into();

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_output::<f32>(&device, &stream_config, channels, shared)?,
        cpal::SampleFormat::I16 => build_output::<i16>(&device, &stream_config, channels, shared)?,
        cpal::SampleFormat::U16 => build_output::<u16>(&device, &stream_config, channels, shared)?,
        other => return Err(RealtimeError::playback(format!("unsupported sample format: {other:?}"))),
    };
    stream.play().map_err(|e| RealtimeError::playback(format!("failed to start output stream: {}", e)))?;
    Ok((stream, rate))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    shared: Arc<Mutex<SampleFeed>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let mut frames = data.chunks_mut(channels);
                let count = frames.len();
                shared.lock().render(count, |sample| {
                    if let Some(frame) = frames.next() {
                        let value = T::from_sample(sample);
                        frame.iter_mut().for_each(|s| *s = value);
                    }
                });
            },
            |err| tracing::warn!("cpal output stream error: {err}"),
            None,
        )
        .map_err(|e| RealtimeError::playback(format!("failed to open output stream: {}", e)))
}
