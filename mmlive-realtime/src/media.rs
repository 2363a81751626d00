//! Low frame-rate image capture.
//!
//! A [`FrameExtractor`] samples the current frame of a [`FrameSource`] on a
//! fixed interval, downscales it, encodes it as JPEG and hands the result to
//! a callback as an `image/jpeg` [`MediaChunk`]. Camera and screen capture
//! backends feed frames through [`FrameFeed`].

use crate::error::{RealtimeError, Result};
use crate::protocol::{JPEG_MIME_TYPE, MediaChunk};
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Extraction settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractorConfig {
    /// Frames per second.
    pub fps: f32,
    /// Scale factor applied to both dimensions, in `(0, 1]`.
    pub scale: f32,
    /// JPEG quality, `1..=100`.
    pub quality: u8,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self { fps: 0.5, scale: 0.25, quality: 100 }
    }
}

impl ExtractorConfig {
    fn validate(&self) -> Result<()> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(RealtimeError::config(format!("fps must be positive, got {}", self.fps)));
        }
        if !(self.scale > 0.0 && self.scale <= 1.0) {
            return Err(RealtimeError::config(format!("scale must be in (0, 1], got {}", self.scale)));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(RealtimeError::config(format!("quality must be in 1..=100, got {}", self.quality)));
        }
        Ok(())
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.fps)
    }
}

/// Lifecycle of a capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Frames are being produced.
    Live,
    /// The source stopped for good.
    Ended,
}

/// A video source that can be sampled.
pub trait FrameSource: Send + Sync + 'static {
    /// Most recent frame, if any arrived yet.
    fn current_frame(&self) -> Option<Arc<RgbImage>>;

    /// Source state notifications.
    fn state(&self) -> watch::Receiver<SourceState>;
}

/// Frame source fed by a capture backend.
#[derive(Debug, Clone)]
pub struct FrameFeed {
    latest: Arc<RwLock<Option<Arc<RgbImage>>>>,
    state: Arc<watch::Sender<SourceState>>,
}

impl Default for FrameFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameFeed {
    /// Create a live feed with no frame yet.
    pub fn new() -> Self {
        let (state, _) = watch::channel(SourceState::Live);
        Self { latest: Arc::new(RwLock::new(None)), state: Arc::new(state) }
    }

    /// Replace the current frame.
    pub fn push(&self, frame: RgbImage) {
        *self.latest.write() = Some(Arc::new(frame));
    }

    /// Mark the source as ended.
    pub fn end(&self) {
        self.state.send_replace(SourceState::Ended);
    }
}

impl FrameSource for FrameFeed {
    fn current_frame(&self) -> Option<Arc<RgbImage>> {
        self.latest.read().clone()
    }

    fn state(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }
}

/// Downscale and JPEG-encode one frame.
pub fn encode_frame(frame: &RgbImage, scale: f32, quality: u8) -> Result<Vec<u8>> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(RealtimeError::capture("empty frame"));
    }
    let width = ((frame.width() as f32 * scale).round() as u32).max(1);
    let height = ((frame.height() as f32 * scale).round() as u32).max(1);
    let scaled = imageops::resize(frame, width, height, FilterType::Triangle);

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(&scaled)
        .map_err(|e| RealtimeError::capture(format!("JPEG encoding failed: {}", e)))?;
    Ok(jpeg)
}

/// Running periodic frame extraction.
///
/// Stops when [`stop`](Self::stop) is called, when the source ends, or when
/// the extractor is dropped.
#[derive(Debug)]
pub struct FrameExtractor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl FrameExtractor {
    /// Start sampling `source`.
    ///
    /// Fails with [`RealtimeError::MediaCaptureError`] when the source has
    /// already ended. Must be called from within a tokio runtime.
    pub fn start<F>(source: Arc<dyn FrameSource>, config: ExtractorConfig, on_frame: F) -> Result<Self>
    where
        F: FnMut(MediaChunk) + Send + 'static,
    {
        config.validate()?;
        let state = source.state();
        if *state.borrow() == SourceState::Ended {
            return Err(RealtimeError::capture("capture source has ended"));
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(source, state, config, on_frame, cancel.clone()));
        info!(fps = config.fps, scale = config.scale, "Frame extraction started");
        Ok(Self { cancel, task })
    }

    /// Stop extracting.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the extraction task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for FrameExtractor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<F>(
    source: Arc<dyn FrameSource>,
    mut state: watch::Receiver<SourceState>,
    config: ExtractorConfig,
    mut on_frame: F,
    cancel: CancellationToken,
) where
    F: FnMut(MediaChunk) + Send + 'static,
{
    let mut ticker = tokio::time::interval(config.period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Frame extraction stopped");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == SourceState::Ended {
                    info!("Capture source ended, stopping frame extraction");
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(frame) = source.current_frame() else {
                    continue;
                };
                let (scale, quality) = (config.scale, config.quality);
                match tokio::task::spawn_blocking(move || encode_frame(&frame, scale, quality)).await {
                    Ok(Ok(jpeg)) => on_frame(MediaChunk::from_bytes(JPEG_MIME_TYPE, &jpeg)),
                    Ok(Err(e)) => warn!(error = %e, "Skipping frame"),
                    Err(e) => warn!(error = %e, "Frame encoder task failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use tokio::sync::mpsc;

    fn frame() -> RgbImage {
        RgbImage::from_fn(64, 48, |x, y| image::Rgb([x as u8 * 4, y as u8 * 5, 128]))
    }

    #[test]
    fn test_encode_frame_scales() {
        let jpeg = encode_frame(&frame(), 0.25, 90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 12));
    }

    #[test]
    fn test_config_validation() {
        assert!(ExtractorConfig::default().validate().is_ok());
        assert!(ExtractorConfig { fps: 0.0, ..Default::default() }.validate().is_err());
        assert!(ExtractorConfig { scale: 1.5, ..Default::default() }.validate().is_err());
        assert!(ExtractorConfig { quality: 0, ..Default::default() }.validate().is_err());
    }

    #[tokio::test]
    async fn test_emits_jpeg_chunks() {
        let feed = Arc::new(FrameFeed::new());
        feed.push(frame());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = ExtractorConfig { fps: 20.0, ..Default::default() };
        let extractor = FrameExtractor::start(feed.clone(), config, move |chunk| {
            let _ = tx.send(chunk);
        })
        .unwrap();

        let chunk = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(chunk.mime_type, "image/jpeg");
        let bytes = base64::engine::general_purpose::STANDARD.decode(&chunk.data).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        extractor.stop();
        tokio::time::timeout(Duration::from_secs(5), async {
            while extractor.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_source_ends() {
        let feed = Arc::new(FrameFeed::new());
        let extractor = FrameExtractor::start(feed.clone(), ExtractorConfig::default(), |_| {}).unwrap();
        feed.end();
        tokio::time::timeout(Duration::from_secs(5), async {
            while extractor.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let err = FrameExtractor::start(feed, ExtractorConfig::default(), |_| {}).unwrap_err();
        assert!(matches!(err, RealtimeError::MediaCaptureError(_)));
    }
}
