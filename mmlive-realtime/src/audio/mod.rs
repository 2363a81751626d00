//! Audio pipelines.
//!
//! - [`encoder`] turns captured `f32` buffers into 16-bit PCM media chunks.
//! - [`playback`] decodes model audio and plays it back entry by entry.
//! - `device` (feature `desktop-audio`) wires both to real hardware via `cpal`.

pub mod encoder;
pub mod playback;

#[cfg(feature = "desktop-audio")]
pub mod device;

use crate::error::{RealtimeError, Result};
use crate::protocol::PCM_MIME_PREFIX;
use serde::{Deserialize, Serialize};

/// Sample rate the service expects for microphone input.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of model audio when the mime type does not say otherwise.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Mono 16-bit little-endian PCM at a given rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
    /// Bits per sample.
    pub bits_per_sample: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_24khz()
    }
}

impl AudioFormat {
    /// Mono PCM16 at the given rate.
    pub fn pcm16(sample_rate: u32) -> Self {
        Self { sample_rate, channels: 1, bits_per_sample: 16 }
    }

    /// PCM16 format at 16kHz (microphone input).
    pub fn pcm16_16khz() -> Self {
        Self::pcm16(INPUT_SAMPLE_RATE)
    }

    /// PCM16 format at 24kHz (model output).
    pub fn pcm16_24khz() -> Self {
        Self::pcm16(OUTPUT_SAMPLE_RATE)
    }

    /// Parse a mime type such as `audio/pcm;rate=24000`.
    ///
    /// A missing rate falls back to [`OUTPUT_SAMPLE_RATE`].
    pub fn from_mime_type(mime_type: &str) -> Result<Self> {
        let mut params = mime_type.split(';').map(str::trim);
        let essence = params.next().unwrap_or_default();
        if !essence.eq_ignore_ascii_case(PCM_MIME_PREFIX) {
            return Err(RealtimeError::audio(format!("unsupported audio mime type `{mime_type}`")));
        }
        let mut format = Self::pcm16_24khz();
        for param in params {
            if let Some(rate) = param.strip_prefix("rate=") {
                format.sample_rate = rate
                    .parse()
                    .ok()
                    .filter(|r| *r > 0)
                    .ok_or_else(|| RealtimeError::audio(format!("invalid sample rate in `{mime_type}`")))?;
            }
        }
        Ok(format)
    }

    /// Mime type for this format.
    pub fn mime_type(&self) -> String {
        format!("{PCM_MIME_PREFIX};rate={}", self.sample_rate)
    }
}

/// Convert a float sample to 16-bit PCM, scaling by 32768 and clamping.
#[inline]
pub fn float_to_pcm16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert a 16-bit PCM sample to float in `[-1.0, 1.0)`.
#[inline]
pub fn pcm16_to_float(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Decode little-endian PCM16 bytes into samples.
pub fn pcm16_from_le_bytes(data: &[u8]) -> Result<Vec<i16>> {
    if data.len() % 2 != 0 {
        return Err(RealtimeError::audio(format!(
            "Invalid data length for PCM16: {} (must be even)",
            data.len()
        )));
    }
    Ok(data.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect())
}

/// Encode samples as little-endian PCM16 bytes.
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        data.extend_from_slice(&sample.to_le_bytes());
    }
    data
}

/// Root mean square level of a buffer, `0.0` for an empty one.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
