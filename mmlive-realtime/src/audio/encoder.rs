//! Capture-side resampler and PCM16 chunk encoder.
//!
//! [`PcmEncoder::process`] is meant to run inside a real-time capture
//! callback: it keeps its scratch buffers between calls, takes no locks and
//! performs no I/O.

use super::{INPUT_SAMPLE_RATE, float_to_pcm16};
use crate::error::{RealtimeError, Result};
use crate::protocol::MediaChunk;

/// Samples per emitted chunk (128 ms at 16 kHz).
pub const DEFAULT_CHUNK_SAMPLES: usize = 2048;

/// Encoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Native rate of the capture device.
    pub input_rate: u32,
    /// Rate sent to the service.
    pub target_rate: u32,
    /// Samples per emitted chunk.
    pub chunk_samples: usize,
}

impl EncoderConfig {
    /// Settings for a device at `input_rate`, targeting 16 kHz.
    pub fn new(input_rate: u32) -> Self {
        Self { input_rate, target_rate: INPUT_SAMPLE_RATE, chunk_samples: DEFAULT_CHUNK_SAMPLES }
    }
}

/// Linear-interpolation resampler that keeps its phase across buffers.
#[derive(Debug, Clone)]
struct LinearResampler {
    step: f64,
    /// Position of the next output sample, counted from `prev` (index 0).
    phase: f64,
    prev: Option<f32>,
}

impl LinearResampler {
    fn new(input_rate: u32, target_rate: u32) -> Self {
        Self { step: input_rate as f64 / target_rate as f64, phase: 0.0, prev: None }
    }

    fn process(&mut self, input: &[f32], mut out: impl FnMut(f32)) {
        let Some(&last) = input.last() else {
            return;
        };
        let prev = self.prev;
        let offset = usize::from(prev.is_some());
        let len = input.len() + offset;
        let sample_at = |i: usize| match prev {
            Some(p) if i == 0 => p,
            _ => input[i - offset],
        };

        while (self.phase as usize) + 1 < len {
            let index = self.phase as usize;
            let frac = (self.phase - index as f64) as f32;
            let a = sample_at(index);
            let b = sample_at(index + 1);
            out(a + (b - a) * frac);
            self.phase += self.step;
        }

        // Rebase so the last sample of this buffer becomes index 0.
        self.phase -= (len - 1) as f64;
        self.prev = Some(last);
    }

    fn reset(&mut self) {
        self.phase = 0.0;
        self.prev = None;
    }
}

/// Converts native-rate `f32` capture buffers into base64 PCM16 chunks.
#[derive(Debug, Clone)]
pub struct PcmEncoder {
    config: EncoderConfig,
    mime_type: String,
    resampler: Option<LinearResampler>,
    pending: Vec<i16>,
    bytes: Vec<u8>,
}

impl PcmEncoder {
    /// Encoder for a device at `input_rate` with default settings.
    pub fn new(input_rate: u32) -> Result<Self> {
        Self::with_config(EncoderConfig::new(input_rate))
    }

    /// Encoder with explicit settings.
    pub fn with_config(config: EncoderConfig) -> Result<Self> {
        if config.input_rate == 0 || config.target_rate == 0 {
            return Err(RealtimeError::audio("sample rates must be non-zero"));
        }
        if config.chunk_samples == 0 {
            return Err(RealtimeError::audio("chunk size must be non-zero"));
        }
        let resampler = (config.input_rate != config.target_rate)
            .then(|| LinearResampler::new(config.input_rate, config.target_rate));
        Ok(Self {
            mime_type: format!("audio/pcm;rate={}", config.target_rate),
            resampler,
            pending: Vec::with_capacity(config.chunk_samples),
            bytes: Vec::with_capacity(config.chunk_samples * 2),
            config,
        })
    }

    /// Settings in use.
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Mime type of emitted chunks.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Samples waiting for a full chunk.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Feed one capture buffer; `emit` is called for every completed chunk.
    pub fn process(&mut self, input: &[f32], mut emit: impl FnMut(MediaChunk)) {
        let Self { config, mime_type, resampler, pending, bytes } = self;
        let mut push = |sample: f32| {
            pending.push(float_to_pcm16(sample));
            if pending.len() == config.chunk_samples {
                emit(encode_chunk(mime_type.as_str(), pending, bytes));
            }
        };
        match resampler {
            Some(resampler) => resampler.process(input, &mut push),
            None => input.iter().copied().for_each(&mut push),
        }
    }

    /// Emit any partial chunk and reset resampler state.
    pub fn flush(&mut self, mut emit: impl FnMut(MediaChunk)) {
        if !self.pending.is_empty() {
            emit(encode_chunk(&self.mime_type, &mut self.pending, &mut self.bytes));
        }
        if let Some(resampler) = &mut self.resampler {
            resampler.reset();
        }
    }
}

fn encode_chunk(mime_type: &str, pending: &mut Vec<i16>, bytes: &mut Vec<u8>) -> MediaChunk {
    bytes.clear();
    for sample in pending.iter() {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    pending.clear();
    MediaChunk::from_bytes(mime_type, bytes)
}

/// One-shot linear resampling of a whole buffer.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }
    let mut output = Vec::with_capacity(input.len() * to_rate as usize / from_rate as usize + 1);
    let mut resampler = LinearResampler::new(from_rate, to_rate);
    resampler.process(input, |s| output.push(s));
    // Trailing sample that the streaming resampler holds back.
    if let Some(&last) = input.last() {
        if resampler.phase <= 0.0 {
            output.push(last);
        }
    }
    output
}
