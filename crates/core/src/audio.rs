//! Audio frame types
//!
//! Frames carry f32 PCM samples behind an `Arc` so a frame can fan out to
//! several stages without copying the sample data.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Supported sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz8000,
    Hz16000,
    Hz24000,
    Hz44100,
    Hz48000,
}

impl SampleRate {
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Hz8000 => 8_000,
            Self::Hz16000 => 16_000,
            Self::Hz24000 => 24_000,
            Self::Hz44100 => 44_100,
            Self::Hz48000 => 48_000,
        }
    }

    /// Samples per channel in a 20 ms frame
    pub fn frame_size_20ms(&self) -> usize {
        (self.as_u32() / 50) as usize
    }

    pub fn from_u32(rate: u32) -> Option<Self> {
        match rate {
            8_000 => Some(Self::Hz8000),
            16_000 => Some(Self::Hz16000),
            24_000 => Some(Self::Hz24000),
            44_100 => Some(Self::Hz44100),
            48_000 => Some(Self::Hz48000),
            _ => None,
        }
    }
}

/// Channel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channels {
    Mono,
    Stereo,
}

impl Channels {
    pub fn count(&self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }
}

/// One chunk of PCM audio moving through the pipeline
#[derive(Clone)]
pub struct AudioFrame {
    /// Interleaved f32 samples in [-1.0, 1.0]
    pub samples: Arc<[f32]>,
    pub sample_rate: SampleRate,
    pub channels: Channels,
    /// Monotonic sequence number assigned by the producer
    pub sequence: u64,
    /// Capture timestamp in milliseconds since session start
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: SampleRate, sequence: u64, timestamp_ms: u64) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels: Channels::Mono,
            sequence,
            timestamp_ms,
        }
    }

    /// Playback duration of this frame
    pub fn duration(&self) -> Duration {
        let per_channel = self.samples.len() / self.channels.count();
        Duration::from_secs_f64(per_channel as f64 / self.sample_rate.as_u32() as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// Sample buffers can hold thousands of floats; keep Debug output readable.
impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("sequence", &self.sequence)
            .field("timestamp_ms", &self.timestamp_ms)
            .finish()
    }
}
