//! audio frames and their format tag
//!
//! Samples are f32 inside the bridge and 16 bit signed on the wire and at the
//! ALSA boundary.  All frames flowing through one pipeline share the same
//! format until a device change renegotiates it.
use std::fmt;

use dasp_sample::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: u16) -> StreamFormat {
        StreamFormat {
            sample_rate,
            channels,
        }
    }
    /// wall clock duration of a chunk of this many sample frames
    pub fn duration_us(&self, sample_frames: usize) -> u128 {
        sample_frames as u128 * 1_000_000 / self.sample_rate as u128
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{ rate: {}, channels: {} }}", self.sample_rate, self.channels)
    }
}

/// fixed length buffer of interleaved PCM samples tagged with its format
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub format: StreamFormat,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(format: StreamFormat, samples: Vec<f32>) -> AudioFrame {
        AudioFrame { format, samples }
    }
    /// all-zero frame, used for concealment and for priming the output while
    /// the jitter buffer fills
    pub fn silence(format: StreamFormat, sample_frames: usize) -> AudioFrame {
        AudioFrame {
            format,
            samples: vec![0.0; sample_frames * format.channels as usize],
        }
    }
    /// number of per-channel sample frames
    pub fn sample_frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }
    pub fn duration_us(&self) -> u128 {
        self.format.duration_us(self.sample_frames())
    }
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| *s == 0.0)
    }
}

/// convert one float sample to the 16 bit wire coding, clamped
pub fn sample_to_i16(v: f32) -> i16 {
    v.clamp(-1.0, 1.0).to_sample::<i16>()
}

/// convert one 16 bit wire sample back to float
pub fn sample_to_f32(v: i16) -> f32 {
    v.to_sample::<f32>()
}
