//! playback side of a direction: adapt released frames to the device
//!
//! The wire carries no format, so the stream format is whatever both ends
//! configured.  When the render device's current format differs (typically
//! after a default device swap to hardware with another native rate) the sink
//! remixes channels and resamples with linear interpolation before writing.
//! A rate ratio outside the tolerance is a [`StreamError::FormatMismatch`]
//! surfaced upstream instead of corrupted audio.
use dasp_interpolate::linear::Linear;
use dasp_signal::{self as signal, Signal};

use super::device::{AudioBackend, DeviceSession};
use super::error::StreamError;
use super::frame::{AudioFrame, StreamFormat};

/// refuse resample ratios beyond this in either direction
const MAX_RATE_RATIO: f64 = 8.0;

pub struct FrameSink<B: AudioBackend> {
    session: DeviceSession<B>,
}

impl<B: AudioBackend> FrameSink<B> {
    pub fn new(session: DeviceSession<B>) -> FrameSink<B> {
        FrameSink { session }
    }

    /// write one released frame, converting if the device format differs
    pub fn write(&mut self, frame: &AudioFrame) -> Result<(), StreamError> {
        let device_format = self.session.current_format();
        if frame.format == device_format {
            return self.session.write(frame);
        }
        let converted = convert_frame(frame, device_format)?;
        self.session.write(&converted)
    }

    pub fn device_format(&self) -> StreamFormat {
        self.session.current_format()
    }
    pub fn poll_device_changed(&mut self) -> Result<Option<StreamFormat>, StreamError> {
        self.session.poll_device_changed()
    }
    pub fn reopen(&mut self) -> Result<StreamFormat, StreamError> {
        self.session.reopen()
    }
    pub fn close(&mut self) -> () {
        self.session.close();
    }
}

/// remix channels and resample a frame into the target format
pub fn convert_frame(frame: &AudioFrame, target: StreamFormat) -> Result<AudioFrame, StreamError> {
    let from = frame.format;
    let ratio = target.sample_rate as f64 / from.sample_rate.max(1) as f64;
    if !(1.0 / MAX_RATE_RATIO..=MAX_RATE_RATIO).contains(&ratio) {
        return Err(StreamError::FormatMismatch {
            stream: from,
            device: target,
        });
    }
    if from.channels == 0 || target.channels > 2 || from.channels > 2 {
        return Err(StreamError::FormatMismatch {
            stream: from,
            device: target,
        });
    }

    let remixed = remix_channels(&frame.samples, from.channels, target.channels);
    if from.sample_rate == target.sample_rate {
        return Ok(AudioFrame::new(target, remixed));
    }

    // resample each channel on its own and re-interleave
    let channels = target.channels as usize;
    let mut planes: Vec<Vec<f32>> = Vec::with_capacity(channels);
    for ch in 0..channels {
        let plane: Vec<f32> = remixed.iter().skip(ch).step_by(channels).copied().collect();
        planes.push(resample_plane(&plane, from.sample_rate, target.sample_rate));
    }
    let out_frames = planes.iter().map(|p| p.len()).min().unwrap_or(0);
    let mut samples = Vec::with_capacity(out_frames * channels);
    for i in 0..out_frames {
        for plane in &planes {
            samples.push(plane[i]);
        }
    }
    Ok(AudioFrame::new(target, samples))
}

/// linear interpolation over one channel of samples
fn resample_plane(input: &[f32], from_hz: u32, to_hz: u32) -> Vec<f32> {
    if input.len() < 2 {
        return input.to_vec();
    }
    let mut source = signal::from_iter(input.iter().map(|&s| [s]));
    let first = source.next();
    let second = source.next();
    let interp = Linear::new(first, second);
    source
        .from_hz_to_hz(interp, from_hz as f64, to_hz as f64)
        .until_exhausted()
        .map(|f| f[0])
        .collect()
}

/// mono/stereo up and down mix.  Anything wider is rejected before we get
/// here.
fn remix_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    match (from, to) {
        (f, t) if f == t => samples.to_vec(),
        (1, 2) => samples.iter().flat_map(|&s| [s, s]).collect(),
        (2, 1) => samples
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) / 2.0)
            .collect(),
        _ => samples.to_vec(),
    }
}
