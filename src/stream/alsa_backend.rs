//! ALSA implementation of the audio backend seam
//!
//! Opens one PCM per session in interleaved 16 bit mode and moves chunks
//! through readi/writei, recovering from xruns in place.  The device name
//! comes from config; "default" follows the system default, and a loopback
//! PCM (e.g. "hw:Loopback,1") on the capture side turns system playback into
//! the outbound stream.
//!
//! ALSA does not announce default device changes.  The identity reported to
//! [`super::device::DeviceSession`] is the configured name plus the last
//! negotiated format, so a device that renegotiates its rate on reopen shows
//! up as one DeviceChanged, and a device that disappears shows up as i/o
//! errors that drive the recovery path.
use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use log::info;

use super::device::{AudioBackend, DeviceDescriptor, DeviceRole};
use super::error::StreamError;
use super::frame::{sample_to_f32, sample_to_i16, AudioFrame, StreamFormat};

const SMP_FORMAT: Format = Format::s16();

pub struct AlsaBackend {
    device_name: String,
    format: StreamFormat,
    frames_per_chunk: usize,
    pcm: Option<PCM>,
}

impl AlsaBackend {
    pub fn build(device_name: &str, format: StreamFormat, frames_per_chunk: usize) -> AlsaBackend {
        AlsaBackend {
            device_name: device_name.to_string(),
            format,
            frames_per_chunk: frames_per_chunk.max(1),
            pcm: None,
        }
    }

    fn open_pcm(&self, role: DeviceRole) -> Result<PCM, StreamError> {
        let direction = match role {
            DeviceRole::Capture => Direction::Capture,
            DeviceRole::Render => Direction::Playback,
        };
        let pcm = PCM::new(&self.device_name, direction, false).map_err(|e| {
            StreamError::DeviceUnavailable(format!("{}: {}", self.device_name, e))
        })?;
        {
            let hwp = HwParams::any(&pcm).map_err(to_backend)?;
            hwp.set_channels(self.format.channels as u32)
                .map_err(to_backend)?;
            hwp.set_rate(self.format.sample_rate, ValueOr::Nearest)
                .map_err(to_backend)?;
            hwp.set_format(SMP_FORMAT).map_err(to_backend)?;
            hwp.set_access(Access::RWInterleaved).map_err(to_backend)?;
            hwp.set_buffer_size(4 * self.frames_per_chunk as i64)
                .map_err(to_backend)?;
            hwp.set_period_size(self.frames_per_chunk as i64, ValueOr::Nearest)
                .map_err(to_backend)?;
            pcm.hw_params(&hwp).map_err(to_backend)?;
        }
        info!(
            "opened alsa {} {} with {:?}",
            self.device_name,
            role,
            pcm.hw_params_current()
        );
        Ok(pcm)
    }

    fn negotiated_rate(pcm: &PCM) -> Option<u32> {
        pcm.hw_params_current().ok().and_then(|h| h.get_rate().ok())
    }
}

fn to_backend(e: alsa::Error) -> StreamError {
    StreamError::Backend(e.to_string())
}

impl AudioBackend for AlsaBackend {
    fn default_device(&mut self, _role: DeviceRole) -> Result<DeviceDescriptor, StreamError> {
        Ok(DeviceDescriptor {
            id: self.device_name.clone(),
            format: self.format,
        })
    }

    fn open(&mut self, role: DeviceRole, _device: &DeviceDescriptor) -> Result<(), StreamError> {
        let pcm = self.open_pcm(role)?;
        // the hardware may have picked a nearby rate; report it from now on
        if let Some(rate) = Self::negotiated_rate(&pcm) {
            self.format.sample_rate = rate;
        }
        if role == DeviceRole::Capture {
            pcm.start().map_err(to_backend)?;
        }
        self.pcm = Some(pcm);
        Ok(())
    }

    fn read(&mut self, sample_frames: usize) -> Result<AudioFrame, StreamError> {
        let pcm = self.pcm.as_ref().ok_or(StreamError::Closed)?;
        let io = pcm.io_i16().map_err(to_backend)?;
        let channels = self.format.channels as usize;
        let mut buf = vec![0i16; sample_frames * channels];
        let mut filled = 0;
        while filled < sample_frames {
            match io.readi(&mut buf[filled * channels..]) {
                Ok(frames) => {
                    filled += frames;
                }
                Err(e) => {
                    pcm.recover(e.errno() as std::os::raw::c_int, true)
                        .map_err(to_backend)?;
                }
            }
        }
        Ok(AudioFrame::new(
            self.format,
            buf.iter().map(|&v| sample_to_f32(v)).collect(),
        ))
    }

    fn write(&mut self, frame: &AudioFrame) -> Result<(), StreamError> {
        let pcm = self.pcm.as_ref().ok_or(StreamError::Closed)?;
        let io = pcm.io_i16().map_err(to_backend)?;
        let channels = self.format.channels as usize;
        let buf: Vec<i16> = frame.samples.iter().map(|&v| sample_to_i16(v)).collect();
        let total = buf.len() / channels.max(1);
        let mut written = 0;
        while written < total {
            match io.writei(&buf[written * channels..]) {
                Ok(frames) => {
                    written += frames;
                }
                Err(e) => {
                    pcm.recover(e.errno() as std::os::raw::c_int, true)
                        .map_err(to_backend)?;
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) -> () {
        // dropping the handle closes the stream; pending frames go with it
        self.pcm = None;
    }
}
