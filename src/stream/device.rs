//! device sessions and the audio backend seam
//!
//! The OS audio API is a collaborator, not part of the core.  [`AudioBackend`]
//! is the whole surface the core needs from it: resolve the default device,
//! open it for capture or render, move PCM frames, close.  The ALSA
//! implementation lives in [`super::alsa_backend`]; tests script a fake.
//!
//! [`DeviceSession`] owns one open device.  It polls the backend's idea of
//! the default device on a bounded cadence and, when the identity or format
//! underneath it changes, closes the old handle and opens a fresh one.  A new
//! physical device is an unrelated clock domain, so frames pending in the old
//! handle are discarded rather than carried over.
use log::{info, warn};
use std::fmt;

use super::error::StreamError;
use super::frame::{AudioFrame, StreamFormat};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceRole {
    Capture,
    Render,
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceRole::Capture => write!(f, "capture"),
            DeviceRole::Render => write!(f, "render"),
        }
    }
}

/// opaque device identity plus its current format.  Re-resolved, never
/// reused, whenever the OS default device changes.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub id: String,
    pub format: StreamFormat,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{ id: {}, format: {} }}", self.id, self.format)
    }
}

pub trait AudioBackend: Send {
    /// resolve the current default device for a role
    fn default_device(&mut self, role: DeviceRole) -> Result<DeviceDescriptor, StreamError>;
    /// open a stream on the given device, replacing any open one
    fn open(&mut self, role: DeviceRole, device: &DeviceDescriptor) -> Result<(), StreamError>;
    /// blocking read of one chunk worth of sample frames (capture role)
    fn read(&mut self, sample_frames: usize) -> Result<AudioFrame, StreamError>;
    /// blocking write of one frame (render role)
    fn write(&mut self, frame: &AudioFrame) -> Result<(), StreamError>;
    fn close(&mut self) -> ();
}

/// re-check the default device once every this many i/o cycles
const DEVICE_POLL_CYCLES: u32 = 16;

pub struct DeviceSession<B: AudioBackend> {
    backend: B,
    role: DeviceRole,
    descriptor: DeviceDescriptor,
    cycles: u32,
}

impl<B: AudioBackend> DeviceSession<B> {
    pub fn open(mut backend: B, role: DeviceRole) -> Result<DeviceSession<B>, StreamError> {
        let descriptor = backend.default_device(role)?;
        backend.open(role, &descriptor)?;
        info!("opened {} device {}", role, descriptor);
        Ok(DeviceSession {
            backend,
            role,
            descriptor,
            cycles: 0,
        })
    }

    pub fn current_format(&self) -> StreamFormat {
        self.descriptor.format
    }
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }
    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// compare the OS default device against what we have open.  Called once
    /// per i/o cycle; the actual query only runs every DEVICE_POLL_CYCLES
    /// calls.  On a change the old handle is closed, a fresh one opened and
    /// the new format returned so the pipeline can renegotiate.
    pub fn poll_device_changed(&mut self) -> Result<Option<StreamFormat>, StreamError> {
        self.cycles += 1;
        if self.cycles < DEVICE_POLL_CYCLES {
            return Ok(None);
        }
        self.cycles = 0;
        let current = self.backend.default_device(self.role)?;
        if current == self.descriptor {
            return Ok(None);
        }
        warn!(
            "{} device changed under us: {} -> {}",
            self.role, self.descriptor, current
        );
        self.backend.close();
        self.backend.open(self.role, &current)?;
        self.descriptor = current;
        Ok(Some(self.descriptor.format))
    }

    /// close and reopen against whatever the default device is now.  Used by
    /// the coordinator while a direction is recovering.
    pub fn reopen(&mut self) -> Result<StreamFormat, StreamError> {
        self.backend.close();
        let descriptor = self.backend.default_device(self.role)?;
        self.backend.open(self.role, &descriptor)?;
        info!("reopened {} device {}", self.role, descriptor);
        self.descriptor = descriptor;
        self.cycles = 0;
        Ok(self.descriptor.format)
    }

    pub fn read(&mut self, sample_frames: usize) -> Result<AudioFrame, StreamError> {
        self.backend.read(sample_frames)
    }
    pub fn write(&mut self, frame: &AudioFrame) -> Result<(), StreamError> {
        self.backend.write(frame)
    }
    pub fn close(&mut self) -> () {
        self.backend.close();
    }
}


#[cfg(test)]
mod test_device_session {
    use super::fake::FakeBackend;
    use super::*;

    fn fmt() -> StreamFormat {
        StreamFormat::new(48_000, 2)
    }

    #[test]
    fn open_resolves_default() {
        let backend = FakeBackend::build(fmt());
        let handle = backend.clone();
        let session = DeviceSession::open(backend, DeviceRole::Capture).unwrap();
        assert_eq!(session.current_format(), fmt());
        assert_eq!(handle.state.lock().unwrap().opens, 1);
    }

    #[test]
    fn read_and_write() {
        let backend = FakeBackend::build(fmt());
        let mut session = DeviceSession::open(backend, DeviceRole::Capture).unwrap();
        let frame = session.read(32).unwrap();
        assert_eq!(frame.sample_frames(), 32);
        session.write(&frame).unwrap();
    }

    #[test]
    fn poll_detects_default_swap() {
        let backend = FakeBackend::build(fmt());
        let handle = backend.clone();
        let mut session = DeviceSession::open(backend, DeviceRole::Render).unwrap();

        // nothing changed: a full poll cycle reports no change
        for _ in 0..DEVICE_POLL_CYCLES {
            assert_eq!(session.poll_device_changed().unwrap(), None);
        }

        // swap the default device to one with a different native rate
        let new_fmt = StreamFormat::new(24_000, 1);
        handle.swap_default("fake-1", new_fmt);
        let mut seen = None;
        for _ in 0..DEVICE_POLL_CYCLES {
            if let Some(format) = session.poll_device_changed().unwrap() {
                seen = Some(format);
                break;
            }
        }
        assert_eq!(seen, Some(new_fmt));
        assert_eq!(session.descriptor().id, "fake-1");
        // old handle closed, new one opened
        let state = handle.state.lock().unwrap();
        assert_eq!(state.closes, 1);
        assert_eq!(state.opens, 2);
    }

    #[test]
    fn poll_is_bounded() {
        // the default-device query must not run on every i/o cycle
        let backend = FakeBackend::build(fmt());
        let handle = backend.clone();
        let mut session = DeviceSession::open(backend, DeviceRole::Capture).unwrap();
        handle.swap_default("fake-1", fmt());
        // one call is not enough to trigger a query
        assert_eq!(session.poll_device_changed().unwrap(), None);
    }

    #[test]
    fn reopen_after_failure() {
        let backend = FakeBackend::build(fmt());
        let handle = backend.clone();
        let mut session = DeviceSession::open(backend, DeviceRole::Capture).unwrap();
        handle.state.lock().unwrap().fail_open = true;
        assert!(session.reopen().is_err());
        handle.state.lock().unwrap().fail_open = false;
        assert!(session.reopen().is_ok());
    }

    #[test]
    fn open_fails_when_no_device() {
        let backend = FakeBackend::build(fmt());
        backend.state.lock().unwrap().fail_open = true;
        let boom = DeviceSession::open(backend, DeviceRole::Capture);
        assert!(boom.is_err());
    }
}
