//! capture side of a direction: pull frames, batch them into datagrams
//!
//! [`FrameSource`] blocks on the capture device for one chunk at a time; the
//! device i/o latency is the natural backpressure, nothing else throttles the
//! loop.  [`Packetizer`] batches 1..K chunks per packet to amortize UDP
//! overhead against added latency.  K is fixed at session start from config
//! and never renegotiated mid stream.
use super::device::{AudioBackend, DeviceSession};
use super::error::StreamError;
use super::frame::{AudioFrame, StreamFormat};
use super::packet::WireMessage;
use crate::common::box_error::BoxError;

/// pulls fixed duration PCM chunks from a capture device session
pub struct FrameSource<B: AudioBackend> {
    session: DeviceSession<B>,
    frames_per_chunk: usize,
}

impl<B: AudioBackend> FrameSource<B> {
    pub fn new(session: DeviceSession<B>, frames_per_chunk: usize) -> FrameSource<B> {
        FrameSource {
            session,
            frames_per_chunk: frames_per_chunk.max(1),
        }
    }
    /// blocks for at most one chunk duration of device i/o
    pub fn read_chunk(&mut self) -> Result<AudioFrame, StreamError> {
        self.session.read(self.frames_per_chunk)
    }
    pub fn format(&self) -> StreamFormat {
        self.session.current_format()
    }
    /// chunk duration in microseconds at the current device format
    pub fn chunk_duration_us(&self) -> u128 {
        self.format().duration_us(self.frames_per_chunk)
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

/// wraps captured frames into sequenced, timestamped wire messages
pub struct Packetizer {
    sequence: u32,
    frames_per_packet: usize,
    pending: Vec<AudioFrame>,
    muted: bool,
}

impl Packetizer {
    pub fn build(frames_per_packet: usize) -> Packetizer {
        Packetizer {
            sequence: 0,
            frames_per_packet: frames_per_packet.max(1),
            pending: Vec::new(),
            muted: false,
        }
    }

    /// feed one captured frame.  Returns a wire message once a full batch is
    /// pending.  Never blocks.
    pub fn push(
        &mut self,
        frame: AudioFrame,
        now_us: u64,
    ) -> Result<Option<WireMessage>, BoxError> {
        if self.muted {
            // muted direction consumes capture but emits nothing
            self.pending.clear();
            return Ok(None);
        }
        self.pending.push(frame);
        if self.pending.len() < self.frames_per_packet {
            return Ok(None);
        }
        let mut msg = WireMessage::new();
        msg.set_sequence(self.sequence);
        msg.set_timestamp(now_us);
        msg.encode_frames(&self.pending)?;
        self.sequence = self.sequence.wrapping_add(1);
        self.pending.clear();
        Ok(Some(msg))
    }

    pub fn set_muted(&mut self, muted: bool) -> () {
        self.muted = muted;
    }
    pub fn is_muted(&self) -> bool {
        self.muted
    }
    /// the sequence number the next packet will carry
    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }
}
