//! the datagram that goes on the wire
//!
//! Intentionally simple: a 14 byte header and raw 16 bit PCM.  No
//! compression, no encryption, no version byte.  Audio and control share the
//! same header; control variants are encoded in the kind byte and carry no
//! payload.
//!
//! Header layout (network endian):
//!   kind: u8, frame_count: u8, sequence: u32, timestamp: u64
use byteorder::{ByteOrder, NetworkEndian};
use simple_error::bail;
use std::fmt;

use crate::common::box_error::BoxError;

use super::frame::{sample_to_f32, sample_to_i16, AudioFrame, StreamFormat};

/// sized to fit one datagram under a typical 1500 MTU
pub const WIRE_BUF_SIZE: usize = 1472;
pub const WIRE_HEADER_SIZE: usize = 1 + 1 + 4 + 8;

/// what a datagram is carrying, encoded in the first header byte
#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive)]
pub enum PacketKind {
    Audio = 0,
    Mute = 1,
    Unmute = 2,
    ResyncRequest = 3,
    Teardown = 4,
}

pub struct WireMessage {
    buffer: [u8; WIRE_BUF_SIZE],
    nbytes: usize,
}

impl WireMessage {
    pub fn new() -> WireMessage {
        WireMessage {
            buffer: [0; WIRE_BUF_SIZE],
            nbytes: WIRE_HEADER_SIZE,
        }
    }
    pub fn get_kind(&self) -> Option<PacketKind> {
        num_traits::FromPrimitive::from_u8(self.buffer[0])
    }
    pub fn set_kind(&mut self, kind: PacketKind) -> () {
        self.buffer[0] = kind as u8;
    }
    pub fn get_frame_count(&self) -> u8 {
        self.buffer[1]
    }
    pub fn set_frame_count(&mut self, count: u8) -> () {
        self.buffer[1] = count;
    }
    /// per-direction monotonic sequence number, assigned by the packetizer
    pub fn get_sequence(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer[2..6])
    }
    pub fn set_sequence(&mut self, seq: u32) -> () {
        NetworkEndian::write_u32(&mut self.buffer[2..6], seq)
    }
    /// capture time in microseconds on the sender's monotonic clock
    pub fn get_timestamp(&self) -> u64 {
        NetworkEndian::read_u64(&self.buffer[6..14])
    }
    pub fn set_timestamp(&mut self, t: u64) -> () {
        NetworkEndian::write_u64(&mut self.buffer[6..14], t)
    }
    /// the whole buffer, for the socket to receive into
    pub fn get_buffer(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
    /// the slice that actually has data, for the socket to send
    pub fn get_send_buffer(&self) -> &[u8] {
        &self.buffer[0..self.nbytes]
    }
    pub fn get_nbytes(&self) -> usize {
        self.nbytes
    }
    /// record how many bytes the socket read, with sanity checks
    pub fn set_nbytes(&mut self, amt: usize) -> Result<(), BoxError> {
        if !self.is_valid(amt) {
            bail!("invalid packet of {} bytes", amt);
        }
        self.nbytes = amt;
        Ok(())
    }
    /// a packet has to be at least a header and carry whole 16 bit samples
    pub fn is_valid(&self, amt: usize) -> bool {
        amt >= WIRE_HEADER_SIZE && amt <= WIRE_BUF_SIZE && (amt - WIRE_HEADER_SIZE) % 2 == 0
    }

    /// pack a batch of equal size frames into the payload
    pub fn encode_frames(&mut self, frames: &[AudioFrame]) -> Result<usize, BoxError> {
        let total_samples: usize = frames.iter().map(|f| f.samples.len()).sum();
        if WIRE_HEADER_SIZE + total_samples * 2 > WIRE_BUF_SIZE {
            bail!(
                "audio batch of {} samples does not fit one datagram",
                total_samples
            );
        }
        if frames.len() > u8::MAX as usize {
            bail!("too many frames for one packet: {}", frames.len());
        }
        self.set_kind(PacketKind::Audio);
        self.set_frame_count(frames.len() as u8);
        let mut idx = WIRE_HEADER_SIZE;
        for frame in frames {
            for v in &frame.samples {
                NetworkEndian::write_i16(&mut self.buffer[idx..idx + 2], sample_to_i16(*v));
                idx += 2;
            }
        }
        self.nbytes = idx;
        Ok(idx)
    }

    /// unpack the payload back into frames.  The wire does not carry the
    /// format; the receiver supplies the negotiated one.
    pub fn decode_frames(&self, format: StreamFormat) -> Vec<AudioFrame> {
        let count = self.get_frame_count() as usize;
        let total_samples = (self.nbytes - WIRE_HEADER_SIZE) / 2;
        if count == 0 || total_samples == 0 || total_samples % count != 0 {
            return Vec::new();
        }
        let samples_per_frame = total_samples / count;
        let mut frames = Vec::with_capacity(count);
        let mut idx = WIRE_HEADER_SIZE;
        for _ in 0..count {
            let mut samples = Vec::with_capacity(samples_per_frame);
            for _ in 0..samples_per_frame {
                samples.push(sample_to_f32(NetworkEndian::read_i16(
                    &self.buffer[idx..idx + 2],
                )));
                idx += 2;
            }
            frames.push(AudioFrame::new(format, samples));
        }
        frames
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ kind: {:?}, seq: {}, ts: {}, frames: {}, nbytes: {} }}",
            self.get_kind(),
            self.get_sequence(),
            self.get_timestamp(),
            self.get_frame_count(),
            self.nbytes
        )
    }
}
