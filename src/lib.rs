//! soundbridge - relay live audio between two machines over UDP
//!
//! One machine's microphone and speaker become usable as the audio input and
//! output devices of the other.  Each endpoint runs two independent pipelines,
//! one per direction:
//!
//! DeviceSession -> FrameSource -> Packetizer -> UDP -> JitterBuffer -> FrameSink -> DeviceSession
//!
//! The [`stream`] module holds the real time core.  The [`common`] module has
//! the plumbing shared by both directions (config, sockets, timers, errors).
#[macro_use]
extern crate num_derive;

pub mod common;
pub mod stream;
pub mod utils;
