//! components that make up the real time audio bridge
//!
//! Two pipelines run per endpoint, one per direction.  Outbound:
//! [`device::DeviceSession`] -> [`packetizer::FrameSource`] ->
//! [`packetizer::Packetizer`] -> UDP.  Inbound: UDP ->
//! [`jitter_buffer::JitterBuffer`] -> [`frame_sink::FrameSink`] ->
//! [`device::DeviceSession`].  [`session::SessionCoordinator`] owns the
//! lifecycle of each direction and [`bridge`] wires it all together.

pub mod alsa_backend;
pub mod bridge;
pub mod control;
pub mod device;
pub mod error;
pub mod frame;
pub mod frame_sink;
pub mod jitter_buffer;
pub mod packet;
pub mod packetizer;
pub mod session;
pub mod socket;
