//! out of band control messages
//!
//! These ride the same UDP socket as the audio, tagged by the packet kind.
//! They are small, idempotent and best effort: no sequencing, no ack, no
//! retry.  When a toggle visibly fails the operator just issues it again.
use std::fmt;

use super::packet::{PacketKind, WireMessage};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMessage {
    /// stop the receiving endpoint's capture direction producing packets
    Mute,
    Unmute,
    /// ask the receiving endpoint to discard ordering state and re-anchor
    ResyncRequest,
    /// the peer is going away
    Teardown,
}

impl ControlMessage {
    pub fn kind(&self) -> PacketKind {
        match self {
            ControlMessage::Mute => PacketKind::Mute,
            ControlMessage::Unmute => PacketKind::Unmute,
            ControlMessage::ResyncRequest => PacketKind::ResyncRequest,
            ControlMessage::Teardown => PacketKind::Teardown,
        }
    }
    pub fn from_kind(kind: PacketKind) -> Option<ControlMessage> {
        match kind {
            PacketKind::Mute => Some(ControlMessage::Mute),
            PacketKind::Unmute => Some(ControlMessage::Unmute),
            PacketKind::ResyncRequest => Some(ControlMessage::ResyncRequest),
            PacketKind::Teardown => Some(ControlMessage::Teardown),
            PacketKind::Audio => None,
        }
    }
    /// build the datagram for this message.  Control packets are just a
    /// header; the variant lives in the kind byte.
    pub fn to_wire(&self, now_us: u64) -> WireMessage {
        let mut msg = WireMessage::new();
        msg.set_kind(self.kind());
        msg.set_timestamp(now_us);
        msg
    }
    pub fn from_wire(msg: &WireMessage) -> Option<ControlMessage> {
        msg.get_kind().and_then(ControlMessage::from_kind)
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
