//! peer to peer UDP socket for audio and control datagrams
//!
//! Thin wrapper over one UDP socket shared by both directions.  The server
//! side binds the configured port and learns its peer from the first datagram
//! that arrives; the client side binds an ephemeral port and targets the
//! configured host.  Receives use a short timeout so the receive loop can
//! notice shutdown.  Send failures are the caller's problem to drop or
//! escalate; nothing here ever retries.
use simple_error::bail;
use std::fmt;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::common::box_error::BoxError;
use crate::common::sock_with_tos;

use super::packet::WireMessage;

const RECV_TIMEOUT_MS: u64 = 250;

pub struct BridgeSocket {
    sock: UdpSocket,
    peer: Arc<Mutex<Option<SocketAddr>>>,
    learn_peer: bool,
}

impl BridgeSocket {
    /// bind the socket.  learn_peer makes this the server side: the peer
    /// address is taken from whoever talks to us.
    pub fn build(port: u16, learn_peer: bool) -> Result<BridgeSocket, BoxError> {
        let sock = sock_with_tos::new(port)?;
        sock.set_read_timeout(Some(Duration::from_millis(RECV_TIMEOUT_MS)))?;
        Ok(BridgeSocket {
            sock,
            peer: Arc::new(Mutex::new(None)),
            learn_peer,
        })
    }

    /// point at a known peer (client side)
    pub fn connect(&self, host: &str, port: u16) -> Result<(), BoxError> {
        let mut addrs = format!("{}:{}", host, port).to_socket_addrs()?;
        match addrs.next() {
            Some(addr) => {
                *self.peer.lock().unwrap() = Some(addr);
                Ok(())
            }
            None => bail!("cannot resolve peer {}:{}", host, port),
        }
    }

    pub fn has_peer(&self) -> bool {
        self.peer.lock().unwrap().is_some()
    }
    pub fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap()
    }

    /// a clone sharing the underlying socket and learned peer, so the send
    /// and receive loops can run on their own threads
    pub fn try_clone(&self) -> Result<BridgeSocket, BoxError> {
        Ok(BridgeSocket {
            sock: self.sock.try_clone()?,
            peer: self.peer.clone(),
            learn_peer: self.learn_peer,
        })
    }

    pub fn send(&self, msg: &WireMessage) -> Result<usize, BoxError> {
        let peer = *self.peer.lock().unwrap();
        match peer {
            Some(addr) => Ok(self.sock.send_to(msg.get_send_buffer(), addr)?),
            None => bail!("no peer to send to yet"),
        }
    }

    /// receive one datagram into msg.  Ok(false) means the timeout passed
    /// with nothing to read; the caller should check for shutdown and loop.
    pub fn recv(&self, msg: &mut WireMessage) -> Result<bool, BoxError> {
        match self.sock.recv_from(msg.get_buffer()) {
            Ok((nbytes, from)) => {
                if self.learn_peer {
                    *self.peer.lock().unwrap() = Some(from);
                }
                msg.set_nbytes(nbytes)?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.sock.local_addr().map(|a| a.port()).unwrap_or(0)
    }
}

impl fmt::Display for BridgeSocket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ port: {}, peer: {:?}, learns: {} }}",
            self.local_port(),
            self.peer(),
            self.learn_peer
        )
    }
}

#[cfg(test)]
mod test_bridge_socket {
    use super::*;
    use crate::stream::frame::{AudioFrame, StreamFormat};
    use crate::stream::packet::PacketKind;

    #[test]
    fn build_and_connect() {
        let sock = BridgeSocket::build(0, false).unwrap();
        assert!(!sock.has_peer());
        sock.connect("127.0.0.1", 48481).unwrap();
        assert!(sock.has_peer());
    }

    #[test]
    fn send_without_peer_fails() {
        let sock = BridgeSocket::build(0, true).unwrap();
        let msg = WireMessage::new();
        assert!(sock.send(&msg).is_err());
    }

    #[test]
    fn recv_timeout_is_not_an_error() {
        let sock = BridgeSocket::build(0, true).unwrap();
        let mut msg = WireMessage::new();
        assert_eq!(sock.recv(&mut msg).unwrap(), false);
    }

    #[test]
    fn server_learns_peer_and_audio_round_trips() {
        // client sends to the server; the server learns where to answer
        let server = BridgeSocket::build(0, true).unwrap();
        let client = BridgeSocket::build(0, false).unwrap();
        client.connect("127.0.0.1", server.local_port()).unwrap();

        let fmt = StreamFormat::new(48_000, 2);
        let frame = AudioFrame::new(fmt, vec![0.125; 64]);
        let mut out = WireMessage::new();
        out.set_sequence(77);
        out.set_timestamp(123);
        out.encode_frames(&[frame.clone()]).unwrap();
        client.send(&out).unwrap();

        let mut inbound = WireMessage::new();
        assert!(server.recv(&mut inbound).unwrap());
        assert!(server.has_peer());
        assert_eq!(inbound.get_kind(), Some(PacketKind::Audio));
        assert_eq!(inbound.get_sequence(), 77);
        let frames = inbound.decode_frames(fmt);
        assert_eq!(frames.len(), 1);
        for (a, b) in frames[0].samples.iter().zip(frame.samples.iter()) {
            assert!((a - b).abs() < 0.0001);
        }

        // and the learned peer works for the reverse path
        let mut reply = WireMessage::new();
        reply.set_kind(PacketKind::Mute);
        server.send(&reply).unwrap();
        let mut back = WireMessage::new();
        assert!(client.recv(&mut back).unwrap());
        assert_eq!(back.get_kind(), Some(PacketKind::Mute));
    }

    #[test]
    fn clones_share_the_learned_peer() {
        let sock = BridgeSocket::build(0, false).unwrap();
        let clone = sock.try_clone().unwrap();
        sock.connect("127.0.0.1", 9999).unwrap();
        assert!(clone.has_peer());
    }
}
