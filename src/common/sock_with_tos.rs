//! UDP socket builder that sets IPTOS_LOWDELAY
//!
//! Routers that honor the TOS byte will queue these datagrams ahead of bulk
//! traffic, which is exactly what a live audio stream wants.
use socket2::{Domain, SockAddr, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use super::box_error::BoxError;

const IPTOS_LOWDELAY: u32 = 0x10;

pub fn new(port: u16) -> Result<UdpSocket, BoxError> {
    let raw_sock = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    raw_sock.set_tos(IPTOS_LOWDELAY)?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    raw_sock.bind(&SockAddr::from(addr))?;
    Ok(UdpSocket::from(raw_sock))
}
