use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

/// Returns the machine's outward-facing IPv4 address.
///
/// Connecting a UDP socket sends no packets; it only makes the OS pick the
/// interface it would route through. Falls back to `127.0.0.1`.
pub fn get_local_ipv4() -> Ipv4Addr {
    match probe_local_ipv4() {
        Ok(ip) => ip,
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine local IPv4, defaulting to 127.0.0.1");
            Ipv4Addr::LOCALHOST
        }
    }
}

fn probe_local_ipv4() -> std::io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(("10.255.255.255", 1))?;
    match socket.local_addr()? {
        SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Ok(*addr.ip()),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("unexpected local address {other}"),
        )),
    }
}
