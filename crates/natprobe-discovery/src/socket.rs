//! Datagram socket seam.
//!
//! The classifier only ever borrows the caller's socket. It needs four things
//! from it: the local address, sending, a bounded wait for one datagram, and
//! a way to reject sockets that are not datagram sockets.
//!
//! Sockets must be in blocking mode. A non-blocking socket turns every wait
//! into an immediate "nothing arrived" and the transaction degenerates into a
//! busy loop until its budget runs out.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Socket operations used by the transaction executor
pub trait DatagramSocket {
    /// Address the socket is bound to
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be determined
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Send one datagram to `destination`
    ///
    /// # Errors
    ///
    /// Returns the underlying send error
    fn send_to(&self, buf: &[u8], destination: SocketAddr) -> io::Result<usize>;

    /// Wait up to `timeout` for one datagram
    ///
    /// Returns `Ok(None)` when nothing arrived in time. Any previous read
    /// timeout on the socket is restored before returning.
    ///
    /// # Errors
    ///
    /// Returns receive errors other than a timeout
    fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;

    /// Whether the socket is an IPv4 or IPv6 UDP socket
    ///
    /// # Errors
    ///
    /// Returns an error if the socket type cannot be queried
    fn is_udp(&self) -> io::Result<bool> {
        Ok(true)
    }
}

impl DatagramSocket for UdpSocket {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    fn send_to(&self, buf: &[u8], destination: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, destination)
    }

    fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        recv_with_timeout(
            timeout,
            self.read_timeout(),
            |t| self.set_read_timeout(t),
            || self.recv(buf),
        )
    }
}

impl DatagramSocket for Socket {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Socket::local_addr(self)?.as_socket().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "socket is not bound to an IP address",
            )
        })
    }

    fn send_to(&self, buf: &[u8], destination: SocketAddr) -> io::Result<usize> {
        Socket::send_to(self, buf, &SockAddr::from(destination))
    }

    fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        recv_with_timeout(
            timeout,
            self.read_timeout(),
            |t| self.set_read_timeout(t),
            || {
                let mut reader: &Socket = self;
                reader.read(buf)
            },
        )
    }

    fn is_udp(&self) -> io::Result<bool> {
        if self.r#type()? != Type::DGRAM {
            return Ok(false);
        }
        // Unix-domain datagram sockets have no IP address
        if Socket::local_addr(self)?.as_socket().is_none() {
            return Ok(false);
        }
        udp_protocol(self)
    }
}

/// Reject IP datagram sockets of other protocols, such as ICMP echo sockets
#[cfg(any(
    target_os = "android",
    target_os = "freebsd",
    target_os = "fuchsia",
    target_os = "linux"
))]
fn udp_protocol(socket: &Socket) -> io::Result<bool> {
    Ok(matches!(socket.protocol()?, Some(Protocol::UDP) | None))
}

#[cfg(not(any(
    target_os = "android",
    target_os = "freebsd",
    target_os = "fuchsia",
    target_os = "linux"
)))]
fn udp_protocol(_socket: &Socket) -> io::Result<bool> {
    Ok(true)
}

/// Run `recv` under a temporary read timeout, restoring the previous one
fn recv_with_timeout(
    timeout: Duration,
    previous: io::Result<Option<Duration>>,
    set_timeout: impl Fn(Option<Duration>) -> io::Result<()>,
    recv: impl FnOnce() -> io::Result<usize>,
) -> io::Result<Option<usize>> {
    // A zero read timeout means "block forever" to the OS
    if timeout.is_zero() {
        return Ok(None);
    }

    let previous = previous?;
    set_timeout(Some(timeout))?;
    let result = recv();
    set_timeout(previous)?;

    match result {
        Ok(len) => Ok(Some(len)),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Bind a blocking UDP socket suitable for handing to the classifier
///
/// # Arguments
/// * `addr` - Local address to bind. Use "0.0.0.0:0" for automatic port selection.
///
/// # Examples
/// ```no_run
/// use natprobe_discovery::socket::bind_udp_socket;
///
/// let socket = bind_udp_socket("0.0.0.0:0".parse().unwrap()).unwrap();
/// println!("Probing from {}", socket.local_addr().unwrap());
/// ```
///
/// # Errors
///
/// Returns an error if the socket cannot be created or bound
pub fn bind_udp_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(false)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}
