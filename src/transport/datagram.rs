//! UDP side of the bridge.
//!
//! [`DatagramEndpoint`] is the seam between the bridge loop and the socket:
//! receive one request with its sender, send one reply to an address. The
//! production implementation is `tokio::net::UdpSocket`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;

use crate::error::Result;

/// Largest datagram the receive buffer accepts.
pub const MAX_DATAGRAM: usize = 65_535;

/// One inbound request, tagged with where the reply must go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDatagram {
    pub payload: Bytes,
    pub source: SocketAddr,
}

/// A datagram socket the bridge can receive requests on and reply through.
#[async_trait]
pub trait DatagramEndpoint: Send + Sync {
    /// Wait for the next datagram; returns its length and sender.
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Send `buf` as one datagram; returns the number of bytes sent.
    async fn send_datagram(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl DatagramEndpoint for UdpSocket {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.recv_from(buf).await
    }

    async fn send_datagram(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.send_to(buf, target).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

#[async_trait]
impl<T: DatagramEndpoint + ?Sized> DatagramEndpoint for Arc<T> {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        (**self).recv_datagram(buf).await
    }

    async fn send_datagram(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        (**self).send_datagram(buf, target).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}

/// Bind the well-known request port.
///
/// Passing port 0 lets the OS choose an ephemeral port.
pub async fn bind_endpoint(addr: SocketAddr) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(addr).await?;
    tracing::debug!("Bound UDP endpoint on {}", socket.local_addr()?);
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_socket_endpoint_roundtrip() {
        let endpoint = bind_endpoint("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint_addr = DatagramEndpoint::local_addr(&endpoint).unwrap();

        client.send_to(b":e1\r", endpoint_addr).await.unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, source) = endpoint.recv_datagram(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b":e1\r");
        assert_eq!(source, client.local_addr().unwrap());

        let sent = endpoint.send_datagram(b"OK\r", source).await.unwrap();
        assert_eq!(sent, 3);

        let mut reply = [0u8; 16];
        let (n, from) = client.recv_from(&mut reply).await.unwrap();
        assert_eq!(&reply[..n], b"OK\r");
        assert_eq!(from, endpoint_addr);
    }

    #[test]
    fn test_request_datagram_fields() {
        let request = RequestDatagram {
            payload: Bytes::from_static(b":e1\r"),
            source: "127.0.0.1:4000".parse().unwrap(),
        };
        assert_eq!(request.payload.len(), 4);
        assert_eq!(request.source.port(), 4000);
    }
}
