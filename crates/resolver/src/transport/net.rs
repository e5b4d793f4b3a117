//! Raw UDP/TCP framing: C4's channel read/write contract, independent
//! of message semantics. Adapted from the teacher's `util::net`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

/// Largest UDP datagram this core will ever send; anything bigger gets
/// the truncation bit set and is cut down to this size, per RFC 1035's
/// original 512-byte limit (this core does not implement EDNS(0)).
pub const UDP_MAX_SIZE: usize = 512;

const TC_BIT: u8 = 0b0000_0010;

#[derive(Debug)]
pub enum TcpError {
    TooShort { expected: usize, actual: usize },
    Io(std::io::Error),
}

impl std::fmt::Display for TcpError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TcpError::TooShort { expected, actual } => {
                write!(f, "expected {expected} bytes, got {actual}")
            }
            TcpError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for TcpError {}

impl From<std::io::Error> for TcpError {
    fn from(e: std::io::Error) -> Self {
        TcpError::Io(e)
    }
}

/// Read one length-prefixed DNS message from a TCP stream.
pub async fn read_tcp_bytes(stream: &mut TcpStream) -> Result<Vec<u8>, TcpError> {
    let expected = usize::from(stream.read_u16().await?);
    let mut buf = vec![0u8; expected];
    let mut read = 0;
    while read < expected {
        let n = stream.read(&mut buf[read..]).await?;
        if n == 0 {
            return Err(TcpError::TooShort {
                expected,
                actual: read,
            });
        }
        read += n;
    }
    Ok(buf)
}

/// Write one length-prefixed DNS message to a TCP stream, truncating
/// (and setting TC) if it somehow exceeds `u16::MAX`.
pub async fn send_tcp_bytes(stream: &mut TcpStream, mut bytes: Vec<u8>) -> Result<(), TcpError> {
    if bytes.len() > usize::from(u16::MAX) {
        bytes.truncate(usize::from(u16::MAX));
        if bytes.len() > 2 {
            bytes[2] |= TC_BIT;
        }
    }
    let len = bytes.len() as u16;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    Ok(())
}

/// Send a UDP datagram, truncating to [`UDP_MAX_SIZE`] and setting the
/// TC bit if the message doesn't fit.
pub async fn send_udp_bytes(socket: &UdpSocket, mut bytes: Vec<u8>) -> std::io::Result<()> {
    if bytes.len() > UDP_MAX_SIZE {
        bytes.truncate(UDP_MAX_SIZE);
        if bytes.len() > 2 {
            bytes[2] |= TC_BIT;
        }
    } else if bytes.len() > 2 {
        bytes[2] &= !TC_BIT;
    }
    socket.send(&bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tcp_roundtrips_a_short_message() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let bytes = read_tcp_bytes(&mut stream).await.unwrap();
            send_tcp_bytes(&mut stream, bytes).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        send_tcp_bytes(&mut client, vec![1, 2, 3, 4]).await.unwrap();
        let echoed = read_tcp_bytes(&mut client).await.unwrap();
        assert_eq!(echoed, vec![1, 2, 3, 4]);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn udp_sets_truncation_bit_on_oversized_message() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(peer.local_addr().unwrap()).await.unwrap();

        let mut big = vec![0u8; UDP_MAX_SIZE + 100];
        big[2] = 0; // clear TC to start
        send_udp_bytes(&socket, big).await.unwrap();

        let mut buf = vec![0u8; UDP_MAX_SIZE];
        let n = peer.recv(&mut buf).await.unwrap();
        assert_eq!(n, UDP_MAX_SIZE);
        assert_ne!(buf[2] & TC_BIT, 0);
    }
}
