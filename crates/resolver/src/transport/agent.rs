//! C5: `ServerAgent` binds one server address to one request/response
//! exchange. Adapted from the teacher's `util::nameserver::query_nameserver`.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};

use dns_proto::protocol::types::Message;

use crate::error::ResolutionError;
use crate::transport::net::{read_tcp_bytes, send_tcp_bytes, send_udp_bytes, UDP_MAX_SIZE};

/// One exchange with one upstream server: try UDP, and if the response
/// comes back truncated, re-send exactly once over TCP to the same
/// server before giving up. This is the boundary behaviour spec'd for
/// a forwarded query's single exchange.
pub struct ServerAgent {
    pub address: SocketAddr,
}

impl ServerAgent {
    pub fn new(address: SocketAddr) -> Self {
        Self { address }
    }

    pub async fn exchange(
        &self,
        request: Message,
        timeout: Duration,
    ) -> Result<Message, ResolutionError> {
        tokio::time::timeout(timeout, self.exchange_notimeout(request))
            .await
            .map_err(|_| ResolutionError::Timeout)?
    }

    async fn exchange_notimeout(&self, request: Message) -> Result<Message, ResolutionError> {
        if let Some(response) = self.exchange_udp(request.clone()).await? {
            if !response.header.is_truncated {
                return Ok(response);
            }
            tracing::debug!(address = %self.address, "UDP response truncated, retrying over TCP");
        }
        self.exchange_tcp(request).await
    }

    async fn exchange_udp(&self, request: Message) -> Result<Option<Message>, ResolutionError> {
        let id = request.header.id;
        let bound = if self.address.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bound)
            .await
            .map_err(|e| ResolutionError::Network { detail: e.to_string() })?;
        socket
            .connect(self.address)
            .await
            .map_err(|e| ResolutionError::Network { detail: e.to_string() })?;

        let bytes = request
            .into_octets()
            .map_err(|e| ResolutionError::BadQuery { detail: e.to_string() })?;
        if bytes.len() > UDP_MAX_SIZE {
            return Err(ResolutionError::BadQuery {
                detail: "request too large for UDP".into(),
            });
        }
        send_udp_bytes(&socket, bytes)
            .await
            .map_err(|e| ResolutionError::Network { detail: e.to_string() })?;

        let mut buf = vec![0u8; UDP_MAX_SIZE];
        let n = socket
            .recv(&mut buf)
            .await
            .map_err(|e| ResolutionError::Network { detail: e.to_string() })?;
        buf.truncate(n);

        let response = Message::from_octets(&buf)
            .map_err(|e| ResolutionError::DecodeError { detail: e.to_string() })?;

        if response_matches_request(id, &response) {
            Ok(Some(response))
        } else {
            Ok(None)
        }
    }

    async fn exchange_tcp(&self, request: Message) -> Result<Message, ResolutionError> {
        let id = request.header.id;
        let mut stream = TcpStream::connect(self.address)
            .await
            .map_err(|e| ResolutionError::Network { detail: e.to_string() })?;

        let bytes = request
            .into_octets()
            .map_err(|e| ResolutionError::BadQuery { detail: e.to_string() })?;
        send_tcp_bytes(&mut stream, bytes)
            .await
            .map_err(|e| ResolutionError::Network { detail: e.to_string() })?;

        let response_bytes = read_tcp_bytes(&mut stream)
            .await
            .map_err(|e| ResolutionError::Network { detail: e.to_string() })?;

        let response = Message::from_octets(&response_bytes)
            .map_err(|e| ResolutionError::DecodeError { detail: e.to_string() })?;

        if !response_matches_request(id, &response) {
            return Err(ResolutionError::DecodeError {
                detail: "response did not match request".into(),
            });
        }
        if response.header.is_truncated {
            return Err(ResolutionError::WrongTransport {
                detail: "response still truncated over TCP".into(),
            });
        }
        Ok(response)
    }
}

/// A trustworthy response must echo the request's ID, be marked as a
/// response, and use the standard opcode.
fn response_matches_request(id: u16, response: &Message) -> bool {
    response.header.id == id
        && response.header.is_response
        && matches!(
            response.header.opcode,
            dns_proto::protocol::types::Opcode::Standard
        )
}
