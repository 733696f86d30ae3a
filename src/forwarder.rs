//! Upstream forwarding over UDP, falling back to TCP on truncation.
//!
//! Each exchange is bounded by a fixed timeout. Callers treat any error from
//! an [`Upstream`] as "no answer".

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, Record, RecordType};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace};

use crate::error::DnsError;

/// Maximum UDP DNS response size with EDNS(0)
const MAX_UDP_RESPONSE_SIZE: usize = 4096;

/// Resolver that questions are forwarded to.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Ask for `name`/`rtype` and return the answer section.
    async fn query(&self, name: &Name, rtype: RecordType) -> Result<Vec<Record>, DnsError>;
}

/// Forwards to a single resolver address.
#[derive(Debug, Clone)]
pub struct UdpTcpForwarder {
    server_addr: SocketAddr,
    timeout: Duration,
}

impl UdpTcpForwarder {
    /// Create a forwarder for `server_addr`.
    pub fn new(server_addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            server_addr,
            timeout,
        }
    }

    /// Resolver address.
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    async fn exchange_udp(&self, request: &[u8]) -> Result<Vec<u8>, DnsError> {
        let bind_addr: SocketAddr = if self.server_addr.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.server_addr).await?;
        socket.send(request).await?;

        let mut buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
        let len = socket.recv(&mut buf).await?;
        buf.truncate(len);

        trace!(server = %self.server_addr, bytes = len, "UDP response received");
        Ok(buf)
    }

    async fn exchange_tcp(&self, request: &[u8]) -> Result<Vec<u8>, DnsError> {
        let len = u16::try_from(request.len())
            .map_err(|_| DnsError::Upstream("query too large for TCP framing".into()))?;

        let mut stream = TcpStream::connect(self.server_addr).await?;
        stream.set_nodelay(true)?;
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(request).await?;
        stream.flush().await?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await?;
        let mut buf = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut buf).await?;

        trace!(server = %self.server_addr, bytes = buf.len(), "TCP response received");
        Ok(buf)
    }

    async fn exchange(&self, name: &Name, rtype: RecordType) -> Result<Message, DnsError> {
        let id = fastrand::u16(..);
        let request = build_query(id, name, rtype).to_vec()?;

        let response = parse_response(id, &self.exchange_udp(&request).await?)?;
        if !response.truncated() {
            return Ok(response);
        }

        debug!(name = %name, rtype = ?rtype, "UDP response truncated, retrying over TCP");
        parse_response(id, &self.exchange_tcp(&request).await?)
    }
}

#[async_trait]
impl Upstream for UdpTcpForwarder {
    async fn query(&self, name: &Name, rtype: RecordType) -> Result<Vec<Record>, DnsError> {
        let mut response = tokio::time::timeout(self.timeout, self.exchange(name, rtype))
            .await
            .map_err(|_| {
                DnsError::Timeout(format!("{} {:?} via {}", name, rtype, self.server_addr))
            })??;

        debug!(
            name = %name,
            rtype = ?rtype,
            rcode = ?response.response_code(),
            answers = response.answer_count(),
            "upstream answered"
        );

        Ok(response.take_answers())
    }
}

fn build_query(id: u16, name: &Name, rtype: RecordType) -> Message {
    let mut message = Message::new();
    message.set_id(id);
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(Query::query(name.clone(), rtype));
    message
}

fn parse_response(id: u16, bytes: &[u8]) -> Result<Message, DnsError> {
    let message = Message::from_vec(bytes)?;
    if message.id() != id {
        return Err(DnsError::Upstream(format!(
            "response id {} does not match query id {}",
            message.id(),
            id
        )));
    }
    if message.message_type() != MessageType::Response {
        return Err(DnsError::Upstream("upstream sent a query, not a response".into()));
    }
    Ok(message)
}
