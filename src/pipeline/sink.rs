use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

/// A local destination for relayed media units.
#[async_trait]
pub trait UnitSink: Send + Sync {
    async fn send_unit(&self, unit: &[u8]) -> std::io::Result<()>;

    /// Short label for logs
    fn describe(&self) -> String;
}

/// RTP encoding the sinks carry, as named in an SDP `rtpmap` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkCodec {
    pub encoding_name: String,
    pub clock_rate: u32,
}

impl SinkCodec {
    /// Derive from a negotiated mime type such as `video/H264`.
    pub fn from_mime_type(mime_type: &str) -> SinkCodec {
        let encoding_name = mime_type
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .map(|name| name.to_ascii_uppercase())
            .unwrap_or_else(|| "H264".to_string());

        SinkCodec {
            encoding_name,
            clock_rate: 90_000,
        }
    }
}

impl Default for SinkCodec {
    fn default() -> Self {
        SinkCodec {
            encoding_name: "H264".to_string(),
            clock_rate: 90_000,
        }
    }
}

impl std::fmt::Display for SinkCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.encoding_name, self.clock_rate)
    }
}

/// Datagram sink pointing at a loopback port an encoder listens on.
pub struct UdpSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpSink {
    pub async fn loopback(port: u16) -> std::io::Result<UdpSink> {
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        socket.connect(target).await?;
        Ok(UdpSink { socket, target })
    }
}

#[async_trait]
impl UnitSink for UdpSink {
    async fn send_unit(&self, unit: &[u8]) -> std::io::Result<()> {
        self.socket.send(unit).await.map(|_| ())
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.target)
    }
}
