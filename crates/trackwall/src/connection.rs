use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpStream, UdpSocket};

use crate::MAX_UDP_PACKET_SIZE;

/// The client's transport. Forwarded queries use the same transport towards
/// the upstream; replies go back over it unchanged.
pub enum Connection {
    Tcp(TcpStream),
    Udp { socket: Arc<UdpSocket>, peer: SocketAddr },
}

impl Connection {
    /// Read one DNS query into `dst`. TCP messages carry a two-byte length
    /// prefix; UDP datagrams arrive whole through the listening socket, so
    /// this is only called for TCP connections.
    pub async fn read(&mut self, dst: &mut Vec<u8>) -> anyhow::Result<usize> {
        match self {
            Connection::Tcp(stream) => {
                let length = stream
                    .read_u16()
                    .await
                    .context("TCP: error while reading the query length")? as usize;
                dst.resize(length, 0);
                stream
                    .read_exact(dst)
                    .await
                    .context("TCP: error while reading a query")?;
                Ok(length)
            }
            Connection::Udp { socket, .. } => {
                dst.resize(MAX_UDP_PACKET_SIZE, 0);
                let length = socket.recv(dst).await.context("UDP: error while reading a query")?;
                dst.truncate(length);
                Ok(length)
            }
        }
    }

    pub async fn send_reply(&mut self, src: &[u8]) -> anyhow::Result<()> {
        match self {
            Connection::Tcp(stream) => {
                let length = (src.len() as u16).to_be_bytes();
                stream
                    .write_all(&length)
                    .await
                    .context("TCP: error while sending the reply length")?;
                stream.write_all(src).await.context("TCP: error while sending a reply")?;
            }
            Connection::Udp { socket, peer } => {
                socket
                    .send_to(src, *peer)
                    .await
                    .with_context(|| format!("UDP: error while sending a reply to {peer}"))?;
            }
        }
        Ok(())
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, Connection::Tcp(_))
    }
}
