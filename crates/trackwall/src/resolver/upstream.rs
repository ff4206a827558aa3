use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::MAX_UDP_PACKET_SIZE;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay a raw DNS query to the upstream resolver and return the raw reply.
/// The exchange uses the transport the client used; a fresh socket per query
/// keeps transaction ids from different clients apart. Failures are not
/// retried, the caller answers the client with a failure instead.
pub(super) async fn exchange(raw_query: &[u8], upstream: SocketAddr, use_tcp: bool) -> anyhow::Result<Vec<u8>> {
    timeout(UPSTREAM_TIMEOUT, async {
        if use_tcp {
            exchange_tcp(raw_query, upstream).await
        } else {
            exchange_udp(raw_query, upstream).await
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("upstream resolver {upstream} timed out"))?
}

async fn exchange_udp(raw_query: &[u8], upstream: SocketAddr) -> anyhow::Result<Vec<u8>> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("UDP: unable to bind a forwarding socket")?;
    socket
        .connect(upstream)
        .await
        .context("UDP: error while connecting to the upstream resolver")?;
    socket
        .send(raw_query)
        .await
        .context("UDP: error while forwarding the query")?;

    let mut reply = vec![0; MAX_UDP_PACKET_SIZE];
    let length = socket.recv(&mut reply).await.context("UDP: error while reading the reply")?;
    reply.truncate(length);
    Ok(reply)
}

async fn exchange_tcp(raw_query: &[u8], upstream: SocketAddr) -> anyhow::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(upstream)
        .await
        .context("TCP: error while connecting to the upstream resolver")?;

    let length = (raw_query.len() as u16).to_be_bytes();
    stream
        .write_all(&length)
        .await
        .context("TCP: error while sending the query length")?;
    stream
        .write_all(raw_query)
        .await
        .context("TCP: error while forwarding the query")?;

    let length = stream
        .read_u16()
        .await
        .context("TCP: error while reading the reply length")? as usize;
    let mut reply = vec![0; length];
    stream
        .read_exact(&mut reply)
        .await
        .context("TCP: error while reading the reply")?;
    Ok(reply)
}
