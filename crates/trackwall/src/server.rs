use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinSet;

use crate::{Connection, Resolver, DNS_WORKERS, MAX_UDP_PACKET_SIZE};

type HandlerResult = anyhow::Result<()>;

/// The DNS frontend: one UDP socket and one TCP listener on the same
/// address, polled by a pool of worker tasks. Every inbound message is
/// handled in its own task.
pub struct DnsServer {
    udp_socket: Arc<UdpSocket>,
    tcp_listener: Arc<TcpListener>,
    resolver: Arc<Resolver>,
    workers: JoinSet<HandlerResult>,
}

impl DnsServer {
    pub async fn bind(listen_on: SocketAddr, resolver: Arc<Resolver>) -> anyhow::Result<Self> {
        let udp_socket = Arc::new(
            UdpSocket::bind(listen_on)
                .await
                .with_context(|| format!("error while binding a UDP socket on {listen_on}"))?,
        );

        let tcp_listener = Arc::new(
            TcpListener::bind(listen_on)
                .await
                .with_context(|| format!("error while binding a TCP listener on {listen_on}"))?,
        );

        Ok(DnsServer {
            udp_socket,
            tcp_listener,
            resolver,
            workers: JoinSet::new(),
        })
    }

    pub fn add_workers(&mut self, n: u8) {
        for _ in 0..n {
            self.workers.spawn(handle_incoming_requests(
                self.udp_socket.clone(),
                self.tcp_listener.clone(),
                self.resolver.clone(),
            ));
        }
    }

    pub async fn block_until_completion(mut self) -> anyhow::Result<()> {
        if self.workers.is_empty() {
            self.add_workers(DNS_WORKERS);
        }
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result.context("DNS worker task failed to execute")? {
                tracing::debug!("error in a DNS worker: {e:#}");
            }
        }
        Ok(())
    }
}

async fn handle_incoming_requests(
    udp_socket: Arc<UdpSocket>,
    tcp_listener: Arc<TcpListener>,
    resolver: Arc<Resolver>,
) -> HandlerResult {
    let mut recv = vec![0u8; MAX_UDP_PACKET_SIZE];
    let mut handlers: JoinSet<HandlerResult> = JoinSet::new();
    loop {
        tokio::select! {
            received = udp_socket.recv_from(&mut recv) => {
                let (length, peer) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::warn!("error while receiving a UDP query: {e}");
                        continue;
                    }
                };
                let connection = Connection::Udp { socket: udp_socket.clone(), peer };
                handlers.spawn(resolver.clone().resolve_query(connection, recv[..length].to_vec()));
            }
            accepted = tcp_listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("error while accepting a TCP connection: {e}");
                        continue;
                    }
                };
                let mut connection = Connection::Tcp(stream);
                let mut raw = Vec::new();
                if connection.read(&mut raw).await.is_err() {
                    continue;
                }
                handlers.spawn(resolver.clone().resolve_query(connection, raw));
            }
            Some(result) = handlers.join_next() => {
                if let Err(e) = result.context("query task failed to execute")? {
                    tracing::debug!("error while handling a query: {e:#}");
                }
            }
        }
    }
}
