//! Datagram Transport Module
//!
//! All inter-node traffic is fire-and-forget UDP. Every worker thread binds
//! one socket per inbound purpose; small pump tasks forward each received
//! datagram into the worker's single inbox so the event loop multiplexes one
//! channel instead of nine sockets. Outbound traffic goes through one shared
//! send socket per worker. The two bootstrap interactions (seed membership,
//! management restart count) are plain request/reply exchanges on a throwaway
//! socket.

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::warn;

use crate::topology::types::ServerThread;

const MAX_DATAGRAM: usize = 64 * 1024;

/// Inbox capacity per worker. Senders are fire-and-forget, so a full inbox
/// sheds load instead of backing up the pumps.
const INBOX_CAPACITY: usize = 1024;

/// One received event, tagged with the purpose of the socket it arrived on.
/// Join/depart notices are `:`-delimited strings; everything else is a
/// bincode payload decoded by its handler.
#[derive(Debug)]
pub enum Inbound {
    NodeJoin(String),
    NodeDepart(String),
    SelfDepart(String),
    Request(Vec<u8>),
    Gossip(Vec<u8>),
    ReplicationResponse(Vec<u8>),
    ReplicationChange(Vec<u8>),
    CacheKeys(Vec<u8>),
    ManagementNodes(Vec<u8>),
}

impl Inbound {
    /// Index into the worker's per-event working-time table.
    pub fn class(&self) -> usize {
        match self {
            Inbound::NodeJoin(_) => 0,
            Inbound::NodeDepart(_) => 1,
            Inbound::SelfDepart(_) => 2,
            Inbound::Request(_) => 3,
            Inbound::Gossip(_) => 4,
            Inbound::ReplicationResponse(_) => 5,
            Inbound::ReplicationChange(_) => 6,
            Inbound::CacheKeys(_) => 7,
            Inbound::ManagementNodes(_) => 8,
        }
    }
}

/// Outbound side of a worker: one unbound send socket. Send failures are
/// logged and swallowed; peers self-heal through merge and re-gossip.
#[derive(Debug)]
pub struct Transport {
    socket: UdpSocket,
}

impl Transport {
    pub async fn new() -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("unable to bind send socket")?;
        Ok(Self { socket })
    }

    /// Ship a control string to `addr`.
    pub async fn send_string(&self, addr: &str, msg: &str) {
        if let Err(err) = self.socket.send_to(msg.as_bytes(), addr).await {
            warn!("failed to send to {addr}: {err}");
        }
    }

    /// Ship a bincode-encoded message to `addr`.
    pub async fn send_message<T: Serialize>(&self, addr: &str, msg: &T) {
        match bincode::serialize(msg) {
            Ok(bytes) => {
                if let Err(err) = self.socket.send_to(&bytes, addr).await {
                    warn!("failed to send to {addr}: {err}");
                }
            }
            Err(err) => warn!("failed to encode message for {addr}: {err}"),
        }
    }

    /// One request/reply exchange on a throwaway socket. Blocks until the
    /// peer answers; bootstrap has nothing useful to do without it.
    pub async fn request(addr: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("unable to bind request socket")?;
        socket
            .send_to(payload, addr)
            .await
            .with_context(|| format!("unable to reach {addr}"))?;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = socket
            .recv_from(&mut buf)
            .await
            .with_context(|| format!("no reply from {addr}"))?;
        buf.truncate(len);
        Ok(buf)
    }
}

/// The nine bound inbound sockets of one worker thread.
pub struct WorkerSockets {
    node_join: UdpSocket,
    node_depart: UdpSocket,
    self_depart: UdpSocket,
    request: UdpSocket,
    gossip: UdpSocket,
    replication_response: UdpSocket,
    replication_change: UdpSocket,
    cache_ip_response: UdpSocket,
    management_response: UdpSocket,
}

async fn bind(addr: &str) -> Result<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .with_context(|| format!("unable to bind {addr}"))
}

impl WorkerSockets {
    /// Bind every inbound endpoint of `thread`. Failure here is fatal: a
    /// worker that cannot listen cannot participate.
    pub async fn bind_all(thread: &ServerThread) -> Result<Self> {
        Ok(Self {
            node_join: bind(&thread.node_join_addr()).await?,
            node_depart: bind(&thread.node_depart_addr()).await?,
            self_depart: bind(&thread.self_depart_addr()).await?,
            request: bind(&thread.request_addr()).await?,
            gossip: bind(&thread.gossip_addr()).await?,
            replication_response: bind(&thread.replication_response_addr()).await?,
            replication_change: bind(&thread.replication_change_addr()).await?,
            cache_ip_response: bind(&thread.cache_ip_response_addr()).await?,
            management_response: bind(&thread.management_response_addr()).await?,
        })
    }

    /// Spawn one pump task per socket, all feeding `tx`. Returns the inbox.
    pub fn into_inbox(self) -> mpsc::Receiver<Inbound> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        spawn_string_pump(self.node_join, tx.clone(), Inbound::NodeJoin);
        spawn_string_pump(self.node_depart, tx.clone(), Inbound::NodeDepart);
        spawn_string_pump(self.self_depart, tx.clone(), Inbound::SelfDepart);
        spawn_bytes_pump(self.request, tx.clone(), Inbound::Request);
        spawn_bytes_pump(self.gossip, tx.clone(), Inbound::Gossip);
        spawn_bytes_pump(
            self.replication_response,
            tx.clone(),
            Inbound::ReplicationResponse,
        );
        spawn_bytes_pump(
            self.replication_change,
            tx.clone(),
            Inbound::ReplicationChange,
        );
        spawn_bytes_pump(self.cache_ip_response, tx.clone(), Inbound::CacheKeys);
        spawn_bytes_pump(self.management_response, tx, Inbound::ManagementNodes);
        rx
    }
}

fn spawn_bytes_pump(
    socket: UdpSocket,
    tx: mpsc::Sender<Inbound>,
    wrap: fn(Vec<u8>) -> Inbound,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, _)) => {
                    if tx.send(wrap(buf[..len].to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!("receive failed: {err}"),
            }
        }
    });
}

fn spawn_string_pump(
    socket: UdpSocket,
    tx: mpsc::Sender<Inbound>,
    wrap: fn(String) -> Inbound,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, src)) => match String::from_utf8(buf[..len].to_vec()) {
                    Ok(msg) => {
                        if tx.send(wrap(msg)).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!("discarding non-UTF-8 control message from {src}"),
                },
                Err(err) => warn!("receive failed: {err}"),
            }
        }
    });
}
