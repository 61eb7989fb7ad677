//! LAN discovery: UDP multicast beacons scoped by pool name, unicast replies,
//! hand newly seen peers to the transport for dialing.
//!
//! Presence for the pool comes from TCP connection lifecycle, not from here;
//! this table only dedups announcements and expires silent peers so a
//! returning peer is dialed again.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tidepool_core::{Keypair, PeerId, PROTOCOL_VERSION};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::debug;

const MULTICAST_GROUP: &str = "239.255.71.71";
const BEACON_INTERVAL: Duration = Duration::from_secs(4);
const PEER_TIMEOUT: Duration = Duration::from_secs(16);

/// Discovery datagrams. Bincode-encoded; anything that fails to decode or
/// names another pool is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum Announce {
    /// Multicast presence advertisement.
    Beacon(Presence),
    /// Unicast answer to a beacon.
    Reply(Presence),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Presence {
    protocol_version: u8,
    peer_id: PeerId,
    pool: String,
    listen_port: u16,
}

struct PeerState {
    #[allow(dead_code)]
    addr: SocketAddr,
    last_seen: Instant,
}

pub async fn run_discovery(
    keypair: Arc<Keypair>,
    pool_name: String,
    discovery_port: u16,
    transport_port: u16,
    connect_tx: tokio::sync::mpsc::UnboundedSender<(PeerId, SocketAddr)>,
) -> std::io::Result<()> {
    let socket = make_multicast_socket(discovery_port).await?;
    let socket = Arc::new(socket);
    let peers: Arc<Mutex<HashMap<PeerId, PeerState>>> = Arc::new(Mutex::new(HashMap::new()));

    let send_socket = socket.clone();
    let recv_socket = socket.clone();
    let peers_recv = peers.clone();
    let name_beacon = pool_name.clone();
    let keypair_beacon = keypair.clone();

    let beacon_task = tokio::spawn(async move {
        beacon_loop(
            send_socket,
            keypair_beacon,
            name_beacon,
            discovery_port,
            transport_port,
        )
        .await
    });
    let recv_task = tokio::spawn(async move {
        recv_loop(
            recv_socket,
            peers_recv,
            keypair,
            pool_name,
            transport_port,
            connect_tx,
        )
        .await
    });
    let timeout_task = tokio::spawn(async move { peer_timeout_loop(peers).await });

    let _ = tokio::try_join!(beacon_task, recv_task, timeout_task);
    Ok(())
}

async fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind(("0.0.0.0", discovery_port))?;
    let multicast: std::net::Ipv4Addr =
        MULTICAST_GROUP
            .parse()
            .map_err(|e: std::net::AddrParseError| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
            })?;
    std_sock.join_multicast_v4(&multicast, &std::net::Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_nonblocking(true)?;
    tokio::net::UdpSocket::from_std(std_sock)
}

async fn beacon_loop(
    socket: Arc<UdpSocket>,
    keypair: Arc<Keypair>,
    pool_name: String,
    discovery_port: u16,
    transport_port: u16,
) -> std::io::Result<()> {
    let beacon = Announce::Beacon(Presence {
        protocol_version: PROTOCOL_VERSION,
        peer_id: keypair.peer_id(),
        pool: pool_name,
        listen_port: transport_port,
    });
    let datagram = bincode::serialize(&beacon)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let dest: SocketAddr = format!("{}:{}", MULTICAST_GROUP, discovery_port)
        .parse()
        .map_err(|e: std::net::AddrParseError| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        })?;
    loop {
        let _ = socket.send_to(&datagram, dest).await;
        tokio::time::sleep(BEACON_INTERVAL).await;
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    peers: Arc<Mutex<HashMap<PeerId, PeerState>>>,
    keypair: Arc<Keypair>,
    pool_name: String,
    transport_port: u16,
    connect_tx: tokio::sync::mpsc::UnboundedSender<(PeerId, SocketAddr)>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 65536];
    let my_id = keypair.peer_id();
    let reply_datagram = bincode::serialize(&Announce::Reply(Presence {
        protocol_version: PROTOCOL_VERSION,
        peer_id: my_id,
        pool: pool_name.clone(),
        listen_port: transport_port,
    }))
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                let Ok(announce) = bincode::deserialize::<Announce>(&buf[..n]) else {
                    continue;
                };
                let (presence, wants_reply) = match announce {
                    Announce::Beacon(p) => (p, true),
                    Announce::Reply(p) => (p, false),
                };
                if presence.protocol_version != PROTOCOL_VERSION {
                    continue;
                }
                if presence.pool != pool_name {
                    continue;
                }
                if presence.peer_id == my_id {
                    continue;
                }
                let addr = SocketAddr::new(from.ip(), presence.listen_port);
                let is_new = {
                    let mut p = peers.lock().await;
                    let is_new = !p.contains_key(&presence.peer_id);
                    p.insert(
                        presence.peer_id,
                        PeerState {
                            addr,
                            last_seen: Instant::now(),
                        },
                    );
                    is_new
                };
                if is_new {
                    debug!(peer = %presence.peer_id, %addr, "discovered peer");
                    let _ = connect_tx.send((presence.peer_id, addr));
                }
                if wants_reply {
                    let _ = socket.send_to(&reply_datagram, from).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}

async fn peer_timeout_loop(peers: Arc<Mutex<HashMap<PeerId, PeerState>>>) -> std::io::Result<()> {
    loop {
        tokio::time::sleep(Duration::from_secs(4)).await;
        let now = Instant::now();
        let mut p = peers.lock().await;
        p.retain(|_, s| now.duration_since(s.last_seen) < PEER_TIMEOUT);
    }
}
