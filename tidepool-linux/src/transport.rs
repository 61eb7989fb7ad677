//! Mesh transport: TCP server (incoming), TCP client (outbound to discovered
//! peers), handshake + encrypted frames.
//!
//! Supplies the transport collaborator the pool core consumes: reliable,
//! ordered delivery per peer over TCP, presence events from connection
//! lifecycle, and per-pair ChaCha20-Poly1305 encryption.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use tidepool_core::identity::{decrypt_wire, derive_session_key, encrypt_wire, PublicKey};
use tidepool_core::wire::{decode_frame, encode_frame};
use tidepool_core::{Keypair, Message, PeerId, Pool, Transport, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use sha2::{Digest, Sha256};

const HANDSHAKE_SIZE: usize = 1 + 16 + 32 + 8; // version + peer_id + public_key + pool tag
const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;

/// The pool instance shared between transport, discovery, and console.
pub type SharedPool = Arc<Mutex<Pool<MeshTransport>>>;

/// Tag identifying a pool on the wire: first 8 bytes of SHA-256 of the name.
/// Peers from a different pool fail the handshake before any frame flows.
pub fn pool_tag(name: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(b"tidepool-pool-v1");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let mut tag = [0u8; 8];
    tag.copy_from_slice(&digest[..8]);
    tag
}

/// Shared peer-sender table; the `Transport` handle given to the pool.
/// `send` queues plaintext frames onto the per-connection writer task.
#[derive(Clone, Default)]
pub struct MeshTransport {
    senders: Arc<StdMutex<HashMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl MeshTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_connected(&self, peer: &PeerId) -> bool {
        self.senders
            .lock()
            .expect("sender table poisoned")
            .contains_key(peer)
    }
}

impl Transport for MeshTransport {
    fn connected_peers(&self) -> Vec<PeerId> {
        self.senders
            .lock()
            .expect("sender table poisoned")
            .keys()
            .copied()
            .collect()
    }

    fn send(&self, msg: &Message, to: &[PeerId]) {
        let frame = match encode_frame(msg) {
            Ok(f) => f,
            Err(e) => {
                warn!(%e, "dropping unencodable message");
                return;
            }
        };
        let senders = self.senders.lock().expect("sender table poisoned");
        for peer in to {
            if let Some(tx) = senders.get(peer) {
                let _ = tx.send(frame.clone());
            }
        }
    }
}

/// Run transport: listen for incoming TCP, accept connections with handshake;
/// connect outbound when discovery pushes a peer address to `connect_rx`.
pub async fn run_transport(
    pool: SharedPool,
    keypair: Arc<Keypair>,
    mesh: MeshTransport,
    tag: [u8; 8],
    port: u16,
    mut connect_rx: mpsc::UnboundedReceiver<(PeerId, SocketAddr)>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "mesh transport listening");

    let accept_pool = pool.clone();
    let accept_keypair = keypair.clone();
    let accept_mesh = mesh.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut stream, _)) => {
                    let pool = accept_pool.clone();
                    let keypair = accept_keypair.clone();
                    let mesh = accept_mesh.clone();
                    tokio::spawn(async move {
                        if let Ok((peer_id, session_key)) =
                            handshake_accept(&mut stream, keypair.as_ref(), tag).await
                        {
                            run_connection(stream, peer_id, session_key, pool, mesh).await;
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    while let Some((peer_id, addr)) = connect_rx.recv().await {
        if mesh.is_connected(&peer_id) {
            continue;
        }
        let pool = pool.clone();
        let keypair = keypair.clone();
        let mesh = mesh.clone();
        tokio::spawn(async move {
            if let Ok(mut stream) = TcpStream::connect(addr).await {
                if let Ok((peer_id, session_key)) =
                    handshake_connect(&mut stream, keypair.as_ref(), tag).await
                {
                    run_connection(stream, peer_id, session_key, pool, mesh).await;
                }
            }
        });
    }
    Ok(())
}

async fn handshake_accept(
    stream: &mut TcpStream,
    keypair: &Keypair,
    tag: [u8; 8],
) -> std::io::Result<(PeerId, [u8; 32])> {
    let mut buf = [0u8; HANDSHAKE_SIZE];
    let (mut r, mut w) = stream.split();
    r.read_exact(&mut buf).await?;
    let (peer_id, peer_public) = parse_handshake(&buf, tag)?;

    let secret = keypair.shared_secret(&peer_public);
    let session_key = derive_session_key(&secret);

    let out = handshake_bytes(keypair, tag);
    w.write_all(&out).await?;
    w.flush().await?;
    Ok((peer_id, session_key))
}

async fn handshake_connect(
    stream: &mut TcpStream,
    keypair: &Keypair,
    tag: [u8; 8],
) -> std::io::Result<(PeerId, [u8; 32])> {
    let (mut r, mut w) = stream.split();
    let out = handshake_bytes(keypair, tag);
    w.write_all(&out).await?;
    w.flush().await?;
    let mut buf = [0u8; HANDSHAKE_SIZE];
    r.read_exact(&mut buf).await?;
    let (peer_id, peer_public) = parse_handshake(&buf, tag)?;
    let secret = keypair.shared_secret(&peer_public);
    let session_key = derive_session_key(&secret);
    Ok((peer_id, session_key))
}

fn handshake_bytes(keypair: &Keypair, tag: [u8; 8]) -> [u8; HANDSHAKE_SIZE] {
    let mut out = [0u8; HANDSHAKE_SIZE];
    out[0] = PROTOCOL_VERSION;
    out[1..17].copy_from_slice(keypair.peer_id().as_bytes());
    out[17..49].copy_from_slice(keypair.public_key().as_bytes());
    out[49..57].copy_from_slice(&tag);
    out
}

fn parse_handshake(
    buf: &[u8; HANDSHAKE_SIZE],
    tag: [u8; 8],
) -> std::io::Result<(PeerId, PublicKey)> {
    if buf[0] != PROTOCOL_VERSION {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "unsupported protocol version",
        ));
    }
    if buf[49..57] != tag {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "peer belongs to a different pool",
        ));
    }
    let mut peer_id = [0u8; 16];
    peer_id.copy_from_slice(&buf[1..17]);
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&buf[17..49]);
    Ok((
        PeerId::from_bytes(peer_id),
        PublicKey::from_bytes(public_key),
    ))
}

async fn run_connection(
    stream: TcpStream,
    peer_id: PeerId,
    session_key: [u8; 32],
    pool: SharedPool,
    mesh: MeshTransport,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let fresh = {
        let mut senders = mesh.senders.lock().expect("sender table poisoned");
        senders.insert(peer_id, tx.clone()).is_none()
    };
    if fresh {
        debug!(peer = %peer_id, "peer connected");
        pool.lock().await.on_peer_connected(peer_id);
    }

    let (mut reader, mut writer) = stream.into_split();
    let writer_key = session_key;
    tokio::spawn(async move {
        let mut write_nonce: u64 = 0;
        while let Some(plain) = rx.recv().await {
            let cipher = match encrypt_wire(&writer_key, write_nonce, &plain) {
                Ok(c) => c,
                Err(_) => break,
            };
            write_nonce = write_nonce.saturating_add(1);
            let len = cipher.len() as u32;
            if writer.write_all(&len.to_le_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(&cipher).await.is_err() {
                break;
            }
            let _ = writer.flush().await;
        }
    });

    let mut read_nonce: u64 = 0;
    loop {
        let mut len_buf = [0u8; LEN_SIZE];
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN as usize {
            break;
        }
        let mut cipher = vec![0u8; len];
        if reader.read_exact(&mut cipher).await.is_err() {
            break;
        }
        // Decrypt failure means tampering or nonce desync: drop the
        // connection. A frame that decrypts but does not decode is dropped
        // silently and the connection stays up.
        let plain = match decrypt_wire(&session_key, read_nonce, &cipher) {
            Ok(p) => p,
            Err(_) => break,
        };
        read_nonce = read_nonce.saturating_add(1);
        match decode_frame(&plain) {
            Ok((msg, _)) => pool.lock().await.on_message(msg, peer_id),
            Err(e) => {
                debug!(%e, peer = %peer_id, "dropping undecodable message");
            }
        }
    }

    // A replacement connection for the same peer may have registered while
    // this one was alive; only the connection still holding the table entry
    // tears the peer down.
    let ours = {
        let mut senders = mesh.senders.lock().expect("sender table poisoned");
        match senders.get(&peer_id) {
            Some(cur) if cur.same_channel(&tx) => {
                senders.remove(&peer_id);
                true
            }
            _ => false,
        }
    };
    if ours {
        debug!(peer = %peer_id, "peer disconnected");
        pool.lock().await.on_peer_disconnected(peer_id);
    }
}
