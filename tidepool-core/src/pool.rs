//! Distributed cache core: local objects, remote-ownership manifest, pending
//! fetches.
//!
//! One `Pool` instance is the single logical owner of its three tables; the
//! host must serialize all calls into it (the daemon wraps it in
//! `Arc<Mutex<_>>`). No method blocks on network I/O: sends go through the
//! injected [`Transport`] handle, and a remote `get` completes later from the
//! owner's Response.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::identity::PeerId;
use crate::protocol::{Key, Message, Value};
use crate::transport::Transport;

/// Completion callback for an asynchronous `get`. Invoked at most once.
/// Never invoked if the owning peer disconnects before responding, or if a
/// newer `get` for the same key supersedes it.
pub type Completion = Box<dyn FnOnce(Option<Value>) + Send>;

/// Distributed, eventually-consistent object pool shared with the peers the
/// host transport is connected to.
///
/// Objects written locally with [`set`](Pool::set) are owned by this peer and
/// announced to the mesh; objects owned elsewhere are fetched lazily from the
/// recorded owner on [`get`](Pool::get).
pub struct Pool<T: Transport> {
    name: String,
    transport: T,
    /// Objects this peer owns.
    local: HashMap<Key, Value>,
    /// Key -> peer currently believed to own it. Every entry points at a
    /// connected peer; entries are purged synchronously on disconnect.
    manifest: HashMap<Key, PeerId>,
    /// Outstanding fetches awaiting a Response, at most one per key.
    pending: HashMap<Key, Completion>,
}

impl<T: Transport> Pool<T> {
    /// Create a pool scoped to `name`. The name is passed through to the host
    /// transport unchanged so discovery only pairs peers sharing it.
    pub fn new(name: impl Into<String>, transport: T) -> Self {
        Self {
            name: name.into(),
            transport,
            local: HashMap::new(),
            manifest: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Keys this peer currently owns.
    pub fn local_keys(&self) -> Vec<Key> {
        self.local.keys().cloned().collect()
    }

    /// Keys believed to be owned by other peers, with the recorded owner.
    pub fn remote_keys(&self) -> Vec<(Key, PeerId)> {
        self.manifest.iter().map(|(k, p)| (k.clone(), *p)).collect()
    }

    /// Resolve `key`, never blocking.
    ///
    /// A local hit or an unknown key completes synchronously with no message
    /// sent; "not found" and "no owner" are indistinguishable to the caller.
    /// A manifest hit sends a Request to the recorded owner and completes
    /// later from its Response. A newer `get` for the same key replaces a
    /// still-pending completion, which is then never invoked.
    pub fn get(&mut self, key: &str, completion: impl FnOnce(Option<Value>) + Send + 'static) {
        if let Some(value) = self.local.get(key) {
            completion(Some(value.clone()));
            return;
        }
        let Some(&owner) = self.manifest.get(key) else {
            completion(None);
            return;
        };
        self.pending.insert(key.to_owned(), Box::new(completion));
        self.transport
            .send(&Message::Request { key: key.to_owned() }, &[owner]);
    }

    /// Store `value` under `key`, overwriting any previous value (no merge).
    /// The first write of a key announces ownership to all connected peers.
    pub fn set(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        let key = key.into();
        if !self.local.contains_key(&key) {
            let peers = self.transport.connected_peers();
            debug!(key = %key, peers = peers.len(), "announcing ownership");
            self.transport.send(
                &Message::Insert {
                    keys: vec![key.clone()],
                },
                &peers,
            );
        }
        // The announce is queued before the store, but events run one at a
        // time: the value is in place before any Request the broadcast
        // provokes can be dispatched.
        self.local.insert(key, value.into());
    }

    /// Drop `key` locally and retract the ownership announcement. A no-op if
    /// the key is not held here.
    pub fn remove(&mut self, key: &str) {
        if self.local.contains_key(key) {
            let peers = self.transport.connected_peers();
            debug!(key = %key, peers = peers.len(), "retracting ownership");
            self.transport.send(
                &Message::Delete {
                    keys: vec![key.to_owned()],
                },
                &peers,
            );
        }
        self.local.remove(key);
    }

    /// Full resync: tell the newly connected peer about every key we own.
    /// Fires only on topology change, so the full key list is acceptable.
    pub fn on_peer_connected(&mut self, peer: PeerId) {
        let keys: Vec<Key> = self.local.keys().cloned().collect();
        debug!(peer = %peer, keys = keys.len(), "peer connected, resyncing");
        self.transport.send(&Message::Insert { keys }, &[peer]);
    }

    /// Drop every manifest entry owned by the leaving peer, synchronously.
    /// A fetch still pending against that peer is never resolved.
    pub fn on_peer_disconnected(&mut self, peer: PeerId) {
        debug!(peer = %peer, "peer disconnected, purging manifest");
        self.manifest.retain(|_, owner| *owner != peer);
    }

    /// Dispatch one inbound message from the host transport.
    pub fn on_message(&mut self, msg: Message, from: PeerId) {
        match msg {
            Message::Request { key } => self.handle_request(key, from),
            Message::Response { key, value } => self.handle_response(key, value),
            Message::Insert { keys } => self.handle_insert(keys, from),
            Message::Delete { keys } => self.handle_delete(keys),
        }
    }

    fn handle_request(&mut self, key: Key, from: PeerId) {
        let value = self.local.get(&key).cloned();
        self.transport.send(&Message::Response { key, value }, &[from]);
    }

    fn handle_response(&mut self, key: Key, value: Option<Value>) {
        if let Some(completion) = self.pending.remove(&key) {
            completion(value.clone());
        }
        // Opportunistic cache-fill, even with no completion pending. An
        // absent value clears any previously cached entry for the key.
        match value {
            Some(v) => {
                self.local.insert(key, v);
            }
            None => {
                self.local.remove(&key);
            }
        }
    }

    fn handle_insert(&mut self, keys: Vec<Key>, from: PeerId) {
        for key in keys {
            trace!(key = %key, owner = %from, "manifest insert");
            // Last announcer wins; concurrent claims are not negotiated.
            self.manifest.insert(key, from);
        }
    }

    fn handle_delete(&mut self, keys: Vec<Key>) {
        // Purged without checking the sender against the recorded owner.
        for key in keys {
            trace!(key = %key, "manifest delete");
            self.manifest.remove(&key);
        }
    }
}
