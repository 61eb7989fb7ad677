//! Transport seam between the pool core and a host.

use crate::identity::PeerId;
use crate::protocol::Message;

/// Host transport interface, injected into [`Pool`](crate::pool::Pool).
///
/// Implementations must deliver messages reliably and in order per
/// destination peer. Sends are fire-and-forget: no delivery confirmation
/// flows back to the core, and unreachable peers are the implementation's
/// concern. Presence and inbound messages travel the other way — the host
/// calls the pool's `on_peer_connected`, `on_peer_disconnected`, and
/// `on_message` handlers.
pub trait Transport {
    /// Peers currently connected to this pool's session.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Send `msg` to each peer in `to`. Best-effort.
    fn send(&self, msg: &Message, to: &[PeerId]);
}
