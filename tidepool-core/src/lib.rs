//! Tidepool protocol reference implementation.
//! Host-driven: no I/O; the host delivers transport events to the pool and
//! the pool sends through an injected transport handle.

pub mod identity;
pub mod pool;
pub mod protocol;
pub mod transport;
pub mod wire;

pub use identity::{Keypair, PeerId, PublicKey};
pub use pool::{Completion, Pool};
pub use protocol::{Key, Message, Value, PROTOCOL_VERSION};
pub use transport::Transport;
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
