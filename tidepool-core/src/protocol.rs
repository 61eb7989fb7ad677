//! Tidepool wire protocol: message kinds and version.

use serde::{Deserialize, Serialize};

/// Current protocol version. Carried in discovery beacons and the transport
/// handshake; peers advertising a different version are ignored.
pub const PROTOCOL_VERSION: u8 = 1;

/// Pool keys are opaque, comparable strings.
pub type Key = String;

/// Pool values are opaque byte payloads.
pub type Value = Vec<u8>;

/// All wire message types. Encoding is bincode; framing is length-prefix
/// (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Ask the owning peer for the current value of `key`.
    Request { key: Key },
    /// Reply to a Request. `value` is `None` when the sender does not hold
    /// the key.
    Response { key: Key, value: Option<Value> },
    /// The sender now owns these keys.
    Insert { keys: Vec<Key> },
    /// The sender no longer owns these keys.
    Delete { keys: Vec<Key> },
}
