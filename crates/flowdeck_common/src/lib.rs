pub mod positions;
pub use positions::*;

pub mod messages;
pub use messages::*;

// Explicitly export FlowdeckMessage for clarity
pub use messages::FlowdeckMessage;

pub mod codec;

pub mod error;
pub use error::{ManagerClosed, ResetError, WatchClosed};

use serde::{Deserialize, Serialize};

use std::fmt::Debug;

#[derive(Serialize, Deserialize, Clone)]
/// [`NetworkPacket`]s are untyped packets to be sent over the wire
///
/// The packet contains both a human-readable type name (for debugging) and
/// a schema hash (for matching). Receivers try to match by type_name first,
/// then fall back to schema_hash for resilience against module refactoring.
pub struct NetworkPacket {
    /// Full type name including module path (for debugging)
    /// Example: "flowdeck_common::positions::WatchEvent"
    pub type_name: String,
    /// Schema hash computed from short type name (for matching)
    /// This provides stability across module refactoring
    pub schema_hash: u64,
    /// The serialized message data from bincode
    pub data: Vec<u8>,
}

impl Debug for NetworkPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkPacket")
            .field("type_name", &self.type_name)
            .field("schema_hash", &format_args!("0x{:016x}", self.schema_hash))
            .field("data_len", &self.data.len())
            .finish()
    }
}
