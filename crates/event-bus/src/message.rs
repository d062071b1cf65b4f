use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message as delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub partition: u32,
    /// Position of the message inside its partition, starting at 0.
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

impl Message {
    /// Returns the payload as UTF-8 text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Chooses the partition for a key.
///
/// FNV-1a keeps the mapping stable across processes and compiler versions,
/// which matters once partitions are persisted.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;

    let hash = key.bytes().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    });
    (hash % u64::from(partitions.max(1))) as u32
}
