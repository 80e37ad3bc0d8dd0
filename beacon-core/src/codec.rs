//! Encoding of event batches for the backup file and the request body

use crate::error::Result;
use crate::types::EventBatch;

/// Converts an [`EventBatch`] to bytes and back
///
/// Implementations must round-trip exactly, otherwise events recovered from
/// the backup after a restart differ from the ones that were tracked.
pub trait BatchCodec: Send + Sync {
    fn encode(&self, batch: &EventBatch) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<EventBatch>;
}

/// JSON codec producing `{"events":[{"type":..,"data":..}]}`
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl BatchCodec for JsonCodec {
    fn encode(&self, batch: &EventBatch) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(batch)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<EventBatch> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
