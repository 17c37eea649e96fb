//! On-disk entry encoding
//!
//! A persisted entry is its expiration in epoch milliseconds (`0` for never)
//! on the first line, followed by the JSON-encoded value. Readers that only
//! need liveness stop after the first line.

use crate::{
    entry::{CacheEntry, Expiration},
    CacheError, Result,
};

const HEADER_END: u8 = b'\n';

/// Encode an entry into file contents
pub fn encode(expires: Expiration, value: &serde_json::Value) -> Result<Vec<u8>> {
    let mut bytes =
        serde_json::to_vec(&expires.as_millis()).map_err(CacheError::serialization)?;
    bytes.push(HEADER_END);
    serde_json::to_writer(&mut bytes, value).map_err(CacheError::serialization)?;
    Ok(bytes)
}

/// Decode the expiration header line
pub fn decode_expiration(header: &[u8]) -> Result<Expiration> {
    let header = header.strip_suffix(&[HEADER_END]).unwrap_or(header);
    serde_json::from_slice::<u64>(header)
        .map(Expiration::from_millis)
        .map_err(CacheError::deserialization)
}

/// Decode complete file contents
pub fn decode(bytes: &[u8]) -> Result<CacheEntry> {
    let split = bytes
        .iter()
        .position(|b| *b == HEADER_END)
        .ok_or_else(|| CacheError::Deserialization {
            message: "missing expiration header".to_string(),
        })?;

    let expires = decode_expiration(&bytes[..split])?;
    let value = serde_json::from_slice(&bytes[split + 1..]).map_err(CacheError::deserialization)?;
    Ok(CacheEntry::new(value, expires))
}
