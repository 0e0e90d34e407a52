use std::{fmt, str};

use thiserror::Error;

/// Error parsing or normalizing an event identifier.
#[derive(Debug, Clone, Error)]
pub enum ParseEventIdError {
    #[error("invalid event id: {0}")]
    Malformed(String),

    #[error("invalid tx hash: {0}")]
    InvalidHash(String),

    #[error("invalid log index in event id: {0}")]
    InvalidLogIndex(String),
}

/// Normalizes a transaction hash to 0x-prefixed lowercase hex.
///
/// Accepts 0x-prefixed hex as-is and base58 (SVM signatures, 64 bytes, or
/// 32-byte hashes) which is re-encoded as hex.
pub fn normalize_tx_hash(raw: &str) -> Result<String, ParseEventIdError> {
    if let Some(stripped) = raw.strip_prefix("0x") {
        if stripped.is_empty() || stripped.len() % 2 != 0 {
            return Err(ParseEventIdError::InvalidHash(raw.to_owned()));
        }
        return hex::decode(stripped)
            .map(|bytes| format!("0x{}", hex::encode(bytes)))
            .map_err(|_| ParseEventIdError::InvalidHash(raw.to_owned()));
    }

    // Bare hex is still hex; only fall through to base58 when it isn't.
    if raw.len() % 2 == 0 {
        if let Ok(bytes) = hex::decode(raw) {
            return Ok(format!("0x{}", hex::encode(bytes)));
        }
    }

    let decoded = bs58::decode(raw)
        .into_vec()
        .map_err(|_| ParseEventIdError::InvalidHash(raw.to_owned()))?;
    if decoded.len() != 32 && decoded.len() != 64 {
        return Err(ParseEventIdError::InvalidHash(raw.to_owned()));
    }
    Ok(format!("0x{}", hex::encode(decoded)))
}

/// A gateway event identifier: `<txHash>:<logIndex>`.
///
/// The tx hash is held normalized (0x hex, lowercase) regardless of the
/// encoding it was observed with.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct EventId {
    tx_hash: String,
    log_index: u64,
}

impl EventId {
    pub fn new(tx_hash: &str, log_index: u64) -> Result<Self, ParseEventIdError> {
        Ok(Self {
            tx_hash: normalize_tx_hash(tx_hash)?,
            log_index,
        })
    }

    pub fn tx_hash(&self) -> &str {
        &self.tx_hash
    }

    pub fn log_index(&self) -> u64 {
        self.log_index
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.log_index)
    }
}

impl str::FromStr for EventId {
    type Err = ParseEventIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, index) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseEventIdError::Malformed(s.to_owned()))?;
        let log_index = index
            .parse()
            .map_err(|_| ParseEventIdError::InvalidLogIndex(s.to_owned()))?;
        Self::new(hash, log_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_evm_hash() {
        let raw = format!("0x{}", "AB".repeat(32));
        let normalized = normalize_tx_hash(&raw).unwrap();
        assert_eq!(normalized, format!("0x{}", "ab".repeat(32)));
    }

    #[test]
    fn normalizes_base58_signature() {
        let sig_bytes = [3u8; 64];
        let encoded = bs58::encode(sig_bytes).into_string();
        let normalized = normalize_tx_hash(&encoded).unwrap();
        assert_eq!(normalized, format!("0x{}", hex::encode(sig_bytes)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(normalize_tx_hash("0xzz").is_err());
        assert!(normalize_tx_hash("0I l").is_err());
    }

    #[test]
    fn event_id_roundtrip() {
        let id: EventId = format!("0x{}:7", "cd".repeat(32)).parse().unwrap();
        assert_eq!(id.log_index(), 7);
        assert_eq!(id.to_string(), format!("0x{}:7", "cd".repeat(32)));
    }

    #[test]
    fn event_id_requires_index() {
        assert!(format!("0x{}", "cd".repeat(32)).parse::<EventId>().is_err());
    }
}
