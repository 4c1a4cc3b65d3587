use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Length of a generated correlation id.
pub const CORRELATION_ID_LEN: usize = 32;

/// Correlation ID pairing a request envelope with its response.
///
/// Generated ids are 32 uppercase ASCII letters. Each letter encodes one nibble
/// of a v4 UUID, so uniqueness among in-flight calls rests on the UUID's 122
/// random bits while the id stays purely alphabetic on the wire.
///
/// Ids received from the broker are treated as opaque and are never validated
/// against that format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    // ---

    /// Generate a new unique correlation ID
    pub fn generate() -> Self {
        // ---
        let mut id = String::with_capacity(CORRELATION_ID_LEN);
        for byte in Uuid::new_v4().as_bytes() {
            id.push(char::from(b'A' + (byte >> 4)));
            id.push(char::from(b'A' + (byte & 0x0f)));
        }
        Self(id)
    }

    /// Get the correlation ID as a string slice
    pub fn as_str(&self) -> &str {
        // ---
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    // ---

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for CorrelationId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_unique() {
        // ---
        let ids: HashSet<CorrelationId> = (0..1000).map(|_| CorrelationId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_format() {
        // ---
        let id = CorrelationId::generate();
        let s = id.to_string();
        assert_eq!(s.len(), CORRELATION_ID_LEN);
        assert!(s.chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        // ---
        let id = CorrelationId::from("ABCDEF");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"ABCDEF\"");
    }
}
