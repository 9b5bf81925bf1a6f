//! Opaque per-recipient tracking tokens.
//!
//! A token is the only thing a tracking URL carries, so it doubles as the
//! authorization to record an engagement event. Tokens are 32 bytes from the
//! OS random source, hex encoded.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackToken(String);

impl TrackToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Accept a token from an inbound URL only if it has the generated shape.
    pub fn parse(raw: &str) -> Option<Self> {
        let well_formed = raw.len() == TOKEN_BYTES * 2
            && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        well_formed.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_shape() {
        let token = TrackToken::generate();
        assert_eq!(token.as_str().len(), 64);
        assert!(TrackToken::parse(token.as_str()).is_some());
    }

    #[test]
    fn test_generate_unique() {
        let tokens: HashSet<_> = (0..1000).map(|_| TrackToken::generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(TrackToken::parse("").is_none());
        assert!(TrackToken::parse("42").is_none());
        assert!(TrackToken::parse(&"G".repeat(64)).is_none());
        assert!(TrackToken::parse(&"A".repeat(64)).is_none());
        assert!(TrackToken::parse(&"a".repeat(65)).is_none());
    }
}
