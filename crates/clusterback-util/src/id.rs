//! ULID-based identifier generation with prefixes.
//!
//! Identifiers in clusterback follow the pattern: `prefix_ulid`
//! For example: `ver_01HQXYZ...` for versions held by the in-memory store.
//!
//! Identifiers produced by [`Identifier::ascending`] are strictly increasing
//! within a process, even when several are generated in the same millisecond.

use std::sync::{Mutex, OnceLock};
use ulid::{Generator, Ulid};

static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();

/// Known identifier prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    /// A stored version.
    Version,
    /// A capture request routed through the debounce gate.
    Request,
    /// A rollback run.
    Rollback,
}

impl IdPrefix {
    /// Get the string prefix for this identifier type.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Version => "ver",
            IdPrefix::Request => "req",
            IdPrefix::Rollback => "rbk",
        }
    }
}

/// Identifier generation.
pub struct Identifier;

impl Identifier {
    /// Generate a new ascending identifier (newer = larger).
    pub fn ascending(prefix: IdPrefix) -> String {
        Self::with_ulid(prefix, next_ulid())
    }

    /// Generate an identifier with a specific ULID (for testing or imports).
    pub fn with_ulid(prefix: IdPrefix, ulid: Ulid) -> String {
        format!("{}_{}", prefix.as_str(), ulid.to_string().to_lowercase())
    }

    /// Generate a version ID.
    pub fn version() -> String {
        Self::ascending(IdPrefix::Version)
    }

    /// Generate a capture request ID.
    pub fn request() -> String {
        Self::ascending(IdPrefix::Request)
    }

    /// Generate a rollback run ID.
    pub fn rollback() -> String {
        Self::ascending(IdPrefix::Rollback)
    }
}

/// Next ULID from the process-wide monotonic generator.
///
/// Falls back to a fresh random ULID if the random component overflows
/// within a single millisecond.
fn next_ulid() -> Ulid {
    let generator = GENERATOR.get_or_init(|| Mutex::new(Generator::new()));
    match generator.lock() {
        Ok(mut generator) => generator.generate().unwrap_or_else(|_| Ulid::new()),
        Err(poisoned) => poisoned
            .into_inner()
            .generate()
            .unwrap_or_else(|_| Ulid::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascending_id() {
        let id = Identifier::ascending(IdPrefix::Version);
        assert!(id.starts_with("ver_"));
        assert_eq!(id.len(), 30); // "ver_" (4) + ULID (26)
    }

    #[test]
    fn test_ascending_order_within_same_millisecond() {
        let ids: Vec<String> = (0..100).map(|_| Identifier::version()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_prefixes() {
        assert!(Identifier::request().starts_with("req_"));
        assert!(Identifier::rollback().starts_with("rbk_"));
    }

    #[test]
    fn test_with_ulid() {
        let ulid = Ulid::new();
        let id = Identifier::with_ulid(IdPrefix::Version, ulid);
        assert_eq!(id, format!("ver_{}", ulid.to_string().to_lowercase()));
    }
}
