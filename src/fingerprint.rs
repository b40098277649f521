//! Caller fingerprinting.
//!
//! Hashes a concatenated identity string with a fast non-cryptographic hash.
//! Fingerprints only need equality, not cryptographic strength, so
//! `DefaultHasher` is the right tool here, not a weaker imitation of SHA-256.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// `{user_id, peer_addr}` as received from the HTTP layer (`X-User-ID`,
/// `X-Forwarded-For` / peer socket address).
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: Option<String>,
    pub peer_addr: String,
}

/// Opaque caller identifier. The only contract is equality; callers must
/// not depend on the hash function itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn fingerprint(identity: &CallerIdentity) -> Fingerprint {
    let key = format!(
        "{}|{}",
        identity.user_id.as_deref().unwrap_or(""),
        identity.peer_addr
    );
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    Fingerprint(format!("{:016x}", hasher.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(user_id: Option<&str>, peer: &str) -> CallerIdentity {
        CallerIdentity {
            user_id: user_id.map(str::to_string),
            peer_addr: peer.to_string(),
        }
    }

    #[test]
    fn stable_across_calls() {
        let a = id(Some("alice"), "10.0.0.1");
        assert_eq!(fingerprint(&a), fingerprint(&a));
    }

    #[test]
    fn differs_on_user_id() {
        let a = fingerprint(&id(Some("alice"), "10.0.0.1"));
        let b = fingerprint(&id(Some("bob"), "10.0.0.1"));
        assert_ne!(a, b);
    }

    #[test]
    fn differs_on_peer_addr() {
        let a = fingerprint(&id(Some("alice"), "10.0.0.1"));
        let b = fingerprint(&id(Some("alice"), "10.0.0.2"));
        assert_ne!(a, b);
    }

    #[test]
    fn absent_user_id_falls_back_to_peer_addr() {
        let a = fingerprint(&id(None, "10.0.0.1"));
        let b = fingerprint(&id(None, "10.0.0.1"));
        assert_eq!(a, b);
        let c = fingerprint(&id(None, "10.0.0.2"));
        assert_ne!(a, c);
    }

    #[test]
    fn no_shared_fields_differ() {
        let a = fingerprint(&id(Some("alice"), "10.0.0.1"));
        let b = fingerprint(&id(Some("bob"), "10.0.0.2"));
        assert_ne!(a, b);
    }
}
