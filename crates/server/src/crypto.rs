//! Robot identity derivation.
//!
//! A robot is provisioned with a private token (a UUID handed to the
//! physical unit). Its public identity — the value used as the session/room
//! key and shown to drivers — is the base64 of the token's SHA-256 digest,
//! so the private token never appears on the driver side of the wire.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::digest::{digest, SHA256};
use uuid::Uuid;

/// Derive the public robot identity from its private token.
pub fn robot_identity(private_token: &str) -> String {
    BASE64.encode(digest(&SHA256, private_token.as_bytes()).as_ref())
}

/// Generate a fresh private token for a new robot.
pub fn new_private_token() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_deterministic() {
        let token = "8b9f6a3e-5a6c-4e6e-9f2a-0d1c2b3a4f5e";
        assert_eq!(robot_identity(token), robot_identity(token));
    }

    #[test]
    fn identity_differs_per_token() {
        assert_ne!(robot_identity("token-a"), robot_identity("token-b"));
    }

    #[test]
    fn identity_is_base64_of_sha256() {
        // 32-byte digest → 44 base64 chars including padding
        let id = robot_identity("anything");
        assert_eq!(id.len(), 44);
        assert!(id.ends_with('='));
    }

    #[test]
    fn private_tokens_are_unique() {
        assert_ne!(new_private_token(), new_private_token());
    }
}
