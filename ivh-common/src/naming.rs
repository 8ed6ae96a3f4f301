//! Collision-resistant naming tokens for fixture isolation.
//!
//! Every fixture embeds one token in all of its resource names so that
//! concurrent runs, in one process or across a CI fleet, never collide.
//! Generation is pure and infallible; a downstream name collision surfaces
//! as a provider conflict error and is handled by the retry classifier.

use rand::RngExt;
use serde::{Deserialize, Serialize};

/// Token length. Six characters keeps derived names inside Azure's tighter
/// limits (storage accounts cap at 24 lowercase alphanumerics).
pub const TOKEN_LEN: usize = 6;

const ALPHA: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A short lowercase suffix embedded in every resource name of one fixture.
///
/// The first character is always alphabetic so the token remains valid even
/// when a naming template places it at the start of a resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamingToken(String);

impl NamingToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let mut out = String::with_capacity(TOKEN_LEN);
        out.push(ALPHA[rng.random_range(0..ALPHA.len())] as char);
        for _ in 1..TOKEN_LEN {
            out.push(ALNUM[rng.random_range(0..ALNUM.len())] as char);
        }
        Self(out)
    }

    /// Build a token from a caller-supplied suffix.
    ///
    /// Used by tests and by reruns that need to re-attach to a previous
    /// fixture's resources. Returns `None` when the input would produce
    /// resource names the provider rejects.
    pub fn parse(raw: &str) -> Option<Self> {
        let bytes = raw.as_bytes();
        if bytes.len() != TOKEN_LEN {
            return None;
        }
        if !bytes[0].is_ascii_lowercase() {
            return None;
        }
        if !bytes[1..]
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NamingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
