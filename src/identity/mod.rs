//! Short, deterministic identifiers derived from filesystem paths.
//!
//! Staged keyboards and layouts are published under a name derived from the
//! canonical path of their source directory, and every firmware installation
//! gets its own mirror root named the same way. Two unrelated projects never
//! share a staged subtree, and restaging the same project always lands on the
//! same name.

use std::fmt;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Number of digest bytes kept (8 hex characters).
pub const IDENTITY_BYTES: usize = 4;

/// Identity of a canonical filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathIdentity(String);

impl PathIdentity {
    /// Compute the identity of an already canonical path.
    ///
    /// Pure: no filesystem access. Callers that only have a user-supplied
    /// path should use [`PathIdentity::of_canonical`].
    pub fn of(path: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..IDENTITY_BYTES]))
    }

    /// Canonicalize `path` (resolving symlinks) and compute its identity.
    pub fn of_canonical(path: &Path) -> io::Result<Self> {
        Ok(Self::of(&path.canonicalize()?))
    }

    /// Wrap an identity string read back from disk.
    ///
    /// Returns `None` unless `s` has the shape produced by [`PathIdentity::of`].
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == IDENTITY_BYTES * 2
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PathIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
