//! Room credentials.
//!
//! Passwords, API keys and access codes travel through the engine as
//! [`Secret`]s so they never end up in `Debug` output or logs.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// A credential string with a redacted `Debug` representation.
#[derive(Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw credential, for handing to a transport.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short SHA-256 fingerprint, safe to log.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..4])
    }

    /// Treats an empty credential as absent.
    pub fn non_empty(value: Option<&Secret>) -> Option<Secret> {
        value.filter(|s| !s.is_empty()).cloned()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<{}>)", self.fingerprint())
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self(s)
    }
}
