//! Challenge flags.
//!
//! A flag has the form `<prefix>{<body>}`. Generated flags use a hex body drawn from
//! the thread-local CSPRNG, which is seeded from the operating system.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{MkchalError, Result};

/// Flag format settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretConfig {
    /// Text before the braces, e.g. `bctf`.
    pub prefix: String,
    /// Number of random bytes in a generated flag (hex encoded, so twice as many chars).
    pub random_bytes: usize,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            prefix: "bctf".into(),
            random_bytes: 16,
        }
    }
}

/// A challenge flag. `Debug` output is redacted so flags never reach the logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Generate a fresh random flag.
    pub fn generate(config: &SecretConfig) -> Result<Self> {
        if config.random_bytes == 0 {
            return Err(MkchalError::InvalidSecret(
                "random_bytes must be at least 1".into(),
            ));
        }
        let mut bytes = vec![0u8; config.random_bytes];
        rand::rng().fill_bytes(&mut bytes);
        Ok(Self(format!("{}{{{}}}", config.prefix, hex::encode(bytes))))
    }

    /// Accept a caller-supplied flag if it matches `<prefix>{...}` on a single line.
    pub fn from_user(value: &str, config: &SecretConfig) -> Result<Self> {
        let opening = format!("{}{{", config.prefix);
        if value.len() <= opening.len()
            || !value.starts_with(&opening)
            || !value.ends_with('}')
            || value.contains('\n')
        {
            return Err(MkchalError::InvalidSecret(format!(
                "flag does not match {}{{...}}",
                config.prefix
            )));
        }
        Ok(Self(value.to_string()))
    }

    /// The flag text, as written to the bundle.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}
