use std::fmt;
use std::str::FromStr;

use rdkafka::ClientConfig;

use crate::error::AuthError;

/// Hash function backing the SCRAM exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScramHash {
    #[default]
    Sha256,
    Sha512,
}

impl ScramHash {
    /// The SASL mechanism name as librdkafka expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScramHash::Sha256 => "SCRAM-SHA-256",
            ScramHash::Sha512 => "SCRAM-SHA-512",
        }
    }
}

impl FromStr for ScramHash {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('_', "-");
        match normalized.as_str() {
            "SCRAM-SHA-256" | "SHA-256" | "SHA256" => Ok(ScramHash::Sha256),
            "SCRAM-SHA-512" | "SHA-512" | "SHA512" => Ok(ScramHash::Sha512),
            _ => Err(AuthError::UnsupportedMechanism(s.to_owned())),
        }
    }
}

/// Salted challenge-response credentials shared by every client the session opens.
#[derive(Clone, PartialEq, Eq)]
pub struct ScramMechanism {
    hash: ScramHash,
    username: String,
    password: String,
}

impl ScramMechanism {
    pub fn new(hash: ScramHash, username: &str, password: &str) -> Result<Self, AuthError> {
        if username.is_empty() {
            return Err(AuthError::MissingUsername);
        }
        if password.is_empty() {
            return Err(AuthError::MissingPassword);
        }

        Ok(ScramMechanism {
            hash,
            username: username.to_owned(),
            password: password.to_owned(),
        })
    }

    pub fn hash(&self) -> ScramHash {
        self.hash
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    /// Switch the client to SASL, keeping TLS when it was requested.
    pub fn apply(&self, client_config: &mut ClientConfig, tls: bool) {
        let protocol = if tls { "sasl_ssl" } else { "sasl_plaintext" };
        client_config
            .set("security.protocol", protocol)
            .set("sasl.mechanism", self.hash.as_str())
            .set("sasl.username", &self.username)
            .set("sasl.password", &self.password);
    }
}

impl fmt::Debug for ScramMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramMechanism")
            .field("hash", &self.hash)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Derive the mechanism for a username/password pair.
///
/// Returns `Ok(None)` only when both are empty, i.e. the cluster does not
/// enforce authentication. A half-filled pair is an error so a typo never
/// silently downgrades the session to unauthenticated access.
pub fn mechanism(
    hash: ScramHash,
    username: &str,
    password: &str,
) -> Result<Option<ScramMechanism>, AuthError> {
    if username.is_empty() && password.is_empty() {
        return Ok(None);
    }
    ScramMechanism::new(hash, username, password).map(Some)
}
