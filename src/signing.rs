//! Signed command envelopes for privileged vehicle operations
//!
//! Commands the vehicle requires to be cryptographically attributable are
//! wrapped in an envelope signed with the holder's RSA key (RSA-SHA256).
//! The signature covers exactly the fields transmitted; altering any signed
//! field after signing invalidates it.

use crate::config::SigningConfig;
use crate::error::{HestiaError, Result};
use crate::logging::get_logger;
use jsonwebtoken::crypto;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Signature algorithm identifier carried in every envelope
pub const SIGNING_ALGORITHM: &str = "RS256";

/// A signed command payload ready for transmission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub command: String,
    pub parameters: serde_json::Value,
    pub domain: String,
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
    pub algorithm: String,
}

/// Canonical signing input. Field order is fixed by this struct; the same
/// bytes must be reproduced for verification.
#[derive(Serialize)]
struct CanonicalCommand<'a> {
    command: &'a str,
    vehicle_id: &'a str,
    parameters: &'a serde_json::Value,
    timestamp: i64,
    nonce: &'a str,
    domain: &'a str,
}

/// Produces signed envelopes for a registered domain/key pair
pub struct CommandSigner {
    key: Option<EncodingKey>,
    domain: String,
    logger: crate::logging::StructuredLogger,
}

impl std::fmt::Debug for CommandSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSigner")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("domain", &self.domain)
            .field("logger", &self.logger)
            .finish()
    }
}

impl CommandSigner {
    /// Create a signer without key material; `sign` will fail until a key
    /// is configured.
    pub fn unconfigured(domain: String) -> Self {
        let logger = get_logger("signing");
        Self {
            key: None,
            domain,
            logger,
        }
    }

    /// Create a signer from an RSA private key in PEM format
    pub fn from_pem(pem: &[u8], domain: String) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(pem)
            .map_err(|e| HestiaError::signing(format!("Invalid RSA private key: {}", e)))?;
        let logger = get_logger("signing");
        Ok(Self {
            key: Some(key),
            domain,
            logger,
        })
    }

    /// Create a signer from configuration; an empty key path leaves the
    /// signer unconfigured.
    pub fn from_config(config: &SigningConfig) -> Result<Self> {
        if config.private_key_path.is_empty() {
            return Ok(Self::unconfigured(config.domain.clone()));
        }
        let pem = std::fs::read(&config.private_key_path).map_err(|e| {
            HestiaError::signing(format!(
                "Failed to read private key {}: {}",
                config.private_key_path, e
            ))
        })?;
        Self::from_pem(&pem, config.domain.clone())
    }

    /// Whether key material is loaded
    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    /// Registered domain the envelopes are attributed to
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Build a signed envelope for one command.
    ///
    /// Every call generates a fresh nonce; signer output must not be reused
    /// across distinct commands.
    pub fn sign(
        &self,
        command: &str,
        vehicle_id: &str,
        parameters: serde_json::Value,
    ) -> Result<SignedEnvelope> {
        let key = self.key.as_ref().ok_or_else(|| {
            HestiaError::signing("No private key configured for command signing")
        })?;

        let timestamp = chrono::Utc::now().timestamp();
        let nonce = fresh_nonce();

        let canonical = CanonicalCommand {
            command,
            vehicle_id,
            parameters: &parameters,
            timestamp,
            nonce: &nonce,
            domain: &self.domain,
        };
        let message = serde_json::to_vec(&canonical)?;

        let signature = crypto::sign(&message, key, Algorithm::RS256)
            .map_err(|e| HestiaError::signing(format!("RSA signing failed: {}", e)))?;

        self.logger
            .debug(&format!("Signed command {} for vehicle {}", command, vehicle_id));

        Ok(SignedEnvelope {
            command: command.to_string(),
            parameters,
            domain: self.domain.clone(),
            timestamp,
            nonce,
            signature,
            algorithm: SIGNING_ALGORITHM.to_string(),
        })
    }
}

/// 16 random bytes, hex-encoded
fn fresh_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Verify an envelope against the corresponding public key.
///
/// Rebuilds the canonical bytes from the transmitted fields, so any field
/// altered after signing fails verification.
pub fn verify_envelope(
    envelope: &SignedEnvelope,
    vehicle_id: &str,
    public_key_pem: &[u8],
) -> Result<bool> {
    if envelope.algorithm != SIGNING_ALGORITHM {
        return Err(HestiaError::signing(format!(
            "Unsupported algorithm: {}",
            envelope.algorithm
        )));
    }
    let key = DecodingKey::from_rsa_pem(public_key_pem)
        .map_err(|e| HestiaError::signing(format!("Invalid RSA public key: {}", e)))?;

    let canonical = CanonicalCommand {
        command: &envelope.command,
        vehicle_id,
        parameters: &envelope.parameters,
        timestamp: envelope.timestamp,
        nonce: &envelope.nonce,
        domain: &envelope.domain,
    };
    let message = serde_json::to_vec(&canonical)?;

    crypto::verify(&envelope.signature, &message, &key, Algorithm::RS256)
        .map_err(|e| HestiaError::signing(format!("Verification failed: {}", e)))
}
