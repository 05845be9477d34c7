//! Signing key holder for GitHub App assertions.
//!
//! GitHub hands out PKCS#1 PEM keys; PKCS#8 PEM and DER are accepted as well.
//! Key material is parsed once and shared between clones.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;

use crate::error::AuthError;

/// RSA private key used to sign app assertions (RS256).
///
/// The key data is never exposed in Debug output.
#[derive(Clone)]
pub struct SigningKey {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
}

impl SigningKey {
    /// Create a signing key from PEM-encoded text.
    ///
    /// Both `BEGIN RSA PRIVATE KEY` (PKCS#1) and `BEGIN PRIVATE KEY` (PKCS#8)
    /// blocks are accepted. Literal `\n` sequences are treated as newlines so
    /// a key squeezed into a single-line environment variable still parses.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidKeyMaterial` if the text is empty, is not a
    /// PEM block, or does not contain a usable RSA key.
    pub fn from_pem(pem: &str) -> Result<Self, AuthError> {
        let pem = pem.trim().replace("\\n", "\n");

        if pem.is_empty() {
            return Err(AuthError::InvalidKeyMaterial {
                message: "PEM string cannot be empty".to_string(),
            });
        }

        if !pem.contains("-----BEGIN") || !pem.contains("-----END") {
            return Err(AuthError::InvalidKeyMaterial {
                message: "Invalid PEM format: missing BEGIN/END markers".to_string(),
            });
        }

        let private_key = if pem.contains("BEGIN RSA PRIVATE KEY") {
            RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| AuthError::InvalidKeyMaterial {
                message: format!("Failed to parse PKCS#1 RSA private key: {}", e),
            })?
        } else {
            RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| AuthError::InvalidKeyMaterial {
                message: format!("Failed to parse PKCS#8 RSA private key: {}", e),
            })?
        };

        Self::from_private_key(&private_key)
    }

    /// Read a PEM-encoded key from a file.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidKeyMaterial` if the file cannot be read or
    /// does not hold a usable key. The message names the path, never the content.
    pub fn from_pem_file(path: impl AsRef<std::path::Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| AuthError::InvalidKeyMaterial {
            message: format!("Failed to read key file {}: {}", path.display(), e),
        })?;
        Self::from_pem(&pem)
    }

    /// Create a signing key from PKCS#8 DER-encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidKeyMaterial` if the bytes are not an RSA key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, AuthError> {
        let private_key =
            RsaPrivateKey::from_pkcs8_der(der).map_err(|e| AuthError::InvalidKeyMaterial {
                message: format!("Failed to parse PKCS#8 DER private key: {}", e),
            })?;

        Self::from_private_key(&private_key)
    }

    fn from_private_key(private_key: &RsaPrivateKey) -> Result<Self, AuthError> {
        let private_der = private_key
            .to_pkcs1_der()
            .map_err(|e| AuthError::InvalidKeyMaterial {
                message: format!("Failed to encode private key: {}", e),
            })?;
        let public_der = RsaPublicKey::from(private_key)
            .to_pkcs1_der()
            .map_err(|e| AuthError::InvalidKeyMaterial {
                message: format!("Failed to encode public key: {}", e),
            })?;

        Ok(Self {
            encoding_key: Arc::new(EncodingKey::from_rsa_der(private_der.as_bytes())),
            decoding_key: Arc::new(DecodingKey::from_rsa_der(public_der.as_bytes())),
        })
    }

    /// Key used by `jsonwebtoken::encode` to sign assertions.
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Public half, for verifying assertions signed by this key.
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Sign `message` with RSASSA-PKCS1-v1_5 over SHA-256.
    ///
    /// The signature is returned base64url-encoded, as it appears in a JWT.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidKeyMaterial` if the key cannot produce a signature.
    pub fn sign(&self, message: &[u8]) -> Result<String, AuthError> {
        jsonwebtoken::crypto::sign(message, &self.encoding_key, Algorithm::RS256).map_err(|e| {
            AuthError::InvalidKeyMaterial {
                message: format!("Signing failed: {}", e),
            }
        })
    }
}

// Security: Don't expose key data in debug output
impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &"RS256")
            .field("key_data", &"<REDACTED>")
            .finish()
    }
}

#[cfg(test)]
#[path = "key_tests.rs"]
mod tests;
