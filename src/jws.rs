use base64::Engine;
use ring::digest::{Context as DigestContext, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair};
use serde::Serialize;
use tracing::debug;

use crate::error::{AcmeError, Result};

const ALG_ES256: &str = "ES256";
const CRV_P256: &str = "P-256";
const KTY_EC: &str = "EC";

pub(crate) fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

#[derive(Debug, Serialize, Clone)]
struct Jwk {
    kty: String,
    crv: String,
    x: String,
    y: String,
}

#[derive(Debug, Serialize)]
struct ProtectedHeader {
    alg: String,
    nonce: String,
    url: String,
    jwk: Jwk,
}

/// The ES256 account key used to sign every authenticated request.
pub struct AccountKey {
    key_pair: EcdsaKeyPair,
}

impl AccountKey {
    /// Generates a fresh P-256 account key.
    ///
    /// # Errors
    /// Returns error if key generation fails.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| AcmeError::general("Failed to generate account key"))?;
        Self::from_pkcs8(pkcs8.as_ref())
    }

    /// Restores an account key from PKCS#8 DER bytes.
    ///
    /// # Errors
    /// Returns error if the bytes are not a valid P-256 key.
    pub fn from_pkcs8(der: &[u8]) -> Result<Self> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, der, &rng)
            .map_err(|_| AcmeError::general("Failed to parse account key"))?;
        Ok(Self { key_pair })
    }

    fn jwk(&self) -> Result<Jwk> {
        let pk_bytes = self.key_pair.public_key().as_ref();

        // Uncompressed SEC1 point: 0x04 || x || y.
        if pk_bytes.len() != 65 || pk_bytes[0] != 0x04 {
            return Err(AcmeError::general("Unexpected public key format"));
        }

        Ok(Jwk {
            kty: KTY_EC.to_string(),
            crv: CRV_P256.to_string(),
            x: b64(&pk_bytes[1..33]),
            y: b64(&pk_bytes[33..65]),
        })
    }

    /// Computes the base64url SHA-256 thumbprint of the canonical JWK.
    ///
    /// # Errors
    /// Returns error if JWK construction or serialization fails.
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = self.jwk()?;

        // Canonical JWK: members in lexicographic order, no whitespace.
        let mut map = std::collections::BTreeMap::new();
        map.insert("crv", jwk.crv);
        map.insert("kty", jwk.kty);
        map.insert("x", jwk.x);
        map.insert("y", jwk.y);
        let json = serde_json::to_string(&map)?;
        debug!("Thumbprint canonical JSON: {}", json);

        let mut context = DigestContext::new(&SHA256);
        context.update(json.as_bytes());
        Ok(b64(context.finish().as_ref()))
    }

    /// Computes the key authorization `token.thumbprint` for a challenge.
    ///
    /// # Errors
    /// Returns error if the thumbprint cannot be computed.
    pub fn key_authorization(&self, token: &str) -> Result<String> {
        let thumbprint = self.thumbprint()?;
        Ok(format!("{token}.{thumbprint}"))
    }

    /// Signs a request into a JWS envelope with the given nonce.
    ///
    /// An absent payload signs the empty string (POST-as-GET).
    ///
    /// # Errors
    /// Returns error if serialization or signing fails.
    pub fn sign_envelope(
        &self,
        url: &str,
        nonce: String,
        payload: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let header = ProtectedHeader {
            alg: ALG_ES256.to_string(),
            nonce,
            url: url.to_string(),
            jwk: self.jwk()?,
        };

        let protected_b64 = b64(serde_json::to_string(&header)?.as_bytes());
        let payload_b64 = match payload {
            Some(p) => b64(serde_json::to_string(p)?.as_bytes()),
            None => String::new(),
        };

        let signing_input = format!("{protected_b64}.{payload_b64}");
        let rng = SystemRandom::new();
        let signature = self
            .key_pair
            .sign(&rng, signing_input.as_bytes())
            .map_err(|_| AcmeError::general("Failed to sign request"))?;

        Ok(serde_json::json!({
            "protected": protected_b64,
            "payload": payload_b64,
            "signature": b64(signature.as_ref()),
        }))
    }
}
