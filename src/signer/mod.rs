//! Request Signer (component C6): produces a detached signature over a
//! canonical subset of an outbound request so upstreams can verify it came
//! from the proxy without a shared secret — they only need the public key,
//! published via `jwks()`.

use base64::Engine;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::SsoError;

/// Fixed, ordered list of headers folded into the signed payload. Every
/// entry contributes a line (empty string if the header is absent) so the
/// signature covers a stable structure regardless of which headers a given
/// request happens to carry.
const SIGNED_HEADERS: &[&str] = &[
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "authorization",
    "from",
    "x-forwarded-user",
    "x-forwarded-email",
    "x-forwarded-groups",
];

#[derive(Debug, Clone, Default)]
pub struct CanonicalRequest {
    pub headers: Vec<(String, String)>,
    pub method: String,
    pub path: String,
    pub body_hash: Vec<u8>,
}

impl CanonicalRequest {
    fn canonical_string(&self) -> String {
        let mut out = String::new();
        for name in SIGNED_HEADERS {
            let value = self
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
                .unwrap_or("");
            out.push_str(value);
            out.push('\n');
        }
        out.push_str(&self.method);
        out.push('\n');
        out.push_str(&self.path);
        out.push('\n');
        out.push_str(&hex::encode(&self.body_hash));
        out
    }
}

/// Hashes a request body with SHA256, the algorithm the signed payload
/// commits to.
pub fn hash_body(body: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.finalize().to_vec()
}

#[derive(Serialize)]
struct Jwk {
    kty: &'static str,
    #[serde(rename = "use")]
    use_: &'static str,
    alg: &'static str,
    kid: String,
    n: String,
    e: String,
}

#[derive(Serialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

/// Holds the proxy's RSA key and signs outbound canonical requests with it.
/// `kid` is derived from the public key's SHA256 fingerprint so rotation is
/// just "generate a new key, publish both at JWKS, switch which one signs".
pub struct RequestSigner {
    signing_key: SigningKey<Sha256>,
    public_key: RsaPublicKey,
    kid: String,
}

impl RequestSigner {
    pub fn new(private_key: RsaPrivateKey) -> Self {
        let public_key = RsaPublicKey::from(&private_key);
        let kid = key_id(&public_key);
        Self {
            signing_key: SigningKey::<Sha256>::new(private_key),
            public_key,
            kid,
        }
    }

    pub fn generate(bits: usize) -> Result<Self, SsoError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| SsoError::Internal(format!("rsa keygen failed: {e}")))?;
        Ok(Self::new(private_key))
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Returns the `Sso-Signature` header value (`v1 <base64>`) for the
    /// given canonical request.
    pub fn sign(&self, request: &CanonicalRequest) -> String {
        let payload = request.canonical_string();
        let mut rng = rand::thread_rng();
        let signature = self.signing_key.sign_with_rng(&mut rng, payload.as_bytes());
        let encoded = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());
        format!("v1 {encoded}")
    }

    /// The JWKS document exposing this signer's public key, so upstreams
    /// can verify signatures without ever holding a shared secret.
    pub fn jwks(&self) -> serde_json::Value {
        let n = self.public_key.n().to_bytes_be();
        let e = self.public_key.e().to_bytes_be();
        let jwks = Jwks {
            keys: vec![Jwk {
                kty: "RSA",
                use_: "sig",
                alg: "RS256",
                kid: self.kid.clone(),
                n: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(n),
                e: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(e),
            }],
        };
        serde_json::to_value(jwks).expect("jwks serializes")
    }
}

fn key_id(public_key: &RsaPublicKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key.n().to_bytes_be());
    hasher.update(public_key.e().to_bytes_be());
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::signature::Verifier;

    fn signer() -> RequestSigner {
        RequestSigner::generate(2048).unwrap()
    }

    #[test]
    fn signature_verifies_against_the_published_public_key() {
        let signer = signer();
        let request = CanonicalRequest {
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-Forwarded-Email".to_string(), "a@corp.com".to_string()),
            ],
            method: "GET".to_string(),
            path: "/api/widgets".to_string(),
            body_hash: hash_body(b""),
        };

        let header = signer.sign(&request);
        let b64 = header.strip_prefix("v1 ").unwrap();
        let raw = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        let signature = Signature::try_from(raw.as_slice()).unwrap();

        let verifying_key = VerifyingKey::<Sha256>::new(signer.public_key.clone());
        let payload = request.canonical_string();
        assert!(verifying_key.verify(payload.as_bytes(), &signature).is_ok());
    }

    #[test]
    fn missing_headers_still_contribute_a_newline() {
        let request = CanonicalRequest {
            headers: vec![],
            method: "GET".to_string(),
            path: "/".to_string(),
            body_hash: hash_body(b""),
        };
        let canonical = request.canonical_string();
        assert_eq!(canonical.matches('\n').count(), SIGNED_HEADERS.len());
    }

    #[test]
    fn tampering_with_the_payload_invalidates_the_signature() {
        let signer = signer();
        let mut request = CanonicalRequest {
            headers: vec![],
            method: "GET".to_string(),
            path: "/a".to_string(),
            body_hash: hash_body(b""),
        };
        let header = signer.sign(&request);
        request.path = "/b".to_string();

        let b64 = header.strip_prefix("v1 ").unwrap();
        let raw = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        let signature = Signature::try_from(raw.as_slice()).unwrap();
        let verifying_key = VerifyingKey::<Sha256>::new(signer.public_key.clone());
        assert!(verifying_key
            .verify(request.canonical_string().as_bytes(), &signature)
            .is_err());
    }

    #[test]
    fn jwks_exposes_the_matching_kid() {
        let signer = signer();
        let jwks = signer.jwks();
        let kid = jwks["keys"][0]["kid"].as_str().unwrap();
        assert_eq!(kid, signer.kid());
    }
}
