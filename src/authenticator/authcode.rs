//! Short-lived signed tokens used twice by the Authenticator: the OAuth
//! `state` parameter (binds a CSRF nonce to the original `return_url`) and
//! the auth code handed back to the Proxy after a successful callback
//! (binds the minted session to one back-channel `/redeem` call).

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct SignedPayload<T> {
    payload: T,
    expires_at: DateTime<Utc>,
}

fn sign(secret: &str, bytes: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(bytes);
    mac.finalize().into_bytes().to_vec()
}

/// Encodes `payload` with an expiry and an HMAC tag, all base64'd into one
/// opaque string. Only ever compared byte-for-byte against a freshly
/// recomputed MAC — never parsed before the MAC is checked.
pub fn encode<T: Serialize>(secret: &str, payload: &T, ttl: chrono::Duration, now: DateTime<Utc>) -> String {
    let signed = SignedPayload {
        payload,
        expires_at: now + ttl,
    };
    let json = serde_json::to_vec(&signed).expect("payload serializes");
    let tag = sign(secret, &json);
    let mut framed = Vec::with_capacity(json.len() + tag.len() + 8);
    framed.extend_from_slice(&(json.len() as u32).to_be_bytes());
    framed.extend_from_slice(&json);
    framed.extend_from_slice(&tag);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, framed)
}

/// Decodes and verifies a token produced by `encode`. Returns `None` on any
/// failure: bad base64, truncated frame, MAC mismatch, or expiry.
pub fn decode<T: for<'de> Deserialize<'de>>(secret: &str, token: &str, now: DateTime<Utc>) -> Option<T> {
    let framed = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, token).ok()?;
    if framed.len() < 4 {
        return None;
    }
    let json_len = u32::from_be_bytes(framed[0..4].try_into().ok()?) as usize;
    if framed.len() < 4 + json_len {
        return None;
    }
    let json = &framed[4..4 + json_len];
    let tag = &framed[4 + json_len..];

    let expected_tag = sign(secret, json);
    if expected_tag.len() != tag.len() || !constant_time_eq(&expected_tag, tag) {
        return None;
    }

    let signed: SignedPayload<T> = serde_json::from_slice(json).ok()?;
    if now > signed.expires_at {
        return None;
    }
    Some(signed.payload)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Claims {
        email: String,
        return_url: String,
    }

    #[test]
    fn round_trips_and_verifies() {
        let now = Utc::now();
        let claims = Claims {
            email: "a@corp.com".to_string(),
            return_url: "https://app.corp.com/".to_string(),
        };
        let token = encode("shh", &claims, chrono::Duration::minutes(5), now);
        let decoded: Claims = decode("shh", &token, now).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let claims = Claims {
            email: "a@corp.com".to_string(),
            return_url: "https://app.corp.com/".to_string(),
        };
        let token = encode("shh", &claims, chrono::Duration::seconds(-1), now);
        let decoded: Option<Claims> = decode("shh", &token, now);
        assert!(decoded.is_none());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = Utc::now();
        let claims = Claims {
            email: "a@corp.com".to_string(),
            return_url: "https://app.corp.com/".to_string(),
        };
        let token = encode("shh", &claims, chrono::Duration::minutes(5), now);
        let decoded: Option<Claims> = decode("different", &token, now);
        assert!(decoded.is_none());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let now = Utc::now();
        let claims = Claims {
            email: "a@corp.com".to_string(),
            return_url: "https://app.corp.com/".to_string(),
        };
        let mut token = encode("shh", &claims, chrono::Duration::minutes(5), now);
        token.push('x');
        let decoded: Option<Claims> = decode("shh", &token, now);
        assert!(decoded.is_none());
    }
}
