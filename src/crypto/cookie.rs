//! Sealed Cookie Store (spec.md §4.1, component C1).
//!
//! `Seal`/`Open` turn a `SessionState` into an authenticated-encrypted
//! cookie value and back. A cookie that fails to decrypt, fails to parse,
//! or carries an unknown version is indistinguishable from no cookie at
//! all — callers only ever see `None`, never a 5xx.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::session::SessionState;

const COOKIE_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

#[derive(Debug, Serialize, Deserialize)]
struct SealedEnvelope {
    version: u8,
    created_at: DateTime<Utc>,
    state: SessionState,
}

/// Encrypts/decrypts session cookies. Two secrets may be configured during a
/// rotation window: only the primary is used for sealing, but either is
/// accepted when opening.
pub struct SealedCookieStore {
    primary: Aes256Gcm,
    secondary: Option<Aes256Gcm>,
    cookie_name: String,
    secure: bool,
    domain: Option<String>,
}

impl SealedCookieStore {
    /// `secret_b64`/`secret_b64_old` are base64; they must decode to 32 or
    /// 64 raw bytes. A 64-byte secret is folded to a 32-byte AES-256 key via
    /// SHA-256 (spec.md §6 accepts both lengths; see DESIGN.md for why we
    /// fold rather than reject the 64-byte case).
    pub fn new(
        secret_b64: &str,
        secret_b64_old: Option<&str>,
        cookie_name: impl Into<String>,
        secure: bool,
        domain: Option<String>,
    ) -> Result<Self, String> {
        let primary = cipher_from_b64(secret_b64)?;
        let secondary = secret_b64_old.map(cipher_from_b64).transpose()?;
        Ok(Self {
            primary,
            secondary,
            cookie_name: cookie_name.into(),
            secure,
            domain,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Seal a session into a cookie value: base64(nonce || ciphertext || tag).
    pub fn seal(&self, state: &SessionState, now: DateTime<Utc>) -> Result<String, String> {
        let envelope = SealedEnvelope {
            version: COOKIE_VERSION,
            created_at: now,
            state: state.clone(),
        };
        let plaintext =
            serde_json::to_vec(&envelope).map_err(|e| format!("serialize session: {e}"))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .primary
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| "cookie encryption failed".to_string())?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(payload))
    }

    /// Open a cookie value; any failure (bad base64, short payload, MAC
    /// mismatch, version mismatch) yields `None`, never an error variant —
    /// per spec.md §4.1, a tampered cookie is indistinguishable from
    /// absence.
    pub fn open(&self, value: &str) -> Option<SessionState> {
        let payload = base64::engine::general_purpose::STANDARD
            .decode(value)
            .ok()?;
        if payload.len() < NONCE_LEN {
            return None;
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .primary
            .decrypt(nonce, ciphertext)
            .or_else(|_| match &self.secondary {
                Some(secondary) => secondary.decrypt(nonce, ciphertext),
                None => Err(aes_gcm::aead::Error),
            })
            .ok()?;

        let envelope: SealedEnvelope = serde_json::from_slice(&plaintext).ok()?;
        if envelope.version != COOKIE_VERSION {
            return None;
        }
        Some(envelope.state)
    }

    /// Build the `Set-Cookie` value for a freshly sealed session.
    pub fn build_cookie(&self, value: String, max_age: time::Duration) -> Cookie<'static> {
        let mut builder = Cookie::build((self.cookie_name.clone(), value))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(max_age);
        if let Some(domain) = self.domain.clone() {
            builder = builder.domain(domain);
        }
        builder.build()
    }

    /// Build the `Set-Cookie` value that clears the session cookie.
    pub fn build_clear_cookie(&self) -> Cookie<'static> {
        let mut builder = Cookie::build((self.cookie_name.clone(), String::new()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::seconds(0));
        if let Some(domain) = self.domain.clone() {
            builder = builder.domain(domain);
        }
        builder.build()
    }
}

fn cipher_from_b64(secret_b64: &str) -> Result<Aes256Gcm, String> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(secret_b64)
        .map_err(|e| format!("cookie secret is not valid base64: {e}"))?;
    let key_bytes: [u8; 32] = match decoded.len() {
        32 => decoded.try_into().expect("checked length"),
        64 => {
            let mut hasher = Sha256::new();
            hasher.update(&decoded);
            hasher.finalize().into()
        }
        other => return Err(format!("cookie secret must be 32 or 64 bytes, got {other}")),
    };
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes)))
}
