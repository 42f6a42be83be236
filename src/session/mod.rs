//! Session data model (spec.md §3) and the state machine governing it
//! (spec.md §4.4). The `SessionState` is never persisted server-side; it
//! lives only inside the sealed cookie (see `crate::crypto::cookie`).

pub mod machine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The only server-authoritative record of a logged-in user: the payload
/// sealed into the session cookie.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub email: String,
    pub user: String,
    pub groups: Vec<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: Option<String>,

    pub lifetime_deadline: DateTime<Utc>,
    pub refresh_deadline: DateTime<Utc>,
    pub valid_deadline: DateTime<Utc>,
    pub grace_period_start: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Mint a fresh session from a successful OAuth redeem/callback,
    /// setting all three deadlines from `now`.
    pub fn mint(
        email: impl Into<String>,
        user: impl Into<String>,
        groups: Vec<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        id_token: Option<String>,
        now: DateTime<Utc>,
        lifetime: chrono::Duration,
        refresh: chrono::Duration,
        valid: chrono::Duration,
    ) -> Self {
        Self {
            email: email.into().to_ascii_lowercase(),
            user: user.into(),
            groups,
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            id_token,
            lifetime_deadline: now + lifetime,
            refresh_deadline: now + refresh,
            valid_deadline: now + valid,
            grace_period_start: None,
        }
    }

    /// spec.md §3 invariant: a session past its lifetime deadline is
    /// unconditionally invalid, regardless of any other field.
    pub fn is_lifetime_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.lifetime_deadline
    }

    pub fn needs_validation(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_deadline && now <= self.refresh_deadline
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now > self.refresh_deadline && now <= self.lifetime_deadline
    }

    pub fn bump_valid_deadline(&mut self, now: DateTime<Utc>, valid: chrono::Duration) {
        self.valid_deadline = now + valid;
        self.grace_period_start = None;
    }

    pub fn enter_grace(&mut self, now: DateTime<Utc>) {
        if self.grace_period_start.is_none() {
            self.grace_period_start = Some(now);
        }
    }

    pub fn grace_exceeded(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        match self.grace_period_start {
            Some(start) => now > start + grace,
            None => false,
        }
    }

    pub fn apply_refresh(
        &mut self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        now: DateTime<Utc>,
        refresh: chrono::Duration,
        valid: chrono::Duration,
    ) {
        self.access_token = access_token.into();
        if let Some(rt) = refresh_token {
            self.refresh_token = rt;
        }
        self.refresh_deadline = now + refresh;
        self.valid_deadline = now + valid;
        self.grace_period_start = None;
    }
}
