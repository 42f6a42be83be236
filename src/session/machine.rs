//! Pure transition function for the session state machine (spec.md §4.4).
//!
//! `transition` performs no I/O: it only decides, given the current
//! `SessionState` (or its absence) and the outcome of a validation call the
//! caller already made (if any), what the caller must do next. All network
//! calls are made by the authenticator/proxy handlers that drive this
//! function, honoring spec.md §5's ordering guarantee that the
//! state-machine computation itself never suspends.

use chrono::{DateTime, Utc};

use crate::session::SessionState;

/// Outcome of a `/validate` call against the identity provider, supplied by
/// the caller because this module performs no I/O itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateOutcome {
    Ok,
    TransientFailure,
    HardFailure,
}

/// What the caller must do as a result of a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// No session cookie, or it failed to decode: redirect to sign-in.
    RedirectToSignIn,
    /// Session is usable as-is; no cookie rewrite needed.
    Allow,
    /// Session is usable; bump `valid_deadline` and rewrite the cookie.
    AllowAndBumpValid,
    /// Session is usable for now under grace; rewrite the cookie with
    /// `grace_period_start` set.
    AllowUnderGrace,
    /// Caller must invoke `Refresh` (single-flight) before proceeding.
    RequireRefresh,
    /// Caller must invoke `Revoke` then clear the cookie.
    Revoke,
    /// Session is unconditionally invalid; clear the cookie and redirect.
    ExpireAndRedirect,
}

/// Decide the next action for an existing session, given the outcome of a
/// `/validate` call the caller made if validation was due. Pass `None` when
/// validation was not attempted this request (e.g. refresh was due instead,
/// or neither was due and the session is simply used as-is).
pub fn transition(
    session: &SessionState,
    now: DateTime<Utc>,
    grace: chrono::Duration,
    validation: Option<ValidateOutcome>,
) -> Action {
    if session.is_lifetime_expired(now) {
        return Action::ExpireAndRedirect;
    }

    // Validation takes precedence over refresh when both are due in the
    // same request (spec.md §4.4 tie-break); refresh is only attempted if
    // validation fails or isn't due.
    if session.needs_validation(now) {
        return match validation {
            Some(ValidateOutcome::Ok) => Action::AllowAndBumpValid,
            Some(ValidateOutcome::TransientFailure) => {
                if session.grace_exceeded(now, grace) {
                    Action::ExpireAndRedirect
                } else {
                    Action::AllowUnderGrace
                }
            }
            Some(ValidateOutcome::HardFailure) => Action::ExpireAndRedirect,
            None => Action::Allow,
        };
    }

    if session.needs_refresh(now) {
        return Action::RequireRefresh;
    }

    Action::Allow
}

/// Decide the action for a missing or undecodable cookie: spec.md's "none"
/// state always redirects to sign-in.
pub fn transition_absent() -> Action {
    Action::RedirectToSignIn
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_deadlines(
        now: DateTime<Utc>,
        valid_offset: chrono::Duration,
        refresh_offset: chrono::Duration,
        lifetime_offset: chrono::Duration,
    ) -> SessionState {
        let mut s = SessionState::mint(
            "a@corp.com",
            "uid",
            vec![],
            "at",
            "rt",
            None,
            now,
            chrono::Duration::days(30),
            chrono::Duration::hours(1),
            chrono::Duration::seconds(60),
        );
        s.valid_deadline = now + valid_offset;
        s.refresh_deadline = now + refresh_offset;
        s.lifetime_deadline = now + lifetime_offset;
        s
    }

    #[test]
    fn lifetime_expired_always_redirects() {
        let now = Utc::now();
        let s = session_with_deadlines(
            now,
            chrono::Duration::seconds(-10),
            chrono::Duration::minutes(10),
            chrono::Duration::seconds(-1),
        );
        assert_eq!(
            transition(&s, now, chrono::Duration::hours(4), None),
            Action::ExpireAndRedirect
        );
    }

    #[test]
    fn stale_session_validates_and_bumps() {
        let now = Utc::now();
        let s = session_with_deadlines(
            now,
            chrono::Duration::seconds(-10),
            chrono::Duration::minutes(10),
            chrono::Duration::days(30),
        );
        assert_eq!(
            transition(&s, now, chrono::Duration::hours(4), Some(ValidateOutcome::Ok)),
            Action::AllowAndBumpValid
        );
    }

    #[test]
    fn transient_validation_failure_within_grace_continues() {
        let now = Utc::now();
        let s = session_with_deadlines(
            now,
            chrono::Duration::seconds(-10),
            chrono::Duration::minutes(10),
            chrono::Duration::days(30),
        );
        assert_eq!(
            transition(
                &s,
                now,
                chrono::Duration::hours(4),
                Some(ValidateOutcome::TransientFailure)
            ),
            Action::AllowUnderGrace
        );
    }

    #[test]
    fn transient_validation_failure_past_grace_expires() {
        let now = Utc::now();
        let mut s = session_with_deadlines(
            now,
            chrono::Duration::seconds(-10),
            chrono::Duration::minutes(10),
            chrono::Duration::days(30),
        );
        s.grace_period_start = Some(now - chrono::Duration::hours(5));
        assert_eq!(
            transition(
                &s,
                now,
                chrono::Duration::hours(4),
                Some(ValidateOutcome::TransientFailure)
            ),
            Action::ExpireAndRedirect
        );
    }

    #[test]
    fn refresh_due_requires_refresh() {
        let now = Utc::now();
        let s = session_with_deadlines(
            now,
            chrono::Duration::seconds(-7200),
            chrono::Duration::seconds(-10),
            chrono::Duration::days(30),
        );
        assert_eq!(
            transition(&s, now, chrono::Duration::hours(4), None),
            Action::RequireRefresh
        );
    }

    #[test]
    fn fresh_session_is_allowed_without_io() {
        let now = Utc::now();
        let s = session_with_deadlines(
            now,
            chrono::Duration::seconds(30),
            chrono::Duration::minutes(10),
            chrono::Duration::days(30),
        );
        assert_eq!(
            transition(&s, now, chrono::Duration::hours(4), None),
            Action::Allow
        );
    }

    #[test]
    fn absent_session_redirects() {
        assert_eq!(transition_absent(), Action::RedirectToSignIn);
    }
}
