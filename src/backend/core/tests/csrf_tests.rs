//! CSRF token manager tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bastion_core::crypto::random_token;
use bastion_core::http::HeaderCookieJar;
use bastion_core::security::csrf::{verify_token, CsrfFailure};
use bastion_core::security::events::{EventContext, Redaction, SecurityEventType};
use bastion_core::security::{CsrfConfig, CsrfManager, MemorySink, SecurityEventLogger};
use chrono::Utc;

const SECRET: &str = "0123456789abcdef0123456789abcdef";

fn manager() -> (CsrfManager, MemorySink) {
    let sink = MemorySink::new();
    let events = Arc::new(SecurityEventLogger::new(Redaction::default()).with_sink(sink.clone()));
    (CsrfManager::new(CsrfConfig::with_secret(SECRET), events).unwrap(), sink)
}

#[test]
fn test_short_secret_refuses_to_start() {
    let events = Arc::new(SecurityEventLogger::default());
    assert!(CsrfManager::new(CsrfConfig::with_secret("too-short"), events.clone()).is_err());
    assert!(CsrfManager::new(CsrfConfig::default(), events).is_err());
}

#[test]
fn test_issue_verify_through_cookie_jar() {
    let (csrf, sink) = manager();
    let mut jar = HeaderCookieJar::new();
    let token = csrf.issue_into(&mut jar);

    let verdict = csrf.verify_request(Some(token.value.as_str()), &jar, Utc::now(), &EventContext::default());
    assert!(verdict.valid);
    assert!(sink.is_empty());

    csrf.revoke(&mut jar);
    let verdict = csrf.verify_request(Some(token.value.as_str()), &jar, Utc::now(), &EventContext::default());
    assert_eq!(verdict.reason, Some(CsrfFailure::Missing));
}

#[test]
fn test_expired_beats_mismatch() {
    let now = Utc::now();
    let token = random_token();

    let verdict = verify_token(Some(token.as_str()), Some(token.as_str()), now, now - chrono::Duration::seconds(1));
    assert_eq!(verdict.reason, Some(CsrfFailure::Expired));

    let other = random_token();
    let verdict = verify_token(Some(other.as_str()), Some(token.as_str()), now, now - chrono::Duration::seconds(1));
    assert_eq!(verdict.reason, Some(CsrfFailure::Expired));
}

#[test]
fn test_expired_cookie_is_reported_as_expired() {
    let (csrf, sink) = manager();
    let token = csrf.issue(Duration::from_secs(60));
    let cookie = csrf.seal(&token);

    let later = Utc::now() + chrono::Duration::minutes(5);
    let verdict = csrf.verify_cookie(Some(token.value.as_str()), Some(cookie.as_str()), later, &EventContext::default());
    assert_eq!(verdict.reason, Some(CsrfFailure::Expired));

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, SecurityEventType::CsrfAttack);
    assert_eq!(events[0].detail.as_deref(), Some("expired"));
}

#[test]
fn test_logged_token_is_truncated() {
    let (csrf, sink) = manager();
    let token = csrf.issue(Duration::from_secs(60));
    let cookie = csrf.seal(&token);
    let forged = random_token();

    let verdict = csrf.verify_cookie(Some(forged.as_str()), Some(cookie.as_str()), Utc::now(), &EventContext::default());
    assert_eq!(verdict.reason, Some(CsrfFailure::Mismatch));

    let logged = sink.events()[0].input.clone().unwrap();
    assert!(logged.starts_with(&forged[..8]));
    assert!(!logged.contains(&forged[8..]));
}

#[test]
fn test_tampered_cookie_is_mismatch() {
    let (csrf, _sink) = manager();
    let token = csrf.issue(Duration::from_secs(60));
    let cookie = csrf.seal(&token);
    let tampered = format!("{}0", &cookie[..cookie.len() - 1]);
    let tampered = if tampered == cookie { format!("{}1", &cookie[..cookie.len() - 1]) } else { tampered };

    let verdict = csrf.verify_cookie(Some(token.value.as_str()), Some(tampered.as_str()), Utc::now(), &EventContext::default());
    assert_eq!(verdict.reason, Some(CsrfFailure::Mismatch));
}

#[test]
fn test_malformed_submission() {
    let (csrf, _sink) = manager();
    let token = csrf.issue(Duration::from_secs(60));
    let cookie = csrf.seal(&token);

    let verdict = csrf.verify_cookie(Some("not-hex"), Some(cookie.as_str()), Utc::now(), &EventContext::default());
    assert_eq!(verdict.reason, Some(CsrfFailure::Malformed));
}

/// Median time per verification for a submission that first differs from the
/// stored token at byte `position`.
fn median_nanos(stored: &str, position: usize, rounds: usize, per_round: u32) -> f64 {
    let mut submitted: Vec<u8> = stored.as_bytes().to_vec();
    submitted[position] = if submitted[position] == b'0' { b'1' } else { b'0' };
    for byte in submitted.iter_mut().skip(position + 1) {
        *byte = if *byte == b'a' { b'b' } else { b'a' };
    }
    let submitted = String::from_utf8(submitted).unwrap();

    let now = Utc::now();
    let expiry = now + chrono::Duration::hours(1);
    let mut samples: Vec<f64> = (0..rounds)
        .map(|_| {
            let start = Instant::now();
            for _ in 0..per_round {
                std::hint::black_box(verify_token(
                    Some(std::hint::black_box(submitted.as_str())),
                    Some(std::hint::black_box(stored)),
                    now,
                    expiry,
                ));
            }
            start.elapsed().as_nanos() as f64 / f64::from(per_round)
        })
        .collect();
    samples.sort_by(|a, b| a.total_cmp(b));
    samples[samples.len() / 2]
}

#[test]
fn test_verification_time_does_not_track_mismatch_position() {
    let stored = random_token();

    // Warm up caches and the regex.
    median_nanos(&stored, 0, 5, 500);

    let early = median_nanos(&stored, 0, 31, 2_000);
    let late = median_nanos(&stored, 63, 31, 2_000);

    let ratio = early.max(late) / early.min(late);
    assert!(
        ratio < 2.0,
        "first-byte mismatch {:.1}ns vs last-byte mismatch {:.1}ns",
        early,
        late
    );
}
