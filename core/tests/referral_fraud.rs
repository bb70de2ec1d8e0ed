use chrono::{Duration, TimeZone, Utc};
use loyalty_core::{
    accrual_subsystem::AccrualRequest,
    clock::ManualClock,
    engine::LoyaltyEngine,
    referral_subsystem::{ActorContext, ReferralStatus},
    user::{NewUser, TransactionType, User},
    LoyaltyError,
};
use std::sync::Arc;

// ── Test helpers ────────────────────────────────────────────────────────────

fn make_engine() -> (LoyaltyEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 4, 11, 9, 15, 0).unwrap()));
    let engine = LoyaltyEngine::build_test(clock.clone()).unwrap();
    (engine, clock)
}

fn actor(ip: &str, user_agent: &str, country: &str) -> ActorContext {
    ActorContext {
        ip: ip.into(),
        user_agent: user_agent.into(),
        country: Some(country.into()),
        account_created_at: None,
    }
}

fn new_user(email: &str, region: &str) -> NewUser {
    NewUser { email: email.into(), name: "Someone".into(), region: Some(region.into()) }
}

fn referrer(engine: &LoyaltyEngine) -> User {
    engine.register_user(&new_user("alice@example.com", "US")).unwrap().user
}

// ── Code validation scoring ─────────────────────────────────────────────────

/// A fourth attempt from one IP inside a minute adds 50; with the user-agent
/// burst the score reaches the block line, and every attempt is logged.
#[test]
fn rapid_attempts_are_blocked_and_logged() {
    let (engine, _) = make_engine();
    let alice = referrer(&engine);
    let bot = actor("203.0.113.9", "curl/8.4", "US");

    for n in 1..=3 {
        let check = engine.validate_referral_code(&alice.referral_code, &bot).unwrap();
        assert!(check.valid, "attempt {n} should pass");
        assert_eq!(check.risk_score, 0, "attempt {n}");
    }
    let fourth = engine.validate_referral_code(&alice.referral_code, &bot).unwrap();

    assert!(fourth.blocked);
    assert!(!fourth.valid, "a blocked attempt is never valid");
    assert!(fourth.risk_score >= 70, "score {}", fourth.risk_score);
    assert_eq!(fourth.risk_score, 85, "50 for the IP burst plus 35 for the user agent");

    let logs = engine.fraud_logs(Some("referral_code_validation")).unwrap();
    assert_eq!(logs.len(), 4);
    let last = logs.last().unwrap();
    assert!(last.blocked);
    assert_eq!(last.ip.as_deref(), Some("203.0.113.9"));
    assert_eq!(last.code.as_deref(), Some(alice.referral_code.as_str()));
    assert!(last.signals_json.contains("attempts from IP in last minute"), "{}", last.signals_json);
}

/// Probing several codes from one address scores on distinct codes.
#[test]
fn code_probing_raises_the_score() {
    let (engine, clock) = make_engine();
    let alice = referrer(&engine);
    let prober = actor("198.51.100.77", "Mozilla/5.0", "US");

    for guess in ["REF-AAAAAAAA", "REF-BBBBBBBB"] {
        let check = engine.validate_referral_code(guess, &prober).unwrap();
        assert!(!check.valid);
        assert_eq!(check.risk_score, 0);
        clock.advance(Duration::minutes(2));
    }
    let third = engine.validate_referral_code(&alice.referral_code, &prober).unwrap();

    assert_eq!(third.risk_score, 40);
    assert!(!third.blocked);
    assert!(third.valid, "below the block line a real code still validates");
}

/// Attempts age out of the sliding windows.
#[test]
fn windows_slide_with_the_clock() {
    let (engine, clock) = make_engine();
    let alice = referrer(&engine);
    let user = actor("192.0.2.44", "App/3.1", "US");

    for _ in 0..4 {
        engine.validate_referral_code(&alice.referral_code, &user).unwrap();
    }
    clock.advance(Duration::hours(2));

    let later = engine.validate_referral_code(&alice.referral_code, &user).unwrap();
    assert_eq!(later.risk_score, 0);
    assert!(later.valid);
}

// ── Registration ─────────────────────────────────────────────────────────────

/// A clean referred signup gets the welcome and referred bonuses and leaves a
/// pending referral carrying the referred bonus.
#[test]
fn referred_registration_pays_both_bonuses() {
    let (engine, _) = make_engine();
    let alice = referrer(&engine);

    let bob = engine
        .register_with_referral(&new_user("bob@example.com", "US"), &alice.referral_code, &actor("10.0.0.1", "App/3.1", "US"))
        .unwrap();

    assert!(!bob.blocked);
    assert_eq!(bob.welcome_bonus_points, 50);
    assert_eq!(bob.referral_bonus_points, 100);
    assert_eq!(bob.user.points_balance, 150);
    assert_eq!(bob.user.total_points_earned, 150);

    let referral = engine.referral_for(&bob.user.user_id).unwrap().expect("referral row");
    assert_eq!(referral.referrer_id, alice.user_id);
    assert_eq!(referral.status, ReferralStatus::Pending);
    assert_eq!(referral.points_awarded, 100);
    assert_eq!(Some(referral.referral_id), bob.referral_id);

    let usage = engine.fraud_logs(Some("referral_usage")).unwrap();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].risk_score, 25, "fresh account only");
}

/// Disposable email, fresh account and a country mismatch block the
/// referral: the member exists but no bonus is paid.
#[test]
fn risky_referred_registration_is_blocked() {
    let (engine, _) = make_engine();
    let alice = referrer(&engine);

    let registration = engine
        .register_with_referral(
            &new_user("x91@mailinator.com", "RU"),
            &alice.referral_code,
            &actor("10.9.9.9", "App/3.1", "RU"),
        )
        .unwrap();

    assert!(registration.blocked);
    assert_eq!(registration.welcome_bonus_points, 0);
    assert_eq!(registration.referral_bonus_points, 0);
    assert_eq!(registration.user.points_balance, 0);

    let referral = engine.referral_for(&registration.user.user_id).unwrap().unwrap();
    assert_eq!(referral.status, ReferralStatus::Expired);

    let usage = engine.fraud_logs(Some("referral_usage")).unwrap();
    assert_eq!(usage[0].risk_score, 75);
    assert!(usage[0].blocked);
    assert_eq!(usage[0].email.as_deref(), Some("x91@mailinator.com"));

    // A blocked referral never completes.
    engine
        .accrue(&AccrualRequest::purchase(&registration.user.user_id, "ord-1", 50.0, vec![]))
        .unwrap();
    assert_eq!(engine.user(&alice.user_id).unwrap().points_balance, 50);
}

/// Unknown codes and duplicate emails create nothing.
#[test]
fn bad_registrations_are_rejected() {
    let (engine, _) = make_engine();
    let alice = referrer(&engine);
    let someone = actor("10.0.0.2", "App/3.1", "US");

    let err = engine
        .register_with_referral(&new_user("carol@example.com", "US"), "REF-NOPE1234", &someone)
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::InvalidCode { .. }), "got {err:?}");
    assert!(engine.user_by_email("carol@example.com").unwrap().is_none());

    let err = engine
        .register_with_referral(&new_user(" Alice@Example.com ", "US"), &alice.referral_code, &someone)
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::DuplicateIdentity { .. }), "got {err:?}");

    let err = engine.register_user(&new_user("not-an-email", "US")).unwrap_err();
    assert!(matches!(err, LoyaltyError::Validation(_)), "got {err:?}");
}

/// Emails are stored normalized and referral codes are unique.
#[test]
fn registration_normalizes_email() {
    let (engine, _) = make_engine();
    let dana = engine.register_user(&new_user("  Dana@Example.COM", "CA")).unwrap().user;
    let erin = engine.register_user(&new_user("erin@example.com", "CA")).unwrap().user;

    assert_eq!(dana.email, "dana@example.com");
    assert!(dana.referral_code.starts_with("REF-"));
    assert_ne!(dana.referral_code, erin.referral_code);
    assert_eq!(engine.user_by_email("DANA@example.com").unwrap().unwrap().user_id, dana.user_id);
}

// ── Referral completion ──────────────────────────────────────────────────────

/// A small order activates the referral; a qualifying one completes it and
/// pays the referrer once.
#[test]
fn qualifying_purchase_completes_referral() {
    let (engine, _) = make_engine();
    let alice = referrer(&engine);
    let bob = engine
        .register_with_referral(&new_user("bob@example.com", "US"), &alice.referral_code, &actor("10.0.0.1", "App/3.1", "US"))
        .unwrap()
        .user;

    engine.accrue(&AccrualRequest::purchase(&bob.user_id, "b-1", 5.0, vec![])).unwrap();
    assert_eq!(engine.referral_for(&bob.user_id).unwrap().unwrap().status, ReferralStatus::Active);
    assert_eq!(engine.user(&alice.user_id).unwrap().points_balance, 50);

    engine.accrue(&AccrualRequest::purchase(&bob.user_id, "b-2", 25.0, vec![])).unwrap();
    let referral = engine.referral_for(&bob.user_id).unwrap().unwrap();
    assert_eq!(referral.status, ReferralStatus::Completed);
    assert!(referral.completed_at.is_some());

    let alice_after = engine.user(&alice.user_id).unwrap();
    assert_eq!(alice_after.points_balance, 250);
    assert_eq!(alice_after.total_points_earned, 250);
    assert!(engine
        .ledger(&alice.user_id)
        .unwrap()
        .iter()
        .any(|t| t.transaction_type == TransactionType::Referral && t.points_change == 200));

    // Completed is final.
    engine.accrue(&AccrualRequest::purchase(&bob.user_id, "b-3", 40.0, vec![])).unwrap();
    assert_eq!(engine.user(&alice.user_id).unwrap().points_balance, 250);
    assert_eq!(engine.referrals_by(&alice.user_id).unwrap().len(), 1);
}

/// Past the expiry window the referral expires instead of completing.
#[test]
fn late_purchase_expires_referral() {
    let (engine, clock) = make_engine();
    let alice = referrer(&engine);
    let bob = engine
        .register_with_referral(&new_user("bob@example.com", "US"), &alice.referral_code, &actor("10.0.0.1", "App/3.1", "US"))
        .unwrap()
        .user;

    clock.advance(Duration::days(31));
    engine.accrue(&AccrualRequest::purchase(&bob.user_id, "b-1", 60.0, vec![])).unwrap();

    assert_eq!(engine.referral_for(&bob.user_id).unwrap().unwrap().status, ReferralStatus::Expired);
    assert_eq!(engine.user(&alice.user_id).unwrap().points_balance, 50);
}
