use chrono::{TimeZone, Utc};
use loyalty_core::{
    accrual_subsystem::{AccrualKind, AccrualOutcome, AccrualRequest},
    catalog::TierDefinition,
    clock::ManualClock,
    config::RuleCatalog,
    engine::LoyaltyEngine,
    user::NewUser,
    LoyaltyError,
};
use std::sync::Arc;

// ── Test helpers ────────────────────────────────────────────────────────────

fn tier(name: &str, order: i64, points: i64, spent: f64, orders: i64, multiplier: f64) -> TierDefinition {
    TierDefinition {
        tier: name.into(),
        sort_order: order,
        min_points_required: points,
        min_total_spent: spent,
        min_orders_count: orders,
        points_multiplier: multiplier,
        benefits: vec![],
    }
}

fn make_engine() -> LoyaltyEngine {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 14, 20, 0, 0).unwrap()));
    let engine = LoyaltyEngine::build_test(clock).unwrap();
    engine.upsert_tier(&tier("bronze", 1, 0, 0.0, 0, 1.0)).unwrap();
    engine.upsert_tier(&tier("silver", 2, 500, 250.0, 5, 1.2)).unwrap();
    engine.upsert_tier(&tier("gold", 3, 2000, 1000.0, 20, 1.5)).unwrap();
    engine
}

fn member(engine: &LoyaltyEngine, email: &str) -> String {
    engine
        .register_user(&NewUser { email: email.into(), name: "Member".into(), region: None })
        .unwrap()
        .user
        .user_id
}

fn buy(engine: &LoyaltyEngine, user_id: &str, order_id: &str, amount: f64) -> AccrualOutcome {
    engine
        .accrue(&AccrualRequest::purchase(user_id, order_id, amount, vec![]))
        .unwrap()
}

/// Five 100.00 orders meet every silver threshold; the order that crosses
/// is paid at the old tier and the next one at the new.
#[test]
fn promotion_after_all_thresholds_met() {
    let engine = make_engine();
    let user_id = member(&engine, "climber@example.com");

    for n in 1..=4 {
        let outcome = buy(&engine, &user_id, &format!("ord-{n}"), 100.0);
        assert_eq!(outcome.new_tier, "bronze", "after order {n}");
    }
    let crossing = buy(&engine, &user_id, "ord-5", 100.0);
    assert_eq!(crossing.points_awarded, 100);
    assert_eq!(crossing.new_tier, "silver");

    let next = buy(&engine, &user_id, "ord-6", 100.0);
    assert_eq!(next.points_awarded, 120);

    let changes = engine.events(Some("tier_changed")).unwrap();
    assert_eq!(changes.len(), 1);
    assert!(changes[0].payload.contains("\"new_tier\":\"silver\""));
}

/// Lifetime points alone do not qualify while order count is short.
#[test]
fn every_threshold_is_required() {
    let engine = make_engine();
    let user_id = member(&engine, "whale@example.com");

    let outcome = engine
        .accrue(&AccrualRequest {
            user_id: user_id.clone(),
            order_id: Some("goodwill-1".into()),
            amount: 5_000.0,
            line_items: vec![],
            kind: AccrualKind::Adjustment,
            action: None,
        })
        .unwrap();

    assert_eq!(outcome.new_tier, "bronze");
    assert_eq!(engine.user(&user_id).unwrap().total_points_earned, 5_050);
}

/// Spending points never lowers a tier.
#[test]
fn redemption_does_not_demote() {
    let engine = make_engine();
    let user_id = member(&engine, "spender@example.com");
    for n in 1..=5 {
        buy(&engine, &user_id, &format!("ord-{n}"), 100.0);
    }
    assert_eq!(engine.user(&user_id).unwrap().loyalty_tier, "silver");

    engine.adjust_balance(&user_id, -500, "spent at counter").unwrap();
    buy(&engine, &user_id, "ord-6", 10.0);

    let user = engine.user(&user_id).unwrap();
    assert_eq!(user.loyalty_tier, "silver");
    assert_eq!(user.points_balance, 50 + 500 - 500 + 12);
}

/// Raising thresholds in the catalog never demotes existing members.
#[test]
fn catalog_edit_does_not_demote() {
    let engine = make_engine();
    let user_id = member(&engine, "veteran@example.com");
    for n in 1..=5 {
        buy(&engine, &user_id, &format!("ord-{n}"), 100.0);
    }
    engine.upsert_tier(&tier("silver", 2, 100_000, 250.0, 5, 1.2)).unwrap();

    let outcome = buy(&engine, &user_id, "ord-6", 100.0);
    assert_eq!(outcome.new_tier, "silver");
}

/// An admin placement is the only way down; stats re-promote on the next
/// accrual.
#[test]
fn admin_can_demote() {
    let engine = make_engine();
    let user_id = member(&engine, "demoted@example.com");
    for n in 1..=5 {
        buy(&engine, &user_id, &format!("ord-{n}"), 100.0);
    }

    let user = engine.set_tier(&user_id, "bronze").unwrap();
    assert_eq!(user.loyalty_tier, "bronze");

    let outcome = buy(&engine, &user_id, "ord-6", 10.0);
    assert_eq!(outcome.points_awarded, 10, "paid at bronze");
    assert_eq!(outcome.new_tier, "silver", "stats still qualify");
}

/// Unknown tiers cannot be assigned.
#[test]
fn unknown_tier_is_rejected() {
    let engine = make_engine();
    let user_id = member(&engine, "platinum@example.com");
    assert!(matches!(engine.set_tier(&user_id, "platinum"), Err(LoyaltyError::Validation(_))));
    assert!(matches!(engine.set_tier("ghost", "gold"), Err(LoyaltyError::NotFound { .. })));
}

/// The shipped catalog seeds cleanly and re-seeding keeps live counters.
#[test]
fn shipped_catalog_seeds_idempotently() {
    let data_dir = format!("{}/../data", env!("CARGO_MANIFEST_DIR"));
    let catalog = RuleCatalog::load(&data_dir).expect("catalog.json");
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()));
    let engine = LoyaltyEngine::build_test(clock).unwrap();
    engine.seed_catalog(&catalog).unwrap();

    let user_id = member(&engine, "seeded@example.com");
    let outcome = buy(&engine, &user_id, "ord-1", 30.0);
    assert_eq!(outcome.points_awarded, 60, "weekend double applies to orders of 20 or more");
    assert_eq!(engine.campaign("camp-weekend-double").unwrap().used_budget, 60);

    engine.seed_catalog(&catalog).unwrap();
    assert_eq!(engine.campaign("camp-weekend-double").unwrap().used_budget, 60);
    assert_eq!(engine.rewards().unwrap().len(), 3);
}
