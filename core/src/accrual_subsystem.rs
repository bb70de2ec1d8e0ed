//! Points accrual: turns a completed order (or a bonus action) into points.
//!
//! Purchase pipeline, each stage a multiplicative factor:
//!   1. base        floor(amount × base rate)
//!   2. category    amount-weighted multiplier over line items
//!   3. tier        tier_multiplier rule, else the tier's own multiplier
//!   4. campaigns   overlay factors in composition order
//!
//! `points = floor(base × category × tier × campaigns)`, then the campaign
//! budget clamp. The breakdown records each stage as the change it made to
//! the floored running total, so its points always sum to the award.
//!
//! Non-purchase kinds skip the pipeline: welcome and referral pay an
//! action bonus, adjustment pays `floor(amount)`. None of them touch
//! campaigns or purchase stats.
//!
//! Dedupe: an `order_id` seen before returns the stored outcome with
//! `replayed = true` and changes nothing.

use crate::{
    campaign_subsystem::{clamp_to_budget, CampaignOverlay, CampaignSubsystem, OrderContext},
    catalog::{PointsRule, RuleKind, TierLadder},
    config::LoyaltyConfig,
    error::{LoyaltyError, LoyaltyResult},
    event::LoyaltyEvent,
    referral_subsystem::ReferralSubsystem,
    store::{LoyaltyStore, ProcessedOrder},
    tier_subsystem::TierSubsystem,
    types::{EntityId, Points},
    user::{LoyaltyTransaction, TransactionType},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_RULE_ID: &str = "default-base";
pub const ACTION_WELCOME: &str = "welcome";
pub const ACTION_REFERRER: &str = "referral_referrer";
pub const ACTION_REFERRED: &str = "referral_referred";

/// Absorbs binary float error before flooring (100 × 1.2 must be 120).
const FLOOR_EPSILON: f64 = 1e-9;

/// Largest order or line amount accepted.
pub const MAX_ORDER_AMOUNT: f64 = 1e9;

/// Largest single credit. Keeps balance arithmetic inside SQLite's INTEGER range.
pub const MAX_AWARD: Points = 1_000_000_000_000;

// ── Request / outcome ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub category_id: String,
    pub line_amount: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccrualKind {
    #[default]
    Purchase,
    Welcome,
    Referral,
    Adjustment,
}

impl AccrualKind {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Self::Purchase => TransactionType::Purchase,
            Self::Welcome => TransactionType::Welcome,
            Self::Referral => TransactionType::Referral,
            Self::Adjustment => TransactionType::Adjustment,
        }
    }

    fn default_action(&self) -> &'static str {
        match self {
            Self::Referral => ACTION_REFERRED,
            _ => ACTION_WELCOME,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccrualRequest {
    pub user_id: EntityId,
    #[serde(default)]
    pub order_id: Option<EntityId>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub kind: AccrualKind,
    /// Which `action_bonus` rule a welcome or referral accrual pays.
    #[serde(default)]
    pub action: Option<String>,
}

impl AccrualRequest {
    pub fn purchase(user_id: &str, order_id: &str, amount: f64, line_items: Vec<LineItem>) -> Self {
        Self {
            user_id: user_id.to_string(),
            order_id: Some(order_id.to_string()),
            amount,
            line_items,
            kind: AccrualKind::Purchase,
            action: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContributionSource {
    Base,
    Category,
    Tier,
    Campaign,
    BudgetClamp,
    ActionBonus,
    Adjustment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contribution {
    pub rule_id: String,
    pub source: ContributionSource,
    pub factor: f64,
    pub points: Points,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccrualOutcome {
    pub user_id: EntityId,
    pub order_id: Option<EntityId>,
    pub points_awarded: Points,
    pub new_balance: Points,
    pub new_tier: String,
    pub breakdown: Vec<Contribution>,
    pub replayed: bool,
}

// ── Pure calculation ─────────────────────────────────────────────────────────

pub fn floor_points(x: f64) -> Points {
    if !x.is_finite() || x <= 0.0 {
        return 0;
    }
    (x + FLOOR_EPSILON).floor() as Points
}

/// One multiplicative stage of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub rule_id: String,
    pub source: ContributionSource,
    pub factor: f64,
}

/// Apply `stages` to `base_points`. Each contribution is the change in the
/// floored running total, so the contributions sum to the returned total.
pub fn telescope(base_points: Points, stages: &[Stage]) -> (Vec<Contribution>, Points) {
    let mut running = 1.0;
    let mut previous = base_points;
    let mut out = Vec::with_capacity(stages.len());
    for stage in stages {
        running *= stage.factor;
        let total = floor_points(base_points as f64 * running);
        out.push(Contribution {
            rule_id: stage.rule_id.clone(),
            source: stage.source,
            factor: stage.factor,
            points: total - previous,
        });
        previous = total;
    }
    (out, previous)
}

/// Amount-weighted category factor and the rule ids that contributed.
/// Line items with no rule weigh in at 1.0.
pub fn category_factor(line_items: &[LineItem], rules: &[PointsRule]) -> (f64, Vec<String>) {
    let total: f64 = line_items.iter().map(|li| li.line_amount.max(0.0)).sum();
    if line_items.is_empty() || total <= 0.0 {
        return (1.0, Vec::new());
    }

    let mut weighted = 0.0;
    let mut matched = Vec::new();
    for item in line_items {
        let best = rules
            .iter()
            .filter_map(|r| match &r.kind {
                RuleKind::CategoryMultiplier { category_id, multiplier } if *category_id == item.category_id => {
                    Some((r, *multiplier))
                }
                _ => None,
            })
            .max_by(|(a, ma), (b, mb)| ma.total_cmp(mb).then_with(|| b.rule_id.cmp(&a.rule_id)));
        let multiplier = match best {
            Some((rule, m)) => {
                if !matched.contains(&rule.rule_id) {
                    matched.push(rule.rule_id.clone());
                }
                m
            }
            None => 1.0,
        };
        weighted += item.line_amount.max(0.0) * multiplier;
    }
    matched.sort();
    (weighted / total, matched)
}

// ── Subsystem ────────────────────────────────────────────────────────────────

pub struct AccrualSubsystem<'a> {
    store: &'a LoyaltyStore,
    config: &'a LoyaltyConfig,
}

impl<'a> AccrualSubsystem<'a> {
    pub fn new(store: &'a LoyaltyStore, config: &'a LoyaltyConfig) -> Self {
        Self { store, config }
    }

    pub fn accrue(
        &self,
        request: &AccrualRequest,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(AccrualOutcome, Vec<LoyaltyEvent>)> {
        validate_request(request)?;

        if let Some(order_id) = &request.order_id {
            if let Some(done) = self.store.get_processed_order(order_id)? {
                return self.replay(request, done);
            }
        }

        let user = self
            .store
            .get_user(&request.user_id)?
            .ok_or_else(|| LoyaltyError::not_found("user", &request.user_id))?;

        let (points, breakdown, overlay) = match request.kind {
            AccrualKind::Purchase => self.purchase_points(request, &user.loyalty_tier, now)?,
            AccrualKind::Welcome | AccrualKind::Referral => {
                let action = request.action.as_deref().unwrap_or(request.kind.default_action());
                let (rule_id, points) = self.action_bonus_rule(action, now)?;
                (
                    points,
                    vec![Contribution {
                        rule_id,
                        source: ContributionSource::ActionBonus,
                        factor: 1.0,
                        points,
                    }],
                    CampaignOverlay::default(),
                )
            }
            AccrualKind::Adjustment => {
                let points = floor_points(request.amount);
                (
                    points,
                    vec![Contribution {
                        rule_id: "adjustment".to_string(),
                        source: ContributionSource::Adjustment,
                        factor: 1.0,
                        points,
                    }],
                    CampaignOverlay::default(),
                )
            }
        };

        if points > MAX_AWARD {
            return Err(LoyaltyError::Validation(format!(
                "award of {points} points exceeds the {MAX_AWARD} limit"
            )));
        }

        let new_balance = self.store.credit_points(&user.user_id, points, true)?;
        let transaction_type = request.kind.transaction_type();
        self.store.insert_transaction(&LoyaltyTransaction {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            user_id: user.user_id.clone(),
            points_change: points,
            transaction_type,
            order_id: request.order_id.clone(),
            order_amount: (request.kind == AccrualKind::Purchase).then_some(request.amount),
            description: describe(request),
            created_at: now,
        })?;
        let mut events = vec![LoyaltyEvent::PointsAccrued {
            user_id: user.user_id.clone(),
            order_id: request.order_id.clone(),
            transaction_type: transaction_type.as_str().to_string(),
            points,
            new_balance,
        }];

        let mut promote = vec![user.user_id.clone()];
        if request.kind == AccrualKind::Purchase {
            self.store.record_purchase(&user.user_id, request.amount, now)?;
            let (campaign_events, rewarded) =
                self.settle_campaigns(&overlay, request, &user.loyalty_tier, points, now)?;
            events.extend(campaign_events);
            promote.extend(rewarded.into_iter().filter(|u| *u != user.user_id));

            let referrals = ReferralSubsystem::new(self.store, self.config);
            events.extend(referrals.on_purchase(&user.user_id, request.amount, now)?);
        }

        if let Some(order_id) = &request.order_id {
            self.store.insert_processed_order(&ProcessedOrder {
                order_id: order_id.clone(),
                user_id: user.user_id.clone(),
                points_awarded: points,
                breakdown_json: serde_json::to_string(&breakdown)?,
                processed_at: now,
            })?;
        }

        let tiers = TierSubsystem::new(self.store);
        for user_id in &promote {
            events.extend(tiers.recompute(user_id)?);
        }

        let after = self
            .store
            .get_user(&user.user_id)?
            .ok_or_else(|| LoyaltyError::not_found("user", &user.user_id))?;

        log::info!(
            "accrual: {} +{points} ({}) order={:?} balance={} tier={}",
            after.user_id,
            transaction_type.as_str(),
            request.order_id,
            after.points_balance,
            after.loyalty_tier
        );

        Ok((
            AccrualOutcome {
                user_id: after.user_id,
                order_id: request.order_id.clone(),
                points_awarded: points,
                new_balance: after.points_balance,
                new_tier: after.loyalty_tier,
                breakdown,
                replayed: false,
            },
            events,
        ))
    }

    /// Admin balance correction. Credits leave lifetime stats alone; debits
    /// are guarded and never take the balance below zero.
    pub fn adjust_balance(
        &self,
        user_id: &str,
        delta: Points,
        reason: &str,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(Points, Vec<LoyaltyEvent>)> {
        let user = self
            .store
            .get_user(user_id)?
            .ok_or_else(|| LoyaltyError::not_found("user", user_id))?;
        if delta == 0 {
            return Err(LoyaltyError::Validation("adjustment delta must not be zero".to_string()));
        }
        if delta.unsigned_abs() > MAX_AWARD.unsigned_abs() {
            return Err(LoyaltyError::Validation(format!(
                "adjustment of {delta} exceeds the {MAX_AWARD} limit"
            )));
        }
        let new_balance = if delta > 0 {
            self.store.credit_points(user_id, delta, false)?
        } else {
            self.store
                .debit_points_guarded(user_id, -delta)?
                .ok_or(LoyaltyError::InsufficientPoints {
                    required: -delta,
                    available: user.points_balance,
                })?
        };
        self.store.insert_transaction(&LoyaltyTransaction {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            points_change: delta,
            transaction_type: TransactionType::Adjustment,
            order_id: None,
            order_amount: None,
            description: reason.to_string(),
            created_at: now,
        })?;
        log::info!("accrual: {user_id} adjusted by {delta} ({reason}), balance {new_balance}");
        Ok((
            new_balance,
            vec![LoyaltyEvent::BalanceAdjusted {
                user_id: user_id.to_string(),
                delta,
                new_balance,
                reason: reason.to_string(),
            }],
        ))
    }

    /// Points an `action_bonus` rule pays, falling back to configuration.
    pub fn action_bonus(&self, action: &str, now: DateTime<Utc>) -> LoyaltyResult<Points> {
        Ok(self.action_bonus_rule(action, now)?.1)
    }

    fn action_bonus_rule(&self, action: &str, now: DateTime<Utc>) -> LoyaltyResult<(String, Points)> {
        let rule = self
            .store
            .points_rules("action_bonus")?
            .into_iter()
            .filter(|r| r.applies_at(now))
            .find_map(|r| match r.kind {
                RuleKind::ActionBonus { action: a, points } if a == action => Some((r.rule_id, points)),
                _ => None,
            });
        if let Some((rule_id, points)) = rule {
            return Ok((rule_id, points.max(0)));
        }
        let fallback = match action {
            ACTION_WELCOME => self.config.welcome_bonus,
            ACTION_REFERRER => self.config.referral.referrer_bonus,
            ACTION_REFERRED => self.config.referral.referred_bonus,
            _ => 0,
        };
        Ok((format!("config:{action}"), fallback.max(0)))
    }

    fn purchase_points(
        &self,
        request: &AccrualRequest,
        tier: &str,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(Points, Vec<Contribution>, CampaignOverlay)> {
        let (base_rule_id, rate) = self
            .store
            .points_rules("base")?
            .into_iter()
            .filter(|r| r.applies_at(now))
            .find_map(|r| match r.kind {
                RuleKind::Base { rate_per_unit } => Some((r.rule_id, rate_per_unit)),
                _ => None,
            })
            .unwrap_or_else(|| (DEFAULT_BASE_RULE_ID.to_string(), self.config.default_points_per_unit));
        let base_points = floor_points(request.amount * rate);

        let category_rules: Vec<PointsRule> = self
            .store
            .points_rules("category_multiplier")?
            .into_iter()
            .filter(|r| r.applies_at(now))
            .collect();
        let (cat_factor, cat_rules) = category_factor(&request.line_items, &category_rules);

        let (tier_rule_id, tier_factor) = self.tier_multiplier(tier, now)?;

        let mut stages = Vec::new();
        if !cat_rules.is_empty() {
            stages.push(Stage {
                rule_id: cat_rules.join(","),
                source: ContributionSource::Category,
                factor: cat_factor,
            });
        }
        if let Some(rule_id) = tier_rule_id {
            stages.push(Stage { rule_id, source: ContributionSource::Tier, factor: tier_factor });
        }
        let (mut breakdown, uncampaigned) = telescope(base_points, &stages);

        let ctx = self.order_context(request, tier);
        let overlay = CampaignSubsystem::new(self.store).select(&ctx, now)?;
        for campaign in &overlay.multipliers {
            stages.push(Stage {
                rule_id: campaign.campaign_id.clone(),
                source: ContributionSource::Campaign,
                factor: campaign.points_multiplier,
            });
        }
        let (full_breakdown, full) = telescope(base_points, &stages);
        if !overlay.multipliers.is_empty() {
            breakdown = full_breakdown;
        }

        let awarded = clamp_to_budget(uncampaigned, full, overlay.budget_cap());
        if awarded != full {
            breakdown.push(Contribution {
                rule_id: "budget".to_string(),
                source: ContributionSource::BudgetClamp,
                factor: 1.0,
                points: awarded - full,
            });
        }
        breakdown.insert(
            0,
            Contribution {
                rule_id: base_rule_id,
                source: ContributionSource::Base,
                factor: rate,
                points: base_points,
            },
        );

        log::debug!(
            "accrual: base={base_points} category={cat_factor:.4} tier={tier_factor} campaigns={:.4} -> {awarded}",
            overlay.multiplier()
        );
        Ok((awarded, breakdown, overlay))
    }

    /// The tier stage, or `None` when the tier has no multiplier to apply.
    fn tier_multiplier(&self, tier: &str, now: DateTime<Utc>) -> LoyaltyResult<(Option<String>, f64)> {
        let rule = self
            .store
            .points_rules("tier_multiplier")?
            .into_iter()
            .filter(|r| r.applies_at(now))
            .find_map(|r| match r.kind {
                RuleKind::TierMultiplier { tier: t, multiplier } if t == tier => Some((r.rule_id, multiplier)),
                _ => None,
            });
        if let Some((rule_id, multiplier)) = rule {
            return Ok((Some(rule_id), multiplier));
        }
        let ladder = TierLadder::new(self.store.tiers()?);
        Ok(match ladder.get(tier) {
            Some(def) if (def.points_multiplier - 1.0).abs() > f64::EPSILON => {
                (Some(format!("tier:{tier}")), def.points_multiplier)
            }
            _ => (None, 1.0),
        })
    }

    fn order_context<'r>(&self, request: &'r AccrualRequest, tier: &'r str) -> OrderContext<'r> {
        OrderContext {
            user_id: &request.user_id,
            order_id: request.order_id.as_deref(),
            amount: request.amount,
            tier,
            categories: request.line_items.iter().map(|li| li.category_id.as_str()).collect(),
        }
    }

    fn settle_campaigns(
        &self,
        overlay: &CampaignOverlay,
        request: &AccrualRequest,
        tier: &str,
        awarded: Points,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(Vec<LoyaltyEvent>, Vec<EntityId>)> {
        if overlay.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let campaigns = CampaignSubsystem::new(self.store);
        let ctx = self.order_context(request, tier);
        let mut events = campaigns.settle_multipliers(overlay, &ctx, awarded, now)?;
        let (goal_events, rewarded) = campaigns.advance_group_goals(overlay, &request.user_id, now)?;
        events.extend(goal_events);
        Ok((events, rewarded))
    }

    fn replay(
        &self,
        request: &AccrualRequest,
        done: ProcessedOrder,
    ) -> LoyaltyResult<(AccrualOutcome, Vec<LoyaltyEvent>)> {
        if done.user_id != request.user_id {
            return Err(LoyaltyError::Validation(format!(
                "order '{}' was already accrued for another user",
                done.order_id
            )));
        }
        let user = self
            .store
            .get_user(&done.user_id)?
            .ok_or_else(|| LoyaltyError::not_found("user", &done.user_id))?;
        log::debug!("accrual: order {} already processed, replaying", done.order_id);
        Ok((
            AccrualOutcome {
                user_id: user.user_id,
                order_id: Some(done.order_id),
                points_awarded: done.points_awarded,
                new_balance: user.points_balance,
                new_tier: user.loyalty_tier,
                breakdown: serde_json::from_str(&done.breakdown_json)?,
                replayed: true,
            },
            Vec::new(),
        ))
    }
}

fn validate_request(request: &AccrualRequest) -> LoyaltyResult<()> {
    if request.user_id.trim().is_empty() {
        return Err(LoyaltyError::Validation("user_id must not be empty".to_string()));
    }
    if !request.amount.is_finite() || request.amount < 0.0 || request.amount > MAX_ORDER_AMOUNT {
        return Err(LoyaltyError::Validation(format!("invalid amount {}", request.amount)));
    }
    if request
        .line_items
        .iter()
        .any(|li| !li.line_amount.is_finite() || li.line_amount < 0.0 || li.line_amount > MAX_ORDER_AMOUNT)
    {
        return Err(LoyaltyError::Validation(format!(
            "line amounts must be between 0 and {MAX_ORDER_AMOUNT}"
        )));
    }
    if request.kind == AccrualKind::Purchase
        && request.order_id.as_deref().map_or(true, |o| o.trim().is_empty())
    {
        return Err(LoyaltyError::Validation("purchase accrual requires an order_id".to_string()));
    }
    Ok(())
}

fn describe(request: &AccrualRequest) -> String {
    match request.kind {
        AccrualKind::Purchase => format!(
            "Purchase {} ({:.2})",
            request.order_id.as_deref().unwrap_or("-"),
            request.amount
        ),
        AccrualKind::Welcome => "Welcome bonus".to_string(),
        AccrualKind::Referral => match request.action.as_deref() {
            Some(ACTION_REFERRER) => "Referral bonus (referrer)".to_string(),
            _ => "Referral bonus".to_string(),
        },
        AccrualKind::Adjustment => "Points adjustment".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category_rule(id: &str, category: &str, multiplier: f64) -> PointsRule {
        PointsRule {
            rule_id: id.into(),
            kind: RuleKind::CategoryMultiplier { category_id: category.into(), multiplier },
            is_active: true,
            valid_from: None,
            valid_until: None,
        }
    }

    fn line(category: &str, amount: f64) -> LineItem {
        LineItem { category_id: category.into(), line_amount: amount }
    }

    #[test]
    fn floor_absorbs_float_noise() {
        assert_eq!(floor_points(100.0 * 1.2), 120);
        assert_eq!(floor_points(0.1 * 3.0 * 10.0), 3);
        assert_eq!(floor_points(99.999), 99);
        assert_eq!(floor_points(-5.0), 0);
        assert_eq!(floor_points(f64::NAN), 0);
    }

    #[test]
    fn telescoping_contributions_sum_to_total() {
        let stages = vec![
            Stage { rule_id: "cat".into(), source: ContributionSource::Category, factor: 1.15 },
            Stage { rule_id: "silver".into(), source: ContributionSource::Tier, factor: 1.2 },
            Stage { rule_id: "camp".into(), source: ContributionSource::Campaign, factor: 2.0 },
        ];
        let (parts, total) = telescope(37, &stages);
        assert_eq!(total, floor_points(37.0 * 1.15 * 1.2 * 2.0));
        assert_eq!(37 + parts.iter().map(|c| c.points).sum::<Points>(), total);
    }

    #[test]
    fn example_silver_order() {
        let stages = vec![Stage { rule_id: "tier:silver".into(), source: ContributionSource::Tier, factor: 1.2 }];
        let (_, total) = telescope(100, &stages);
        assert_eq!(total, 120);
    }

    #[test]
    fn category_factor_is_amount_weighted() {
        let rules = vec![category_rule("r-dessert", "desserts", 2.0)];
        let (factor, ids) = category_factor(&[line("desserts", 25.0), line("mains", 75.0)], &rules);
        assert!((factor - 1.25).abs() < 1e-12);
        assert_eq!(ids, vec!["r-dessert".to_string()]);
    }

    #[test]
    fn category_factor_defaults_to_one() {
        let rules = vec![category_rule("r", "desserts", 2.0)];
        assert_eq!(category_factor(&[], &rules).0, 1.0);
        assert_eq!(category_factor(&[line("desserts", 0.0)], &rules).0, 1.0);
        assert_eq!(category_factor(&[line("mains", 10.0)], &rules).0, 1.0);
    }

    #[test]
    fn highest_matching_category_rule_wins() {
        let rules = vec![category_rule("a", "desserts", 1.5), category_rule("b", "desserts", 3.0)];
        let (factor, ids) = category_factor(&[line("desserts", 10.0)], &rules);
        assert!((factor - 3.0).abs() < 1e-12);
        assert_eq!(ids, vec!["b".to_string()]);
    }

    #[test]
    fn purchase_needs_order_id_and_sane_amounts() {
        let mut req = AccrualRequest::purchase("u", "o", 10.0, vec![]);
        assert!(validate_request(&req).is_ok());
        req.order_id = None;
        assert!(validate_request(&req).is_err());

        let req = AccrualRequest::purchase("u", "o", -1.0, vec![]);
        assert!(validate_request(&req).is_err());

        let req = AccrualRequest::purchase("u", "o", 10.0, vec![line("x", f64::INFINITY)]);
        assert!(validate_request(&req).is_err());

        let req = AccrualRequest::purchase("u", "o", 1e300, vec![]);
        assert!(validate_request(&req).is_err());
        let req = AccrualRequest::purchase("u", "o", MAX_ORDER_AMOUNT, vec![]);
        assert!(validate_request(&req).is_ok());

        let welcome = AccrualRequest {
            user_id: "u".into(),
            order_id: None,
            amount: 0.0,
            line_items: vec![],
            kind: AccrualKind::Welcome,
            action: None,
        };
        assert!(validate_request(&welcome).is_ok());
    }
}
