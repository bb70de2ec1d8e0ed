//! The loyalty engine: the single entry point for every operation.
//!
//! EXECUTION MODEL (every mutating call):
//!   1. Read `now` from the injected clock, once.
//!   2. Open one IMMEDIATE transaction.
//!   3. Run the owning subsystem against the store.
//!   4. Append every produced event to the event log.
//!   5. Commit, then hand the events to the notifier.
//!
//! RULES:
//!   - Any error before commit rolls back every write of the operation.
//!   - Notifier failures are logged and never reach the caller.
//!   - One engine owns one connection. Concurrent callers each build their
//!     own engine over `LoyaltyStore::reopen`.

use crate::{
    accrual_subsystem::{AccrualOutcome, AccrualRequest, AccrualSubsystem},
    campaign_subsystem::CampaignSubsystem,
    catalog::{Campaign, LoyaltyReward, PointsRule, TierDefinition},
    clock::{Clock, SystemClock},
    config::{LoyaltyConfig, RuleCatalog},
    error::{LoyaltyError, LoyaltyResult},
    event::{EventLogEntry, LoyaltyEvent},
    lifecycle_subsystem::{CustomerStatus, LifecycleSubsystem},
    notify::{LogNotifier, Notifier, NullNotifier},
    redemption_subsystem::{LoyaltyRedemption, RedemptionReceipt, RedemptionStatus, RedemptionSubsystem},
    referral_subsystem::{ActorContext, ReferralSubsystem, ReferralTransaction, ReferralValidation, Registration},
    rng::CodeGenerator,
    store::{FraudLogRow, LoyaltyStore},
    tier_subsystem::TierSubsystem,
    types::Points,
    user::{LoyaltyTransaction, NewUser, User},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Member counts per stored lifecycle status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleSummary {
    pub active: i64,
    pub inactive: i64,
    pub dormant: i64,
}

pub struct LoyaltyEngine {
    store:    LoyaltyStore,
    config:   LoyaltyConfig,
    clock:    Arc<dyn Clock>,
    codes:    Mutex<CodeGenerator>,
    notifier: Arc<dyn Notifier>,
}

impl LoyaltyEngine {
    /// Wall clock, entropy-seeded codes, log notifier.
    pub fn new(store: LoyaltyStore, config: LoyaltyConfig) -> LoyaltyResult<Self> {
        store.set_busy_timeout(config.busy_timeout_ms)?;
        Ok(Self {
            store,
            config,
            clock:    Arc::new(SystemClock),
            codes:    Mutex::new(CodeGenerator::from_entropy()),
            notifier: Arc::new(LogNotifier),
        })
    }

    /// In-memory store, default config, pinned clock, seeded codes and a
    /// silent notifier. Used by the integration tests.
    pub fn build_test(clock: Arc<dyn Clock>) -> LoyaltyResult<Self> {
        let store = LoyaltyStore::in_memory()?;
        store.migrate()?;
        Ok(Self::new(store, LoyaltyConfig::default())?
            .with_clock(clock)
            .with_notifier(Arc::new(NullNotifier))
            .with_code_seed(42))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Deterministic code stream for tests and replays.
    pub fn with_code_seed(mut self, seed: u64) -> Self {
        self.codes = Mutex::new(CodeGenerator::seeded(seed));
        self
    }

    pub fn store(&self) -> &LoyaltyStore {
        &self.store
    }

    pub fn config(&self) -> &LoyaltyConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── Core operations ──────────────────────────────────────────────────────

    pub fn accrue(&self, request: &AccrualRequest) -> LoyaltyResult<AccrualOutcome> {
        self.commit(|store, now| AccrualSubsystem::new(store, &self.config).accrue(request, now))
    }

    pub fn redeem(&self, user_id: &str, reward_id: &str) -> LoyaltyResult<RedemptionReceipt> {
        self.commit(|store, now| {
            let mut codes = self.lock_codes()?;
            RedemptionSubsystem::new(store, &self.config).redeem(user_id, reward_id, &mut codes, now)
        })
    }

    pub fn update_redemption_status(
        &self,
        redemption_id: &str,
        target: RedemptionStatus,
    ) -> LoyaltyResult<LoyaltyRedemption> {
        self.commit(|store, now| {
            RedemptionSubsystem::new(store, &self.config).update_status(redemption_id, target, now)
        })
    }

    /// Scores and records the attempt even when the code is unknown.
    pub fn validate_referral_code(&self, code: &str, actor: &ActorContext) -> LoyaltyResult<ReferralValidation> {
        self.commit(|store, now| ReferralSubsystem::new(store, &self.config).validate_code(code, actor, now))
    }

    pub fn register_user(&self, new_user: &NewUser) -> LoyaltyResult<Registration> {
        self.commit(|store, now| {
            let mut codes = self.lock_codes()?;
            ReferralSubsystem::new(store, &self.config).register_user(new_user, &mut codes, now)
        })
    }

    pub fn register_with_referral(
        &self,
        new_user: &NewUser,
        code: &str,
        actor: &ActorContext,
    ) -> LoyaltyResult<Registration> {
        self.commit(|store, now| {
            let mut codes = self.lock_codes()?;
            ReferralSubsystem::new(store, &self.config).register_with_referral(new_user, code, actor, &mut codes, now)
        })
    }

    /// Read-only; derived from recency at call time.
    pub fn classify_customer(&self, user_id: &str) -> LoyaltyResult<CustomerStatus> {
        LifecycleSubsystem::new(&self.store, &self.config.lifecycle).classify(user_id, self.clock.now())
    }

    /// Persist derived statuses for reporting. Returns how many changed.
    pub fn refresh_customer_statuses(&self) -> LoyaltyResult<usize> {
        self.commit(|store, now| {
            let events = LifecycleSubsystem::new(store, &self.config.lifecycle).refresh(now)?;
            Ok((events.len(), events))
        })
    }

    /// Retry the fan-out of a reached group goal. Returns members credited.
    pub fn settle_group_goal(&self, campaign_id: &str) -> LoyaltyResult<usize> {
        self.commit(|store, now| {
            let (mut events, rewarded) = CampaignSubsystem::new(store).settle_group_goal(campaign_id, now)?;
            let tiers = TierSubsystem::new(store);
            for user_id in &rewarded {
                events.extend(tiers.recompute(user_id)?);
            }
            Ok((rewarded.len(), events))
        })
    }

    // ── Admin ────────────────────────────────────────────────────────────────

    /// Load a catalog file. Tiers and rules are upserted; campaigns and
    /// rewards that already exist are left untouched.
    pub fn seed_catalog(&self, catalog: &RuleCatalog) -> LoyaltyResult<()> {
        self.commit(|store, _| {
            for tier in &catalog.tiers {
                store.upsert_tier(tier)?;
            }
            for rule in &catalog.rules {
                store.upsert_points_rule(rule)?;
            }
            for campaign in &catalog.campaigns {
                if store.get_campaign(&campaign.campaign_id)?.is_none() {
                    store.insert_campaign(campaign)?;
                }
            }
            for reward in &catalog.rewards {
                if store.get_reward(&reward.reward_id)?.is_none() {
                    store.insert_reward(reward)?;
                }
            }
            log::info!(
                "engine: catalog seeded ({} tiers, {} rules, {} campaigns, {} rewards)",
                catalog.tiers.len(),
                catalog.rules.len(),
                catalog.campaigns.len(),
                catalog.rewards.len()
            );
            Ok(((), Vec::new()))
        })
    }

    pub fn upsert_points_rule(&self, rule: &PointsRule) -> LoyaltyResult<()> {
        self.commit(|store, _| Ok((store.upsert_points_rule(rule)?, Vec::new())))
    }

    pub fn upsert_tier(&self, tier: &TierDefinition) -> LoyaltyResult<()> {
        self.commit(|store, _| Ok((store.upsert_tier(tier)?, Vec::new())))
    }

    pub fn add_campaign(&self, campaign: &Campaign) -> LoyaltyResult<()> {
        validate_campaign(campaign)?;
        self.commit(|store, _| Ok((store.insert_campaign(campaign)?, Vec::new())))
    }

    pub fn add_reward(&self, reward: &LoyaltyReward) -> LoyaltyResult<()> {
        if reward.points_required <= 0 {
            return Err(LoyaltyError::Validation("points_required must be positive".to_string()));
        }
        if reward.stock < -1 {
            return Err(LoyaltyError::Validation("stock must be -1 (unlimited) or non-negative".to_string()));
        }
        self.commit(|store, _| Ok((store.insert_reward(reward)?, Vec::new())))
    }

    pub fn deactivate_points_rule(&self, rule_id: &str) -> LoyaltyResult<()> {
        self.commit(|store, _| {
            if !store.set_points_rule_active(rule_id, false)? {
                return Err(LoyaltyError::not_found("points rule", rule_id));
            }
            Ok(((), Vec::new()))
        })
    }

    pub fn deactivate_campaign(&self, campaign_id: &str) -> LoyaltyResult<()> {
        self.commit(|store, _| {
            if !store.set_campaign_active(campaign_id, false)? {
                return Err(LoyaltyError::not_found("campaign", campaign_id));
            }
            Ok(((), Vec::new()))
        })
    }

    pub fn deactivate_reward(&self, reward_id: &str) -> LoyaltyResult<()> {
        self.commit(|store, _| {
            if !store.set_reward_active(reward_id, false)? {
                return Err(LoyaltyError::not_found("reward", reward_id));
            }
            Ok(((), Vec::new()))
        })
    }

    /// Explicit tier placement, the only way a tier can go down.
    pub fn set_tier(&self, user_id: &str, tier: &str) -> LoyaltyResult<User> {
        self.commit(|store, _| {
            let events: Vec<_> = TierSubsystem::new(store).set_tier(user_id, tier)?.into_iter().collect();
            Ok((load_user(store, user_id)?, events))
        })
    }

    /// Pin a lifecycle status until the member's next purchase. `None`
    /// clears the override.
    pub fn set_customer_status(&self, user_id: &str, status: Option<CustomerStatus>) -> LoyaltyResult<User> {
        self.commit(|store, _| {
            let before = load_user(store, user_id)?;
            store.set_status_override(user_id, status)?;
            let after = load_user(store, user_id)?;
            let mut events = Vec::new();
            if before.customer_status != after.customer_status {
                events.push(LoyaltyEvent::CustomerStatusChanged {
                    user_id: user_id.to_string(),
                    old_status: before.customer_status.as_str().to_string(),
                    new_status: after.customer_status.as_str().to_string(),
                });
            }
            log::info!(
                "engine: {user_id} status override {}",
                status.map_or("cleared", |s| s.as_str())
            );
            Ok((after, events))
        })
    }

    /// Signed balance correction. Never takes the balance below zero.
    pub fn adjust_balance(&self, user_id: &str, delta: Points, reason: &str) -> LoyaltyResult<Points> {
        self.commit(|store, now| AccrualSubsystem::new(store, &self.config).adjust_balance(user_id, delta, reason, now))
    }

    // ── Read models ──────────────────────────────────────────────────────────

    pub fn user(&self, user_id: &str) -> LoyaltyResult<User> {
        load_user(&self.store, user_id)
    }

    pub fn user_by_email(&self, email: &str) -> LoyaltyResult<Option<User>> {
        self.store.get_user_by_email(&email.trim().to_ascii_lowercase())
    }

    pub fn ledger(&self, user_id: &str) -> LoyaltyResult<Vec<LoyaltyTransaction>> {
        self.store.transactions_for_user(user_id)
    }

    pub fn redemption(&self, redemption_id: &str) -> LoyaltyResult<LoyaltyRedemption> {
        self.store
            .get_redemption(redemption_id)?
            .ok_or_else(|| LoyaltyError::not_found("redemption", redemption_id))
    }

    pub fn redemptions(&self, user_id: &str) -> LoyaltyResult<Vec<LoyaltyRedemption>> {
        self.store.redemptions_for_user(user_id)
    }

    pub fn referral_for(&self, referred_id: &str) -> LoyaltyResult<Option<ReferralTransaction>> {
        self.store.referral_for_referred(referred_id)
    }

    pub fn referrals_by(&self, referrer_id: &str) -> LoyaltyResult<Vec<ReferralTransaction>> {
        self.store.referrals_by_referrer(referrer_id)
    }

    pub fn campaign(&self, campaign_id: &str) -> LoyaltyResult<Campaign> {
        self.store
            .get_campaign(campaign_id)?
            .ok_or_else(|| LoyaltyError::not_found("campaign", campaign_id))
    }

    pub fn reward(&self, reward_id: &str) -> LoyaltyResult<LoyaltyReward> {
        self.store
            .get_reward(reward_id)?
            .ok_or_else(|| LoyaltyError::not_found("reward", reward_id))
    }

    pub fn rewards(&self) -> LoyaltyResult<Vec<LoyaltyReward>> {
        self.store.active_rewards()
    }

    pub fn lifecycle_summary(&self) -> LoyaltyResult<LifecycleSummary> {
        let mut summary = LifecycleSummary::default();
        for (status, count) in self.store.customer_status_counts()? {
            match CustomerStatus::parse(&status) {
                Some(CustomerStatus::Active) => summary.active += count,
                Some(CustomerStatus::Inactive) => summary.inactive += count,
                Some(CustomerStatus::Dormant) => summary.dormant += count,
                None => log::warn!("engine: unknown customer status '{status}' in {count} rows"),
            }
        }
        Ok(summary)
    }

    pub fn events(&self, event_type: Option<&str>) -> LoyaltyResult<Vec<EventLogEntry>> {
        self.store.events(event_type)
    }

    pub fn fraud_logs(&self, action_type: Option<&str>) -> LoyaltyResult<Vec<FraudLogRow>> {
        self.store.fraud_logs(action_type)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn commit<T>(
        &self,
        op: impl FnOnce(&LoyaltyStore, DateTime<Utc>) -> LoyaltyResult<(T, Vec<LoyaltyEvent>)>,
    ) -> LoyaltyResult<T> {
        let now = self.clock.now();
        let (out, events) = self.store.with_tx(|store| {
            let (out, events) = op(store, now)?;
            for event in &events {
                store.append_event(event, now)?;
            }
            Ok((out, events))
        })?;
        for event in &events {
            if let Err(e) = self.notifier.notify(event) {
                log::warn!("engine: notifier failed for {}: {e:#}", event.type_name());
            }
        }
        Ok(out)
    }

    fn lock_codes(&self) -> LoyaltyResult<std::sync::MutexGuard<'_, CodeGenerator>> {
        self.codes
            .lock()
            .map_err(|_| LoyaltyError::Other(anyhow::anyhow!("code generator lock poisoned")))
    }
}

fn load_user(store: &LoyaltyStore, user_id: &str) -> LoyaltyResult<User> {
    store
        .get_user(user_id)?
        .ok_or_else(|| LoyaltyError::not_found("user", user_id))
}

fn validate_campaign(c: &Campaign) -> LoyaltyResult<()> {
    if c.end_at < c.start_at {
        return Err(LoyaltyError::Validation(format!(
            "campaign '{}' ends before it starts",
            c.campaign_id
        )));
    }
    if !(c.points_multiplier.is_finite() && c.points_multiplier > 0.0) {
        return Err(LoyaltyError::Validation(format!(
            "campaign '{}' multiplier must be positive",
            c.campaign_id
        )));
    }
    if let Some(total) = c.total_budget {
        if total < 0 || c.used_budget > total {
            return Err(LoyaltyError::Validation(format!(
                "campaign '{}' budget is inconsistent",
                c.campaign_id
            )));
        }
    }
    Ok(())
}
