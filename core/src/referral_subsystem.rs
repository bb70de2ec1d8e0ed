//! Registration and the referral lifecycle.
//!
//! Referral status machine:
//!   pending → active     first purchase below `min_qualifying_order`
//!   pending | active → completed   qualifying purchase before `expires_at`
//!   pending | active → expired     any purchase after `expires_at`
//!
//! The referred member's bonus is credited at registration, the referrer's
//! when the referral completes. A registration the usage scorer blocks
//! still creates the account but credits nothing, and its referral row is
//! written as already expired so the attempt stays on record.

use crate::{
    accrual_subsystem::{AccrualKind, AccrualRequest, AccrualSubsystem, ACTION_REFERRED, ACTION_REFERRER, ACTION_WELCOME},
    config::LoyaltyConfig,
    error::{LoyaltyError, LoyaltyResult},
    event::LoyaltyEvent,
    fraud_detection_subsystem::FraudDetectionSubsystem,
    lifecycle_subsystem::CustomerStatus,
    rng::CodeGenerator,
    store::LoyaltyStore,
    types::{EntityId, Points},
    user::{NewUser, User},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use crate::fraud_detection_subsystem::ActorContext;

const MAX_CODE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    Pending,
    Active,
    Completed,
    Expired,
}

impl ReferralStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferralTransaction {
    pub referral_id: EntityId,
    pub referrer_id: EntityId,
    pub referred_id: EntityId,
    pub code: String,
    pub status: ReferralStatus,
    pub points_awarded: Points,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferralValidation {
    pub valid: bool,
    pub blocked: bool,
    pub risk_score: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registration {
    pub user: User,
    pub welcome_bonus_points: Points,
    pub referral_bonus_points: Points,
    pub referral_id: Option<EntityId>,
    pub blocked: bool,
}

/// Where an open referral goes after a purchase of `amount` at `now`.
pub fn next_referral_status(
    referral: &ReferralTransaction,
    amount: f64,
    min_qualifying_order: f64,
    now: DateTime<Utc>,
) -> Option<ReferralStatus> {
    if !referral.status.is_open() {
        return None;
    }
    if now > referral.expires_at {
        return Some(ReferralStatus::Expired);
    }
    if amount >= min_qualifying_order {
        return Some(ReferralStatus::Completed);
    }
    match referral.status {
        ReferralStatus::Pending => Some(ReferralStatus::Active),
        _ => None,
    }
}

pub struct ReferralSubsystem<'a> {
    store: &'a LoyaltyStore,
    config: &'a LoyaltyConfig,
}

impl<'a> ReferralSubsystem<'a> {
    pub fn new(store: &'a LoyaltyStore, config: &'a LoyaltyConfig) -> Self {
        Self { store, config }
    }

    /// Score the attempt, then check the code. A blocked attempt is never
    /// valid, whether or not the code exists.
    pub fn validate_code(
        &self,
        code: &str,
        actor: &ActorContext,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(ReferralValidation, Vec<LoyaltyEvent>)> {
        let fraud = FraudDetectionSubsystem::new(self.store, &self.config.fraud);
        let (assessment, event) = fraud.evaluate_validation(code.trim(), actor, now)?;
        let exists = self.store.referral_code_exists(code.trim())?;
        Ok((
            ReferralValidation {
                valid: exists && !assessment.blocked,
                blocked: assessment.blocked,
                risk_score: assessment.risk_score,
            },
            vec![event],
        ))
    }

    /// Plain registration with the welcome bonus.
    pub fn register_user(
        &self,
        new_user: &NewUser,
        codes: &mut CodeGenerator,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(Registration, Vec<LoyaltyEvent>)> {
        let user = self.create_user(new_user, codes, now)?;
        let mut events = Vec::new();
        let welcome = self.credit_bonus(&user.user_id, AccrualKind::Welcome, ACTION_WELCOME, now, &mut events)?;
        events.insert(
            0,
            LoyaltyEvent::UserRegistered {
                user_id: user.user_id.clone(),
                referred_by: None,
                bonus_points: welcome,
            },
        );
        log::info!("referral: registered {} ({})", user.user_id, user.email);
        Ok((
            Registration {
                user: self.reload(&user.user_id)?,
                welcome_bonus_points: welcome,
                referral_bonus_points: 0,
                referral_id: None,
                blocked: false,
            },
            events,
        ))
    }

    pub fn register_with_referral(
        &self,
        new_user: &NewUser,
        code: &str,
        actor: &ActorContext,
        codes: &mut CodeGenerator,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(Registration, Vec<LoyaltyEvent>)> {
        validate_new_user(new_user)?;
        let email = new_user.normalized_email();
        if self.store.get_user_by_email(&email)?.is_some() {
            return Err(LoyaltyError::DuplicateIdentity { email });
        }
        let code = code.trim();
        let referrer = self
            .store
            .get_user_by_referral_code(code)?
            .ok_or_else(|| LoyaltyError::InvalidCode { code: code.to_string() })?;

        let fraud = FraudDetectionSubsystem::new(self.store, &self.config.fraud);
        let (assessment, evaluated) =
            fraud.evaluate_usage(&email, None, actor, referrer.region.as_deref(), now)?;

        let user = self.create_user(new_user, codes, now)?;
        let mut events = vec![evaluated];

        let status = if assessment.blocked {
            ReferralStatus::Expired
        } else {
            ReferralStatus::Pending
        };
        let referral = ReferralTransaction {
            referral_id: uuid::Uuid::new_v4().to_string(),
            referrer_id: referrer.user_id.clone(),
            referred_id: user.user_id.clone(),
            code: code.to_string(),
            status,
            points_awarded: 0,
            created_at: now,
            expires_at: now + Duration::days(self.config.referral.expiry_days),
            completed_at: None,
        };
        self.store.insert_referral(&referral)?;

        let (welcome, referred_bonus) = if assessment.blocked {
            log::warn!(
                "referral: registration of {} via {code} blocked (score {})",
                user.user_id,
                assessment.risk_score
            );
            (0, 0)
        } else {
            let welcome = self.credit_bonus(&user.user_id, AccrualKind::Welcome, ACTION_WELCOME, now, &mut events)?;
            let bonus =
                self.credit_bonus(&user.user_id, AccrualKind::Referral, ACTION_REFERRED, now, &mut events)?;
            if bonus > 0
                && !self.store.transition_referral(
                    &referral.referral_id,
                    ReferralStatus::Pending,
                    ReferralStatus::Pending,
                    bonus,
                    None,
                )?
            {
                return Err(anyhow::anyhow!("referral {} left pending during registration", referral.referral_id).into());
            }
            (welcome, bonus)
        };

        events.insert(
            0,
            LoyaltyEvent::UserRegistered {
                user_id: user.user_id.clone(),
                referred_by: Some(referrer.user_id.clone()),
                bonus_points: welcome + referred_bonus,
            },
        );
        events.push(LoyaltyEvent::ReferralStatusChanged {
            referral_id: referral.referral_id.clone(),
            status: status.as_str().to_string(),
            points_awarded: referred_bonus,
        });
        log::info!(
            "referral: {} registered via {} (referrer {}, bonus {referred_bonus})",
            user.user_id,
            code,
            referrer.user_id
        );

        Ok((
            Registration {
                user: self.reload(&user.user_id)?,
                welcome_bonus_points: welcome,
                referral_bonus_points: referred_bonus,
                referral_id: Some(referral.referral_id),
                blocked: assessment.blocked,
            },
            events,
        ))
    }

    /// Advance the buyer's open referral, crediting the referrer on completion.
    pub fn on_purchase(&self, user_id: &str, amount: f64, now: DateTime<Utc>) -> LoyaltyResult<Vec<LoyaltyEvent>> {
        let Some(referral) = self.store.referral_for_referred(user_id)? else {
            return Ok(Vec::new());
        };
        let Some(next) = next_referral_status(&referral, amount, self.config.referral.min_qualifying_order, now) else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        let (points, completed_at) = if next == ReferralStatus::Completed {
            let accrual = AccrualSubsystem::new(self.store, self.config);
            (accrual.action_bonus(ACTION_REFERRER, now)?, Some(now))
        } else {
            (0, None)
        };

        if !self
            .store
            .transition_referral(&referral.referral_id, referral.status, next, points, completed_at)?
        {
            return Ok(Vec::new());
        }
        if next == ReferralStatus::Completed {
            self.credit_bonus(&referral.referrer_id, AccrualKind::Referral, ACTION_REFERRER, now, &mut events)?;
        }

        log::info!(
            "referral: {} {} -> {} (referrer {}, +{points})",
            referral.referral_id,
            referral.status.as_str(),
            next.as_str(),
            referral.referrer_id
        );
        events.push(LoyaltyEvent::ReferralStatusChanged {
            referral_id: referral.referral_id,
            status: next.as_str().to_string(),
            points_awarded: points,
        });
        Ok(events)
    }

    fn create_user(&self, new_user: &NewUser, codes: &mut CodeGenerator, now: DateTime<Utc>) -> LoyaltyResult<User> {
        validate_new_user(new_user)?;
        let email = new_user.normalized_email();
        if self.store.get_user_by_email(&email)?.is_some() {
            return Err(LoyaltyError::DuplicateIdentity { email });
        }
        let user = User {
            user_id: uuid::Uuid::new_v4().to_string(),
            email,
            name: new_user.name.trim().to_string(),
            region: new_user.region.clone(),
            referral_code: self.unique_referral_code(codes)?,
            points_balance: 0,
            total_points_earned: 0,
            loyalty_tier: self.config.starting_tier.clone(),
            total_spent: 0.0,
            total_orders: 0,
            last_purchase_at: None,
            customer_status: CustomerStatus::Active,
            status_override: None,
            created_at: now,
        };
        self.store.insert_user(&user)?;
        Ok(user)
    }

    fn credit_bonus(
        &self,
        user_id: &str,
        kind: AccrualKind,
        action: &str,
        now: DateTime<Utc>,
        events: &mut Vec<LoyaltyEvent>,
    ) -> LoyaltyResult<Points> {
        let request = AccrualRequest {
            user_id: user_id.to_string(),
            order_id: None,
            amount: 0.0,
            line_items: Vec::new(),
            kind,
            action: Some(action.to_string()),
        };
        let (outcome, accrued) = AccrualSubsystem::new(self.store, self.config).accrue(&request, now)?;
        events.extend(accrued);
        Ok(outcome.points_awarded)
    }

    fn unique_referral_code(&self, codes: &mut CodeGenerator) -> LoyaltyResult<String> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = codes.code(&self.config.referral.code_prefix, self.config.code_length);
            if !self.store.referral_code_exists(&code)? {
                return Ok(code);
            }
        }
        Err(anyhow::anyhow!("could not draw a free referral code in {MAX_CODE_ATTEMPTS} attempts").into())
    }

    fn reload(&self, user_id: &str) -> LoyaltyResult<User> {
        self.store
            .get_user(user_id)?
            .ok_or_else(|| LoyaltyError::not_found("user", user_id))
    }
}

fn validate_new_user(new_user: &NewUser) -> LoyaltyResult<()> {
    let email = new_user.normalized_email();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => return Err(LoyaltyError::Validation(format!("invalid email '{}'", new_user.email))),
    }
    if new_user.name.trim().is_empty() {
        return Err(LoyaltyError::Validation("name must not be empty".to_string()));
    }
    Ok(())
}
