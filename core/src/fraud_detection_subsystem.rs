//! Referral fraud scorer.
//!
//! Two evaluations, each an additive score capped at `max_score`:
//!   1. referral_code_validation: velocity counters keyed by IP and user agent
//!   2. referral_usage: account age, disposable email, geo mismatch
//!
//! `blocked = score >= block_score`. Every evaluation is written to the
//! fraud log whether blocked or not. The log is audit data only; decisions
//! read the live `referral_attempt` counters.
//!
//! FAIL-OPEN: if the counters cannot be read, validation scores 0 and
//! logs a warning instead of failing the request.

use crate::{
    config::FraudConfig,
    error::LoyaltyResult,
    event::LoyaltyEvent,
    store::{FraudLogRow, LoyaltyStore},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Inputs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FraudAction {
    ReferralCodeValidation,
    ReferralUsage,
}

impl FraudAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReferralCodeValidation => "referral_code_validation",
            Self::ReferralUsage => "referral_usage",
        }
    }
}

/// Who is acting, as reported by the surrounding request layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActorContext {
    pub ip: String,
    pub user_agent: String,
    #[serde(default)]
    pub country: Option<String>,
    /// When the acting identity was first seen. `None` means it is being
    /// created by this request.
    #[serde(default)]
    pub account_created_at: Option<DateTime<Utc>>,
}

/// Live velocity counters. Each count includes the attempt being scored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationSignals {
    pub ip_attempts_last_hour: i64,
    pub ip_attempts_last_minute: i64,
    pub ip_distinct_codes: i64,
    pub user_agent_attempts: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageSignals {
    pub account_age_minutes: i64,
    pub email: String,
    pub actor_country: Option<String>,
    pub referrer_region: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FraudAssessment {
    pub risk_score: u32,
    pub blocked: bool,
    pub indicators: Vec<String>,
}

// ── Counter source ───────────────────────────────────────────────────────────

/// Where validation counters come from. The store is the production source.
pub trait ReferralCounters {
    fn record_attempt(&self, ip: &str, user_agent: &str, code: &str, at: DateTime<Utc>)
        -> LoyaltyResult<()>;

    fn validation_signals(
        &self,
        ip: &str,
        user_agent: &str,
        now: DateTime<Utc>,
        distinct_codes_window_hours: i64,
    ) -> LoyaltyResult<ValidationSignals>;
}

impl ReferralCounters for LoyaltyStore {
    fn record_attempt(&self, ip: &str, user_agent: &str, code: &str, at: DateTime<Utc>) -> LoyaltyResult<()> {
        self.record_referral_attempt(ip, user_agent, code, at)
    }

    fn validation_signals(
        &self,
        ip: &str,
        user_agent: &str,
        now: DateTime<Utc>,
        distinct_codes_window_hours: i64,
    ) -> LoyaltyResult<ValidationSignals> {
        self.referral_validation_signals(ip, user_agent, now, distinct_codes_window_hours)
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────────

fn finish(score: u32, indicators: Vec<String>, config: &FraudConfig) -> FraudAssessment {
    let risk_score = score.min(config.max_score);
    FraudAssessment {
        risk_score,
        blocked: risk_score >= config.block_score,
        indicators,
    }
}

pub fn score_validation(signals: &ValidationSignals, config: &FraudConfig) -> FraudAssessment {
    let mut score = 0u32;
    let mut indicators = Vec::new();

    if signals.ip_attempts_last_hour > config.ip_hourly_threshold {
        score += config.ip_hourly_weight;
        indicators.push(format!("{} attempts from IP in last hour", signals.ip_attempts_last_hour));
    }
    if signals.ip_attempts_last_minute > config.ip_minute_threshold {
        score += config.ip_minute_weight;
        indicators.push(format!("{} attempts from IP in last minute", signals.ip_attempts_last_minute));
    }
    if signals.ip_distinct_codes > config.ip_distinct_codes_threshold {
        score += config.ip_distinct_codes_weight;
        indicators.push(format!("IP tried {} distinct codes", signals.ip_distinct_codes));
    }
    if signals.user_agent_attempts > config.user_agent_threshold {
        score += config.user_agent_weight;
        indicators.push(format!("{} attempts from user agent", signals.user_agent_attempts));
    }

    finish(score, indicators, config)
}

pub fn score_usage(signals: &UsageSignals, config: &FraudConfig) -> FraudAssessment {
    let mut score = 0u32;
    let mut indicators = Vec::new();

    if signals.account_age_minutes < config.new_account_minutes {
        score += config.new_account_weight;
        indicators.push(format!("account {} minutes old", signals.account_age_minutes));
    }
    if is_disposable_email(&signals.email, config) {
        score += config.disposable_email_weight;
        indicators.push("disposable email".to_string());
    }
    if let (Some(actor), Some(home)) = (&signals.actor_country, &signals.referrer_region) {
        if !actor.eq_ignore_ascii_case(home) {
            score += config.geo_mismatch_weight;
            indicators.push(format!("actor in {actor}, referrer registered in {home}"));
        }
    }

    finish(score, indicators, config)
}

/// Known throwaway domain, or a domain carrying one of the marker words.
pub fn is_disposable_email(email: &str, config: &FraudConfig) -> bool {
    let Some((_, domain)) = email.trim().rsplit_once('@') else {
        return false;
    };
    let domain = domain.to_ascii_lowercase();
    if config
        .disposable_domains
        .iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
    {
        return true;
    }
    config.disposable_markers.iter().any(|m| domain.contains(m.as_str()))
}

/// Record the attempt, read the counters and score them. Counter failures
/// fail open with a zero score.
pub fn assess_validation(
    counters: &dyn ReferralCounters,
    code: &str,
    actor: &ActorContext,
    now: DateTime<Utc>,
    config: &FraudConfig,
) -> (ValidationSignals, FraudAssessment) {
    let signals = counters
        .record_attempt(&actor.ip, &actor.user_agent, code, now)
        .and_then(|()| {
            counters.validation_signals(
                &actor.ip,
                &actor.user_agent,
                now,
                config.ip_distinct_codes_window_hours,
            )
        });
    match signals {
        Ok(signals) => {
            let assessment = score_validation(&signals, config);
            (signals, assessment)
        }
        Err(e) => {
            log::warn!("fraud: referral counters unavailable, scoring 0: {e}");
            (
                ValidationSignals::default(),
                FraudAssessment {
                    risk_score: 0,
                    blocked: false,
                    indicators: vec!["counters_unavailable".to_string()],
                },
            )
        }
    }
}

// ── Subsystem ────────────────────────────────────────────────────────────────

pub struct FraudDetectionSubsystem<'a> {
    store: &'a LoyaltyStore,
    config: &'a FraudConfig,
}

impl<'a> FraudDetectionSubsystem<'a> {
    pub fn new(store: &'a LoyaltyStore, config: &'a FraudConfig) -> Self {
        Self { store, config }
    }

    pub fn evaluate_validation(
        &self,
        code: &str,
        actor: &ActorContext,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(FraudAssessment, LoyaltyEvent)> {
        self.evaluate_validation_with(self.store, code, actor, now)
    }

    pub fn evaluate_validation_with(
        &self,
        counters: &dyn ReferralCounters,
        code: &str,
        actor: &ActorContext,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(FraudAssessment, LoyaltyEvent)> {
        let (signals, assessment) = assess_validation(counters, code, actor, now, self.config);
        let raw = serde_json::json!({ "counters": signals, "indicators": assessment.indicators });
        self.log(FraudAction::ReferralCodeValidation, actor, Some(code), None, None, &assessment, raw, now)
    }

    pub fn evaluate_usage(
        &self,
        email: &str,
        user_id: Option<&str>,
        actor: &ActorContext,
        referrer_region: Option<&str>,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(FraudAssessment, LoyaltyEvent)> {
        let account_age_minutes = actor
            .account_created_at
            .map_or(0, |created| (now - created).num_minutes().max(0));
        let signals = UsageSignals {
            account_age_minutes,
            email: email.to_string(),
            actor_country: actor.country.clone(),
            referrer_region: referrer_region.map(str::to_string),
        };
        let assessment = score_usage(&signals, self.config);
        let raw = serde_json::json!({ "signals": signals, "indicators": assessment.indicators });
        self.log(
            FraudAction::ReferralUsage,
            actor,
            None,
            Some(email),
            user_id,
            &assessment,
            raw,
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn log(
        &self,
        action: FraudAction,
        actor: &ActorContext,
        code: Option<&str>,
        email: Option<&str>,
        user_id: Option<&str>,
        assessment: &FraudAssessment,
        raw: serde_json::Value,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(FraudAssessment, LoyaltyEvent)> {
        self.store.insert_fraud_log(&FraudLogRow {
            id: None,
            action_type: action.as_str().to_string(),
            ip: Some(actor.ip.clone()),
            user_agent: Some(actor.user_agent.clone()),
            code: code.map(str::to_string),
            email: email.map(str::to_string),
            country: actor.country.clone(),
            user_id: user_id.map(str::to_string),
            risk_score: assessment.risk_score,
            blocked: assessment.blocked,
            signals_json: serde_json::to_string(&raw)?,
            created_at: now,
        })?;

        if assessment.blocked {
            log::warn!(
                "fraud: {} blocked (score {}): {}",
                action.as_str(),
                assessment.risk_score,
                assessment.indicators.join("; ")
            );
        } else {
            log::debug!("fraud: {} scored {}", action.as_str(), assessment.risk_score);
        }

        Ok((
            assessment.clone(),
            LoyaltyEvent::ReferralEvaluated {
                action_type: action.as_str().to_string(),
                risk_score: assessment.risk_score,
                blocked: assessment.blocked,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoyaltyError;

    struct BrokenCounters;

    impl ReferralCounters for BrokenCounters {
        fn record_attempt(&self, _: &str, _: &str, _: &str, _: DateTime<Utc>) -> LoyaltyResult<()> {
            Err(LoyaltyError::Other(anyhow::anyhow!("disk I/O error")))
        }

        fn validation_signals(
            &self,
            _: &str,
            _: &str,
            _: DateTime<Utc>,
            _: i64,
        ) -> LoyaltyResult<ValidationSignals> {
            Err(LoyaltyError::Other(anyhow::anyhow!("disk I/O error")))
        }
    }

    struct FixedCounters(ValidationSignals);

    impl ReferralCounters for FixedCounters {
        fn record_attempt(&self, _: &str, _: &str, _: &str, _: DateTime<Utc>) -> LoyaltyResult<()> {
            Ok(())
        }

        fn validation_signals(
            &self,
            _: &str,
            _: &str,
            _: DateTime<Utc>,
            _: i64,
        ) -> LoyaltyResult<ValidationSignals> {
            Ok(self.0)
        }
    }

    fn actor() -> ActorContext {
        ActorContext {
            ip: "203.0.113.7".into(),
            user_agent: "curl/8.0".into(),
            country: Some("US".into()),
            account_created_at: None,
        }
    }

    #[test]
    fn minute_burst_alone_is_not_blocked() {
        let cfg = FraudConfig::default();
        let a = score_validation(
            &ValidationSignals { ip_attempts_last_minute: 4, ..Default::default() },
            &cfg,
        );
        assert_eq!(a.risk_score, 50);
        assert!(!a.blocked);
    }

    #[test]
    fn minute_burst_plus_hourly_volume_blocks() {
        let cfg = FraudConfig::default();
        let a = score_validation(
            &ValidationSignals {
                ip_attempts_last_hour: 11,
                ip_attempts_last_minute: 4,
                ..Default::default()
            },
            &cfg,
        );
        assert_eq!(a.risk_score, 80);
        assert!(a.blocked);
    }

    #[test]
    fn thresholds_are_strictly_greater_than() {
        let cfg = FraudConfig::default();
        let a = score_validation(
            &ValidationSignals {
                ip_attempts_last_hour: 10,
                ip_attempts_last_minute: 3,
                ip_distinct_codes: 2,
                user_agent_attempts: 3,
            },
            &cfg,
        );
        assert_eq!(a.risk_score, 0);
    }

    #[test]
    fn score_is_capped() {
        let cfg = FraudConfig::default();
        let a = score_validation(
            &ValidationSignals {
                ip_attempts_last_hour: 50,
                ip_attempts_last_minute: 50,
                ip_distinct_codes: 9,
                user_agent_attempts: 50,
            },
            &cfg,
        );
        assert_eq!(a.risk_score, 100);
        assert!(a.blocked);
        assert_eq!(a.indicators.len(), 4);
    }

    #[test]
    fn usage_signals_add_up() {
        let cfg = FraudConfig::default();
        let a = score_usage(
            &UsageSignals {
                account_age_minutes: 5,
                email: "x@mailinator.com".into(),
                actor_country: Some("RO".into()),
                referrer_region: Some("US".into()),
            },
            &cfg,
        );
        assert_eq!(a.risk_score, 75);
        assert!(a.blocked);

        let clean = score_usage(
            &UsageSignals {
                account_age_minutes: 600,
                email: "ana@example.com".into(),
                actor_country: Some("us".into()),
                referrer_region: Some("US".into()),
            },
            &cfg,
        );
        assert_eq!(clean.risk_score, 0);
    }

    #[test]
    fn unknown_geo_is_not_a_mismatch() {
        let cfg = FraudConfig::default();
        let a = score_usage(
            &UsageSignals {
                account_age_minutes: 600,
                email: "ana@example.com".into(),
                actor_country: None,
                referrer_region: Some("US".into()),
            },
            &cfg,
        );
        assert_eq!(a.risk_score, 0);
    }

    #[test]
    fn disposable_email_heuristic() {
        let cfg = FraudConfig::default();
        assert!(is_disposable_email("a@mailinator.com", &cfg));
        assert!(is_disposable_email("a@eu.mailinator.com", &cfg));
        assert!(is_disposable_email("a@my-throwaway-box.net", &cfg));
        assert!(is_disposable_email("A@YOPMAIL.COM", &cfg));
        assert!(!is_disposable_email("a@gmail.com", &cfg));
        assert!(!is_disposable_email("not-an-email", &cfg));
    }

    #[test]
    fn broken_counters_fail_open() {
        let cfg = FraudConfig::default();
        let (signals, a) = assess_validation(&BrokenCounters, "REF-X", &actor(), Utc::now(), &cfg);
        assert_eq!(signals, ValidationSignals::default());
        assert_eq!(a.risk_score, 0);
        assert!(!a.blocked);
    }

    #[test]
    fn counters_feed_the_score() {
        let cfg = FraudConfig::default();
        let counters = FixedCounters(ValidationSignals {
            ip_attempts_last_minute: 4,
            user_agent_attempts: 4,
            ..Default::default()
        });
        let (_, a) = assess_validation(&counters, "REF-X", &actor(), Utc::now(), &cfg);
        assert_eq!(a.risk_score, 85);
        assert!(a.blocked);
    }
}
