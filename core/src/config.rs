use crate::catalog::{Campaign, LoyaltyReward, PointsRule, TierDefinition};
use crate::types::Points;
use serde::{Deserialize, Serialize};

// ── Engine settings ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoyaltyConfig {
    /// Points per currency unit when no active base rule exists.
    pub default_points_per_unit: f64,
    /// Tier every new user starts in.
    pub starting_tier: String,
    pub welcome_bonus: Points,
    pub referral: ReferralConfig,
    pub fraud: FraudConfig,
    pub lifecycle: LifecycleConfig,
    pub redemption_code_prefix: String,
    pub code_length: usize,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        Self {
            default_points_per_unit: 1.0,
            starting_tier: "bronze".to_string(),
            welcome_bonus: 50,
            referral: ReferralConfig::default(),
            fraud: FraudConfig::default(),
            lifecycle: LifecycleConfig::default(),
            redemption_code_prefix: "RDM".to_string(),
            code_length: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferralConfig {
    /// Credited to the referrer once the referred user's purchase qualifies.
    pub referrer_bonus: Points,
    /// Credited to the referred user at registration.
    pub referred_bonus: Points,
    pub expiry_days: i64,
    pub min_qualifying_order: f64,
    pub code_prefix: String,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            referrer_bonus: 200,
            referred_bonus: 100,
            expiry_days: 30,
            min_qualifying_order: 10.0,
            code_prefix: "REF".to_string(),
        }
    }
}

/// Fraud heuristics. Defaults are the production values; every weight and
/// threshold can be retuned from the fraud log without a code change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FraudConfig {
    pub block_score: u32,
    pub max_score: u32,

    pub ip_hourly_threshold: i64,
    pub ip_hourly_weight: u32,
    pub ip_minute_threshold: i64,
    pub ip_minute_weight: u32,
    pub ip_distinct_codes_threshold: i64,
    pub ip_distinct_codes_weight: u32,
    pub ip_distinct_codes_window_hours: i64,
    pub user_agent_threshold: i64,
    pub user_agent_weight: u32,

    pub new_account_minutes: i64,
    pub new_account_weight: u32,
    pub disposable_email_weight: u32,
    pub geo_mismatch_weight: u32,
    pub disposable_domains: Vec<String>,
    pub disposable_markers: Vec<String>,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            block_score: 70,
            max_score: 100,
            ip_hourly_threshold: 10,
            ip_hourly_weight: 30,
            ip_minute_threshold: 3,
            ip_minute_weight: 50,
            ip_distinct_codes_threshold: 2,
            ip_distinct_codes_weight: 40,
            ip_distinct_codes_window_hours: 24,
            user_agent_threshold: 3,
            user_agent_weight: 35,
            new_account_minutes: 60,
            new_account_weight: 25,
            disposable_email_weight: 30,
            geo_mismatch_weight: 20,
            disposable_domains: [
                "mailinator.com",
                "guerrillamail.com",
                "10minutemail.com",
                "tempmail.com",
                "temp-mail.org",
                "yopmail.com",
                "trashmail.com",
                "sharklasers.com",
                "getnada.com",
                "dispostable.com",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            disposable_markers: ["tempmail", "throwaway", "10minute", "trashmail", "discard"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Fewer days than this since the last purchase: active.
    pub active_days: i64,
    /// At least this many days: dormant. In between: inactive.
    pub dormant_days: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self { active_days: 30, dormant_days: 90 }
    }
}

impl LoyaltyConfig {
    /// Load `<data_dir>/loyalty.json`. Missing keys take their defaults.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/loyalty.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {path}: {e}"))?;
        let config: LoyaltyConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.default_points_per_unit > 0.0,
            "default_points_per_unit must be positive (got {})",
            self.default_points_per_unit
        );
        anyhow::ensure!(
            self.lifecycle.active_days <= self.lifecycle.dormant_days,
            "lifecycle.active_days ({}) must not exceed dormant_days ({})",
            self.lifecycle.active_days,
            self.lifecycle.dormant_days
        );
        anyhow::ensure!(self.code_length >= 4, "code_length must be at least 4");
        Ok(())
    }
}

// ── Rule catalog seed file ─────────────────────────────────────────

/// Contents of `<data_dir>/catalog.json`: the admin-maintained rule catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleCatalog {
    pub tiers: Vec<TierDefinition>,
    pub rules: Vec<PointsRule>,
    pub campaigns: Vec<Campaign>,
    pub rewards: Vec<LoyaltyReward>,
}

impl RuleCatalog {
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/catalog.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {path}: {e}"))?;
        let catalog: RuleCatalog = serde_json::from_str(&content)?;
        Ok(catalog)
    }
}
