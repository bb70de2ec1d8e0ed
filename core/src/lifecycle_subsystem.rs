//! Customer lifecycle classifier. Active, inactive or dormant by recency.
//!
//! Read model only. The derived status is persisted by the bulk refresh
//! for reporting, but classification never depends on that column.
//! An admin override wins until the member's next purchase clears it.

use crate::{
    config::LifecycleConfig,
    error::{LoyaltyError, LoyaltyResult},
    event::LoyaltyEvent,
    store::LoyaltyStore,
    user::User,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    Active,
    Inactive,
    Dormant,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Dormant => "dormant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "dormant" => Some(Self::Dormant),
            _ => None,
        }
    }
}

/// Classify by whole days elapsed since `last_activity`.
pub fn classify_recency(
    last_activity: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &LifecycleConfig,
) -> CustomerStatus {
    let days = (now - last_activity).num_days().max(0);
    if days < config.active_days {
        CustomerStatus::Active
    } else if days < config.dormant_days {
        CustomerStatus::Inactive
    } else {
        CustomerStatus::Dormant
    }
}

/// Override if set, otherwise recency since the last purchase. Members who
/// never purchased are measured from their registration.
pub fn effective_status(user: &User, now: DateTime<Utc>, config: &LifecycleConfig) -> CustomerStatus {
    if let Some(status) = user.status_override {
        return status;
    }
    let anchor = user.last_purchase_at.unwrap_or(user.created_at);
    classify_recency(anchor, now, config)
}

pub struct LifecycleSubsystem<'a> {
    store: &'a LoyaltyStore,
    config: &'a LifecycleConfig,
}

impl<'a> LifecycleSubsystem<'a> {
    pub fn new(store: &'a LoyaltyStore, config: &'a LifecycleConfig) -> Self {
        Self { store, config }
    }

    pub fn classify(&self, user_id: &str, now: DateTime<Utc>) -> LoyaltyResult<CustomerStatus> {
        let user = self
            .store
            .get_user(user_id)?
            .ok_or_else(|| LoyaltyError::not_found("user", user_id))?;
        Ok(effective_status(&user, now, self.config))
    }

    /// Persist the derived status of every member whose stored status is
    /// stale. Overridden members are left alone.
    pub fn refresh(&self, now: DateTime<Utc>) -> LoyaltyResult<Vec<LoyaltyEvent>> {
        let mut out = Vec::new();
        for user in self.store.all_users()? {
            if user.status_override.is_some() {
                continue;
            }
            let derived = effective_status(&user, now, self.config);
            if derived == user.customer_status {
                continue;
            }
            self.store.set_customer_status(&user.user_id, derived)?;
            out.push(LoyaltyEvent::CustomerStatusChanged {
                user_id: user.user_id.clone(),
                old_status: user.customer_status.as_str().to_string(),
                new_status: derived.as_str().to_string(),
            });
        }
        log::info!("lifecycle: refreshed {} customer statuses", out.len());
        Ok(out)
    }
}
