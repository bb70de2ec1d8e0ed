use crate::{
    accrual_subsystem::AccrualRequest,
    engine::LoyaltyEngine,
    error::LoyaltyResult,
    lifecycle_subsystem::CustomerStatus,
    redemption_subsystem::RedemptionStatus,
    referral_subsystem::ActorContext,
    types::{EntityId, Points},
    user::NewUser,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Requests a surrounding process can send to the engine, one JSON object
/// per line. Variants are appended, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum LoyaltyCommand {
    // ── Core operations ───────────────────────────
    Accrue(AccrualRequest),
    Redeem {
        user_id:   EntityId,
        reward_id: EntityId,
    },
    UpdateRedemptionStatus {
        redemption_id: EntityId,
        status:        RedemptionStatus,
    },
    ValidateReferralCode {
        code:  String,
        actor: ActorContext,
    },
    RegisterUser {
        user: NewUser,
    },
    RegisterWithReferral {
        user:  NewUser,
        code:  String,
        actor: ActorContext,
    },
    ClassifyCustomer {
        user_id: EntityId,
    },

    // ── Maintenance ───────────────────────────────
    RefreshCustomerStatuses,
    SettleGroupGoal {
        campaign_id: EntityId,
    },

    // ── Admin ─────────────────────────────────────
    SetTier {
        user_id: EntityId,
        tier:    String,
    },
    SetCustomerStatus {
        user_id: EntityId,
        #[serde(default)]
        status:  Option<CustomerStatus>,
    },
    AdjustBalance {
        user_id: EntityId,
        delta:   Points,
        reason:  String,
    },
    DeactivateReward {
        reward_id: EntityId,
    },
    DeactivateCampaign {
        campaign_id: EntityId,
    },

    // ── Read models ───────────────────────────────
    GetUser {
        user_id: EntityId,
    },
    GetLedger {
        user_id: EntityId,
    },
    ListRewards,
    LifecycleSummary,
}

impl LoyaltyCommand {
    /// Run the command and serialize its result.
    pub fn execute(&self, engine: &LoyaltyEngine) -> LoyaltyResult<Value> {
        let out = match self {
            Self::Accrue(request) => serde_json::to_value(engine.accrue(request)?)?,
            Self::Redeem { user_id, reward_id } => serde_json::to_value(engine.redeem(user_id, reward_id)?)?,
            Self::UpdateRedemptionStatus { redemption_id, status } => {
                serde_json::to_value(engine.update_redemption_status(redemption_id, *status)?)?
            }
            Self::ValidateReferralCode { code, actor } => {
                serde_json::to_value(engine.validate_referral_code(code, actor)?)?
            }
            Self::RegisterUser { user } => serde_json::to_value(engine.register_user(user)?)?,
            Self::RegisterWithReferral { user, code, actor } => {
                serde_json::to_value(engine.register_with_referral(user, code, actor)?)?
            }
            Self::ClassifyCustomer { user_id } => {
                json!({ "user_id": user_id, "status": engine.classify_customer(user_id)? })
            }
            Self::RefreshCustomerStatuses => json!({ "changed": engine.refresh_customer_statuses()? }),
            Self::SettleGroupGoal { campaign_id } => {
                json!({ "campaign_id": campaign_id, "rewarded": engine.settle_group_goal(campaign_id)? })
            }
            Self::SetTier { user_id, tier } => serde_json::to_value(engine.set_tier(user_id, tier)?)?,
            Self::SetCustomerStatus { user_id, status } => {
                serde_json::to_value(engine.set_customer_status(user_id, *status)?)?
            }
            Self::AdjustBalance { user_id, delta, reason } => {
                json!({ "user_id": user_id, "new_balance": engine.adjust_balance(user_id, *delta, reason)? })
            }
            Self::DeactivateReward { reward_id } => {
                engine.deactivate_reward(reward_id)?;
                json!({ "reward_id": reward_id, "is_active": false })
            }
            Self::DeactivateCampaign { campaign_id } => {
                engine.deactivate_campaign(campaign_id)?;
                json!({ "campaign_id": campaign_id, "is_active": false })
            }
            Self::GetUser { user_id } => serde_json::to_value(engine.user(user_id)?)?,
            Self::GetLedger { user_id } => serde_json::to_value(engine.ledger(user_id)?)?,
            Self::ListRewards => serde_json::to_value(engine.rewards()?)?,
            Self::LifecycleSummary => serde_json::to_value(engine.lifecycle_summary()?)?,
        };
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_wire_json() {
        let cmd: LoyaltyCommand = serde_json::from_str(
            r#"{"cmd":"accrue","user_id":"u1","order_id":"o1","amount":42.5,
                "line_items":[{"category_id":"mains","line_amount":42.5}]}"#,
        )
        .unwrap();
        match cmd {
            LoyaltyCommand::Accrue(req) => {
                assert_eq!(req.order_id.as_deref(), Some("o1"));
                assert_eq!(req.line_items.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        let cmd: LoyaltyCommand =
            serde_json::from_str(r#"{"cmd":"update_redemption_status","redemption_id":"r1","status":"approved"}"#)
                .unwrap();
        assert!(matches!(
            cmd,
            LoyaltyCommand::UpdateRedemptionStatus { status: RedemptionStatus::Approved, .. }
        ));

        let cmd: LoyaltyCommand = serde_json::from_str(r#"{"cmd":"set_customer_status","user_id":"u1"}"#).unwrap();
        assert!(matches!(cmd, LoyaltyCommand::SetCustomerStatus { status: None, .. }));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(serde_json::from_str::<LoyaltyCommand>(r#"{"cmd":"tick","count":3}"#).is_err());
    }
}
