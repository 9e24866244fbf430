use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payout beneficiary attached to a brokerage account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub name: String,
    pub percent: u8,
}

/// Investor suitability profile captured at onboarding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suitability {
    pub liquidity: String,
    pub time_horizon: String,
    pub risk_tolerance: String,
}

/// Standing account instructions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructions {
    pub dividends: String,
}

/// Inbound account-open request payload, as delivered in the message envelope.
///
/// `request_token` is the caller-supplied idempotency key; `user_id` plus
/// `request_token` identify one logical request across retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEvent {
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub account_type: String,
    #[serde(default)]
    pub comment: String,
    pub beneficiaries: Vec<Beneficiary>,
    pub suitability: Suitability,
    pub instructions: Instructions,
    pub request_token: String,
    pub user_id: String,
}

/// A created brokerage account. Written once by the active region, never
/// mutated or deleted by this core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub account_type: String,
    pub comment: String,
    pub beneficiaries: Vec<Beneficiary>,
    pub suitability: Suitability,
    pub instructions: Instructions,
    pub request_token: String,
    pub user_id: String,
    pub account_id: String,
}

impl Account {
    /// Materialize an account from an inbound event with a fresh account id.
    pub fn from_event(event: AccountEvent) -> Self {
        Self {
            customer_first_name: event.customer_first_name,
            customer_last_name: event.customer_last_name,
            account_type: event.account_type,
            comment: event.comment,
            beneficiaries: event.beneficiaries,
            suitability: event.suitability,
            instructions: event.instructions,
            request_token: event.request_token,
            user_id: event.user_id,
            account_id: Uuid::new_v4().to_string(),
        }
    }
}
