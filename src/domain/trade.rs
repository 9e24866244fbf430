use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Buy,
    Sell,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Buy => write!(f, "buy"),
            TransactionType::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw {
            "buy" => Ok(TransactionType::Buy),
            "sell" => Ok(TransactionType::Sell),
            other => Err(format!("invalid transaction type: {}", other)),
        }
    }
}

/// Trade activity lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeState {
    /// Persisted, not yet evaluated
    Submitted,
    /// Passed eligibility, confirmation call in flight
    Pending,
    /// Failed eligibility (stale price or insufficient funds)
    Rejected,
    /// Confirmed by the exchange
    Filled,
    /// Terminated without confirmation (breaker open, call failure, or error)
    Aborted,
}

impl TradeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeState::Rejected | TradeState::Filled | TradeState::Aborted
        )
    }

    /// Legal transitions: submitted -> {pending, rejected, aborted},
    /// pending -> {filled, aborted}. Terminal states never move.
    pub fn can_transition_to(&self, next: TradeState) -> bool {
        match self {
            TradeState::Submitted => matches!(
                next,
                TradeState::Pending | TradeState::Rejected | TradeState::Aborted
            ),
            TradeState::Pending => matches!(next, TradeState::Filled | TradeState::Aborted),
            _ => false,
        }
    }
}

impl std::fmt::Display for TradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeState::Submitted => "submitted",
            TradeState::Pending => "pending",
            TradeState::Rejected => "rejected",
            TradeState::Filled => "filled",
            TradeState::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TradeState {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw {
            "submitted" => Ok(TradeState::Submitted),
            "pending" => Ok(TradeState::Pending),
            "rejected" => Ok(TradeState::Rejected),
            "filled" => Ok(TradeState::Filled),
            "aborted" => Ok(TradeState::Aborted),
            other => Err(format!("invalid trade state: {}", other)),
        }
    }
}

/// Daily quote for a listed symbol. In a full system this row would be fed
/// by the market data stream; here it is a static lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub ticker: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

/// Customer reference used for balance checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
}

/// Trade submission. `request_id` is the trade-level idempotency key and is
/// unique across all activities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRequest {
    pub request_id: String,
    pub customer_id: String,
    pub ticker: String,
    pub transaction_type: TransactionType,
    pub share_count: Decimal,
    pub current_price: Decimal,
}

impl TradeRequest {
    /// Cost of the trade at the submitted price
    pub fn cost(&self) -> Decimal {
        self.current_price * self.share_count
    }
}

/// Persisted trade activity row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub request_id: String,
    pub customer_id: String,
    pub ticker: String,
    pub transaction_type: TransactionType,
    pub status: TradeState,
    pub current_price: Decimal,
    pub share_count: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Activity {
    pub fn from_request(request: &TradeRequest) -> Self {
        let now = Utc::now();
        Self {
            request_id: request.request_id.clone(),
            customer_id: request.customer_id.clone(),
            ticker: request.ticker.clone(),
            transaction_type: request.transaction_type,
            status: TradeState::Submitted,
            current_price: request.current_price,
            share_count: request.share_count,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn terminal_states_do_not_move() {
        for terminal in [TradeState::Rejected, TradeState::Filled, TradeState::Aborted] {
            assert!(terminal.is_terminal());
            for next in [
                TradeState::Submitted,
                TradeState::Pending,
                TradeState::Rejected,
                TradeState::Filled,
                TradeState::Aborted,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn submitted_cannot_jump_straight_to_filled() {
        assert!(!TradeState::Submitted.can_transition_to(TradeState::Filled));
        assert!(TradeState::Submitted.can_transition_to(TradeState::Pending));
        assert!(TradeState::Pending.can_transition_to(TradeState::Filled));
    }

    #[test]
    fn trade_cost_is_price_times_shares() {
        let request = TradeRequest {
            request_id: "r-1".to_string(),
            customer_id: "c-1".to_string(),
            ticker: "AMZN".to_string(),
            transaction_type: TransactionType::Buy,
            share_count: dec!(10),
            current_price: dec!(101.50),
        };
        assert_eq!(request.cost(), dec!(1015.00));
    }
}
