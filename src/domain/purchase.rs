use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{AccountId, Currency, Money};

/// Provider-side order status after a capture or lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Completed,
    Pending,
    Declined,
    Other(String),
}

impl CaptureStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "COMPLETED" => CaptureStatus::Completed,
            "PENDING" | "APPROVED" | "CREATED" | "SAVED" | "PAYER_ACTION_REQUIRED" => {
                CaptureStatus::Pending
            }
            "DECLINED" | "FAILED" | "VOIDED" => CaptureStatus::Declined,
            other => CaptureStatus::Other(other.to_string()),
        }
    }
}

impl core::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CaptureStatus::Completed => f.write_str("COMPLETED"),
            CaptureStatus::Pending => f.write_str("PENDING"),
            CaptureStatus::Declined => f.write_str("DECLINED"),
            CaptureStatus::Other(s) => f.write_str(s),
        }
    }
}

/// What the provider reports for a captured order. This is the only source
/// of the amount that gets credited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    pub order_id: String,
    /// PayPal's id for the capture itself; IPNs call it `txn_id`.
    pub capture_id: Option<String>,
    pub payer_email: Option<String>,
    pub captured_amount: Money,
    pub captured_currency: Currency,
    pub status: CaptureStatus,
}

/// A completed purchase as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub order_id: String,
    pub capture_id: Option<String>,
    pub account_id: AccountId,
    pub amount: Money,
    pub currency: Currency,
    pub coins: u64,
    pub payer_email: String,
    pub created_at: DateTime<Utc>,
}

impl core::fmt::Display for Purchase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "order={},account={},amount={} {},coins={}",
            self.order_id, self.account_id, self.amount, self.currency, self.coins
        )
    }
}

/// Result of the ledger's atomic insert-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerInsert {
    Inserted,
    Existing(Purchase),
}

/// One page of an account's purchases, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchasePage {
    pub rows: Vec<Purchase>,
    pub total_count: u64,
}

/// Successful reconciliation. A replay credits nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Credited { coins: u64 },
    Replayed { coins: u64 },
}

impl Reconciliation {
    pub fn coins(&self) -> u64 {
        match self {
            Reconciliation::Credited { coins } | Reconciliation::Replayed { coins } => *coins,
        }
    }
}

/// Lifecycle of a single order on our side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Created,
    Captured,
    Verified,
    Credited,
    Rejected,
    Unresolvable,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Credited | OrderState::Rejected | OrderState::Unresolvable
        )
    }

    pub fn can_advance_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (Created, Captured)
                | (Created, Rejected)
                | (Captured, Verified)
                | (Captured, Rejected)
                | (Captured, Unresolvable)
                | (Verified, Credited)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_statuses_map() {
        assert_eq!(CaptureStatus::parse("completed"), CaptureStatus::Completed);
        assert_eq!(CaptureStatus::parse("APPROVED"), CaptureStatus::Pending);
        assert_eq!(CaptureStatus::parse("DECLINED"), CaptureStatus::Declined);
        assert_eq!(
            CaptureStatus::parse("REFUNDED"),
            CaptureStatus::Other("REFUNDED".into())
        );
    }

    #[test]
    fn terminal_states_do_not_advance() {
        for terminal in [
            OrderState::Credited,
            OrderState::Rejected,
            OrderState::Unresolvable,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_advance_to(OrderState::Captured));
            assert!(!terminal.can_advance_to(OrderState::Credited));
        }
    }

    #[test]
    fn happy_path_is_linear() {
        assert!(OrderState::Created.can_advance_to(OrderState::Captured));
        assert!(OrderState::Captured.can_advance_to(OrderState::Verified));
        assert!(OrderState::Verified.can_advance_to(OrderState::Credited));
        assert!(!OrderState::Created.can_advance_to(OrderState::Credited));
        assert!(!OrderState::Captured.can_advance_to(OrderState::Credited));
    }
}
