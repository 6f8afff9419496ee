//! Journal entries describing how an order attempt ended.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{AccountId, Error, OrderState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSource {
    Checkout,
    Ipn,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub source: AuditSource,
    pub order_id: String,
    pub account_id: Option<AccountId>,
    pub state: OrderState,
    /// "credited", "replayed" or an error code.
    pub outcome: String,
    pub coins: Option<u64>,
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn success(
        source: AuditSource,
        order_id: &str,
        account_id: AccountId,
        outcome: &str,
        coins: u64,
    ) -> Self {
        Self {
            at: Utc::now(),
            source,
            order_id: order_id.to_string(),
            account_id: Some(account_id),
            state: OrderState::Credited,
            outcome: outcome.to_string(),
            coins: Some(coins),
            detail: None,
        }
    }

    pub fn failure(
        source: AuditSource,
        order_id: &str,
        account_id: Option<AccountId>,
        state: OrderState,
        error: &Error,
    ) -> Self {
        Self {
            at: Utc::now(),
            source,
            order_id: order_id.to_string(),
            account_id,
            state,
            outcome: error.code().to_string(),
            coins: None,
            detail: Some(error.to_string()),
        }
    }
}
