use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::AccountId;

/// One acceptance of the purchase terms. Rows are never updated or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Agreement {
    pub agreement_id: String,
    pub account_id: AccountId,
    pub accepted_at: DateTime<Utc>,
}
