use serde::Serialize;

pub type AccountId = i64;

/// Game account as seen by the shop: only the transferable coin balance is
/// touched by purchases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub coins_transferable: i64, // credited by completed purchases
}

impl Account {
    pub fn new(id: AccountId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            coins_transferable: 0,
        }
    }
}
