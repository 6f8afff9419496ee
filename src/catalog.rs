use std::collections::HashSet;

use serde::Deserialize;

use crate::domain::{Currency, Error, Money, PriceTier};

/// One `[[catalog.tiers]]` entry as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct TierConfig {
    pub price: String,
    pub coins: u64,
    #[serde(default)]
    pub image: String,
}

/// The coin packages on offer, in display order. Built once at startup and
/// never mutated.
#[derive(Debug, Clone)]
pub struct PriceCatalog {
    currency: Currency,
    tiers: Vec<PriceTier>,
}

impl PriceCatalog {
    pub fn from_config(currency: Currency, entries: &[TierConfig]) -> Result<Self, Error> {
        if entries.is_empty() {
            return Err(Error::Config("catalog has no tiers".to_string()));
        }

        let mut seen = HashSet::new();
        let mut tiers = Vec::with_capacity(entries.len());
        for entry in entries {
            let amount = Money::from_decimal_str(&entry.price).ok_or_else(|| {
                Error::Config(format!("tier price {:?} is not a valid amount", entry.price))
            })?;
            if !amount.is_positive() {
                return Err(Error::Config(format!(
                    "tier price {} must be positive",
                    amount
                )));
            }
            if entry.coins == 0 {
                return Err(Error::Config(format!("tier {} grants no coins", amount)));
            }
            if !seen.insert(amount) {
                return Err(Error::Config(format!("tier price {} is listed twice", amount)));
            }
            tiers.push(PriceTier {
                amount,
                currency,
                coins: entry.coins,
                image_ref: entry.image.clone(),
            });
        }

        Ok(Self { currency, tiers })
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn list_tiers(&self) -> &[PriceTier] {
        &self.tiers
    }

    pub fn find_tier(&self, amount: Money) -> Result<&PriceTier, Error> {
        self.tiers
            .iter()
            .find(|t| t.amount == amount)
            .ok_or_else(|| Error::NotFound(format!("tier {}", amount)))
    }

    /// Validates a price string sent by a client. Clients only ever send the
    /// string, so nothing about it is trusted until it matches a tier.
    pub fn find_price(&self, price: &str) -> Result<&PriceTier, Error> {
        let amount =
            Money::from_decimal_str(price).ok_or_else(|| Error::InvalidTier(price.to_string()))?;
        self.find_tier(amount)
            .map_err(|_| Error::InvalidTier(price.to_string()))
    }

    /// Exact match on what the provider actually captured.
    pub fn resolve_capture(&self, amount: Money, currency: Currency) -> Result<&PriceTier, Error> {
        self.tiers
            .iter()
            .find(|t| t.amount == amount && t.currency == currency)
            .ok_or(Error::UnknownTier { amount, currency })
    }

    /// `{ "<price>": coins }` in catalog order.
    pub fn prices(&self) -> serde_json::Map<String, serde_json::Value> {
        self.tiers
            .iter()
            .map(|t| (t.amount.to_string(), serde_json::Value::from(t.coins)))
            .collect()
    }

    /// `{ "<price>": "<image url>" }` for tiers that have an image.
    pub fn images(&self) -> serde_json::Map<String, serde_json::Value> {
        self.tiers
            .iter()
            .filter(|t| !t.image_ref.is_empty())
            .map(|t| {
                (
                    t.amount.to_string(),
                    serde_json::Value::from(t.image_ref.clone()),
                )
            })
            .collect()
    }
}
