use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::catalog::PriceCatalog;
use crate::domain::{
    AccountDirectory, AccountId, AgreementLedger, AuditEntry, AuditSink, AuditSource,
    CaptureStatus, Currency, Error, LedgerInsert, Money, OrderState, PaymentProvider, Purchase,
    PurchaseLedger, Reconciliation,
};
use crate::provider::OrderCaptureClient;

const UNKNOWN_PAYER: &str = "unknown@paypal.com";
const MAX_ORDER_ID_LEN: usize = 64;

/// What the browser reports after its client-side capture step. Nothing in
/// here decides how many coins get credited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub order_id: String,
    pub account_id: AccountId,
    pub payer_email: Option<String>,
    pub agreement_id: Option<String>,
}

/// Fields of a legacy Instant Payment Notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IpnNotification {
    pub txn_id: Option<String>,
    pub payment_status: Option<String>,
    pub receiver_email: Option<String>,
    pub custom: Option<String>,
    pub mc_gross: Option<String>,
    pub mc_currency: Option<String>,
    pub payer_email: Option<String>,
}

fn advance(state: &mut OrderState, next: OrderState, order_id: &str) {
    debug_assert!(
        state.can_advance_to(next),
        "illegal order transition {:?} -> {:?}",
        state,
        next
    );
    debug!(order_id, from = ?state, to = ?next, "order state");
    *state = next;
}

fn validate_order_id(order_id: &str) -> Result<(), Error> {
    let ok = !order_id.is_empty()
        && order_id.len() <= MAX_ORDER_ID_LEN
        && order_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!("bad order id {:?}", order_id)))
    }
}

/// A recorded order only replays for the account it was credited to.
fn replay_for(existing: &Purchase, account_id: AccountId) -> Result<Reconciliation, Error> {
    if existing.account_id != account_id {
        warn!(
            order_id = %existing.order_id,
            recorded_for = existing.account_id,
            requested_by = account_id,
            "order replayed by a different account"
        );
        return Err(Error::OrderOwnedElsewhere {
            order_id: existing.order_id.clone(),
        });
    }
    Ok(Reconciliation::Replayed {
        coins: existing.coins,
    })
}

/// Turns provider-confirmed payments into credited coins, exactly once per
/// order id.
pub struct Reconciler<P, L>
where
    P: PaymentProvider + ?Sized,
    L: PurchaseLedger + AgreementLedger + AccountDirectory,
{
    orders: OrderCaptureClient<P>,
    ledger: Arc<L>,
    audit: Arc<dyn AuditSink>,
}

impl<P, L> Reconciler<P, L>
where
    P: PaymentProvider + ?Sized,
    L: PurchaseLedger + AgreementLedger + AccountDirectory,
{
    pub fn new(orders: OrderCaptureClient<P>, ledger: Arc<L>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            orders,
            ledger,
            audit,
        }
    }

    pub fn orders(&self) -> &OrderCaptureClient<P> {
        &self.orders
    }

    fn catalog(&self) -> &PriceCatalog {
        self.orders.catalog()
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<Reconciliation, Error> {
        let mut state = OrderState::Created;
        let result = self.reconcile(request, &mut state).await;

        match &result {
            Ok(outcome) => self.audit.report(&AuditEntry::success(
                AuditSource::Checkout,
                &request.order_id,
                request.account_id,
                outcome_label(outcome),
                outcome.coins(),
            )),
            Err(e) => {
                warn!(order_id = %request.order_id, state = ?state, error = %e, "reconciliation failed");
                self.audit.report(&AuditEntry::failure(
                    AuditSource::Checkout,
                    &request.order_id,
                    Some(request.account_id),
                    state,
                    e,
                ));
            }
        }
        result
    }

    async fn reconcile(
        &self,
        request: &CompletionRequest,
        state: &mut OrderState,
    ) -> Result<Reconciliation, Error> {
        validate_order_id(&request.order_id)?;
        // nothing is captured for an account that cannot receive the coins
        if self.ledger.account(request.account_id)?.is_none() {
            return Err(Error::NotFound(format!("account {}", request.account_id)));
        }

        if let Some(existing) = self.ledger.find_purchase(&request.order_id)? {
            let outcome = replay_for(&existing, request.account_id)?;
            *state = OrderState::Credited;
            return Ok(outcome);
        }

        self.check_agreement(request)?;

        let capture = match self.orders.capture_order(&request.order_id).await {
            Ok(capture) => capture,
            Err(e @ Error::CaptureDenied { .. }) => {
                advance(state, OrderState::Rejected, &request.order_id);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        advance(state, OrderState::Captured, &request.order_id);

        if capture.order_id != request.order_id {
            return Err(Error::ProviderProtocol(format!(
                "asked for order {} but provider answered for {}",
                request.order_id, capture.order_id
            )));
        }
        if capture.status != CaptureStatus::Completed {
            advance(state, OrderState::Rejected, &request.order_id);
            return Err(Error::PaymentNotCompleted {
                order_id: request.order_id.clone(),
                status: capture.status.to_string(),
            });
        }

        let tier = match self
            .catalog()
            .resolve_capture(capture.captured_amount, capture.captured_currency)
        {
            Ok(tier) => tier,
            Err(e) => {
                error!(
                    order_id = %request.order_id,
                    amount = %capture.captured_amount,
                    currency = %capture.captured_currency,
                    "captured amount matches no tier, needs investigation"
                );
                advance(state, OrderState::Unresolvable, &request.order_id);
                return Err(e);
            }
        };
        advance(state, OrderState::Verified, &request.order_id);

        let payer_email = capture
            .payer_email
            .or_else(|| request.payer_email.clone())
            .unwrap_or_else(|| UNKNOWN_PAYER.to_string());
        let purchase = Purchase {
            order_id: request.order_id.clone(),
            capture_id: capture.capture_id,
            account_id: request.account_id,
            amount: tier.amount,
            currency: tier.currency,
            coins: tier.coins,
            payer_email,
            created_at: Utc::now(),
        };

        let outcome = self.record(&purchase, AuditSource::Checkout)?;
        advance(state, OrderState::Credited, &request.order_id);
        Ok(outcome)
    }

    /// The agreement gate is a convenience for the checkout page. A missing
    /// or foreign agreement is logged but never blocks a payment that the
    /// provider already took.
    fn check_agreement(&self, request: &CompletionRequest) -> Result<(), Error> {
        if !self.ledger.has_accepted(request.account_id)? {
            warn!(
                account_id = request.account_id,
                order_id = %request.order_id,
                "completing checkout without a recorded agreement"
            );
        }
        if let Some(agreement_id) = &request.agreement_id {
            match self.ledger.find_agreement(agreement_id)? {
                Some(a) if a.account_id == request.account_id => {}
                _ => warn!(
                    account_id = request.account_id,
                    agreement_id = %agreement_id,
                    "client sent an agreement id that is not on record for this account"
                ),
            }
        }
        Ok(())
    }

    fn record(&self, purchase: &Purchase, source: AuditSource) -> Result<Reconciliation, Error> {
        match self.ledger.credit_purchase(purchase)? {
            LedgerInsert::Inserted => {
                info!(
                    order_id = %purchase.order_id,
                    account_id = purchase.account_id,
                    coins = purchase.coins,
                    "coins credited"
                );
                Ok(Reconciliation::Credited {
                    coins: purchase.coins,
                })
            }
            LedgerInsert::Existing(existing) => {
                debug!(order_id = %existing.order_id, "payment already recorded");
                match source {
                    AuditSource::Checkout => replay_for(&existing, purchase.account_id),
                    // PayPal only needs an acknowledgement
                    AuditSource::Ipn => {
                        if existing.account_id != purchase.account_id {
                            warn!(
                                order_id = %existing.order_id,
                                recorded_for = existing.account_id,
                                notified_for = purchase.account_id,
                                "notification names a different account than the ledger"
                            );
                        }
                        Ok(Reconciliation::Replayed {
                            coins: existing.coins,
                        })
                    }
                }
            }
        }
    }

    /// Handles a legacy IPN. `expected_receiver` is the merchant address the
    /// payment must have been sent to.
    pub async fn complete_notification(
        &self,
        raw_body: &str,
        ipn: &IpnNotification,
        expected_receiver: &str,
    ) -> Result<Reconciliation, Error> {
        let order_id = ipn.txn_id.clone().unwrap_or_default();
        let mut state = OrderState::Created;
        let mut account_id = None;
        let result = self
            .reconcile_notification(raw_body, ipn, expected_receiver, &mut state, &mut account_id)
            .await;

        match (&result, account_id) {
            (Ok(outcome), Some(account_id)) => self.audit.report(&AuditEntry::success(
                AuditSource::Ipn,
                &order_id,
                account_id,
                outcome_label(outcome),
                outcome.coins(),
            )),
            (Ok(_), None) => {}
            (Err(e), _) => {
                warn!(order_id = %order_id, error = %e, "IPN rejected");
                self.audit.report(&AuditEntry::failure(
                    AuditSource::Ipn,
                    &order_id,
                    account_id,
                    state,
                    e,
                ));
            }
        }
        result
    }

    async fn reconcile_notification(
        &self,
        raw_body: &str,
        ipn: &IpnNotification,
        expected_receiver: &str,
        state: &mut OrderState,
        account_id: &mut Option<AccountId>,
    ) -> Result<Reconciliation, Error> {
        if !self.orders.verify_notification(raw_body).await? {
            return Err(Error::InvalidRequest(
                "notification not verified by provider".to_string(),
            ));
        }

        let (Some(txn_id), Some(receiver), Some(account_name)) =
            (&ipn.txn_id, &ipn.receiver_email, &ipn.custom)
        else {
            return Err(Error::InvalidRequest(
                "txn_id, receiver_email and custom are required".to_string(),
            ));
        };
        validate_order_id(txn_id)?;
        advance(state, OrderState::Captured, txn_id);

        if !receiver.trim().eq_ignore_ascii_case(expected_receiver.trim()) {
            advance(state, OrderState::Rejected, txn_id);
            return Err(Error::Unauthorized);
        }
        let status = CaptureStatus::parse(ipn.payment_status.as_deref().unwrap_or_default());
        if status != CaptureStatus::Completed {
            advance(state, OrderState::Rejected, txn_id);
            return Err(Error::PaymentNotCompleted {
                order_id: txn_id.clone(),
                status: status.to_string(),
            });
        }

        // txn_id is the capture id, so checkout may have credited it already
        if let Some(existing) = self.ledger.find_payment(txn_id)? {
            debug!(txn_id = %txn_id, order_id = %existing.order_id, "payment already credited");
            *account_id = Some(existing.account_id);
            *state = OrderState::Credited;
            return Ok(Reconciliation::Replayed {
                coins: existing.coins,
            });
        }

        let gross = ipn.mc_gross.as_deref().unwrap_or_default();
        let amount = Money::from_decimal_str(gross)
            .ok_or_else(|| Error::InvalidRequest(format!("bad mc_gross {:?}", gross)))?;
        let currency = match ipn.mc_currency.as_deref() {
            Some(code) => Currency::new(code)
                .ok_or_else(|| Error::InvalidRequest(format!("bad mc_currency {:?}", code)))?,
            None => self.catalog().currency(),
        };
        let tier = match self.catalog().resolve_capture(amount, currency) {
            Ok(tier) => tier,
            Err(e) => {
                error!(order_id = %txn_id, amount = %amount, currency = %currency, "IPN amount matches no tier");
                advance(state, OrderState::Unresolvable, txn_id);
                return Err(e);
            }
        };

        let account = self
            .ledger
            .account_by_name(account_name)?
            .ok_or_else(|| Error::NotFound(format!("account {:?}", account_name)))?;
        *account_id = Some(account.id);
        advance(state, OrderState::Verified, txn_id);

        let purchase = Purchase {
            order_id: txn_id.clone(),
            capture_id: Some(txn_id.clone()),
            account_id: account.id,
            amount: tier.amount,
            currency: tier.currency,
            coins: tier.coins,
            payer_email: ipn
                .payer_email
                .clone()
                .unwrap_or_else(|| UNKNOWN_PAYER.to_string()),
            created_at: Utc::now(),
        };
        let outcome = self.record(&purchase, AuditSource::Ipn)?;
        advance(state, OrderState::Credited, txn_id);
        Ok(outcome)
    }
}

fn outcome_label(outcome: &Reconciliation) -> &'static str {
    match outcome {
        Reconciliation::Credited { .. } => "credited",
        Reconciliation::Replayed { .. } => "replayed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_ids_are_restricted() {
        assert!(validate_order_id("5O190127TN364715T").is_ok());
        assert!(validate_order_id("web_checkout-1").is_ok());
        assert!(validate_order_id("").is_err());
        assert!(validate_order_id("../etc").is_err());
        assert!(validate_order_id(&"A".repeat(65)).is_err());
    }
}
