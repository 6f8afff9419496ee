//! Boundary to the external payment provider.
//!
//! [`PaymentProvider`] is the raw wire contract; [`OrderCaptureClient`] sits on
//! top of it and adds what every caller needs: server-side tier validation on
//! order creation, one retry with backoff on transient outages, and turning
//! "already captured" into a read-only lookup of the captured order.

pub mod paypal;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::catalog::PriceCatalog;
use crate::domain::{CaptureResult, Error, OrderRequest, PaymentProvider};

pub use paypal::{PaypalClient, PaypalSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

pub struct OrderCaptureClient<P: PaymentProvider + ?Sized> {
    provider: Arc<P>,
    catalog: Arc<PriceCatalog>,
    retry: RetryPolicy,
}

impl<P: PaymentProvider + ?Sized> OrderCaptureClient<P> {
    pub fn new(provider: Arc<P>, catalog: Arc<PriceCatalog>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            catalog,
            retry,
        }
    }

    pub fn catalog(&self) -> &PriceCatalog {
        &self.catalog
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_retryable() && attempt < self.retry.attempts => {
                    warn!(op, attempt, error = %e, "provider unavailable, retrying");
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Creates a pending order for a catalog price. The price string comes
    /// from the client and is checked against the catalog first.
    pub async fn create_order(&self, price: &str, account_label: &str) -> Result<String, Error> {
        let tier = self.catalog.find_price(price)?;
        let request = OrderRequest {
            amount: tier.amount,
            currency: tier.currency,
            custom_id: account_label.to_string(),
        };
        let order_id = self
            .with_retry("create_order", || self.provider.create_order(&request))
            .await?;
        debug!(order_id = %order_id, amount = %tier.amount, "order created");
        Ok(order_id)
    }

    /// Captures the order, or looks it up if an earlier attempt already did.
    pub async fn capture_order(&self, order_id: &str) -> Result<CaptureResult, Error> {
        match self
            .with_retry("capture_order", || self.provider.capture_order(order_id))
            .await
        {
            Err(Error::AlreadyCaptured(_)) => {
                debug!(order_id, "order already captured, looking it up");
                self.with_retry("get_order", || self.provider.get_order(order_id))
                    .await
            }
            other => other,
        }
    }

    pub async fn verify_notification(&self, raw_body: &str) -> Result<bool, Error> {
        self.with_retry("verify_notification", || {
            self.provider.verify_notification(raw_body)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TierConfig;
    use crate::domain::{CaptureStatus, Currency, Money};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays scripted capture answers and counts calls.
    #[derive(Default)]
    struct Scripted {
        captures: Mutex<Vec<Result<CaptureResult, Error>>>,
        calls: Mutex<Vec<&'static str>>,
    }

    fn completed(order_id: &str) -> CaptureResult {
        CaptureResult {
            order_id: order_id.to_string(),
            capture_id: Some(format!("CAP-{}", order_id)),
            payer_email: Some("payer@example.com".into()),
            captured_amount: Money::from_decimal_str("5.00").unwrap(),
            captured_currency: Currency::new("EUR").unwrap(),
            status: CaptureStatus::Completed,
        }
    }

    #[async_trait]
    impl PaymentProvider for Scripted {
        async fn create_order(&self, request: &OrderRequest) -> Result<String, Error> {
            self.calls.lock().unwrap().push("create");
            Ok(format!("ORDER-{}", request.amount))
        }

        async fn capture_order(&self, _order_id: &str) -> Result<CaptureResult, Error> {
            self.calls.lock().unwrap().push("capture");
            self.captures.lock().unwrap().remove(0)
        }

        async fn get_order(&self, order_id: &str) -> Result<CaptureResult, Error> {
            self.calls.lock().unwrap().push("get");
            Ok(completed(order_id))
        }

        async fn verify_notification(&self, _raw_body: &str) -> Result<bool, Error> {
            Ok(true)
        }
    }

    fn client(provider: Arc<Scripted>) -> OrderCaptureClient<Scripted> {
        let catalog = PriceCatalog::from_config(
            Currency::new("EUR").unwrap(),
            &[TierConfig {
                price: "5.00".into(),
                coins: 500,
                image: String::new(),
            }],
        )
        .unwrap();
        OrderCaptureClient::new(
            provider,
            Arc::new(catalog),
            RetryPolicy {
                attempts: 2,
                backoff: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn retries_once_on_outage() {
        let provider = Arc::new(Scripted::default());
        provider.captures.lock().unwrap().extend([
            Err(Error::ProviderUnavailable("503".into())),
            Ok(completed("O-1")),
        ]);

        let result = client(provider.clone()).capture_order("O-1").await.unwrap();
        assert_eq!(result.status, CaptureStatus::Completed);
        assert_eq!(*provider.calls.lock().unwrap(), vec!["capture", "capture"]);
    }

    #[tokio::test]
    async fn gives_up_after_second_outage() {
        let provider = Arc::new(Scripted::default());
        provider.captures.lock().unwrap().extend([
            Err(Error::ProviderUnavailable("503".into())),
            Err(Error::ProviderUnavailable("503".into())),
            Ok(completed("O-1")),
        ]);

        let result = client(provider.clone()).capture_order("O-1").await;
        assert!(matches!(result, Err(Error::ProviderUnavailable(_))));
        assert_eq!(provider.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn denied_capture_is_not_retried() {
        let provider = Arc::new(Scripted::default());
        provider.captures.lock().unwrap().push(Err(Error::CaptureDenied {
            order_id: "O-1".into(),
            reason: "INSTRUMENT_DECLINED".into(),
        }));

        let result = client(provider.clone()).capture_order("O-1").await;
        assert!(matches!(result, Err(Error::CaptureDenied { .. })));
        assert_eq!(provider.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn already_captured_falls_back_to_lookup() {
        let provider = Arc::new(Scripted::default());
        provider
            .captures
            .lock()
            .unwrap()
            .push(Err(Error::AlreadyCaptured("O-1".into())));

        let result = client(provider.clone()).capture_order("O-1").await.unwrap();
        assert_eq!(result.order_id, "O-1");
        assert_eq!(*provider.calls.lock().unwrap(), vec!["capture", "get"]);
    }

    #[tokio::test]
    async fn create_order_revalidates_price() {
        let provider = Arc::new(Scripted::default());
        let client = client(provider.clone());

        assert_eq!(client.create_order("5", "knight").await.unwrap(), "ORDER-5.00");
        assert!(matches!(
            client.create_order("0.01", "knight").await,
            Err(Error::InvalidTier(_))
        ));
        assert_eq!(*provider.calls.lock().unwrap(), vec!["create"]);
    }
}
