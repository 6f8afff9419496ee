//! Shared application state

use std::sync::Arc;

use crate::auth::AuthGate;
use crate::catalog::PriceCatalog;
use crate::config::{AppConfig, PublicPaypalConfig};
use crate::domain::{AuditSink, PaymentProvider};
use crate::history::HistoryViewer;
use crate::provider::OrderCaptureClient;
use crate::reconciler::Reconciler;
use crate::repository::SqliteRepository;

pub type ShopReconciler = Reconciler<dyn PaymentProvider, SqliteRepository>;

/// Everything a handler can reach. Cloned per request, so only `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<ShopReconciler>,
    pub repository: Arc<SqliteRepository>,
    pub history: Arc<HistoryViewer<SqliteRepository>>,
    pub auth: Arc<AuthGate>,
    pub paypal: Arc<PublicPaypalConfig>,
    /// Merchant address IPNs must be addressed to; `None` disables the listener.
    pub ipn_receiver: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        provider: Arc<dyn PaymentProvider>,
        repository: Arc<SqliteRepository>,
        audit: Arc<dyn AuditSink>,
        auth: Arc<AuthGate>,
    ) -> Self {
        let orders = OrderCaptureClient::new(provider, Arc::new(config.catalog.clone()), config.retry);
        let reconciler = Reconciler::new(orders, Arc::clone(&repository), audit);
        let history = HistoryViewer::new(Arc::clone(&repository), config.history.page_size);

        Self {
            reconciler: Arc::new(reconciler),
            repository,
            history: Arc::new(history),
            auth,
            paypal: Arc::new(config.paypal.clone()),
            ipn_receiver: config.receiver_email.as_deref().map(Arc::from),
        }
    }

    pub fn catalog(&self) -> &PriceCatalog {
        self.reconciler.orders().catalog()
    }
}
