#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use coin_shop::api::AppState;
use coin_shop::auth::AuthGate;
use coin_shop::config::AppConfig;
use coin_shop::domain::{
    Account, AuditEntry, AuditSink, CaptureResult, CaptureStatus, Currency, Error, Money, OrderRequest,
    PaymentProvider,
};
use coin_shop::repository::SqliteRepository;
use secrecy::SecretString;

pub const SHARED_SECRET: &str = "panel-shared-secret";
pub const RECEIVER: &str = "shop@example.com";

pub const CONFIG: &str = r#"
[auth]
shared_secret = "panel-shared-secret"

[paypal]
client_id = "sandbox-client"
client_secret = "sandbox-secret"
currency = "EUR"
receiver_email = "shop@example.com"
retry_backoff_ms = 1

[[catalog.tiers]]
price = "5.00"
coins = 500
image = "/images/coins_500.png"

[[catalog.tiers]]
price = "10.00"
coins = 1100
image = "/images/coins_1100.png"
"#;

/// In-process stand-in for PayPal. Orders are registered up front; the
/// first capture of an order returns its result, later ones fail the way
/// PayPal does and have to go through the lookup.
#[derive(Default)]
pub struct ScriptedProvider {
    orders: Mutex<HashMap<String, CaptureResult>>,
    captured: Mutex<HashSet<String>>,
    pub created: Mutex<Vec<OrderRequest>>,
    pub capture_calls: AtomicUsize,
    pub reject_notifications: AtomicBool,
}

impl ScriptedProvider {
    pub fn register(&self, capture: CaptureResult) {
        self.orders
            .lock()
            .unwrap()
            .insert(capture.order_id.clone(), capture);
    }

    pub fn captures(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    async fn create_order(&self, request: &OrderRequest) -> Result<String, Error> {
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        Ok(format!("SCRIPTED-{}", created.len()))
    }

    async fn capture_order(&self, order_id: &str) -> Result<CaptureResult, Error> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        let capture = self
            .orders
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("order {}", order_id)))?;
        if capture.status == CaptureStatus::Declined {
            return Err(Error::CaptureDenied {
                order_id: order_id.to_string(),
                reason: "INSTRUMENT_DECLINED".to_string(),
            });
        }
        if !self.captured.lock().unwrap().insert(order_id.to_string()) {
            return Err(Error::AlreadyCaptured(order_id.to_string()));
        }
        Ok(capture)
    }

    async fn get_order(&self, order_id: &str) -> Result<CaptureResult, Error> {
        self.orders
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("order {}", order_id)))
    }

    async fn verify_notification(&self, _raw_body: &str) -> Result<bool, Error> {
        Ok(!self.reject_notifications.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    pub entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
    pub fn last(&self) -> Option<AuditEntry> {
        self.entries.lock().unwrap().last().cloned()
    }
}

impl AuditSink for RecordingAudit {
    fn report(&self, entry: &AuditEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

pub fn eur() -> Currency {
    Currency::new("EUR").unwrap()
}

pub fn capture(order_id: &str, amount: &str, status: CaptureStatus) -> CaptureResult {
    CaptureResult {
        order_id: order_id.to_string(),
        capture_id: Some(format!("CAP-{}", order_id)),
        payer_email: Some("payer@example.com".to_string()),
        captured_amount: Money::from_decimal_str(amount).unwrap(),
        captured_currency: eur(),
        status,
    }
}

pub fn token() -> String {
    AuthGate::token_for(&SecretString::from(SHARED_SECRET.to_string()))
}

pub struct Shop {
    pub state: AppState,
    pub provider: Arc<ScriptedProvider>,
    pub repository: Arc<SqliteRepository>,
    pub audit: Arc<RecordingAudit>,
    pub alice: Account,
}

pub fn shop() -> Shop {
    shop_with(CONFIG)
}

pub fn shop_with(config: &str) -> Shop {
    let config = AppConfig::from_toml(config, |_| None).unwrap();
    let provider = Arc::new(ScriptedProvider::default());
    let repository = Arc::new(SqliteRepository::open_in_memory().unwrap());
    let audit = Arc::new(RecordingAudit::default());
    let auth = Arc::new(AuthGate::new(&config.shared_secret));
    let alice = repository.create_account("alice").unwrap();

    let state = AppState::new(
        &config,
        provider.clone(),
        repository.clone(),
        audit.clone(),
        auth,
    );

    Shop {
        state,
        provider,
        repository,
        audit,
        alice,
    }
}
