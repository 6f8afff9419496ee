use async_trait::async_trait;

use crate::domain::{
    Account, AccountId, Agreement, AuditEntry, CaptureResult, Currency, Error, LedgerInsert,
    Money, Purchase, PurchasePage,
};

/// Order the shop asks the provider to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub amount: Money,
    pub currency: Currency,
    pub custom_id: String,
}

/// Wire-level access to the payment provider. Implementations never persist
/// anything.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_order(&self, request: &OrderRequest) -> Result<String, Error>;

    /// Fails with `Error::AlreadyCaptured` when the order was captured before.
    async fn capture_order(&self, order_id: &str) -> Result<CaptureResult, Error>;

    /// Read-only lookup of an order's capture details.
    async fn get_order(&self, order_id: &str) -> Result<CaptureResult, Error>;

    /// Posts an IPN body back to the provider; true when it answers VERIFIED.
    async fn verify_notification(&self, raw_body: &str) -> Result<bool, Error>;
}

pub trait PurchaseLedger: Send + Sync {
    /// Inserts the purchase and credits its coins to the account as one unit.
    /// An existing row with the same order id wins and nothing is credited.
    fn credit_purchase(&self, purchase: &Purchase) -> Result<LedgerInsert, Error>;

    fn find_purchase(&self, order_id: &str) -> Result<Option<Purchase>, Error>;

    /// Matches either the order id or the provider's capture id.
    fn find_payment(&self, payment_id: &str) -> Result<Option<Purchase>, Error>;

    fn count_by_account(&self, account_id: AccountId) -> Result<u64, Error>;

    /// `page` is 1-based.
    fn list_by_account(
        &self,
        account_id: AccountId,
        page: u32,
        page_size: u32,
    ) -> Result<PurchasePage, Error>;
}

pub trait AgreementLedger: Send + Sync {
    fn record_acceptance(&self, account_id: AccountId) -> Result<Agreement, Error>;

    fn has_accepted(&self, account_id: AccountId) -> Result<bool, Error>;

    fn find_agreement(&self, agreement_id: &str) -> Result<Option<Agreement>, Error>;
}

pub trait AccountDirectory: Send + Sync {
    fn account(&self, account_id: AccountId) -> Result<Option<Account>, Error>;

    fn account_by_name(&self, name: &str) -> Result<Option<Account>, Error>;
}

pub trait AuditSink: Send + Sync {
    fn report(&self, entry: &AuditEntry);
}
