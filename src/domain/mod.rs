pub mod account;
pub mod agreement;
pub mod audit;
pub mod error;
pub mod money;
pub mod purchase;
pub mod tier;
pub mod traits;

pub use account::{Account, AccountId};
pub use agreement::Agreement;
pub use audit::{AuditEntry, AuditSource};
pub use error::Error;
pub use money::Money;
pub use purchase::{
    CaptureResult, CaptureStatus, LedgerInsert, OrderState, Purchase, PurchasePage, Reconciliation,
};
pub use tier::{Currency, PriceTier};
pub use traits::{
    AccountDirectory, AgreementLedger, AuditSink, OrderRequest, PaymentProvider, PurchaseLedger,
};
