use crate::domain::{Currency, Money};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error("Storage failed with: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Configuration invalid: {0}")]
    Config(String),

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Payment provider returned an unexpected response: {0}")]
    ProviderProtocol(String),

    #[error("Capture denied for order {order_id}: {reason}")]
    CaptureDenied { order_id: String, reason: String },

    #[error("Order {0} was already captured")]
    AlreadyCaptured(String),

    #[error("Order {order_id} was credited to another account")]
    OrderOwnedElsewhere { order_id: String },

    #[error("Order {order_id} is not completed (status {status})")]
    PaymentNotCompleted { order_id: String, status: String },

    #[error("Captured amount {amount} {currency} matches no price tier")]
    UnknownTier { amount: Money, currency: Currency },

    #[error("Price {0} is not offered")]
    InvalidTier(String),

    #[error("Missing or invalid auth token")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal failure: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code returned to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::IO(_) | Error::Storage(_) | Error::Config(_) | Error::Internal(_) => "internal",
            Error::ProviderUnavailable(_) => "provider_unavailable",
            Error::ProviderProtocol(_) => "provider_error",
            Error::CaptureDenied { .. } => "capture_denied",
            Error::AlreadyCaptured(_) => "already_captured",
            Error::OrderOwnedElsewhere { .. } => "order_belongs_to_another_account",
            Error::PaymentNotCompleted { .. } => "payment_not_completed",
            Error::UnknownTier { .. } => "unknown_tier",
            Error::InvalidTier(_) => "invalid_tier",
            Error::Unauthorized => "unauthorized",
            Error::NotFound(_) => "not_found",
            Error::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Only transient provider outages are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ProviderUnavailable(_))
    }
}
