//! PayPal Orders v2 REST client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Response, StatusCode, header};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{
    CaptureResult, CaptureStatus, Currency, Error, Money, OrderRequest, PaymentProvider,
};

pub const LIVE_API_BASE_URL: &str = "https://api-m.paypal.com";
pub const SANDBOX_API_BASE_URL: &str = "https://api-m.sandbox.paypal.com";
pub const LIVE_IPN_VERIFY_URL: &str = "https://ipnpb.paypal.com/cgi-bin/webscr";
pub const SANDBOX_IPN_VERIFY_URL: &str = "https://ipnpb.sandbox.paypal.com/cgi-bin/webscr";

/// Refresh the OAuth token this long before PayPal says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct PaypalSettings {
    pub api_base_url: String,
    pub ipn_verify_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub timeout: Duration,
}

struct CachedToken {
    value: Arc<SecretString>,
    expires_at: Instant,
}

pub struct PaypalClient {
    settings: PaypalSettings,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct CreatedOrder {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OrderAmount {
    currency_code: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct Capture {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    amount: OrderAmount,
}

#[derive(Debug, Default, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    payments: Payments,
}

#[derive(Debug, Deserialize)]
struct Payer {
    #[serde(default)]
    email_address: Option<String>,
}

/// Shape shared by the capture response and the order lookup.
#[derive(Debug, Deserialize)]
struct OrderDetails {
    id: String,
    status: String,
    #[serde(default)]
    payer: Option<Payer>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    issue: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

impl ErrorBody {
    fn issue(&self) -> &str {
        self.details
            .first()
            .map(|d| d.issue.as_str())
            .unwrap_or(self.name.as_str())
    }
}

impl OrderDetails {
    fn into_capture_result(self) -> Result<CaptureResult, Error> {
        let capture = self
            .purchase_units
            .into_iter()
            .flat_map(|unit| unit.payments.captures)
            .next()
            .ok_or_else(|| {
                Error::ProviderProtocol(format!("order {} carries no capture", self.id))
            })?;

        let captured_amount = Money::from_decimal_str(&capture.amount.value).ok_or_else(|| {
            Error::ProviderProtocol(format!("bad capture amount {}", capture.amount.value))
        })?;
        let captured_currency = Currency::new(&capture.amount.currency_code).ok_or_else(|| {
            Error::ProviderProtocol(format!("bad currency {}", capture.amount.currency_code))
        })?;
        // The capture's own status wins: an order can be COMPLETED while its
        // capture is still PENDING review.
        let status = CaptureStatus::parse(capture.status.as_deref().unwrap_or(&self.status));

        Ok(CaptureResult {
            order_id: self.id,
            capture_id: capture.id,
            payer_email: self.payer.and_then(|p| p.email_address),
            captured_amount,
            captured_currency,
            status,
        })
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_decode() {
        Error::ProviderProtocol(e.to_string())
    } else {
        Error::ProviderUnavailable(e.to_string())
    }
}

impl PaypalClient {
    pub fn new(settings: PaypalSettings) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.timeout)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {}", e)))?;

        Ok(Self {
            settings,
            http,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<Arc<SecretString>, Error> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(
                &self.settings.client_id,
                Some(self.settings.client_secret.expose_secret()),
            )
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(if status.is_server_error() {
                Error::ProviderUnavailable(format!("token endpoint answered {}", status))
            } else {
                Error::Config(format!("PayPal rejected the API credentials ({})", status))
            });
        }

        let body: TokenResponse = response.json().await.map_err(transport_error)?;
        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let value = Arc::new(SecretString::from(body.access_token));
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        debug!(expires_in = body.expires_in, "refreshed PayPal access token");
        Ok(value)
    }

    /// Maps a non-success response onto the error taxonomy.
    async fn error_for(order_id: &str, response: Response) -> Error {
        let status = response.status();
        let body: ErrorBody = response.json().await.unwrap_or_default();
        let issue = body.issue().to_string();

        match status {
            StatusCode::UNPROCESSABLE_ENTITY if issue == "ORDER_ALREADY_CAPTURED" => {
                Error::AlreadyCaptured(order_id.to_string())
            }
            StatusCode::UNPROCESSABLE_ENTITY => Error::CaptureDenied {
                order_id: order_id.to_string(),
                reason: issue,
            },
            StatusCode::NOT_FOUND => Error::NotFound(format!("order {}", order_id)),
            StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
                Error::ProviderUnavailable(format!("{} {}", status, issue))
            }
            s if s.is_server_error() => Error::ProviderUnavailable(format!("{} {}", status, issue)),
            _ => Error::ProviderProtocol(format!("{} {}", status, issue)),
        }
    }

    async fn order_details(&self, order_id: &str, response: Response) -> Result<CaptureResult, Error> {
        if !response.status().is_success() {
            return Err(Self::error_for(order_id, response).await);
        }
        let details: OrderDetails = response.json().await.map_err(transport_error)?;
        details.into_capture_result()
    }
}

#[async_trait]
impl PaymentProvider for PaypalClient {
    async fn create_order(&self, request: &OrderRequest) -> Result<String, Error> {
        let token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": request.currency.as_str(),
                    "value": request.amount.to_string(),
                },
                "custom_id": request.custom_id,
            }],
        });

        let response = self
            .http
            .post(self.url("/v2/checkout/orders"))
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_for("(new)", response).await);
        }
        let created: CreatedOrder = response.json().await.map_err(transport_error)?;
        Ok(created.id)
    }

    async fn capture_order(&self, order_id: &str) -> Result<CaptureResult, Error> {
        let token = self.access_token().await?;
        // Same request id on every attempt, so a retried capture is a no-op
        // on PayPal's side.
        let response = self
            .http
            .post(self.url(&format!("/v2/checkout/orders/{}/capture", order_id)))
            .bearer_auth(token.expose_secret())
            .header("PayPal-Request-Id", format!("capture-{}", order_id))
            .header(header::CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await
            .map_err(transport_error)?;

        self.order_details(order_id, response).await
    }

    async fn get_order(&self, order_id: &str) -> Result<CaptureResult, Error> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.url(&format!("/v2/checkout/orders/{}", order_id)))
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;

        self.order_details(order_id, response).await
    }

    async fn verify_notification(&self, raw_body: &str) -> Result<bool, Error> {
        let response = self
            .http
            .post(&self.settings.ipn_verify_url)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(format!("cmd=_notify-validate&{}", raw_body))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::ProviderUnavailable(format!(
                "IPN verification answered {}",
                status
            )));
        }
        let text = response.text().await.map_err(transport_error)?;
        if text.trim() != "VERIFIED" {
            warn!(answer = %text.trim(), "IPN verification refused");
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_capture_response() {
        let raw = r#"{
            "id": "5O190127TN364715T",
            "status": "COMPLETED",
            "payer": { "email_address": "customer@example.com" },
            "purchase_units": [{
                "reference_id": "default",
                "payments": { "captures": [{
                    "id": "3C679366HH908993F",
                    "status": "COMPLETED",
                    "amount": { "currency_code": "EUR", "value": "10.00" }
                }]}
            }]
        }"#;
        let details: OrderDetails = serde_json::from_str(raw).unwrap();
        let result = details.into_capture_result().unwrap();

        assert_eq!(result.order_id, "5O190127TN364715T");
        assert_eq!(result.capture_id.as_deref(), Some("3C679366HH908993F"));
        assert_eq!(result.captured_amount.to_string(), "10.00");
        assert_eq!(result.captured_currency.as_str(), "EUR");
        assert_eq!(result.status, CaptureStatus::Completed);
        assert_eq!(result.payer_email.as_deref(), Some("customer@example.com"));
    }

    #[test]
    fn capture_status_overrides_order_status() {
        let raw = r#"{
            "id": "O-2",
            "status": "COMPLETED",
            "purchase_units": [{ "payments": { "captures": [{
                "status": "PENDING",
                "amount": { "currency_code": "EUR", "value": "5.00" }
            }]}}]
        }"#;
        let details: OrderDetails = serde_json::from_str(raw).unwrap();
        let result = details.into_capture_result().unwrap();
        assert_eq!(result.status, CaptureStatus::Pending);
        assert!(result.payer_email.is_none());
        assert!(result.capture_id.is_none());
    }

    #[test]
    fn order_without_capture_is_a_protocol_error() {
        let raw = r#"{ "id": "O-3", "status": "APPROVED", "purchase_units": [{}] }"#;
        let details: OrderDetails = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            details.into_capture_result(),
            Err(Error::ProviderProtocol(_))
        ));
    }

    #[test]
    fn error_body_prefers_detail_issue() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"name":"UNPROCESSABLE_ENTITY","details":[{"issue":"ORDER_ALREADY_CAPTURED"}]}"#,
        )
        .unwrap();
        assert_eq!(body.issue(), "ORDER_ALREADY_CAPTURED");
        assert_eq!(ErrorBody::default().issue(), "");
    }
}
