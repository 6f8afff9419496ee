//! HTTP handlers.
//!
//! Everything under `/api` and `/paypal-complete` sits behind the token
//! check in [`require_token`], which runs before any body is parsed. The
//! catalog endpoints are public because the checkout page loads them, and
//! `/paypal-ipn` is authenticated by posting the body back to PayPal.

use axum::{
    Json,
    extract::{
        Query, Request, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::auth::TOKEN_HEADER;
use crate::domain::{AccountDirectory, AccountId, AgreementLedger, Error};
use crate::history::HistoryPage;
use crate::reconciler::{CompletionRequest, IpnNotification};

/// Successful bodies carry `success: true` next to their own fields.
#[derive(Debug, Serialize)]
pub struct Success<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub body: T,
}

fn success<T: Serialize>(body: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        body,
    })
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| Error::InvalidRequest(rejection.body_text()).into())
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    params
        .map(|Query(params)| params)
        .map_err(|rejection| Error::InvalidRequest(rejection.body_text()).into())
}

pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    state.auth.verify(presented)?;
    Ok(next.run(request).await)
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutConfig {
    pub currency: String,
    pub client_id: String,
    pub sandbox: bool,
    pub images: serde_json::Map<String, Value>,
}

/// GET /api/paypal/config
pub async fn checkout_config(State(state): State<AppState>) -> Json<CheckoutConfig> {
    Json(CheckoutConfig {
        currency: state.paypal.currency.to_string(),
        client_id: state.paypal.client_id.clone(),
        sandbox: state.paypal.sandbox,
        images: state.catalog().images(),
    })
}

/// GET /api/paypal/prices
pub async fn prices(State(state): State<AppState>) -> Json<serde_json::Map<String, Value>> {
    Json(state.catalog().prices())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub price: String,
    pub account_id: AccountId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order_id: String,
}

/// POST /api/paypal/orders
pub async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let request = json_body(payload)?;
    let account = state
        .repository
        .account(request.account_id)?
        .ok_or_else(|| Error::NotFound(format!("account {}", request.account_id)))?;

    let order_id = state
        .reconciler
        .orders()
        .create_order(&request.price, &account.name)
        .await?;
    info!(order_id = %order_id, account_id = account.id, price = %request.price, "checkout order created");

    Ok((StatusCode::CREATED, success(CreatedOrder { order_id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountParams {
    pub account_id: AccountId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementStatus {
    pub account_id: AccountId,
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedAgreement {
    pub agreement_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// POST /api/agreement
pub async fn accept_agreement(
    State(state): State<AppState>,
    payload: Result<Json<AccountParams>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let request = json_body(payload)?;
    let agreement = state.repository.record_acceptance(request.account_id)?;

    Ok(success(AcceptedAgreement {
        agreement_id: agreement.agreement_id,
        accepted_at: agreement.accepted_at,
    }))
}

/// GET /api/agreement?accountId=
pub async fn agreement_status(
    State(state): State<AppState>,
    params: Result<Query<AccountParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let params = query(params)?;
    let accepted = state.repository.has_accepted(params.account_id)?;

    Ok(success(AgreementStatus {
        account_id: params.account_id,
        accepted,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub order_id: String,
    pub account_id: AccountId,
    #[serde(default)]
    pub payer_email: Option<String>,
    #[serde(default)]
    pub agreement_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Credited {
    pub coins: u64,
}

/// POST /paypal-complete
pub async fn complete_purchase(
    State(state): State<AppState>,
    payload: Result<Json<CompleteRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let request = json_body(payload)?;
    let request = CompletionRequest {
        order_id: request.order_id,
        account_id: request.account_id,
        payer_email: request.payer_email.filter(|e| !e.trim().is_empty()),
        agreement_id: request.agreement_id.filter(|a| !a.trim().is_empty()),
    };

    let outcome = state.reconciler.complete(&request).await?;
    Ok(success(Credited {
        coins: outcome.coins(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub account_id: AccountId,
    #[serde(default)]
    pub page: Option<i64>,
}

/// GET /api/purchases?accountId=&page=
pub async fn purchases(
    State(state): State<AppState>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> ApiResult<Json<Success<HistoryPage>>> {
    let params = query(params)?;
    let page = state
        .history
        .view(params.account_id, params.page.unwrap_or(1))?;
    Ok(success(page))
}

/// POST /paypal-ipn
///
/// PayPal retries until it gets a 200, so every handled notification,
/// including a replay, answers with an empty 200.
pub async fn ipn(State(state): State<AppState>, body: String) -> ApiResult<StatusCode> {
    let Some(receiver) = state.ipn_receiver.as_deref() else {
        return Err(Error::NotFound("ipn listener disabled".to_string()).into());
    };

    let notification: IpnNotification = serde_urlencoded::from_str(&body)
        .map_err(|e| Error::InvalidRequest(format!("malformed notification: {}", e)))?;
    debug!(txn_id = ?notification.txn_id, status = ?notification.payment_status, "IPN received");

    state
        .reconciler
        .complete_notification(&body, &notification, receiver)
        .await?;
    Ok(StatusCode::OK)
}
