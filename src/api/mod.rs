//! HTTP surface of the shop.

pub mod error;
pub mod routes;
pub mod state;

use std::future::Future;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::domain::Error;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

/// Builds the router with all routes.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/paypal/orders", post(routes::create_order))
        .route(
            "/api/agreement",
            post(routes::accept_agreement).get(routes::agreement_status),
        )
        .route("/api/purchases", get(routes::purchases))
        .route("/paypal-complete", post(routes::complete_purchase))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            routes::require_token,
        ));

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/paypal/config", get(routes::checkout_config))
        .route("/api/paypal/prices", get(routes::prices))
        .route("/paypal-ipn", post(routes::ipn))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serves until `shutdown` resolves, then drains in-flight requests.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("coin_shop listening on {}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
