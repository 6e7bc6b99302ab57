//! HTTP translation layer.
//!
//! Maps JSON requests onto ledger operations and ledger errors onto status
//! codes. Amounts travel as fixed-scale decimal strings.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

use walletd_common::{Amount, Currency, ErrorKind, LedgerError, TransactionId, WalletId};
use walletd_ledger::{LedgerService, Transaction, User, Wallet};

use crate::metrics::{Operation, SharedMetrics};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn LedgerService>,
    pub metrics: SharedMetrics,
}

/// Error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_INPUT",
            message: message.into(),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::StorageFailure {
            error!(code = err.error_code(), error = %err, "Request failed");
        }
        Self {
            status: StatusCode::from_u16(kind.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code: err.error_code(),
            message: err.public_message(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_wallet_id(raw: &str) -> ApiResult<WalletId> {
    match raw.parse::<WalletId>() {
        Ok(id) if id.is_valid() => Ok(id),
        _ => Err(ApiError::bad_request("Invalid wallet ID")),
    }
}

/// Count the operation and turn its error into a response.
async fn tracked<R>(
    metrics: &SharedMetrics,
    operation: Operation,
    fut: impl Future<Output = walletd_common::Result<R>>,
) -> ApiResult<R> {
    metrics.operation_started();
    match fut.await {
        Ok(value) => {
            metrics.operation_succeeded(operation);
            Ok(value)
        }
        Err(err) => {
            metrics.operation_failed(err.kind());
            Err(err.into())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Amount,
    pub currency: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceChangeResponse {
    pub message: String,
    pub wallet_id: WalletId,
    pub new_balance: Amount,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub from_wallet_id: WalletId,
    pub to_wallet_id: WalletId,
    pub amount: Amount,
    pub currency: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferResponse {
    pub message: String,
    pub transaction_id: TransactionId,
    pub from_wallet_new_balance: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub wallet_id: WalletId,
    pub balance: Amount,
    pub currency: Currency,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub data: Vec<Transaction>,
    pub limit: i64,
    pub offset: i64,
    pub total_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub currency: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUserResponse {
    pub user: User,
    pub wallet: Wallet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub db_connected: bool,
}

async fn deposit(
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
    body: Result<Json<AmountRequest>, JsonRejection>,
) -> ApiResult<Json<BalanceChangeResponse>> {
    let wallet_id = parse_wallet_id(&wallet_id)?;
    let Json(request) = body?;
    let currency = Currency::new(request.currency);

    let (wallet, entry) = tracked(
        &state.metrics,
        Operation::Deposit,
        state.ledger.deposit(wallet_id, request.amount, &currency),
    )
    .await?;

    Ok(Json(BalanceChangeResponse {
        message: "Deposit successful".to_string(),
        wallet_id: wallet.id,
        new_balance: wallet.balance,
        transaction_id: entry.id,
    }))
}

async fn withdraw(
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
    body: Result<Json<AmountRequest>, JsonRejection>,
) -> ApiResult<Json<BalanceChangeResponse>> {
    let wallet_id = parse_wallet_id(&wallet_id)?;
    let Json(request) = body?;
    let currency = Currency::new(request.currency);

    let (wallet, entry) = tracked(
        &state.metrics,
        Operation::Withdrawal,
        state.ledger.withdraw(wallet_id, request.amount, &currency),
    )
    .await?;

    Ok(Json(BalanceChangeResponse {
        message: "Withdrawal successful".to_string(),
        wallet_id: wallet.id,
        new_balance: wallet.balance,
        transaction_id: entry.id,
    }))
}

async fn transfer(
    State(state): State<AppState>,
    body: Result<Json<TransferRequest>, JsonRejection>,
) -> ApiResult<Json<TransferResponse>> {
    let Json(request) = body?;
    let currency = Currency::new(request.currency);

    let outcome = tracked(
        &state.metrics,
        Operation::Transfer,
        state.ledger.transfer(
            request.from_wallet_id,
            request.to_wallet_id,
            request.amount,
            &currency,
        ),
    )
    .await?;

    // The destination balance belongs to another owner.
    Ok(Json(TransferResponse {
        message: "Transfer successful".to_string(),
        transaction_id: outcome.transaction.id,
        from_wallet_new_balance: outcome.from_wallet.balance,
    }))
}

async fn balance(
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> ApiResult<Json<BalanceResponse>> {
    let wallet_id = parse_wallet_id(&wallet_id)?;
    let wallet = state.ledger.get_balance(wallet_id).await?;

    Ok(Json(BalanceResponse {
        wallet_id: wallet.id,
        balance: wallet.balance,
        currency: wallet.currency,
    }))
}

/// Unparsable paging values fall back to the defaults.
async fn history(
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<HistoryResponse>> {
    let wallet_id = parse_wallet_id(&wallet_id)?;
    let limit = params.get("limit").and_then(|v| v.trim().parse().ok());
    let offset = params.get("offset").and_then(|v| v.trim().parse().ok());

    let page = state
        .ledger
        .get_transaction_history(wallet_id, limit, offset)
        .await?;

    Ok(Json(HistoryResponse {
        data: page.items,
        limit: page.limit,
        offset: page.offset,
        total_count: page.total_count,
    }))
}

async fn create_user(
    State(state): State<AppState>,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreateUserResponse>)> {
    let Json(request) = body?;
    let currency = Currency::new(request.currency);

    let (user, wallet) = tracked(
        &state.metrics,
        Operation::UserCreated,
        state.ledger.create_user_and_wallet(&request.username, &currency),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(CreateUserResponse { user, wallet })))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_connected = state.ledger.check_store().await.is_ok();
    let status = if db_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if db_connected { "healthy" } else { "degraded" }.to_string(),
            service: "walletd".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            db_connected,
        }),
    )
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Build the HTTP router.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    info!(timeout_secs = request_timeout.as_secs(), "Building HTTP router");

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/users", post(create_user))
        .route("/transfers", post(transfer))
        .route("/wallets/:id/deposit", post(deposit))
        .route("/wallets/:id/withdraw", post(withdraw))
        .route("/wallets/:id/balance", get(balance))
        .route("/wallets/:id/transactions", get(history))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use tower::ServiceExt;
    use walletd_ledger::{EngineConfig, FaultPoint, LedgerEngine, MemoryStore};

    struct TestApp {
        store: MemoryStore,
        metrics: SharedMetrics,
        router: Router,
    }

    fn app() -> TestApp {
        let store = MemoryStore::new();
        let metrics = Arc::new(Metrics::new());
        let state = AppState {
            ledger: Arc::new(LedgerEngine::in_memory(store.clone(), EngineConfig::default())),
            metrics: metrics.clone(),
        };
        TestApp {
            store,
            metrics,
            router: router(state, Duration::from_secs(5)),
        }
    }

    impl TestApp {
        fn wallet(&self, username: &str, balance: Amount) -> Wallet {
            let user = self.store.seed_user(username).unwrap();
            self.store.seed_wallet(user.id, Currency::usd(), balance).unwrap()
        }

        async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let mut request = Request::builder().method(method).uri(uri);
            let body = match body {
                Some(json) => {
                    request = request.header(header::CONTENT_TYPE, "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };

            let response = self
                .router
                .clone()
                .oneshot(request.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, json)
        }
    }

    #[tokio::test]
    async fn test_deposit() {
        let app = app();
        let wallet = app.wallet("alice", Amount::ZERO);

        let (status, body) = app
            .send(
                "POST",
                &format!("/wallets/{}/deposit", wallet.id),
                Some(serde_json::json!({"amount": "500.00", "currency": "USD"})),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Deposit successful");
        assert_eq!(body["new_balance"], "500.0000");
        assert_eq!(body["wallet_id"], wallet.id.get());
        assert_eq!(app.metrics.snapshot().deposits_total, 1);
    }

    #[tokio::test]
    async fn test_withdraw_insufficient_funds() {
        let app = app();
        let wallet = app.wallet("alice", Amount::new(dec!(100)));

        let (status, body) = app
            .send(
                "POST",
                &format!("/wallets/{}/withdraw", wallet.id),
                Some(serde_json::json!({"amount": "150", "currency": "USD"})),
            )
            .await;

        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"]["code"], "INSUFFICIENT_FUNDS");
        assert_eq!(app.metrics.snapshot().operations_rejected, 1);
    }

    #[tokio::test]
    async fn test_transfer_withholds_destination_balance() {
        let app = app();
        let a = app.wallet("alice", Amount::new(dec!(500)));
        let b = app.wallet("bob", Amount::new(dec!(100)));

        let (status, body) = app
            .send(
                "POST",
                "/transfers",
                Some(serde_json::json!({
                    "from_wallet_id": a.id,
                    "to_wallet_id": b.id,
                    "amount": "50",
                    "currency": "USD",
                })),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Transfer successful");
        assert_eq!(body["from_wallet_new_balance"], "450.0000");
        assert!(body.get("to_wallet_new_balance").is_none());
        assert_eq!(app.store.wallet(b.id).unwrap().balance, Amount::new(dec!(150)));
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let app = app();
        let a = app.wallet("alice", Amount::new(dec!(10)));

        let same = serde_json::json!({
            "from_wallet_id": a.id, "to_wallet_id": a.id, "amount": "1", "currency": "USD",
        });
        assert_eq!(app.send("POST", "/transfers", Some(same)).await.0, StatusCode::BAD_REQUEST);

        let mismatch = serde_json::json!({"amount": "1", "currency": "EUR"});
        let (status, body) = app
            .send("POST", &format!("/wallets/{}/deposit", a.id), Some(mismatch))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "CURRENCY_MISMATCH");

        let zero = serde_json::json!({"amount": "0", "currency": "USD"});
        let (status, _) = app
            .send("POST", &format!("/wallets/{}/deposit", a.id), Some(zero))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app.send("GET", "/wallets/999/balance", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["message"], "Resource not found");

        let (status, _) = app.send("GET", "/wallets/abc/balance", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_bodies_rejected() {
        let app = app();
        let a = app.wallet("alice", Amount::ZERO);
        let uri = format!("/wallets/{}/deposit", a.id);

        let float = serde_json::json!({"amount": 10.5, "currency": "USD"});
        assert_eq!(app.send("POST", &uri, Some(float)).await.0, StatusCode::BAD_REQUEST);

        let precise = serde_json::json!({"amount": "1.00001", "currency": "USD"});
        assert_eq!(app.send("POST", &uri, Some(precise)).await.0, StatusCode::BAD_REQUEST);

        let missing = serde_json::json!({"currency": "USD"});
        let (status, body) = app.send("POST", &uri, Some(missing)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_INPUT");

        assert!(app.store.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_hides_detail() {
        let app = app();
        let a = app.wallet("alice", Amount::ZERO);
        app.store.fail_next(FaultPoint::AppendTransaction);

        let (status, body) = app
            .send(
                "POST",
                &format!("/wallets/{}/deposit", a.id),
                Some(serde_json::json!({"amount": "5", "currency": "USD"})),
            )
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "Internal server error");
        assert_eq!(app.metrics.snapshot().operations_failed, 1);
        assert!(app.store.wallet(a.id).unwrap().balance.is_zero());
    }

    #[tokio::test]
    async fn test_history_paging_is_lenient() {
        let app = app();
        let a = app.wallet("alice", Amount::ZERO);
        for _ in 0..12 {
            app.send(
                "POST",
                &format!("/wallets/{}/deposit", a.id),
                Some(serde_json::json!({"amount": "1", "currency": "USD"})),
            )
            .await;
        }

        let (status, body) = app
            .send("GET", &format!("/wallets/{}/transactions?limit=abc&offset=-4", a.id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["limit"], 10);
        assert_eq!(body["offset"], 0);
        assert_eq!(body["total_count"], 12);
        assert_eq!(body["data"].as_array().unwrap().len(), 10);
        assert_eq!(body["data"][0]["type"], "DEPOSIT");

        let (_, body) = app
            .send("GET", &format!("/wallets/{}/transactions?limit=5&offset=10", a.id), None)
            .await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_user_and_balance() {
        let app = app();

        let (status, body) = app
            .send(
                "POST",
                "/users",
                Some(serde_json::json!({"username": "carol", "currency": "EUR"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["username"], "carol");
        let wallet_id = body["wallet"]["id"].as_i64().unwrap();

        let (status, body) = app.send("GET", &format!("/wallets/{}/balance", wallet_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], "0.0000");
        assert_eq!(body["currency"], "EUR");

        let (status, body) = app
            .send(
                "POST",
                "/users",
                Some(serde_json::json!({"username": "carol", "currency": "USD"})),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app = app();

        let (status, body) = app.send("GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["db_connected"], true);

        app.store.fail_next(FaultPoint::Acquire);
        let (status, body) = app.send("GET", "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");

        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("walletd_deposits_total 0"));
    }
}
