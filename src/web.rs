//! HTTP endpoints for the tea shop: public catalog, account management,
//! the order workflow, and admin mirrors of the user/catalog routes.
use crate::errors::TeahouseError;
use crate::settings::Settings;
use crate::storage;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::services::ServeDir;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    skip: u64,
    #[serde(default = "default_limit")]
    limit: u64,
}

fn default_limit() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
}

#[derive(Debug, Deserialize)]
struct OrderStatusUpdate {
    status: String,
}

fn json_error(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({"error": msg}))).into_response()
}

fn error_response(err: TeahouseError) -> Response {
    match err {
        TeahouseError::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, &msg),
        TeahouseError::Conflict(msg) => json_error(StatusCode::BAD_REQUEST, &msg),
        other => {
            tracing::error!(error = %other, "request failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn not_found(what: &str) -> Response {
    json_error(StatusCode::NOT_FOUND, &format!("{} not found", what))
}

// Missing and unauthorized orders must be indistinguishable to the caller.
fn order_not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "Order not found or not authorized")
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

/// Resolve the bearer token to an active user, or produce the 401 response.
async fn current_user(state: &AppState, headers: &HeaderMap) -> Result<storage::User, Response> {
    let token = bearer_token(headers)
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "Missing bearer token"))?;

    let resolved = match storage::resolve_access_token(&state.db, token).await {
        Ok(Some(t)) => t,
        Ok(None) => return Err(json_error(StatusCode::UNAUTHORIZED, "Invalid token")),
        Err(err) => return Err(error_response(err)),
    };

    match storage::get_user(&state.db, resolved.user_id).await {
        Ok(Some(user)) if user.is_active => Ok(user),
        Ok(_) => Err(json_error(StatusCode::UNAUTHORIZED, "Invalid token")),
        Err(err) => Err(error_response(err)),
    }
}

fn require_admin(user: &storage::User) -> Result<(), Response> {
    if user.is_admin {
        Ok(())
    } else {
        Err(json_error(
            StatusCode::FORBIDDEN,
            "Not enough permissions",
        ))
    }
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        // Tea catalog; mutation requires admin
        .route("/tea/", get(list_teas).post(create_tea))
        .route(
            "/tea/{tea_id}",
            get(get_tea).put(update_tea).delete(delete_tea),
        )
        // Accounts
        .route("/users/", get(list_users).post(register_user))
        .route("/users/register", post(register_user))
        .route("/users/login", post(login))
        .route("/users/logout", post(logout))
        .route("/users/me", get(read_current_user))
        .route(
            "/users/{user_id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        // Orders; bearer auth on every route
        .route("/orders/", get(list_my_orders).post(create_order))
        .route(
            "/orders/{order_id}",
            get(get_order).put(update_order).delete(delete_order),
        )
        // Admin mirrors
        .route("/admin/users/", get(admin_list_users))
        .route(
            "/admin/users/{user_id}",
            put(admin_update_user).delete(admin_delete_user),
        )
        .route("/admin/orders/", get(admin_list_orders))
        .route("/admin/tea/", post(create_tea))
        .route(
            "/admin/tea/{tea_id}",
            put(update_tea).delete(delete_tea),
        )
        // Static assets
        .nest_service("/static", ServeDir::new("static"))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

pub async fn serve(settings: Settings, db: DatabaseConnection) -> miette::Result<()> {
    let state = AppState {
        settings: Arc::new(settings),
        db,
    };

    let addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let app = router(state);

    tracing::info!(%addr, "Tea shop API listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| miette::miette!("failed to bind {addr}: {e}"))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| miette::miette!("server error: {e}"))?;
    Ok(())
}

async fn root() -> impl IntoResponse {
    Json(json!({"message": "Welcome to the tea shop"}))
}

// Tea catalog handlers

async fn list_teas(State(state): State<AppState>, Query(page): Query<Pagination>) -> Response {
    match storage::list_teas(&state.db, page.skip, page.limit).await {
        Ok(teas) => (StatusCode::OK, Json(teas)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_tea(State(state): State<AppState>, Path(tea_id): Path<i32>) -> Response {
    match storage::get_tea(&state.db, tea_id).await {
        Ok(Some(tea)) => (StatusCode::OK, Json(tea)).into_response(),
        Ok(None) => not_found("Tea"),
        Err(err) => error_response(err),
    }
}

async fn create_tea(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<storage::NewTea>,
) -> Response {
    let user = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_admin(&user) {
        return resp;
    }

    match storage::create_tea(&state.db, input).await {
        Ok(tea) => (StatusCode::CREATED, Json(tea)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn update_tea(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tea_id): Path<i32>,
    Json(input): Json<storage::NewTea>,
) -> Response {
    let user = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_admin(&user) {
        return resp;
    }

    match storage::update_tea(&state.db, tea_id, input).await {
        Ok(Some(tea)) => (StatusCode::OK, Json(tea)).into_response(),
        Ok(None) => not_found("Tea"),
        Err(err) => error_response(err),
    }
}

async fn delete_tea(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tea_id): Path<i32>,
) -> Response {
    let user = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_admin(&user) {
        return resp;
    }

    match storage::delete_tea(&state.db, tea_id).await {
        Ok(Some(tea)) => (StatusCode::OK, Json(tea)).into_response(),
        Ok(None) => not_found("Tea"),
        Err(err) => error_response(err),
    }
}

// Account handlers

async fn list_users(State(state): State<AppState>, Query(page): Query<Pagination>) -> Response {
    match storage::list_users(&state.db, page.skip, page.limit).await {
        Ok(users) => (StatusCode::OK, Json(users)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_user(State(state): State<AppState>, Path(user_id): Path<i32>) -> Response {
    match storage::get_user(&state.db, user_id).await {
        Ok(Some(user)) => (StatusCode::OK, Json(user)).into_response(),
        Ok(None) => not_found("User"),
        Err(err) => error_response(err),
    }
}

async fn register_user(
    State(state): State<AppState>,
    Json(input): Json<storage::NewUser>,
) -> Response {
    match storage::create_user(&state.db, input).await {
        Ok(user) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    let user = match storage::verify_user_password(&state.db, &req.email, &req.password).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            // One generic message regardless of which part was wrong
            return json_error(StatusCode::BAD_REQUEST, "Incorrect email or password");
        }
        Err(err) => return error_response(err),
    };

    match storage::issue_access_token(&state.db, user.id, state.settings.auth.token_ttl_secs).await
    {
        Ok(token) => (
            StatusCode::OK,
            Json(TokenResponse {
                access_token: token.token,
                token_type: "bearer".to_string(),
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return json_error(StatusCode::UNAUTHORIZED, "Missing bearer token");
    };

    match storage::revoke_access_token(&state.db, token).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn read_current_user(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match current_user(&state, &headers).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(resp) => resp,
    }
}

async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i32>,
    Json(input): Json<storage::UserUpdate>,
) -> Response {
    let caller = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if caller.id != user_id {
        if let Err(resp) = require_admin(&caller) {
            return resp;
        }
    }

    match storage::update_user(&state.db, user_id, input).await {
        Ok(Some(user)) => (StatusCode::OK, Json(user)).into_response(),
        Ok(None) => not_found("User"),
        Err(err) => error_response(err),
    }
}

async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i32>,
) -> Response {
    let caller = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_admin(&caller) {
        return resp;
    }

    match storage::delete_user(&state.db, user_id).await {
        Ok(Some(user)) => (StatusCode::OK, Json(user)).into_response(),
        Ok(None) => not_found("User"),
        Err(err) => error_response(err),
    }
}

// Order handlers

async fn list_my_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<Pagination>,
) -> Response {
    let user = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match storage::list_orders_for_user(&state.db, user.id, page.skip, page.limit).await {
        Ok(orders) => (StatusCode::OK, Json(orders)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<storage::NewOrder>,
) -> Response {
    let user = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match storage::create_order(&state.db, user.id, input).await {
        Ok(order) => (StatusCode::CREATED, Json(order)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<i32>,
) -> Response {
    let user = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match storage::get_order(&state.db, order_id).await {
        Ok(Some(order)) if storage::can_access(&user, &order) => {
            (StatusCode::OK, Json(order)).into_response()
        }
        Ok(_) => order_not_found(),
        Err(err) => error_response(err),
    }
}

async fn update_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<i32>,
    Json(input): Json<OrderStatusUpdate>,
) -> Response {
    let user = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match storage::get_order(&state.db, order_id).await {
        Ok(Some(order)) if storage::can_access(&user, &order) => {
            match storage::update_order_status(&state.db, order_id, input.status).await {
                Ok(Some(order)) => (StatusCode::OK, Json(order)).into_response(),
                Ok(None) => order_not_found(),
                Err(err) => error_response(err),
            }
        }
        Ok(_) => order_not_found(),
        Err(err) => error_response(err),
    }
}

async fn delete_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<i32>,
) -> Response {
    let user = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match storage::get_order(&state.db, order_id).await {
        Ok(Some(order)) if storage::can_access(&user, &order) => {
            match storage::delete_order(&state.db, order_id).await {
                Ok(Some(order)) => (StatusCode::OK, Json(order)).into_response(),
                Ok(None) => order_not_found(),
                Err(err) => error_response(err),
            }
        }
        Ok(_) => order_not_found(),
        Err(err) => error_response(err),
    }
}

// Admin handlers

async fn admin_list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<Pagination>,
) -> Response {
    let user = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_admin(&user) {
        return resp;
    }

    match storage::list_users(&state.db, page.skip, page.limit).await {
        Ok(users) => (StatusCode::OK, Json(users)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn admin_update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i32>,
    Json(input): Json<storage::AdminUserUpdate>,
) -> Response {
    let caller = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_admin(&caller) {
        return resp;
    }

    match storage::admin_update_user(&state.db, user_id, input).await {
        Ok(Some(user)) => (StatusCode::OK, Json(user)).into_response(),
        Ok(None) => not_found("User"),
        Err(err) => error_response(err),
    }
}

async fn admin_delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i32>,
) -> Response {
    let caller = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_admin(&caller) {
        return resp;
    }

    match storage::delete_user(&state.db, user_id).await {
        Ok(Some(user)) => (StatusCode::OK, Json(user)).into_response(),
        Ok(None) => not_found("User"),
        Err(err) => error_response(err),
    }
}

async fn admin_list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<Pagination>,
) -> Response {
    let user = match current_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_admin(&user) {
        return resp;
    }

    match storage::list_orders(&state.db, page.skip, page.limit).await {
        Ok(orders) => (StatusCode::OK, Json(orders)).into_response(),
        Err(err) => error_response(err),
    }
}
