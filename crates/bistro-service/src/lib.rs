#![deny(unsafe_code)]

pub mod throttle;

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use bistro_core::{
    BistroEngine, BistroError, CartAdd, CategoryInput, ClearOutcome, EngineConfig,
    MenuItemFilter, MenuItemInput, MenuItemPatch, MenuItemSort, OrderFilter, OrderPatch,
    OrderSort, OrderStatus, StorageConfig, UserAccount,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use throttle::FixedWindowThrottle;
use tracing::Instrument;
use uuid::Uuid;

/// Username header set by the upstream authenticator. Absence means the
/// request is anonymous.
pub const USER_HEADER: &str = "x-user";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub storage: StorageConfig,
    pub seed_demo: bool,
    pub throttle_limit: u32,
    pub throttle_window: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::Memory,
            seed_demo: false,
            throttle_limit: 5,
            throttle_window: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<BistroEngine>,
    pub throttle: Arc<FixedWindowThrottle>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let engine = BistroEngine::bootstrap(EngineConfig {
            storage: config.storage,
        })
        .await?;
        if config.seed_demo {
            engine.seed_demo_data().await?;
        }
        Ok(Self {
            engine: Arc::new(engine),
            throttle: Arc::new(FixedWindowThrottle::new(
                config.throttle_limit,
                config.throttle_window,
            )),
        })
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core engine error: {0}")]
    Core(#[from] BistroError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] BistroError),
}

impl ApiError {
    fn throttled() -> Self {
        Self::Http {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "Request was throttled.".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Http { status, message } => (status, message),
            ApiError::Core(err) => {
                let status = match &err {
                    BistroError::Validation(_) => StatusCode::BAD_REQUEST,
                    BistroError::NotFound(_) => StatusCode::NOT_FOUND,
                    BistroError::Forbidden(_) => StatusCode::FORBIDDEN,
                    BistroError::Conflict(_) => StatusCode::CONFLICT,
                    BistroError::Storage(_) | BistroError::Serialization(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.to_string())
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/menu-items", get(list_menu_items).post(create_menu_item))
        .route(
            "/api/menu-items/:id",
            get(get_menu_item)
                .put(update_menu_item)
                .patch(update_menu_item)
                .delete(delete_menu_item),
        )
        .route("/api/categories", get(list_categories).post(create_category))
        .route(
            "/api/groups/:group_name/users",
            get(list_group_members).post(add_group_member),
        )
        .route("/api/groups/:group_name/users/:user_id", delete(remove_group_member))
        .route(
            "/api/cart/menu-items",
            get(view_cart).post(add_to_cart).delete(clear_cart),
        )
        .route("/api/orders", get(list_orders).post(place_order))
        .route(
            "/api/orders/:id",
            get(get_order)
                .put(update_order)
                .patch(update_order)
                .delete(delete_order),
        )
        .layer(middleware::from_fn(trace_requests))
        .with_state(state)
}

async fn trace_requests(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "request",
        %request_id,
        method = %request.method(),
        path = %request.uri().path()
    );
    next.run(request).instrument(span).await
}

/// Resolve the caller once per request; every handler passes the result
/// straight to the engine, which owns all authorization decisions.
async fn current_actor(
    state: &ServiceState,
    headers: &HeaderMap,
) -> Result<Option<UserAccount>, ApiError> {
    let Some(username) = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };
    Ok(Some(state.engine.resolve_actor(username).await?))
}

/// Mutation-class actions for authenticated users pass the fixed-window
/// throttle before reaching the core.
fn throttle_mutation(state: &ServiceState, actor: Option<&UserAccount>) -> Result<(), ApiError> {
    if let Some(actor) = actor {
        if !state.throttle.allow(&actor.username) {
            return Err(ApiError::throttled());
        }
    }
    Ok(())
}

fn message_body(text: impl Into<String>) -> Json<serde_json::Value> {
    Json(json!({ "message": text.into() }))
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "bistro-service",
        storage_backend: state.engine.storage_backend(),
    })
}

// ---- menu ----

#[derive(Debug, Default, Deserialize)]
struct MenuItemQuery {
    category: Option<String>,
    featured: Option<bool>,
    to_price: Option<u64>,
    search: Option<String>,
    ordering: Option<String>,
}

async fn list_menu_items(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Query(query): Query<MenuItemQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    let filter = MenuItemFilter {
        category_slug: query.category,
        featured: query.featured,
        max_price_minor: query.to_price,
        search: query.search,
    };
    // Unknown ordering values are ignored rather than rejected.
    let sort = query.ordering.as_deref().and_then(MenuItemSort::from_param);
    let items = state
        .engine
        .list_menu_items(actor.as_ref(), &filter, sort)
        .await?;
    Ok(Json(items))
}

async fn get_menu_item(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    Ok(Json(state.engine.menu_item(actor.as_ref(), id).await?))
}

async fn create_menu_item(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(input): Json<MenuItemInput>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    throttle_mutation(&state, actor.as_ref())?;
    let item = state.engine.create_menu_item(actor.as_ref(), input).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn update_menu_item(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(patch): Json<MenuItemPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    throttle_mutation(&state, actor.as_ref())?;
    let item = state
        .engine
        .update_menu_item(actor.as_ref(), id, patch)
        .await?;
    Ok(Json(item))
}

async fn delete_menu_item(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    throttle_mutation(&state, actor.as_ref())?;
    state.engine.delete_menu_item(actor.as_ref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_categories(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    Ok(Json(state.engine.list_categories(actor.as_ref()).await?))
}

async fn create_category(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(input): Json<CategoryInput>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    throttle_mutation(&state, actor.as_ref())?;
    let category = state.engine.create_category(actor.as_ref(), input).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

// ---- groups ----

#[derive(Debug, Default, Deserialize)]
struct GroupMemberBody {
    username: Option<String>,
}

async fn list_group_members(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(group_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    let members = state
        .engine
        .group_members(actor.as_ref(), &group_name)
        .await?;
    Ok(Json(members))
}

async fn add_group_member(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(group_name): Path<String>,
    Json(body): Json<GroupMemberBody>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    let username = body.username.unwrap_or_default();
    let update = state
        .engine
        .add_group_member(actor.as_ref(), &group_name, &username)
        .await?;
    Ok((
        StatusCode::CREATED,
        message_body(format!("{} added to {} group", update.username, update.group)),
    ))
}

async fn remove_group_member(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path((group_name, user_id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    let update = state
        .engine
        .remove_group_member(actor.as_ref(), &group_name, user_id)
        .await?;
    Ok(message_body(format!(
        "{} removed from {} group",
        update.username, update.group
    )))
}

// ---- cart ----

async fn view_cart(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    Ok(Json(state.engine.cart_lines(actor.as_ref()).await?))
}

async fn add_to_cart(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(add): Json<CartAdd>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    let line = state.engine.add_to_cart(actor.as_ref(), add).await?;
    Ok((StatusCode::CREATED, Json(line)))
}

async fn clear_cart(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    match state.engine.clear_cart(actor.as_ref()).await? {
        ClearOutcome::AlreadyEmpty => Ok((
            StatusCode::NOT_FOUND,
            message_body("Cart is already empty."),
        )),
        ClearOutcome::Cleared { .. } => {
            Ok((StatusCode::OK, message_body("Cart cleared successfully.")))
        }
    }
}

// ---- orders ----

#[derive(Debug, Default, Deserialize)]
struct OrderQuery {
    status: Option<String>,
    ordering: Option<String>,
}

async fn list_orders(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Query(query): Query<OrderQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    let status = match query.status.as_deref() {
        Some(raw) => Some(OrderStatus::parse(raw).ok_or_else(|| ApiError::Http {
            status: StatusCode::BAD_REQUEST,
            message: format!("Unknown status filter '{raw}'."),
        })?),
        None => None,
    };
    let sort = query.ordering.as_deref().and_then(OrderSort::from_param);
    let orders = state
        .engine
        .list_orders(actor.as_ref(), &OrderFilter { status }, sort)
        .await?;
    Ok(Json(orders))
}

async fn place_order(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    throttle_mutation(&state, actor.as_ref())?;
    let order = state.engine.place_order(actor.as_ref()).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    Ok(Json(state.engine.order(actor.as_ref(), id).await?))
}

async fn update_order(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(patch): Json<OrderPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    throttle_mutation(&state, actor.as_ref())?;
    let order = state.engine.update_order(actor.as_ref(), id, patch).await?;
    Ok(Json(order))
}

async fn delete_order(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&state, &headers).await?;
    throttle_mutation(&state, actor.as_ref())?;
    state.engine.delete_order(actor.as_ref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    async fn seeded_app() -> (Router, ServiceState) {
        let state = ServiceState::bootstrap(ServiceConfig {
            seed_demo: true,
            ..ServiceConfig::default()
        })
        .await
        .unwrap();
        (build_router(state.clone()), state)
    }

    fn json_request(
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&value).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    #[tokio::test]
    async fn menu_is_open_but_carts_are_not() {
        let (app, _) = seeded_app().await;

        let response = app
            .clone()
            .oneshot(json_request("GET", "/api/menu-items", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(json_request("GET", "/api/cart/menu-items", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn order_lifecycle_over_the_wire() {
        let (app, state) = seeded_app().await;
        let dan = state.engine.resolve_actor("dan").await.unwrap();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/cart/menu-items",
                Some("alice"),
                Some(json!({ "menu_item_id": 1, "quantity": 2 })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/orders", Some("alice"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        // Manager assigns the crew member using the legacy field spelling
        // and numeric status code.
        let response = app
            .clone()
            .oneshot(json_request(
                "PATCH",
                "/api/orders/1",
                Some("maria"),
                Some(json!({ "status": 1, "delivery_crew": dan.id })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Crew member may flip status alone; anything more is rejected.
        let response = app
            .clone()
            .oneshot(json_request(
                "PATCH",
                "/api/orders/1",
                Some("dan"),
                Some(json!({ "status": 2, "delivery_crew": dan.id })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request(
                "PATCH",
                "/api/orders/1",
                Some("dan"),
                Some(json!({ "status": 2 })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The cart was consumed by placement.
        let response = app
            .oneshot(json_request(
                "DELETE",
                "/api/cart/menu-items",
                Some("alice"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mutations_are_throttled_per_user() {
        let state = ServiceState::bootstrap(ServiceConfig {
            seed_demo: true,
            throttle_limit: 1,
            ..ServiceConfig::default()
        })
        .await
        .unwrap();
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/cart/menu-items",
                Some("alice"),
                Some(json!({ "menu_item_id": 1, "quantity": 1 })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/orders", Some("alice"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(json_request("POST", "/api/orders", Some("alice"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
