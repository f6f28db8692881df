//! HTTP router and handlers
//!
//! Every request goes through one fallback handler that switches on a
//! closed [`Verb`] set. Layers, outermost first: tracing, panic catching,
//! path normalization, authentication. Request bodies are not size-limited.

use std::sync::Arc;

use axum::{
    Extension, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Request, State, rejection::BytesRejection},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use super::{HEALTH_PATH, TOKEN_PATH, oauth};
use crate::auth::{Gatekeeper, auth_middleware};
use crate::error::ApiError;
use crate::path::NormalizedPath;
use crate::store::{Lookup, ResourceStore, WriteOutcome};

/// `Allow` header value for resource paths
pub const ALLOWED_METHODS: &str = "GET,HEAD,POST,PUT,PATCH,DELETE,OPTIONS";

/// Shared application state
pub struct AppState {
    /// Resource store
    pub store: Arc<ResourceStore>,
    /// Request-layer authentication (and the token registry behind it)
    pub gatekeeper: Arc<Gatekeeper>,
}

/// HTTP methods the server dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Read a resource or list a collection
    Get,
    /// `Get` without a body
    Head,
    /// Write; `201 Created` when the path was new
    Post,
    /// Write
    Put,
    /// Write (full replacement, same as `Put`)
    Patch,
    /// Remove a resource
    Delete,
    /// Capability discovery
    Options,
}

impl Verb {
    /// Map an HTTP method onto the dispatch table.
    #[must_use]
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(Self::Get),
            Method::HEAD => Some(Self::Head),
            Method::POST => Some(Self::Post),
            Method::PUT => Some(Self::Put),
            Method::PATCH => Some(Self::Patch),
            Method::DELETE => Some(Self::Delete),
            Method::OPTIONS => Some(Self::Options),
            _ => None,
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let gatekeeper = Arc::clone(&state.gatekeeper);

    Router::new()
        .fallback(dispatch)
        .layer(DefaultBodyLimit::disable())
        // Layers added later wrap the earlier ones: normalization runs before auth
        .layer(middleware::from_fn_with_state(gatekeeper, auth_middleware))
        .layer(middleware::from_fn(normalize_path))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Attach the request's [`NormalizedPath`] as an extension.
pub async fn normalize_path(mut request: Request, next: Next) -> Response {
    let path = NormalizedPath::normalize(request.uri().path());
    request.extensions_mut().insert(path);
    next.run(request).await
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    Extension(path): Extension<NormalizedPath>,
    method: Method,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    body.map_err(|rejection| {
        ApiError::invalid_request(format!(
            "request body could not be read: {}",
            rejection.body_text()
        ))
    })
    .and_then(|body| handle(&state, &method, &headers, &path, &body))
    .unwrap_or_else(IntoResponse::into_response)
}

fn handle(
    state: &AppState,
    method: &Method,
    headers: &HeaderMap,
    path: &NormalizedPath,
    body: &[u8],
) -> Result<Response, ApiError> {
    if path.as_str() == TOKEN_PATH {
        if !state.gatekeeper.settings().oauth2 {
            return Err(ApiError::NotFound(
                "oauth2 token endpoint is disabled".to_string(),
            ));
        }
        return oauth::issue_token(&state.gatekeeper, method, headers, body);
    }

    let Some(verb) = Verb::from_method(method) else {
        return Err(ApiError::MethodNotAllowed {
            allow: ALLOWED_METHODS,
            description: format!("method {method} is not supported"),
        });
    };

    match verb {
        Verb::Get => read(&state.store, path, false),
        Verb::Head => read(&state.store, path, true),
        Verb::Delete => delete(&state.store, path),
        Verb::Post | Verb::Put | Verb::Patch => write(&state.store, path, verb, body),
        Verb::Options => Ok(options()),
    }
}

fn read(store: &ResourceStore, path: &NormalizedPath, head: bool) -> Result<Response, ApiError> {
    if path.as_str() == HEALTH_PATH {
        return Ok(json_response(StatusCode::OK, &json!({"status": "ok"}), head));
    }

    match store.get(path) {
        Lookup::Found(value) => Ok(json_response(StatusCode::OK, &value, head)),
        Lookup::Collection(items) if !items.is_empty() => {
            Ok(json_response(StatusCode::OK, &Value::Array(items), head))
        }
        Lookup::Collection(_) => Err(not_found(path)),
    }
}

fn delete(store: &ResourceStore, path: &NormalizedPath) -> Result<Response, ApiError> {
    if store.delete(path) {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(not_found(path))
    }
}

fn write(
    store: &ResourceStore,
    path: &NormalizedPath,
    verb: Verb,
    body: &[u8],
) -> Result<Response, ApiError> {
    let value: Value = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(body)
            .map_err(|_| ApiError::invalid_request("request body must be valid JSON"))?
    };

    let outcome = store.put(path, value.clone());
    let status = if verb == Verb::Post && outcome == WriteOutcome::Created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(json_response(status, &value, false))
}

fn options() -> Response {
    (
        StatusCode::NO_CONTENT,
        [(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS))],
    )
        .into_response()
}

fn not_found(path: &NormalizedPath) -> ApiError {
    ApiError::NotFound(format!("resource path not found: {path}"))
}

/// Compact JSON response with explicit `Content-Length`.
///
/// For `HEAD` the body is dropped but the length still describes it.
pub(crate) fn json_response(status: StatusCode, value: &Value, head: bool) -> Response {
    let rendered = value.to_string();
    let length = rendered.len();
    let body = if head {
        Body::empty()
    } else {
        Body::from(rendered)
    };

    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    response
}
