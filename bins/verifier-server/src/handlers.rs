// HTTP route handlers for the verifier server

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{FromRequest, Path, Query, Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Form,
};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use verifier_common::runtime;
use verifier_common::types::{JobPayload, RuntimeIndex};

use crate::error::{ErrorKind, JobError};
use crate::AppState;

/// Query and form field carrying the job payload
const PAYLOAD_FIELD: &str = "jsonrequest";
/// Query field naming the JSONP callback
const CALLBACK_FIELD: &str = "vcallback";
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

const UNEXPECTED_ERROR: &str = r#"{"errors": "unexpected error"}"#;

/// Error body, `{"errors": "..."}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub errors: String,
}

#[derive(Debug, Deserialize)]
struct PayloadForm {
    jsonrequest: Option<String>,
}

/// A request that cannot go further, with the message shown to the client
#[derive(Debug)]
struct Rejection {
    status: StatusCode,
    message: &'static str,
}

impl Rejection {
    fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }
}

/// ANY / - List supported runtimes
pub async fn index(
    State(state): State<Arc<AppState>>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let index = RuntimeIndex {
        runtimes: state.executor.list_supported_runtimes(),
    };
    respond(StatusCode::OK, &index, callback(&method, &query))
}

/// GET|POST /{runtime} - Run a solution against its tests
///
/// The payload is read from:
/// - the `jsonrequest` query field of a GET, plain or base64-encoded JSON
/// - the body of a POST with an `application/json` content type
/// - the `jsonrequest` field of a form-encoded POST
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Path(runtime_name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
) -> Response {
    let method = request.method().clone();
    let jsonp = callback(&method, &query);

    if !runtime::is_supported(&runtime_name) {
        return reject(
            Rejection::new(StatusCode::NOT_FOUND, "Unsupported runtimes"),
            jsonp,
        );
    }

    let body = match method {
        Method::GET => payload_from_query(&query),
        Method::POST => payload_from_body(request).await,
        _ => Err(Rejection::new(StatusCode::METHOD_NOT_ALLOWED, "Unsupported method")),
    };
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return reject(rejection, jsonp),
    };

    let payload: JobPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(runtime = %runtime_name, error = %e, "Could not parse the json request");
            return reject(
                Rejection::new(StatusCode::BAD_REQUEST, "Could not parse the json request"),
                jsonp,
            );
        }
    };

    match state.executor.run_job(payload.into_request(runtime_name)).await {
        Ok(result) => respond(StatusCode::OK, &result, jsonp),
        Err(e) => reject(job_rejection(&e), jsonp),
    }
}

/// Middleware - one access log line per request
pub async fn log_access(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request handled"
    );
    response
}

fn job_rejection(err: &JobError) -> Rejection {
    match (err, err.kind()) {
        (JobError::UnsupportedRuntime(_), _) => {
            Rejection::new(StatusCode::NOT_FOUND, "Unsupported runtimes")
        }
        (JobError::MissingSolution, _) => {
            Rejection::new(StatusCode::BAD_REQUEST, "A solution is required")
        }
        (_, ErrorKind::Unavailable) => {
            Rejection::new(StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down")
        }
        _ => Rejection::new(StatusCode::BAD_REQUEST, "Failed to run code"),
    }
}

fn payload_from_query(query: &HashMap<String, String>) -> Result<Vec<u8>, Rejection> {
    let raw = query
        .get(PAYLOAD_FIELD)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            Rejection::new(
                StatusCode::BAD_REQUEST,
                "jsonrequest missing from the query string",
            )
        })?;

    if raw.starts_with('{') {
        return Ok(raw.as_bytes().to_vec());
    }

    // An unescaped '+' in the query string arrives as a space.
    let encoded = raw.replace(' ', "+");
    general_purpose::STANDARD.decode(encoded).map_err(|_| {
        Rejection::new(
            StatusCode::BAD_REQUEST,
            "Failed to parse jsonrequest query string (expecting it plain, or alternate base64 encoded)",
        )
    })
}

async fn payload_from_body(request: Request) -> Result<Vec<u8>, Rejection> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    let payload = if is_json {
        axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
            .await
            .map(|body| body.to_vec())
            .map_err(|_| Rejection::new(StatusCode::BAD_REQUEST, "Failed to parse payload POST body"))?
    } else {
        Form::<PayloadForm>::from_request(request, &())
            .await
            .ok()
            .and_then(|Form(form)| form.jsonrequest)
            .map(String::into_bytes)
            .unwrap_or_default()
    };

    if payload.is_empty() {
        return Err(Rejection::new(StatusCode::BAD_REQUEST, "jsonrequest is missing"));
    }
    Ok(payload)
}

/// JSONP callback, honoured for GET requests only
fn callback(method: &Method, query: &HashMap<String, String>) -> Option<String> {
    if method != Method::GET {
        return None;
    }
    query
        .get(CALLBACK_FIELD)
        .filter(|name| !name.is_empty())
        .cloned()
}

fn reject(rejection: Rejection, callback: Option<String>) -> Response {
    let body = ErrorBody {
        errors: rejection.message.to_string(),
    };
    respond(rejection.status, &body, callback)
}

/// Encode `body` as JSON, or as `callback(json)` for JSONP.
fn respond<T: Serialize>(status: StatusCode, body: &T, callback: Option<String>) -> Response {
    let (status, json) = match serde_json::to_string(body) {
        Ok(json) => (status, json),
        Err(e) => {
            warn!(error = %e, "Failed to encode response");
            (StatusCode::INTERNAL_SERVER_ERROR, UNEXPECTED_ERROR.to_string())
        }
    };

    match callback {
        Some(name) => (
            status,
            [(header::CONTENT_TYPE, "application/javascript")],
            Bytes::from(format!("{}({})", name, json)),
        )
            .into_response(),
        None => (status, [(header::CONTENT_TYPE, "application/json")], json).into_response(),
    }
}
