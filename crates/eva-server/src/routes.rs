//! HTTP surface over the session runner.
//!
//! The API is a thin adapter: request bodies are parsed with the same
//! schema validation embedded use gets, outputs are returned verbatim,
//! and no handler holds state beyond the shared runner. Audit reads are
//! gated by a bearer token when one is configured.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use eva_core::{DecisionRecord, ThresholdProfile};
use eva_runtime::{RuntimeError, SessionRunner};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<SessionRunner>,

    /// Token required on audit reads; `None` leaves them open
    pub audit_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/validate", post(validate))
        .route("/validate/batch", post(validate_batch))
        .route("/audit/{reference}", get(audit))
        .route("/audit/{reference}/ack", post(acknowledge))
        .route("/audit/verify", get(verify))
        .route("/config", put(update_config).get(get_config))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiError { error: message.into() })).into_response()
}

async fn validate(State(state): State<AppState>, body: String) -> Response {
    let decision = match DecisionRecord::from_json(&body) {
        Ok(decision) => decision,
        Err(e) => {
            warn!(%e, "rejected validation request");
            return error(StatusCode::BAD_REQUEST, e.to_string());
        }
    };
    Json(state.runner.validate(decision).await).into_response()
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    decisions: Vec<serde_json::Value>,
}

async fn validate_batch(State(state): State<AppState>, body: String) -> Response {
    let request: BatchRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => return error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let mut decisions = Vec::with_capacity(request.decisions.len());
    for (index, value) in request.decisions.iter().enumerate() {
        let raw = value.to_string();
        match DecisionRecord::from_json(&raw) {
            Ok(decision) => decisions.push(decision),
            Err(e) => {
                return error(
                    StatusCode::BAD_REQUEST,
                    format!("decision at index {}: {}", index, e),
                )
            }
        }
    }

    match state.runner.validate_batch(decisions).await {
        Ok(outputs) => Json(outputs).into_response(),
        Err(RuntimeError::BatchTooLarge { size, max }) => error(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("batch of {} exceeds limit {}", size, max),
        ),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.audit_token else {
        return true;
    };
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

async fn audit(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers) {
        return error(StatusCode::UNAUTHORIZED, "audit token required");
    }
    match state.runner.audit_record(&reference).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => error(StatusCode::NOT_FOUND, format!("no record {}", reference)),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct AckResponse {
    acknowledged: bool,
}

async fn acknowledge(State(state): State<AppState>, Path(reference): Path<String>) -> Response {
    Json(AckResponse {
        acknowledged: state.runner.acknowledge(&reference),
    })
    .into_response()
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    records: usize,
    intact: bool,
}

async fn verify(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return error(StatusCode::UNAUTHORIZED, "audit token required");
    }
    match state.runner.verify_chain().await {
        Ok(records) => Json(VerifyResponse {
            records,
            intact: true,
        })
        .into_response(),
        Err(e) => error(StatusCode::CONFLICT, e.to_string()),
    }
}

/// Exactly one of the fields selects the operation.
#[derive(Debug, Deserialize)]
struct ConfigUpdate {
    #[serde(default)]
    preset: Option<String>,

    #[serde(default)]
    profile: Option<ThresholdProfile>,

    #[serde(default)]
    rollback_to: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ConfigResponse {
    profile: String,
    version: u32,
}

async fn update_config(State(state): State<AppState>, Json(update): Json<ConfigUpdate>) -> Response {
    let result = match (update.preset, update.profile, update.rollback_to) {
        (Some(preset), None, None) => state.runner.activate_profile_preset(&preset),
        (None, Some(profile), None) => state.runner.update_profile(profile),
        (None, None, Some(version)) => state.runner.rollback_profile(version),
        _ => {
            return error(
                StatusCode::BAD_REQUEST,
                "exactly one of preset, profile, rollback_to is required",
            )
        }
    };

    match result {
        Ok(version) => {
            let active = state.runner.active_profile();
            Json(ConfigResponse {
                profile: active.name,
                version,
            })
            .into_response()
        }
        Err(e) => error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}

async fn get_config(State(state): State<AppState>) -> Response {
    Json(state.runner.active_profile()).into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    Json(state.runner.health()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use eva_runtime::{MemoryCorpusStore, RuntimeConfig};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(audit_token: Option<&str>) -> Router {
        let runner = Arc::new(
            SessionRunner::new(RuntimeConfig::default(), Arc::new(MemoryCorpusStore::new()))
                .unwrap(),
        );
        router(AppState {
            runner,
            audit_token: audit_token.map(String::from),
        })
    }

    fn decision_body() -> String {
        serde_json::json!({
            "id": "api-1",
            "timestamp": "2026-03-01T10:00:00Z",
            "decision_text": "Approve the routine access request.",
            "confidence": 0.9,
            "context": {
                "domain": "operations",
                "stakeholders": [{"group": "staff", "vulnerable": false}],
                "environment": "production",
                "ethical_dimensions": ["fairness"],
                "consequence_scope": {"breadth": "individual", "reversible": true}
            }
        })
        .to_string()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validate_round_trip() {
        let app = app(None);
        let response = app
            .oneshot(
                Request::post("/validate")
                    .header("content-type", "application/json")
                    .body(Body::from(decision_body()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "VALIDATED");
        assert!(json["audit_reference"].as_str().unwrap().starts_with("EVA-"));
    }

    #[tokio::test]
    async fn test_malformed_decision_is_rejected() {
        let app = app(None);
        let response = app
            .oneshot(
                Request::post("/validate")
                    .body(Body::from(r#"{"id": "broken"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_audit_requires_token() {
        let app = app(Some("secret"));

        let denied = app
            .clone()
            .oneshot(Request::get("/audit/EVA-missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = app
            .oneshot(
                Request::get("/audit/EVA-missing")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_config_update_and_health() {
        let app = app(None);

        let response = app
            .clone()
            .oneshot(
                Request::put("/config")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"preset": "medical"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["version"], 2);

        let health = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(health).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["profile_version"], 2);
    }

    #[tokio::test]
    async fn test_batch_endpoint() {
        let app = app(None);
        let body = format!(r#"{{"decisions": [{}, {}]}}"#, decision_body(), decision_body());
        let response = app
            .oneshot(
                Request::post("/validate/batch")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 2);
    }
}
