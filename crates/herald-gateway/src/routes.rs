//! API route handlers for the gateway.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use herald_core::{DeliveryEvent, HeraldError, NewNotification, NotificationStatus, Participant};

use super::server::AppState;

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

/// Map a Herald error to an HTTP status + the `{"ok": false}` envelope.
fn error_response(e: HeraldError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        HeraldError::Validation(_) => StatusCode::BAD_REQUEST,
        HeraldError::InvalidState(_) => StatusCode::CONFLICT,
        HeraldError::NoRecipients => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({"ok": false, "error": e.to_string(), "kind": e.kind()})),
    )
}

fn not_found(what: &str, id: i64) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"ok": false, "error": format!("{what} {id} not found")})),
    )
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "service": "herald-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Create a scheduled notification.
pub async fn create_notification(
    State(state): State<Arc<AppState>>,
    Json(def): Json<NewNotification>,
) -> ApiResult {
    let id = state.db.create_notification(&def).map_err(error_response)?;
    Ok(Json(json!({"ok": true, "id": id})))
}

#[derive(Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

/// Paginated notification list, newest first.
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(s) => Some(NotificationStatus::parse_str(s).ok_or_else(|| {
            error_response(HeraldError::Validation(format!("unknown status '{s}'")))
        })?),
    };
    let notifications = state
        .db
        .list_notifications(status, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .map_err(error_response)?;
    Ok(Json(json!({
        "ok": true,
        "count": notifications.len(),
        "notifications": notifications,
    })))
}

/// Notification detail.
pub async fn get_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult {
    match state.db.get_notification(id).map_err(error_response)? {
        Some(n) => Ok(Json(json!({"ok": true, "notification": n}))),
        None => Err(not_found("notification", id)),
    }
}

/// Cancel a pending notification.
pub async fn cancel_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult {
    state.db.cancel_notification(id).map_err(error_response)?;
    Ok(Json(json!({"ok": true})))
}

/// Delete a pending notification.
pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult {
    state.db.delete_notification(id).map_err(error_response)?;
    Ok(Json(json!({"ok": true})))
}

/// Delivery counters for one notification.
pub async fn notification_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult {
    if state.db.get_notification(id).map_err(error_response)?.is_none() {
        return Err(not_found("notification", id));
    }
    let stats = state.db.summarize(id).map_err(error_response)?;
    Ok(Json(json!({"ok": true, "stats": stats})))
}

/// Per-recipient delivery detail.
pub async fn notification_recipients(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult {
    if state.db.get_notification(id).map_err(error_response)?.is_none() {
        return Err(not_found("notification", id));
    }
    let entries = state.db.ledger_entries(id).map_err(error_response)?;
    Ok(Json(json!({
        "ok": true,
        "count": entries.len(),
        "recipients": entries,
    })))
}

/// Re-attempt delivery for the failed recipients of a notification.
pub async fn resend_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult {
    let status = state.engine.resend(id).await.map_err(error_response)?;
    Ok(Json(json!({"ok": true, "status": status.as_str()})))
}

#[derive(Deserialize)]
pub struct DeliveryEventRequest {
    entry_id: i64,
    #[serde(flatten)]
    event: DeliveryEvent,
}

/// Inbound delivery receipt from the messaging platform. Out-of-order and
/// duplicate receipts are acknowledged but not applied.
pub async fn delivery_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeliveryEventRequest>,
) -> ApiResult {
    let applied = state
        .db
        .record_delivery_event(req.entry_id, &req.event)
        .map_err(error_response)?;
    Ok(Json(json!({"ok": true, "applied": applied})))
}

/// Directory upsert — registration flows push participants here.
pub async fn upsert_participant(
    State(state): State<Arc<AppState>>,
    Json(participant): Json<Participant>,
) -> ApiResult {
    state
        .db
        .upsert_participant(&participant)
        .map_err(error_response)?;
    Ok(Json(json!({"ok": true, "id": participant.id})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{Duration, Utc};
    use tower::ServiceExt;

    use herald_core::{
        DeliveryChannel, DispatchConfig, NotificationType, Recipient, RecipientRule, Result,
        SendOutcome,
    };
    use herald_engine::DispatchEngine;
    use herald_store::HeraldDb;

    struct OkChannel;

    #[async_trait]
    impl DeliveryChannel for OkChannel {
        fn name(&self) -> &str {
            "ok"
        }
        async fn send(&self, _handle: &str, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    fn test_app() -> (Arc<HeraldDb>, axum::Router) {
        let db = Arc::new(HeraldDb::open_in_memory().unwrap());
        let engine = Arc::new(DispatchEngine::new(
            db.clone(),
            Arc::new(OkChannel),
            &DispatchConfig::default(),
        ));
        let state = AppState {
            db: db.clone(),
            engine,
            start_time: std::time::Instant::now(),
        };
        (db, crate::server::build_router(state))
    }

    async fn request(
        app: &axum::Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(v) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            json!(null)
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn create_body(minutes_ahead: i64) -> serde_json::Value {
        json!({
            "event_id": 7,
            "notification_type": "event_reminder",
            "message_template": "Training at 18:00",
            "scheduled_at": (Utc::now() + Duration::minutes(minutes_ahead)).to_rfc3339(),
            "rule": {"kind": "all"},
        })
    }

    #[tokio::test]
    async fn test_health() {
        let (_db, app) = test_app();
        let (status, body) = request(&app, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["service"], "herald-gateway");
    }

    #[tokio::test]
    async fn test_create_get_and_list() {
        let (_db, app) = test_app();
        let (status, body) =
            request(&app, "POST", "/api/v1/notifications", Some(create_body(30))).await;
        assert_eq!(status, StatusCode::OK);
        let id = body["id"].as_i64().unwrap();

        let (status, body) =
            request(&app, "GET", &format!("/api/v1/notifications/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["notification"]["status"], "pending");

        let (status, body) =
            request(&app, "GET", "/api/v1/notifications?status=pending", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (status, _) = request(&app, "GET", "/api/v1/notifications/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_validation_maps_to_400() {
        let (_db, app) = test_app();
        let (status, body) =
            request(&app, "POST", "/api/v1/notifications", Some(create_body(-120))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
        assert_eq!(body["kind"], "validation");

        let mut empty_list = create_body(30);
        empty_list["rule"] = json!({"kind": "explicit_list", "ids": []});
        let (status, _) = request(&app, "POST", "/api/v1/notifications", Some(empty_list)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_conflict_maps_to_409() {
        let (_db, app) = test_app();
        let (_, body) =
            request(&app, "POST", "/api/v1/notifications", Some(create_body(30))).await;
        let id = body["id"].as_i64().unwrap();

        let (status, _) = request(
            &app,
            "POST",
            &format!("/api/v1/notifications/{id}/cancel"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = request(
            &app,
            "POST",
            &format!("/api/v1/notifications/{id}/cancel"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "invalid_state");
    }

    #[tokio::test]
    async fn test_delivery_event_and_stats() {
        let (db, app) = test_app();
        let (_, body) =
            request(&app, "POST", "/api/v1/notifications", Some(create_body(30))).await;
        let id = body["id"].as_i64().unwrap();

        db.materialize(
            id,
            &[
                Recipient { participant_id: Some(1), external_handle: "chat-1".into() },
                Recipient { participant_id: Some(2), external_handle: "chat-2".into() },
            ],
        )
        .unwrap();
        let entries = db.ledger_entries(id).unwrap();
        db.record_outcome(entries[0].id, &SendOutcome::Sent).unwrap();

        // Receipt for the sent entry applies
        let (status, body) = request(
            &app,
            "POST",
            "/api/v1/delivery-events",
            Some(json!({"entry_id": entries[0].id, "kind": "read"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["applied"], true);

        // Receipt for a never-sent entry is acknowledged but not applied
        let (status, body) = request(
            &app,
            "POST",
            "/api/v1/delivery-events",
            Some(json!({"entry_id": entries[1].id, "kind": "responded", "text": "yes"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["applied"], false);

        let (status, body) = request(
            &app,
            "GET",
            &format!("/api/v1/notifications/{id}/stats"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["total"], 2);
        assert_eq!(body["stats"]["read"], 1);

        let (status, body) = request(
            &app,
            "GET",
            &format!("/api/v1/notifications/{id}/recipients"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_resend_wrong_state_maps_to_409() {
        let (_db, app) = test_app();
        let (_, body) =
            request(&app, "POST", "/api/v1/notifications", Some(create_body(30))).await;
        let id = body["id"].as_i64().unwrap();

        let (status, _) = request(
            &app,
            "POST",
            &format!("/api/v1/notifications/{id}/resend"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_participant_upsert() {
        let (db, app) = test_app();
        let (status, body) = request(
            &app,
            "POST",
            "/api/v1/participants",
            Some(json!({
                "id": 5,
                "organization_id": 10,
                "display_name": "Alex",
                "external_handle": "chat-5",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], 5);
        assert!(db.get_participant(5).unwrap().is_some());
    }
}
