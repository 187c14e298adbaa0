use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Build the application router with all routes
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        // Health routes
        .route("/api/health", get(handlers::health::healthcheck))
        .route("/api/health/ready", get(handlers::health::readiness))
        // Device routes
        .route(
            "/api/devices",
            get(handlers::devices::list_devices).post(handlers::devices::create_device),
        )
        .route(
            "/api/devices/:id",
            get(handlers::devices::get_device)
                .put(handlers::devices::update_device)
                .delete(handlers::devices::delete_device),
        )
        .route("/api/devices/:id/baseline", put(handlers::devices::set_baseline))
        .route("/api/devices/:id/status", put(handlers::devices::update_status))
        .route("/api/devices/:id/deviations", get(handlers::devices::list_deviations))
        .route("/api/test/connectivity", post(handlers::devices::test_connectivity))
        // Batch routes
        .route("/api/batch-config", post(handlers::batches::submit_batch))
        .route("/api/batch-config/:id", get(handlers::batches::get_batch))
        .route("/api/batch-config/:id/jobs", get(handlers::batches::list_batch_jobs))
        .route("/api/batch-config/:id/cancel", post(handlers::batches::cancel_batch))
        // Single-device routes
        .route("/api/config/retrieve", post(handlers::config_ops::retrieve_config))
        .route("/api/config/push", post(handlers::config_ops::push_config))
        // Backup routes
        .route(
            "/api/backups",
            get(handlers::backups::list_backups).post(handlers::backups::save_backup),
        )
        .route(
            "/api/backups/:id",
            get(handlers::backups::get_backup).delete(handlers::backups::delete_backup),
        )
        .route("/api/backups/:id/deviation", get(handlers::backups::check_deviation))
        // Template routes
        .route(
            "/api/templates",
            get(handlers::templates::list_templates).post(handlers::templates::create_template),
        )
        .route("/api/templates/:name", get(handlers::templates::get_template))
        .route("/api/templates/:name/preview", post(handlers::templates::preview_template))
        // Activity log
        .route("/api/events", get(handlers::events::list_events))
        // WebSocket route
        .route("/api/ws", get(crate::ws_upgrade_handler))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::adapters::simulated::SimulatedConnector;
    use crate::adapters::{AdapterSet, Connector};
    use crate::backup::BackupService;
    use crate::config::Config;
    use crate::db::temp_store;
    use crate::jobs::{Dispatcher, DispatcherSettings};
    use crate::render::Renderer;

    async fn app() -> (Router, tempfile::TempDir) {
        let (store, dir) = temp_store().await;
        let mut config = Config::load();
        config.retry_backoff = std::time::Duration::from_millis(1);
        let lab = SimulatedConnector::default();
        lab.set_unreachable("R19", true);
        let connector: Arc<dyn Connector> = Arc::new(lab);
        let dispatcher = Dispatcher::new(
            store.clone(),
            AdapterSet::new(connector.clone()),
            config.credential_provider(),
            DispatcherSettings::from_config(&config),
            None,
        );
        let state = Arc::new(AppState {
            renderer: Renderer::new(store.clone()),
            backups: BackupService::new(store.clone()),
            connector,
            store,
            config,
            dispatcher,
            ws_hub: None,
        });
        (build(state), dir)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_and_readiness() {
        let (app, _dir) = app().await;
        let (status, body) = call(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(&app, "GET", "/api/health/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active_batches"], 0);
    }

    #[tokio::test]
    async fn test_device_registry_errors() {
        let (app, _dir) = app().await;

        let (status, body) = call(&app, "GET", "/api/devices", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 6);

        let dup = json!({"hostname": "R15", "management_address": "10.0.0.9"});
        let (status, body) = call(&app, "POST", "/api/devices", Some(dup)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("R15"));

        let bad_port = json!({"hostname": "R30", "management_address": "10.0.0.9", "port": 70000});
        let (status, _) = call(&app, "POST", "/api/devices", Some(bad_port)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, "GET", "/api/devices/404", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "PUT", "/api/devices/1", Some(json!({"hostname": "R16"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_batch_lifecycle() {
        let (app, _dir) = app().await;

        let req = json!({"device_ids": [1, 2, 3], "command": "show running-config", "method": "netmiko"});
        let (status, body) = call(&app, "POST", "/api/batch-config", Some(req)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let batch_id = body["batch_id"].as_str().unwrap().to_string();

        let mut summary = Value::Null;
        for _ in 0..200 {
            let (status, body) = call(&app, "GET", &format!("/api/batch-config/{}", batch_id), None).await;
            assert_eq!(status, StatusCode::OK);
            if body["in_progress"] == 0 && body["state"] != "running" {
                summary = body;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(summary["succeeded"], 3);
        assert_eq!(summary["per_device"].as_object().unwrap().len(), 3);

        let (status, jobs) = call(&app, "GET", &format!("/api/batch-config/{}/jobs", batch_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(jobs.as_array().unwrap().len(), 3);

        let (status, _) = call(&app, "POST", &format!("/api/batch-config/{}/cancel", batch_id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, backups) = call(&app, "GET", "/api/backups?device=R16", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(backups.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_validation_errors() {
        let (app, _dir) = app().await;

        let missing = json!({"device_ids": [1], "template": "static_route", "params": {"prefix": "10.1.0.0"}});
        let (status, body) = call(&app, "POST", "/api/batch-config", Some(missing)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing parameter: mask");

        let unknown = json!({"device_ids": [1], "template": "no_such_template"});
        let (status, _) = call(&app, "POST", "/api/batch-config", Some(unknown)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let bad_method = json!({"device_ids": [1], "command": "show clock", "method": "telnet"});
        let (status, _) = call(&app, "POST", "/api/batch-config", Some(bad_method)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let no_device = json!({"device_ids": [77], "command": "show clock"});
        let (status, _) = call(&app, "POST", "/api/batch-config", Some(no_device)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "POST", "/api/batch-config/nope/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_single_device_push_then_retrieve() {
        let (app, _dir) = app().await;

        let push = json!({"device": "R18", "commands": ["ntp server 10.0.0.5"], "method": "napalm"});
        let (status, body) = call(&app, "POST", "/api/config/push", Some(push)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "succeeded");
        assert!(body["output"].as_str().unwrap().contains("+ntp server 10.0.0.5"));

        let retrieve = json!({"device": "4", "command": "show running-config"});
        let (status, body) = call(&app, "POST", "/api/config/retrieve", Some(retrieve)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["output"].as_str().unwrap().contains("ntp server 10.0.0.5"));

        let dry = json!({"device": "R18", "commands": ["vlan 5"], "validate_only": true});
        let (status, body) = call(&app, "POST", "/api/config/push", Some(dry)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "failed");
        assert_eq!(body["error_kind"], "validation_unsupported");

        let (status, _) = call(&app, "POST", "/api/config/retrieve", Some(json!({"device": "R99", "command": "show clock"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_templates_and_preview() {
        let (app, _dir) = app().await;

        let (status, list) = call(&app, "GET", "/api/templates", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 7);

        let preview = json!({"params": {"prefix": "10.2.0.0", "mask": "255.255.0.0", "next_hop": "10.0.0.1"}});
        let (status, body) = call(&app, "POST", "/api/templates/static_route/preview", Some(preview)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["output"], "ip route 10.2.0.0 255.255.0.0 10.0.0.1");
        assert_eq!(body["placeholders"], json!(["prefix", "mask", "next_hop"]));

        let create = json!({"name": "ntp", "body": "ntp server {{ server }}"});
        let (status, _) = call(&app, "POST", "/api/templates", Some(create.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = call(&app, "POST", "/api/templates", Some(create)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let broken = json!({"name": "broken", "body": "{% if x %}"});
        let (status, _) = call(&app, "POST", "/api/templates", Some(broken)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_manual_backup_and_deviation() {
        let (app, _dir) = app().await;

        let save = json!({"device": "R20", "command": "show running-config", "content": "hostname R20\nntp server 1.1.1.1"});
        let (status, base) = call(&app, "POST", "/api/backups", Some(save)).await;
        assert_eq!(status, StatusCode::CREATED);
        let base_id = base["id"].as_i64().unwrap();

        let (status, _) = call(&app, "PUT", "/api/devices/6/baseline", Some(json!({"backup_id": base_id}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "PUT", "/api/devices/5/baseline", Some(json!({"backup_id": base_id}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let save = json!({"device": "R20", "command": "show running-config", "content": "hostname R20\ninterface Gi0/2\n shutdown\nntp server 1.1.1.1"});
        let (_, current) = call(&app, "POST", "/api/backups", Some(save)).await;

        let uri = format!("/api/backups/{}/deviation", current["id"].as_i64().unwrap());
        let (status, report) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["severity"], "critical");
        assert_eq!(report["added"], json!(["interface Gi0/2", "shutdown"]));

        let (status, _) = call(&app, "DELETE", &format!("/api/backups/{}", base_id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "GET", &format!("/api/backups/{}", base_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, events) = call(&app, "GET", "/api/events?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!events.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deviation_history_route() {
        let (app, _dir) = app().await;

        let save = json!({"device": "R17", "command": "show running-config", "content": "hostname R17"});
        let (_, base) = call(&app, "POST", "/api/backups", Some(save)).await;
        let body = json!({"backup_id": base["id"]});
        let (status, _) = call(&app, "PUT", "/api/devices/3/baseline", Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let save = json!({"device": "R17", "command": "show running-config", "content": "hostname R17\nroute-map EDGE permit 10"});
        let (_, current) = call(&app, "POST", "/api/backups", Some(save)).await;
        let uri = format!("/api/backups/{}/deviation", current["id"].as_i64().unwrap());
        let (status, _) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, history) = call(&app, "GET", "/api/devices/3/deviations", None).await;
        assert_eq!(status, StatusCode::OK);
        let history = history.as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["severity"], "critical");
        assert_eq!(history[0]["backup_id"], current["id"]);
        assert_eq!(history[0]["added"], 1);

        let (status, _) = call(&app, "GET", "/api/devices/404/deviations", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_override_route() {
        let (app, _dir) = app().await;

        let (status, device) = call(&app, "PUT", "/api/devices/2/status", Some(json!({"status": "Offline"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(device["status"], "offline");

        let (status, body) = call(&app, "PUT", "/api/devices/2/status", Some(json!({"status": "flapping"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("online, offline, unknown"));

        let (status, _) = call(&app, "PUT", "/api/devices/404/status", Some(json!({"status": "online"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_connectivity_route() {
        let (app, _dir) = app().await;

        let body = json!({"devices": ["R15", "R19", "R42"]});
        let (status, report) = call(&app, "POST", "/api/test/connectivity", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["results"]["R15"], json!({"status": "online", "error": null}));
        assert_eq!(report["results"]["R19"]["status"], "offline");
        assert_eq!(report["results"]["R42"]["status"], "unknown");

        let (status, report) = call(&app, "POST", "/api/test/connectivity", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["results"].as_object().unwrap().len(), 6);
    }
}
