//! Web服务器

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::auth::{auth_middleware, get_current_user, login_handler};
use crate::handlers::{
    admin, api_root, attendance, clinic, documents, health, inventory, metrics, queue, registry,
};
use crate::realtime::ws_handler;
use crate::state::AppState;

/// 路由层选项
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// 为空时允许任意来源
    pub cors_origins: Vec<String>,
    pub body_limit_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            body_limit_bytes: 20 * 1024 * 1024,
        }
    }
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState, options: &ServerOptions) -> Self {
        Self {
            addr,
            app: build_router(state, options),
        }
    }

    /// 运行直到 `shutdown` 完成，已建立的连接处理完后退出
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start web server: {}", e))?;

        info!("Web server stopped");
        Ok(())
    }
}

/// 组装完整路由
pub fn build_router(state: AppState, options: &ServerOptions) -> Router {
    // 显示屏接口在认证层之后注册，不需要 token
    let api = api_routes()
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .route("/queue/board/:polyclinic_id", get(queue::board));

    Router::new()
        .route("/", get(api_root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/auth/login", post(login_handler))
        .route("/ws", get(ws_handler))
        .nest("/api/v1", api)
        .layer(middleware::from_fn_with_state(state.clone(), track_http))
        .layer(DefaultBodyLimit::max(options.body_limit_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&options.cors_origins)),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

async fn track_http(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let response = next.run(request).await;
    if let Some(metrics) = &state.metrics {
        metrics.record_http_request(&method, response.status().as_u16());
    }
    response
}

/// API v1 路由（需要认证）
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(api_root))
        .route("/auth/me", get(get_current_user))
        // 挂号
        .route(
            "/patients",
            get(registry::search_patients).post(registry::register_patient),
        )
        .route(
            "/patients/:id",
            get(registry::get_patient).put(registry::update_patient),
        )
        .route(
            "/polyclinics",
            get(registry::list_polyclinics).post(registry::create_polyclinic),
        )
        .route(
            "/polyclinics/:id",
            get(registry::get_polyclinic).put(registry::update_polyclinic),
        )
        .route(
            "/doctors",
            get(registry::list_doctors).post(registry::create_doctor),
        )
        .route("/doctors/:id", get(registry::get_doctor))
        // 排队
        .route(
            "/queue/tickets",
            get(queue::list_tickets).post(queue::take_number),
        )
        .route("/queue/tickets/:id", get(queue::get_ticket))
        .route("/queue/tickets/:id/call", post(queue::call_ticket))
        .route("/queue/tickets/:id/recall", post(queue::recall_ticket))
        .route("/queue/tickets/:id/serve", post(queue::serve_ticket))
        .route("/queue/tickets/:id/complete", post(queue::complete_ticket))
        .route("/queue/tickets/:id/skip", post(queue::skip_ticket))
        .route("/queue/call-next", post(queue::call_next))
        // 库存
        .route(
            "/stock/items",
            get(inventory::list_items).post(inventory::create_item),
        )
        .route(
            "/stock/items/:id",
            get(inventory::get_item).put(inventory::update_item),
        )
        .route("/stock/items/:id/receive", post(inventory::receive))
        .route("/stock/items/:id/adjust", post(inventory::adjust))
        .route("/stock/items/:id/correct", post(inventory::correct))
        .route("/stock/items/:id/batches", get(inventory::batches))
        .route("/stock/movements", get(inventory::movements))
        .route(
            "/opnames",
            get(inventory::list_opnames).post(inventory::create_opname),
        )
        .route("/opnames/:id", get(inventory::get_opname))
        .route("/opnames/:id/start", post(inventory::start_opname))
        .route("/opnames/:id/counts", post(inventory::record_count))
        .route("/opnames/:id/complete", post(inventory::complete_opname))
        .route("/opnames/:id/cancel", post(inventory::cancel_opname))
        // 处方
        .route(
            "/prescriptions",
            get(clinic::list_prescriptions).post(clinic::create_prescription),
        )
        .route("/prescriptions/:id", get(clinic::get_prescription))
        .route("/prescriptions/:id/dispense", post(clinic::dispense))
        .route("/prescriptions/:id/cancel", post(clinic::cancel))
        .route("/medical-records", get(clinic::medical_records))
        // 文档
        .route(
            "/folders",
            get(documents::list_folders).post(documents::create_folder),
        )
        .route(
            "/folders/:id",
            get(documents::get_folder)
                .put(documents::rename_folder)
                .delete(documents::delete_folder),
        )
        .route(
            "/folders/:id/rules",
            get(documents::folder_rules).put(documents::set_folder_rules),
        )
        .route(
            "/documents",
            get(documents::list_documents).post(documents::upload),
        )
        .route(
            "/documents/:id",
            get(documents::get_document)
                .put(documents::update_document)
                .delete(documents::delete_document),
        )
        .route("/documents/:id/content", get(documents::download))
        .route(
            "/documents/:id/rules",
            get(documents::document_rules).put(documents::set_document_rules),
        )
        .route("/documents/:id/logs", get(documents::access_logs))
        // 考勤
        .route("/attendance", get(attendance::list_attendance))
        .route("/attendance/check-in", post(attendance::check_in))
        .route("/attendance/check-out", post(attendance::check_out))
        .route(
            "/leaves",
            get(attendance::list_leaves).post(attendance::request_leave),
        )
        .route("/leaves/:id", get(attendance::get_leave))
        .route("/leaves/:id/approve", post(attendance::approve_leave))
        .route("/leaves/:id/reject", post(attendance::reject_leave))
        .route("/leaves/:id/cancel", post(attendance::cancel_leave))
        // 管理
        .route(
            "/access/grants",
            get(admin::list_grants)
                .post(admin::grant)
                .delete(admin::revoke),
        )
        .route("/access/matrix", get(admin::matrix))
        .route("/roles", get(admin::list_roles).post(admin::create_role))
        .route("/roles/:name", axum::routing::delete(admin::delete_role))
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/users/:id",
            get(admin::get_user).put(admin::update_user),
        )
        .route("/users/:id/password", put(admin::set_password))
        .route("/users/:id/deactivate", post(admin::deactivate_user))
        .route(
            "/webhooks",
            get(admin::list_webhooks).post(admin::create_webhook),
        )
        .route("/webhooks/:id", axum::routing::delete(admin::delete_webhook))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthSettings;
    use crate::state::Stores;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request as HttpRequest, StatusCode},
    };
    use chrono::NaiveTime;
    use serde_json::{json, Value};
    use simrs_admin::Metrics;
    use simrs_core::{utils::fixed_offset, GeoPoint};
    use simrs_integration::EventHub;
    use simrs_storage::DocumentStorage;
    use simrs_workflow::AttendancePolicy;
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let offset = fixed_offset(7).unwrap();
        let policy = AttendancePolicy {
            geofence_enabled: false,
            center: GeoPoint {
                latitude: -6.2,
                longitude: 106.8,
            },
            radius_meters: 100.0,
            work_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            grace_minutes: 15,
            offset,
        };
        let state = AppState::new(
            Stores::in_memory(),
            EventHub::new(64),
            offset,
            policy,
            DocumentStorage::in_memory(1024),
            AuthSettings::new("test-secret", 60),
        )
        .with_metrics(Metrics::new().unwrap());

        state.roles.seed().await.unwrap();
        state.access.seed_defaults().await.unwrap();
        state
            .users
            .bootstrap_admin("admin", "admin-password")
            .await
            .unwrap();

        build_router(state, &ServerOptions::default())
    }

    async fn send(app: &Router, request: HttpRequest<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let (status, bytes) = send(app, request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn login(app: &Router, username: &str, password: &str) -> String {
        let (status, body) = send_json(
            app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": username, "password": password })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    async fn create_polyclinic(app: &Router, token: &str, code: &str) -> String {
        let (status, body) = send_json(
            app,
            "POST",
            "/api/v1/polyclinics",
            Some(token),
            Some(json!({ "code": code, "name": "Poli Umum" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = test_app().await;
        let (status, body) = send_json(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_api_requires_token() {
        let app = test_app().await;
        let (status, body) = send_json(&app, "GET", "/api/v1/patients", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], true);

        let (status, _) =
            send_json(&app, "GET", "/api/v1/patients", Some("not-a-token"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let app = test_app().await;
        let (status, _) = send_json(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "admin", "password": "wrong-password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_registration_to_board_flow() {
        let app = test_app().await;
        let token = login(&app, "admin", "admin-password").await;
        let poli = create_polyclinic(&app, &token, "PU").await;

        let (status, patient) = send_json(
            &app,
            "POST",
            "/api/v1/patients",
            Some(&token),
            Some(json!({ "name": "Budi Santoso" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, ticket) = send_json(
            &app,
            "POST",
            "/api/v1/queue/tickets",
            Some(&token),
            Some(json!({ "polyclinic_id": poli, "patient_id": patient["id"] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(ticket["code"], "PU-001");
        assert_eq!(ticket["status"], "waiting");

        let (status, called) = send_json(
            &app,
            "POST",
            "/api/v1/queue/call-next",
            Some(&token),
            Some(json!({ "polyclinic_id": poli })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(called["id"], ticket["id"]);
        assert_eq!(called["status"], "called");

        let uri = format!("/api/v1/queue/board/{}", poli);
        let (status, board) = send_json(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(board["current"]["code"], "PU-001");
        assert_eq!(board["waiting"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_invalid_transition_is_conflict() {
        let app = test_app().await;
        let token = login(&app, "admin", "admin-password").await;
        let poli = create_polyclinic(&app, &token, "GG").await;

        let (_, ticket) = send_json(
            &app,
            "POST",
            "/api/v1/queue/tickets",
            Some(&token),
            Some(json!({ "polyclinic_id": poli })),
        )
        .await;
        let id = ticket["id"].as_str().unwrap();

        let (status, _) = send_json(
            &app,
            "POST",
            &format!("/api/v1/queue/tickets/{}/call", id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send_json(
            &app,
            "POST",
            &format!("/api/v1/queue/tickets/{}/complete", id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], 409);
    }

    #[tokio::test]
    async fn test_feature_grants_are_enforced() {
        let app = test_app().await;
        let token = login(&app, "admin", "admin-password").await;

        let (status, _) = send_json(
            &app,
            "POST",
            "/api/v1/users",
            Some(&token),
            Some(json!({
                "username": "staff1",
                "full_name": "Staf Satu",
                "role": "staff",
                "password": "staff-password"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let staff = login(&app, "staff1", "staff-password").await;
        let (status, _) = send_json(&app, "GET", "/api/v1/stock/items", Some(&staff), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, me) = send_json(&app, "GET", "/api/v1/auth/me", Some(&staff), None).await;
        assert_eq!(status, StatusCode::OK);
        let features: Vec<&str> = me["features"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|f| f.as_str())
            .collect();
        assert!(features.contains(&"documents:read"));
        assert!(!features.contains(&"stock:read"));
    }

    #[tokio::test]
    async fn test_document_upload_and_download() {
        let app = test_app().await;
        let token = login(&app, "admin", "admin-password").await;

        let upload = HttpRequest::builder()
            .method("POST")
            .uri("/api/v1/documents?file_name=hasil-lab.txt&title=Hasil%20Lab")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hemoglobin 13.5 g/dL"))
            .unwrap();
        let (status, body) = send(&app, upload).await;
        assert_eq!(status, StatusCode::CREATED);
        let document: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(document["mime_type"], "text/plain");

        let download = HttpRequest::builder()
            .uri(format!(
                "/api/v1/documents/{}/content",
                document["id"].as_str().unwrap()
            ))
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(download).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let content = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&content[..], b"hemoglobin 13.5 g/dL");
    }

    #[tokio::test]
    async fn test_metrics_are_exposed() {
        let app = test_app().await;
        send_json(&app, "GET", "/health", None, None).await;

        let request = HttpRequest::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("simrs_http_requests_total"));
    }
}
