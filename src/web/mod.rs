// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! REST backend

pub mod error;
pub mod extract;
mod handlers;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::hash_password;
use crate::config::AppConfig;
use crate::db::Database;
use crate::inference::{self, FractureDetector};
use crate::mailer::{self, Mailer};
use crate::upload::UploadPolicy;
use crate::{RadioError, Result};

pub use error::ApiError;
pub use extract::AuthUser;

/// Room for multipart framing and text fields on top of the image itself
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub config: AppConfig,
    pub detector: Arc<dyn FractureDetector>,
    pub mailer: Arc<dyn Mailer>,
    pub upload_policy: UploadPolicy,
}

impl AppState {
    /// State with the detector and mailer the configuration names
    pub fn new(config: AppConfig, db: Database) -> Result<Self> {
        let detector: Arc<dyn FractureDetector> = Arc::from(inference::from_config(&config.analysis)?);
        let mailer: Arc<dyn Mailer> = Arc::from(mailer::from_config(&config.mail)?);
        Ok(Self::with_backends(config, db, detector, mailer))
    }

    pub fn with_backends(
        config: AppConfig,
        db: Database,
        detector: Arc<dyn FractureDetector>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let upload_policy = UploadPolicy::from(&config.upload);
        Self {
            db,
            config,
            detector,
            mailer,
            upload_policy,
        }
    }

    /// Create the configured admin account if it does not exist yet
    pub fn bootstrap_admin(&self) -> Result<bool> {
        let Some(admin) = &self.config.auth.bootstrap_admin else {
            return Ok(false);
        };
        let created = self
            .db
            .ensure_admin(&admin.full_name, &admin.email, &hash_password(&admin.password)?)?;
        if created {
            info!("Created admin account {}", admin.email);
        }
        Ok(created)
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.upload_policy.max_bytes + FORM_OVERHEAD_BYTES;

    let api = Router::new()
        .route("/test", get(handlers::health))
        // Auth
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh))
        // People
        .route("/patients", get(handlers::my_patients))
        .route("/admin/doctors", post(handlers::create_doctor))
        // Analysis and reports
        .route("/analyze", post(handlers::analyze))
        .route("/reports", get(handlers::list_reports))
        .route("/reports/create", post(handlers::create_report))
        .route("/reports/:id", get(handlers::get_report).delete(handlers::delete_report))
        .route(
            "/reports/:id/annotations/:annotation_id",
            put(handlers::update_annotation),
        )
        .route("/reports/:id/notify", post(handlers::notify_patient));

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on an already bound listener until ctrl-c
pub async fn serve_listener(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let router = create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RadioError::Config(format!("Server error: {}", e)))?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}

/// Start the API server with config and database
pub async fn start_server(config: AppConfig, db: Database) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, db)?);
    state.bootstrap_admin()?;

    let listener = TcpListener::bind(&addr).await?;
    info!(
        "API running at http://{}/api (detector: {}, mail: {})",
        addr,
        state.detector.name(),
        state.mailer.name()
    );

    serve_listener(listener, state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootstrapAdmin;
    use crate::inference::MockDetector;
    use crate::mailer::OutboxMailer;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const BOUNDARY: &str = "radiofracture-test-boundary";

    struct TestApp {
        router: Router,
        outbox: OutboxMailer,
        _dir: tempfile::TempDir,
    }

    fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let outbox_path = dir.path().join("outbox.jsonl");

        let mut config = AppConfig::default();
        config.auth.bootstrap_admin = Some(BootstrapAdmin {
            full_name: "Admin".into(),
            email: "admin@example.com".into(),
            password: "admin-password".into(),
        });

        let state = AppState::with_backends(
            config,
            Database::in_memory().unwrap(),
            Arc::new(MockDetector::new()),
            Arc::new(OutboxMailer::new(outbox_path.clone())),
        );
        assert!(state.bootstrap_admin().unwrap());
        assert!(!state.bootstrap_admin().unwrap());

        TestApp {
            router: create_router(Arc::new(state)),
            outbox: OutboxMailer::new(outbox_path),
            _dir: dir,
        }
    }

    async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn bare_request(method: Method, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    fn multipart_request(
        uri: &str,
        token: &str,
        file: Option<(&str, &str, &[u8])>,
        fields: &[(&str, &str)],
    ) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        if let Some((field, filename, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                    BOUNDARY, field, filename
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(body))
            .unwrap()
    }

    async fn register_doctor(app: &TestApp, email: &str) -> (String, String) {
        let (status, body) = send(
            app,
            json_request(
                Method::POST,
                "/api/auth/register",
                None,
                json!({"fullName": "Dr. Sarah Chen", "email": email, "password": "password123", "role": "doctor"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        (
            body["user"]["id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    async fn login(app: &TestApp, email: &str, password: &str) -> (StatusCode, Value) {
        send(
            app,
            json_request(
                Method::POST,
                "/api/auth/login",
                None,
                json!({"email": email, "password": password}),
            ),
        )
        .await
    }

    async fn create_report(app: &TestApp, token: &str) -> Value {
        let (status, body) = send(
            app,
            multipart_request(
                "/api/reports/create",
                token,
                Some(("image", "wrist.png", b"not really a png")),
                &[
                    ("fullName", "Alex Johnson"),
                    ("email", "alex@example.com"),
                    ("password", "patient-pass"),
                    ("age", "34"),
                ],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let request = Request::builder().uri("/api/test").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "API is working!");
    }

    #[tokio::test]
    async fn test_register_rules() {
        let app = test_app();
        let (_, token) = register_doctor(&app, "doc@example.com").await;
        assert!(!token.is_empty());

        let dup = json!({"fullName": "Other", "email": "DOC@example.com", "password": "password123", "role": "radiologist"});
        let (status, body) = send(&app, json_request(Method::POST, "/api/auth/register", None, dup)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "User with this email already exists");

        let admin = json!({"fullName": "Boss", "email": "boss@example.com", "password": "password123", "role": "chef"});
        let (status, _) = send(&app, json_request(Method::POST, "/api/auth/register", None, admin)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let orphan = json!({"fullName": "Pat", "email": "pat@example.com", "password": "password123", "role": "patient"});
        let (status, body) = send(&app, json_request(Method::POST, "/api/auth/register", None, orphan)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "createdBy is required for patients");

        let short = json!({"fullName": "Pat", "email": "p2@example.com", "password": "short", "role": "doctor"});
        let (status, _) = send(&app, json_request(Method::POST, "/api/auth/register", None, short)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login() {
        let app = test_app();
        register_doctor(&app, "doc@example.com").await;

        let (status, body) = login(&app, "doc@example.com", "wrong-password").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid email or password");

        let (status, _) = login(&app, "nobody@example.com", "password123").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = login(&app, "doc@example.com", "password123").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["role"], "doctor");
        assert!(body["user"].get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn test_protected_routes_need_token() {
        let app = test_app();
        let request = Request::builder().uri("/api/reports").body(Body::empty()).unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, bare_request(Method::GET, "/api/reports", "garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh() {
        let app = test_app();
        let (_, token) = register_doctor(&app, "doc@example.com").await;
        let (status, body) = send(&app, bare_request(Method::POST, "/api/auth/refresh", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_report_lifecycle() {
        let app = test_app();
        let (doctor_id, token) = register_doctor(&app, "doc@example.com").await;
        let (_, other) = register_doctor(&app, "other@example.com").await;

        let created = create_report(&app, &token).await;
        assert_eq!(created["analysis"]["type"], "Distal radius fracture");
        assert_eq!(created["report"]["recoveryDays"], 18);
        assert_eq!(created["report"]["doctorId"], doctor_id.as_str());
        let report_id = created["report"]["id"].as_str().unwrap().to_string();
        let annotation_id = created["annotations"][0]["id"].as_str().unwrap().to_string();

        // The new patient shows up under the doctor and can sign in
        let (_, patients) = send(&app, bare_request(Method::GET, "/api/patients", &token)).await;
        assert_eq!(patients.as_array().unwrap().len(), 1);
        let (status, patient_login) = login(&app, "alex@example.com", "patient-pass").await;
        assert_eq!(status, StatusCode::OK);
        let patient_token = patient_login["token"].as_str().unwrap().to_string();

        // Listing is role-scoped
        let (_, mine) = send(&app, bare_request(Method::GET, "/api/reports", &token)).await;
        assert_eq!(mine.as_array().unwrap().len(), 1);
        assert_eq!(mine[0]["patientName"], "Alex Johnson");
        let (_, theirs) = send(&app, bare_request(Method::GET, "/api/reports", &other)).await;
        assert!(theirs.as_array().unwrap().is_empty());
        let (_, own) = send(&app, bare_request(Method::GET, "/api/reports", &patient_token)).await;
        assert_eq!(own.as_array().unwrap().len(), 1);

        let detail_uri = format!("/api/reports/{}", report_id);
        let (status, detail) = send(&app, bare_request(Method::GET, &detail_uri, &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["recoveryTime"], "18 days");
        assert_eq!(detail["patient"]["fullName"], "Alex Johnson");
        assert_eq!(detail["annotations"].as_array().unwrap().len(), 1);
        let (status, _) = send(&app, bare_request(Method::GET, &detail_uri, &patient_token)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, bare_request(Method::GET, &detail_uri, &other)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Correcting an annotation keeps the detector's placement
        let edit_uri = format!("/api/reports/{}/annotations/{}", report_id, annotation_id);
        let moved = json!({"x": 130.0, "y": 160.0, "width": 60.0, "height": 40.0});
        let (status, _) = send(&app, json_request(Method::PUT, &edit_uri, Some(other.as_str()), moved.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, annotation) = send(&app, json_request(Method::PUT, &edit_uri, Some(token.as_str()), moved)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(annotation["corrected"], true);
        assert_eq!(annotation["x"], 130.0);
        assert_eq!(annotation["originalCoordinates"]["x"], 120.0);

        let (status, _) = send(&app, bare_request(Method::DELETE, &detail_uri, &other)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = send(&app, bare_request(Method::DELETE, &detail_uri, &token)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);
        let (status, body) = send(&app, bare_request(Method::GET, &detail_uri, &token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Report not found");
    }

    #[tokio::test]
    async fn test_create_report_validation() {
        let app = test_app();
        let (_, token) = register_doctor(&app, "doc@example.com").await;

        let (status, body) = send(
            &app,
            multipart_request("/api/reports/create", &token, None, &[("existingPatientId", "x")]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Image file is required");

        let (status, body) = send(
            &app,
            multipart_request(
                "/api/reports/create",
                &token,
                Some(("image", "notes.txt", b"hello")),
                &[("existingPatientId", "x")],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Please upload an image file");

        let (status, body) = send(
            &app,
            multipart_request(
                "/api/reports/create",
                &token,
                Some(("image", "wrist.png", b"bytes")),
                &[("existingPatientId", "missing")],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Patient not found");
    }

    #[tokio::test]
    async fn test_analyze_endpoint() {
        let app = test_app();
        let (_, token) = register_doctor(&app, "doc@example.com").await;

        let (status, body) = send(
            &app,
            multipart_request("/api/analyze", &token, Some(("file", "wrist.jpg", b"jpeg")), &[]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["detected"], true);
        assert_eq!(body["confidence"], 0.94);

        let (status, body) = send(&app, multipart_request("/api/analyze", &token, None, &[])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image file provided");
    }

    #[tokio::test]
    async fn test_notify_patient() {
        let app = test_app();
        let (_, token) = register_doctor(&app, "doc@example.com").await;
        let created = create_report(&app, &token).await;
        let uri = format!("/api/reports/{}/notify", created["report"]["id"].as_str().unwrap());

        let (_, patient) = login(&app, "alex@example.com", "patient-pass").await;
        let patient_token = patient["token"].as_str().unwrap();
        let (status, _) = send(&app, bare_request(Method::POST, &uri, patient_token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app, bare_request(Method::POST, &uri, &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Notification email sent successfully");

        let sent = app.outbox.read_all().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].email.to, "alex@example.com");
        assert!(sent[0].email.html.contains("Distal radius fracture"));

        let (status, _) = send(&app, bare_request(Method::POST, "/api/reports/nope/notify", &token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_creates_doctors() {
        let app = test_app();
        let (_, admin) = login(&app, "admin@example.com", "admin-password").await;
        let admin_token = admin["token"].as_str().unwrap().to_string();
        assert_eq!(admin["user"]["role"], "admin");

        let doctor = json!({"fullName": "Dr. New", "email": "new@example.com", "password": "password123", "hospital": "General"});
        let (status, body) = send(
            &app,
            json_request(Method::POST, "/api/admin/doctors", Some(admin_token.as_str()), doctor.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["role"], "doctor");
        assert_eq!(body["user"]["hospital"], "General");

        let (_, doctor_token) = register_doctor(&app, "doc@example.com").await;
        let (status, body) = send(
            &app,
            json_request(Method::POST, "/api/admin/doctors", Some(doctor_token.as_str()), doctor),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Admin access required");
    }
}
