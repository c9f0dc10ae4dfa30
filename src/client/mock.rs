// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! In-memory demo backend

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::{AnalysisBackend, ApiResponse, AuthBackend};
use crate::auth::{decode_unverified, issue_token, verify_token};
use crate::inference::{DEMO_BOX, DEMO_CONFIDENCE, DEMO_FRACTURE};
use crate::db::new_id;
use crate::models::{
    Analysis, AuthPayload, FractureAnnotation, LoginCredentials, PatientInfo, RegisterCredentials,
    Role, TokenPayload, User,
};
use crate::upload::ImageUpload;

/// Password for both demo accounts
pub const DEMO_PASSWORD: &str = "password123";

const MOCK_SECRET: &str = "radiofracture-demo-backend";
const MOCK_TOKEN_HOURS: i64 = 1;
const DEMO_NOTES: &str = "Clean break, good alignment";

struct Account {
    user: User,
    password: String,
}

/// Answers every call from memory after an artificial delay
pub struct MockBackend {
    delay: Duration,
    accounts: Mutex<Vec<Account>>,
    analyses: Mutex<Vec<Analysis>>,
}

fn demo_user(id: &str, name: &str, email: &str, role: Role, specialty: &str, hospital: &str) -> Account {
    Account {
        user: User {
            id: id.to_string(),
            full_name: name.to_string(),
            email: email.to_string(),
            role,
            created_by: None,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap_or_default(),
            age: None,
            phone_number: None,
            notes: None,
            specialty: Some(specialty.to_string()),
            hospital: Some(hospital.to_string()),
        },
        password: DEMO_PASSWORD.to_string(),
    }
}

fn demo_annotation(id: &str) -> FractureAnnotation {
    FractureAnnotation {
        id: id.to_string(),
        x: DEMO_BOX.x,
        y: DEMO_BOX.y,
        width: DEMO_BOX.width,
        height: DEMO_BOX.height,
        fracture_type: DEMO_FRACTURE.to_string(),
        confidence: DEMO_CONFIDENCE,
        corrected: false,
        original_coordinates: None,
    }
}

fn demo_analysis() -> Analysis {
    Analysis {
        id: "1".to_string(),
        user_id: "1".to_string(),
        patient_id: Some("P12345".to_string()),
        patient_name: Some("Alex Johnson".to_string()),
        image_url: String::new(),
        annotated_image_url: String::new(),
        original_filename: "wrist_xray.jpg".to_string(),
        upload_date: Utc.with_ymd_and_hms(2025, 1, 15, 9, 30, 0).single().unwrap_or_default(),
        processed_date: Utc.with_ymd_and_hms(2025, 1, 15, 9, 32, 10).single().unwrap_or_default(),
        fracture_type: Some(DEMO_FRACTURE.to_string()),
        fracture_location: Some("Right wrist".to_string()),
        recovery_time_days: Some(42),
        confidence: DEMO_CONFIDENCE,
        notes: DEMO_NOTES.to_string(),
        suspected_fracture: false,
        annotations: Some(vec![demo_annotation("a1")]),
    }
}

impl MockBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            accounts: Mutex::new(vec![
                demo_user("1", "Dr. John Smith", "doctor@example.com", Role::Doctor, "Orthopedics", "Central Hospital"),
                demo_user(
                    "2",
                    "Dr. Emily Johnson",
                    "radiologist@example.com",
                    Role::Radiologist,
                    "Diagnostic Radiology",
                    "Medical Center",
                ),
            ]),
            analyses: Mutex::new(vec![demo_analysis()]),
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, ApiResponse<()>> {
        mutex
            .lock()
            .map_err(|_| ApiResponse::failure("Mock backend state poisoned", 500))
    }

    fn payload_for(user: &User) -> ApiResponse<AuthPayload> {
        match issue_token(user, MOCK_SECRET, MOCK_TOKEN_HOURS) {
            Ok(token) => ApiResponse::success(AuthPayload { user: user.clone(), token }, 200),
            Err(e) => e.into(),
        }
    }

    /// Id of the signed-in caller, or the 401 the real API would give
    fn caller(token: &str) -> Result<String, ApiResponse<()>> {
        verify_token(token, MOCK_SECRET)
            .map(|claims| claims.user_id)
            .map_err(|_| ApiResponse::failure("Invalid or expired token", 401))
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(Duration::from_millis(800))
    }
}

fn relay<T, U>(failure: ApiResponse<U>) -> ApiResponse<T> {
    ApiResponse {
        data: None,
        error: failure.error,
        status: failure.status,
    }
}

#[async_trait]
impl AuthBackend for MockBackend {
    async fn login(&self, credentials: &LoginCredentials) -> ApiResponse<AuthPayload> {
        self.pause().await;
        let accounts = match Self::lock(&self.accounts) {
            Ok(accounts) => accounts,
            Err(failure) => return relay(failure),
        };
        match accounts.iter().find(|a| a.user.email == credentials.email) {
            Some(account) if account.password == credentials.password => Self::payload_for(&account.user),
            _ => ApiResponse::failure("Invalid email or password", 401),
        }
    }

    async fn register(&self, credentials: &RegisterCredentials) -> ApiResponse<AuthPayload> {
        self.pause().await;
        let mut accounts = match Self::lock(&self.accounts) {
            Ok(accounts) => accounts,
            Err(failure) => return relay(failure),
        };
        if accounts.iter().any(|a| a.user.email == credentials.email) {
            return ApiResponse::failure("User with this email already exists", 409);
        }

        let user = User {
            id: (accounts.len() + 1).to_string(),
            full_name: credentials.full_name.clone(),
            email: credentials.email.clone(),
            role: credentials.role,
            created_by: None,
            created_at: Utc::now(),
            age: None,
            phone_number: None,
            notes: None,
            specialty: credentials.specialty.clone(),
            hospital: credentials.hospital.clone(),
        };
        accounts.push(Account {
            user: user.clone(),
            password: credentials.password.clone(),
        });
        debug!("Mock registered {}", user.email);

        let mut response = Self::payload_for(&user);
        if response.is_success() {
            response.status = 201;
        }
        response
    }

    async fn refresh(&self, token: &str) -> ApiResponse<TokenPayload> {
        self.pause().await;
        let claims = match decode_unverified(token) {
            Ok(claims) if !claims.is_expired() => claims,
            _ => return ApiResponse::failure("Invalid or expired token", 401),
        };
        let accounts = match Self::lock(&self.accounts) {
            Ok(accounts) => accounts,
            Err(failure) => return relay(failure),
        };
        match accounts.iter().find(|a| a.user.id == claims.user_id) {
            Some(account) => Self::payload_for(&account.user).map(|p| TokenPayload { token: p.token }),
            None => ApiResponse::failure("Invalid or expired token", 401),
        }
    }
}

#[async_trait]
impl AnalysisBackend for MockBackend {
    async fn list_analyses(&self, token: &str) -> ApiResponse<Vec<Analysis>> {
        self.pause().await;
        let caller = match Self::caller(token) {
            Ok(caller) => caller,
            Err(failure) => return relay(failure),
        };
        let analyses = match Self::lock(&self.analyses) {
            Ok(analyses) => analyses,
            Err(failure) => return relay(failure),
        };
        let mine = analyses
            .iter()
            .filter(|a| a.user_id == caller)
            .cloned()
            .collect();
        ApiResponse::success(mine, 200)
    }

    async fn get_analysis(&self, token: &str, id: &str) -> ApiResponse<Analysis> {
        self.pause().await;
        if let Err(failure) = Self::caller(token) {
            return relay(failure);
        }
        let analyses = match Self::lock(&self.analyses) {
            Ok(analyses) => analyses,
            Err(failure) => return relay(failure),
        };
        match analyses.iter().find(|a| a.id == id) {
            Some(analysis) => ApiResponse::success(analysis.clone(), 200),
            None => ApiResponse::failure("Analysis not found", 404),
        }
    }

    async fn get_annotations(&self, token: &str, id: &str) -> ApiResponse<Vec<FractureAnnotation>> {
        self.get_analysis(token, id)
            .await
            .map(|analysis| analysis.annotations.unwrap_or_default())
    }

    async fn upload_and_analyze(
        &self,
        token: &str,
        image: &ImageUpload,
        patient: &PatientInfo,
    ) -> ApiResponse<Analysis> {
        self.pause().await;
        let caller = match Self::caller(token) {
            Ok(caller) => caller,
            Err(failure) => return relay(failure),
        };
        let now = Utc::now();
        let id = new_id();
        let preview = image.data_url();
        let analysis = Analysis {
            id: id.clone(),
            user_id: caller,
            patient_id: patient.existing_patient_id.clone(),
            patient_name: (!patient.full_name.is_empty()).then(|| patient.full_name.clone()),
            image_url: preview.clone(),
            annotated_image_url: preview,
            original_filename: image.filename.clone(),
            upload_date: now,
            processed_date: now,
            fracture_type: Some(DEMO_FRACTURE.to_string()),
            fracture_location: Some("Right wrist".to_string()),
            recovery_time_days: Some(42),
            confidence: DEMO_CONFIDENCE,
            notes: patient.notes.clone().unwrap_or_else(|| DEMO_NOTES.to_string()),
            suspected_fracture: false,
            annotations: Some(vec![demo_annotation(&format!("a{}", id))]),
        };

        let mut analyses = match Self::lock(&self.analyses) {
            Ok(analyses) => analyses,
            Err(failure) => return relay(failure),
        };
        analyses.push(analysis.clone());
        ApiResponse::success(analysis, 201)
    }

    async fn delete_analysis(&self, token: &str, id: &str) -> ApiResponse<()> {
        self.pause().await;
        if let Err(failure) = Self::caller(token) {
            return failure;
        }
        let mut analyses = match Self::lock(&self.analyses) {
            Ok(analyses) => analyses,
            Err(failure) => return failure,
        };
        let before = analyses.len();
        analyses.retain(|a| a.id != id);
        if analyses.len() == before {
            ApiResponse::failure("Analysis not found", 404)
        } else {
            ApiResponse::success((), 204)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::UploadPolicy;

    fn backend() -> MockBackend {
        MockBackend::new(Duration::ZERO)
    }

    fn credentials(email: &str, password: &str) -> LoginCredentials {
        LoginCredentials {
            email: email.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn test_login_demo_users() {
        let backend = backend();
        let response = backend.login(&credentials("doctor@example.com", DEMO_PASSWORD)).await;
        assert_eq!(response.status, 200);
        let payload = response.data.unwrap();
        assert_eq!(payload.user.role, Role::Doctor);
        assert_eq!(decode_unverified(&payload.token).unwrap().user_id, "1");
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let response = backend().login(&credentials("doctor@example.com", "wrong")).await;
        assert_eq!(response.status, 401);
        assert_eq!(response.error.as_deref(), Some("Invalid email or password"));
        assert!(response.data.is_none());
    }

    #[tokio::test]
    async fn test_register_duplicate() {
        let backend = backend();
        let creds = RegisterCredentials {
            full_name: "Dr. New".into(),
            email: "new@example.com".into(),
            password: "password123".into(),
            role: Role::Radiologist,
            created_by: None,
            specialty: None,
            hospital: None,
        };
        assert_eq!(backend.register(&creds).await.status, 201);
        assert_eq!(backend.register(&creds).await.status, 409);
        assert!(backend.login(&credentials("new@example.com", "password123")).await.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_artificial_delay() {
        let backend = MockBackend::new(Duration::from_millis(800));
        let started = tokio::time::Instant::now();
        backend.list_analyses("").await;
        assert!(started.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_upload_then_list_and_delete() {
        let backend = backend();
        let token = backend
            .login(&credentials("doctor@example.com", DEMO_PASSWORD))
            .await
            .data
            .unwrap()
            .token;
        let image = ImageUpload::from_bytes("ankle.png", vec![1, 2, 3], &UploadPolicy::default()).unwrap();
        let patient = PatientInfo {
            full_name: "Maria Garcia".into(),
            ..Default::default()
        };

        let created = backend.upload_and_analyze(&token, &image, &patient).await;
        assert_eq!(created.status, 201);
        let created = created.data.unwrap();
        assert!(created.image_url.starts_with("data:image/png;base64,"));
        assert_eq!(created.notes, DEMO_NOTES);

        let listed = backend.list_analyses(&token).await.data.unwrap();
        assert_eq!(listed.len(), 2);

        let annotations = backend.get_annotations(&token, &created.id).await.data.unwrap();
        assert_eq!(annotations[0].bounds(), DEMO_BOX);

        assert_eq!(backend.delete_analysis(&token, &created.id).await.status, 204);
        assert_eq!(backend.get_analysis(&token, &created.id).await.status, 404);
    }

    #[tokio::test]
    async fn test_back_to_back_uploads_get_distinct_ids() {
        let backend = backend();
        let token = backend
            .login(&credentials("doctor@example.com", DEMO_PASSWORD))
            .await
            .data
            .unwrap()
            .token;
        let image = ImageUpload::from_bytes("hand.png", vec![1, 2, 3], &UploadPolicy::default()).unwrap();
        let patient = PatientInfo::default();

        let first = backend.upload_and_analyze(&token, &image, &patient).await.data.unwrap();
        let second = backend.upload_and_analyze(&token, &image, &patient).await.data.unwrap();
        assert_ne!(first.id, second.id);

        assert_eq!(backend.delete_analysis(&token, &first.id).await.status, 204);
        let remaining = backend.list_analyses(&token).await.data.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().any(|a| a.id == second.id));
    }

    #[tokio::test]
    async fn test_analysis_calls_need_a_valid_token() {
        let backend = backend();
        for token in ["", "garbage"] {
            let listed = backend.list_analyses(token).await;
            assert_eq!(listed.status, 401);
            assert!(listed.data.is_none());
            assert_eq!(backend.get_analysis(token, "1").await.status, 401);
            assert_eq!(backend.delete_analysis(token, "1").await.status, 401);
        }

        let image = ImageUpload::from_bytes("hand.png", vec![1, 2, 3], &UploadPolicy::default()).unwrap();
        let upload = backend.upload_and_analyze("garbage", &image, &PatientInfo::default()).await;
        assert_eq!(upload.status, 401);

        let doctor = backend
            .login(&credentials("doctor@example.com", DEMO_PASSWORD))
            .await
            .data
            .unwrap();
        let forged = issue_token(&doctor.user, "some-other-signing-key", 1).unwrap();
        assert_eq!(backend.list_analyses(&forged).await.status, 401);
        assert_eq!(backend.list_analyses(&doctor.token).await.data.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_rejects_garbage() {
        let response = backend().refresh("garbage").await;
        assert_eq!(response.status, 401);
    }
}
