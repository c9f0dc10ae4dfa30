// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! API client
//!
//! Every call resolves to an [`ApiResponse`]: transport failures, decode
//! failures and error statuses all land in the same `{data, error, status}`
//! shape, and nothing is retried.

mod mock;

pub use mock::{MockBackend, DEMO_PASSWORD};

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{
    Analysis, AnalyzeResponse, AuthPayload, BoundingBox, CreatedReport, EnrichedReport,
    FractureAnnotation, LoginCredentials, PatientInfo, RegisterCredentials, ReportDetail,
    TokenPayload, User,
};
use crate::upload::ImageUpload;
use crate::{RadioError, Result};

/// Uniform outcome of a backend call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub error: Option<String>,
    pub status: u16,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, status: u16) -> Self {
        Self {
            data: Some(data),
            error: None,
            status,
        }
    }

    pub fn failure(error: impl Into<String>, status: u16) -> Self {
        Self {
            data: None,
            error: Some(error.into()),
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.data.is_some() && self.error.is_none()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            data: self.data.map(f),
            error: self.error,
            status: self.status,
        }
    }

    pub fn into_result(self) -> Result<T> {
        match (self.data, self.error) {
            (Some(data), None) => Ok(data),
            (_, error) => Err(RadioError::Api {
                status: self.status,
                message: error.unwrap_or_else(|| "Unknown error".to_string()),
            }),
        }
    }
}

impl<T> From<RadioError> for ApiResponse<T> {
    fn from(e: RadioError) -> Self {
        Self::failure(e.to_string(), e.status_code())
    }
}

/// Account operations
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, credentials: &LoginCredentials) -> ApiResponse<AuthPayload>;

    async fn register(&self, credentials: &RegisterCredentials) -> ApiResponse<AuthPayload>;

    /// Exchange a still-valid token for a fresh one
    async fn refresh(&self, token: &str) -> ApiResponse<TokenPayload>;
}

/// Analysis history and uploads
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn list_analyses(&self, token: &str) -> ApiResponse<Vec<Analysis>>;

    async fn get_analysis(&self, token: &str, id: &str) -> ApiResponse<Analysis>;

    async fn get_annotations(&self, token: &str, id: &str) -> ApiResponse<Vec<FractureAnnotation>>;

    async fn upload_and_analyze(
        &self,
        token: &str,
        image: &ImageUpload,
        patient: &PatientInfo,
    ) -> ApiResponse<Analysis>;

    async fn delete_analysis(&self, token: &str, id: &str) -> ApiResponse<()>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// `{message}` bodies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

/// `POST /api/admin/doctors` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedDoctor {
    pub message: String,
    pub user: User,
}

/// Doctor account created by an admin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDoctor {
    pub full_name: String,
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hospital: Option<String>,
}

/// REST client for the RadioFracture API
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// `base_url` is the API root, e.g. `http://localhost:3000/api`
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_raw(&self, request: RequestBuilder, what: &str) -> std::result::Result<reqwest::Response, ApiResponse<()>> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Request to {} failed: {}", what, e);
                return Err(ApiResponse::failure(format!("Failed to {}: {}", what, e), 500));
            }
        };

        let status = response.status();
        debug!("{} -> {}", what, status);
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => format!("Failed to {}", what),
        };
        Err(ApiResponse::failure(message, status.as_u16()))
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> ApiResponse<T> {
        let response = match self.send_raw(request, what).await {
            Ok(response) => response,
            Err(failure) => return ApiResponse::failure(failure.error.unwrap_or_default(), failure.status),
        };
        let status = response.status().as_u16();
        match response.json::<T>().await {
            Ok(data) => ApiResponse::success(data, status),
            Err(e) => ApiResponse::failure(format!("Invalid response while trying to {}: {}", what, e), 500),
        }
    }

    async fn execute_empty(&self, request: RequestBuilder, what: &str) -> ApiResponse<()> {
        match self.send_raw(request, what).await {
            Ok(response) => ApiResponse::success((), response.status().as_u16()),
            Err(failure) => failure,
        }
    }

    fn image_part(image: &ImageUpload) -> Result<multipart::Part> {
        Ok(multipart::Part::bytes(image.bytes.clone())
            .file_name(image.filename.clone())
            .mime_str(&image.content_type)?)
    }

    /// `GET /api/test`
    pub async fn health(&self) -> ApiResponse<MessageBody> {
        self.execute(self.client.get(self.url("/test")), "reach the API").await
    }

    /// Patients the caller created
    pub async fn list_patients(&self, token: &str) -> ApiResponse<Vec<User>> {
        let request = self.client.get(self.url("/patients")).bearer_auth(token);
        self.execute(request, "fetch patients").await
    }

    /// Admin only
    pub async fn create_doctor(&self, token: &str, doctor: &NewDoctor) -> ApiResponse<CreatedDoctor> {
        let request = self.client.post(self.url("/admin/doctors")).bearer_auth(token).json(doctor);
        self.execute(request, "create doctor").await
    }

    /// Email the report's patient
    pub async fn notify_patient(&self, token: &str, report_id: &str) -> ApiResponse<MessageBody> {
        let request = self
            .client
            .post(self.url(&format!("/reports/{}/notify", report_id)))
            .bearer_auth(token);
        self.execute(request, "notify patient").await
    }

    /// Store a corrected annotation position
    pub async fn update_annotation(
        &self,
        token: &str,
        report_id: &str,
        annotation_id: &str,
        bounds: BoundingBox,
    ) -> ApiResponse<FractureAnnotation> {
        let request = self
            .client
            .put(self.url(&format!("/reports/{}/annotations/{}", report_id, annotation_id)))
            .bearer_auth(token)
            .json(&bounds);
        self.execute(request, "update annotation").await
    }

    /// Run detection without storing a report
    pub async fn analyze(&self, token: &str, image: &ImageUpload) -> ApiResponse<AnalyzeResponse> {
        let part = match Self::image_part(image) {
            Ok(part) => part,
            Err(e) => return e.into(),
        };
        let request = self
            .client
            .post(self.url("/analyze"))
            .bearer_auth(token)
            .multipart(multipart::Form::new().part("file", part));
        self.execute(request, "analyze image").await
    }

    /// Raw report detail
    pub async fn get_report(&self, token: &str, id: &str) -> ApiResponse<ReportDetail> {
        let request = self.client.get(self.url(&format!("/reports/{}", id))).bearer_auth(token);
        self.execute(request, "fetch analysis").await
    }
}

#[async_trait]
impl AuthBackend for ApiClient {
    async fn login(&self, credentials: &LoginCredentials) -> ApiResponse<AuthPayload> {
        let request = self.client.post(self.url("/auth/login")).json(credentials);
        self.execute(request, "log in").await
    }

    async fn register(&self, credentials: &RegisterCredentials) -> ApiResponse<AuthPayload> {
        let request = self.client.post(self.url("/auth/register")).json(credentials);
        self.execute(request, "register").await
    }

    async fn refresh(&self, token: &str) -> ApiResponse<TokenPayload> {
        let request = self.client.post(self.url("/auth/refresh")).bearer_auth(token);
        self.execute(request, "refresh session").await
    }
}

#[async_trait]
impl AnalysisBackend for ApiClient {
    async fn list_analyses(&self, token: &str) -> ApiResponse<Vec<Analysis>> {
        let request = self.client.get(self.url("/reports")).bearer_auth(token);
        self.execute::<Vec<EnrichedReport>>(request, "fetch analyses")
            .await
            .map(|reports| reports.iter().map(Analysis::from_report).collect())
    }

    async fn get_analysis(&self, token: &str, id: &str) -> ApiResponse<Analysis> {
        self.get_report(token, id).await.map(|detail| Analysis::from_detail(&detail))
    }

    async fn get_annotations(&self, token: &str, id: &str) -> ApiResponse<Vec<FractureAnnotation>> {
        self.get_report(token, id).await.map(|detail| detail.annotations)
    }

    async fn upload_and_analyze(
        &self,
        token: &str,
        image: &ImageUpload,
        patient: &PatientInfo,
    ) -> ApiResponse<Analysis> {
        let part = match Self::image_part(image) {
            Ok(part) => part,
            Err(e) => return e.into(),
        };
        let mut form = multipart::Form::new().part("image", part);
        if let Some(id) = &patient.existing_patient_id {
            form = form.text("existingPatientId", id.clone());
        } else {
            form = form
                .text("fullName", patient.full_name.clone())
                .text("email", patient.email.clone())
                .text("password", patient.password.clone());
            if let Some(age) = patient.age {
                form = form.text("age", age.to_string());
            }
            if let Some(phone) = &patient.phone_number {
                form = form.text("phoneNumber", phone.clone());
            }
            if let Some(notes) = &patient.notes {
                form = form.text("notes", notes.clone());
            }
        }

        let request = self.client.post(self.url("/reports/create")).bearer_auth(token).multipart(form);
        let patient_name = (!patient.full_name.is_empty()).then(|| patient.full_name.clone());
        self.execute::<CreatedReport>(request, "upload and analyze image")
            .await
            .map(|created| {
                let enriched = EnrichedReport {
                    report: created.report,
                    patient_name,
                    doctor_name: None,
                };
                let mut analysis = Analysis::from_report(&enriched);
                analysis.annotations = Some(created.annotations);
                analysis
            })
    }

    async fn delete_analysis(&self, token: &str, id: &str) -> ApiResponse<()> {
        let request = self.client.delete(self.url(&format!("/reports/{}", id))).bearer_auth(token);
        self.execute_empty(request, "delete analysis").await
    }
}

/// True for statuses that mean the token is no good
pub fn is_auth_failure(status: u16) -> bool {
    status == StatusCode::UNAUTHORIZED.as_u16()
}
