// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! REST handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{json_body, ApiError};
use super::extract::{AuthUser, UploadForm};
use super::AppState;
use crate::auth::{hash_password, issue_token, validate_new_account, verify_password};
use crate::client::{CreatedDoctor, MessageBody, NewDoctor};
use crate::db::{new_id, NewUser, ReportScope};
use crate::inference::annotations_from;
use crate::mailer::render_report_notification;
use crate::models::{
    AuthPayload, BoundingBox, CreatedReport, EnrichedReport, FractureAnnotation, LoginCredentials,
    Report, ReportDetail, Role, TokenPayload, User,
};
use crate::upload::ImageUpload;
use crate::RadioError;

type ApiResult<T> = Result<T, ApiError>;

fn message(text: &str) -> Json<MessageBody> {
    Json(MessageBody { message: text.to_string() })
}

fn token_for(state: &AppState, user: &User) -> ApiResult<String> {
    Ok(issue_token(user, &state.config.auth.jwt_secret, state.config.auth.token_ttl_hours)?)
}

fn report_or_404(state: &AppState, id: &str) -> ApiResult<Report> {
    state
        .db
        .get_report(id)?
        .ok_or_else(|| RadioError::NotFound("Report not found".to_string()).into())
}

pub async fn health() -> Json<MessageBody> {
    message("API is working!")
}

// === Auth ===

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterRequest {
    full_name: String,
    email: String,
    password: String,
    role: Option<String>,
    created_by: Option<String>,
    specialty: Option<String>,
    hospital: Option<String>,
    age: Option<u32>,
    phone_number: Option<String>,
    notes: Option<String>,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let req = json_body(payload)?;
    validate_new_account(&req.full_name, &req.email, &req.password)?;

    let role: Role = req
        .role
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| RadioError::Validation("Role is required".to_string()))?
        .parse()?;
    if role == Role::Admin {
        return Err(RadioError::Validation("Admin accounts cannot be self-registered".to_string()).into());
    }

    let created_by = match (role, req.created_by.as_deref().filter(|c| !c.is_empty())) {
        (Role::Patient, None) => {
            return Err(RadioError::Validation("createdBy is required for patients".to_string()).into())
        }
        (_, Some(creator)) => {
            if state.db.get_user(creator)?.is_none() {
                return Err(RadioError::Validation("Invalid creator ID".to_string()).into());
            }
            Some(creator.to_string())
        }
        (_, None) => None,
    };

    let user = state.db.insert_user(&NewUser {
        full_name: req.full_name,
        email: req.email,
        password_hash: hash_password(&req.password)?,
        role: Some(role),
        created_by,
        age: req.age,
        phone_number: req.phone_number,
        notes: req.notes,
        specialty: req.specialty,
        hospital: req.hospital,
    })?;
    let token = token_for(&state, &user)?;
    info!("Registered {} as {}", user.email, user.role);

    Ok((StatusCode::CREATED, Json(AuthPayload { user, token })))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginCredentials>, JsonRejection>,
) -> ApiResult<Json<AuthPayload>> {
    let credentials = json_body(payload)?;
    if credentials.email.trim().is_empty() || credentials.password.is_empty() {
        return Err(RadioError::Validation("Email and password are required".to_string()).into());
    }

    let invalid = || ApiError(RadioError::Unauthorized("Invalid email or password".to_string()));
    let (user, hash) = state.db.find_user_by_email(&credentials.email)?.ok_or_else(invalid)?;
    if !verify_password(&credentials.password, &hash) {
        warn!("Failed login for {}", credentials.email.trim());
        return Err(invalid());
    }

    let token = token_for(&state, &user)?;
    info!("{} logged in", user.email);
    Ok(Json(AuthPayload { user, token }))
}

pub async fn refresh(State(state): State<Arc<AppState>>, caller: AuthUser) -> ApiResult<Json<TokenPayload>> {
    let user = state
        .db
        .get_user(caller.id())?
        .ok_or_else(|| RadioError::Unauthorized("User no longer exists".to_string()))?;
    Ok(Json(TokenPayload { token: token_for(&state, &user)? }))
}

// === People ===

pub async fn my_patients(State(state): State<Arc<AppState>>, caller: AuthUser) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.db.patients_created_by(caller.id())?))
}

pub async fn create_doctor(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    payload: Result<Json<NewDoctor>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    caller.require(&[Role::Admin], "Admin access required")?;
    let doctor = json_body(payload)?;
    validate_new_account(&doctor.full_name, &doctor.email, &doctor.password)?;

    let user = state.db.insert_user(&NewUser {
        full_name: doctor.full_name,
        email: doctor.email,
        password_hash: hash_password(&doctor.password)?,
        role: Some(Role::Doctor),
        created_by: Some(caller.id().to_string()),
        specialty: doctor.specialty,
        hospital: doctor.hospital,
        ..Default::default()
    })?;
    info!("Admin {} created doctor {}", caller.0.email, user.email);

    Ok((
        StatusCode::CREATED,
        Json(CreatedDoctor {
            message: "Doctor created successfully".to_string(),
            user,
        }),
    ))
}

// === Analysis ===

pub async fn analyze(
    State(state): State<Arc<AppState>>,
    _caller: AuthUser,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let form = UploadForm::read(multipart, "file", &state.upload_policy.too_large_message()).await?;
    let (filename, bytes) = form
        .file
        .ok_or_else(|| RadioError::Validation("No image file provided".to_string()))?;
    let image = ImageUpload::from_bytes(&filename, bytes, &state.upload_policy)?;

    let result = state.detector.analyze(&image).await?;
    Ok(Json(result))
}

/// Who a new report belongs to, settled before detection runs
enum PatientPlan {
    Existing(User),
    New(NewUser),
}

fn plan_patient(state: &AppState, form: &UploadForm, caller: &AuthUser) -> ApiResult<PatientPlan> {
    if let Some(id) = form.text("existingPatientId") {
        return match state.db.get_user(id)? {
            Some(user) if user.role == Role::Patient => Ok(PatientPlan::Existing(user)),
            _ => Err(RadioError::NotFound("Patient not found".to_string()).into()),
        };
    }

    let (Some(full_name), Some(email)) = (form.text("fullName"), form.text("email")) else {
        return Err(RadioError::Validation("Patient name and email are required".to_string()).into());
    };
    if !email.contains('@') {
        return Err(RadioError::Validation("Invalid email address".to_string()).into());
    }
    let age = match form.text("age") {
        Some(raw) => Some(
            raw.parse::<u32>()
                .map_err(|_| RadioError::Validation("Invalid age".to_string()))?,
        ),
        None => None,
    };
    // Without a password the patient record exists but cannot sign in
    let password_hash = match form.text("password") {
        Some(password) => hash_password(password)?,
        None => String::new(),
    };

    Ok(PatientPlan::New(NewUser {
        full_name: full_name.to_string(),
        email: email.to_string(),
        password_hash,
        role: Some(Role::Patient),
        created_by: Some(caller.id().to_string()),
        age,
        phone_number: form.text("phoneNumber").map(str::to_string),
        notes: form.text("notes").map(str::to_string),
        ..Default::default()
    }))
}

pub async fn create_report(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    caller.require(
        &[Role::Doctor, Role::Radiologist, Role::Admin],
        "Only clinicians can create reports",
    )?;
    let mut form = UploadForm::read(multipart, "image", &state.upload_policy.too_large_message()).await?;
    let (filename, bytes) = form
        .file
        .take()
        .ok_or_else(|| RadioError::Validation("Image file is required".to_string()))?;
    let image = ImageUpload::from_bytes(&filename, bytes, &state.upload_policy)?;
    let plan = plan_patient(&state, &form, &caller)?;

    let hash = image.hash();
    if let Some(previous) = state.db.find_report_by_hash(&hash)? {
        info!("{} was already analysed in report {}", image.filename, previous);
    }

    let analysis = state.detector.analyze(&image).await?;

    let patient = match plan {
        PatientPlan::Existing(user) => user,
        PatientPlan::New(new_user) => state.db.insert_user(&new_user)?,
    };

    let report = Report {
        id: new_id(),
        patient_id: patient.id.clone(),
        doctor_id: caller.id().to_string(),
        image_name: image.filename.clone(),
        image_hash: Some(hash),
        annotated_image: analysis.image_base64.clone(),
        fracture_type: analysis
            .fracture_type
            .clone()
            .filter(|t| analysis.detected && !t.is_empty()),
        recovery_days: analysis.recovery_time,
        confidence: analysis.confidence,
        notes: form.text("notes").map(str::to_string),
        created_at: Utc::now(),
    };
    state.db.insert_report(&report)?;

    let annotations = annotations_from(&analysis);
    for annotation in &annotations {
        state.db.insert_annotation(&report.id, annotation)?;
    }
    info!(
        "Report {} for {} created by {} ({} annotations)",
        report.id,
        patient.full_name,
        caller.0.email,
        annotations.len()
    );

    Ok((
        StatusCode::CREATED,
        Json(CreatedReport { analysis, report, annotations }),
    ))
}

// === Reports ===

pub async fn list_reports(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> ApiResult<Json<Vec<EnrichedReport>>> {
    let scope = ReportScope::for_role(caller.role(), caller.id());
    Ok(Json(state.db.list_reports(&scope)?))
}

pub async fn get_report(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ReportDetail>> {
    let report = report_or_404(&state, &id)?;
    let allowed = caller.role() == Role::Admin
        || report.doctor_id == caller.id()
        || report.patient_id == caller.id();
    if !allowed {
        return Err(RadioError::Forbidden("You are not authorized to view this report".to_string()).into());
    }

    Ok(Json(ReportDetail {
        patient: state.db.get_user(&report.patient_id)?,
        doctor: state.db.get_user(&report.doctor_id)?,
        annotations: state.db.list_annotations(&report.id)?,
        recovery_time: report.recovery_time(),
        id: report.id,
        image_name: report.image_name,
        annotated_image: report.annotated_image,
        fracture_type: report.fracture_type,
        recovery_days: report.recovery_days,
        confidence: report.confidence,
        notes: report.notes,
        created_at: report.created_at,
    }))
}

pub async fn delete_report(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let report = report_or_404(&state, &id)?;
    if report.doctor_id != caller.id() {
        return Err(RadioError::Forbidden("You are not authorized to delete this report".to_string()).into());
    }
    state.db.delete_report(&id)?;
    info!("Report {} deleted by {}", id, caller.0.email);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_annotation(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path((report_id, annotation_id)): Path<(String, String)>,
    payload: Result<Json<BoundingBox>, JsonRejection>,
) -> ApiResult<Json<FractureAnnotation>> {
    let bounds = json_body(payload)?;
    let report = report_or_404(&state, &report_id)?;
    if report.doctor_id != caller.id() {
        return Err(RadioError::Forbidden("You are not authorized to edit this report".to_string()).into());
    }

    let finite = [bounds.x, bounds.y, bounds.width, bounds.height].iter().all(|v| v.is_finite());
    if !finite || bounds.width <= 0.0 || bounds.height <= 0.0 {
        return Err(RadioError::Validation("Invalid annotation bounds".to_string()).into());
    }

    let annotation = state
        .db
        .update_annotation(&report_id, &annotation_id, bounds)?
        .ok_or_else(|| RadioError::NotFound("Annotation not found".to_string()))?;
    info!("Annotation {} on report {} corrected", annotation_id, report_id);
    Ok(Json(annotation))
}

pub async fn notify_patient(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(report_id): Path<String>,
) -> ApiResult<Json<MessageBody>> {
    caller.require(&[Role::Doctor, Role::Admin], "Only doctors or admins can notify patients")?;
    let report = report_or_404(&state, &report_id)?;
    let patient = state
        .db
        .get_user(&report.patient_id)?
        .ok_or_else(|| RadioError::NotFound("Patient not found".to_string()))?;
    if patient.email.trim().is_empty() {
        return Err(RadioError::Validation("Patient does not have an email address".to_string()).into());
    }

    let email = render_report_notification(
        &patient.email,
        &patient.full_name,
        report.fracture_type.as_deref(),
        report.recovery_time().as_deref(),
    )?;
    state.mailer.send(&email).await?;
    info!("Notified {} about report {} via {}", patient.email, report.id, state.mailer.name());

    Ok(message("Notification email sent successfully"))
}
