// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Domain records shared by the server, the client and the CLI

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::RadioError;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "chef")]
    Admin,
    Doctor,
    Radiologist,
    Patient,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Doctor => "doctor",
            Role::Radiologist => "radiologist",
            Role::Patient => "patient",
        }
    }

    /// Roles that create and own reports
    pub fn is_clinician(&self) -> bool {
        matches!(self, Role::Doctor | Role::Radiologist)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RadioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" | "chef" => Ok(Role::Admin),
            "doctor" => Ok(Role::Doctor),
            "radiologist" => Ok(Role::Radiologist),
            "patient" => Ok(Role::Patient),
            other => Err(RadioError::Validation(format!("Unknown role: {}", other))),
        }
    }
}

/// A user account as exposed to clients (never carries the password hash)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hospital: Option<String>,
}

/// Email and password pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

/// Self-registration payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCredentials {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hospital: Option<String>,
}

/// Successful login or registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    pub token: String,
}

/// Pixel-space rectangle on the natural image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// A suspected fracture marked on an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FractureAnnotation {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub fracture_type: String,
    pub confidence: f64,
    #[serde(default)]
    pub corrected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_coordinates: Option<BoundingBox>,
}

impl FractureAnnotation {
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// Stored report row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub image_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<String>,
    #[serde(default)]
    pub fracture_type: Option<String>,
    #[serde(default)]
    pub recovery_days: Option<u32>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Report {
    /// Human-readable recovery estimate
    pub fn recovery_time(&self) -> Option<String> {
        self.recovery_days.map(|d| format!("{} days", d))
    }
}

/// Report listing row with resolved names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedReport {
    #[serde(flatten)]
    pub report: Report,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub doctor_name: Option<String>,
}

/// Single report with the people involved and its annotations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDetail {
    pub id: String,
    pub patient: Option<User>,
    pub doctor: Option<User>,
    pub image_name: String,
    #[serde(default)]
    pub annotated_image: Option<String>,
    #[serde(default)]
    pub fracture_type: Option<String>,
    #[serde(default)]
    pub recovery_time: Option<String>,
    #[serde(default)]
    pub recovery_days: Option<u32>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub annotations: Vec<FractureAnnotation>,
}

/// Detection service wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnalyzeResponse {
    pub detected: bool,
    #[serde(rename = "type")]
    pub fracture_type: Option<String>,
    pub recovery_time: Option<u32>,
    pub image_base64: Option<String>,
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boxes: Vec<BoundingBox>,
}

/// `POST /api/reports/create` response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedReport {
    pub analysis: AnalyzeResponse,
    pub report: Report,
    #[serde(default)]
    pub annotations: Vec<FractureAnnotation>,
}

/// Who a new report is for: an existing patient, or one to create
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_patient_id: Option<String>,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Client-side view of an analysed image, as listed in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub patient_name: Option<String>,
    pub image_url: String,
    pub annotated_image_url: String,
    pub original_filename: String,
    pub upload_date: DateTime<Utc>,
    pub processed_date: DateTime<Utc>,
    #[serde(default)]
    pub fracture_type: Option<String>,
    #[serde(default)]
    pub fracture_location: Option<String>,
    #[serde(default)]
    pub recovery_time_days: Option<u32>,
    pub confidence: f64,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub suspected_fracture: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<FractureAnnotation>>,
}

/// Result-card headline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnosis {
    Suspected,
    Detected,
    Clear,
}

impl Diagnosis {
    pub fn label(&self) -> &'static str {
        match self {
            Diagnosis::Suspected => "Suspected Fracture",
            Diagnosis::Detected => "Fracture Detected",
            Diagnosis::Clear => "No Fracture Detected",
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Analysis {
    pub fn has_fracture(&self) -> bool {
        self.fracture_type.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn diagnosis(&self) -> Diagnosis {
        if self.suspected_fracture {
            Diagnosis::Suspected
        } else if self.has_fracture() {
            Diagnosis::Detected
        } else {
            Diagnosis::Clear
        }
    }

    /// Build the view of a single report, annotations included
    pub fn from_detail(detail: &ReportDetail) -> Self {
        let image = detail
            .annotated_image
            .as_deref()
            .map(|b64| format!("data:image/jpeg;base64,{}", b64))
            .unwrap_or_default();
        Self {
            id: detail.id.clone(),
            user_id: detail.doctor.as_ref().map(|d| d.id.clone()).unwrap_or_default(),
            patient_id: detail.patient.as_ref().map(|p| p.id.clone()),
            patient_name: detail.patient.as_ref().map(|p| p.full_name.clone()),
            image_url: image.clone(),
            annotated_image_url: image,
            original_filename: detail.image_name.clone(),
            upload_date: detail.created_at,
            processed_date: detail.created_at,
            fracture_type: detail.fracture_type.clone().filter(|t| !t.is_empty()),
            fracture_location: None,
            recovery_time_days: detail.recovery_days,
            confidence: detail.confidence.unwrap_or(0.0),
            notes: detail.notes.clone().unwrap_or_default(),
            suspected_fracture: false,
            annotations: Some(detail.annotations.clone()),
        }
    }

    /// Build the history view of a listed report
    pub fn from_report(enriched: &EnrichedReport) -> Self {
        let report = &enriched.report;
        let image = report
            .annotated_image
            .as_deref()
            .map(|b64| format!("data:image/jpeg;base64,{}", b64))
            .unwrap_or_default();
        Self {
            id: report.id.clone(),
            user_id: report.doctor_id.clone(),
            patient_id: Some(report.patient_id.clone()),
            patient_name: enriched.patient_name.clone(),
            image_url: image.clone(),
            annotated_image_url: image,
            original_filename: report.image_name.clone(),
            upload_date: report.created_at,
            processed_date: report.created_at,
            fracture_type: report.fracture_type.clone().filter(|t| !t.is_empty()),
            fracture_location: None,
            recovery_time_days: report.recovery_days,
            confidence: report.confidence.unwrap_or(0.0),
            notes: report.notes.clone().unwrap_or_default(),
            suspected_fracture: false,
            annotations: None,
        }
    }
}

/// Rounded percentage, e.g. `94%`
pub fn format_confidence(confidence: f64) -> String {
    format!("{}%", (confidence * 100.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(fracture_type: Option<&str>, suspected: bool) -> Analysis {
        let now = Utc::now();
        Analysis {
            id: "1".into(),
            user_id: "u".into(),
            patient_id: None,
            patient_name: None,
            image_url: String::new(),
            annotated_image_url: String::new(),
            original_filename: "wrist.jpg".into(),
            upload_date: now,
            processed_date: now,
            fracture_type: fracture_type.map(String::from),
            fracture_location: None,
            recovery_time_days: None,
            confidence: 0.94,
            notes: String::new(),
            suspected_fracture: suspected,
            annotations: None,
        }
    }

    #[test]
    fn test_no_fracture_label() {
        assert_eq!(analysis(None, false).diagnosis().label(), "No Fracture Detected");
    }

    #[test]
    fn test_suspected_wins_over_type() {
        assert_eq!(analysis(Some("Distal radius fracture"), true).diagnosis(), Diagnosis::Suspected);
        assert_eq!(analysis(Some("Distal radius fracture"), false).diagnosis(), Diagnosis::Detected);
    }

    #[test]
    fn test_role_parsing_accepts_chef() {
        assert_eq!("chef".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("Radiologist".parse::<Role>().unwrap(), Role::Radiologist);
        assert!("nurse".parse::<Role>().is_err());

        let role: Role = serde_json::from_str("\"chef\"").unwrap();
        assert_eq!(role, Role::Admin);
    }

    #[test]
    fn test_analyze_response_wire_names() {
        let json = r#"{"detected":true,"type":"wrist positive","recovery_time":14,"image_base64":null,"confidence":0.41}"#;
        let resp: AnalyzeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.fracture_type.as_deref(), Some("wrist positive"));
        assert_eq!(resp.recovery_time, Some(14));
        assert!(resp.boxes.is_empty());
    }

    #[test]
    fn test_enriched_report_flattens() {
        let report = Report {
            id: "r1".into(),
            patient_id: "p1".into(),
            doctor_id: "d1".into(),
            image_name: "hand.png".into(),
            image_hash: None,
            annotated_image: None,
            fracture_type: Some("fingers positive".into()),
            recovery_days: Some(9),
            confidence: Some(0.7),
            notes: None,
            created_at: Utc::now(),
        };
        let enriched = EnrichedReport {
            report,
            patient_name: Some("Alex Johnson".into()),
            doctor_name: None,
        };
        let value = serde_json::to_value(&enriched).unwrap();
        assert_eq!(value["imageName"], "hand.png");
        assert_eq!(value["patientName"], "Alex Johnson");

        let analysis = Analysis::from_report(&enriched);
        assert_eq!(analysis.original_filename, "hand.png");
        assert_eq!(analysis.diagnosis(), Diagnosis::Detected);
        assert_eq!(enriched.report.recovery_time().as_deref(), Some("9 days"));
    }

    #[test]
    fn test_format_confidence() {
        assert_eq!(format_confidence(0.944), "94%");
        assert_eq!(format_confidence(0.005), "1%");
    }
}
