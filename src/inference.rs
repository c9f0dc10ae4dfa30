// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Fracture detection backends
//!
//! The server never runs a model itself. It forwards the upload to an
//! external detection service ([`HttpDetector`]) or answers with canned demo
//! data ([`MockDetector`]).

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{multipart, Client};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AnalysisConfig;
use crate::db::new_id;
use crate::models::{AnalyzeResponse, BoundingBox, FractureAnnotation};
use crate::upload::ImageUpload;
use crate::{RadioError, Result};

/// Something that can look at a radiograph
#[async_trait]
pub trait FractureDetector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze(&self, image: &ImageUpload) -> Result<AnalyzeResponse>;
}

/// Per-class (area range, day range) used to turn a box size into days
const RECOVERY_TABLE: &[(&str, (f64, f64), (f64, f64))] = &[
    ("elbow positive", (200.0, 4000.0), (20.0, 40.0)),
    ("fingers positive", (50.0, 1500.0), (7.0, 15.0)),
    ("forearm fracture", (300.0, 6000.0), (25.0, 45.0)),
    ("humerus fracture", (300.0, 8000.0), (30.0, 50.0)),
    ("humerus", (300.0, 6000.0), (30.0, 50.0)),
    ("shoulder fracture", (300.0, 7000.0), (35.0, 55.0)),
    ("wrist positive", (100.0, 3000.0), (10.0, 20.0)),
];

/// Estimated recovery in days for a detected box, `None` for unknown classes
pub fn estimate_recovery_days(fracture_class: &str, area: f64) -> Option<u32> {
    let key = fracture_class.trim().to_lowercase();
    let &(_, (area_min, area_max), (days_min, days_max)) =
        RECOVERY_TABLE.iter().find(|(name, _, _)| *name == key)?;

    let days = if area <= area_min {
        days_min
    } else if area >= area_max {
        days_max
    } else {
        days_min + (area - area_min) / (area_max - area_min) * (days_max - days_min)
    };
    Some(days.round() as u32)
}

/// Fill in a missing recovery estimate from the first box
pub fn complete_recovery(mut response: AnalyzeResponse) -> AnalyzeResponse {
    if response.recovery_time.is_none() {
        if let (Some(class), Some(first)) = (response.fracture_type.as_deref(), response.boxes.first()) {
            response.recovery_time = estimate_recovery_days(class, first.area());
        }
    }
    response
}

/// Turn detector boxes into editable annotations
pub fn annotations_from(response: &AnalyzeResponse) -> Vec<FractureAnnotation> {
    let fracture_type = match response.fracture_type.as_deref() {
        Some(t) if response.detected && !t.is_empty() => t,
        _ => return Vec::new(),
    };
    response
        .boxes
        .iter()
        .map(|b| FractureAnnotation {
            id: new_id(),
            x: b.x,
            y: b.y,
            width: b.width,
            height: b.height,
            fracture_type: fracture_type.to_string(),
            confidence: response.confidence.unwrap_or(0.0),
            corrected: false,
            original_coordinates: None,
        })
        .collect()
}

/// Detection service over HTTP
pub struct HttpDetector {
    client: Client,
    url: String,
    retries: u32,
}

impl HttpDetector {
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.service_url.clone(),
            retries: config.retries,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check the service answers at all
    pub async fn health_check(&self) -> Result<()> {
        self.client
            .get(&self.url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                RadioError::Detector(format!("Cannot reach detection service at {}: {}", self.url, e))
            })?;
        Ok(())
    }

    async fn analyze_once(&self, image: &ImageUpload) -> Result<AnalyzeResponse> {
        let part = multipart::Part::bytes(image.bytes.clone())
            .file_name(image.filename.clone())
            .mime_str(&image.content_type)?;
        let form = multipart::Form::new().part("file", part);

        debug!("Sending {} to detection service {}", image.filename, self.url);

        let response = self.client.post(&self.url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(RadioError::Detector(format!(
                "Detection service returned status {}",
                response.status()
            )));
        }

        let result: AnalyzeResponse = response.json().await?;
        Ok(complete_recovery(result))
    }
}

/// Longest wait between detection attempts
const MAX_RETRY_DELAY_SECS: u64 = 60;

/// Backoff before retry `attempt` (1-based): 1s, 2s, 4s ... capped
fn retry_delay(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_secs(secs.min(MAX_RETRY_DELAY_SECS))
}

#[async_trait]
impl FractureDetector for HttpDetector {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn analyze(&self, image: &ImageUpload) -> Result<AnalyzeResponse> {
        let mut last_error = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = retry_delay(attempt);
                warn!("Retrying detection request in {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.analyze_once(image).await {
                Ok(result) => {
                    info!(
                        "Detection for {}: detected={} type={:?}",
                        image.filename, result.detected, result.fracture_type
                    );
                    return Ok(result);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| RadioError::Detector("Unknown error".to_string())))
    }
}

/// Demo detector: always finds the same distal radius fracture
pub struct MockDetector {
    delay: Duration,
}

pub const DEMO_FRACTURE: &str = "Distal radius fracture";
pub const DEMO_BOX: BoundingBox = BoundingBox { x: 120.0, y: 150.0, width: 60.0, height: 40.0 };
pub const DEMO_CONFIDENCE: f64 = 0.94;

impl MockDetector {
    pub fn new() -> Self {
        Self { delay: Duration::ZERO }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    /// The canned result for an upload
    pub fn demo_response(image: &ImageUpload) -> AnalyzeResponse {
        AnalyzeResponse {
            detected: true,
            fracture_type: Some(DEMO_FRACTURE.to_string()),
            // A distal radius fracture is a wrist fracture
            recovery_time: estimate_recovery_days("wrist positive", DEMO_BOX.area()),
            image_base64: (!image.is_dicom()).then(|| general_purpose::STANDARD.encode(&image.bytes)),
            confidence: Some(DEMO_CONFIDENCE),
            boxes: vec![DEMO_BOX],
        }
    }
}

impl Default for MockDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FractureDetector for MockDetector {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn analyze(&self, image: &ImageUpload) -> Result<AnalyzeResponse> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Self::demo_response(image))
    }
}

/// Pick the detector the configuration asks for
pub fn from_config(config: &AnalysisConfig) -> Result<Box<dyn FractureDetector>> {
    if config.mock {
        info!("Using mock fracture detector");
        Ok(Box::new(MockDetector::new()))
    } else {
        info!("Using detection service at {}", config.service_url);
        Ok(Box::new(HttpDetector::new(config)?))
    }
}
