// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Radiograph upload validation and preview encoding

use base64::{engine::general_purpose, Engine as _};
use image::GenericImageView;
use std::path::Path;
use tracing::debug;

use crate::config::UploadConfig;
use crate::{RadioError, Result};

pub const NOT_AN_IMAGE: &str = "Please upload an image file";

/// What an upload must satisfy
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_bytes: usize,
    pub extensions: Vec<String>,
}

impl From<&UploadConfig> for UploadPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            extensions: config.extensions.iter().map(|e| e.to_lowercase()).collect(),
        }
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl UploadPolicy {
    pub fn too_large_message(&self) -> String {
        let mb = self.max_bytes as f64 / (1024.0 * 1024.0);
        if mb.fract() == 0.0 {
            format!("File is too large. Maximum size is {}MB", mb as u64)
        } else {
            format!("File is too large. Maximum size is {:.1}MB", mb)
        }
    }

    /// Check name and size, returning the content type to record
    pub fn check(&self, filename: &str, len: usize) -> Result<&'static str> {
        let ext = extension(filename).ok_or_else(|| RadioError::Validation(NOT_AN_IMAGE.to_string()))?;
        let content_type = content_type_for(&ext)
            .filter(|_| self.extensions.iter().any(|allowed| *allowed == ext))
            .ok_or_else(|| RadioError::Validation(NOT_AN_IMAGE.to_string()))?;

        if len > self.max_bytes {
            return Err(RadioError::Validation(self.too_large_message()));
        }
        Ok(content_type)
    }
}

fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// MIME type for an accepted radiograph extension
pub fn content_type_for(ext: &str) -> Option<&'static str> {
    match ext {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "tif" | "tiff" => Some("image/tiff"),
        "dcm" | "dicom" => Some("application/dicom"),
        _ => None,
    }
}

/// A validated image ready to send for analysis
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Validate in-memory bytes under `policy`
    pub fn from_bytes(filename: &str, bytes: Vec<u8>, policy: &UploadPolicy) -> Result<Self> {
        let content_type = policy.check(filename, bytes.len())?;
        Ok(Self {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            bytes,
        })
    }

    /// Read and validate a file from disk
    pub fn from_path(path: &Path, policy: &UploadPolicy) -> Result<Self> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RadioError::Validation(NOT_AN_IMAGE.to_string()))?;

        // Reject on metadata before reading a huge file into memory
        let len = std::fs::metadata(path)?.len() as usize;
        policy.check(filename, len)?;

        let bytes = std::fs::read(path)?;
        debug!("Read upload {} ({} bytes)", filename, bytes.len());
        Self::from_bytes(filename, bytes, policy)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_dicom(&self) -> bool {
        self.content_type == "application/dicom"
    }

    /// `data:<mime>;base64,...` preview
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    /// Natural pixel size for decodable raster formats
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        if self.is_dicom() {
            return None;
        }
        match image::load_from_memory(&self.bytes) {
            Ok(img) => Some(img.dimensions()),
            Err(e) => {
                debug!("Could not decode {}: {}", self.filename, e);
                None
            }
        }
    }

    /// Content hash used to spot repeated uploads
    pub fn hash(&self) -> String {
        blake3::hash(&self.bytes).to_hex().to_string()
    }
}
