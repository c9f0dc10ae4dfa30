// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Patient notification emails

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minijinja::{context, Environment};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::MailConfig;
use crate::{RadioError, Result};

pub const REPORT_SUBJECT: &str = "New X-ray Report Available";

const REPORT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>New X-ray Report</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 0; padding: 0; background-color: #f4f4f4; }
        .container { max-width: 600px; margin: 20px auto; background-color: #ffffff; border-radius: 8px; overflow: hidden; }
        .header { background-color: #007bff; color: #ffffff; padding: 20px; text-align: center; }
        .content { padding: 30px; }
        .details { border-left: 4px solid #007bff; padding-left: 15px; margin-top: 20px; }
        .footer { padding: 20px; text-align: center; font-size: 12px; color: #777777; background-color: #f9f9f9; }
    </style>
</head>
<body>
    <div class="container">
        <div class="header"><h1>New X-ray Report Available</h1></div>
        <div class="content">
            <h2>Dear {{ patient_name }},</h2>
            <p>A new X-ray report has been generated for you. Please see the details below:</p>
            <div class="details">
                <p><strong>Fracture Type:</strong> {{ fracture_type }}</p>
                <p><strong>Estimated Recovery:</strong> {{ recovery }}</p>
            </div>
            <p style="margin-top: 30px;">Please log in to your account to view the full report, including the annotated image.</p>
        </div>
        <div class="footer"><p>This is an automated notification. Please do not reply to this email.</p></div>
    </div>
</body>
</html>
"#;

/// An outgoing message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Render the "new report" notification for a patient
pub fn render_report_notification(
    to: &str,
    patient_name: &str,
    fracture_type: Option<&str>,
    recovery: Option<&str>,
) -> Result<Email> {
    let mut env = Environment::new();
    env.add_template("report_notification.html", REPORT_TEMPLATE)?;
    let html = env.get_template("report_notification.html")?.render(context! {
        patient_name => patient_name,
        fracture_type => fracture_type.filter(|t| !t.is_empty()).unwrap_or("No fracture detected"),
        recovery => recovery.unwrap_or("Not applicable"),
    })?;
    Ok(Email {
        to: to.to_string(),
        subject: REPORT_SUBJECT.to_string(),
        html,
    })
}

/// Delivery backend
#[async_trait]
pub trait Mailer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, email: &Email) -> Result<()>;
}

/// Line in the outbox file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub email: Email,
}

/// Appends each message as a JSON line instead of sending it
pub struct OutboxMailer {
    path: PathBuf,
}

impl OutboxMailer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Everything written so far
    pub fn read_all(&self) -> Result<Vec<OutboxEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping unreadable outbox line: {}", e),
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl Mailer for OutboxMailer {
    fn name(&self) -> &'static str {
        "outbox"
    }

    async fn send(&self, email: &Email) -> Result<()> {
        let entry = OutboxEntry {
            sent_at: Utc::now(),
            email: email.clone(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        info!("Queued '{}' for {} in {:?}", email.subject, email.to, self.path);
        Ok(())
    }
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Resend-compatible mail API
pub struct ResendMailer {
    client: Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            from: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    fn name(&self) -> &'static str {
        "resend"
    }

    async fn send(&self, email: &Email) -> Result<()> {
        if self.api_key.is_empty() {
            warn!("Mail API key is missing");
        }
        if self.from.is_empty() {
            warn!("Mail from address is missing");
        }
        if self.api_key.is_empty() || self.from.is_empty() {
            return Err(RadioError::Mail("email credentials not set".to_string()));
        }

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&ResendRequest {
                from: &self.from,
                to: [&email.to],
                subject: &email.subject,
                html: &email.html,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RadioError::Mail(format!("mail API returned {}: {}", status, body)));
        }
        info!("Sent '{}' to {}", email.subject, email.to);
        Ok(())
    }
}

/// Pick the mailer the configuration asks for
pub fn from_config(config: &MailConfig) -> Result<Box<dyn Mailer>> {
    match config.provider.as_str() {
        "outbox" => Ok(Box::new(OutboxMailer::new(PathBuf::from(&config.outbox_path)))),
        "resend" => Ok(Box::new(ResendMailer::new(config)?)),
        other => Err(RadioError::Config(format!("Unknown mail provider: {}", other))),
    }
}
