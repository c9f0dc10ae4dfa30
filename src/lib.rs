// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! RadioFracture: fracture detection for radiographs
//!
//! A REST backend that stores patients, reports and annotations and delegates
//! detection to an external service, plus the client library and CLI that
//! talk to it.

pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod inference;
pub mod mailer;
pub mod models;
pub mod overlay;
pub mod session;
pub mod upload;
pub mod web;

pub use config::AppConfig;
pub use error::{RadioError, Result};
