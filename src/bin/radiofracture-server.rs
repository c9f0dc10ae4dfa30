// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! RadioFracture API Server
//!
//! Standalone REST backend for the RadioFracture clients.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use radiofracture::config::AppConfig;
use radiofracture::db::Database;
use radiofracture::Result;

#[derive(Parser, Debug)]
#[command(name = "radiofracture-server")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "1.0.0")]
#[command(about = "RadioFracture API Server")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose { "debug,tower_http=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("RadioFracture API Server v1.0.0");

    // Load config
    let mut config = AppConfig::load(&args.config)?;

    // Apply CLI overrides
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    // Initialize database
    let db = Database::open(&config.database.path)?;
    info!("Database: {}", config.database.path);

    radiofracture::web::start_server(config, db).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_overrides() {
        let args = Args::try_parse_from(["radiofracture-server", "-H", "0.0.0.0", "-p", "8080", "-v"]).unwrap();
        assert_eq!(args.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(args.port, Some(8080));
        assert!(args.verbose);
        assert_eq!(args.config, PathBuf::from("config.json"));
    }
}
