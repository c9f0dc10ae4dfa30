// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! RadioFracture CLI
//!
//! Signs in against the API (or the built-in demo backend), uploads
//! radiographs, browses analysis history and runs the server.

use anyhow::{bail, Context};
use base64::{engine::general_purpose, Engine as _};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use radiofracture::client::{AnalysisBackend, ApiClient, AuthBackend, MockBackend, NewDoctor};
use radiofracture::config::AppConfig;
use radiofracture::db::Database;
use radiofracture::history::HistoryQuery;
use radiofracture::inference::HttpDetector;
use radiofracture::models::{
    format_confidence, Analysis, FractureAnnotation, LoginCredentials, PatientInfo, RegisterCredentials, Role,
};
use radiofracture::overlay::Overlay;
use radiofracture::session::{AuthSession, FileStorage, SessionStatus};
use radiofracture::upload::{ImageUpload, UploadPolicy};

/// RadioFracture CLI - fracture detection for radiographs
#[derive(Parser, Debug)]
#[command(name = "radiofracture")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "1.0.0")]
#[command(about = "Upload radiographs, review fracture reports and run the API server", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the API server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Sign in and remember the session
    Login {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,
    },

    /// Create a doctor or radiologist account
    Register {
        /// Full name
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        #[arg(long, default_value = "doctor", value_parser = ["doctor", "radiologist"])]
        role: String,

        #[arg(long)]
        specialty: Option<String>,

        #[arg(long)]
        hospital: Option<String>,
    },

    /// Forget the stored session
    Logout,

    /// Show who is signed in
    Whoami,

    /// Upload a radiograph for analysis
    Upload {
        /// Image file (jpg, png, tiff or dicom)
        image: PathBuf,

        /// Existing patient to attach the report to
        #[arg(long, conflicts_with = "patient_name")]
        patient_id: Option<String>,

        /// Name of a new patient
        #[arg(long, requires = "patient_email")]
        patient_name: Option<String>,

        /// Email of a new patient
        #[arg(long)]
        patient_email: Option<String>,

        /// Password for the new patient's account
        #[arg(long)]
        patient_password: Option<String>,

        #[arg(long)]
        age: Option<u32>,

        #[arg(long)]
        phone: Option<String>,

        /// Clinical notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// List past analyses
    History {
        /// Match filename, patient name or patient ID
        #[arg(short, long, default_value = "")]
        search: String,

        #[arg(long, default_value = "all", value_parser = ["all", "fracture", "no-fracture"])]
        filter: String,

        #[arg(long, default_value = "date-desc", value_parser = ["date-desc", "date-asc"])]
        sort: String,
    },

    /// Show one analysis with its annotations
    Show { id: String },

    /// Delete an analysis you created
    Delete { id: String },

    /// Email the patient about a report
    Notify { id: String },

    /// List patients you created
    Patients,

    /// Create a doctor account (admin only)
    AddDoctor {
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        #[arg(long)]
        specialty: Option<String>,

        #[arg(long)]
        hospital: Option<String>,
    },

    /// Move an annotation by a pointer delta measured on a scaled view
    Nudge {
        report: String,

        annotation: String,

        #[arg(long, allow_hyphen_values = true)]
        dx: f64,

        #[arg(long, allow_hyphen_values = true)]
        dy: f64,

        /// Width of the view the delta was measured in
        #[arg(long)]
        container_width: f64,

        /// Natural image width (read from the annotated image when omitted)
        #[arg(long)]
        image_width: Option<f64>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show API, detector and database status
    Status,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration file
    Validate,
}

/// Where client commands send their requests
struct Backends {
    /// Present unless running against the demo backend
    api: Option<ApiClient>,
    auth: Arc<dyn AuthBackend>,
    analyses: Arc<dyn AnalysisBackend>,
}

impl Backends {
    fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        if config.client.mock {
            debug!("Using the demo backend");
            let mock = Arc::new(MockBackend::new(Duration::from_millis(config.client.mock_delay_ms)));
            return Ok(Self {
                api: None,
                auth: mock.clone(),
                analyses: mock,
            });
        }
        let client = ApiClient::new(&config.client.api_url)?;
        Ok(Self {
            api: Some(client.clone()),
            auth: Arc::new(client.clone()),
            analyses: Arc::new(client),
        })
    }

    fn api(&self, what: &str) -> anyhow::Result<&ApiClient> {
        match &self.api {
            Some(api) => Ok(api),
            None => bail!("{} is not available with the demo backend", what),
        }
    }
}

struct ClientContext {
    config: AppConfig,
    backends: Backends,
    session: AuthSession,
    json: bool,
}

impl ClientContext {
    fn new(config: AppConfig, json: bool) -> anyhow::Result<Self> {
        let backends = Backends::from_config(&config)?;
        let storage = Arc::new(FileStorage::new(PathBuf::from(&config.client.session_path)));
        let session = AuthSession::new(backends.auth.clone(), storage).with_refresh_interval(None);
        session.restore().context("Failed to read the stored session")?;
        Ok(Self {
            config,
            backends,
            session,
            json,
        })
    }

    fn token(&self) -> anyhow::Result<String> {
        match self.session.token() {
            Some(token) => Ok(token),
            None => bail!("Not signed in. Run `radiofracture login` first"),
        }
    }

    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text(value);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;
    let json = cli.format == "json";

    match cli.command {
        Commands::Serve { host, port } => run_serve(config, host, port).await,
        Commands::Config { action } => run_config_command(config, action, &cli.config),
        Commands::Status => run_status(config).await,
        command => {
            let ctx = ClientContext::new(config, json)?;
            run_client_command(&ctx, command).await
        }
    }
}

async fn run_serve(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate()?;

    let db = Database::open(&config.database.path)
        .with_context(|| format!("Failed to open database {}", config.database.path))?;
    info!("Database: {}", config.database.path);
    radiofracture::web::start_server(config, db).await?;
    Ok(())
}

async fn run_client_command(ctx: &ClientContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Login { email, password } => {
            let user = ctx.session.login(&LoginCredentials { email, password }).await?;
            ctx.print(&user, |u| println!("Signed in as {} ({})", u.full_name, u.role))
        }
        Commands::Register {
            name,
            email,
            password,
            role,
            specialty,
            hospital,
        } => {
            let credentials = RegisterCredentials {
                full_name: name,
                email,
                password,
                role: role.parse::<Role>()?,
                created_by: None,
                specialty,
                hospital,
            };
            let user = ctx.session.register(&credentials).await?;
            ctx.print(&user, |u| println!("Registered {} as {}", u.email, u.role))
        }
        Commands::Logout => {
            ctx.session.logout();
            if !ctx.json {
                println!("Signed out");
            }
            Ok(())
        }
        Commands::Whoami => {
            let state = ctx.session.state();
            ctx.print(&state, |s| match (&s.user, s.status()) {
                (Some(user), SessionStatus::Authenticated) => {
                    println!("{} <{}>", user.full_name, user.email);
                    println!("  Role: {}", user.role);
                    if let Some(hospital) = &user.hospital {
                        println!("  Hospital: {}", hospital);
                    }
                }
                _ => println!("Not signed in"),
            })
        }
        Commands::Upload {
            image,
            patient_id,
            patient_name,
            patient_email,
            patient_password,
            age,
            phone,
            notes,
        } => {
            let token = ctx.token()?;
            let policy = UploadPolicy::from(&ctx.config.upload);
            let upload = ImageUpload::from_path(&image, &policy)
                .with_context(|| format!("Cannot upload {}", image.display()))?;
            let patient = PatientInfo {
                existing_patient_id: patient_id,
                full_name: patient_name.unwrap_or_default(),
                email: patient_email.unwrap_or_default(),
                password: patient_password.unwrap_or_default(),
                age,
                phone_number: phone,
                notes,
            };
            if patient.existing_patient_id.is_none() && patient.full_name.is_empty() {
                bail!("Give --patient-id, or --patient-name and --patient-email for a new patient");
            }

            info!("Analyzing {} ({} bytes)", upload.filename, upload.len());
            let analysis = ctx
                .backends
                .analyses
                .upload_and_analyze(&token, &upload, &patient)
                .await
                .into_result()?;
            ctx.print(&analysis, print_analysis)
        }
        Commands::History { search, filter, sort } => {
            let token = ctx.token()?;
            let query = HistoryQuery {
                search,
                filter: filter.parse()?,
                sort: sort.parse()?,
            };
            let all = ctx.backends.analyses.list_analyses(&token).await.into_result()?;
            let shown = query.apply(&all);
            ctx.print(&shown, |rows| print_history(rows, all.len(), query.is_narrowed()))
        }
        Commands::Show { id } => {
            let token = ctx.token()?;
            let mut analysis = ctx.backends.analyses.get_analysis(&token, &id).await.into_result()?;
            if analysis.annotations.is_none() {
                let annotations = ctx.backends.analyses.get_annotations(&token, &id).await.into_result()?;
                analysis.annotations = Some(annotations);
            }
            ctx.print(&analysis, print_analysis)
        }
        Commands::Delete { id } => {
            let token = ctx.token()?;
            ctx.backends.analyses.delete_analysis(&token, &id).await.into_result()?;
            if !ctx.json {
                println!("Deleted analysis {}", id);
            }
            Ok(())
        }
        Commands::Notify { id } => {
            let token = ctx.token()?;
            let reply = ctx.backends.api("Notify")?.notify_patient(&token, &id).await.into_result()?;
            ctx.print(&reply, |r| println!("{}", r.message))
        }
        Commands::Patients => {
            let token = ctx.token()?;
            let patients = ctx.backends.api("Patients")?.list_patients(&token).await.into_result()?;
            ctx.print(&patients, |list| {
                if list.is_empty() {
                    println!("No patients yet");
                }
                for p in list {
                    let age = p.age.map(|a| format!(", {}", a)).unwrap_or_default();
                    println!("  {}  {} <{}>{}", p.id, p.full_name, p.email, age);
                }
            })
        }
        Commands::AddDoctor {
            name,
            email,
            password,
            specialty,
            hospital,
        } => {
            let token = ctx.token()?;
            let doctor = NewDoctor {
                full_name: name,
                email,
                password,
                specialty,
                hospital,
            };
            let created = ctx.backends.api("Adding doctors")?.create_doctor(&token, &doctor).await.into_result()?;
            ctx.print(&created, |c| println!("{}: {} <{}>", c.message, c.user.full_name, c.user.email))
        }
        Commands::Nudge {
            report,
            annotation,
            dx,
            dy,
            container_width,
            image_width,
        } => run_nudge(ctx, &report, &annotation, (dx, dy), container_width, image_width).await,
        Commands::Serve { .. } | Commands::Config { .. } | Commands::Status => Ok(()),
    }
}

async fn run_nudge(
    ctx: &ClientContext,
    report_id: &str,
    annotation_id: &str,
    delta: (f64, f64),
    container_width: f64,
    image_width: Option<f64>,
) -> anyhow::Result<()> {
    let token = ctx.token()?;
    let api = ctx.backends.api("Annotation editing")?;
    let detail = api.get_report(&token, report_id).await.into_result()?;

    let natural_width = match image_width {
        Some(width) => width,
        None => annotated_width(detail.annotated_image.as_deref())
            .context("Cannot read the annotated image width; pass --image-width")?,
    };

    let mut overlay = Overlay::new(detail.annotations, natural_width, container_width, true);
    overlay.pointer_down(annotation_id, (0.0, 0.0));
    let moved = match overlay.pointer_move(delta) {
        Some(annotation) => annotation.bounds(),
        None => bail!("Annotation {} not found on report {}", annotation_id, report_id),
    };
    overlay.pointer_up();
    debug!("Scale ratio {:.3}", overlay.ratio());

    let stored = api
        .update_annotation(&token, report_id, annotation_id, moved)
        .await
        .into_result()?;
    ctx.print(&stored, print_annotation)
}

/// Natural width of a base64 annotated image
fn annotated_width(encoded: Option<&str>) -> Option<f64> {
    let encoded = encoded?;
    let payload = encoded.split_once(";base64,").map_or(encoded, |(_, data)| data);
    let bytes = general_purpose::STANDARD.decode(payload).ok()?;
    let upload = ImageUpload {
        filename: "annotated".to_string(),
        content_type: "image/jpeg".to_string(),
        bytes,
    };
    upload.dimensions().map(|(width, _)| f64::from(width))
}

fn print_analysis(analysis: &Analysis) {
    println!("{}", analysis.diagnosis());
    println!("  ID: {}", analysis.id);
    println!("  File: {}", analysis.original_filename);
    if let Some(name) = &analysis.patient_name {
        println!("  Patient: {}", name);
    }
    if let Some(fracture) = analysis.fracture_type.as_deref().filter(|t| !t.is_empty()) {
        println!("  Fracture: {}", fracture);
    }
    if let Some(location) = &analysis.fracture_location {
        println!("  Location: {}", location);
    }
    println!("  Confidence: {}", format_confidence(analysis.confidence));
    if let Some(days) = analysis.recovery_time_days {
        println!("  Estimated recovery: {} days", days);
    }
    if !analysis.notes.is_empty() {
        println!("  Notes: {}", analysis.notes);
    }
    println!("  Processed: {}", analysis.processed_date.format("%Y-%m-%d %H:%M"));
    if let Some(annotations) = &analysis.annotations {
        for annotation in annotations {
            print_annotation(annotation);
        }
    }
}

fn print_annotation(annotation: &FractureAnnotation) {
    let marker = if annotation.corrected { " (corrected)" } else { "" };
    println!(
        "  [{}] {} {} at {:.0},{:.0} {:.0}x{:.0}{}",
        annotation.id,
        annotation.fracture_type,
        format_confidence(annotation.confidence),
        annotation.x,
        annotation.y,
        annotation.width,
        annotation.height,
        marker
    );
}

fn print_history(rows: &[Analysis], total: usize, narrowed: bool) {
    if rows.is_empty() {
        if narrowed {
            println!("No analyses match your search");
        } else {
            println!("No analyses yet. Upload an X-ray to get started");
        }
        return;
    }
    for a in rows {
        println!(
            "{}  {:<24} {:<20} {:<22} {}",
            a.processed_date.format("%Y-%m-%d %H:%M"),
            a.original_filename,
            a.patient_name.as_deref().unwrap_or("-"),
            a.diagnosis(),
            format_confidence(a.confidence)
        );
    }
    if narrowed {
        println!("\nShowing {} of {} analyses", rows.len(), total);
    }
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> anyhow::Result<()> {
    match action {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Generate { output, force } => {
            if output.exists() && !force {
                bail!("{:?} already exists. Use --force to overwrite", output);
            }
            AppConfig::generate().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config
                .validate()
                .with_context(|| format!("Configuration at {:?} is invalid", config_path))?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  API: {}", config.client.api_url);
            println!("  Detector: {}", if config.analysis.mock { "mock" } else { config.analysis.service_url.as_str() });
            println!("  Database: {}", config.database.path);
            println!("  Mail: {}", config.mail.provider);
        }
    }
    Ok(())
}

/// Run status check
async fn run_status(config: AppConfig) -> anyhow::Result<()> {
    println!("RadioFracture v1.0.0 Status");
    println!("===========================");

    if config.client.mock {
        println!("API: demo backend");
    } else {
        let client = ApiClient::new(&config.client.api_url)?;
        let health = client.health().await;
        match health.data {
            Some(body) => println!("API ({}): {}", client.base_url(), body.message),
            None => println!("API ({}): Error - {}", client.base_url(), health.error.unwrap_or_default()),
        }
    }

    if config.analysis.mock {
        println!("Detector: mock");
    } else {
        let detector = HttpDetector::new(&config.analysis)?;
        match detector.health_check().await {
            Ok(()) => println!("Detector ({}): Running", detector.url()),
            Err(e) => println!("Detector ({}): Error - {}", detector.url(), e),
        }
    }

    if Path::new(&config.database.path).exists() {
        match Database::open(&config.database.path).and_then(|db| db.stats()) {
            Ok(stats) => {
                println!("\nDatabase ({}):", config.database.path);
                println!("  Users: {} ({} patients)", stats.user_count, stats.patient_count);
                println!("  Reports: {} ({} with fractures)", stats.report_count, stats.fracture_count);
                println!("  Corrected annotations: {}", stats.corrected_annotations);
            }
            Err(e) => println!("\nDatabase: Error - {}", e),
        }
    } else {
        warn!("No local database at {}", config.database.path);
    }

    Ok(())
}
