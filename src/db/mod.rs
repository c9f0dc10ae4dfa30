// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Database module for accounts, reports and annotations

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::models::{BoundingBox, EnrichedReport, FractureAnnotation, Report, Role, User};
use crate::{RadioError, Result};

/// Database manager (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Fields for a user about to be created
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Option<Role>,
    pub created_by: Option<String>,
    pub age: Option<u32>,
    pub phone_number: Option<String>,
    pub notes: Option<String>,
    pub specialty: Option<String>,
    pub hospital: Option<String>,
}

/// Which reports a caller may list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportScope {
    All,
    Doctor(String),
    Patient(String),
}

impl ReportScope {
    /// Scope that follows from the caller's role
    pub fn for_role(role: Role, user_id: &str) -> Self {
        match role {
            Role::Admin => ReportScope::All,
            Role::Doctor | Role::Radiologist => ReportScope::Doctor(user_id.to_string()),
            Role::Patient => ReportScope::Patient(user_id.to_string()),
        }
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub user_count: i64,
    pub patient_count: i64,
    pub report_count: i64,
    pub fracture_count: i64,
    pub corrected_annotations: i64,
}

const USER_COLUMNS: &str =
    "id, full_name, email, role, created_by, created_at, age, phone_number, notes, specialty, hospital";

const REPORT_COLUMNS: &str = "r.id, r.patient_id, r.doctor_id, r.image_name, r.image_hash, \
     r.annotated_image, r.fracture_type, r.recovery_days, r.confidence, r.notes, r.created_at";

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, e: RadioError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, RadioError::Validation(format!("bad timestamp {}: {}", raw, e))))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(3)?;
    let created: String = row.get(5)?;
    Ok(User {
        id: row.get(0)?,
        full_name: row.get(1)?,
        email: row.get(2)?,
        role: role.parse().map_err(|e| conversion_error(3, e))?,
        created_by: row.get(4)?,
        created_at: parse_timestamp(5, &created)?,
        age: row.get(6)?,
        phone_number: row.get(7)?,
        notes: row.get(8)?,
        specialty: row.get(9)?,
        hospital: row.get(10)?,
    })
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<Report> {
    let created: String = row.get(10)?;
    Ok(Report {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        doctor_id: row.get(2)?,
        image_name: row.get(3)?,
        image_hash: row.get(4)?,
        annotated_image: row.get(5)?,
        fracture_type: row.get(6)?,
        recovery_days: row.get(7)?,
        confidence: row.get(8)?,
        notes: row.get(9)?,
        created_at: parse_timestamp(10, &created)?,
    })
}

fn annotation_from_row(row: &Row<'_>) -> rusqlite::Result<FractureAnnotation> {
    let orig_x: Option<f64> = row.get(7)?;
    let original_coordinates = match orig_x {
        Some(x) => Some(BoundingBox {
            x,
            y: row.get(8)?,
            width: row.get(9)?,
            height: row.get(10)?,
        }),
        None => None,
    };
    Ok(FractureAnnotation {
        id: row.get(0)?,
        x: row.get(1)?,
        y: row.get(2)?,
        width: row.get(3)?,
        height: row.get(4)?,
        fracture_type: row.get(5)?,
        confidence: row.get(6)?,
        corrected: row.get(11)?,
        original_coordinates,
    })
}

const ANNOTATION_COLUMNS: &str = "id, x, y, width, height, fracture_type, confidence, \
     orig_x, orig_y, orig_width, orig_height, corrected";

impl Database {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RadioError::Config("Database lock poisoned".to_string()))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                full_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                created_by TEXT,
                created_at TEXT NOT NULL,
                age INTEGER,
                phone_number TEXT,
                notes TEXT,
                specialty TEXT,
                hospital TEXT
            );

            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                patient_id TEXT NOT NULL,
                doctor_id TEXT NOT NULL,
                image_name TEXT NOT NULL,
                image_hash TEXT,
                annotated_image TEXT,
                fracture_type TEXT,
                recovery_days INTEGER,
                confidence REAL,
                notes TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS annotations (
                id TEXT PRIMARY KEY,
                report_id TEXT NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
                x REAL NOT NULL,
                y REAL NOT NULL,
                width REAL NOT NULL,
                height REAL NOT NULL,
                fracture_type TEXT NOT NULL,
                confidence REAL NOT NULL,
                orig_x REAL,
                orig_y REAL,
                orig_width REAL,
                orig_height REAL,
                corrected INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_users_created_by ON users(created_by);
            CREATE INDEX IF NOT EXISTS idx_reports_doctor ON reports(doctor_id);
            CREATE INDEX IF NOT EXISTS idx_reports_patient ON reports(patient_id);
            CREATE INDEX IF NOT EXISTS idx_reports_hash ON reports(image_hash);
            CREATE INDEX IF NOT EXISTS idx_annotations_report ON annotations(report_id);
        "#)?;
        Ok(())
    }

    // === Users ===

    /// Create a user. Fails with `Conflict` when the email is taken.
    pub fn insert_user(&self, new_user: &NewUser) -> Result<User> {
        let role = new_user
            .role
            .ok_or_else(|| RadioError::Validation("Role is required".to_string()))?;
        let conn = self.lock_conn()?;

        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
            params![new_user.email.trim()],
            |row| row.get(0),
        )?;
        if taken {
            return Err(RadioError::Conflict("User with this email already exists".to_string()));
        }

        let user = User {
            id: new_id(),
            full_name: new_user.full_name.trim().to_string(),
            email: new_user.email.trim().to_string(),
            role,
            created_by: new_user.created_by.clone(),
            created_at: Utc::now(),
            age: new_user.age,
            phone_number: new_user.phone_number.clone(),
            notes: new_user.notes.clone(),
            specialty: new_user.specialty.clone(),
            hospital: new_user.hospital.clone(),
        };

        conn.execute(
            r#"INSERT INTO users (id, full_name, email, password_hash, role, created_by, created_at,
                                  age, phone_number, notes, specialty, hospital)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                user.id,
                user.full_name,
                user.email,
                new_user.password_hash,
                user.role.as_str(),
                user.created_by,
                timestamp(&user.created_at),
                user.age,
                user.phone_number,
                user.notes,
                user.specialty,
                user.hospital,
            ],
        )?;
        Ok(user)
    }

    /// Look a user up by email, returning the stored password hash alongside
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<(User, String)>> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {}, password_hash FROM users WHERE email = ?1", USER_COLUMNS);
        conn.query_row(&sql, params![email.trim()], |row| {
            Ok((user_from_row(row)?, row.get::<_, String>(11)?))
        })
        .optional()
        .map_err(Into::into)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
        conn.query_row(&sql, params![id], user_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// Patients created by the given user, newest first
    pub fn patients_created_by(&self, creator_id: &str) -> Result<Vec<User>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {} FROM users WHERE role = 'patient' AND created_by = ?1 ORDER BY created_at DESC",
            USER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(params![creator_id], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Create the admin account if no user holds that email yet.
    /// Returns `true` when an account was created.
    pub fn ensure_admin(&self, full_name: &str, email: &str, password_hash: &str) -> Result<bool> {
        if self.find_user_by_email(email)?.is_some() {
            return Ok(false);
        }
        self.insert_user(&NewUser {
            full_name: full_name.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            role: Some(Role::Admin),
            ..Default::default()
        })?;
        Ok(true)
    }

    // === Reports ===

    pub fn insert_report(&self, report: &Report) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"INSERT INTO reports (id, patient_id, doctor_id, image_name, image_hash, annotated_image,
                                    fracture_type, recovery_days, confidence, notes, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                report.id,
                report.patient_id,
                report.doctor_id,
                report.image_name,
                report.image_hash,
                report.annotated_image,
                report.fracture_type,
                report.recovery_days,
                report.confidence,
                report.notes,
                timestamp(&report.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_report(&self, id: &str) -> Result<Option<Report>> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {} FROM reports r WHERE r.id = ?1", REPORT_COLUMNS);
        conn.query_row(&sql, params![id], report_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// Reports visible in `scope`, newest first, with patient and doctor names
    pub fn list_reports(&self, scope: &ReportScope) -> Result<Vec<EnrichedReport>> {
        let conn = self.lock_conn()?;
        let (filter, owner) = match scope {
            ReportScope::All => ("?1 IS NULL", None),
            ReportScope::Doctor(id) => ("r.doctor_id = ?1", Some(id.as_str())),
            ReportScope::Patient(id) => ("r.patient_id = ?1", Some(id.as_str())),
        };
        let sql = format!(
            r#"SELECT {}, p.full_name, d.full_name
               FROM reports r
               LEFT JOIN users p ON p.id = r.patient_id
               LEFT JOIN users d ON d.id = r.doctor_id
               WHERE {}
               ORDER BY r.created_at DESC, r.rowid DESC"#,
            REPORT_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let reports = stmt
            .query_map(params![owner], |row| {
                Ok(EnrichedReport {
                    report: report_from_row(row)?,
                    patient_name: row.get(11)?,
                    doctor_name: row.get(12)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(reports)
    }

    /// Delete a report and its annotations. Returns `false` when missing.
    pub fn delete_report(&self, id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM annotations WHERE report_id = ?1", params![id])?;
        let removed = conn.execute("DELETE FROM reports WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    /// Check for an earlier upload of the same image
    pub fn find_report_by_hash(&self, hash: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT id FROM reports WHERE image_hash = ?1 LIMIT 1",
            params![hash],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    // === Annotations ===

    pub fn insert_annotation(&self, report_id: &str, annotation: &FractureAnnotation) -> Result<()> {
        let conn = self.lock_conn()?;
        let orig = annotation.original_coordinates;
        conn.execute(
            r#"INSERT INTO annotations (id, report_id, x, y, width, height, fracture_type, confidence,
                                        orig_x, orig_y, orig_width, orig_height, corrected)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                annotation.id,
                report_id,
                annotation.x,
                annotation.y,
                annotation.width,
                annotation.height,
                annotation.fracture_type,
                annotation.confidence,
                orig.map(|b| b.x),
                orig.map(|b| b.y),
                orig.map(|b| b.width),
                orig.map(|b| b.height),
                annotation.corrected,
            ],
        )?;
        Ok(())
    }

    pub fn list_annotations(&self, report_id: &str) -> Result<Vec<FractureAnnotation>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {} FROM annotations WHERE report_id = ?1 ORDER BY rowid",
            ANNOTATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let annotations = stmt
            .query_map(params![report_id], annotation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(annotations)
    }

    /// Move an annotation. The first correction keeps the detector's
    /// coordinates as the original; later ones leave them alone.
    pub fn update_annotation(
        &self,
        report_id: &str,
        annotation_id: &str,
        bounds: BoundingBox,
    ) -> Result<Option<FractureAnnotation>> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            r#"UPDATE annotations SET
                   orig_x = COALESCE(orig_x, x),
                   orig_y = COALESCE(orig_y, y),
                   orig_width = COALESCE(orig_width, width),
                   orig_height = COALESCE(orig_height, height),
                   x = ?3, y = ?4, width = ?5, height = ?6,
                   corrected = 1
               WHERE id = ?1 AND report_id = ?2"#,
            params![annotation_id, report_id, bounds.x, bounds.y, bounds.width, bounds.height],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let sql = format!("SELECT {} FROM annotations WHERE id = ?1", ANNOTATION_COLUMNS);
        conn.query_row(&sql, params![annotation_id], annotation_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.lock_conn()?;
        let count = |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [], |row| row.get(0)) };
        Ok(DbStats {
            user_count: count("SELECT COUNT(*) FROM users")?,
            patient_count: count("SELECT COUNT(*) FROM users WHERE role = 'patient'")?,
            report_count: count("SELECT COUNT(*) FROM reports")?,
            fracture_count: count(
                "SELECT COUNT(*) FROM reports WHERE fracture_type IS NOT NULL AND fracture_type != ''",
            )?,
            corrected_annotations: count("SELECT COUNT(*) FROM annotations WHERE corrected = 1")?,
        })
    }
}

/// Generate a new UUID for records
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
