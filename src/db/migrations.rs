//! Database migration system for Kibble.
//!
//! Migrations are embedded in the binary and run automatically on startup.
//! The schema version is tracked via `PRAGMA user_version`.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use thiserror::Error;

use super::schema;

/// A database migration.
pub struct Migration {
    /// Version number (sequential, starting from 1).
    pub version: i32,
    /// Human-readable description (include app version for traceability).
    pub description: &'static str,
    pub up: fn(&Connection) -> rusqlite::Result<()>,
}

/// All migrations in order.
/// Add new migrations to the end of this list.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "v0.3.0 baseline",
    up: migration_001_baseline,
}];

/// Version the schema reaches once every migration has run.
pub fn latest_version() -> i32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to create backup at {path}: {source}")]
    BackupFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Migration {version} failed: {message}. Backup at: {backup_path}")]
    MigrationFailed {
        version: i32,
        message: String,
        backup_path: PathBuf,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn get_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

fn set_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.pragma_update(None, "user_version", version)
}

fn backup_database(db_path: &str, from_version: i32) -> Result<PathBuf, MigrationError> {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let backup_path = PathBuf::from(format!("{}.backup_v{}_{}", db_path, from_version, timestamp));

    fs::copy(db_path, &backup_path).map_err(|e| MigrationError::BackupFailed {
        path: backup_path.clone(),
        source: e,
    })?;

    Ok(backup_path)
}

/// Keep only the most recent `keep_count` backups. -1 keeps all.
fn cleanup_old_backups(db_path: &str, keep_count: i32) -> Result<(), std::io::Error> {
    if keep_count < 1 {
        return Ok(());
    }
    let keep_count = keep_count as usize;

    let db_path = Path::new(db_path);
    let parent = db_path.parent().unwrap_or(Path::new("."));
    let db_name = db_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let backup_prefix = format!("{}.backup_v", db_name);

    let mut backups: Vec<_> = fs::read_dir(parent)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&backup_prefix))
        })
        .collect();

    if backups.len() <= keep_count {
        return Ok(());
    }

    // Oldest first
    backups.sort_by_key(|entry| {
        entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });

    let to_remove = backups.len() - keep_count;
    for entry in backups.into_iter().take(to_remove) {
        tracing::info!("Removing old backup: {}", entry.path().display());
        fs::remove_file(entry.path())?;
    }

    Ok(())
}

/// Run every pending migration, each in its own transaction.
/// Returns the number of migrations applied.
pub(super) fn apply_pending(conn: &mut Connection) -> Result<usize, MigrationError> {
    apply_pending_with_backup(conn, None)
}

fn apply_pending_with_backup(
    conn: &mut Connection,
    backup_path: Option<&Path>,
) -> Result<usize, MigrationError> {
    let current_version = get_version(conn)?;
    let pending: Vec<_> = MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version)
        .collect();

    for migration in &pending {
        tracing::info!(
            "Running migration {}: {}",
            migration.version,
            migration.description
        );

        let tx = conn.transaction()?;
        match (migration.up)(&tx) {
            Ok(()) => {
                set_version(&tx, migration.version)?;
                tx.commit()?;
                tracing::info!("Migration {} completed", migration.version);
            }
            Err(e) => {
                // Transaction rolls back on drop
                match backup_path {
                    Some(path) => tracing::error!(
                        "Migration {} failed: {}. Database unchanged. Backup at: {}",
                        migration.version,
                        e,
                        path.display()
                    ),
                    None => tracing::error!(
                        "Migration {} failed: {}. Database unchanged. No backup available!",
                        migration.version,
                        e
                    ),
                }
                return Err(MigrationError::MigrationFailed {
                    version: migration.version,
                    message: e.to_string(),
                    backup_path: backup_path.map(Path::to_path_buf).unwrap_or_default(),
                });
            }
        }
    }

    Ok(pending.len())
}

/// Run pending migrations for a file database.
///
/// - Creates a backup before applying anything to a non-fresh database
///   (unless `backup_keep_count` is 0)
/// - Runs each pending migration in its own transaction
/// - Cleans up old backups based on `backup_keep_count` (-1 = keep all)
pub fn run_migrations(
    conn: &mut Connection,
    db_path: &str,
    backup_keep_count: i32,
) -> Result<(), MigrationError> {
    schema::configure_connection(conn)?;
    let current_version = get_version(conn)?;
    let pending = MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version)
        .count();

    if pending == 0 {
        tracing::debug!("Database at version {} (up to date)", current_version);
        return Ok(());
    }

    tracing::info!(
        "Database at version {}, {} migration(s) pending",
        current_version,
        pending
    );

    let backup_path = if backup_keep_count == 0 {
        tracing::warn!("Migration backups disabled (MIGRATION_BACKUP_COUNT=0)");
        None
    } else if current_version == 0 {
        tracing::debug!("Fresh database (version 0), skipping backup");
        None
    } else {
        let path = backup_database(db_path, current_version)?;
        tracing::info!("Backup created: {}", path.display());
        Some(path)
    };

    apply_pending_with_backup(conn, backup_path.as_deref())?;

    if let Err(e) = cleanup_old_backups(db_path, backup_keep_count) {
        tracing::warn!("Failed to clean up old backups: {}", e);
    }

    Ok(())
}

// ============================================================================
// Migration Functions
// ============================================================================

/// Migration 1: every table the storefront needs.
fn migration_001_baseline(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(schema::BASELINE)
}
