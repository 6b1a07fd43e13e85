//! Revision-script migrations.
//!
//! Scripts live in one folder and form a single line from the base revision
//! to the head. The applied revision is tracked in `_sqlwrap_version`. Each
//! script runs in its own transaction together with the version update, so
//! a failing script leaves the database at the previous revision.

mod script;

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

use crate::database::Database;
use crate::error::DbError;

pub use script::Revision;
use script::{load_chain, render, slugify, DEFAULT_TEMPLATE, TEMPLATE_FILE};

/// Default folder for revision scripts.
pub const DEFAULT_MIGRATIONS_PATH: &str = "db/migrations";

const VERSION_TABLE: &str = "_sqlwrap_version";

/// Errors that can occur while managing migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a revision failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The revision that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),

    /// No connection could be checked out of the pool.
    #[error("failed to get a pooled connection: {0}")]
    Checkout(#[from] r2d2::Error),

    /// A database operation outside the scripts failed.
    #[error(transparent)]
    Database(#[from] DbError),

    /// No revision matches the given id or prefix.
    #[error("unknown revision '{0}'")]
    UnknownRevision(String),

    /// More than one revision starts with the given prefix.
    #[error("ambiguous revision prefix '{0}'")]
    AmbiguousRevision(String),

    /// The target cannot be reached with the requested command.
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget {
        /// The target as given.
        target: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A script file is malformed.
    #[error("invalid revision script {}: {reason}", path.display())]
    Script {
        /// The script file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// The scripts do not form a single line of revisions.
    #[error("invalid revision chain: {0}")]
    Chain(String),

    /// Reading or writing the scripts folder failed.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        /// The file or folder involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
}

/// Migration commands over a scripts folder and a database.
#[derive(Debug, Clone)]
pub struct Migrations {
    db: Database,
    path: PathBuf,
}

impl Migrations {
    /// Opens the scripts folder, creating it when missing.
    pub fn new(db: &Database, path: impl Into<PathBuf>) -> Result<Self, MigrationError> {
        let migrations = Self {
            db: db.clone(),
            path: path.into(),
        };
        migrations.init()?;
        Ok(migrations)
    }

    /// The scripts folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the scripts folder and its script template. Existing files
    /// are left alone.
    pub fn init(&self) -> Result<(), MigrationError> {
        fs::create_dir_all(&self.path).map_err(|source| MigrationError::Io {
            path: self.path.clone(),
            source,
        })?;

        let template = self.path.join(TEMPLATE_FILE);
        if !template.exists() {
            fs::write(&template, DEFAULT_TEMPLATE).map_err(|source| MigrationError::Io {
                path: template.clone(),
                source,
            })?;
            tracing::debug!(path = %template.display(), "wrote script template");
        }
        Ok(())
    }

    /// Generates a new revision id: 12 lowercase hex characters.
    pub fn rev_id() -> String {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(12);
        id
    }

    /// All revisions, base first.
    pub fn revisions(&self) -> Result<Vec<Revision>, MigrationError> {
        load_chain(&self.path)
    }

    /// Writes an empty revision script on top of `parent` (default: head).
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidTarget` if `parent` is not the head,
    /// since revisions form a single line.
    pub fn revision(&self, message: &str, parent: Option<&str>) -> Result<Revision, MigrationError> {
        let chain = self.revisions()?;
        let head = chain.last().map(|r| r.id.clone());

        let parent = match parent {
            None | Some("head") => head,
            Some("base") if chain.is_empty() => None,
            Some(target) => {
                let index = resolve(&chain, target)?;
                if Some(&chain[index].id) != head.as_ref() {
                    return Err(MigrationError::InvalidTarget {
                        target: target.to_string(),
                        reason: "new revisions must extend the head".to_string(),
                    });
                }
                head
            }
        };

        let id = Self::rev_id();
        let now = chrono::Utc::now();
        let slug = slugify(message);
        let file_name = if slug.is_empty() {
            format!("{}_{id}.sql", now.format("%Y_%m_%d"))
        } else {
            format!("{}_{id}_{slug}.sql", now.format("%Y_%m_%d"))
        };

        let template_path = self.path.join(TEMPLATE_FILE);
        let template = fs::read_to_string(&template_path)
            .unwrap_or_else(|_| DEFAULT_TEMPLATE.to_string());
        let text = render(
            &template,
            &id,
            parent.as_deref(),
            message,
            &now.format("%Y-%m-%d %H:%M:%S").to_string(),
        );

        let path = self.path.join(file_name);
        fs::write(&path, &text).map_err(|source| MigrationError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(revision = %id, path = %path.display(), "created revision");

        let mut revision = Revision::parse(&path, &text)?;
        revision.is_head = true;
        Ok(revision)
    }

    /// The newest revision.
    pub fn head(&self) -> Result<Option<Revision>, MigrationError> {
        Ok(self.revisions()?.pop())
    }

    /// The revision the database is at, `None` at base.
    pub fn current(&self) -> Result<Option<Revision>, MigrationError> {
        let chain = self.revisions()?;
        let conn = self.db.pool().get()?;
        Ok(current_index(&conn, &chain)?.map(|i| chain[i].clone()))
    }

    /// Revisions from `start` to `end`, both included, base first.
    ///
    /// Either bound accepts a revision id or prefix, `base`, `head`, or
    /// `current`. A missing start means base and a missing end means head.
    pub fn history(
        &self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Vec<Revision>, MigrationError> {
        let chain = self.revisions()?;
        if chain.is_empty() {
            return Ok(chain);
        }

        let needs_current = start == Some("current") || end == Some("current");
        let current = if needs_current {
            let conn = self.db.pool().get()?;
            current_index(&conn, &chain)?
        } else {
            None
        };

        let from = match start {
            None | Some("base") => 0,
            Some("current") => current.unwrap_or(0),
            Some("head") => chain.len() - 1,
            Some(target) => resolve(&chain, target)?,
        };
        let to = match end {
            None | Some("head") | Some("heads") => chain.len() - 1,
            Some("current") => current.unwrap_or(chain.len() - 1),
            Some("base") => 0,
            Some(target) => resolve(&chain, target)?,
        };

        if from > to {
            return Ok(Vec::new());
        }
        Ok(chain[from..=to].to_vec())
    }

    /// Applies revisions up to `target`: `head`, `+N`, or a revision id.
    /// Returns the applied revisions.
    pub fn upgrade(&self, target: &str) -> Result<Vec<Revision>, MigrationError> {
        let chain = self.revisions()?;
        let conn = self.db.pool().get()?;
        let current = current_index(&conn, &chain)?;
        let destination = upgrade_destination(&chain, current, target)?;

        if destination < current {
            return Err(MigrationError::InvalidTarget {
                target: target.to_string(),
                reason: "target is older than the current revision".to_string(),
            });
        }

        let start = current.map_or(0, |i| i + 1);
        let end = destination.map_or(0, |i| i + 1);
        let pending = &chain[start..end.max(start)];

        for rev in pending {
            tracing::info!(revision = %rev.id, message = %rev.message, "applying migration");
            run_step(&conn, &rev.id, &rev.up, rev.parent.as_deref(), Some(&rev.id))?;
        }
        if pending.is_empty() {
            tracing::debug!("database already at target revision");
        }
        Ok(pending.to_vec())
    }

    /// Reverts revisions down to `target`: `-N` (or `N`), `base`, or a
    /// revision id. Returns the reverted revisions, newest first.
    pub fn downgrade(&self, target: &str) -> Result<Vec<Revision>, MigrationError> {
        let chain = self.revisions()?;
        let conn = self.db.pool().get()?;
        let current = current_index(&conn, &chain)?;
        let destination = downgrade_destination(&chain, current, target)?;

        if destination > current {
            return Err(MigrationError::InvalidTarget {
                target: target.to_string(),
                reason: "target is newer than the current revision".to_string(),
            });
        }

        let start = destination.map_or(0, |i| i + 1);
        let end = current.map_or(0, |i| i + 1);
        let reverted: Vec<Revision> = chain[start..end.max(start)].iter().rev().cloned().collect();

        for rev in &reverted {
            tracing::info!(revision = %rev.id, message = %rev.message, "reverting migration");
            run_step(&conn, &rev.id, &rev.down, Some(&rev.id), rev.parent.as_deref())?;
        }
        Ok(reverted)
    }

    /// SQL that would upgrade from `from` to `to`, given as `"from:to"`.
    /// Nothing is run.
    pub fn upgrade_sql(&self, range: &str) -> Result<String, MigrationError> {
        let chain = self.revisions()?;
        let (from, to) = split_range(range)?;
        let from = bound(&chain, from)?;
        let to = upgrade_destination(&chain, from, to)?;

        let mut out = String::from("BEGIN;\n\n");
        if from.is_none() {
            out.push_str(&version_table_sql());
            out.push_str("\n\n");
        }
        let start = from.map_or(0, |i| i + 1);
        let end = to.map_or(0, |i| i + 1);
        for rev in chain.get(start..end).unwrap_or_default() {
            let previous = rev.parent.as_deref().unwrap_or("<base>");
            out.push_str(&format!("-- Running upgrade {previous} -> {}\n\n", rev.id));
            push_statements(&mut out, &rev.up);
            out.push_str(&version_update_sql(rev.parent.as_deref(), Some(&rev.id)));
            out.push_str("\n\n");
        }
        out.push_str("COMMIT;\n");
        Ok(out)
    }

    /// SQL that would downgrade from `from` to `to`, given as `"from:to"`.
    /// Nothing is run.
    pub fn downgrade_sql(&self, range: &str) -> Result<String, MigrationError> {
        let chain = self.revisions()?;
        let (from, to) = split_range(range)?;
        let from = bound(&chain, from)?;
        let to = downgrade_destination(&chain, from, to)?;

        let mut out = String::from("BEGIN;\n\n");
        let start = to.map_or(0, |i| i + 1);
        let end = from.map_or(0, |i| i + 1);
        for rev in chain.get(start..end).unwrap_or_default().iter().rev() {
            let next = rev.parent.as_deref().unwrap_or("<base>");
            out.push_str(&format!("-- Running downgrade {} -> {next}\n\n", rev.id));
            push_statements(&mut out, &rev.down);
            out.push_str(&version_update_sql(Some(&rev.id), rev.parent.as_deref()));
            out.push_str("\n\n");
        }
        out.push_str("COMMIT;\n");
        Ok(out)
    }

    /// Records `target` (`head`, `base`, or a revision id) as the current
    /// revision without running any script.
    ///
    /// With `purge`, the version table is emptied first even if it holds
    /// an unknown revision.
    pub fn stamp(&self, target: &str, purge: bool) -> Result<Option<Revision>, MigrationError> {
        let chain = self.revisions()?;
        let destination = match target {
            "base" => None,
            "head" | "heads" => chain.len().checked_sub(1),
            other => Some(resolve(&chain, other)?),
        };

        let conn = self.db.pool().get()?;
        if !purge {
            current_index(&conn, &chain)?;
        }

        let id = destination.map(|i| chain[i].id.as_str());
        let tx = conn
            .unchecked_transaction()
            .map_err(MigrationError::StateQuery)?;
        ensure_version_table(&tx)?;
        tx.execute(&format!("DELETE FROM {VERSION_TABLE}"), [])
            .map_err(MigrationError::StateQuery)?;
        if let Some(id) = id {
            tx.execute(
                &format!("INSERT INTO {VERSION_TABLE} (version_num) VALUES (?1)"),
                [id],
            )
            .map_err(MigrationError::StateQuery)?;
        }
        tx.commit().map_err(MigrationError::StateQuery)?;

        tracing::info!(revision = id.unwrap_or("base"), purge, "stamped revision");
        Ok(destination.map(|i| chain[i].clone()))
    }

    /// Creates every registered table and stamps the head, without running
    /// any script.
    pub fn create_all(&self) -> Result<(), MigrationError> {
        self.db.create_all()?;
        self.stamp("head", false)?;
        Ok(())
    }
}

/// Runs one script and moves the version from `from` to `to` atomically.
fn run_step(
    conn: &Connection,
    name: &str,
    sql: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<(), MigrationError> {
    let failed = |source| MigrationError::ExecutionFailed {
        name: name.to_string(),
        source,
    };

    let tx = conn.unchecked_transaction().map_err(failed)?;
    if !sql.trim().is_empty() {
        tx.execute_batch(sql).map_err(failed)?;
    }
    update_version(&tx, from, to).map_err(failed)?;
    tx.commit().map_err(failed)?;
    Ok(())
}

fn update_version(conn: &Connection, from: Option<&str>, to: Option<&str>) -> rusqlite::Result<()> {
    match (from, to) {
        (None, Some(to)) => conn.execute(
            &format!("INSERT INTO {VERSION_TABLE} (version_num) VALUES (?1)"),
            [to],
        )?,
        (Some(from), Some(to)) => conn.execute(
            &format!("UPDATE {VERSION_TABLE} SET version_num = ?1 WHERE version_num = ?2"),
            [to, from],
        )?,
        (Some(from), None) => conn.execute(
            &format!("DELETE FROM {VERSION_TABLE} WHERE version_num = ?1"),
            [from],
        )?,
        (None, None) => 0,
    };
    Ok(())
}

fn version_table_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {VERSION_TABLE} (\n    version_num TEXT NOT NULL PRIMARY KEY\n);"
    )
}

fn ensure_version_table(conn: &Connection) -> Result<(), MigrationError> {
    conn.execute_batch(&version_table_sql())
        .map_err(|e| MigrationError::ExecutionFailed {
            name: format!("{VERSION_TABLE}_bootstrap"),
            source: e,
        })
}

/// Offline counterpart of [`update_version`].
fn version_update_sql(from: Option<&str>, to: Option<&str>) -> String {
    match (from, to) {
        (None, Some(to)) => format!(
            "INSERT INTO {VERSION_TABLE} (version_num) VALUES ({});",
            quote(to)
        ),
        (Some(from), Some(to)) => format!(
            "UPDATE {VERSION_TABLE} SET version_num = {} WHERE version_num = {};",
            quote(to),
            quote(from)
        ),
        (Some(from), None) => format!(
            "DELETE FROM {VERSION_TABLE} WHERE version_num = {};",
            quote(from)
        ),
        (None, None) => String::new(),
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn push_statements(out: &mut String, sql: &str) {
    let sql = sql.trim();
    if sql.is_empty() {
        return;
    }
    out.push_str(sql);
    if !sql.ends_with(';') {
        out.push(';');
    }
    out.push_str("\n\n");
}

/// Index in `chain` of the applied revision, `None` at base.
fn current_index(conn: &Connection, chain: &[Revision]) -> Result<Option<usize>, MigrationError> {
    ensure_version_table(conn)?;
    let stored: Option<String> = conn
        .query_row(
            &format!("SELECT version_num FROM {VERSION_TABLE} LIMIT 1"),
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(MigrationError::StateQuery)?;

    match stored {
        None => Ok(None),
        Some(id) => chain
            .iter()
            .position(|r| r.id == id)
            .map(Some)
            .ok_or(MigrationError::UnknownRevision(id)),
    }
}

/// Finds a revision by exact id or unique prefix.
fn resolve(chain: &[Revision], target: &str) -> Result<usize, MigrationError> {
    if let Some(index) = chain.iter().position(|r| r.id == target) {
        return Ok(index);
    }
    let mut matches = chain
        .iter()
        .enumerate()
        .filter(|(_, r)| !target.is_empty() && r.id.starts_with(target));
    match (matches.next(), matches.next()) {
        (Some((index, _)), None) => Ok(index),
        (Some(_), Some(_)) => Err(MigrationError::AmbiguousRevision(target.to_string())),
        (None, _) => Err(MigrationError::UnknownRevision(target.to_string())),
    }
}

/// A range bound: `base`, `head`, or a revision.
fn bound(chain: &[Revision], target: &str) -> Result<Option<usize>, MigrationError> {
    match target {
        "base" => Ok(None),
        "head" | "heads" => Ok(chain.len().checked_sub(1)),
        other => resolve(chain, other).map(Some),
    }
}

fn split_range(range: &str) -> Result<(&str, &str), MigrationError> {
    range.split_once(':').ok_or_else(|| MigrationError::InvalidTarget {
        target: range.to_string(),
        reason: "SQL output requires a \"from:to\" range".to_string(),
    })
}

fn upgrade_destination(
    chain: &[Revision],
    current: Option<usize>,
    target: &str,
) -> Result<Option<usize>, MigrationError> {
    if let Some(steps) = target.strip_prefix('+') {
        let steps: usize = steps.parse().map_err(|_| invalid(target, "expected +N"))?;
        if steps == 0 {
            return Ok(current);
        }
        let destination = current.map_or(steps - 1, |i| i + steps);
        if destination >= chain.len() {
            return Err(invalid(target, "not enough revisions above the current one"));
        }
        return Ok(Some(destination));
    }
    bound(chain, target)
}

fn downgrade_destination(
    chain: &[Revision],
    current: Option<usize>,
    target: &str,
) -> Result<Option<usize>, MigrationError> {
    if target.starts_with('+') {
        return Err(invalid(target, "downgrade steps are written as -N"));
    }

    let relative = if target.starts_with('-') {
        Some(target)
    } else if target == "base" || resolve(chain, target).is_ok() {
        None
    } else {
        Some(target)
    };

    let Some(relative) = relative else {
        return bound(chain, target);
    };

    let steps: i64 = relative
        .parse()
        .map_err(|_| invalid(target, "expected a relative step, a revision, or base"))?;
    let steps = usize::try_from(steps.unsigned_abs()).unwrap_or(usize::MAX);
    if steps == 0 {
        return Ok(current);
    }

    let position = current.map_or(0, |i| i + 1);
    if steps > position {
        return Err(invalid(target, "not enough revisions below the current one"));
    }
    Ok((position - steps).checked_sub(1))
}

fn invalid(target: &str, reason: &str) -> MigrationError {
    MigrationError::InvalidTarget {
        target: target.to_string(),
        reason: reason.to_string(),
    }
}
